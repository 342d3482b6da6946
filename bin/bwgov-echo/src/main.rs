use anyhow::Context;
use bwgov_linux::EchoResponder;
use clap::Parser;
use log::{info, warn};
use std::sync::{Arc, atomic::{AtomicBool, Ordering}};

/// UDP echo responder co-located with the critical service.
#[derive(Parser)]
struct Cli {
    #[arg(long, env = "ECHO_BIND", default_value = "0.0.0.0:5201")] bind: String,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    info!(">>> BWGOV ECHO: v0.1.0 <<<");

    let echo = EchoResponder::bind(&cli.bind)
        .with_context(|| format!("cannot bind echo responder on {}", cli.bind))?;

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        warn!("Signal received. Stopping...");
        r.store(false, Ordering::SeqCst);
    })?;

    let reflected = echo.run(&running);
    info!("Echo responder stopped after {} datagrams", reflected);
    Ok(())
}
