use bwgov_core::{BwError, BwResult};
use bwgov_linux::CachedResolver;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;
use std::time::{Duration, Instant};

fn slow_lookup(_: &str, port: u16) -> BwResult<SocketAddr> {
    thread::sleep(Duration::from_millis(300));
    Ok(SocketAddr::from(([10, 0, 0, 7], port)))
}

static COUNTED: AtomicU32 = AtomicU32::new(0);

fn counted_lookup(_: &str, port: u16) -> BwResult<SocketAddr> {
    let n = COUNTED.fetch_add(1, Ordering::SeqCst) as u8;
    Ok(SocketAddr::from(([10, 0, 0, n + 1], port)))
}

static FLAKY: AtomicU32 = AtomicU32::new(0);

/// Resolves once, then fails forever.
fn flaky_lookup(_: &str, port: u16) -> BwResult<SocketAddr> {
    match FLAKY.fetch_add(1, Ordering::SeqCst) {
        0 => Ok(SocketAddr::from(([10, 0, 0, 9], port))),
        _ => Err(BwError::Resolve("servfail".into())),
    }
}

fn failing_lookup(host: &str, _: u16) -> BwResult<SocketAddr> {
    Err(BwError::Resolve(format!("{} (nxdomain)", host)))
}

#[test]
fn test_slow_lookup_does_not_block_caller() {
    let mut r = CachedResolver::with_lookup("svc", 5201, Duration::from_secs(30), slow_lookup);

    let started = Instant::now();
    assert!(r.lookup(Duration::from_millis(20)).is_err());
    assert!(started.elapsed() < Duration::from_millis(200));

    // The lookup kept running in the background.
    thread::sleep(Duration::from_millis(400));
    let started = Instant::now();
    assert_eq!(r.lookup(Duration::ZERO).unwrap(), SocketAddr::from(([10, 0, 0, 7], 5201)));
    assert!(started.elapsed() < Duration::from_millis(50));
}

#[test]
fn test_fresh_address_is_reused() {
    let mut r = CachedResolver::with_lookup("svc", 5202, Duration::from_secs(30), counted_lookup);

    let first = r.lookup(Duration::from_secs(1)).unwrap();
    for _ in 0..5 {
        assert_eq!(r.lookup(Duration::from_secs(1)).unwrap(), first);
    }
    assert_eq!(COUNTED.load(Ordering::SeqCst), 1);
}

#[test]
fn test_stale_address_served_while_refresh_fails() {
    let mut r = CachedResolver::with_lookup("svc", 5201, Duration::from_secs(30), flaky_lookup);
    let addr = r.lookup(Duration::from_secs(1)).unwrap();

    r.invalidate();
    for _ in 0..3 {
        assert_eq!(r.lookup(Duration::from_millis(50)).unwrap(), addr);
        thread::sleep(Duration::from_millis(20));
    }
    assert!(FLAKY.load(Ordering::SeqCst) >= 2);
}

#[test]
fn test_lookup_error_surfaces() {
    let mut r = CachedResolver::with_lookup("gone", 5201, Duration::from_secs(30), failing_lookup);
    match r.lookup(Duration::from_secs(1)) {
        Err(BwError::Resolve(msg)) => assert!(msg.contains("nxdomain")),
        other => panic!("unexpected {:?}", other),
    }
}
