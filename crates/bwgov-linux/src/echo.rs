use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use log::{info, trace};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};

const MAX_DATAGRAM: usize = 65_535;
// Bounds how long `run` takes to notice the stop flag.
const POLL_TIMEOUT: Duration = Duration::from_millis(200);

/// Reflects every datagram back to its sender, byte for byte.
pub struct EchoResponder {
    socket: UdpSocket,
}

impl EchoResponder {
    pub fn bind(bind_addr: &str) -> anyhow::Result<Self> {
        let addr: SocketAddr = bind_addr.parse()?;
        let domain = if addr.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };

        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
        let buf_size = 4 * 1024 * 1024;
        let _ = socket.set_recv_buffer_size(buf_size);
        let _ = socket.set_send_buffer_size(buf_size);
        socket.set_reuse_address(true)?;
        socket.set_read_timeout(Some(POLL_TIMEOUT))?;

        let sa: SockAddr = addr.into();
        socket.bind(&sa)?;

        Ok(Self { socket: socket.into() })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Handles at most one datagram. Returns the reflected length, `None` if idle.
    /// Send failures are dropped; the prober detects loss by timeout.
    pub fn serve_once(&self, buf: &mut [u8]) -> Option<usize> {
        match self.socket.recv_from(buf) {
            Ok((n, from)) => {
                if let Err(e) = self.socket.send_to(&buf[..n], from) {
                    trace!("echo to {} dropped: {}", from, e);
                    return None;
                }
                Some(n)
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => None,
            Err(e) => {
                // ICMP errors from earlier sends surface here on Linux.
                trace!("echo recv error: {}", e);
                None
            }
        }
    }

    /// Serves until `running` clears. Returns the number of datagrams reflected.
    pub fn run(&self, running: &AtomicBool) -> u64 {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let mut reflected = 0u64;
        if let Ok(addr) = self.local_addr() {
            info!("Echo responder listening on {}", addr);
        }
        while running.load(Ordering::SeqCst) {
            if self.serve_once(&mut buf).is_some() {
                reflected += 1;
            }
        }
        reflected
    }
}
