use std::io;
use std::net::{SocketAddr, TcpStream, UdpSocket};
use std::time::{Duration, Instant};

use log::debug;

use bwgov_core::{ProbeSample, Protocol};
use bwgov_hal::{Clock, Probe};

use crate::resolve::CachedResolver;

/// Probe payload: big-endian sequence number, then big-endian send timestamp (us).
pub const PAYLOAD_LEN: usize = 16;

/// How long a resolved probe target is trusted before a background refresh.
pub const RESOLVE_REFRESH: Duration = Duration::from_secs(30);

fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

/// Round trip through the echo responder.
pub struct UdpEchoProbe {
    target: CachedResolver,
    timeout: Duration,
    seq: u64,
}

impl UdpEchoProbe {
    pub fn new(host: &str, port: u16, timeout: Duration) -> Self {
        Self {
            target: CachedResolver::new(host, port, RESOLVE_REFRESH),
            timeout,
            seq: rand::random::<u32>() as u64,
        }
    }

    fn bind_for(target: &SocketAddr) -> io::Result<UdpSocket> {
        if target.is_ipv4() {
            UdpSocket::bind("0.0.0.0:0")
        } else {
            UdpSocket::bind("[::]:0")
        }
    }

    fn round_trip(
        &mut self,
        target: SocketAddr,
        sent_at_us: u64,
        budget: Duration,
    ) -> io::Result<Option<f64>> {
        let socket = Self::bind_for(&target)?;
        self.seq = self.seq.wrapping_add(1);

        let mut payload = [0u8; PAYLOAD_LEN];
        payload[..8].copy_from_slice(&self.seq.to_be_bytes());
        payload[8..].copy_from_slice(&sent_at_us.to_be_bytes());

        let start = Instant::now();
        let deadline = start + budget;
        socket.send_to(&payload, target)?;

        let mut buf = [0u8; 1500];
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            socket.set_read_timeout(Some(remaining))?;
            match socket.recv_from(&mut buf) {
                // Stray or late echoes carry another sequence number.
                Ok((n, _)) if n >= PAYLOAD_LEN && buf[..8] == payload[..8] => {
                    return Ok(Some(elapsed_ms(start)));
                }
                Ok(_) => continue,
                Err(e) if is_timeout(&e) => return Ok(None),
                Err(e) => return Err(e),
            }
        }
    }
}

impl Probe for UdpEchoProbe {
    fn protocol(&self) -> Protocol {
        Protocol::Connectionless
    }

    fn measure(&mut self, clock: &dyn Clock) -> ProbeSample {
        let ts = clock.now_us();
        let started = Instant::now();
        let target = match self.target.lookup(self.timeout) {
            Ok(a) => a,
            Err(e) => {
                debug!("udp probe: {}", e);
                return ProbeSample::error(self.protocol(), ts);
            }
        };
        let budget = self.timeout.saturating_sub(started.elapsed());
        if budget.is_zero() {
            return ProbeSample::timeout(self.protocol(), ts);
        }
        match self.round_trip(target, ts, budget) {
            Ok(Some(rtt)) => ProbeSample::ok(self.protocol(), ts, rtt),
            Ok(None) => {
                debug!("udp probe to {} timed out after {:?}", target, self.timeout);
                ProbeSample::timeout(self.protocol(), ts)
            }
            Err(e) => {
                debug!("udp probe to {} failed: {}", target, e);
                self.target.invalidate();
                ProbeSample::error(self.protocol(), ts)
            }
        }
    }
}

/// Time to establish a fresh stream. The connection is never reused.
pub struct TcpConnectProbe {
    target: CachedResolver,
    timeout: Duration,
}

impl TcpConnectProbe {
    pub fn new(host: &str, port: u16, timeout: Duration) -> Self {
        Self { target: CachedResolver::new(host, port, RESOLVE_REFRESH), timeout }
    }
}

impl Probe for TcpConnectProbe {
    fn protocol(&self) -> Protocol {
        Protocol::ConnectionOriented
    }

    fn measure(&mut self, clock: &dyn Clock) -> ProbeSample {
        let ts = clock.now_us();
        let started = Instant::now();
        let target = match self.target.lookup(self.timeout) {
            Ok(a) => a,
            Err(e) => {
                debug!("tcp probe: {}", e);
                return ProbeSample::error(self.protocol(), ts);
            }
        };
        let budget = self.timeout.saturating_sub(started.elapsed());
        if budget.is_zero() {
            return ProbeSample::timeout(self.protocol(), ts);
        }

        let start = Instant::now();
        match TcpStream::connect_timeout(&target, budget) {
            Ok(stream) => {
                let rtt = elapsed_ms(start);
                drop(stream);
                ProbeSample::ok(self.protocol(), ts, rtt)
            }
            Err(e) if is_timeout(&e) => {
                debug!("tcp probe to {} timed out after {:?}", target, self.timeout);
                ProbeSample::timeout(self.protocol(), ts)
            }
            Err(e) => {
                debug!("tcp probe to {} failed: {}", target, e);
                self.target.invalidate();
                ProbeSample::error(self.protocol(), ts)
            }
        }
    }
}
