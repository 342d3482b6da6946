use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, TryRecvError};
use std::thread;
use std::time::{Duration, Instant};

use log::debug;

use bwgov_core::{BwError, BwResult};

pub type LookupFn = fn(&str, u16) -> BwResult<SocketAddr>;

/// Resolves `host:port`, preferring IPv4 like the cluster DNS does. Blocks.
pub fn resolve(host: &str, port: u16) -> BwResult<SocketAddr> {
    let addrs: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|e| BwError::Resolve(format!("{}:{} ({})", host, port, e)))?
        .collect();
    addrs
        .iter()
        .find(|a| a.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
        .ok_or_else(|| BwError::Resolve(format!("{}:{} (no addresses)", host, port)))
}

/// A cached address whose lookups run off the caller's thread.
///
/// `lookup` never blocks longer than the wait it is given. While a refresh is
/// in flight the previous address keeps being served.
pub struct CachedResolver {
    host: String,
    port: u16,
    refresh: Duration,
    lookup_fn: LookupFn,
    addr: Option<SocketAddr>,
    fresh_until: Option<Instant>,
    pending: Option<Receiver<BwResult<SocketAddr>>>,
    last_error: Option<BwError>,
}

impl CachedResolver {
    pub fn new(host: &str, port: u16, refresh: Duration) -> Self {
        Self::with_lookup(host, port, refresh, resolve)
    }

    pub fn with_lookup(host: &str, port: u16, refresh: Duration, lookup_fn: LookupFn) -> Self {
        Self {
            host: host.to_string(),
            port,
            refresh,
            lookup_fn,
            addr: None,
            fresh_until: None,
            pending: None,
            last_error: None,
        }
    }

    /// Forces a refresh on the next lookup. The stale address stays usable meanwhile.
    pub fn invalidate(&mut self) {
        self.fresh_until = None;
    }

    pub fn lookup(&mut self, wait: Duration) -> BwResult<SocketAddr> {
        self.collect(Duration::ZERO);

        let fresh = self.fresh_until.map_or(false, |until| Instant::now() < until);
        if let (true, Some(addr)) = (fresh, self.addr) {
            return Ok(addr);
        }
        if self.pending.is_none() {
            self.start();
        }
        if self.addr.is_none() {
            self.collect(wait);
        }

        match (self.addr, &self.last_error) {
            (Some(addr), _) => Ok(addr),
            (None, Some(e)) if self.pending.is_none() => Err(e.clone()),
            _ => Err(BwError::Resolve(format!("{}:{} (lookup in progress)", self.host, self.port))),
        }
    }

    fn start(&mut self) {
        let (tx, rx) = mpsc::channel();
        let (host, port, lookup_fn) = (self.host.clone(), self.port, self.lookup_fn);
        let spawned = thread::Builder::new()
            .name(format!("resolve-{}", self.host))
            .spawn(move || {
                let _ = tx.send(lookup_fn(&host, port));
            });
        match spawned {
            Ok(_) => self.pending = Some(rx),
            Err(e) => self.last_error = Some(BwError::Resolve(format!("{} (spawn: {})", self.host, e))),
        }
    }

    /// Takes a finished lookup, waiting at most `wait` for it.
    fn collect(&mut self, wait: Duration) {
        let Some(rx) = &self.pending else { return };
        let result = if wait.is_zero() {
            match rx.try_recv() {
                Ok(r) => Some(r),
                Err(TryRecvError::Empty) => return,
                Err(TryRecvError::Disconnected) => None,
            }
        } else {
            match rx.recv_timeout(wait) {
                Ok(r) => Some(r),
                Err(RecvTimeoutError::Timeout) => return,
                Err(RecvTimeoutError::Disconnected) => None,
            }
        };
        self.pending = None;

        match result {
            Some(Ok(addr)) => {
                if self.addr != Some(addr) {
                    debug!("{}:{} resolved to {}", self.host, self.port, addr);
                }
                self.addr = Some(addr);
                self.fresh_until = Some(Instant::now() + self.refresh);
                self.last_error = None;
            }
            Some(Err(e)) => {
                debug!("{}", e);
                self.last_error = Some(e);
            }
            None => {
                self.last_error =
                    Some(BwError::Resolve(format!("{}:{} (lookup aborted)", self.host, self.port)));
            }
        }
    }
}
