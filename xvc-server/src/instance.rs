//! The Instance Controller (§4.7): owns the TCP listener and the single active
//! session for one adapter, enforcing the accept policy and the IP-sticky lock.

use std::cell::RefCell;
use std::io;
use std::net::{IpAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use xvc_protocol::error::ReadError;
use xvc_protocol::Message;

use crate::XvcServer;
use crate::ip_filter::IpFilter;
use crate::lock::SessionLock;
use crate::server::Server;

/// Poll timeout for the idle accept loop: long enough to avoid spinning, short
/// enough to notice a cleared shutdown flag or an expired lock promptly (§5).
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// Drives exactly one adapter: one listener, at most one active session at a
/// time, one session lock.
pub struct Instance<T: XvcServer, F: IpFilter> {
    server: Server<T>,
    listener: TcpListener,
    lock: RefCell<SessionLock>,
    ip_filter: F,
    shutdown: Arc<AtomicBool>,
}

impl<T: XvcServer, F: IpFilter> Instance<T, F> {
    pub fn new(
        server: Server<T>,
        listener: TcpListener,
        ip_filter: F,
        lock_timeout: Duration,
        shutdown: Arc<AtomicBool>,
    ) -> io::Result<Self> {
        listener.set_nonblocking(true)?;
        Ok(Instance {
            server,
            listener,
            lock: RefCell::new(SessionLock::new(lock_timeout)),
            ip_filter,
            shutdown,
        })
    }

    /// Runs the accept loop until the shutdown flag is set. Returns once the flag
    /// is observed; any session in progress is allowed to run to completion first
    /// (§5 "cancellation").
    pub fn run(&self) -> io::Result<()> {
        log::info!("instance accepting connections");
        while !self.shutdown.load(Ordering::Relaxed) {
            match self.listener.accept() {
                Ok((stream, addr)) => self.dispatch(stream, addr.ip()),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.lock.borrow_mut().expire(Instant::now());
                    std::thread::sleep(IDLE_POLL_INTERVAL);
                }
                Err(e) => log::error!("accept error: {e}"),
            }
        }
        log::info!("instance shutting down");
        Ok(())
    }

    /// Evaluates the accept policy against an idle-loop connection and, if
    /// admitted, runs the session to completion before returning control to the
    /// accept loop.
    fn dispatch(&self, stream: TcpStream, peer: IpAddr) {
        if !self.admit(peer) {
            log::info!("rejected connection from {peer}");
            return;
        }
        log::info!("accepted connection from {peer}");
        if let Err(e) = self.run_session(stream, peer) {
            log::error!("session with {peer} ended with error: {e}");
        }
        self.lock.borrow_mut().release(Instant::now());
    }

    /// Accept policy rules 1, 3 and 4 (§4.7). Rule 2 (reject while a session is
    /// active) cannot fire here since `run()` only calls `accept()` between
    /// sessions; it is enforced separately by [`Instance::reject_concurrent`].
    /// Rule 5 (claiming the lock) happens later, in [`Instance::run_session`], on
    /// the first byte of the session rather than on bare TCP accept — otherwise a
    /// connection that sends nothing before closing (a port scan, say) would seize
    /// the lock for the full timeout window.
    fn admit(&self, peer: IpAddr) -> bool {
        if !self.ip_filter.allows(peer) {
            return false;
        }
        let now = Instant::now();
        let mut lock = self.lock.borrow_mut();
        lock.expire(now);
        lock.accepts(peer, now)
    }

    /// Non-blocking accept attempt made once per XVC command while a session is
    /// active; anything observed here is rejected outright by rule 2 without
    /// delaying the active session's own I/O.
    fn reject_concurrent(&self) {
        match self.listener.accept() {
            Ok((stream, addr)) => {
                log::info!(
                    "rejected simultaneous connection from {} (session already active)",
                    addr.ip()
                );
                drop(stream);
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => log::error!("accept poll error during active session: {e}"),
        }
    }

    /// The session loop proper: reads one XVC command, dispatches it to the
    /// backend, sends the response, repeats until EOF or a fatal error. This
    /// mirrors `Server::handle_client`'s loop but interleaves
    /// [`Instance::reject_concurrent`] between commands (§4.7 "accept-loop
    /// mechanics"), and claims the session lock (rule 5) once the first command
    /// has actually been read.
    fn run_session(&self, mut tcp: TcpStream, peer: IpAddr) -> Result<(), ReadError> {
        let config = self.server.config();
        tcp.set_read_timeout(Some(config.read_write_timeout))?;
        tcp.set_write_timeout(Some(config.read_write_timeout))?;

        let mut claimed = false;
        loop {
            self.reject_concurrent();
            match Message::from_reader(&mut tcp, config.max_vector_size as usize) {
                Ok(message) => {
                    if !claimed {
                        self.lock.borrow_mut().claim(peer, Instant::now());
                        claimed = true;
                    }
                    self.server.process_message(message, &mut tcp)?
                }
                Err(ReadError::IoError(err)) if err.kind() == io::ErrorKind::TimedOut => {
                    log::error!("client read timeout, closing connection");
                    break;
                }
                Err(ReadError::IoError(err))
                    if err.kind() == io::ErrorKind::ConnectionAborted
                        || err.kind() == io::ErrorKind::ConnectionReset =>
                {
                    break;
                }
                Err(other) => return Err(other),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ip_filter::AllowAll;
    use crate::server::Config;

    struct NullServer;
    impl XvcServer for NullServer {
        fn set_tck(&self, period_ns: u32) -> u32 {
            period_ns
        }
        fn shift(&self, _num_bits: u32, _tms: Box<[u8]>, _tdi: Box<[u8]>) -> Box<[u8]> {
            Box::default()
        }
    }

    fn make_instance(lock_timeout: Duration) -> Instance<NullServer, AllowAll> {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let server = Server::new(NullServer, Config::default());
        Instance::new(server, listener, AllowAll, lock_timeout, Arc::new(AtomicBool::new(false))).unwrap()
    }

    #[test]
    fn admit_does_not_claim_lock_on_bare_accept() {
        // a connection that is merely accepted (no bytes read yet) must not seize
        // the lock, so a bare connect/disconnect can't lock out the real peer.
        let instance = make_instance(Duration::from_secs(5));
        let peer = IpAddr::V4(std::net::Ipv4Addr::new(10, 0, 0, 1));
        assert!(instance.admit(peer));
        assert_eq!(instance.lock.borrow().locked_ip(), None);
    }

    #[test]
    fn admit_rejects_other_peer_while_locked() {
        let instance = make_instance(Duration::from_secs(5));
        let peer_a = IpAddr::V4(std::net::Ipv4Addr::new(10, 0, 0, 1));
        let peer_b = IpAddr::V4(std::net::Ipv4Addr::new(10, 0, 0, 2));
        // simulates peer_a's session having already read its first command and
        // claimed the lock, as run_session would.
        instance.lock.borrow_mut().claim(peer_a, Instant::now());
        assert!(!instance.admit(peer_b));
    }

    #[test]
    fn disabled_stickiness_never_locks() {
        let instance = make_instance(Duration::ZERO);
        let peer_a = IpAddr::V4(std::net::Ipv4Addr::new(10, 0, 0, 1));
        let peer_b = IpAddr::V4(std::net::Ipv4Addr::new(10, 0, 0, 2));
        instance.lock.borrow_mut().claim(peer_a, Instant::now());
        assert!(instance.admit(peer_a));
        assert!(instance.admit(peer_b));
    }

    #[test]
    fn run_session_claims_lock_only_after_first_message_is_read() {
        let instance = make_instance(Duration::from_secs(5));
        let peer = IpAddr::V4(std::net::Ipv4Addr::new(10, 0, 0, 1));

        let accept_listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = accept_listener.local_addr().unwrap();
        let client = std::thread::spawn(move || {
            let mut stream = std::net::TcpStream::connect(addr).unwrap();
            use std::io::{Read, Write};
            // bare connect, no bytes yet: the lock must still be unclaimed.
            std::thread::sleep(Duration::from_millis(50));
            stream.write_all(b"getinfo:").unwrap();
            let mut buf = [0u8; 12];
            stream.read_exact(&mut buf).unwrap();
        });
        let (server_side, _) = accept_listener.accept().unwrap();

        assert_eq!(instance.lock.borrow().locked_ip(), None);
        instance.run_session(server_side, peer).unwrap_err();
        assert_eq!(instance.lock.borrow().locked_ip(), Some(peer));
        client.join().unwrap();
    }
}
