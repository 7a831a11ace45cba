//! The IP-sticky session lock (§4.7): lets the same debugger host reconnect within
//! a configured window without losing its place to a different peer.

use std::net::IpAddr;
use std::time::{Duration, Instant};

/// Tracks which peer, if any, currently "owns" the adapter and until when a
/// reconnect from that same peer is still honored.
#[derive(Debug, Default)]
pub struct SessionLock {
    locked_ip: Option<IpAddr>,
    lock_until: Option<Instant>,
    timeout: Duration,
}

impl SessionLock {
    /// `timeout == Duration::ZERO` disables stickiness entirely (rule 5 never
    /// fires, so no lock is ever set).
    pub fn new(timeout: Duration) -> Self {
        SessionLock {
            locked_ip: None,
            lock_until: None,
            timeout,
        }
    }

    /// Rule 3/4: whether `peer` may open a new session right now.
    pub fn accepts(&self, peer: IpAddr, now: Instant) -> bool {
        match (self.lock_until, self.locked_ip) {
            (Some(until), Some(locked)) if until > now => peer == locked,
            _ => true,
        }
    }

    /// Rule 5: called on the first byte of a new session, when no lock is
    /// currently held and stickiness is enabled.
    pub fn claim(&mut self, peer: IpAddr, now: Instant) {
        if self.timeout.is_zero() {
            return;
        }
        if self.lock_until.is_none_or(|until| until <= now) {
            self.locked_ip = Some(peer);
            self.lock_until = Some(now + self.timeout);
        }
    }

    /// Rule 6: called when a session ends; refreshes the lock window so the same
    /// peer may reconnect within `timeout` seconds.
    pub fn release(&mut self, now: Instant) {
        if self.timeout.is_zero() {
            return;
        }
        if self.locked_ip.is_some() {
            self.lock_until = Some(now + self.timeout);
        }
    }

    /// Drops an expired lock so `locked_ip`/`lock_until` don't linger forever in
    /// diagnostics; purely cosmetic, `accepts`/`claim` are correct without it.
    pub fn expire(&mut self, now: Instant) {
        if let Some(until) = self.lock_until {
            if until <= now {
                self.locked_ip = None;
                self.lock_until = None;
            }
        }
    }

    pub fn locked_ip(&self) -> Option<IpAddr> {
        self.locked_ip
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn ip(n: u8) -> IpAddr {
        IpAddr::V4(std::net::Ipv4Addr::new(127, 0, 0, n))
    }

    #[test]
    fn disabled_lock_always_accepts() {
        let lock = SessionLock::new(Duration::ZERO);
        assert!(lock.accepts(ip(1), Instant::now()));
        assert!(lock.accepts(ip(2), Instant::now()));
    }

    #[test]
    fn claim_then_different_peer_rejected_within_window() {
        let mut lock = SessionLock::new(Duration::from_secs(10));
        let t0 = Instant::now();
        lock.claim(ip(1), t0);
        assert!(lock.accepts(ip(1), t0));
        assert!(!lock.accepts(ip(2), t0));
    }

    #[test]
    fn release_refreshes_window_for_same_peer() {
        let mut lock = SessionLock::new(Duration::from_secs(10));
        let t0 = Instant::now();
        lock.claim(ip(1), t0);
        lock.release(t0);
        assert!(lock.accepts(ip(1), t0 + Duration::from_secs(5)));
        assert!(!lock.accepts(ip(2), t0 + Duration::from_secs(5)));
    }

    #[test]
    fn lock_expires_after_window() {
        let mut lock = SessionLock::new(Duration::from_secs(10));
        let t0 = Instant::now();
        lock.claim(ip(1), t0);
        lock.release(t0);
        let later = t0 + Duration::from_secs(11);
        assert!(lock.accepts(ip(2), later));
        lock.expire(later);
        assert!(lock.locked_ip().is_none());
    }

    #[test]
    fn claim_does_not_steal_an_active_lock_from_another_peer() {
        let mut lock = SessionLock::new(Duration::from_secs(10));
        let t0 = Instant::now();
        lock.claim(ip(1), t0);
        // a second session somehow reaches claim() while peer 1's lock is still
        // live (shouldn't happen given rule 2, but claim() must stay inert).
        lock.claim(ip(2), t0);
        assert_eq!(lock.locked_ip(), Some(ip(1)));
    }
}
