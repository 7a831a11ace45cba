//! End-to-end wire tests: a real TCP loopback between `xvc_client::XvcClient` and
//! an `Instance<JtagEngine<LoopbackChip>, AllowAll>`, covering the wire scenarios
//! and session-level testable properties that only make sense across a socket
//! (bit-level planner properties live in `xvc-mpsse`'s own unit tests).

use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use xvc_client::XvcClient;
use xvc_mpsse::planner::PlannerLimits;
use xvc_mpsse::sim::LoopbackChip;
use xvc_mpsse::JtagEngine;
use xvc_server::instance::Instance;
use xvc_server::ip_filter::AllowAll;
use xvc_server::server::{Config, Server};

struct Harness {
    addr: std::net::SocketAddr,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Harness {
    /// `rx_cap` bounds both the simulated chip's USB RX FIFO and the planner's
    /// `chip_rx_cap`; the protocol-level `max_vector_size` advertised to clients is
    /// independent of that and kept generous so large shifts aren't rejected before
    /// they ever reach the planner's own chunking.
    fn start(lock_timeout: Duration, rx_cap: usize) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let chip = LoopbackChip::with_rx_cap(rx_cap);
        let engine = JtagEngine::new(chip, PlannerLimits { chip_rx_cap: rx_cap });
        let config = Config {
            max_vector_size: 1024 * 1024,
            read_write_timeout: Duration::from_secs(5),
        };
        let server = Server::new(engine, config);
        let shutdown = Arc::new(AtomicBool::new(false));
        let instance = Instance::new(server, listener, AllowAll, lock_timeout, Arc::clone(&shutdown)).unwrap();
        let handle = std::thread::spawn(move || {
            instance.run().expect("instance loop");
        });
        Harness {
            addr,
            shutdown,
            handle: Some(handle),
        }
    }

    fn connect(&self) -> XvcClient {
        XvcClient::new(self.addr).expect("connect")
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// S1: `getinfo:` returns the negotiated version and vector cap.
#[test]
fn s1_getinfo_reports_version_and_cap() {
    let harness = Harness::start(Duration::ZERO, 4096);
    let mut client = harness.connect();
    let info = client.get_info().unwrap();
    assert_eq!(info.version().major(), 1);
    assert_eq!(info.version().minor(), 0);
    assert_eq!(info.max_vector_len(), 1024 * 1024);
}

/// S2: `settck` round-trips through the simulated chip's divisor math.
#[test]
fn s2_settck_returns_realized_period() {
    let harness = Harness::start(Duration::ZERO, 4096);
    let mut client = harness.connect();
    let realized = client.set_tck(1_000_000).unwrap();
    assert!(realized > 0);
}

/// S3: a single-bit shift in Shift-DR advances the TAP and returns one byte.
#[test]
fn s3_one_bit_shift_returns_one_byte() {
    let harness = Harness::start(Duration::ZERO, 4096);
    let mut client = harness.connect();
    // test-logic-reset -> run-test-idle -> select-dr -> capture-dr -> shift-dr
    // (tms bits, first sent first: 0,1,0,0).
    client.shift(4, &[0x02], &[0x00]).unwrap();
    let tdo = client.shift(1, &[0b1], &[0b1]).unwrap();
    assert_eq!(tdo.len(), 1);
}

/// S4: a byte-aligned 8-bit shift inside Shift-DR loops TDI back as TDO.
#[test]
fn s4_byte_aligned_shift_loops_back() {
    let harness = Harness::start(Duration::ZERO, 4096);
    let mut client = harness.connect();
    client.shift(4, &[0x02], &[0x00]).unwrap();
    let tdo = client.shift(8, &[0x00], &[0xA5]).unwrap();
    assert_eq!(tdo[0], 0xA5);
}

/// S5: a large shift exceeding the simulated chip's RX FIFO still completes,
/// because the planner chunks to `chip_rx_cap` (Testable Property 5).
#[test]
fn s5_large_shift_completes_despite_small_chip_fifo() {
    let harness = Harness::start(Duration::ZERO, 32);
    let mut client = harness.connect();
    client.shift(4, &[0x02], &[0x00]).unwrap();
    let nbits = 2048u32;
    let nbytes = (nbits / 8) as usize;
    let tdi: Vec<u8> = (0..nbytes).map(|i| (i as u8).wrapping_mul(7)).collect();
    let tms = vec![0u8; nbytes];
    let tdo = client.shift(nbits, &tms, &tdi).unwrap();
    assert_eq!(&tdo[..], &tdi[..]);
}

/// S6 / Property 9: the Exit1-IR quirk pattern is swallowed without advancing the
/// TAP or touching the chip.
#[test]
fn s6_quirk_filter_swallows_bogus_exit1_ir_movement() {
    let harness = Harness::start(Duration::ZERO, 4096);
    let mut client = harness.connect();
    // test-logic-reset -> run-test-idle -> select-dr -> select-ir -> capture-ir
    // -> shift-ir (tms bits, first sent first: 0,1,1,0,0).
    client.shift(5, &[0x06], &[0x00]).unwrap();
    // one more bit to reach Exit1-IR: TMS=1
    client.shift(1, &[0b1], &[0b0]).unwrap();
    // the known-bad 5-bit, tms[0]=0x17 pattern: must be swallowed (all-zero TDO).
    let tdo = client.shift(5, &[0x17], &[0xFF]).unwrap();
    assert_eq!(tdo[0], 0);
}

/// Property 2: TDO is exactly `ceil(nbits/8)` bytes long, with any excess bits in
/// the final byte left zero.
#[test]
fn property_2_tdo_length_and_zero_padding() {
    let harness = Harness::start(Duration::ZERO, 4096);
    let mut client = harness.connect();
    client.shift(4, &[0x02], &[0x00]).unwrap();
    let tdo = client.shift(5, &[0x00], &[0xFF]).unwrap();
    assert_eq!(tdo.len(), 1);
    assert_eq!(tdo[0] & 0b1110_0000, 0, "bits beyond nbits must stay zero");
}

/// Property 7: a second connection while a session is active is rejected, and
/// the rejection surfaces without the active session itself ever stalling.
/// `reject_concurrent` is polled once per command rather than during a blocking
/// read, so the first session is kept busy issuing commands in the background
/// to give the poll somewhere to fire.
#[test]
fn property_7_simultaneous_connection_is_rejected() {
    let harness = Harness::start(Duration::ZERO, 4096);
    let mut client = harness.connect();
    client.get_info().unwrap();

    let churn_done = Arc::new(AtomicBool::new(false));
    let churn_done_writer = Arc::clone(&churn_done);
    let churner = std::thread::spawn(move || {
        while !churn_done_writer.load(Ordering::Relaxed) {
            if client.get_info().is_err() {
                break;
            }
        }
    });

    use std::io::Read;
    let mut second = TcpStream::connect(harness.addr).unwrap();
    second.set_read_timeout(Some(Duration::from_millis(2000))).unwrap();
    let mut buf = [0u8; 1];
    let result = second.read(&mut buf);

    churn_done.store(true, Ordering::Relaxed);
    churner.join().unwrap();

    match result {
        Ok(0) => {} // connection closed without a response, as expected
        Ok(_) => panic!("second connection should not have received a response"),
        Err(e) => assert_ne!(e.kind(), std::io::ErrorKind::WouldBlock, "must not hang: {e}"),
    }
}

/// Property 8: with stickiness enabled, the same peer may reconnect within the
/// lock window; a different peer is rejected while the lock is live. This only
/// exercises the same-peer path end-to-end (loopback gives every client the same
/// IP); the cross-peer rejection is covered directly against `SessionLock` in
/// `xvc-server`'s own unit tests.
#[test]
fn property_8_same_peer_reconnects_within_lock_window() {
    let harness = Harness::start(Duration::from_secs(2), 4096);
    {
        let mut client = harness.connect();
        client.get_info().unwrap();
    }
    std::thread::sleep(Duration::from_millis(100));
    let mut client = harness.connect();
    client.get_info().expect("same-peer reconnect within the lock window must succeed");
}
