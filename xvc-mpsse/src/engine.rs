//! The JTAG Engine: wires the Scan Planner up to the [`xvc_server::XvcServer`]
//! trait, owning the TAP state, `last_tdi`, and the quirk filter that guards
//! against a Vivado hs2 client issuing a TMS-only "probe" shift before its first
//! real DR/IR scan (§4.6).
//!
//! `XvcServer`'s methods take `&self`; the mutable state here is ordinary Rust data,
//! so it lives behind a [`RefCell`] rather than a raw pointer — the server only ever
//! drives one connection at a time (§5 "single-threaded event loop"), so a `Mutex`
//! would add nothing but overhead.

use std::cell::RefCell;

use xvc_server::XvcServer;

use crate::planner::{self, PlannerLimits};
use crate::tap::TapState;
use crate::transport::{self, FtdiTransport};

struct Inner<T: FtdiTransport> {
    transport: T,
    state: TapState,
    last_tdi: u8,
    seen_tlr: bool,
}

/// Backs an XVC server with a real (or simulated) FT2232H over MPSSE.
pub struct JtagEngine<T: FtdiTransport> {
    inner: RefCell<Inner<T>>,
    limits: PlannerLimits,
    /// When set, the instance has a configured static frequency (§4.6): every
    /// client `settck:` is answered with this realized period without touching
    /// the hardware or looking at the client's requested period.
    static_period_ns: Option<u32>,
}

impl<T: FtdiTransport> JtagEngine<T> {
    /// Wraps an already-`configure_mpsse`'d transport. `limits.chip_rx_cap` should
    /// be derived from the instance's configured vector cap.
    pub fn new(transport: T, limits: PlannerLimits) -> Self {
        JtagEngine {
            inner: RefCell::new(Inner {
                transport,
                state: TapState::default(),
                last_tdi: 0,
                seen_tlr: false,
            }),
            limits,
            static_period_ns: None,
        }
    }

    /// Locks the instance to `realized_period_ns` (the value already realized on
    /// the hardware, typically the return of an earlier [`Self::set_tck`] call):
    /// subsequent `settck:` requests from clients are ignored and this period is
    /// reported back unconditionally.
    pub fn with_static_frequency(mut self, realized_period_ns: u32) -> Self {
        self.static_period_ns = Some(realized_period_ns);
        self
    }
}

impl<T: FtdiTransport> XvcServer for JtagEngine<T> {
    fn set_tck(&self, period_ns: u32) -> u32 {
        if let Some(static_ns) = self.static_period_ns {
            log::debug!("settck: ignored, instance has a static frequency ({static_ns} ns)");
            return static_ns;
        }
        let hz = if period_ns == 0 { u32::MAX } else { 1_000_000_000 / period_ns };
        let mut inner = self.inner.borrow_mut();
        match transport::set_frequency(&mut inner.transport, hz) {
            Ok(realized_hz) => {
                let realized_ns = if realized_hz == 0 { period_ns } else { 1_000_000_000 / realized_hz };
                realized_ns
            }
            Err(e) => {
                log::error!("set_tck failed: {e}");
                period_ns
            }
        }
    }

    fn shift(&self, num_bits: u32, tms: Box<[u8]>, tdi: Box<[u8]>) -> Box<[u8]> {
        let nbits = num_bits as usize;
        let nbytes = nbits.div_ceil(8);
        if tms.len() != nbytes || tdi.len() != nbytes {
            log::error!(
                "shift buffer size mismatch: num_bits={num_bits} expected {nbytes} bytes, got tms={} tdi={}",
                tms.len(),
                tdi.len()
            );
            return Box::default();
        }

        let mut inner = self.inner.borrow_mut();
        let mut tdo = vec![0u8; nbytes];

        if inner.state == TapState::TestLogicReset {
            inner.seen_tlr = true;
        } else if inner.state.is_capture() {
            inner.seen_tlr = false;
        }

        // Known client quirk (§4.6): a bogus TMS movement Vivado's hs2 driver
        // occasionally emits out of Exit1-IR/Exit1-DR. Skip the scan entirely;
        // TAP state and TDO are left untouched.
        let quirk = (inner.state == TapState::Exit1Ir && nbits == 5 && tms[0] == 0x17)
            || (inner.state == TapState::Exit1Dr && nbits == 4 && tms[0] == 0x0b);
        if quirk {
            log::debug!("quirk filter skipped shift: state={:?} nbits={nbits}", inner.state);
            return tdo.into_boxed_slice();
        }

        let result = planner::plan_and_run(
            &mut inner.transport,
            self.limits,
            &mut inner.state,
            &mut inner.last_tdi,
            nbits,
            &tms,
            &tdi,
            &mut tdo,
        );
        match result {
            Ok(()) => tdo.into_boxed_slice(),
            Err(e) => {
                log::error!("shift failed: {e}");
                Box::default()
            }
        }
    }
}
