//! A pure-software stand-in for an FT2232H, used by unit tests and by `xvc-tests`
//! (via the `simulated` feature) to exercise the planner/engine without hardware.
//!
//! [`LoopbackChip`] interprets the same MPSSE opcode stream a real chip would see:
//! TMS-clock commands advance an internal notion of "what TDI was held," bit- and
//! byte-mode clock commands loop TDI straight back as TDO. `rx_cap` models the
//! chip's finite response FIFO, so a planner that ignores `chip_rx_cap` and tries
//! to queue more outstanding reads than the simulated chip can hold will see an
//! error here exactly as it would see a stalled endpoint on real hardware
//! (Testable Property 5: chunking is chosen for performance, not correctness).

use std::collections::VecDeque;
use std::time::Duration;

use crate::error::TransportError;
use crate::opcodes::{
    CLOCK_BITS_OUT_READ, CLOCK_BYTES_OUT_READ, CLOCK_TMS_OUT_READ, DISABLE_CLOCK_DIVIDE_BY_5,
    DISABLE_LOOPBACK, ENABLE_CLOCK_DIVIDE_BY_5, ENABLE_LOOPBACK, SEND_IMMEDIATE, SET_GPIO_LOWER,
    SET_GPIO_UPPER, SET_TCK_DIVISOR,
};
use crate::transport::FtdiTransport;

/// Default simulated FIFO depth, chosen well below a real FT2232H's 4 KiB receive
/// buffer so tests can exercise chunking without huge vectors.
pub const DEFAULT_RX_CAP: usize = 512;

pub struct LoopbackChip {
    rx: VecDeque<u8>,
    rx_cap: usize,
    opened: bool,
    bitmode_mpsse: bool,
    divisor: u16,
    loopback: bool,
}

impl LoopbackChip {
    pub fn new() -> Self {
        LoopbackChip::with_rx_cap(DEFAULT_RX_CAP)
    }

    pub fn with_rx_cap(rx_cap: usize) -> Self {
        LoopbackChip {
            rx: VecDeque::new(),
            rx_cap,
            opened: true,
            bitmode_mpsse: false,
            divisor: 0,
            loopback: false,
        }
    }

    pub fn divisor(&self) -> u16 {
        self.divisor
    }

    pub fn is_loopback_enabled(&self) -> bool {
        self.loopback
    }
}

impl Default for LoopbackChip {
    fn default() -> Self {
        Self::new()
    }
}

impl FtdiTransport for LoopbackChip {
    fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let mut i = 0;
        while i < bytes.len() {
            let op = bytes[i];
            let consumed = match op {
                CLOCK_TMS_OUT_READ => {
                    let data = *bytes.get(i + 2).ok_or_else(truncated)?;
                    let tdi_hold = (data >> 7) & 1;
                    self.push_rx(tdi_hold << 7)?;
                    3
                }
                CLOCK_BITS_OUT_READ => {
                    let n = *bytes.get(i + 1).ok_or_else(truncated)? as usize + 1;
                    let data = *bytes.get(i + 2).ok_or_else(truncated)?;
                    self.push_rx(data << (8 - n))?;
                    3
                }
                CLOCK_BYTES_OUT_READ => {
                    let lo = *bytes.get(i + 1).ok_or_else(truncated)? as usize;
                    let hi = *bytes.get(i + 2).ok_or_else(truncated)? as usize;
                    let nbytes = (lo | (hi << 8)) + 1;
                    let data = bytes.get(i + 3..i + 3 + nbytes).ok_or_else(truncated)?;
                    for &b in data {
                        self.push_rx(b)?;
                    }
                    3 + nbytes
                }
                SET_TCK_DIVISOR => {
                    let lo = *bytes.get(i + 1).ok_or_else(truncated)? as u16;
                    let hi = *bytes.get(i + 2).ok_or_else(truncated)? as u16;
                    self.divisor = lo | (hi << 8);
                    3
                }
                DISABLE_CLOCK_DIVIDE_BY_5 | ENABLE_CLOCK_DIVIDE_BY_5 => 1,
                SET_GPIO_LOWER | SET_GPIO_UPPER => 3,
                ENABLE_LOOPBACK => {
                    self.loopback = true;
                    1
                }
                DISABLE_LOOPBACK => {
                    self.loopback = false;
                    1
                }
                SEND_IMMEDIATE => 1,
                other => return Err(TransportError::Device(format!("unsupported opcode {other:#04x}"))),
            };
            i += consumed;
        }
        Ok(())
    }

    fn rx_available(&mut self) -> Result<usize, TransportError> {
        Ok(self.rx.len())
    }

    fn read(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<usize, TransportError> {
        let n = buf.len().min(self.rx.len());
        for slot in buf.iter_mut().take(n) {
            *slot = self.rx.pop_front().expect("checked len above");
        }
        Ok(n)
    }

    fn reset(&mut self) -> Result<(), TransportError> {
        self.rx.clear();
        self.bitmode_mpsse = false;
        Ok(())
    }

    fn purge(&mut self) -> Result<(), TransportError> {
        self.rx.clear();
        Ok(())
    }

    fn set_usb_transfer_size(&mut self, _size: u32) -> Result<(), TransportError> {
        Ok(())
    }

    fn set_timeouts(&mut self, _read: Duration, _write: Duration) -> Result<(), TransportError> {
        Ok(())
    }

    fn set_bitmode_mpsse(&mut self) -> Result<(), TransportError> {
        self.bitmode_mpsse = true;
        Ok(())
    }

    fn set_bitmode_reset(&mut self) -> Result<(), TransportError> {
        self.bitmode_mpsse = false;
        Ok(())
    }
}

impl LoopbackChip {
    fn push_rx(&mut self, byte: u8) -> Result<(), TransportError> {
        if self.rx.len() >= self.rx_cap {
            return Err(TransportError::Device(format!(
                "simulated chip RX FIFO overflow (cap={})",
                self.rx_cap
            )));
        }
        self.rx.push_back(byte);
        Ok(())
    }
}

fn truncated() -> TransportError {
    TransportError::Device("truncated MPSSE command stream".to_string())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fresh_chip_is_opened_with_no_pending_rx() {
        let mut chip = LoopbackChip::new();
        assert!(chip.opened);
        assert_eq!(chip.rx_available().unwrap(), 0);
    }

    #[test]
    fn set_tck_divisor_is_recorded() {
        let mut chip = LoopbackChip::new();
        chip.write(&[SET_TCK_DIVISOR, 0x34, 0x12, DISABLE_CLOCK_DIVIDE_BY_5]).unwrap();
        assert_eq!(chip.divisor(), 0x1234);
    }

    #[test]
    fn overflowing_rx_cap_is_an_error() {
        let mut chip = LoopbackChip::with_rx_cap(2);
        chip.write(&[CLOCK_BYTES_OUT_READ, 2, 0, 0xAA, 0xBB, 0xCC]).unwrap_err();
    }

    #[test]
    fn byte_mode_loops_back_verbatim() {
        let mut chip = LoopbackChip::new();
        chip.write(&[CLOCK_BYTES_OUT_READ, 1, 0, 0x11, 0x22]).unwrap();
        let mut buf = [0u8; 2];
        chip.read(&mut buf, Duration::from_millis(10)).unwrap();
        assert_eq!(buf, [0x11, 0x22]);
    }
}
