//! The MPSSE Command Builder (§4.2): batches MPSSE opcodes into a single TX buffer,
//! flushes them to the transport, and scatters the chip's response bytes back into
//! caller-owned destination buffers via a FIFO queue of read observers.
//!
//! Grounded on the batching style of `MpsseCmdBuilder` in the `fan2nd-ftdi-tools`
//! example (`other_examples/a131ff56_...mpsse_cmd.rs.rs`): accumulate raw opcode
//! bytes into one `Vec<u8>`, flush as one `write`, but generalized here with an
//! observer queue so a single flush can satisfy many independently-sized reads
//! (the planner interleaves non-shift TMS runs with chunked shift runs, each
//! producing its own piece of the eventual TDO buffer).

use std::time::Duration;

use crate::bits;
use crate::error::TransportError;
use crate::transport::FtdiTransport;

/// TX is flushed early once it holds this many bytes, independent of RX pressure,
/// so a long run of non-shift commands can't grow the buffer unboundedly (§4.2).
pub const EARLY_FLUSH_THRESHOLD: usize = 60 * 1024;

/// How many bytes of outstanding RX are tolerated before a flush is forced. Chosen
/// as `1/3` of [`EARLY_FLUSH_THRESHOLD`] so TX capacity (roughly 3 TX bytes per 1
/// RX byte for the bit/byte clock opcodes) and RX capacity hit their early-flush
/// points together (§4.2 "the TX/RX ratio").
pub const RX_EARLY_FLUSH_THRESHOLD: usize = EARLY_FLUSH_THRESHOLD / 3;

/// A pending scatter of chip-response bytes into a caller-owned buffer, registered
/// against a byte range of the *next* flush's RX data.
enum Observer {
    /// One TMS-clock-out-read or bit-mode-clock-read response byte; `n <= 8` bits
    /// of it are meaningful and MSB-justified (§4.2, §3 "Bit Scatter/Gather").
    BitCopier { dst_off: usize, n: usize, from_tms: bool },
    /// A single whole response byte copied into a byte-aligned destination slot.
    ByteCopier { dst_byte_off: usize },
    /// A contiguous run of whole response bytes copied in one shot; used for the
    /// inner-byte portion of a long Shift run, where many bytes of one logical
    /// transfer share a single destination window (§4.5 "inner whole bytes").
    BulkByteCopier { dst_byte_off: usize, nbytes: usize },
}

/// Accumulates MPSSE opcode bytes and the read observers that will consume their
/// responses, until [`CommandBuilder::flush`] sends everything and scatters the
/// results.
pub struct CommandBuilder {
    tx: Vec<u8>,
    /// Total RX bytes the currently-queued commands will produce.
    rx_pending: usize,
    observers: Vec<Observer>,
}

impl CommandBuilder {
    pub fn new() -> Self {
        CommandBuilder {
            tx: Vec::with_capacity(EARLY_FLUSH_THRESHOLD / 4),
            rx_pending: 0,
            observers: Vec::new(),
        }
    }

    pub fn tx_len(&self) -> usize {
        self.tx.len()
    }

    pub fn rx_pending(&self) -> usize {
        self.rx_pending
    }

    /// True once either buffer has grown past its early-flush threshold (§4.2).
    pub fn should_flush(&self) -> bool {
        self.tx.len() >= EARLY_FLUSH_THRESHOLD || self.rx_pending >= RX_EARLY_FLUSH_THRESHOLD
    }

    /// Appends opcode bytes that produce no chip response.
    pub fn append(&mut self, cmd: &[u8]) {
        self.tx.extend_from_slice(cmd);
    }

    /// Appends a TMS-clock-out-with-read opcode and registers its response.
    pub fn append_tms_read(&mut self, cmd: &[u8], dst_off: usize, n: usize) {
        self.tx.extend_from_slice(cmd);
        self.rx_pending += 1;
        self.observers.push(Observer::BitCopier {
            dst_off,
            n,
            from_tms: true,
        });
    }

    /// Appends a bit-mode data-clock-with-read opcode (`n < 8` bits) and registers
    /// its response.
    pub fn append_bit_read(&mut self, cmd: &[u8], dst_off: usize, n: usize) {
        self.tx.extend_from_slice(cmd);
        self.rx_pending += 1;
        self.observers.push(Observer::BitCopier {
            dst_off,
            n,
            from_tms: false,
        });
    }

    /// Appends a byte-mode data-clock-with-read opcode covering `nbytes` whole
    /// bytes and registers the bulk scatter of its response.
    pub fn append_bytes_read(&mut self, cmd: &[u8], dst_byte_off: usize, nbytes: usize) {
        self.tx.extend_from_slice(cmd);
        self.rx_pending += nbytes;
        if nbytes == 1 {
            self.observers.push(Observer::ByteCopier { dst_byte_off });
        } else {
            self.observers.push(Observer::BulkByteCopier { dst_byte_off, nbytes });
        }
    }

    /// Sends the queued TX bytes, reads back exactly `rx_pending` bytes, scatters
    /// them into `dst` via the FIFO observer queue, and clears the builder for
    /// reuse.
    ///
    /// A builder with an empty TX buffer is a no-op: flushing a half-built command
    /// stream with zero RX reservation must never block on a read (§4.2).
    pub fn flush(
        &mut self,
        transport: &mut dyn FtdiTransport,
        dst: &mut [u8],
    ) -> Result<(), TransportError> {
        if self.tx.is_empty() {
            debug_assert!(self.observers.is_empty());
            return Ok(());
        }
        transport.write(&self.tx)?;
        if self.rx_pending > 0 {
            let mut rx = vec![0u8; self.rx_pending];
            transport.read_exact_spinning(&mut rx)?;
            let mut cursor = 0;
            for obs in &self.observers {
                match *obs {
                    Observer::BitCopier { dst_off, n, from_tms } => {
                        let byte = rx[cursor];
                        cursor += 1;
                        if from_tms {
                            bits::bit_copy_from_tms_response(dst, dst_off, byte, n);
                        } else {
                            bits::bit_copy_from_byte_mode_response(dst, dst_off, byte, n);
                        }
                    }
                    Observer::ByteCopier { dst_byte_off } => {
                        bits::byte_copy(dst, dst_byte_off * 8, &rx[cursor..cursor + 1], 1);
                        cursor += 1;
                    }
                    Observer::BulkByteCopier { dst_byte_off, nbytes } => {
                        bits::byte_copy(dst, dst_byte_off * 8, &rx[cursor..cursor + nbytes], nbytes);
                        cursor += nbytes;
                    }
                }
            }
            debug_assert_eq!(cursor, self.rx_pending);
        }
        self.tx.clear();
        self.rx_pending = 0;
        self.observers.clear();
        Ok(())
    }
}

impl Default for CommandBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Drains any bytes the chip has ready without blocking, for use after a
/// `send-immediate` when the caller just wants to empty the FIFO (not currently
/// exercised by the planner but kept for symmetry with `configure_mpsse`'s own
/// drain; exercised directly in tests).
#[allow(dead_code)]
fn drain_available(transport: &mut dyn FtdiTransport) -> Result<usize, TransportError> {
    let available = transport.rx_available()?;
    if available == 0 {
        return Ok(0);
    }
    let mut scratch = vec![0u8; available];
    transport.read(&mut scratch, Duration::from_millis(50))
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::VecDeque;

    /// A transport double that services writes/reads from fixed in-memory queues,
    /// for exercising the builder without real hardware.
    struct FakeTransport {
        written: Vec<u8>,
        rx: VecDeque<u8>,
    }

    impl FakeTransport {
        fn new(rx_bytes: &[u8]) -> Self {
            FakeTransport {
                written: Vec::new(),
                rx: rx_bytes.iter().copied().collect(),
            }
        }
    }

    impl FtdiTransport for FakeTransport {
        fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
            self.written.extend_from_slice(bytes);
            Ok(())
        }
        fn rx_available(&mut self) -> Result<usize, TransportError> {
            Ok(self.rx.len())
        }
        fn read(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<usize, TransportError> {
            let n = buf.len().min(self.rx.len());
            for slot in buf.iter_mut().take(n) {
                *slot = self.rx.pop_front().unwrap();
            }
            Ok(n)
        }
        fn reset(&mut self) -> Result<(), TransportError> {
            Ok(())
        }
        fn purge(&mut self) -> Result<(), TransportError> {
            Ok(())
        }
        fn set_usb_transfer_size(&mut self, _size: u32) -> Result<(), TransportError> {
            Ok(())
        }
        fn set_timeouts(&mut self, _read: Duration, _write: Duration) -> Result<(), TransportError> {
            Ok(())
        }
        fn set_bitmode_mpsse(&mut self) -> Result<(), TransportError> {
            Ok(())
        }
        fn set_bitmode_reset(&mut self) -> Result<(), TransportError> {
            Ok(())
        }
    }

    #[test]
    fn flush_with_no_commands_does_not_touch_transport() {
        let mut builder = CommandBuilder::new();
        let mut transport = FakeTransport::new(&[]);
        let mut dst = [0u8; 4];
        builder.flush(&mut transport, &mut dst).unwrap();
        assert!(transport.written.is_empty());
    }

    #[test]
    fn bulk_byte_copier_scatters_contiguous_run() {
        let mut builder = CommandBuilder::new();
        builder.append_bytes_read(&[0x39, 2, 0], 0, 3);
        let mut transport = FakeTransport::new(&[0xAA, 0xBB, 0xCC]);
        let mut dst = [0u8; 4];
        builder.flush(&mut transport, &mut dst).unwrap();
        assert_eq!(&dst[0..3], &[0xAA, 0xBB, 0xCC]);
    }

    /// Property 6: observers fire in FIFO order regardless of kind, so interleaved
    /// TMS-read and data-read commands land in the right destination slots.
    #[test]
    fn observers_fire_in_fifo_order() {
        let mut builder = CommandBuilder::new();
        // one TMS-read bit, then a 2-byte bulk run, then another TMS-read bit.
        builder.append_tms_read(&[0x6B, 0, 0x80], 0, 1);
        builder.append_bytes_read(&[0x39, 1, 0], 1, 2);
        builder.append_tms_read(&[0x6B, 0, 0x80], 3, 1);
        let mut transport = FakeTransport::new(&[0b1000_0000, 0x11, 0x22, 0b1000_0000]);
        let mut dst = [0u8; 4];
        builder.flush(&mut transport, &mut dst).unwrap();
        assert_eq!(bits::get_bit(&dst, 0), 1);
        assert_eq!(dst[1], 0x11);
        assert_eq!(dst[2], 0x22);
        assert_eq!(bits::get_bit(&dst, 3), 1);
    }

    #[test]
    fn flush_clears_state_for_reuse() {
        let mut builder = CommandBuilder::new();
        builder.append_bytes_read(&[0x39, 0, 0], 0, 1);
        let mut transport = FakeTransport::new(&[0x42]);
        let mut dst = [0u8; 1];
        builder.flush(&mut transport, &mut dst).unwrap();
        assert_eq!(builder.tx_len(), 0);
        assert_eq!(builder.rx_pending(), 0);
        // a second flush with nothing queued must still be a no-op.
        builder.flush(&mut transport, &mut dst).unwrap();
        assert_eq!(dst[0], 0x42);
    }

    #[test]
    fn should_flush_trips_on_tx_threshold() {
        let mut builder = CommandBuilder::new();
        assert!(!builder.should_flush());
        builder.append(&vec![0u8; EARLY_FLUSH_THRESHOLD]);
        assert!(builder.should_flush());
    }
}
