//! The Scan Planner (§4.5): turns one XVC `shift` request — `nbits`, a TMS buffer
//! and a TDI buffer — into a sequence of MPSSE opcodes queued on a
//! [`CommandBuilder`], tracking TAP state and `last_tdi` as it goes.
//!
//! The request is split into a run of consecutive bits that share one disposition:
//! a *non-shift run* (the TAP is not in Shift-DR/Shift-IR, so only TMS needs to be
//! clocked out) or a *shift run* (the TAP is in a shift state, so both TMS and TDI
//! matter and the chip's TDO response has to be captured). Shift runs are further
//! split into a leading partial byte, whole inner bytes, a trailing partial byte,
//! and a final single bit that must carry the correct TMS value to (possibly) leave
//! the shift state — mirroring the `CaptureIR`/`CaptureDR`-adjacent bit handling in
//! `other_examples/1ac40a06_fan2nd-ftdi-tools__src-jtag-hw_jtag.rs.rs`'s
//! `JtagCmdBuilder`, generalized from its fixed IR/DR shapes to the arbitrary-length
//! runs an XVC `shift` command can ask for.

use crate::bits;
use crate::builder::CommandBuilder;
use crate::error::TransportError;
use crate::opcodes::{CLOCK_BITS_OUT_READ, CLOCK_BYTES_OUT_READ, CLOCK_TMS_OUT, CLOCK_TMS_OUT_READ};
use crate::tap::TapState;
use crate::transport::FtdiTransport;

/// Bounds how many response bytes a single flush may accumulate before the planner
/// forces one, independent of the builder's own early-flush threshold — this is the
/// `chip_rx_cap` from §4.5, configured per-instance (derived from `--vector-cap-bytes`)
/// so a chip with a small USB transfer size never gets asked to buffer more responses
/// than it can return.
#[derive(Debug, Clone, Copy)]
pub struct PlannerLimits {
    pub chip_rx_cap: usize,
}

impl Default for PlannerLimits {
    fn default() -> Self {
        PlannerLimits {
            chip_rx_cap: 16 * 1024,
        }
    }
}

/// Drives one XVC `shift` request to completion, updating `state` and `last_tdi`
/// in place and filling `tdo_out` (already zero-initialized by the caller, same
/// byte length as the TMS/TDI buffers) with the captured response.
///
/// `tms` and `tdi` must each hold at least `nbits.div_ceil(8)` bytes; `tdo_out`
/// must be at least that long too. Bits beyond `nbits` in the last byte of `tdo_out`
/// are left zero (§4.5 "TDO length/zero-padding", Testable Property 2).
pub fn plan_and_run(
    transport: &mut dyn FtdiTransport,
    limits: PlannerLimits,
    state: &mut TapState,
    last_tdi: &mut u8,
    nbits: usize,
    tms: &[u8],
    tdi: &[u8],
    tdo_out: &mut [u8],
) -> Result<(), TransportError> {
    let mut builder = CommandBuilder::new();
    let mut pos = 0usize;
    while pos < nbits {
        if state.is_shift() {
            pos = run_shift(
                transport, &mut builder, limits, state, last_tdi, nbits, tms, tdi, tdo_out, pos,
            )?;
        } else {
            pos = run_non_shift(transport, &mut builder, limits, state, last_tdi, nbits, tms, pos)?;
        }
    }
    builder.flush(transport, tdo_out)?;
    Ok(())
}

/// Consumes bits while the TAP is outside a shift state: only TMS needs clocking,
/// six bits of TMS at a time (one of the opcode's 7 TMS-bit slots is reserved per
/// §4.5's last-bit convention), packed into one `clock-tms-out` opcode per chunk.
/// No TDO is produced outside a shift state, so this uses the no-read opcode
/// (`0x4B`) and reserves no chip RX capacity (§4.5, §6).
fn run_non_shift(
    transport: &mut dyn FtdiTransport,
    builder: &mut CommandBuilder,
    limits: PlannerLimits,
    state: &mut TapState,
    last_tdi: &mut u8,
    nbits: usize,
    tms: &[u8],
    start: usize,
) -> Result<usize, TransportError> {
    let mut pos = start;
    while pos < nbits && !state.is_shift() {
        let chunk = (nbits - pos).min(7);
        let mut tms_bits = 0u8;
        for i in 0..chunk {
            let bit = bits::get_bit(tms, pos + i);
            tms_bits |= bit << i;
            *state = state.step(bit);
            if state.is_shift() {
                // a shift state was entered mid-chunk; stop here so the next
                // iteration of the outer loop switches to run_shift cleanly.
                let cmd = [CLOCK_TMS_OUT, (i as u8), tms_bits | (*last_tdi << 7)];
                builder.append(&cmd);
                pos += i + 1;
                maybe_flush(transport, builder, limits, &mut [])?;
                return Ok(pos);
            }
        }
        let cmd = [CLOCK_TMS_OUT, (chunk as u8 - 1), tms_bits | (*last_tdi << 7)];
        builder.append(&cmd);
        pos += chunk;
        maybe_flush(transport, builder, limits, &mut [])?;
    }
    Ok(pos)
}

/// Consumes bits while the TAP is in a shift state: emits a leading partial byte
/// (if the run doesn't start byte-aligned), whole inner bytes chunked to
/// `limits.chip_rx_cap`, a trailing partial byte, and then the final bit alone
/// (carrying its own TMS value, since that bit may leave the shift state) — the
/// four sub-phases from §4.5.
#[allow(clippy::too_many_arguments)]
fn run_shift(
    transport: &mut dyn FtdiTransport,
    builder: &mut CommandBuilder,
    limits: PlannerLimits,
    state: &mut TapState,
    last_tdi: &mut u8,
    nbits: usize,
    tms: &[u8],
    tdi: &[u8],
    tdo_out: &mut [u8],
    start: usize,
) -> Result<usize, TransportError> {
    // The run lasts until either the input is exhausted or a non-zero TMS bit is
    // seen that would leave the shift state; that bit is the run's final bit and
    // is always emitted alone via clock-bits-out-read(n=1).
    let mut run_end = start;
    while run_end < nbits {
        let tms_bit = bits::get_bit(tms, run_end);
        if tms_bit != 0 {
            run_end += 1;
            break;
        }
        run_end += 1;
    }
    let is_final_bit_of_run = bits::get_bit(tms, run_end - 1) != 0;
    let body_len = if is_final_bit_of_run {
        run_end - start - 1
    } else {
        run_end - start
    };

    let mut pos = start;
    if body_len > 0 {
        let leading = if pos % 8 != 0 { (8 - pos % 8).min(body_len) } else { 0 };
        if leading > 0 {
            emit_bit_mode_run(transport, builder, limits, tdi, tdo_out, pos, leading, last_tdi)?;
            pos += leading;
        }
        let remaining = start + body_len - pos;
        let whole_bytes = remaining / 8;
        let mut bytes_emitted = 0;
        while bytes_emitted < whole_bytes {
            let chunk_bytes = (whole_bytes - bytes_emitted).min(limits.chip_rx_cap);
            emit_byte_mode_run(transport, builder, limits, tdi, tdo_out, pos, chunk_bytes, last_tdi)?;
            pos += chunk_bytes * 8;
            bytes_emitted += chunk_bytes;
        }
        let trailing = start + body_len - pos;
        if trailing > 0 {
            emit_bit_mode_run(transport, builder, limits, tdi, tdo_out, pos, trailing, last_tdi)?;
            pos += trailing;
        }
    }

    if is_final_bit_of_run {
        let tdi_bit = bits::get_bit(tdi, pos);
        let last_tms_bit = bits::get_bit(tms, pos);
        let cmd = [
            CLOCK_TMS_OUT_READ,
            0,
            (tdi_bit << 7) | (last_tms_bit << 1) | last_tms_bit,
        ];
        builder.append_tms_read(&cmd, pos, 1);
        *last_tdi = tdi_bit;
        *state = state.step(1);
        pos += 1;
        maybe_flush(transport, builder, limits, tdo_out)?;
    }
    Ok(pos)
}

/// Emits one `clock-bits-out-read` opcode (`0x3B`) for `n` bits (`1 <= n <= 8`) of
/// TDI starting at bit offset `off`, with TMS held low (still inside the shift
/// state).
fn emit_bit_mode_run(
    transport: &mut dyn FtdiTransport,
    builder: &mut CommandBuilder,
    limits: PlannerLimits,
    tdi: &[u8],
    tdo_out: &mut [u8],
    off: usize,
    n: usize,
    last_tdi: &mut u8,
) -> Result<(), TransportError> {
    debug_assert!(n >= 1 && n <= 8);
    let mut data_byte = 0u8;
    for i in 0..n {
        let bit = bits::get_bit(tdi, off + i);
        data_byte |= bit << i;
        if i == n - 1 {
            *last_tdi = bit;
        }
    }
    // 0x3B clocks data LSB-first: bit 0 of the data byte is the first bit shifted,
    // matching how `data_byte` was assembled above. Length byte is (n - 1).
    let cmd = [CLOCK_BITS_OUT_READ, (n as u8 - 1), data_byte];
    builder.append_bit_read(&cmd, off, n);
    maybe_flush(transport, builder, limits, tdo_out)
}

/// Emits one `clock-bytes-out-read` opcode (`0x39`) for `nbytes` whole bytes of
/// TDI starting at the byte-aligned bit offset `off`.
fn emit_byte_mode_run(
    transport: &mut dyn FtdiTransport,
    builder: &mut CommandBuilder,
    limits: PlannerLimits,
    tdi: &[u8],
    tdo_out: &mut [u8],
    off: usize,
    nbytes: usize,
    last_tdi: &mut u8,
) -> Result<(), TransportError> {
    debug_assert_eq!(off % 8, 0);
    debug_assert!(nbytes >= 1 && nbytes <= 65536);
    let byte_off = off / 8;
    let len = nbytes - 1;
    let mut cmd = Vec::with_capacity(3 + nbytes);
    cmd.push(CLOCK_BYTES_OUT_READ);
    cmd.push((len & 0xFF) as u8);
    cmd.push((len >> 8) as u8);
    cmd.extend_from_slice(&tdi[byte_off..byte_off + nbytes]);
    *last_tdi = bits::get_bit(tdi, off + nbytes * 8 - 1);
    builder.append_bytes_read(&cmd, byte_off, nbytes);
    maybe_flush(transport, builder, limits, tdo_out)
}

/// Flushes early when either the builder's own threshold or the planner's
/// `chip_rx_cap` would otherwise be exceeded by the next command.
fn maybe_flush(
    transport: &mut dyn FtdiTransport,
    builder: &mut CommandBuilder,
    limits: PlannerLimits,
    tdo_out: &mut [u8],
) -> Result<(), TransportError> {
    if builder.should_flush() || builder.rx_pending() >= limits.chip_rx_cap {
        builder.flush(transport, tdo_out)?;
    }
    Ok(())
}
