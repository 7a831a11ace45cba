//! MPSSE opcode constants used by the builder and planner (§6 compatibility boundary).
//!
//! Named after the FTDI AN108/AN135 mnemonics rather than grouped into an enum,
//! since the planner builds raw command bytes directly (it does not go through a
//! general-purpose MPSSE command-builder crate — see DESIGN.md).

/// Clock TMS bits out, no TDO read. Third byte: bit 7 = TDI hold value, bits 0..6 = TMS bits.
pub const CLOCK_TMS_OUT: u8 = 0x4B;
/// Clock TMS bits out, read one TDO byte back (MSB-justified response).
pub const CLOCK_TMS_OUT_READ: u8 = 0x6B;
/// Clock data bits out (neg-edge write, pos-edge read), read one TDO byte back (MSB-justified).
pub const CLOCK_BITS_OUT_READ: u8 = 0x3B;
/// Clock data bytes out (neg-edge write, pos-edge read), LSB-first, 16-bit little-endian length.
pub const CLOCK_BYTES_OUT_READ: u8 = 0x39;

pub const SET_GPIO_LOWER: u8 = 0x80;
pub const SET_GPIO_UPPER: u8 = 0x82;
pub const SET_TCK_DIVISOR: u8 = 0x86;
pub const DISABLE_CLOCK_DIVIDE_BY_5: u8 = 0x8A;
pub const ENABLE_CLOCK_DIVIDE_BY_5: u8 = 0x8B;
pub const DISABLE_LOOPBACK: u8 = 0x85;
pub const ENABLE_LOOPBACK: u8 = 0x84;
pub const SEND_IMMEDIATE: u8 = 0x87;

/// GPIO-lower init value/direction from the MPSSE preamble (§4.1): TCK=0, TDI=0,
/// TMS=1, TDO=input. Value bit 3 (TMS) is high, direction bits 0-3 are outputs.
pub const INITIAL_GPIO_LOWER_VALUE: u8 = 0x08;
pub const INITIAL_GPIO_LOWER_DIRECTION: u8 = 0x0B;

/// Base clock the divisor math in §4.1 is defined against.
pub const BASE_CLOCK_HZ: u32 = 30_000_000;
