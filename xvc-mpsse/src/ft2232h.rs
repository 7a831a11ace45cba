//! The production FTDI Transport (§4.1): backs [`FtdiTransport`] with
//! `libftd2xx`'s D2XX binding, the idiom `other_examples/6cb72f8f_rustbox-jtag-taps
//! __src-cable-mpsse.rs.rs` and the other FTDI-JTAG tools in the retrieval pack all
//! converge on for talking to an FT2232H from Rust.

use std::time::Duration;

use libftd2xx::{BitMode, Ftdi, FtdiCommon, list_devices};

use crate::error::TransportError;
use crate::transport::{self, DeviceSelector, FtdiTransport};

pub struct Ft2232hTransport {
    device: Ftdi,
}

impl Ft2232hTransport {
    /// Opens the adapter matching `selector`, installs the latency timer, and
    /// runs the full [`transport::configure_mpsse`] bring-up sequence.
    pub fn open(selector: &DeviceSelector, latency_ms: u8) -> Result<Self, TransportError> {
        let mut device = Self::open_raw(selector)?;
        device
            .set_latency_timer(Duration::from_millis(latency_ms as u64))
            .map_err(|e| TransportError::Device(e.to_string()))?;
        let mut transport = Ft2232hTransport { device };
        transport::configure_mpsse(&mut transport)?;
        Ok(transport)
    }

    fn open_raw(selector: &DeviceSelector) -> Result<Ftdi, TransportError> {
        match selector {
            DeviceSelector::SerialNumber(sn) => Ftdi::with_serial_number(sn)
                .map_err(|e| TransportError::DeviceNotFound(format!("{selector} ({e})"))),
            DeviceSelector::Index(idx) => Ftdi::with_index(*idx as i32)
                .map_err(|e| TransportError::DeviceNotFound(format!("{selector} ({e})"))),
            DeviceSelector::BusLocation { bus, address } => {
                let devices = list_devices().map_err(|e| TransportError::Device(e.to_string()))?;
                let needle = format!("{bus}-{address}");
                let index = devices
                    .iter()
                    .position(|info| info.description.contains(&needle) || info.serial_number.contains(&needle))
                    .ok_or_else(|| TransportError::DeviceNotFound(selector.to_string()))?;
                Ftdi::with_index(index as i32)
                    .map_err(|e| TransportError::DeviceNotFound(format!("{selector} ({e})")))
            }
        }
    }
}

impl FtdiTransport for Ft2232hTransport {
    fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let wrote = self.device.write(bytes).map_err(|e| TransportError::Device(e.to_string()))?;
        if wrote != bytes.len() {
            return Err(TransportError::ShortWrite { expected: bytes.len(), wrote });
        }
        Ok(())
    }

    fn rx_available(&mut self) -> Result<usize, TransportError> {
        self.device.queue_status().map_err(|e| TransportError::Device(e.to_string()))
    }

    fn read(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<usize, TransportError> {
        // The D2XX read timeout was fixed by `set_timeouts` during bring-up; the
        // per-call `timeout` parameter only bounds how long the spinning caller
        // (`read_exact_spinning`) waits between polls, not this syscall itself.
        self.device.read(buf).map_err(|e| TransportError::Device(e.to_string()))
    }

    fn reset(&mut self) -> Result<(), TransportError> {
        self.device.reset().map_err(|e| TransportError::Device(e.to_string()))
    }

    fn purge(&mut self) -> Result<(), TransportError> {
        self.device.purge_all().map_err(|e| TransportError::Device(e.to_string()))
    }

    fn set_usb_transfer_size(&mut self, size: u32) -> Result<(), TransportError> {
        self.device.set_usb_parameters(size).map_err(|e| TransportError::Device(e.to_string()))
    }

    fn set_timeouts(&mut self, read: Duration, write: Duration) -> Result<(), TransportError> {
        self.device.set_timeouts(read, write).map_err(|e| TransportError::Device(e.to_string()))
    }

    fn set_bitmode_mpsse(&mut self) -> Result<(), TransportError> {
        self.device
            .set_bit_mode(0x0b, BitMode::Mpsse)
            .map_err(|e| TransportError::Device(e.to_string()))
    }

    fn set_bitmode_reset(&mut self) -> Result<(), TransportError> {
        self.device
            .set_bit_mode(0x00, BitMode::Reset)
            .map_err(|e| TransportError::Device(e.to_string()))
    }
}
