// Evscan Input Device
// An opened evdev node with its identity, capabilities and event stream

use std::fmt;
use std::io;
use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};

use libc::c_void;

use crate::capability::{probe_capabilities, CapabilitySet};
use crate::event::{
    check_read_len, decode_batch, decode_event, DecodeError, EventBatch, InputEvent, Layout,
};
use crate::handle::{AccessMode, DeviceHandle, EvdevFile, RawDevice};
use crate::identity::{read_identity, DeviceIdentity};
use crate::ioctl::{EVIOCGRAB, EVIOCGREP, EVIOCSREP, REPEAT_SIZE};

/// Result type for device operations
pub type DeviceResult<T> = Result<T, DeviceError>;

/// Errors that can occur while opening or using a device
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("open {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("read device info: {0}")]
    Info(#[source] io::Error),

    #[error("read device capabilities: {0}")]
    Capabilities(#[source] io::Error),

    #[error("{op}: {source}")]
    Control {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("read events: {0}")]
    Read(#[from] io::Error),

    #[error("decode events: {0}")]
    Decode(#[from] DecodeError),
}

/// Key repeat settings, both in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyRepeat {
    /// Time a key must be held before it starts repeating
    pub delay_ms: u32,
    /// Time between repeats
    pub period_ms: u32,
}

impl KeyRepeat {
    /// Settings for `rate` repeats per second after `delay_ms`.
    ///
    /// A zero rate gives a zero period.
    pub fn from_rate(rate: u32, delay_ms: u32) -> Self {
        Self {
            delay_ms,
            period_ms: 1000u32.checked_div(rate).unwrap_or(0),
        }
    }

    /// Repeats per second implied by the period.
    pub fn rate(&self) -> f64 {
        if self.period_ms == 0 {
            0.0
        } else {
            1000.0 / self.period_ms as f64
        }
    }

    fn from_bytes(buf: &[u8; REPEAT_SIZE]) -> Self {
        // unsigned int rep[2] = { REP_DELAY, REP_PERIOD }
        Self {
            delay_ms: u32::from_ne_bytes([buf[0], buf[1], buf[2], buf[3]]),
            period_ms: u32::from_ne_bytes([buf[4], buf[5], buf[6], buf[7]]),
        }
    }

    fn to_bytes(self) -> [u8; REPEAT_SIZE] {
        let mut buf = [0u8; REPEAT_SIZE];
        buf[..4].copy_from_slice(&self.delay_ms.to_ne_bytes());
        buf[4..].copy_from_slice(&self.period_ms.to_ne_bytes());
        buf
    }
}

/// An opened input device.
///
/// Identity and capabilities are read once in [`InputDevice::open`] and
/// never change afterwards. Reads must be serialized by the caller.
#[derive(Debug)]
pub struct InputDevice<D: RawDevice = EvdevFile> {
    handle: DeviceHandle<D>,
    identity: DeviceIdentity,
    capabilities: CapabilitySet,
    layout: Layout,
}

impl InputDevice<EvdevFile> {
    /// Open `path` read-only and read its identity and capabilities.
    pub fn open<P: AsRef<Path>>(path: P) -> DeviceResult<Self> {
        Self::open_with(path, AccessMode::ReadOnly)
    }

    pub fn open_with<P: AsRef<Path>>(path: P, mode: AccessMode) -> DeviceResult<Self> {
        let path = path.as_ref();
        let handle = DeviceHandle::open_with(path, mode).map_err(|source| DeviceError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_handle(handle)
    }
}

impl<D: RawDevice> InputDevice<D> {
    /// Read identity and capabilities of an already open handle.
    ///
    /// Either both succeed or the handle is dropped and the error returned.
    pub fn from_handle(handle: DeviceHandle<D>) -> DeviceResult<Self> {
        let identity = read_identity(&handle).map_err(DeviceError::Info)?;
        let capabilities = probe_capabilities(&handle).map_err(DeviceError::Capabilities)?;

        log::debug!(
            "opened {} ({:?}, bus {:#x}, vendor {:#x}, product {:#x})",
            handle.path().display(),
            identity.name,
            identity.bustype,
            identity.vendor,
            identity.product
        );

        Ok(Self {
            handle,
            identity,
            capabilities,
            layout: Layout::NATIVE,
        })
    }

    /// Decode records with `layout` instead of the native one.
    pub fn with_layout(mut self, layout: Layout) -> Self {
        self.layout = layout;
        self
    }

    pub fn path(&self) -> &Path {
        self.handle.path()
    }

    pub fn name(&self) -> &str {
        &self.identity.name
    }

    pub fn phys(&self) -> &str {
        &self.identity.phys
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn capabilities(&self) -> &CapabilitySet {
        &self.capabilities
    }

    pub fn handle(&self) -> &DeviceHandle<D> {
        &self.handle
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn raw_fd(&self) -> RawFd {
        self.handle.raw_fd()
    }

    /// Read the next batch of events, up to [`crate::event::BATCH_SIZE`].
    ///
    /// Blocks until the device has data.
    pub fn read(&self) -> DeviceResult<EventBatch> {
        let mut buf = [0u8; Layout::Word64.batch_size()];
        let buf = &mut buf[..self.layout.batch_size()];

        let got = self.handle.read(buf)?;
        check_read_len(got, self.layout)?;
        let events = decode_batch(buf, self.layout)?;

        log::trace!(
            "{}: read {} bytes, {} event(s)",
            self.path().display(),
            got,
            events.len()
        );
        Ok(events)
    }

    /// Read exactly one event.
    pub fn read_one(&self) -> DeviceResult<InputEvent> {
        let mut buf = [0u8; Layout::Word64.record_size()];
        let buf = &mut buf[..self.layout.record_size()];

        let got = self.handle.read(buf)?;
        Ok(decode_event(&buf[..got], self.layout)?)
    }

    /// Current key repeat settings.
    pub fn repeat_rate(&self) -> DeviceResult<KeyRepeat> {
        let mut buf = [0u8; REPEAT_SIZE];
        self.handle
            .lock()
            .ioctl_read(EVIOCGREP, &mut buf)
            .map_err(|source| DeviceError::Control {
                op: "get repeat rate",
                source,
            })?;
        Ok(KeyRepeat::from_bytes(&buf))
    }

    pub fn set_repeat_rate(&self, repeat: KeyRepeat) -> DeviceResult<()> {
        self.handle
            .lock()
            .ioctl_write(EVIOCSREP, &repeat.to_bytes())
            .map_err(|source| DeviceError::Control {
                op: "set repeat rate",
                source,
            })?;
        Ok(())
    }

    /// Take exclusive delivery of this device's events.
    ///
    /// Other readers, including the console and display server, stop
    /// receiving events until [`InputDevice::release`] or until the device
    /// is closed.
    pub fn grab(&self) -> DeviceResult<()> {
        // EVIOCGRAB takes the pointer value itself as the flag: any non-null
        // pointer grabs. What it points to is never read.
        let marker: libc::c_int = 1;
        self.grab_ioctl(&marker as *const libc::c_int as *const c_void, "grab device")
    }

    /// Give up exclusive delivery.
    pub fn release(&self) -> DeviceResult<()> {
        // A null pointer releases the grab.
        self.grab_ioctl(std::ptr::null(), "release device")
    }

    fn grab_ioctl(&self, ptr: *const c_void, op: &'static str) -> DeviceResult<()> {
        self.handle
            .lock()
            .ioctl_pointer(EVIOCGRAB, ptr)
            .map_err(|source| DeviceError::Control { op, source })?;
        Ok(())
    }
}

/// Multi-line description, e.g.:
///
/// ```text
/// InputDevice /dev/input/event3 (fd 3)
///   name Logitech USB Laser Mouse
///   phys usb-0000:00:12.0-2/input0
///   bus 0x0003, vendor 0x046d, product 0xc069, version 0x0110
///   events EV_SYN 0, EV_KEY 1, EV_REL 2, EV_MSC 4
/// ```
impl<D: RawDevice> fmt::Display for InputDevice<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let events = self
            .capabilities
            .types()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");

        let id = &self.identity;
        write!(
            f,
            "InputDevice {} (fd {})\n  name {}\n  phys {}\n  \
             bus {:#06x}, vendor {:#06x}, product {:#06x}, version {:#06x}\n  events {}",
            self.path().display(),
            self.raw_fd(),
            id.name,
            id.phys,
            id.bustype,
            id.vendor,
            id.product,
            id.version,
            events
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_repeat_bytes() {
        let repeat = KeyRepeat {
            delay_ms: 250,
            period_ms: 33,
        };
        assert_eq!(KeyRepeat::from_bytes(&repeat.to_bytes()), repeat);
    }

    #[test]
    fn test_key_repeat_rate() {
        let repeat = KeyRepeat {
            delay_ms: 500,
            period_ms: 40,
        };
        assert_eq!(repeat.rate(), 25.0);
        assert_eq!(KeyRepeat::from_rate(25, 500), repeat);
        assert_eq!(KeyRepeat::from_rate(0, 250).period_ms, 0);
        assert_eq!(
            KeyRepeat {
                delay_ms: 0,
                period_ms: 0
            }
            .rate(),
            0.0
        );
    }

    #[test]
    fn test_error_messages_name_phase() {
        let info = DeviceError::Info(io::Error::from_raw_os_error(libc::ENOTTY));
        assert!(info.to_string().starts_with("read device info: "));

        let caps = DeviceError::Capabilities(io::Error::from_raw_os_error(libc::EINVAL));
        assert!(caps.to_string().starts_with("read device capabilities: "));

        let open = DeviceError::Open {
            path: PathBuf::from("/dev/input/event9"),
            source: io::Error::from_raw_os_error(libc::EACCES),
        };
        assert!(open.to_string().starts_with("open /dev/input/event9: "));
    }

    #[test]
    fn test_open_missing_device() {
        let err = InputDevice::open("/nonexistent/evscan/event0").unwrap_err();
        assert!(matches!(err, DeviceError::Open { .. }));
    }
}
