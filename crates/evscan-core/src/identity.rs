// Evscan Identity Reader
// Name, topology and input_id of an evdev device

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use crate::handle::{DeviceHandle, RawDevice};
use crate::ioctl::{eviocgname, eviocgphys, EVIOCGID, EVIOCGVERSION, INPUT_ID_SIZE};

/// Size of the name and topology buffers.
pub const MAX_NAME_SIZE: usize = 256;

/// Protocol version reported by `EVIOCGVERSION`, packed as `0xMMmmpp`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EvdevVersion(pub i32);

impl EvdevVersion {
    pub fn major(self) -> u16 {
        ((self.0 >> 16) & 0xffff) as u16
    }

    pub fn minor(self) -> u8 {
        ((self.0 >> 8) & 0xff) as u8
    }

    pub fn patch(self) -> u8 {
        (self.0 & 0xff) as u8
    }
}

impl fmt::Display for EvdevVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major(), self.minor(), self.patch())
    }
}

/// Static identity of a device, read once when it is opened
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    /// Device node path
    pub path: PathBuf,
    /// Human-readable device name
    pub name: String,
    /// Physical topology; empty when the device does not report one
    pub phys: String,
    pub bustype: u16,
    pub vendor: u16,
    pub product: u16,
    pub version: u16,
    pub evdev_version: EvdevVersion,
}

/// Read the identity of `handle`.
///
/// All ioctls run under a single lock acquisition. Every failure is fatal
/// except the topology read, which leaves `phys` empty.
pub fn read_identity<D: RawDevice>(handle: &DeviceHandle<D>) -> io::Result<DeviceIdentity> {
    let locked = handle.lock();

    let mut input_id = [0u8; INPUT_ID_SIZE];
    locked.ioctl_read(EVIOCGID, &mut input_id)?;

    let mut name = [0u8; MAX_NAME_SIZE];
    locked.ioctl_read(eviocgname(MAX_NAME_SIZE), &mut name)?;

    let mut phys = [0u8; MAX_NAME_SIZE];
    let phys = match locked.ioctl_read(eviocgphys(MAX_NAME_SIZE), &mut phys) {
        Ok(_) => c_string(&phys),
        Err(e) => {
            log::warn!(
                "{}: physical topology unavailable: {}",
                handle.path().display(),
                e
            );
            String::new()
        }
    };

    let mut evdev_version = [0u8; std::mem::size_of::<libc::c_int>()];
    locked.ioctl_read(EVIOCGVERSION, &mut evdev_version)?;

    Ok(identity_from_parts(
        handle.path(),
        &input_id,
        c_string(&name),
        phys,
        i32::from_ne_bytes(evdev_version),
    ))
}

fn identity_from_parts(
    path: &Path,
    input_id: &[u8; INPUT_ID_SIZE],
    name: String,
    phys: String,
    evdev_version: i32,
) -> DeviceIdentity {
    // struct input_id { __u16 bustype, vendor, product, version; }
    let field = |i: usize| u16::from_ne_bytes([input_id[2 * i], input_id[2 * i + 1]]);

    DeviceIdentity {
        path: path.to_path_buf(),
        name,
        phys,
        bustype: field(0),
        vendor: field(1),
        product: field(2),
        version: field(3),
        evdev_version: EvdevVersion(evdev_version),
    }
}

/// Text up to the first NUL byte (the whole buffer if there is none).
pub fn c_string(buf: &[u8]) -> String {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}
