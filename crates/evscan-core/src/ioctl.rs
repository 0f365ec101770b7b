// Evscan ioctl Requests
// evdev request codes encoded the way linux/ioctl.h encodes them

use std::fmt;

use crate::codes::{EV_MAX, KEY_CNT};

#[cfg(any(
    target_arch = "mips",
    target_arch = "mips64",
    target_arch = "powerpc",
    target_arch = "powerpc64",
    target_arch = "sparc",
    target_arch = "sparc64"
))]
mod consts {
    pub const READ: u64 = 2;
    pub const WRITE: u64 = 4;
    pub const SIZEBITS: u64 = 13;
}

#[cfg(not(any(
    target_arch = "mips",
    target_arch = "mips64",
    target_arch = "powerpc",
    target_arch = "powerpc64",
    target_arch = "sparc",
    target_arch = "sparc64"
)))]
mod consts {
    pub const READ: u64 = 2;
    pub const WRITE: u64 = 1;
    pub const SIZEBITS: u64 = 14;
}

pub use consts::{READ, WRITE};

const NRBITS: u64 = 8;
const TYPEBITS: u64 = 8;
const NRSHIFT: u64 = 0;
const TYPESHIFT: u64 = NRSHIFT + NRBITS;
const SIZESHIFT: u64 = TYPESHIFT + TYPEBITS;
const DIRSHIFT: u64 = SIZESHIFT + consts::SIZEBITS;
const SIZEMASK: u64 = (1 << consts::SIZEBITS) - 1;

/// ioctl "type" byte shared by all evdev requests.
const EVDEV: u64 = b'E' as u64;

/// Size of `struct input_id`.
pub const INPUT_ID_SIZE: usize = 8;

/// Size of the `unsigned int[2]` repeat settings.
pub const REPEAT_SIZE: usize = 2 * std::mem::size_of::<libc::c_uint>();

/// Encode an ioctl command.
pub const fn ioc(dir: u64, ty: u64, nr: u64, size: u64) -> u64 {
    (dir << DIRSHIFT) | (ty << TYPESHIFT) | (nr << NRSHIFT) | ((size & SIZEMASK) << SIZESHIFT)
}

/// A named evdev request code.
///
/// The name only travels along for error messages and logging; the kernel
/// sees `code`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Request {
    pub code: u64,
    pub name: &'static str,
}

impl Request {
    /// Argument size encoded in the request.
    pub const fn size(&self) -> usize {
        ((self.code >> SIZESHIFT) & SIZEMASK) as usize
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:#x})", self.name, self.code)
    }
}

/// `EVIOCGVERSION`: evdev protocol version (`int`).
pub const EVIOCGVERSION: Request = Request {
    code: ioc(READ, EVDEV, 0x01, std::mem::size_of::<libc::c_int>() as u64),
    name: "EVIOCGVERSION",
};

/// `EVIOCGID`: bus type, vendor, product and version (`struct input_id`).
pub const EVIOCGID: Request = Request {
    code: ioc(READ, EVDEV, 0x02, INPUT_ID_SIZE as u64),
    name: "EVIOCGID",
};

/// `EVIOCGREP`: key repeat period and delay.
pub const EVIOCGREP: Request = Request {
    code: ioc(READ, EVDEV, 0x03, REPEAT_SIZE as u64),
    name: "EVIOCGREP",
};

/// `EVIOCSREP`: set key repeat period and delay.
pub const EVIOCSREP: Request = Request {
    code: ioc(WRITE, EVDEV, 0x03, REPEAT_SIZE as u64),
    name: "EVIOCSREP",
};

/// `EVIOCGRAB`: grab or release the device.
///
/// The argument is not dereferenced by the kernel: a non-null pointer grabs
/// and a null pointer releases.
pub const EVIOCGRAB: Request = Request {
    code: ioc(WRITE, EVDEV, 0x90, std::mem::size_of::<libc::c_int>() as u64),
    name: "EVIOCGRAB",
};

/// `EVIOCGNAME(len)`: device name.
pub const fn eviocgname(len: usize) -> Request {
    Request {
        code: ioc(READ, EVDEV, 0x06, len as u64),
        name: "EVIOCGNAME",
    }
}

/// `EVIOCGPHYS(len)`: physical topology string.
pub const fn eviocgphys(len: usize) -> Request {
    Request {
        code: ioc(READ, EVDEV, 0x07, len as u64),
        name: "EVIOCGPHYS",
    }
}

/// `EVIOCGBIT(ev, len)`: bitmap of supported event types (`ev == 0`) or of
/// supported codes for event type `ev`.
///
/// Returns `None` for a type outside `0..=EV_MAX` or a length that does not
/// fit the size field.
pub const fn eviocgbit(ev: u16, len: usize) -> Option<Request> {
    if ev > EV_MAX || len as u64 > SIZEMASK || len > KEY_CNT / 8 {
        return None;
    }
    Some(Request {
        code: ioc(READ, EVDEV, 0x20 + ev as u64, len as u64),
        name: "EVIOCGBIT",
    })
}
