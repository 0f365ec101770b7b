// Evscan Device Handle
// Open, read, ioctl and lock primitives on an evdev node

use std::fs::{File, OpenOptions};
use std::io::{self, Read};
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::time::Duration;

use libc::c_void;
use parking_lot::{Mutex, MutexGuard};

use crate::ioctl::Request;

/// How to open a device node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessMode {
    #[default]
    ReadOnly,
    ReadWrite,
}

/// Argument passed along with an ioctl request
#[derive(Debug)]
pub enum IoctlArg<'a> {
    /// The kernel fills this buffer.
    Out(&'a mut [u8]),
    /// The kernel reads this buffer.
    In(&'a [u8]),
    /// Only the pointer value is meaningful; it is never dereferenced.
    Pointer(*const c_void),
}

/// Low-level operations on an open device node.
///
/// `EvdevFile` is the real implementation; anything else (tests, replay
/// tools) can stand in for it as long as it honours the same contract.
pub trait RawDevice: Send {
    /// Blocking read into `buf`, returning the number of bytes read.
    fn read(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Issue `request` with `arg`, returning the ioctl's non-negative result.
    fn ioctl(&self, request: Request, arg: IoctlArg<'_>) -> io::Result<libc::c_int>;

    /// Raw OS file descriptor.
    fn raw_fd(&self) -> RawFd;
}

/// An evdev node opened through the filesystem
#[derive(Debug)]
pub struct EvdevFile {
    file: File,
}

impl EvdevFile {
    pub fn open<P: AsRef<Path>>(path: P, mode: AccessMode) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(mode == AccessMode::ReadWrite)
            .open(path)?;
        Ok(Self { file })
    }
}

impl RawDevice for EvdevFile {
    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        (&self.file).read(buf)
    }

    fn ioctl(&self, request: Request, arg: IoctlArg<'_>) -> io::Result<libc::c_int> {
        let ptr = match arg {
            IoctlArg::Out(buf) => {
                check_arg_size(request, buf.len())?;
                buf.as_mut_ptr() as *mut c_void
            }
            IoctlArg::In(buf) => {
                check_arg_size(request, buf.len())?;
                buf.as_ptr() as *mut c_void
            }
            IoctlArg::Pointer(ptr) => ptr as *mut c_void,
        };

        // SAFETY: buffer arguments are at least as large as the size encoded
        // in the request, so the kernel cannot write past them. Pointer
        // arguments are only compared against null.
        let ret = unsafe { libc::ioctl(self.file.as_raw_fd(), request.code as _, ptr) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(ret)
    }

    fn raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

fn check_arg_size(request: Request, len: usize) -> io::Result<()> {
    if len < request.size() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!(
                "{} needs a {} byte argument, got {}",
                request.name,
                request.size(),
                len
            ),
        ));
    }
    Ok(())
}

/// An open device plus the advisory lock that serializes ioctl sequences.
///
/// Reads never take the lock. ioctls can only be issued through a
/// [`LockedHandle`], so every ioctl sequence runs while the lock is held and
/// the lock is released when the guard is dropped, whichever way the
/// sequence exits.
#[derive(Debug)]
pub struct DeviceHandle<D: RawDevice = EvdevFile> {
    path: PathBuf,
    device: D,
    lock: Mutex<()>,
}

impl DeviceHandle<EvdevFile> {
    /// Open `path` read-only.
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        Self::open_with(path, AccessMode::ReadOnly)
    }

    pub fn open_with<P: AsRef<Path>>(path: P, mode: AccessMode) -> io::Result<Self> {
        let device = EvdevFile::open(path.as_ref(), mode)?;
        Ok(Self::from_raw(path, device))
    }
}

impl<D: RawDevice> DeviceHandle<D> {
    /// Wrap an already open device.
    pub fn from_raw<P: AsRef<Path>>(path: P, device: D) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            device,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn raw_fd(&self) -> RawFd {
        self.device.raw_fd()
    }

    /// Access the underlying device.
    pub fn device(&self) -> &D {
        &self.device
    }

    /// Blocking read of raw event bytes.
    pub fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.device.read(buf)
    }

    /// Acquire exclusive ioctl access, blocking until it is available.
    pub fn lock(&self) -> LockedHandle<'_, D> {
        LockedHandle {
            device: &self.device,
            _guard: self.lock.lock(),
        }
    }

    /// Acquire exclusive ioctl access if nobody else holds it.
    pub fn try_lock(&self) -> Option<LockedHandle<'_, D>> {
        self.lock.try_lock().map(|guard| LockedHandle {
            device: &self.device,
            _guard: guard,
        })
    }

    /// Wait until the device has data to read.
    ///
    /// Returns `Ok(false)` on timeout or when interrupted by a signal, so a
    /// caller can check a shutdown flag between waits. `None` waits forever.
    pub fn wait_readable(&self, timeout: Option<Duration>) -> io::Result<bool> {
        let timeout_ms = match timeout {
            Some(t) => t.as_millis().min(libc::c_int::MAX as u128) as libc::c_int,
            None => -1,
        };
        let mut poll_fd = libc::pollfd {
            fd: self.device.raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };

        // SAFETY: a single valid pollfd is passed with a count of one.
        let poll_result = unsafe { libc::poll(&mut poll_fd, 1, timeout_ms) };

        if poll_result < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(false);
            }
            return Err(err);
        }

        if poll_result == 0 {
            return Ok(false);
        }
        if poll_fd.revents & libc::POLLIN != 0 {
            return Ok(true);
        }
        if poll_fd.revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0 {
            // Unplugged devices report POLLHUP/POLLERR and never become readable.
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                format!("{}: device is gone", self.path.display()),
            ));
        }
        Ok(false)
    }
}

/// Exclusive ioctl access to a [`DeviceHandle`], released on drop
pub struct LockedHandle<'a, D: RawDevice> {
    device: &'a D,
    _guard: MutexGuard<'a, ()>,
}

impl<D: RawDevice> LockedHandle<'_, D> {
    /// Issue a request whose result is written into `buf`.
    pub fn ioctl_read(&self, request: Request, buf: &mut [u8]) -> io::Result<libc::c_int> {
        self.device.ioctl(request, IoctlArg::Out(buf))
    }

    /// Issue a request that reads `buf`.
    pub fn ioctl_write(&self, request: Request, buf: &[u8]) -> io::Result<libc::c_int> {
        self.device.ioctl(request, IoctlArg::In(buf))
    }

    /// Issue a request that passes a bare pointer value.
    pub fn ioctl_pointer(&self, request: Request, ptr: *const c_void) -> io::Result<libc::c_int> {
        self.device.ioctl(request, IoctlArg::Pointer(ptr))
    }

    pub fn raw_fd(&self) -> RawFd {
        self.device.raw_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ioctl::{EVIOCGID, EVIOCGREP};

    struct NullDevice;

    impl RawDevice for NullDevice {
        fn read(&self, _buf: &mut [u8]) -> io::Result<usize> {
            Ok(0)
        }

        fn ioctl(&self, _request: Request, _arg: IoctlArg<'_>) -> io::Result<libc::c_int> {
            Ok(0)
        }

        fn raw_fd(&self) -> RawFd {
            -1
        }
    }

    #[test]
    fn test_lock_is_exclusive_and_released_on_drop() {
        let handle = DeviceHandle::from_raw("/dev/input/event99", NullDevice);
        {
            let _locked = handle.lock();
            assert!(handle.try_lock().is_none());
        }
        assert!(handle.try_lock().is_some());
    }

    #[test]
    fn test_lock_released_after_error_path() {
        fn failing(handle: &DeviceHandle<NullDevice>) -> io::Result<()> {
            let _locked = handle.lock();
            Err(io::Error::from_raw_os_error(libc::EIO))
        }

        let handle = DeviceHandle::from_raw("/dev/input/event99", NullDevice);
        assert!(failing(&handle).is_err());
        assert!(handle.try_lock().is_some());
    }

    #[test]
    fn test_check_arg_size() {
        assert!(check_arg_size(EVIOCGID, 8).is_ok());
        assert!(check_arg_size(EVIOCGID, 64).is_ok());
        let err = check_arg_size(EVIOCGREP, 4).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_open_missing_node() {
        let err = DeviceHandle::open("/nonexistent/evscan/event0").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_wait_readable_times_out() {
        // poll ignores negative descriptors, so this only ever times out.
        let handle = DeviceHandle::from_raw("/dev/input/event99", NullDevice);
        assert!(!handle
            .wait_readable(Some(Duration::from_millis(1)))
            .unwrap());
    }

    #[test]
    fn test_handle_path() {
        let handle = DeviceHandle::from_raw("/dev/input/event7", NullDevice);
        assert_eq!(handle.path(), Path::new("/dev/input/event7"));
        assert_eq!(handle.raw_fd(), -1);
    }
}
