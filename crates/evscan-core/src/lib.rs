// Evscan Core Library
// evdev identity, capability discovery and event decoding

pub mod capability;
pub mod codes;
pub mod device;
pub mod enumerate;
pub mod event;
pub mod handle;
pub mod identity;
pub mod ioctl;

#[cfg(feature = "settings")]
pub mod settings;

pub use capability::{CapabilityCode, CapabilitySet, CapabilityType};
pub use codes::{code_name, type_name};
pub use device::{DeviceError, DeviceResult, InputDevice, KeyRepeat};
pub use enumerate::{
    expand_glob, is_input_device, list_input_device_paths, list_input_devices, EnumerateError,
    EnumerateResult, DEFAULT_GLOB,
};
pub use event::{DecodeError, DecodeResult, EventBatch, InputEvent, Layout, BATCH_SIZE};
pub use handle::{AccessMode, DeviceHandle, EvdevFile, IoctlArg, RawDevice};
pub use identity::{DeviceIdentity, EvdevVersion};

#[cfg(feature = "settings")]
pub use settings::{Settings, SettingsError};
