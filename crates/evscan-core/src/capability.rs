// Evscan Capability Prober
// Walks the EVIOCGBIT bitmaps into a map of supported types and codes

use std::collections::BTreeMap;
use std::fmt;
use std::io;

use indexmap::IndexMap;

use crate::codes::{code_name, type_name, EV_CNT, EV_MAX, KEY_CNT, KEY_MAX};
use crate::handle::{DeviceHandle, RawDevice};
use crate::ioctl::eviocgbit;

/// Bytes needed for one bit per event type.
pub const EV_BITMAP_LEN: usize = EV_CNT.div_ceil(8);

/// Bytes needed for one bit per event code.
pub const CODE_BITMAP_LEN: usize = KEY_CNT.div_ceil(8);

/// Whether bit `bit` is set. Bits past the end of the buffer read as unset.
pub fn test_bit(bits: &[u8], bit: usize) -> bool {
    match bits.get(bit / 8) {
        Some(byte) => byte & (1 << (bit % 8)) != 0,
        None => false,
    }
}

/// Set bit `bit`. Returns `false` (and changes nothing) when it is out of range.
pub fn set_bit(bits: &mut [u8], bit: usize) -> bool {
    match bits.get_mut(bit / 8) {
        Some(byte) => {
            *byte |= 1 << (bit % 8);
            true
        }
        None => false,
    }
}

/// A supported event type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CapabilityType {
    pub ev_type: u16,
    pub name: &'static str,
}

impl CapabilityType {
    pub fn new(ev_type: u16) -> Self {
        Self {
            ev_type,
            name: type_name(ev_type),
        }
    }
}

impl fmt::Display for CapabilityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.ev_type)
    }
}

/// A supported event code within one type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CapabilityCode {
    pub code: u16,
    pub name: &'static str,
}

impl CapabilityCode {
    pub fn new(ev_type: u16, code: u16) -> Self {
        Self {
            code,
            name: code_name(ev_type, code),
        }
    }
}

impl fmt::Display for CapabilityCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.code)
    }
}

/// Event types a device supports, each with its supported codes.
///
/// Types are kept in ascending numeric order, as are the codes under each
/// type. A type whose code bitmap came back empty is still present.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilitySet {
    entries: IndexMap<CapabilityType, Vec<CapabilityCode>>,
}

impl CapabilitySet {
    /// Build a set from an event-type bitmap, fetching each set type's code
    /// bitmap through `fetch_codes`. The first fetch error aborts the walk.
    pub fn from_bitmaps<F>(ev_bits: &[u8; EV_BITMAP_LEN], mut fetch_codes: F) -> io::Result<Self>
    where
        F: FnMut(u16, &mut [u8; CODE_BITMAP_LEN]) -> io::Result<()>,
    {
        let mut entries = IndexMap::new();

        for ev_type in 0..EV_MAX {
            if !test_bit(ev_bits, ev_type as usize) {
                continue;
            }

            let mut code_bits = [0u8; CODE_BITMAP_LEN];
            fetch_codes(ev_type, &mut code_bits)?;

            let codes = (0..KEY_MAX)
                .filter(|&code| test_bit(&code_bits, code as usize))
                .map(|code| CapabilityCode::new(ev_type, code))
                .collect();

            entries.insert(CapabilityType::new(ev_type), codes);
        }

        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Supported types in ascending order.
    pub fn types(&self) -> impl Iterator<Item = &CapabilityType> {
        self.entries.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&CapabilityType, &[CapabilityCode])> {
        self.entries.iter().map(|(ty, codes)| (ty, codes.as_slice()))
    }

    pub fn contains_type(&self, ev_type: u16) -> bool {
        self.entries.contains_key(&CapabilityType::new(ev_type))
    }

    /// Codes supported for `ev_type`, or `None` if the type is unsupported.
    pub fn codes(&self, ev_type: u16) -> Option<&[CapabilityCode]> {
        self.entries
            .get(&CapabilityType::new(ev_type))
            .map(Vec::as_slice)
    }

    pub fn supports(&self, ev_type: u16, code: u16) -> bool {
        self.codes(ev_type)
            .is_some_and(|codes| codes.binary_search_by_key(&code, |c| c.code).is_ok())
    }

    /// Numeric-only view: type id to code ids.
    pub fn flat(&self) -> BTreeMap<u16, Vec<u16>> {
        self.entries
            .iter()
            .map(|(ty, codes)| (ty.ev_type, codes.iter().map(|c| c.code).collect()))
            .collect()
    }
}

/// Query the capabilities of `handle`.
///
/// The lock is held for the whole ioctl sequence. Any ioctl failure aborts
/// the probe; no partial set is returned.
pub fn probe_capabilities<D: RawDevice>(handle: &DeviceHandle<D>) -> io::Result<CapabilitySet> {
    let locked = handle.lock();

    let mut ev_bits = [0u8; EV_BITMAP_LEN];
    locked.ioctl_read(bitmap_request(0, EV_BITMAP_LEN)?, &mut ev_bits)?;

    let set = CapabilitySet::from_bitmaps(&ev_bits, |ev_type, code_bits| {
        locked.ioctl_read(bitmap_request(ev_type, CODE_BITMAP_LEN)?, code_bits)?;
        Ok(())
    })?;

    log::debug!(
        "{}: {} supported event type(s)",
        handle.path().display(),
        set.len()
    );
    Ok(set)
}

fn bitmap_request(ev_type: u16, len: usize) -> io::Result<crate::ioctl::Request> {
    eviocgbit(ev_type, len).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("no EVIOCGBIT request for type {ev_type} with {len} bytes"),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codes::{EV_KEY, EV_REL, EV_SYN};

    fn bitmap<const N: usize>(bits: &[usize]) -> [u8; N] {
        let mut out = [0u8; N];
        for &bit in bits {
            assert!(set_bit(&mut out, bit));
        }
        out
    }

    #[test]
    fn test_bitmap_lengths() {
        assert_eq!(EV_BITMAP_LEN, 4);
        assert_eq!(CODE_BITMAP_LEN, 96);
    }

    #[test]
    fn test_set_and_test_bit_agree() {
        for bit in 0..KEY_CNT {
            let mut bits = [0u8; CODE_BITMAP_LEN];
            assert!(set_bit(&mut bits, bit));
            assert_eq!(bits[bit / 8], 1 << (bit % 8));
            for probe in [0, bit.saturating_sub(1), bit, bit + 1, KEY_CNT - 1] {
                assert_eq!(test_bit(&bits, probe), probe == bit, "bit {bit} probe {probe}");
            }
        }
    }

    #[test]
    fn test_bits_out_of_range() {
        let mut bits = [0u8; EV_BITMAP_LEN];
        assert!(!set_bit(&mut bits, EV_BITMAP_LEN * 8));
        assert_eq!(bits, [0u8; EV_BITMAP_LEN]);
        assert!(!test_bit(&[0xff; EV_BITMAP_LEN], EV_BITMAP_LEN * 8));
    }

    #[test]
    fn test_from_bitmaps_types_match_bits() {
        let ev_bits = bitmap::<EV_BITMAP_LEN>(&[0, 1, 2, 4, 0x11]);
        let set = CapabilitySet::from_bitmaps(&ev_bits, |_, _| Ok(())).unwrap();

        let types: Vec<u16> = set.types().map(|t| t.ev_type).collect();
        assert_eq!(types, vec![0, 1, 2, 4, 0x11]);
        assert_eq!(set.len(), 5);
    }

    #[test]
    fn test_from_bitmaps_empty_codes_still_present() {
        let ev_bits = bitmap::<EV_BITMAP_LEN>(&[EV_REL as usize]);
        let set = CapabilitySet::from_bitmaps(&ev_bits, |_, _| Ok(())).unwrap();

        assert!(set.contains_type(EV_REL));
        assert_eq!(set.codes(EV_REL), Some(&[][..]));
    }

    #[test]
    fn test_from_bitmaps_codes_ascending_with_names() {
        let ev_bits = bitmap::<EV_BITMAP_LEN>(&[EV_SYN as usize, EV_KEY as usize]);
        let set = CapabilitySet::from_bitmaps(&ev_bits, |ev_type, code_bits| {
            let codes: &[usize] = match ev_type {
                EV_KEY => &[0x110, 30, 0x111],
                _ => &[0],
            };
            for &code in codes {
                set_bit(code_bits, code);
            }
            Ok(())
        })
        .unwrap();

        let keys = set.codes(EV_KEY).unwrap();
        assert_eq!(
            keys,
            &[
                CapabilityCode { code: 30, name: "KEY_A" },
                CapabilityCode { code: 0x110, name: "BTN_LEFT" },
                CapabilityCode { code: 0x111, name: "BTN_RIGHT" },
            ]
        );
        assert!(set.supports(EV_KEY, 0x110));
        assert!(!set.supports(EV_KEY, 31));
        assert!(!set.supports(EV_REL, 0));
    }

    #[test]
    fn test_from_bitmaps_stops_on_error() {
        let ev_bits = bitmap::<EV_BITMAP_LEN>(&[0, 1, 2]);
        let mut fetched = Vec::new();
        let result = CapabilitySet::from_bitmaps(&ev_bits, |ev_type, _| {
            fetched.push(ev_type);
            if ev_type == 1 {
                return Err(io::Error::from_raw_os_error(libc::EINVAL));
            }
            Ok(())
        });

        assert!(result.is_err());
        assert_eq!(fetched, vec![0, 1]);
    }

    #[test]
    fn test_ev_max_bit_is_not_walked() {
        let ev_bits = bitmap::<EV_BITMAP_LEN>(&[EV_MAX as usize]);
        let set = CapabilitySet::from_bitmaps(&ev_bits, |_, _| Ok(())).unwrap();
        assert!(set.is_empty());
    }

    #[test]
    fn test_flat_view() {
        let ev_bits = bitmap::<EV_BITMAP_LEN>(&[EV_KEY as usize, EV_REL as usize]);
        let set = CapabilitySet::from_bitmaps(&ev_bits, |ev_type, code_bits| {
            if ev_type == EV_REL {
                set_bit(code_bits, 0);
                set_bit(code_bits, 8);
            }
            Ok(())
        })
        .unwrap();

        let flat = set.flat();
        assert_eq!(flat.get(&EV_KEY), Some(&vec![]));
        assert_eq!(flat.get(&EV_REL), Some(&vec![0, 8]));
    }

    #[test]
    fn test_capability_display() {
        assert_eq!(CapabilityType::new(EV_KEY).to_string(), "EV_KEY 1");
        assert_eq!(CapabilityCode::new(EV_REL, 8).to_string(), "REL_WHEEL 8");
    }
}
