// Evscan Event Decoder
// Fixed-layout struct input_event records to typed events

use std::fmt;
use std::time::Duration;

use smallvec::SmallVec;

use crate::codes::{code_name, type_name};

/// Number of records requested by one batch read.
pub const BATCH_SIZE: usize = 16;

/// Decoded events from one batch read. Never spills to the heap.
pub type EventBatch = SmallVec<[InputEvent; BATCH_SIZE]>;

/// Result type for decoding
pub type DecodeResult<T> = Result<T, DecodeError>;

/// Errors that can occur while decoding raw event bytes
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("short read: got {got} bytes, expected at least {expected}")]
    Short { got: usize, expected: usize },

    #[error("read of {got} bytes is not a whole number of {record_size}-byte events")]
    Misaligned { got: usize, record_size: usize },
}

/// Width of the `time_t`/`suseconds_t` fields in `struct input_event`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// 4-byte timestamp words (32-bit userspace), 16-byte records
    Word32,
    /// 8-byte timestamp words (64-bit userspace), 24-byte records
    Word64,
}

impl Layout {
    /// Layout used by the kernel for this process.
    #[cfg(target_pointer_width = "64")]
    pub const NATIVE: Layout = Layout::Word64;
    #[cfg(not(target_pointer_width = "64"))]
    pub const NATIVE: Layout = Layout::Word32;

    pub const fn word_size(self) -> usize {
        match self {
            Layout::Word32 => 4,
            Layout::Word64 => 8,
        }
    }

    /// Size in bytes of one record.
    pub const fn record_size(self) -> usize {
        2 * self.word_size() + 8
    }

    /// Size in bytes of a full batch.
    pub const fn batch_size(self) -> usize {
        self.record_size() * BATCH_SIZE
    }

    fn word(self, buf: &[u8]) -> i64 {
        match self {
            Layout::Word32 => i32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as i64,
            Layout::Word64 => i64::from_le_bytes([
                buf[0], buf[1], buf[2], buf[3], buf[4], buf[5], buf[6], buf[7],
            ]),
        }
    }
}

/// A single input event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct InputEvent {
    /// Timestamp, seconds part
    pub time_sec: i64,
    /// Timestamp, microseconds part
    pub time_usec: i64,
    /// Event type (EV_KEY = 0x01)
    pub event_type: u16,
    /// Event code within the type
    pub code: u16,
    pub value: i32,
}

impl InputEvent {
    pub fn new(time_sec: i64, time_usec: i64, event_type: u16, code: u16, value: i32) -> Self {
        Self {
            time_sec,
            time_usec,
            event_type,
            code,
            value,
        }
    }

    /// Timestamp as a duration since the clock's epoch.
    ///
    /// Negative fields clamp to zero.
    pub fn timestamp(&self) -> Duration {
        Duration::from_secs(self.time_sec.max(0) as u64)
            + Duration::from_micros(self.time_usec.max(0) as u64)
    }

    pub fn type_name(&self) -> &'static str {
        type_name(self.event_type)
    }

    pub fn code_name(&self) -> &'static str {
        code_name(self.event_type, self.code)
    }

    /// Encode into `layout`'s wire format.
    ///
    /// `Layout::Word32` has only 32-bit timestamp words: fields outside the
    /// `i32` range saturate to `i32::MIN`/`i32::MAX` instead of wrapping.
    pub fn to_bytes(&self, layout: Layout) -> Vec<u8> {
        let mut out = Vec::with_capacity(layout.record_size());
        match layout {
            Layout::Word32 => {
                out.extend_from_slice(&saturate_i32(self.time_sec).to_le_bytes());
                out.extend_from_slice(&saturate_i32(self.time_usec).to_le_bytes());
            }
            Layout::Word64 => {
                out.extend_from_slice(&self.time_sec.to_le_bytes());
                out.extend_from_slice(&self.time_usec.to_le_bytes());
            }
        }
        out.extend_from_slice(&self.event_type.to_le_bytes());
        out.extend_from_slice(&self.code.to_le_bytes());
        out.extend_from_slice(&self.value.to_le_bytes());
        out
    }
}

impl fmt::Display for InputEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "time {}.{:06}, type {} ({}), code {} ({}), value {}",
            self.time_sec,
            self.time_usec,
            self.event_type,
            self.type_name(),
            self.code,
            self.code_name(),
            self.value
        )
    }
}

fn saturate_i32(value: i64) -> i32 {
    i32::try_from(value).unwrap_or(if value < 0 { i32::MIN } else { i32::MAX })
}

/// Decode one record from the start of `buf`.
pub fn decode_event(buf: &[u8], layout: Layout) -> DecodeResult<InputEvent> {
    let size = layout.record_size();
    if buf.len() < size {
        return Err(DecodeError::Short {
            got: buf.len(),
            expected: size,
        });
    }

    let word = layout.word_size();
    let rest = &buf[2 * word..size];
    Ok(InputEvent {
        time_sec: layout.word(&buf[..word]),
        time_usec: layout.word(&buf[word..2 * word]),
        event_type: u16::from_le_bytes([rest[0], rest[1]]),
        code: u16::from_le_bytes([rest[2], rest[3]]),
        value: i32::from_le_bytes([rest[4], rest[5], rest[6], rest[7]]),
    })
}

/// Decode a full batch buffer and drop the trailing unfilled records.
///
/// `buf` must hold exactly [`BATCH_SIZE`] records. The result ends before
/// the first record whose seconds field is zero: evdev gives no record
/// count, so a zeroed timestamp is taken to mark buffer space the read
/// did not fill. A genuine event stamped at second zero therefore also
/// ends the batch.
pub fn decode_batch(buf: &[u8], layout: Layout) -> DecodeResult<EventBatch> {
    let size = layout.record_size();
    if buf.len() != layout.batch_size() {
        return Err(DecodeError::Short {
            got: buf.len(),
            expected: layout.batch_size(),
        });
    }

    let mut events = EventBatch::new();
    for record in buf.chunks_exact(size) {
        let event = decode_event(record, layout)?;
        if event.time_sec == 0 {
            break;
        }
        events.push(event);
    }
    Ok(events)
}

/// Check the byte count returned by a batch read.
///
/// Fewer than [`BATCH_SIZE`] records is fine; nothing at all, or a partial
/// record, is not.
pub fn check_read_len(got: usize, layout: Layout) -> DecodeResult<()> {
    let size = layout.record_size();
    if got == 0 {
        return Err(DecodeError::Short {
            got,
            expected: size,
        });
    }
    if got % size != 0 {
        return Err(DecodeError::Misaligned {
            got,
            record_size: size,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(i: i64) -> InputEvent {
        InputEvent::new(1_700_000_000 + i, 1000 * i, 1, 30 + i as u16, (i % 3) as i32)
    }

    fn batch_bytes(events: &[InputEvent], layout: Layout) -> Vec<u8> {
        let mut buf: Vec<u8> = events.iter().flat_map(|e| e.to_bytes(layout)).collect();
        buf.resize(layout.batch_size(), 0);
        buf
    }

    #[test]
    fn test_layout_sizes() {
        assert_eq!(Layout::Word32.record_size(), 16);
        assert_eq!(Layout::Word64.record_size(), 24);
        assert_eq!(Layout::Word64.batch_size(), 384);
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn test_native_layout_matches_input_event() {
        assert_eq!(
            Layout::NATIVE.record_size(),
            2 * std::mem::size_of::<libc::c_long>() + 8
        );
    }

    #[test]
    fn test_decode_event_fields() {
        // KEY_A press at 1.000500 on a 32-bit layout
        let buf = [
            0x01, 0x00, 0x00, 0x00, // sec
            0xf4, 0x01, 0x00, 0x00, // usec
            0x01, 0x00, // EV_KEY
            0x1e, 0x00, // KEY_A
            0x01, 0x00, 0x00, 0x00, // value
        ];
        let event = decode_event(&buf, Layout::Word32).unwrap();
        assert_eq!(event, InputEvent::new(1, 500, 1, 30, 1));
        assert_eq!(event.type_name(), "EV_KEY");
        assert_eq!(event.code_name(), "KEY_A");
    }

    #[test]
    fn test_decode_negative_value() {
        let event = InputEvent::new(5, 0, 2, 8, -1);
        for layout in [Layout::Word32, Layout::Word64] {
            let decoded = decode_event(&event.to_bytes(layout), layout).unwrap();
            assert_eq!(decoded.value, -1);
        }
    }

    #[test]
    fn test_decode_event_short() {
        let err = decode_event(&[0u8; 23], Layout::Word64).unwrap_err();
        assert_eq!(err, DecodeError::Short { got: 23, expected: 24 });
    }

    #[test]
    fn test_decode_batch_truncates_at_zero_seconds() {
        for layout in [Layout::Word32, Layout::Word64] {
            for k in 0..BATCH_SIZE {
                let events: Vec<InputEvent> = (1..=k as i64).map(sample).collect();
                let decoded = decode_batch(&batch_bytes(&events, layout), layout).unwrap();
                assert_eq!(decoded.as_slice(), events.as_slice(), "k = {k}");
            }
        }
    }

    #[test]
    fn test_decode_batch_full() {
        let events: Vec<InputEvent> = (1..=BATCH_SIZE as i64).map(sample).collect();
        let decoded = decode_batch(&batch_bytes(&events, Layout::Word64), Layout::Word64).unwrap();
        assert_eq!(decoded.len(), BATCH_SIZE);
        assert!(!decoded.spilled());
    }

    #[test]
    fn test_decode_batch_zero_seconds_mid_batch() {
        // A record stamped at second zero ends the batch even if real
        // records follow it.
        let mut events: Vec<InputEvent> = (1..=6).map(sample).collect();
        events[3].time_sec = 0;
        let decoded = decode_batch(&batch_bytes(&events, Layout::Word64), Layout::Word64).unwrap();
        assert_eq!(decoded.as_slice(), &events[..3]);
    }

    #[test]
    fn test_decode_batch_wrong_length() {
        let err = decode_batch(&[0u8; 100], Layout::Word64).unwrap_err();
        assert_eq!(err, DecodeError::Short { got: 100, expected: 384 });
    }

    #[test]
    fn test_check_read_len() {
        assert!(check_read_len(24, Layout::Word64).is_ok());
        assert!(check_read_len(384, Layout::Word64).is_ok());
        assert_eq!(
            check_read_len(0, Layout::Word64),
            Err(DecodeError::Short { got: 0, expected: 24 })
        );
        assert_eq!(
            check_read_len(30, Layout::Word64),
            Err(DecodeError::Misaligned { got: 30, record_size: 24 })
        );
    }

    #[test]
    fn test_word32_encoding_saturates_out_of_range_time() {
        let late = InputEvent::new(i64::from(i32::MAX) + 10, -5_000_000_000, 1, 30, 1);
        let decoded = decode_event(&late.to_bytes(Layout::Word32), Layout::Word32).unwrap();
        assert_eq!(decoded.time_sec, i64::from(i32::MAX));
        assert_eq!(decoded.time_usec, i64::from(i32::MIN));
        assert_eq!(decoded.value, 1);

        let decoded = decode_event(&late.to_bytes(Layout::Word64), Layout::Word64).unwrap();
        assert_eq!(decoded, late);
    }

    #[test]
    fn test_timestamp_and_display() {
        let event = InputEvent::new(12, 34, 2, 8, -1);
        assert_eq!(event.timestamp(), Duration::from_micros(12_000_034));
        assert_eq!(
            event.to_string(),
            "time 12.000034, type 2 (EV_REL), code 8 (REL_WHEEL), value -1"
        );
    }
}
