//! Stellarium telescope-control binary protocol
//!
//! Two little-endian frames are exchanged over the TCP link:
//!
//! - "current position", sent to Stellarium, 24 bytes:
//!   `size(u16)=24 | type(u16)=0 | time(u64) | ra(u32) | dec(i32) | status(i32)=0`
//! - "goto", received from Stellarium, 20 bytes:
//!   `size(u16)=20 | type(u16)=0 | time(u64) | ra(u32) | dec(i32)`
//!
//! Time is microseconds since the Unix epoch. Right ascension `[0, 24)` hours
//! spans the full `u32` range, declination `[-90, 90]` degrees maps onto
//! `[-2^30, 2^30]`.

use crate::error::{StellariumError, StellariumResult};
use chrono::{DateTime, Utc};

/// Size of the outbound "current position" frame
pub const POSITION_FRAME_SIZE: usize = 24;

/// Size of the inbound "goto" frame
pub const GOTO_FRAME_SIZE: usize = 20;

const FRAME_TYPE: u16 = 0;
const STATUS_OK: i32 = 0;

const RA_SCALE: f64 = 2147483648.0 / 12.0;
const DEC_SCALE: f64 = 1073741824.0 / 90.0;

/// Decoded "goto" request
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlewTarget {
    pub time: DateTime<Utc>,
    /// Right ascension in hours
    pub ra: f64,
    /// Declination in degrees
    pub dec: f64,
}

fn encode_time(time: DateTime<Utc>) -> StellariumResult<u64> {
    u64::try_from(time.timestamp_micros())
        .map_err(|_| StellariumError::BadTimestamp(time.to_rfc3339()))
}

fn encode_ra(ra: f64) -> u32 {
    // 24h lands on 2^32 and wraps to 0
    (ra * RA_SCALE).round().rem_euclid(4294967296.0) as u32
}

fn encode_dec(dec: f64) -> i32 {
    (dec * DEC_SCALE).round() as i32
}

fn write_header(frame: &mut [u8], time: u64, ra: u32, dec: i32) {
    let size = frame.len() as u16;
    frame[0..2].copy_from_slice(&size.to_le_bytes());
    frame[2..4].copy_from_slice(&FRAME_TYPE.to_le_bytes());
    frame[4..12].copy_from_slice(&time.to_le_bytes());
    frame[12..16].copy_from_slice(&ra.to_le_bytes());
    frame[16..20].copy_from_slice(&dec.to_le_bytes());
}

/// Encode a "current position" frame
pub fn encode_position(time: DateTime<Utc>, ra: f64, dec: f64) -> StellariumResult<[u8; POSITION_FRAME_SIZE]> {
    let mut frame = [0u8; POSITION_FRAME_SIZE];
    write_header(&mut frame, encode_time(time)?, encode_ra(ra), encode_dec(dec));
    frame[20..24].copy_from_slice(&STATUS_OK.to_le_bytes());

    tracing::debug!("Encoded position ra={:.6}h dec={:.6} -> {:?}", ra, dec, frame);
    Ok(frame)
}

/// Encode a "goto" frame, as Stellarium sends it
pub fn encode_goto(time: DateTime<Utc>, ra: f64, dec: f64) -> StellariumResult<[u8; GOTO_FRAME_SIZE]> {
    let mut frame = [0u8; GOTO_FRAME_SIZE];
    write_header(&mut frame, encode_time(time)?, encode_ra(ra), encode_dec(dec));
    Ok(frame)
}

/// Decode a "goto" frame. Bytes past the first 20 are ignored.
pub fn decode_goto(data: &[u8]) -> StellariumResult<SlewTarget> {
    if data.len() < GOTO_FRAME_SIZE {
        return Err(StellariumError::FrameTooShort {
            expected: GOTO_FRAME_SIZE,
            actual: data.len(),
        });
    }

    let mut time = [0u8; 8];
    time.copy_from_slice(&data[4..12]);
    let mut ra = [0u8; 4];
    ra.copy_from_slice(&data[12..16]);
    let mut dec = [0u8; 4];
    dec.copy_from_slice(&data[16..20]);

    let micros = u64::from_le_bytes(time);
    let secs = (micros / 1_000_000) as i64;
    let nanos = ((micros % 1_000_000) * 1_000) as u32;
    let time = DateTime::<Utc>::from_timestamp(secs, nanos)
        .ok_or_else(|| StellariumError::BadTimestamp(micros.to_string()))?;

    let ra = u32::from_le_bytes(ra) as f64 / RA_SCALE;
    let mut dec = i32::from_le_bytes(dec) as f64 / DEC_SCALE;
    if dec > 180.0 {
        dec -= 360.0;
    }

    tracing::debug!("Decoded goto {:?} -> ra={:.6}h dec={:.6}", &data[..GOTO_FRAME_SIZE], ra, dec);
    Ok(SlewTarget { time, ra, dec })
}

/// Splits a TCP byte stream into frames using the `size` prefix
#[derive(Debug, Default)]
pub struct FrameBuffer {
    pending: Vec<u8>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    /// Bytes waiting for the rest of their frame
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Take the next complete frame, if one has fully arrived
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        if self.pending.len() < 2 {
            return None;
        }

        let size = u16::from_le_bytes([self.pending[0], self.pending[1]]) as usize;
        if size < 4 {
            // Cannot resynchronize on a stream with a broken length prefix
            tracing::warn!("Discarding {} bytes with invalid frame size {}", self.pending.len(), size);
            self.pending.clear();
            return None;
        }
        if self.pending.len() < size {
            return None;
        }

        Some(self.pending.drain(..size).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const REFERENCE: [u8; 24] = [
        24, 0, 0, 0, 216, 197, 0, 228, 172, 237, 5, 0, 0, 0, 0, 128, 171, 170, 170, 234, 0, 0, 0, 0,
    ];

    fn reference_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2022, 11, 17, 16, 14, 58).unwrap() + chrono::Duration::milliseconds(967)
    }

    #[test]
    fn test_encode_position() {
        let frame = encode_position(reference_time(), 12.0, -30.0).unwrap();
        assert_eq!(frame, REFERENCE);
    }

    #[test]
    fn test_decode_goto() {
        let target = decode_goto(&REFERENCE[..20]).unwrap();
        assert_eq!(target.time, reference_time());
        assert!((target.ra - 12.0).abs() < 1e-7);
        assert!((target.dec + 30.0).abs() < 1e-7);
    }

    #[test]
    fn test_decode_short_frame() {
        assert!(matches!(
            decode_goto(&REFERENCE[..12]),
            Err(StellariumError::FrameTooShort { expected: 20, actual: 12 })
        ));
    }

    #[test]
    fn test_goto_within_quantization() {
        let ra_step = 12.0 / 2147483648.0;
        let dec_step = 90.0 / 1073741824.0;
        for (ra, dec) in [(0.0, 0.0), (5.5, 89.9), (18.25, -89.9), (23.999, 45.123456)] {
            let frame = encode_goto(reference_time(), ra, dec).unwrap();
            assert_eq!(frame[0], 20);
            let target = decode_goto(&frame).unwrap();
            assert_eq!(target.time, reference_time());
            assert!((target.ra - ra).abs() <= ra_step);
            assert!((target.dec - dec).abs() <= dec_step);
        }
    }

    #[test]
    fn test_ra_wraps_at_24_hours() {
        let frame = encode_position(reference_time(), 24.0, 0.0).unwrap();
        assert_eq!(&frame[12..16], &[0, 0, 0, 0]);
    }

    #[test]
    fn test_time_before_epoch_is_rejected() {
        let time = Utc.with_ymd_and_hms(1969, 12, 31, 0, 0, 0).unwrap();
        assert!(matches!(
            encode_position(time, 1.0, 1.0),
            Err(StellariumError::BadTimestamp(_))
        ));
    }

    #[test]
    fn test_frame_buffer_splits_coalesced_reads() {
        let a = encode_goto(reference_time(), 1.0, 2.0).unwrap();
        let b = encode_goto(reference_time(), 3.0, 4.0).unwrap();
        let mut bytes = a.to_vec();
        bytes.extend_from_slice(&b);

        let mut buffer = FrameBuffer::new();
        buffer.extend(&bytes[..7]);
        assert_eq!(buffer.next_frame(), None);

        buffer.extend(&bytes[7..]);
        assert_eq!(buffer.next_frame(), Some(a.to_vec()));
        assert_eq!(buffer.next_frame(), Some(b.to_vec()));
        assert_eq!(buffer.next_frame(), None);
        assert_eq!(buffer.pending(), 0);
    }

    #[test]
    fn test_frame_buffer_drops_broken_prefix() {
        let mut buffer = FrameBuffer::new();
        buffer.extend(&[1, 0, 9, 9, 9]);
        assert_eq!(buffer.next_frame(), None);
        assert_eq!(buffer.pending(), 0);
    }
}
