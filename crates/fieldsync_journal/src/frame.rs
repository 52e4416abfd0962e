//! Frame envelope for journal records.
//!
//! Layout (little-endian):
//!
//! ```text
//! magic (4) | version (2) | kind (1) | length (4) | payload (length) | crc32 (4)
//! ```
//!
//! The CRC covers every byte before it. A frame cut short at the end of the
//! journal is a torn write and marks the end of valid data; a complete frame
//! with a bad magic or checksum is corruption.

use crate::error::{JournalError, JournalResult};

/// Magic bytes opening every frame.
pub const FRAME_MAGIC: [u8; 4] = *b"FSJR";

/// Current frame format version.
pub const FRAME_VERSION: u16 = 1;

/// magic (4) + version (2) + kind (1) + length (4)
pub const HEADER_SIZE: usize = 11;

/// Trailing checksum size.
pub const CRC_SIZE: usize = 4;

/// Largest payload a frame can carry.
pub const MAX_PAYLOAD_SIZE: usize = u32::MAX as usize;

/// What a frame's payload holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    /// A single CBOR-encoded record.
    Record = 1,
}

impl FrameKind {
    /// Converts a byte to a frame kind.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Record),
            _ => None,
        }
    }

    /// Converts the frame kind to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

/// A decoded frame and where it sits in the journal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Offset of the frame's first byte.
    pub offset: u64,
    /// Frame kind.
    pub kind: FrameKind,
    /// Raw payload bytes.
    pub payload: Vec<u8>,
}

impl Frame {
    /// Total encoded length of this frame.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.payload.len() + CRC_SIZE
    }
}

/// Wraps `payload` in a frame envelope.
///
/// # Errors
///
/// Returns [`JournalError::RecordTooLarge`] if the payload does not fit the
/// 4-byte length field.
pub fn encode_frame(kind: FrameKind, payload: &[u8]) -> JournalResult<Vec<u8>> {
    let len = u32::try_from(payload.len()).map_err(|_| JournalError::RecordTooLarge {
        size: payload.len(),
        max: MAX_PAYLOAD_SIZE,
    })?;

    let mut data = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
    data.extend_from_slice(&FRAME_MAGIC);
    data.extend_from_slice(&FRAME_VERSION.to_le_bytes());
    data.push(kind.as_byte());
    data.extend_from_slice(&len.to_le_bytes());
    data.extend_from_slice(payload);

    let crc = compute_crc32(&data);
    data.extend_from_slice(&crc.to_le_bytes());
    Ok(data)
}

/// Result of scanning a journal buffer.
#[derive(Debug, Default)]
pub struct Scan {
    /// Every complete, valid frame in order.
    pub frames: Vec<Frame>,
    /// Length of the valid prefix. Anything past it is a torn tail.
    pub valid_len: u64,
}

impl Scan {
    /// Returns true if bytes past the last valid frame were found.
    #[must_use]
    pub fn has_torn_tail(&self, total_len: u64) -> bool {
        self.valid_len < total_len
    }
}

/// Decodes every frame in `data`.
///
/// Stops quietly at a truncated trailing frame.
///
/// # Errors
///
/// Returns [`JournalError::Corrupted`] on a bad magic, unsupported version,
/// unknown kind or checksum mismatch in a complete frame.
pub fn scan_frames(data: &[u8]) -> JournalResult<Scan> {
    let mut scan = Scan::default();
    let mut pos = 0usize;

    while pos < data.len() {
        let offset = pos as u64;
        let rest = &data[pos..];
        if rest.len() < HEADER_SIZE {
            break;
        }

        if rest[0..4] != FRAME_MAGIC {
            return Err(JournalError::corrupted(offset, "bad frame magic"));
        }
        let version = u16::from_le_bytes([rest[4], rest[5]]);
        if version != FRAME_VERSION {
            return Err(JournalError::corrupted(
                offset,
                format!("unsupported frame version {version}"),
            ));
        }
        let kind = FrameKind::from_byte(rest[6])
            .ok_or_else(|| JournalError::corrupted(offset, format!("unknown frame kind {}", rest[6])))?;
        let len = u32::from_le_bytes([rest[7], rest[8], rest[9], rest[10]]) as usize;

        let total = HEADER_SIZE + len + CRC_SIZE;
        if rest.len() < total {
            break;
        }

        let body_end = HEADER_SIZE + len;
        let stored = u32::from_le_bytes([
            rest[body_end],
            rest[body_end + 1],
            rest[body_end + 2],
            rest[body_end + 3],
        ]);
        if compute_crc32(&rest[..body_end]) != stored {
            return Err(JournalError::corrupted(offset, "checksum mismatch"));
        }

        scan.frames.push(Frame {
            offset,
            kind,
            payload: rest[HEADER_SIZE..body_end].to_vec(),
        });
        pos += total;
        scan.valid_len = pos as u64;
    }

    Ok(scan)
}

/// CRC-32 (IEEE polynomial).
#[must_use]
pub fn compute_crc32(data: &[u8]) -> u32 {
    const TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ TABLE[index];
    }
    !crc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc32_known_value() {
        assert_eq!(compute_crc32(b"123456789"), 0xCBF4_3926);
        assert_eq!(compute_crc32(b""), 0);
    }

    #[test]
    fn scan_reads_consecutive_frames() {
        let mut data = encode_frame(FrameKind::Record, b"first").unwrap();
        let second_offset = data.len() as u64;
        data.extend(encode_frame(FrameKind::Record, b"second").unwrap());

        let scan = scan_frames(&data).unwrap();
        assert_eq!(scan.frames.len(), 2);
        assert_eq!(scan.frames[0].payload, b"first");
        assert_eq!(scan.frames[1].offset, second_offset);
        assert_eq!(scan.valid_len, data.len() as u64);
        assert!(!scan.has_torn_tail(data.len() as u64));
    }

    #[test]
    fn torn_tail_ends_scan() {
        let mut data = encode_frame(FrameKind::Record, b"kept").unwrap();
        let valid = data.len() as u64;
        let torn = encode_frame(FrameKind::Record, b"half written").unwrap();
        data.extend_from_slice(&torn[..torn.len() - 3]);

        let scan = scan_frames(&data).unwrap();
        assert_eq!(scan.frames.len(), 1);
        assert_eq!(scan.valid_len, valid);
        assert!(scan.has_torn_tail(data.len() as u64));
    }

    #[test]
    fn checksum_mismatch_is_corruption() {
        let mut data = encode_frame(FrameKind::Record, b"payload").unwrap();
        data[HEADER_SIZE] ^= 0x01;

        let err = scan_frames(&data).unwrap_err();
        assert!(matches!(err, JournalError::Corrupted { offset: 0, .. }));
    }

    #[test]
    fn bad_magic_is_corruption() {
        let mut data = encode_frame(FrameKind::Record, b"payload").unwrap();
        data[0] = b'X';
        assert!(matches!(
            scan_frames(&data),
            Err(JournalError::Corrupted { .. })
        ));
    }

    #[test]
    fn frame_kind_bytes() {
        assert_eq!(FrameKind::from_byte(1), Some(FrameKind::Record));
        assert_eq!(FrameKind::from_byte(0), None);
        assert_eq!(FrameKind::Record.as_byte(), 1);
    }
}
