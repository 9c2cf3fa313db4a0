//! Log record types and wire codec.
//!
//! Every persisted entry is one `LogRecord` framed as:
//!
//! ```text
//! | crc32 (4, LE) | type (1) | key_size (varint, <=5) | value_size (varint, <=5) | key | value |
//! ```
//!
//! The CRC covers every byte after the CRC field itself. The size fields
//! use zig-zag signed varints, so the header spans 7 to 15 bytes. A header
//! that decodes to all zeroes marks the end of a segment.
//!
//! Record keys as written to disk carry an unsigned-varint sequence-number
//! prefix; `0` denotes a non-transactional write. [`encode_key_with_seq`]
//! and [`parse_key_with_seq`] convert between the user key and the
//! prefixed form.

pub(crate) mod varint;

use crate::error::{Error, Result};
use varint::{decode_uvarint, decode_varint, encode_uvarint, encode_varint, MAX_VARINT32_LEN};

/// Size of the CRC field at the front of a record.
pub const CRC_SIZE: usize = 4;

/// Maximum encoded size of a record header.
pub const MAX_HEADER_SIZE: usize = CRC_SIZE + 1 + 2 * MAX_VARINT32_LEN;

/// Sequence number of non-transactional writes.
pub const NON_TXN_SEQ_NO: u64 = 0;

/// Kind of a persisted record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordType {
    /// A live key-value pair.
    Normal = 0,
    /// A tombstone: the key is deleted.
    Deleted = 1,
    /// Sentinel making a batch's preceding records visible to recovery.
    TxnFinished = 2,
}

impl RecordType {
    /// Converts a byte to a record type.
    #[must_use]
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::Normal),
            1 => Some(Self::Deleted),
            2 => Some(Self::TxnFinished),
            _ => None,
        }
    }

    /// Converts the record type to its wire byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

/// The atomic unit persisted to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Record key as written, including the sequence-number prefix.
    pub key: Vec<u8>,
    /// Record value; empty for tombstones and batch sentinels.
    pub value: Vec<u8>,
    /// Record kind.
    pub record_type: RecordType,
}

impl LogRecord {
    /// Encodes the record into its wire form.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(MAX_HEADER_SIZE + self.key.len() + self.value.len());

        buf.extend_from_slice(&[0u8; CRC_SIZE]);
        buf.push(self.record_type.as_byte());
        encode_varint(self.key.len() as i64, &mut buf);
        encode_varint(self.value.len() as i64, &mut buf);
        buf.extend_from_slice(&self.key);
        buf.extend_from_slice(&self.value);

        let crc = crc32fast::hash(&buf[CRC_SIZE..]);
        buf[..CRC_SIZE].copy_from_slice(&crc.to_le_bytes());

        buf
    }

    /// Returns the encoded size of this record.
    #[must_use]
    pub fn encoded_size(&self) -> usize {
        let mut header = Vec::with_capacity(MAX_HEADER_SIZE);
        let mut len = CRC_SIZE + 1;
        len += encode_varint(self.key.len() as i64, &mut header);
        len += encode_varint(self.value.len() as i64, &mut header);
        len + self.key.len() + self.value.len()
    }
}

/// Decoded header fields of one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    /// Stored checksum over everything after the CRC field.
    pub crc: u32,
    /// Record kind.
    pub record_type: RecordType,
    /// Length of the key in bytes.
    pub key_size: u32,
    /// Length of the value in bytes.
    pub value_size: u32,
}

/// Outcome of decoding a header from a byte window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DecodedHeader {
    /// Too few bytes to decode anything.
    Unreadable,
    /// The all-zero end-of-segment marker.
    EndOfSegment,
    /// Enough bytes, but the fields do not form a valid header.
    Corrupt,
    /// A well-formed header and its encoded length.
    Header {
        /// The decoded fields.
        header: RecordHeader,
        /// Bytes the header occupied.
        len: usize,
    },
}

/// Decodes a record header from the front of `buf`.
///
/// `buf` is the clamped window read at the record offset; it may be
/// shorter than [`MAX_HEADER_SIZE`] near the end of a file.
pub(crate) fn decode_header(buf: &[u8]) -> DecodedHeader {
    if buf.len() <= CRC_SIZE {
        return DecodedHeader::Unreadable;
    }

    let crc = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
    let type_byte = buf[CRC_SIZE];
    let mut index = CRC_SIZE + 1;

    let Some((key_size, n)) = decode_varint(&buf[index..]) else {
        return DecodedHeader::Unreadable;
    };
    index += n;

    let Some((value_size, n)) = decode_varint(&buf[index..]) else {
        return DecodedHeader::Unreadable;
    };
    index += n;

    if crc == 0 && key_size == 0 && value_size == 0 {
        return DecodedHeader::EndOfSegment;
    }

    let Some(record_type) = RecordType::from_byte(type_byte) else {
        return DecodedHeader::Corrupt;
    };

    if !(0..=i64::from(u32::MAX)).contains(&key_size)
        || !(0..=i64::from(u32::MAX)).contains(&value_size)
    {
        return DecodedHeader::Corrupt;
    }

    DecodedHeader::Header {
        header: RecordHeader {
            crc,
            record_type,
            key_size: key_size as u32,
            value_size: value_size as u32,
        },
        len: index,
    }
}

/// Computes the checksum of a record from its parts.
///
/// `header_tail` is the header without its leading CRC field.
pub(crate) fn compute_record_crc(header_tail: &[u8], key: &[u8], value: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(header_tail);
    hasher.update(key);
    hasher.update(value);
    hasher.finalize()
}

/// The in-memory pointer to one persisted record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordLocation {
    /// ID of the containing segment file.
    pub file_id: u32,
    /// Byte position of the record's first byte.
    pub offset: i64,
    /// Encoded length of the record (header + key + value).
    pub size: u32,
}

impl RecordLocation {
    /// Encodes the location for storage as a hint-file value.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(20);
        encode_uvarint(u64::from(self.file_id), &mut buf);
        encode_varint(self.offset, &mut buf);
        encode_uvarint(u64::from(self.size), &mut buf);
        buf
    }

    /// Decodes a location from a hint-file value.
    ///
    /// # Errors
    ///
    /// Returns a corruption error if the bytes do not form a location.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut index = 0;

        let (file_id, n) =
            decode_uvarint(&buf[index..]).ok_or_else(|| Error::corrupted("location file id"))?;
        index += n;

        let (offset, n) =
            decode_varint(&buf[index..]).ok_or_else(|| Error::corrupted("location offset"))?;
        index += n;

        let (size, _) =
            decode_uvarint(&buf[index..]).ok_or_else(|| Error::corrupted("location size"))?;

        if file_id > u64::from(u32::MAX) || size > u64::from(u32::MAX) {
            return Err(Error::corrupted("location field out of range"));
        }

        Ok(Self {
            file_id: file_id as u32,
            offset,
            size: size as u32,
        })
    }
}

/// Prepends the unsigned-varint sequence number to a user key.
#[must_use]
pub fn encode_key_with_seq(key: &[u8], seq_no: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(key.len() + 10);
    encode_uvarint(seq_no, &mut buf);
    buf.extend_from_slice(key);
    buf
}

/// Splits a persisted record key into the user key and its sequence number.
///
/// A key without a decodable prefix is returned whole with sequence `0`;
/// encoded keys always carry a valid prefix, so this only arises on
/// corrupt input that the CRC check has already let through.
#[must_use]
pub fn parse_key_with_seq(key: &[u8]) -> (&[u8], u64) {
    match decode_uvarint(key) {
        Some((seq_no, n)) => (&key[n..], seq_no),
        None => (key, 0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> LogRecord {
        LogRecord {
            key: encode_key_with_seq(b"user:1001", NON_TXN_SEQ_NO),
            value: b"alice".to_vec(),
            record_type: RecordType::Normal,
        }
    }

    #[test]
    fn encode_then_decode_header() {
        let record = sample_record();
        let encoded = record.encode();

        match decode_header(&encoded) {
            DecodedHeader::Header { header, len } => {
                assert_eq!(header.record_type, RecordType::Normal);
                assert_eq!(header.key_size as usize, record.key.len());
                assert_eq!(header.value_size as usize, record.value.len());
                assert_eq!(len + record.key.len() + record.value.len(), encoded.len());

                let crc = compute_record_crc(&encoded[CRC_SIZE..len], &record.key, &record.value);
                assert_eq!(crc, header.crc);
            }
            other => panic!("expected header, got {other:?}"),
        }
    }

    #[test]
    fn encoded_size_matches_encoding() {
        for record in [
            sample_record(),
            LogRecord {
                key: encode_key_with_seq(b"k", 42),
                value: Vec::new(),
                record_type: RecordType::Deleted,
            },
            LogRecord {
                key: encode_key_with_seq(b"big", NON_TXN_SEQ_NO),
                value: vec![7u8; 4096],
                record_type: RecordType::Normal,
            },
        ] {
            assert_eq!(record.encoded_size(), record.encode().len());
        }
    }

    #[test]
    fn tombstone_with_empty_value() {
        let record = LogRecord {
            key: encode_key_with_seq(b"gone", NON_TXN_SEQ_NO),
            value: Vec::new(),
            record_type: RecordType::Deleted,
        };
        let encoded = record.encode();

        match decode_header(&encoded) {
            DecodedHeader::Header { header, .. } => {
                assert_eq!(header.record_type, RecordType::Deleted);
                assert_eq!(header.value_size, 0);
            }
            other => panic!("expected header, got {other:?}"),
        }
    }

    #[test]
    fn zero_bytes_decode_as_end_of_segment() {
        let buf = [0u8; MAX_HEADER_SIZE];
        assert_eq!(decode_header(&buf), DecodedHeader::EndOfSegment);
    }

    #[test]
    fn short_window_is_unreadable() {
        assert_eq!(decode_header(&[]), DecodedHeader::Unreadable);
        assert_eq!(decode_header(&[0, 0, 0, 0]), DecodedHeader::Unreadable);
    }

    #[test]
    fn unknown_type_byte_is_corrupt() {
        let mut encoded = sample_record().encode();
        encoded[CRC_SIZE] = 0x7F;
        assert_eq!(decode_header(&encoded), DecodedHeader::Corrupt);
    }

    #[test]
    fn crc_detects_flipped_value_bit() {
        let record = sample_record();
        let mut encoded = record.encode();
        let last = encoded.len() - 1;
        encoded[last] ^= 0x01;

        let DecodedHeader::Header { header, len } = decode_header(&encoded) else {
            panic!("header must still decode");
        };
        let (key, rest) = encoded[len..].split_at(header.key_size as usize);
        let crc = compute_record_crc(&encoded[CRC_SIZE..len], key, rest);
        assert_ne!(crc, header.crc);
    }

    #[test]
    fn key_with_seq_roundtrip() {
        for seq in [0u64, 1, 127, 128, 1 << 20, u64::MAX] {
            let encoded = encode_key_with_seq(b"some-key", seq);
            let (key, parsed) = parse_key_with_seq(&encoded);
            assert_eq!(key, b"some-key");
            assert_eq!(parsed, seq);
        }
    }

    #[test]
    fn non_transactional_prefix_is_one_zero_byte() {
        let encoded = encode_key_with_seq(b"k", NON_TXN_SEQ_NO);
        assert_eq!(encoded, vec![0, b'k']);
    }

    #[test]
    fn location_roundtrip() {
        let locations = [
            RecordLocation {
                file_id: 0,
                offset: 0,
                size: 17,
            },
            RecordLocation {
                file_id: 42,
                offset: 1 << 33,
                size: u32::MAX,
            },
        ];

        for loc in locations {
            assert_eq!(RecordLocation::decode(&loc.encode()).unwrap(), loc);
        }
    }

    #[test]
    fn location_decode_rejects_garbage() {
        assert!(RecordLocation::decode(&[]).is_err());
        assert!(RecordLocation::decode(&[0x80]).is_err());
    }
}
