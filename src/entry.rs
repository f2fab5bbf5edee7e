//! On-disk record encoding.
//!
//! Every record is a 29-byte meta header followed by the raw key and value
//! bytes:
//!
//! ```text
//! | crc:4 | timestamp:8 | flag:1 | key_size:8 | value_size:8 | key | value |
//! ```
//!
//! All multi-byte integers are little-endian. The CRC covers everything
//! after the CRC field: the rest of the header, then the key, then the
//! value.

use crate::error::{Error, Result};

/// Size in bytes of the fixed meta header.
pub const META_SIZE: usize = 4 + 8 + 1 + 8 + 8;

const CRC_OFFSET: usize = 0;
const TIMESTAMP_OFFSET: usize = 4;
const FLAG_OFFSET: usize = 12;
const KEY_SIZE_OFFSET: usize = 13;
const VALUE_SIZE_OFFSET: usize = 21;

/// Record kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flag {
    Put = 0,
    Delete = 1,
}

impl Flag {
    fn from_u8(v: u8) -> Result<Self> {
        match v {
            0 => Ok(Flag::Put),
            1 => Ok(Flag::Delete),
            other => Err(Error::UnknownFlag(other)),
        }
    }
}

/// The decoded fixed-size portion of a record.
#[derive(Debug, Clone, Copy)]
pub struct Meta {
    pub crc: u32,
    pub timestamp: u64,
    pub flag: Flag,
    pub key_size: u64,
    pub value_size: u64,
}

impl Meta {
    /// Total on-disk size of the record this meta header describes.
    pub fn record_size(&self) -> u64 {
        META_SIZE as u64 + self.key_size + self.value_size
    }

    /// Parses a meta header out of exactly `META_SIZE` bytes.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < META_SIZE {
            return Err(Error::ShortRead { expected: META_SIZE, got: buf.len() });
        }
        let crc = u32::from_le_bytes(buf[CRC_OFFSET..CRC_OFFSET + 4].try_into().unwrap());
        let timestamp =
            u64::from_le_bytes(buf[TIMESTAMP_OFFSET..TIMESTAMP_OFFSET + 8].try_into().unwrap());
        let flag = Flag::from_u8(buf[FLAG_OFFSET])?;
        let key_size =
            u64::from_le_bytes(buf[KEY_SIZE_OFFSET..KEY_SIZE_OFFSET + 8].try_into().unwrap());
        let value_size =
            u64::from_le_bytes(buf[VALUE_SIZE_OFFSET..VALUE_SIZE_OFFSET + 8].try_into().unwrap());
        Ok(Self { crc, timestamp, flag, key_size, value_size })
    }
}

/// A fully decoded record: meta header plus key/value payload.
#[derive(Debug, Clone)]
pub struct Entry {
    pub timestamp: u64,
    pub flag: Flag,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl Entry {
    pub fn new_put(key: &[u8], value: &[u8], timestamp: u64) -> Self {
        Self { timestamp, flag: Flag::Put, key: key.to_vec(), value: value.to_vec() }
    }

    pub fn new_tombstone(key: &[u8], timestamp: u64) -> Self {
        Self { timestamp, flag: Flag::Delete, key: key.to_vec(), value: Vec::new() }
    }

    /// Encodes this entry to its on-disk representation: meta header (with
    /// CRC computed over everything after the CRC field) followed by key and
    /// value bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(META_SIZE + self.key.len() + self.value.len());
        buf.extend_from_slice(&[0u8; 4]); // crc placeholder, filled in below
        buf.extend_from_slice(&self.timestamp.to_le_bytes());
        buf.push(self.flag as u8);
        buf.extend_from_slice(&(self.key.len() as u64).to_le_bytes());
        buf.extend_from_slice(&(self.value.len() as u64).to_le_bytes());
        buf.extend_from_slice(&self.key);
        buf.extend_from_slice(&self.value);

        let crc = crc_of(&buf[4..META_SIZE], &self.key, &self.value);
        buf[CRC_OFFSET..CRC_OFFSET + 4].copy_from_slice(&crc.to_le_bytes());
        buf
    }
}

/// Slices `key_size + value_size` payload bytes out of `buf` into owned
/// key/value vectors. Fails if `buf` is shorter than the combined size.
pub fn decode_payload(buf: &[u8], key_size: usize, value_size: usize) -> Result<(Vec<u8>, Vec<u8>)> {
    let need = key_size + value_size;
    if buf.len() < need {
        return Err(Error::ShortRead { expected: need, got: buf.len() });
    }
    Ok((buf[..key_size].to_vec(), buf[key_size..need].to_vec()))
}

/// CRC-32 (IEEE polynomial) over the header tail (everything after the CRC
/// field), then the key, then the value.
pub fn crc_of(header_tail: &[u8], key: &[u8], value: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(header_tail);
    hasher.update(key);
    hasher.update(value);
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_roundtrip_put() {
        let entry = Entry::new_put(b"foo", b"bar", 1234);
        let encoded = entry.encode();
        assert_eq!(encoded.len(), META_SIZE + 3 + 3);

        let meta = Meta::decode(&encoded[..META_SIZE]).unwrap();
        assert_eq!(meta.flag, Flag::Put);
        assert_eq!(meta.timestamp, 1234);
        assert_eq!(meta.key_size, 3);
        assert_eq!(meta.value_size, 3);

        let (key, value) =
            decode_payload(&encoded[META_SIZE..], meta.key_size as usize, meta.value_size as usize)
                .unwrap();
        assert_eq!(key, b"foo");
        assert_eq!(value, b"bar");

        let crc = crc_of(&encoded[4..META_SIZE], &key, &value);
        assert_eq!(crc, meta.crc);
    }

    #[test]
    fn encode_decode_roundtrip_tombstone() {
        let entry = Entry::new_tombstone(b"foo", 42);
        let encoded = entry.encode();
        let meta = Meta::decode(&encoded[..META_SIZE]).unwrap();
        assert_eq!(meta.flag, Flag::Delete);
        assert_eq!(meta.value_size, 0);
        assert_eq!(meta.key_size, 3);
    }

    #[test]
    fn decode_payload_too_short_errors() {
        let err = decode_payload(b"ab", 3, 3).unwrap_err();
        assert!(matches!(err, Error::ShortRead { expected: 6, got: 2 }));
    }

    #[test]
    fn unknown_flag_errors() {
        let mut buf = [0u8; META_SIZE];
        buf[FLAG_OFFSET] = 7;
        let err = Meta::decode(&buf).unwrap_err();
        assert!(matches!(err, Error::UnknownFlag(7)));
    }

    #[test]
    fn crc_mismatch_is_detectable() {
        let entry = Entry::new_put(b"k", b"v", 1);
        let mut encoded = entry.encode();
        // flip a byte in the value payload
        let last = encoded.len() - 1;
        encoded[last] ^= 0xff;

        let meta = Meta::decode(&encoded[..META_SIZE]).unwrap();
        let (key, value) =
            decode_payload(&encoded[META_SIZE..], meta.key_size as usize, meta.value_size as usize)
                .unwrap();
        let crc = crc_of(&encoded[4..META_SIZE], &key, &value);
        assert_ne!(crc, meta.crc);
    }
}
