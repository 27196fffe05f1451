//! Name/value pair encoding for PARAMS records.
//!
//! Each pair is encoded as length(name), length(value), name bytes, value
//! bytes. A length below 128 takes a single byte; longer values take 4 bytes
//! Big Endian with bit 31 set. Pairs carry no ordering guarantee within a
//! record.

use std::collections::HashMap;

use bytes::{BufMut, BytesMut};

/// Request parameters: environment-variable-style string keys and values
/// (`SCRIPT_FILENAME`, `REQUEST_METHOD`, ...).
pub type Params = HashMap<String, String>;

/// Threshold below which a length is encoded as a single byte.
const SHORT_LENGTH_LIMIT: usize = 128;

/// High bit marking a 4-byte length.
const LONG_LENGTH_FLAG: u32 = 1 << 31;

/// Encode a single length field into the buffer.
fn put_length(buf: &mut BytesMut, len: usize) {
    if len < SHORT_LENGTH_LIMIT {
        buf.put_u8(len as u8);
    } else {
        buf.put_u32(len as u32 | LONG_LENGTH_FLAG);
    }
}

/// Encode one name/value pair into the buffer.
pub fn encode_pair(buf: &mut BytesMut, name: &str, value: &str) {
    put_length(buf, name.len());
    put_length(buf, value.len());
    buf.put_slice(name.as_bytes());
    buf.put_slice(value.as_bytes());
}

/// Encode all pairs into the buffer, ready to become one PARAMS record's
/// content.
pub fn encode_params(buf: &mut BytesMut, params: &Params) {
    for (name, value) in params {
        encode_pair(buf, name, value);
    }
}

/// Decode a single length field.
///
/// Returns `(length, bytes_consumed)`, or `None` if the buffer is too short.
pub fn decode_length(buf: &[u8]) -> Option<(usize, usize)> {
    let first = *buf.first()?;
    if first < SHORT_LENGTH_LIMIT as u8 {
        return Some((first as usize, 1));
    }
    if buf.len() < 4 {
        return None;
    }
    let raw = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
    Some(((raw & !LONG_LENGTH_FLAG) as usize, 4))
}

/// Decode one name/value pair.
///
/// Returns `(name, value, bytes_consumed)`, or `None` if the buffer does not
/// hold a complete pair.
pub fn decode_pair(buf: &[u8]) -> Option<(String, String, usize)> {
    let (name_len, n) = decode_length(buf)?;
    let (value_len, m) = decode_length(&buf[n..])?;
    let start = n + m;
    let end = start + name_len + value_len;
    if buf.len() < end {
        return None;
    }
    let name = String::from_utf8_lossy(&buf[start..start + name_len]).into_owned();
    let value = String::from_utf8_lossy(&buf[start + name_len..end]).into_owned();
    Some((name, value, end))
}
