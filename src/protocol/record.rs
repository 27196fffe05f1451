//! Record header encoding and decoding.
//!
//! Implements the fixed 8-byte FastCGI record header:
//! ```text
//! ┌─────────┬──────┬──────────┬────────────┬─────────┬──────────┐
//! │ Version │ Type │ Req ID   │ Content Len│ Padding │ Reserved │
//! │ 1 byte  │1 byte│ 2 bytes  │ 2 bytes    │ 1 byte  │ 1 byte   │
//! │   = 1   │      │ uint16 BE│ uint16 BE  │         │   = 0    │
//! └─────────┴──────┴──────────┴────────────┴─────────┴──────────┘
//! ```
//!
//! Every record's content is followed by `(8 - len % 8) % 8` zero bytes so
//! that content + padding stays 8-byte aligned.

use crate::error::{FcgiError, Result};

/// Header size in bytes (fixed, exactly 8).
pub const HEADER_SIZE: usize = 8;

/// FastCGI protocol version (always 1).
pub const VERSION_1: u8 = 1;

/// BEGIN_REQUEST body size in bytes.
pub const BEGIN_REQUEST_BODY_SIZE: usize = 8;

/// END_REQUEST body size in bytes.
pub const END_REQUEST_BODY_SIZE: usize = 8;

/// Application role for a Responder (the only role this client speaks).
pub const ROLE_RESPONDER: u16 = 1;

/// Record types defined by the FastCGI specification.
///
/// ABORT_REQUEST is reserved on the wire but never emitted by this client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordType {
    BeginRequest = 1,
    AbortRequest = 2,
    EndRequest = 3,
    Params = 4,
    Stdin = 5,
    Stdout = 6,
    Stderr = 7,
}

impl RecordType {
    /// Map a raw type byte to a known record type.
    ///
    /// Returns `None` for types this client does not understand; the read
    /// loop skips those records for forward compatibility.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(RecordType::BeginRequest),
            2 => Some(RecordType::AbortRequest),
            3 => Some(RecordType::EndRequest),
            4 => Some(RecordType::Params),
            5 => Some(RecordType::Stdin),
            6 => Some(RecordType::Stdout),
            7 => Some(RecordType::Stderr),
            _ => None,
        }
    }
}

/// Padding required after `content_length` bytes of record content.
#[inline]
pub fn padding_for(content_length: usize) -> u8 {
    ((8 - content_length % 8) % 8) as u8
}

/// Decoded FastCGI record header.
///
/// The type is kept as the raw byte so unknown record types survive decoding
/// and can be skipped instead of rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Protocol version (always 1 for records we emit).
    pub version: u8,
    /// Raw record type byte (see [`RecordType`]).
    pub record_type: u8,
    /// Request identifier (fixed per connection; no multiplexing).
    pub request_id: u16,
    /// Length of the content that follows this header.
    pub content_length: u16,
    /// Number of zero bytes following the content.
    pub padding_length: u8,
}

impl Header {
    /// Build a header for an outgoing record, computing the padding so that
    /// content + padding is 8-byte aligned.
    pub fn for_record(record_type: RecordType, request_id: u16, content_length: u16) -> Self {
        Self {
            version: VERSION_1,
            record_type: record_type as u8,
            request_id,
            content_length,
            padding_length: padding_for(content_length as usize),
        }
    }

    /// Encode the header to 8 bytes (Big Endian).
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0] = self.version;
        buf[1] = self.record_type;
        buf[2..4].copy_from_slice(&self.request_id.to_be_bytes());
        buf[4..6].copy_from_slice(&self.content_length.to_be_bytes());
        buf[6] = self.padding_length;
        // buf[7] reserved, stays 0
        buf
    }

    /// Decode a header from bytes (Big Endian).
    ///
    /// Fails with [`FcgiError::UnexpectedEof`] if fewer than 8 bytes are
    /// available.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(FcgiError::UnexpectedEof {
                phase: "decoding record header",
            });
        }
        Ok(Self {
            version: buf[0],
            record_type: buf[1],
            request_id: u16::from_be_bytes([buf[2], buf[3]]),
            content_length: u16::from_be_bytes([buf[4], buf[5]]),
            padding_length: buf[6],
        })
    }

    /// Typed view of the record type, if known.
    #[inline]
    pub fn kind(&self) -> Option<RecordType> {
        RecordType::from_u8(self.record_type)
    }
}

/// Build the 8-byte BEGIN_REQUEST body: role (BE), flags, 5 reserved zeros.
pub fn begin_request_body(role: u16, flags: u8) -> [u8; BEGIN_REQUEST_BODY_SIZE] {
    let mut body = [0u8; BEGIN_REQUEST_BODY_SIZE];
    body[0..2].copy_from_slice(&role.to_be_bytes());
    body[2] = flags;
    body
}

/// Decoded END_REQUEST body.
///
/// The engine only logs this; a non-zero `protocol_status` means the peer
/// rejected or aborted the request at the protocol level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndRequestBody {
    /// Application exit status.
    pub app_status: u32,
    /// Protocol status (0 = request complete).
    pub protocol_status: u8,
}

impl EndRequestBody {
    /// Decode from the 8-byte END_REQUEST content. Returns `None` if the
    /// peer sent a short body.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < END_REQUEST_BODY_SIZE {
            return None;
        }
        Some(Self {
            app_status: u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]),
            protocol_status: buf[4],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_encode_decode_roundtrip() {
        let original = Header::for_record(RecordType::Params, 1, 100);
        let encoded = original.encode();
        let decoded = Header::decode(&encoded).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn test_header_big_endian_byte_order() {
        let header = Header {
            version: 1,
            record_type: 6,
            request_id: 0x0102,
            content_length: 0x0304,
            padding_length: 4,
        };
        let bytes = header.encode();

        assert_eq!(bytes[0], 1);
        assert_eq!(bytes[1], 6);

        // Request ID: 0x0102 in BE
        assert_eq!(bytes[2], 0x01);
        assert_eq!(bytes[3], 0x02);

        // Content length: 0x0304 in BE
        assert_eq!(bytes[4], 0x03);
        assert_eq!(bytes[5], 0x04);

        assert_eq!(bytes[6], 4);
        assert_eq!(bytes[7], 0, "reserved byte must be zero");
    }

    #[test]
    fn test_header_size_is_exactly_8() {
        assert_eq!(HEADER_SIZE, 8);
        let header = Header::for_record(RecordType::Stdin, 1, 0);
        assert_eq!(header.encode().len(), 8);
    }

    #[test]
    fn test_decode_too_short_buffer() {
        let buf = [0u8; 7]; // One byte short
        assert!(matches!(
            Header::decode(&buf),
            Err(FcgiError::UnexpectedEof { .. })
        ));
    }

    #[test]
    fn test_roundtrip_all_record_types() {
        for rtype in [
            RecordType::BeginRequest,
            RecordType::AbortRequest,
            RecordType::EndRequest,
            RecordType::Params,
            RecordType::Stdin,
            RecordType::Stdout,
            RecordType::Stderr,
        ] {
            let header = Header::for_record(rtype, 0xBEEF, 0xFFFF);
            let decoded = Header::decode(&header.encode()).unwrap();
            assert_eq!(decoded, header);
            assert_eq!(decoded.kind(), Some(rtype));
        }
    }

    #[test]
    fn test_padding_invariant_full_range() {
        for len in 0..=65535usize {
            let pad = padding_for(len);
            assert!(pad < 8);
            assert_eq!((len + pad as usize) % 8, 0, "len={}", len);
        }
    }

    #[test]
    fn test_padding_zero_for_aligned_content() {
        assert_eq!(padding_for(0), 0);
        assert_eq!(padding_for(8), 0);
        assert_eq!(padding_for(65528), 0);
    }

    #[test]
    fn test_record_type_values_match_wire() {
        assert_eq!(RecordType::BeginRequest as u8, 1);
        assert_eq!(RecordType::AbortRequest as u8, 2);
        assert_eq!(RecordType::EndRequest as u8, 3);
        assert_eq!(RecordType::Params as u8, 4);
        assert_eq!(RecordType::Stdin as u8, 5);
        assert_eq!(RecordType::Stdout as u8, 6);
        assert_eq!(RecordType::Stderr as u8, 7);
    }

    #[test]
    fn test_unknown_record_type_decodes() {
        let header = Header {
            version: 1,
            record_type: 11,
            request_id: 1,
            content_length: 0,
            padding_length: 0,
        };
        let decoded = Header::decode(&header.encode()).unwrap();
        assert_eq!(decoded.kind(), None);
        assert_eq!(decoded.record_type, 11);
    }

    #[test]
    fn test_begin_request_body_layout() {
        let body = begin_request_body(ROLE_RESPONDER, 0);
        assert_eq!(body, [0, 1, 0, 0, 0, 0, 0, 0]);

        let body = begin_request_body(0x0203, 0xFF);
        assert_eq!(body[0], 0x02);
        assert_eq!(body[1], 0x03);
        assert_eq!(body[2], 0xFF);
        assert!(body[3..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_end_request_body_decode() {
        let mut buf = [0u8; 8];
        buf[0..4].copy_from_slice(&7u32.to_be_bytes());
        buf[4] = 0;
        let body = EndRequestBody::decode(&buf).unwrap();
        assert_eq!(body.app_status, 7);
        assert_eq!(body.protocol_status, 0);

        assert!(EndRequestBody::decode(&buf[..5]).is_none());
    }
}
