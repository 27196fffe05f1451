//! Protocol module - record framing and name/value pair encoding.
//!
//! This module implements the binary FastCGI wire format:
//! - 8-byte record header encoding/decoding with the padding invariant
//! - BEGIN_REQUEST / END_REQUEST body layouts
//! - Name/value pair encoding for PARAMS records

mod params;
mod record;

pub use params::{decode_length, decode_pair, encode_pair, encode_params, Params};
pub use record::{
    begin_request_body, padding_for, EndRequestBody, Header, RecordType, BEGIN_REQUEST_BODY_SIZE,
    END_REQUEST_BODY_SIZE, HEADER_SIZE, ROLE_RESPONDER, VERSION_1,
};
