//! HTTP response reconstruction from the STDOUT byte stream.
//!
//! FastCGI applications answer with a CGI-style response: an optional status
//! line (either `HTTP/1.1 200 OK` or the CGI form `Status: 200 OK`), header
//! fields, a blank line, then the body. PHP scripts frequently skip the
//! status line entirely and sometimes the headers too, so the parser
//! degrades gracefully: a payload with no recognizable status line becomes a
//! 200 response, with any leading colon-bearing lines opportunistically
//! parsed as headers.
//!
//! The body is exposed as a lazy, single-pass reader; callers either drain
//! it incrementally via [`std::io::Read`] or take everything at once with
//! [`Response::into_bytes`].

use std::io::Read;

use bytes::{Buf, Bytes};
use http::header::TRANSFER_ENCODING;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode, Version};
use serde::de::DeserializeOwned;

use crate::error::{FcgiError, Result};

/// A reconstructed HTTP-equivalent response.
#[derive(Debug)]
pub struct Response {
    /// Status code from the status line, or 200 when none was present.
    pub status: StatusCode,
    /// Protocol version from the status line, or HTTP/1.1 when synthesized.
    pub version: Version,
    /// Reason phrase from the status line, if one was present.
    pub reason: Option<String>,
    /// Header fields, keys case-insensitive, values ordered per occurrence.
    pub headers: HeaderMap,
    body: Body,
}

impl Response {
    /// Borrow the body reader for incremental consumption.
    pub fn body_mut(&mut self) -> &mut Body {
        &mut self.body
    }

    /// Take ownership of the body reader.
    pub fn into_body(self) -> Body {
        self.body
    }

    /// Read all remaining body bytes and release the body in one shot.
    ///
    /// Chunked transfer-encoding, if declared, is decoded transparently.
    pub fn into_bytes(self) -> Result<Bytes> {
        let mut body = self.body;
        body.read_to_bytes()
    }

    /// Deserialize the remaining body as JSON.
    pub fn json<T: DeserializeOwned>(self) -> Result<T> {
        let bytes = self.into_bytes()?;
        serde_json::from_slice(&bytes)
            .map_err(|err| FcgiError::InvalidResponse(format!("decoding JSON body: {}", err)))
    }
}

/// Lazy, single-pass, non-restartable response body.
#[derive(Debug)]
pub struct Body {
    kind: BodyKind,
}

#[derive(Debug)]
enum BodyKind {
    Plain(Bytes),
    Chunked(ChunkedReader),
}

impl Body {
    fn plain(bytes: Bytes) -> Self {
        Self {
            kind: BodyKind::Plain(bytes),
        }
    }

    fn chunked(bytes: Bytes) -> Self {
        Self {
            kind: BodyKind::Chunked(ChunkedReader::new(bytes)),
        }
    }

    /// Drain the body into a single buffer, classifying decode failures.
    pub fn read_to_bytes(&mut self) -> Result<Bytes> {
        let mut out = Vec::new();
        self.read_to_end(&mut out).map_err(|err| match err.kind() {
            std::io::ErrorKind::UnexpectedEof => FcgiError::UnexpectedEof {
                phase: "reading response body",
            },
            std::io::ErrorKind::InvalidData => FcgiError::InvalidResponse(err.to_string()),
            _ => FcgiError::Read {
                phase: "reading response body",
                source: err,
            },
        })?;
        Ok(Bytes::from(out))
    }
}

impl Read for Body {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &mut self.kind {
            BodyKind::Plain(src) => {
                let n = buf.len().min(src.len());
                buf[..n].copy_from_slice(&src[..n]);
                src.advance(n);
                Ok(n)
            }
            BodyKind::Chunked(reader) => reader.read(buf),
        }
    }
}

/// Decoder for `Transfer-Encoding: chunked` over an in-memory buffer.
///
/// Chunk framing: hex size line (extensions after `;` are ignored), CRLF,
/// data, CRLF. A zero-size chunk terminates the stream; trailers are
/// discarded.
#[derive(Debug)]
struct ChunkedReader {
    src: Bytes,
    /// Bytes left in the current chunk.
    remaining: usize,
    done: bool,
}

impl ChunkedReader {
    fn new(src: Bytes) -> Self {
        Self {
            src,
            remaining: 0,
            done: false,
        }
    }

    fn next_chunk_size(&mut self) -> std::io::Result<usize> {
        let line = take_line(&mut self.src).ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "truncated chunk size")
        })?;
        let size_part = line.split(';').next().unwrap_or("").trim();
        usize::from_str_radix(size_part, 16).map_err(|_| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("invalid chunk size {:?}", size_part),
            )
        })
    }
}

impl Read for ChunkedReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.done || buf.is_empty() {
            return Ok(0);
        }

        if self.remaining == 0 {
            let size = self.next_chunk_size()?;
            if size == 0 {
                self.done = true;
                return Ok(0);
            }
            self.remaining = size;
        }

        if self.src.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "truncated chunk data",
            ));
        }

        let n = buf.len().min(self.remaining).min(self.src.len());
        buf[..n].copy_from_slice(&self.src[..n]);
        self.src.advance(n);
        self.remaining -= n;

        if self.remaining == 0 {
            // CRLF after the chunk data
            if take_line(&mut self.src).is_none() {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "missing chunk terminator",
                ));
            }
        }
        Ok(n)
    }
}

/// Consume one line (terminated by `\n`, optional preceding `\r`) from the
/// front of the buffer. Returns `None` if no full line remains.
fn take_line(src: &mut Bytes) -> Option<String> {
    let nl = src.iter().position(|&b| b == b'\n')?;
    let line = src.split_to(nl + 1);
    let mut end = line.len() - 1;
    if end > 0 && line[end - 1] == b'\r' {
        end -= 1;
    }
    Some(String::from_utf8_lossy(&line[..end]).into_owned())
}

/// Parse the accumulated STDOUT bytes into a [`Response`].
pub fn parse_response(buf: Bytes) -> Result<Response> {
    let mut lines = LineCursor::new(buf.clone());

    let first = match lines.next_line() {
        Some(line) => line,
        // No line terminator anywhere: an unterminated line is never a
        // status line or header, so the whole payload is an implied-200
        // body.
        None if !buf.is_empty() => {
            return Ok(Response {
                status: StatusCode::OK,
                version: Version::HTTP_11,
                reason: None,
                headers: HeaderMap::new(),
                body: Body::plain(buf),
            })
        }
        None => {
            return Err(FcgiError::UnexpectedEof {
                phase: "reading response status line",
            })
        }
    };

    if !first.starts_with("HTTP/") && !first.starts_with("Status:") {
        return parse_headerless(buf, first, lines);
    }

    // CGI form `Status: 404 Not Found` rewrites to a standard status line.
    let status_line = if let Some(rest) = first.strip_prefix("Status:") {
        format!("HTTP/1.1 {}", rest.trim_start())
    } else {
        first
    };

    let (version, status, reason) = parse_status_line(&status_line)?;

    let mut headers = HeaderMap::new();
    loop {
        let line = lines.next_line().ok_or(FcgiError::UnexpectedEof {
            phase: "reading response headers",
        })?;
        if line.is_empty() {
            break;
        }
        let (name, value) = split_header(&line).ok_or_else(|| {
            FcgiError::InvalidResponse(format!("malformed header line {:?}", line))
        })?;
        headers.append(name, value);
    }

    let rest = buf.slice(lines.offset()..);
    let body = if is_chunked(&headers) {
        Body::chunked(rest)
    } else {
        Body::plain(rest)
    };

    Ok(Response {
        status,
        version,
        reason,
        headers,
        body,
    })
}

/// Fallback for payloads without a status line: implied 200, whole payload
/// as body - unless the first line looks like a header, in which case
/// leading colon-bearing lines are parsed as headers and the remainder is
/// the body.
fn parse_headerless(buf: Bytes, first: String, mut lines: LineCursor) -> Result<Response> {
    let mut headers = HeaderMap::new();
    let mut body_start = 0usize;

    if first.contains(':') {
        let mut pending = Some(first);
        loop {
            let line = match pending.take() {
                Some(line) => line,
                None => {
                    body_start = lines.offset();
                    // A trailing unterminated line falls through to the body.
                    let Some(line) = lines.next_line() else { break };
                    line
                }
            };
            if line.is_empty() {
                body_start = lines.offset();
                break;
            }
            match split_header(&line) {
                Some((name, value)) => {
                    headers.append(name, value);
                }
                // Not a header after all; body starts at this line.
                None => break,
            }
        }
    }

    Ok(Response {
        status: StatusCode::OK,
        version: Version::HTTP_11,
        reason: None,
        headers,
        body: Body::plain(buf.slice(body_start..)),
    })
}

/// Parse `<protocol> <code> <reason...>`.
fn parse_status_line(line: &str) -> Result<(Version, StatusCode, Option<String>)> {
    let space = line.find(' ').ok_or_else(|| {
        FcgiError::InvalidResponse(format!("malformed status line {:?}", line))
    })?;

    let proto = &line[..space];
    let version = match proto {
        "HTTP/1.0" => Version::HTTP_10,
        "HTTP/1.1" => Version::HTTP_11,
        "HTTP/2" | "HTTP/2.0" => Version::HTTP_2,
        _ => {
            return Err(FcgiError::InvalidResponse(format!(
                "unrecognized protocol version {:?}",
                proto
            )))
        }
    };

    let rest = line[space + 1..].trim_start();
    let (code_part, reason) = match rest.find(' ') {
        Some(i) => (&rest[..i], Some(rest[i + 1..].to_string())),
        None => (rest, None),
    };

    if code_part.len() != 3 || !code_part.bytes().all(|b| b.is_ascii_digit()) {
        return Err(FcgiError::InvalidResponse(format!(
            "malformed status code {:?}",
            code_part
        )));
    }
    let code: u16 = code_part
        .parse()
        .map_err(|_| FcgiError::InvalidResponse(format!("invalid status code {:?}", code_part)))?;
    let status = StatusCode::from_u16(code)
        .map_err(|_| FcgiError::InvalidResponse(format!("invalid status code {}", code)))?;

    Ok((version, status, reason))
}

/// Split a `Name: value` line into typed header parts.
///
/// Returns `None` when the line is not a parsable header field.
fn split_header(line: &str) -> Option<(HeaderName, HeaderValue)> {
    let (name, value) = line.split_once(':')?;
    let name = HeaderName::from_bytes(name.trim().as_bytes()).ok()?;
    let value = HeaderValue::from_str(value.trim()).ok()?;
    Some((name, value))
}

/// True if the first Transfer-Encoding value is `chunked`.
fn is_chunked(headers: &HeaderMap) -> bool {
    headers
        .get_all(TRANSFER_ENCODING)
        .iter()
        .next()
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("chunked"))
        .unwrap_or(false)
}

/// Line-by-line cursor over the response buffer, tracking the byte offset of
/// unconsumed data.
struct LineCursor {
    src: Bytes,
    offset: usize,
}

impl LineCursor {
    fn new(src: Bytes) -> Self {
        Self { src, offset: 0 }
    }

    /// Consume the next `\n`-terminated line (trailing `\r` stripped).
    /// Returns `None` when no full line remains.
    fn next_line(&mut self) -> Option<String> {
        let rest = &self.src[self.offset..];
        let nl = rest.iter().position(|&b| b == b'\n')?;
        let mut end = nl;
        if end > 0 && rest[end - 1] == b'\r' {
            end -= 1;
        }
        let line = String::from_utf8_lossy(&rest[..end]).into_owned();
        self.offset += nl + 1;
        Some(line)
    }

    /// Byte offset of the first unconsumed byte.
    fn offset(&self) -> usize {
        self.offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(input: &[u8]) -> Result<Response> {
        parse_response(Bytes::copy_from_slice(input))
    }

    #[test]
    fn test_cgi_status_line() {
        let resp = parse(b"Status: 404 Not Found\r\nContent-Type: text/plain\r\n\r\nhello").unwrap();
        assert_eq!(resp.status, StatusCode::NOT_FOUND);
        assert_eq!(resp.reason.as_deref(), Some("Not Found"));
        assert_eq!(resp.headers["content-type"], "text/plain");
        assert_eq!(&resp.into_bytes().unwrap()[..], b"hello");
    }

    #[test]
    fn test_full_status_line() {
        let resp = parse(b"HTTP/1.1 500 Internal Server Error\r\nX-Powered-By: PHP\r\n\r\noops")
            .unwrap();
        assert_eq!(resp.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(resp.version, Version::HTTP_11);
        assert_eq!(&resp.into_bytes().unwrap()[..], b"oops");
    }

    #[test]
    fn test_plain_body_defaults_to_200() {
        let input = b"just a plain reply";
        let resp = parse(input).unwrap();
        assert_eq!(resp.status, StatusCode::OK);
        assert!(resp.headers.is_empty());
        assert_eq!(&resp.into_bytes().unwrap()[..], input);
    }

    #[test]
    fn test_unterminated_payload_is_whole_body() {
        // Even a colon-bearing line is body when nothing terminates it.
        let resp = parse(b"X-Note: looks like a header").unwrap();
        assert_eq!(resp.status, StatusCode::OK);
        assert!(resp.headers.is_empty());
        assert_eq!(
            &resp.into_bytes().unwrap()[..],
            b"X-Note: looks like a header"
        );
    }

    #[test]
    fn test_headerless_with_leading_header_lines() {
        let resp = parse(b"Content-Type: text/html\r\nX-Custom: 1\r\n\r\n<html></html>").unwrap();
        assert_eq!(resp.status, StatusCode::OK);
        assert_eq!(resp.headers["content-type"], "text/html");
        assert_eq!(resp.headers["x-custom"], "1");
        assert_eq!(&resp.into_bytes().unwrap()[..], b"<html></html>");
    }

    #[test]
    fn test_headerless_stops_at_unparsable_line() {
        let resp = parse(b"Content-Type: text/plain\r\nnot a header\r\nmore body").unwrap();
        assert_eq!(resp.headers.len(), 1);
        assert_eq!(
            &resp.into_bytes().unwrap()[..],
            b"not a header\r\nmore body"
        );
    }

    #[test]
    fn test_status_without_reason() {
        let resp = parse(b"Status: 204\r\n\r\n").unwrap();
        assert_eq!(resp.status, StatusCode::NO_CONTENT);
        assert_eq!(resp.reason, None);
    }

    #[test]
    fn test_malformed_status_line_no_space() {
        // Rewritten form "HTTP/1.1" alone has no separator after the code.
        let err = parse(b"HTTP/1.1\r\n\r\n").unwrap_err();
        assert!(matches!(err, FcgiError::InvalidResponse(_)), "{:?}", err);
    }

    #[test]
    fn test_status_code_not_three_digits() {
        let err = parse(b"HTTP/1.1 42 Wat\r\n\r\n").unwrap_err();
        assert!(matches!(err, FcgiError::InvalidResponse(_)));

        let err = parse(b"HTTP/1.1 4042 Wat\r\n\r\n").unwrap_err();
        assert!(matches!(err, FcgiError::InvalidResponse(_)));
    }

    #[test]
    fn test_status_code_not_numeric() {
        let err = parse(b"HTTP/1.1 4x4 Wat\r\n\r\n").unwrap_err();
        assert!(matches!(err, FcgiError::InvalidResponse(_)));
    }

    #[test]
    fn test_unrecognized_protocol_version() {
        let err = parse(b"HTTP/9.9 200 OK\r\n\r\n").unwrap_err();
        assert!(matches!(err, FcgiError::InvalidResponse(_)));
    }

    #[test]
    fn test_unknown_protocol_token_takes_headerless_fallback() {
        // A first line not starting with HTTP/ or Status: is not a status
        // line at all.
        let resp = parse(b"HTCPCP/1.0 418 I'm a teapot\r\n\r\nsteep").unwrap();
        assert_eq!(resp.status, StatusCode::OK);
        assert_eq!(
            &resp.into_bytes().unwrap()[..],
            b"HTCPCP/1.0 418 I'm a teapot\r\n\r\nsteep"
        );
    }

    #[test]
    fn test_truncated_headers() {
        let err = parse(b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\n").unwrap_err();
        assert!(matches!(
            err,
            FcgiError::UnexpectedEof {
                phase: "reading response headers"
            }
        ));
    }

    #[test]
    fn test_header_values_ordered_per_occurrence() {
        let resp =
            parse(b"HTTP/1.1 200 OK\r\nSet-Cookie: a=1\r\nSet-Cookie: b=2\r\n\r\n").unwrap();
        let cookies: Vec<_> = resp.headers.get_all("set-cookie").iter().collect();
        assert_eq!(cookies, vec!["a=1", "b=2"]);
    }

    #[test]
    fn test_chunked_body_decoded() {
        let resp = parse(
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n",
        )
        .unwrap();
        assert_eq!(&resp.into_bytes().unwrap()[..], b"hello world");
    }

    #[test]
    fn test_chunked_with_extension() {
        let resp = parse(
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5;ext=1\r\nhello\r\n0\r\n\r\n",
        )
        .unwrap();
        assert_eq!(&resp.into_bytes().unwrap()[..], b"hello");
    }

    #[test]
    fn test_chunked_invalid_size() {
        let resp = parse(
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\nzz\r\nhello\r\n0\r\n\r\n",
        )
        .unwrap();
        let err = resp.into_bytes().unwrap_err();
        assert!(matches!(err, FcgiError::InvalidResponse(_)));
    }

    #[test]
    fn test_chunked_truncated_data() {
        let resp =
            parse(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\nA\r\nhel").unwrap();
        let err = resp.into_bytes().unwrap_err();
        assert!(matches!(err, FcgiError::UnexpectedEof { .. }));
    }

    #[test]
    fn test_incremental_body_read() {
        let mut resp = parse(b"HTTP/1.1 200 OK\r\n\r\nabcdef").unwrap();
        let mut buf = [0u8; 4];
        let n = resp.body_mut().read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"abcd");
        let n = resp.body_mut().read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"ef");
        assert_eq!(resp.body_mut().read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_json_body() {
        #[derive(serde::Deserialize)]
        struct Payload {
            ok: bool,
        }
        let resp =
            parse(b"Status: 200 OK\r\nContent-Type: application/json\r\n\r\n{\"ok\":true}")
                .unwrap();
        let payload: Payload = resp.json().unwrap();
        assert!(payload.ok);
    }

    #[test]
    fn test_json_invalid_body() {
        let resp = parse(b"HTTP/1.1 200 OK\r\n\r\nnot json").unwrap();
        let err = resp.json::<serde_json::Value>().unwrap_err();
        assert!(matches!(err, FcgiError::InvalidResponse(_)));
    }

    #[test]
    fn test_empty_payload_is_eof() {
        let err = parse(b"").unwrap_err();
        assert!(matches!(err, FcgiError::UnexpectedEof { .. }));
    }

    #[test]
    fn test_lf_only_line_endings() {
        let resp = parse(b"Status: 301 Moved\nLocation: /new\n\nbye").unwrap();
        assert_eq!(resp.status, StatusCode::MOVED_PERMANENTLY);
        assert_eq!(resp.headers["location"], "/new");
        assert_eq!(&resp.into_bytes().unwrap()[..], b"bye");
    }
}
