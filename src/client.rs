//! FastCGI client connection and request engine.
//!
//! A [`Client`] owns exactly one established connection and drives the full
//! Responder exchange for one request at a time:
//!
//! 1. BEGIN_REQUEST (role = Responder, flags = 0)
//! 2. One PARAMS record with all name/value pairs, then an empty PARAMS
//!    record terminating the stream (sent even for zero parameters)
//! 3. STDIN records chunked to at most [`Config::max_write_size`] bytes,
//!    then an empty STDIN record (sent even without a body)
//! 4. A read loop demultiplexing STDOUT/STDERR/END_REQUEST records
//!
//! The whole exchange runs while holding the connection's lock, so requests
//! on one connection are strictly sequential; callers wanting parallelism
//! hold multiple independent connections. Cancellation is polled between
//! protocol phases and every blocking read/write runs under the caller's
//! deadline (or [`Config::request_timeout`] when the caller set none).
//!
//! # Example
//!
//! ```ignore
//! use fcgi_client::{Address, Client, Params, RequestScope};
//!
//! let client = Client::connect(&Address::unix("/run/php/php-fpm.sock")).await?;
//!
//! let mut params = Params::new();
//! params.insert("SCRIPT_FILENAME".into(), "/srv/index.php".into());
//! params.insert("SERVER_PROTOCOL".into(), "HTTP/1.1".into());
//!
//! let scope = RequestScope::with_timeout(std::time::Duration::from_secs(2));
//! let response = client.get(&scope, params).await?;
//! println!("{}", response.status);
//! ```

use std::future::Future;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::buffer::BufferPool;
use crate::error::{FcgiError, Result};
use crate::protocol::{
    begin_request_body, encode_params, EndRequestBody, Header, Params, RecordType, HEADER_SIZE,
    ROLE_RESPONDER,
};
use crate::response::{parse_response, Response};
use crate::transport::{Address, Transport};

/// Default maximum STDIN chunk size: slightly under the 16-bit content
/// length ceiling and the protocol's advisory 64 KB-per-record guidance.
pub const DEFAULT_MAX_WRITE_SIZE: usize = 65_500;

/// Default connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default request timeout, applied only when the caller's scope carries no
/// deadline.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Request identifier used for every request on a connection. The wire
/// format supports multiplexing; this client does not, so the id is fixed.
const REQUEST_ID: u16 = 1;

/// Configuration for client behavior.
#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum size of a single STDIN record's content.
    pub max_write_size: usize,
    /// Timeout for establishing the initial connection.
    pub connect_timeout: Duration,
    /// Default per-request timeout when the scope has no deadline.
    pub request_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_write_size: DEFAULT_MAX_WRITE_SIZE,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// Cancellation token plus optional absolute deadline for one request.
///
/// The token is polled between protocol phases and raced against every
/// blocking read/write, so cancellation is honored promptly even while no
/// I/O is pending. Cancelling after records have been sent is not rolled
/// back; the peer may already be processing a partial request, so the
/// recommended recovery is to close the connection and redial.
#[derive(Debug, Clone)]
pub struct RequestScope {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl RequestScope {
    /// Scope with no deadline and a fresh, never-cancelled token.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: None,
        }
    }

    /// Scope whose deadline is `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new().deadline(Instant::now() + timeout)
    }

    /// Set an absolute deadline.
    pub fn deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Attach an externally controlled cancellation token.
    pub fn token(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    /// The scope's cancellation token.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.token
    }

    /// Fail fast if the token has already fired.
    fn check(&self, phase: &'static str) -> Result<()> {
        if self.token.is_cancelled() {
            Err(FcgiError::Cancelled { phase })
        } else {
            Ok(())
        }
    }
}

impl Default for RequestScope {
    fn default() -> Self {
        Self::new()
    }
}

/// Mutable connection state, all behind the client's lock.
#[derive(Debug)]
struct Inner<S> {
    stream: S,
    /// Scratch buffer for assembling outgoing records.
    scratch: BytesMut,
    pool: BufferPool,
    closed: bool,
}

/// A FastCGI client connection (Responder role).
///
/// Generic over the transport stream so tests can drive it with an
/// in-process duplex pipe; production code uses [`Transport`].
#[derive(Debug)]
pub struct Client<S = Transport> {
    inner: Mutex<Inner<S>>,
    config: Config,
}

impl Client<Transport> {
    /// Dial the given address with default configuration.
    pub async fn connect(address: &Address) -> Result<Self> {
        Self::connect_with_config(address, Config::default()).await
    }

    /// Dial the given address with custom configuration.
    pub async fn connect_with_config(address: &Address, config: Config) -> Result<Self> {
        let stream = Transport::connect(address, config.connect_timeout).await?;
        Ok(Self::with_config(stream, config))
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> Client<S> {
    /// Wrap an already established stream with default configuration.
    pub fn new(stream: S) -> Self {
        Self::with_config(stream, Config::default())
    }

    /// Wrap an already established stream with custom configuration.
    ///
    /// `max_write_size` is clamped to `1..=65_535`: a record's content
    /// length is a u16 on the wire, and zero-sized chunks cannot carry a
    /// body.
    pub fn with_config(stream: S, mut config: Config) -> Self {
        config.max_write_size = config.max_write_size.clamp(1, u16::MAX as usize);
        Self {
            inner: Mutex::new(Inner {
                stream,
                scratch: BytesMut::new(),
                pool: BufferPool::new(),
                closed: false,
            }),
            config,
        }
    }

    /// This client's configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Close the connection.
    ///
    /// Idempotent: the first call shuts the transport down, later calls are
    /// no-ops. All subsequent operations fail with [`FcgiError::Closed`]
    /// without touching the transport.
    pub async fn close(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return Ok(());
        }
        inner.closed = true;
        inner
            .stream
            .shutdown()
            .await
            .map_err(|err| FcgiError::write(err, "closing connection"))
    }

    /// Send a GET-equivalent request: no body, `CONTENT_LENGTH=0`.
    pub async fn get(&self, scope: &RequestScope, mut params: Params) -> Result<Response> {
        params.insert("REQUEST_METHOD".into(), "GET".into());
        params.insert("CONTENT_LENGTH".into(), "0".into());
        self.request(scope, &params, None::<&[u8]>).await
    }

    /// Send a POST-equivalent request with an in-memory body.
    ///
    /// Sets `CONTENT_LENGTH` from the body and defaults `CONTENT_TYPE` to
    /// form-urlencoded when the caller did not supply one.
    pub async fn post(
        &self,
        scope: &RequestScope,
        mut params: Params,
        body: &[u8],
    ) -> Result<Response> {
        params.insert("REQUEST_METHOD".into(), "POST".into());
        params.insert("CONTENT_LENGTH".into(), body.len().to_string());
        params
            .entry("CONTENT_TYPE".into())
            .or_insert_with(|| "application/x-www-form-urlencoded".into());
        self.request(scope, &params, Some(body)).await
    }

    /// Drive a full request/response exchange.
    ///
    /// `params` carries the CGI environment (`SCRIPT_FILENAME`,
    /// `REQUEST_METHOD`, ...); `body` is an optional request body stream,
    /// buffered fully before transmission. A failure at any phase leaves
    /// the connection in an indeterminate protocol state; callers should
    /// treat mid-request failures as connection-invalidating.
    pub async fn request<B: AsyncRead + Unpin>(
        &self,
        scope: &RequestScope,
        params: &Params,
        body: Option<B>,
    ) -> Result<Response> {
        scope.check("starting request")?;

        let mut inner = self.inner.lock().await;
        if inner.closed {
            return Err(FcgiError::Closed);
        }

        let deadline = scope
            .deadline
            .unwrap_or_else(|| Instant::now() + self.config.request_timeout);

        let payload = self.exchange(&mut inner, scope, deadline, params, body).await?;
        parse_response(payload)
    }

    /// The protocol state machine: BEGIN → PARAMS → STDIN → read loop.
    async fn exchange<B: AsyncRead + Unpin>(
        &self,
        inner: &mut Inner<S>,
        scope: &RequestScope,
        deadline: Instant,
        params: &Params,
        body: Option<B>,
    ) -> Result<Bytes> {
        let begin = begin_request_body(ROLE_RESPONDER, 0);
        self.write_record(
            inner,
            scope,
            deadline,
            RecordType::BeginRequest,
            &begin,
            "writing begin request",
        )
        .await?;
        scope.check("writing params")?;

        let mut encoded = inner.pool.acquire();
        encode_params(&mut encoded, params);
        let result = self
            .write_record(
                inner,
                scope,
                deadline,
                RecordType::Params,
                &encoded,
                "writing params",
            )
            .await;
        inner.pool.release(encoded);
        result?;

        // End-of-params marker, mandatory even for zero parameters.
        self.write_record(
            inner,
            scope,
            deadline,
            RecordType::Params,
            &[],
            "writing empty params",
        )
        .await?;
        scope.check("writing request body")?;

        if let Some(mut body) = body {
            let mut data = inner.pool.acquire();
            let result = read_body(&mut data, &mut body, scope, deadline).await;
            if let Err(err) = result {
                inner.pool.release(data);
                return Err(err);
            }
            for chunk in data.chunks(self.config.max_write_size) {
                scope.check("writing request body")?;
                self.write_record(
                    inner,
                    scope,
                    deadline,
                    RecordType::Stdin,
                    chunk,
                    "writing stdin chunk",
                )
                .await?;
            }
            inner.pool.release(data);
        }

        // End-of-stdin marker, mandatory even without a body.
        self.write_record(
            inner,
            scope,
            deadline,
            RecordType::Stdin,
            &[],
            "writing empty stdin",
        )
        .await?;

        self.read_response(inner, scope, deadline).await
    }

    /// Assemble header + content + zero padding in the scratch buffer and
    /// write it to the transport in one call.
    async fn write_record(
        &self,
        inner: &mut Inner<S>,
        scope: &RequestScope,
        deadline: Instant,
        record_type: RecordType,
        content: &[u8],
        phase: &'static str,
    ) -> Result<()> {
        debug_assert!(content.len() <= u16::MAX as usize);

        let header = Header::for_record(record_type, REQUEST_ID, content.len() as u16);
        inner.scratch.clear();
        inner.scratch.extend_from_slice(&header.encode());
        inner.scratch.extend_from_slice(content);
        inner.scratch.put_bytes(0, header.padding_length as usize);

        tracing::trace!(
            record_type = header.record_type,
            content_length = header.content_length,
            padding = header.padding_length,
            "writing record"
        );

        let Inner {
            stream, scratch, ..
        } = inner;
        guarded(
            scope,
            deadline,
            phase,
            stream.write_all(&scratch[..]),
            FcgiError::write,
        )
        .await
    }

    /// Read and demultiplex records until the response is complete.
    ///
    /// STDOUT content accumulates into the returned buffer; STDERR is
    /// logged and discarded; unknown record types are skipped. An
    /// END_REQUEST with no accumulated output does not terminate the loop;
    /// the stream either produces output or ends.
    async fn read_response(
        &self,
        inner: &mut Inner<S>,
        scope: &RequestScope,
        deadline: Instant,
    ) -> Result<Bytes> {
        let mut output = inner.pool.acquire();
        let mut end_request_seen = false;

        loop {
            scope.check("reading response")?;

            let mut head = [0u8; HEADER_SIZE];
            match read_exact_into(inner, scope, deadline, &mut head, "reading record header").await
            {
                Ok(()) => {}
                Err(FcgiError::UnexpectedEof { .. }) if end_request_seen && !output.is_empty() => {
                    break;
                }
                Err(err) => {
                    inner.pool.release(output);
                    return Err(err);
                }
            }

            let header = Header::decode(&head)?;
            let content_length = header.content_length as usize;
            let padding = header.padding_length as usize;

            let result = match header.kind() {
                Some(RecordType::Stdout) => {
                    let start = output.len();
                    output.resize(start + content_length, 0);
                    let res = read_exact_into(
                        inner,
                        scope,
                        deadline,
                        &mut output[start..],
                        "reading response body",
                    )
                    .await;
                    match res {
                        Ok(()) => discard(inner, scope, deadline, padding, "reading padding").await,
                        err => err,
                    }
                }
                Some(RecordType::Stderr) => {
                    let res = read_stderr(inner, scope, deadline, content_length).await;
                    match res {
                        Ok(()) => discard(inner, scope, deadline, padding, "reading padding").await,
                        err => err,
                    }
                }
                Some(RecordType::EndRequest) => {
                    let res =
                        read_end_request(inner, scope, deadline, content_length, padding).await;
                    match res {
                        Ok(()) => {
                            end_request_seen = true;
                            if !output.is_empty() {
                                break;
                            }
                            Ok(())
                        }
                        err => err,
                    }
                }
                // Unknown or unexpected record types are skipped for
                // forward compatibility.
                _ => {
                    tracing::debug!(record_type = header.record_type, "skipping record");
                    discard(
                        inner,
                        scope,
                        deadline,
                        content_length + padding,
                        "skipping record",
                    )
                    .await
                }
            };

            if let Err(err) = result {
                inner.pool.release(output);
                return Err(err);
            }
        }

        let payload = output.split().freeze();
        inner.pool.release(output);
        Ok(payload)
    }
}

/// Buffer the caller's request body fully before chunked transmission.
async fn read_body<B: AsyncRead + Unpin>(
    data: &mut BytesMut,
    body: &mut B,
    scope: &RequestScope,
    deadline: Instant,
) -> Result<()> {
    loop {
        let n = guarded(
            scope,
            deadline,
            "reading request body",
            body.read_buf(data),
            FcgiError::read,
        )
        .await?;
        if n == 0 {
            return Ok(());
        }
    }
}

/// Read exactly `buf.len()` bytes from the transport.
async fn read_exact_into<S: AsyncRead + AsyncWrite + Unpin>(
    inner: &mut Inner<S>,
    scope: &RequestScope,
    deadline: Instant,
    buf: &mut [u8],
    phase: &'static str,
) -> Result<()> {
    if buf.is_empty() {
        return Ok(());
    }
    let fut = inner.stream.read_exact(buf);
    guarded(scope, deadline, phase, fut, FcgiError::read)
        .await
        .map(|_| ())
}

/// Read and discard `count` bytes (padding or skipped record content).
async fn discard<S: AsyncRead + AsyncWrite + Unpin>(
    inner: &mut Inner<S>,
    scope: &RequestScope,
    deadline: Instant,
    count: usize,
    phase: &'static str,
) -> Result<()> {
    if count == 0 {
        return Ok(());
    }
    inner.scratch.clear();
    inner.scratch.resize(count, 0);
    let Inner {
        stream, scratch, ..
    } = inner;
    let fut = stream.read_exact(&mut scratch[..]);
    guarded(scope, deadline, phase, fut, FcgiError::read)
        .await
        .map(|_| ())
}

/// Consume a STDERR record's content; diagnostic output is surfaced via
/// logging only, never merged into the response.
async fn read_stderr<S: AsyncRead + AsyncWrite + Unpin>(
    inner: &mut Inner<S>,
    scope: &RequestScope,
    deadline: Instant,
    content_length: usize,
) -> Result<()> {
    if content_length == 0 {
        return Ok(());
    }
    inner.scratch.clear();
    inner.scratch.resize(content_length, 0);
    let Inner {
        stream, scratch, ..
    } = inner;
    let fut = stream.read_exact(&mut scratch[..]);
    guarded(scope, deadline, "reading stderr", fut, FcgiError::read).await?;
    tracing::warn!(
        stderr = %String::from_utf8_lossy(&inner.scratch),
        "discarding stderr output from peer"
    );
    Ok(())
}

/// Consume an END_REQUEST record, logging the peer's reported status.
async fn read_end_request<S: AsyncRead + AsyncWrite + Unpin>(
    inner: &mut Inner<S>,
    scope: &RequestScope,
    deadline: Instant,
    content_length: usize,
    padding: usize,
) -> Result<()> {
    if content_length == 0 {
        return discard(inner, scope, deadline, padding, "reading end request").await;
    }
    inner.scratch.clear();
    inner.scratch.resize(content_length, 0);
    let Inner {
        stream, scratch, ..
    } = inner;
    let fut = stream.read_exact(&mut scratch[..]);
    guarded(scope, deadline, "reading end request", fut, FcgiError::read).await?;
    if let Some(body) = EndRequestBody::decode(&inner.scratch) {
        tracing::debug!(
            app_status = body.app_status,
            protocol_status = body.protocol_status,
            "end request received"
        );
    }
    discard(inner, scope, deadline, padding, "reading end request").await
}

/// Run one blocking I/O operation under the scope's cancellation token and
/// the request deadline, classifying failures.
async fn guarded<T, F>(
    scope: &RequestScope,
    deadline: Instant,
    phase: &'static str,
    fut: F,
    classify: fn(std::io::Error, &'static str) -> FcgiError,
) -> Result<T>
where
    F: Future<Output = std::io::Result<T>>,
{
    tokio::select! {
        biased;
        _ = scope.token.cancelled() => Err(FcgiError::Cancelled { phase }),
        res = tokio::time::timeout_at(deadline, fut) => match res {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(classify(err, phase)),
            Err(_) => Err(FcgiError::Timeout { phase }),
        },
    }
}
