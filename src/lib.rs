//! # fcgi-client
//!
//! Async FastCGI client for talking to PHP-FPM and other FastCGI servers
//! over Unix domain sockets or TCP.
//!
//! This crate speaks the Responder role only: it translates an HTTP-like
//! request (method, script path, headers as environment variables, body)
//! into FastCGI records and reconstructs an HTTP-like response from the
//! record stream the peer returns. One request is in flight per connection
//! at a time; callers wanting parallelism hold multiple connections, and
//! retries, pooling, and backoff are layered externally.
//!
//! ## Architecture
//!
//! - **Wire format** ([`protocol`]): 8-byte record headers, padding, and
//!   the chunked name/value pair encoding for PARAMS
//! - **Request engine** ([`Client`]): BEGIN_REQUEST → PARAMS → STDIN →
//!   STDOUT/STDERR/END_REQUEST demultiplexing
//! - **Response reconstruction** ([`Response`]): CGI-style status line,
//!   headers, lazy body with transparent chunked decoding
//!
//! ## Example
//!
//! ```ignore
//! use fcgi_client::{Address, Client, Params, RequestScope};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::connect(&Address::unix("/run/php/php-fpm.sock")).await?;
//!
//!     let mut params = Params::new();
//!     params.insert("SCRIPT_FILENAME".into(), "/srv/index.php".into());
//!     params.insert("SCRIPT_NAME".into(), "/index.php".into());
//!     params.insert("SERVER_PROTOCOL".into(), "HTTP/1.1".into());
//!     params.insert("REMOTE_ADDR".into(), "127.0.0.1".into());
//!
//!     let scope = RequestScope::with_timeout(Duration::from_secs(2));
//!     let response = client.get(&scope, params).await?;
//!
//!     println!("{}", response.status);
//!     println!("{}", String::from_utf8_lossy(&response.into_bytes()?));
//!     Ok(())
//! }
//! ```

pub mod buffer;
pub mod error;
pub mod protocol;
pub mod response;
pub mod transport;

mod client;

pub use client::{Client, Config, RequestScope};
pub use error::{FcgiError, Result};
pub use protocol::Params;
pub use response::{Body, Response};
pub use transport::{Address, Transport};
