//! webworkers - HTTP/1.1 server engine with a fixed pool of workers
//!
//! A small server for handlers that want raw control: every connection
//! carries exactly one request, and is closed once the handler returns.
//!
//! # Design
//!
//! - **Fixed workers** - `worker_cap` long-lived tasks, each with its own
//!   bounded queue; accepted connections are assigned round-robin
//! - **Reused state** - each worker owns one [`Request`] and one
//!   [`Response`] for its whole life; buffers are truncated, never freed
//! - **Byte-level parser** - the request line and a fixed set of headers
//!   are copied out verbatim, everything else is skipped
//! - **Deferred headers** - the header block is written on the first body
//!   write, or when the handler returns
//! - **TLS** - optional, with SNI selection between certificate pairs
//!
//! # Examples
//!
//! ```no_run
//! use webworkers::{Handler, Opts, Request, Response, Webworkers};
//!
//! struct Hello;
//!
//! impl Handler for Hello {
//!     async fn handle(&self, response: &mut Response, request: &mut Request) {
//!         if request.path() != b"/" {
//!             let _ = response.status_code(404);
//!             return;
//!         }
//!
//!         let _ = response.content_type("application/json");
//!         let _ = response.write(br#"{"greeting":"Hello world!"}"#).await;
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), webworkers::Error> {
//!     let opts = Opts {
//!         worker_cap: 4,
//!         address: "127.0.0.1:8080".into(),
//!         ..Opts::default()
//!     };
//!
//!     Webworkers::new(opts, Hello)?.listen().await
//! }
//! ```
//!
//! Reading a request body:
//! ```
//! use tokio::io::AsyncReadExt;
//! use webworkers::{Handler, Request, Response};
//!
//! struct Upload;
//!
//! impl Handler for Upload {
//!     async fn handle(&self, response: &mut Response, request: &mut Request) {
//!         let mut body = Vec::with_capacity(request.content_length());
//!         if request.body.read_to_end(&mut body).await.is_err() {
//!             let _ = response.status_code(400);
//!             return;
//!         }
//!
//!         let _ = response.write(format!("{} bytes", body.len()).as_bytes()).await;
//!     }
//! }
//! ```

pub(crate) mod http {
    pub(crate) mod cookies;
    pub(crate) mod request;
    pub(crate) mod response;
    pub(crate) mod types;
}
pub(crate) mod server {
    pub(crate) mod connection;
    pub(crate) mod dispatcher;
    pub(crate) mod tls;
    pub(crate) mod worker;
}
pub(crate) mod errors;
pub mod opts;
pub mod pools;

pub use crate::{
    errors::Error,
    http::{
        cookies::{Cookie, Cookies},
        request::{Body, Request},
        response::Response,
        types::StatusCode,
    },
    opts::{ErrorOutput, Opts, TlsPair},
    server::{dispatcher::Webworkers, worker::Handler},
};
