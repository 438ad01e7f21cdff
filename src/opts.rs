//! Server configuration
//!
//! [`Opts`] is validated once by [`Webworkers::new`](crate::Webworkers::new)
//! and never changes afterwards. Every violation is reported at once:
//!
//! ```
//! use webworkers::{Error, Opts};
//!
//! let opts = Opts {
//!     worker_cap: 0,
//!     queue_len: 0,
//!     ..Opts::default()
//! };
//!
//! match opts.validate() {
//!     Err(Error::InvalidOpts(errs)) => assert_eq!(errs.len(), 2),
//!     other => panic!("{other:?}"),
//! }
//! ```
//!
//! Field names follow the `camelCase` of the configuration files this server
//! has traditionally been run with, so any serde format can load it:
//!
//! ```text
//! { "workerCap": 4, "queueLen": 128, "address": "0.0.0.0:443",
//!   "tls": true, "certs": [{ "crt": "site.crt", "key": "site.key" }] }
//! ```

use crate::errors::Error;
use serde::Deserialize;
use std::{fmt, io, path::PathBuf, sync::Mutex};
use tracing::{level_filters::LevelFilter, Dispatch};
use tracing_subscriber::fmt::{writer::BoxMakeWriter, MakeWriter};

/// Options for one [`Webworkers`](crate::Webworkers) instance.
#[derive(Debug, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Opts {
    /// Number of workers, each a long-lived task (default: `8`).
    pub worker_cap: usize,
    /// Capacity of each worker's connection queue (default: `128`).
    ///
    /// The accept loop waits when the selected worker's queue is full.
    pub queue_len: usize,
    /// Address to listen on, `host:port` (default: `0.0.0.0:8080`).
    pub address: String,

    /// Serve TLS instead of plain TCP (default: `false`).
    pub tls: bool,
    /// Certificate/key pairs, required when `tls` is set. The pair matching
    /// the client's SNI name is used, the first one otherwise.
    pub certs: Vec<TlsPair>,

    /// Size of the buffer the request header block is read into
    /// (default: `8 KiB`).
    ///
    /// A header block longer than this is cut at the buffer end: what was
    /// read counts as header, and the unread remainder stays on the
    /// connection, where [`Request::body`](crate::Request::body) reads it as
    /// body if `Content-Length` asks for bytes. Body bytes past the buffer
    /// are streamed the same way.
    pub read_buffer_size: usize,

    /// Where per-connection failures and lifecycle events go (default: stderr).
    #[serde(skip)]
    pub error_output: ErrorOutput,
}

impl Default for Opts {
    fn default() -> Self {
        Self {
            worker_cap: 8,
            queue_len: 128,
            address: String::from("0.0.0.0:8080"),

            tls: false,
            certs: Vec::new(),

            read_buffer_size: 8 * 1024,
            error_output: ErrorOutput::default(),
        }
    }
}

impl Opts {
    /// Checks every field, reporting all violations together.
    pub fn validate(&self) -> Result<(), Error> {
        let mut errs = Vec::new();

        if self.worker_cap == 0 {
            errs.push(Error::EmptyWorkers);
        }
        if self.queue_len == 0 {
            errs.push(Error::EmptyQueue);
        }
        if self.address.is_empty() {
            errs.push(Error::EmptyAddress);
        }
        if self.read_buffer_size == 0 {
            errs.push(Error::EmptyReadBuffer);
        }
        if self.tls && self.certs.is_empty() {
            errs.push(Error::EmptyCerts);
        }

        Error::from_list(errs)
    }
}

/// A PEM certificate chain and its private key.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TlsPair {
    pub crt: PathBuf,
    pub key: PathBuf,
}

impl TlsPair {
    pub fn new(crt: impl Into<PathBuf>, key: impl Into<PathBuf>) -> Self {
        Self {
            crt: crt.into(),
            key: key.into(),
        }
    }
}

/// Destination of the server's log output.
///
/// Scoped to one server: its events never reach the global subscriber, and
/// two servers in one process can log to different places.
pub struct ErrorOutput {
    writer: BoxMakeWriter,
    level: LevelFilter,
}

impl ErrorOutput {
    /// Logs through any `tracing_subscriber` writer factory.
    pub fn new<W>(make_writer: W) -> Self
    where
        W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
    {
        Self {
            writer: BoxMakeWriter::new(make_writer),
            level: LevelFilter::INFO,
        }
    }

    /// Logs into a single shared writer, e.g. a file or a `Vec<u8>`.
    pub fn from_writer<W>(writer: W) -> Self
    where
        W: io::Write + Send + 'static,
    {
        Self::new(Mutex::new(writer))
    }

    pub fn stderr() -> Self {
        Self::new(io::stderr)
    }

    /// Most verbose level written (default: `INFO`). Per-connection detail
    /// is logged at `DEBUG`.
    pub fn with_level(mut self, level: impl Into<LevelFilter>) -> Self {
        self.level = level.into();
        self
    }

    pub(crate) fn into_dispatch(self) -> Dispatch {
        let subscriber = tracing_subscriber::fmt()
            .with_writer(self.writer)
            .with_max_level(self.level)
            .with_ansi(false)
            .with_target(false)
            .finish();

        Dispatch::new(subscriber)
    }
}

impl Default for ErrorOutput {
    fn default() -> Self {
        Self::stderr()
    }
}

impl fmt::Debug for ErrorOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorOutput")
            .field("level", &self.level)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn defaults_are_valid() {
        assert!(Opts::default().validate().is_ok());
    }

    #[test]
    fn validate() {
        #[rustfmt::skip]
        let cases: [(fn(&mut Opts), &str); 6] = [
            (|o| o.worker_cap = 0,       "worker capacity must be greater than zero"),
            (|o| o.queue_len = 0,        "queue length must be greater than zero"),
            (|o| o.address.clear(),      "address cannot be empty"),
            (|o| o.read_buffer_size = 0, "read buffer size must be greater than zero"),
            (|o| o.tls = true,           "number of certificates must be greater than zero if TLS is enabled"),
            (|o| {
                o.tls = true;
                o.certs.push(TlsPair::new("a.crt", "a.key"));
            }, ""),
        ];

        for (edit, expected) in cases {
            let mut opts = Opts::default();
            edit(&mut opts);
            match opts.validate() {
                Ok(()) => assert_eq!(expected, ""),
                Err(e) => assert_eq!(e.to_string(), expected),
            }
        }
    }

    #[test]
    fn validate_collects_all() {
        let opts = Opts {
            worker_cap: 0,
            queue_len: 0,
            address: String::new(),
            ..Opts::default()
        };

        match opts.validate() {
            Err(Error::InvalidOpts(errs)) => {
                assert!(matches!(
                    errs.as_slice(),
                    [Error::EmptyWorkers, Error::EmptyQueue, Error::EmptyAddress]
                ));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn deserialize() {
        let opts: Opts = serde_json::from_str(
            r#"{
                "workerCap": 2,
                "address": "127.0.0.1:9000",
                "tls": true,
                "certs": [{ "crt": "site.crt", "key": "site.key" }]
            }"#,
        )
        .unwrap();

        assert_eq!(opts.worker_cap, 2);
        assert_eq!(opts.queue_len, 128);
        assert_eq!(opts.address, "127.0.0.1:9000");
        assert!(opts.tls);
        assert_eq!(opts.certs, [TlsPair::new("site.crt", "site.key")]);
        assert_eq!(opts.read_buffer_size, 8192);
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn output_is_scoped() {
        let captured = Captured::default();
        let dispatch = ErrorOutput::from_writer(captured.clone()).into_dispatch();

        tracing::dispatcher::with_default(&dispatch, || {
            tracing::warn!("queued connection dropped");
            tracing::debug!("filtered out");
        });
        tracing::warn!("not captured");

        let out = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(out.contains("WARN"));
        assert!(out.contains("queued connection dropped"));
        assert!(!out.contains("filtered out"));
        assert!(!out.contains("not captured"));
    }
}
