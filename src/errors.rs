use std::{fmt, io, path::PathBuf};

/// Errors surfaced to callers of [`Webworkers`](crate::Webworkers) and to
/// request handlers.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// `worker_cap` was set to zero.
    #[error("worker capacity must be greater than zero")]
    EmptyWorkers,
    /// `queue_len` was set to zero.
    #[error("queue length must be greater than zero")]
    EmptyQueue,
    /// `address` was left empty.
    #[error("address cannot be empty")]
    EmptyAddress,
    /// `read_buffer_size` was set to zero.
    #[error("read buffer size must be greater than zero")]
    EmptyReadBuffer,
    /// TLS is enabled but no certificate pairs were configured.
    #[error("number of certificates must be greater than zero if TLS is enabled")]
    EmptyCerts,
    /// Several option violations at once.
    #[error("invalid options: {}", List(.0))]
    InvalidOpts(Vec<Error>),

    /// `listen` was called on an instance that is already listening.
    #[error("cannot listen on an instance already listening")]
    IsListening,
    /// An action was attempted on a closed instance.
    #[error("cannot perform action on closed instance")]
    IsClosed,

    /// Header mutation after the header block went out on the wire.
    #[error("headers already sent")]
    HeadersSent,
    /// The status code is not in the supported table.
    #[error("invalid status code: {0}")]
    InvalidStatusCode(u16),
    /// The response has no live connection attached.
    #[error("response is not attached to a connection")]
    NotConnected,

    /// A certificate/key pair could not be loaded.
    #[error("cannot load TLS pair ({crt}, {key}): {source}")]
    TlsPair {
        crt: PathBuf,
        key: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("TLS configuration: {0}")]
    Tls(#[from] rustls::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

struct List<'a>(&'a [Error]);

impl fmt::Display for List<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{err}")?;
        }

        Ok(())
    }
}

impl Error {
    /// Collapses a list of violations: `Ok` for none, the error itself for
    /// one, [`Error::InvalidOpts`] for several.
    pub(crate) fn from_list(mut errs: Vec<Error>) -> Result<(), Error> {
        match errs.len() {
            0 => Ok(()),
            1 => Err(errs.remove(0)),
            _ => Err(Error::InvalidOpts(errs)),
        }
    }
}

/// Failures local to a single connection. Logged by the worker, never
/// propagated past it.
#[derive(Debug, thiserror::Error)]
pub(crate) enum ErrorKind {
    #[error("invalid header status")]
    InvalidHeaderStatus,
    #[error("malformed header line after {consumed} bytes")]
    InvalidHeaderLine { consumed: usize },
    #[error("connection closed before a request was received")]
    EmptyRequest,
    #[error("TLS handshake failed: {0}")]
    Handshake(#[source] io::Error),
    #[error(transparent)]
    Response(#[from] Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl PartialEq for ErrorKind {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::InvalidHeaderLine { consumed: a }, Self::InvalidHeaderLine { consumed: b }) => {
                a == b
            }
            (Self::Io(a), Self::Io(b)) | (Self::Handshake(a), Self::Handshake(b)) => {
                a.kind() == b.kind()
            }
            (Self::Response(a), Self::Response(b)) => a.to_string() == b.to_string(),
            _ => std::mem::discriminant(self) == std::mem::discriminant(other),
        }
    }
}
