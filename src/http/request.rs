use crate::{
    errors::ErrorKind,
    http::{
        cookies::Cookies,
        types::{slice_to_usize, trim_cr, trim_prefix},
    },
    pools::Pools,
    server::connection::ConnReader,
};
use memchr::{memchr, memchr2};
use std::{
    io,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf, Take};

const FIELD_CAPACITY: usize = 32;

/// An HTTP request, reused by its worker for every connection it serves.
///
/// Only a fixed set of headers is kept; everything else on the wire is
/// parsed and dropped:
///
/// | Header            | Accessor                                      |
/// |-------------------|-----------------------------------------------|
/// | `Host`            | [`host`](Request::host)                       |
/// | `Connection`      | [`connection`](Request::connection)           |
/// | `User-Agent`      | [`user_agent`](Request::user_agent)           |
/// | `Accept`          | [`accept`](Request::accept)                   |
/// | `Accept-Encoding` | [`accept_encoding`](Request::accept_encoding) |
/// | `Accept-Language` | [`accept_language`](Request::accept_language) |
/// | `Content-Type`    | [`content_type`](Request::content_type)       |
/// | `Content-Length`  | [`content_length`](Request::content_length)   |
/// | `Cookie`          | [`cookies`](Request::cookies)                 |
///
/// Repeated `Cookie` lines merge into one store; for a key set more than
/// once, [`cookie`](Request::cookie) returns the last value.
///
/// Header names match exactly (case-sensitive). Lines end with `\n`; a
/// trailing `\r` is dropped. A `Content-Length` that is not a base-10
/// integer reads as `0`.
///
/// A request must not be kept past the handler call: its buffers are
/// truncated and refilled for the next connection.
#[derive(Debug)]
pub struct Request {
    host: Vec<u8>,
    method: Vec<u8>,
    path: Vec<u8>,
    protocol: Vec<u8>,
    connection: Vec<u8>,
    user_agent: Vec<u8>,
    accept: Vec<u8>,
    accept_encoding: Vec<u8>,
    accept_language: Vec<u8>,
    content_type: Vec<u8>,
    content_length: usize,

    /// The request body: bytes read along with the header block, then
    /// (when `Content-Length` asks for more) the rest of the connection.
    pub body: Body,
    cookies: Option<Cookies>,

    pub(crate) remote_addr: SocketAddr,
    pub(crate) worker_id: usize,
    pools: Arc<Pools>,
}

macro_rules! byte_fields {
    ($($(#[$docs:meta])* $name:ident, $name_str:ident;)+) => {
        impl Request { $(
            $(#[$docs])*
            #[inline(always)]
            pub fn $name(&self) -> &[u8] {
                &self.$name
            }

            #[doc = concat!("[`", stringify!($name), "`](Self::", stringify!($name), ") as `&str`, `None` when it is not UTF-8.")]
            #[inline]
            pub fn $name_str(&self) -> Option<&str> {
                simdutf8::basic::from_utf8(&self.$name).ok()
            }
        )+ }
    };
}

byte_fields! {
    /// `Host` header value.
    host, host_str;
    /// First token of the status line, e.g. `GET`.
    method, method_str;
    /// Second token of the status line, verbatim (query included).
    path, path_str;
    /// Third token of the status line, e.g. `HTTP/1.1`.
    protocol, protocol_str;
    connection, connection_str;
    user_agent, user_agent_str;
    accept, accept_str;
    accept_encoding, accept_encoding_str;
    accept_language, accept_language_str;
    content_type, content_type_str;
}

impl Request {
    const UNKNOWN_CLIENT: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0);

    pub(crate) fn new(pools: Arc<Pools>) -> Self {
        let field = || Vec::with_capacity(FIELD_CAPACITY);

        Request {
            host: field(),
            method: field(),
            path: field(),
            protocol: field(),
            connection: field(),
            user_agent: field(),
            accept: field(),
            accept_encoding: field(),
            accept_language: field(),
            content_type: field(),
            content_length: 0,

            body: Body::default(),
            cookies: None,

            remote_addr: Self::UNKNOWN_CLIENT,
            worker_id: 0,
            pools,
        }
    }

    /// Truncates every buffer, detaches the body and hands the cookie store
    /// back to its pool. Capacity is kept.
    pub(crate) fn clean(&mut self) {
        self.host.clear();
        self.method.clear();
        self.path.clear();
        self.protocol.clear();
        self.connection.clear();
        self.user_agent.clear();
        self.accept.clear();
        self.accept_encoding.clear();
        self.accept_language.clear();
        self.content_type.clear();
        self.content_length = 0;

        self.body.clean();

        if let Some(cookies) = self.cookies.take() {
            self.pools.cookies.release(cookies);
        }

        self.remote_addr = Self::UNKNOWN_CLIENT;
    }

    /// `Content-Length` header value, `0` when absent or malformed.
    #[inline(always)]
    pub const fn content_length(&self) -> usize {
        self.content_length
    }

    /// Cookies sent with the request, if a `Cookie` header was present.
    ///
    /// Use [`Cookies::dup`] to keep them past the handler call.
    #[inline]
    pub fn cookies(&self) -> Option<&Cookies> {
        self.cookies.as_ref()
    }

    /// Shortcut for `cookies().and_then(|c| c.get(key))`.
    #[inline]
    pub fn cookie(&self, key: &str) -> Option<&str> {
        self.cookies.as_ref()?.get(key)
    }

    #[inline(always)]
    pub const fn remote_addr(&self) -> &SocketAddr {
        &self.remote_addr
    }

    /// Index of the worker serving this request.
    #[inline(always)]
    pub const fn worker_id(&self) -> usize {
        self.worker_id
    }
}

// Parsing
impl Request {
    /// Parses the header block at the start of `bytes`.
    ///
    /// Returns the number of bytes the header block occupies (blank line
    /// included); whatever follows is body. When `bytes` ends before the
    /// blank line, all of it counts as header.
    pub(crate) fn parse(&mut self, bytes: &[u8]) -> Result<usize, ErrorKind> {
        let mut pos = self.parse_status(bytes)?;

        loop {
            let rest = &bytes[pos..];
            // Key state: runs until a colon, or a line end.
            let Some(stop) = memchr2(b':', b'\n', rest) else {
                return Ok(bytes.len());
            };

            if rest[stop] == b'\n' {
                if trim_cr(&rest[..stop]).is_empty() {
                    return Ok(pos + stop + 1);
                }
                return Err(ErrorKind::InvalidHeaderLine { consumed: pos });
            }

            // Value state: runs until the line end.
            let value_start = stop + 1;
            let Some(end) = memchr(b'\n', &rest[value_start..]) else {
                return Ok(bytes.len());
            };

            let value = trim_cr(&rest[value_start..value_start + end]);
            self.set_header(&rest[..stop], trim_prefix(value));

            pos += value_start + end + 1;
        }
    }

    fn parse_status(&mut self, bytes: &[u8]) -> Result<usize, ErrorKind> {
        let end = memchr(b'\n', bytes).ok_or(ErrorKind::InvalidHeaderStatus)?;

        let mut tokens = trim_cr(&bytes[..end]).split(|b| *b == b' ');
        let (Some(method), Some(path), Some(protocol)) = (tokens.next(), tokens.next(), tokens.next())
        else {
            return Err(ErrorKind::InvalidHeaderStatus);
        };

        self.method.extend_from_slice(method);
        self.path.extend_from_slice(path);
        self.protocol.extend_from_slice(protocol);

        Ok(end + 1)
    }

    fn set_header(&mut self, key: &[u8], value: &[u8]) {
        let field = match key {
            b"Host" => &mut self.host,
            b"Connection" => &mut self.connection,
            b"User-Agent" => &mut self.user_agent,
            b"Accept" => &mut self.accept,
            b"Accept-Encoding" => &mut self.accept_encoding,
            b"Accept-Language" => &mut self.accept_language,
            b"Content-Type" => &mut self.content_type,
            b"Content-Length" => {
                self.content_length = slice_to_usize(value).unwrap_or(0);
                return;
            }
            b"Cookie" => {
                let pools = &self.pools;
                self.cookies
                    .get_or_insert_with(|| pools.cookies.acquire())
                    .parse(value);
                return;
            }
            _ => return,
        };

        field.clear();
        field.extend_from_slice(value);
    }
}

//

/// Request body reader.
///
/// Yields the bytes that arrived together with the header block first, then
/// reads on from the connection until `Content-Length` is satisfied. Read it
/// with [`tokio::io::AsyncReadExt`].
#[derive(Debug, Default)]
pub struct Body {
    staged: Vec<u8>,
    pos: usize,
    rest: Option<Take<ConnReader>>,
}

impl Body {
    /// Installs the body for the next handler call.
    ///
    /// `rest` is only attached when `content_length` asks for more than
    /// `staged` holds.
    pub(crate) fn stage(&mut self, staged: &[u8], content_length: usize, rest: ConnReader) {
        self.staged.extend_from_slice(staged);
        self.pos = 0;

        if content_length > staged.len() {
            self.rest = Some(rest.take((content_length - staged.len()) as u64));
        }
    }

    pub(crate) fn clean(&mut self) {
        self.staged.clear();
        self.pos = 0;
        self.rest = None;
    }

    /// Bytes received together with the header block.
    #[inline]
    pub fn buffered(&self) -> &[u8] {
        &self.staged[self.pos..]
    }

    /// Whether more bytes are still to come from the connection.
    #[inline]
    pub fn is_streaming(&self) -> bool {
        self.rest.as_ref().is_some_and(|rest| rest.limit() > 0)
    }
}

impl AsyncRead for Body {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if this.pos < this.staged.len() {
            let n = buf.remaining().min(this.staged.len() - this.pos);
            buf.put_slice(&this.staged[this.pos..this.pos + n]);
            this.pos += n;
            return Poll::Ready(Ok(()));
        }

        match this.rest.as_mut() {
            Some(rest) => Pin::new(rest).poll_read(cx, buf),
            None => Poll::Ready(Ok(())),
        }
    }
}
