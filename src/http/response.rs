use crate::{
    errors::Error,
    http::{cookies::Cookies, types::StatusCode},
    pools::Pools,
    server::connection::ConnWriter,
};
use std::{sync::Arc, time::SystemTime};
use tokio::io::AsyncWriteExt;

const SERVER: &[u8] = concat!("Server: webworkers/", env!("CARGO_PKG_VERSION"), "\r\n").as_bytes();
const CONTENT_TYPE: &[u8] = b"Content-Type: ";
const CONNECTION: &[u8] = b"Connection: close\r\n";
const DATE: &[u8] = b"Date: ";
const LAST_MODIFIED: &[u8] = b"Last-Modified: ";
const SET_COOKIE: &[u8] = b"Set-Cookie: ";

/// HTTP response for one connection, reused by its worker.
///
/// Status, content type and cookies are buffered until the first
/// [`write`](Response::write), which sends the header block ahead of the
/// body. After that point they can no longer change:
///
/// ```text
/// HTTP/1.1 200 OK
/// Server: webworkers/0.1.0
/// Content-Type: application/json
/// Connection: close
/// Date: Sun, 06 Nov 1994 08:49:37 GMT
/// Last-Modified: Sun, 06 Nov 1994 08:49:37 GMT
/// Set-Cookie: session=abc; Path=/
///
/// <body>
/// ```
///
/// `Content-Type` is always present, empty unless set. When a handler
/// returns without writing, the header block goes out with an empty body.
/// The connection is always closed afterwards; there is no `Content-Length`
/// and no chunking.
#[derive(Debug)]
pub struct Response {
    headers_sent: bool,
    conn: Option<ConnWriter>,

    status: StatusCode,
    content_type: Vec<u8>,
    cookies: Option<Cookies>,

    pools: Arc<Pools>,
}

impl Response {
    pub(crate) fn new(pools: Arc<Pools>) -> Self {
        Self {
            headers_sent: false,
            conn: None,

            status: StatusCode::Ok,
            content_type: Vec::with_capacity(32),
            cookies: None,

            pools,
        }
    }

    #[inline]
    pub(crate) fn attach(&mut self, conn: ConnWriter) {
        self.conn = Some(conn);
    }

    /// Resets to the initial state, detaching (and dropping) the connection.
    pub(crate) fn clean(&mut self) {
        self.headers_sent = false;
        self.conn = None;

        self.status = StatusCode::Ok;
        self.content_type.clear();

        if let Some(cookies) = self.cookies.take() {
            self.pools.cookies.release(cookies);
        }
    }

    /// Sends the header block if nothing was written, then flushes and
    /// shuts the write side down.
    pub(crate) async fn finish(&mut self) -> Result<(), Error> {
        if !self.headers_sent {
            self.send_headers().await?;
        }

        let conn = self.conn.as_mut().ok_or(Error::NotConnected)?;
        conn.flush().await?;
        conn.shutdown().await?;
        Ok(())
    }
}

// Headers
impl Response {
    /// Sets the status code from its number.
    ///
    /// # Errors
    /// - [`Error::HeadersSent`] after the first write
    /// - [`Error::InvalidStatusCode`] for codes outside [`StatusCode`]
    pub fn status_code(&mut self, code: u16) -> Result<(), Error> {
        self.check_pending()?;
        self.status = StatusCode::from_u16(code)?;
        Ok(())
    }

    /// Same as [`status_code`](Self::status_code), without the lookup.
    pub fn set_status(&mut self, status: StatusCode) -> Result<(), Error> {
        self.check_pending()?;
        self.status = status;
        Ok(())
    }

    #[inline]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Replaces the `Content-Type` value.
    pub fn content_type(&mut self, value: &str) -> Result<(), Error> {
        self.check_pending()?;
        self.content_type.clear();
        self.content_type.extend_from_slice(value.as_bytes());
        Ok(())
    }

    /// Adds a `Set-Cookie` line, or replaces the one already set for `key`.
    ///
    /// An empty `path` and a `None` expiry are left out of the header.
    pub fn set_cookie(
        &mut self,
        key: &str,
        value: &str,
        path: &str,
        expires: Option<SystemTime>,
    ) -> Result<(), Error> {
        self.check_pending()?;

        let pools = &self.pools;
        self.cookies
            .get_or_insert_with(|| pools.cookies.acquire())
            .set(key, value, path, expires);
        Ok(())
    }

    /// Cookies queued for the header block.
    #[inline]
    pub fn cookies(&self) -> Option<&Cookies> {
        self.cookies.as_ref()
    }

    #[inline]
    pub fn headers_sent(&self) -> bool {
        self.headers_sent
    }

    #[inline]
    fn check_pending(&self) -> Result<(), Error> {
        match self.headers_sent {
            true => Err(Error::HeadersSent),
            false => Ok(()),
        }
    }

    fn write_head(&self, buffer: &mut Vec<u8>) {
        let now = httpdate::fmt_http_date(SystemTime::now());

        buffer.extend_from_slice(self.status.first_line());
        buffer.extend_from_slice(SERVER);

        buffer.extend_from_slice(CONTENT_TYPE);
        buffer.extend_from_slice(&self.content_type);
        buffer.extend_from_slice(b"\r\n");

        buffer.extend_from_slice(CONNECTION);

        for name in [DATE, LAST_MODIFIED] {
            buffer.extend_from_slice(name);
            buffer.extend_from_slice(now.as_bytes());
            buffer.extend_from_slice(b"\r\n");
        }

        for cookie in self.cookies.iter().flat_map(Cookies::iter) {
            buffer.extend_from_slice(SET_COOKIE);
            cookie.write_to(buffer);
            buffer.extend_from_slice(b"\r\n");
        }

        buffer.extend_from_slice(b"\r\n");
    }

    async fn send_headers(&mut self) -> Result<(), Error> {
        let mut head = self.pools.buffers.guard();
        self.write_head(&mut head);

        let conn = self.conn.as_mut().ok_or(Error::NotConnected)?;
        conn.write_all(&head).await?;
        self.headers_sent = true;
        Ok(())
    }
}

// Body
impl Response {
    /// Writes `bytes` to the client, sending the header block first if this
    /// is the first write.
    pub async fn write(&mut self, bytes: &[u8]) -> Result<(), Error> {
        if !self.headers_sent {
            self.send_headers().await?;
        }

        let conn = self.conn.as_mut().ok_or(Error::NotConnected)?;
        conn.write_all(bytes).await?;
        Ok(())
    }
}
