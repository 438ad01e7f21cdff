use crate::{
    errors::ErrorKind,
    http::{request::Request, response::Response},
    pools::Pools,
    server::connection::{ConnReader, Connection, Incoming},
};
use memchr::memmem;
use std::{future::Future, net::SocketAddr, sync::Arc};
use tokio::{
    io::AsyncReadExt,
    net::TcpStream,
    sync::{mpsc, watch},
};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, warn};

/// Application logic invoked once per connection.
///
/// The request and response belong to the worker and are reset right after
/// `handle` returns: copy out whatever must outlive the call. Whatever was
/// not yet sent goes out when `handle` returns, then the connection is
/// closed.
///
/// # Examples
/// ```
/// use webworkers::{Handler, Request, Response};
///
/// struct Echo;
///
/// impl Handler for Echo {
///     async fn handle(&self, response: &mut Response, request: &mut Request) {
///         let _ = response.content_type("text/plain");
///         let _ = response.write(request.path()).await;
///     }
/// }
/// ```
pub trait Handler
where
    Self: Sync + Send + 'static,
{
    fn handle(
        &self,
        response: &mut Response,
        request: &mut Request,
    ) -> impl Future<Output = ()> + Send;
}

/// One long-lived task: a private queue of accepted connections, served
/// strictly one after another with the same request/response pair.
pub(crate) struct Worker<H> {
    id: usize,
    queue: mpsc::Receiver<Incoming>,
    closed: watch::Receiver<bool>,

    handler: Arc<H>,
    tls: Option<TlsAcceptor>,

    buffer: Box<[u8]>,
    request: Request,
    response: Response,
}

impl<H: Handler> Worker<H> {
    pub(crate) fn new(
        id: usize,
        queue: mpsc::Receiver<Incoming>,
        closed: watch::Receiver<bool>,
        handler: Arc<H>,
        tls: Option<TlsAcceptor>,
        read_buffer_size: usize,
        pools: &Arc<Pools>,
    ) -> Self {
        let mut request = Request::new(pools.clone());
        request.worker_id = id;

        Self {
            id,
            queue,
            closed,

            handler,
            tls,

            buffer: vec![0; read_buffer_size].into_boxed_slice(),
            request,
            response: Response::new(pools.clone()),
        }
    }

    /// Serves the queue until the server closes, then drains what is left.
    pub(crate) async fn run(mut self) {
        debug!(worker = self.id, "worker started");

        loop {
            let incoming = tokio::select! {
                biased;

                incoming = self.queue.recv() => match incoming {
                    Some(incoming) => incoming,
                    None => break,
                },
                _ = wait_closed(&mut self.closed) => break,
            };

            self.serve(incoming).await;
        }

        self.queue.close();
        while let Some(incoming) = self.queue.recv().await {
            self.serve(incoming).await;
        }

        debug!(worker = self.id, "worker stopped");
    }

    async fn serve(&mut self, incoming: Incoming) {
        let Incoming { stream, peer } = incoming;

        match self.accept(stream, peer).await {
            Ok(()) => {}
            Err(ErrorKind::EmptyRequest) => {
                debug!(worker = self.id, %peer, "connection closed without a request");
            }
            Err(e) => warn!(worker = self.id, %peer, error = %e, "connection abandoned"),
        }

        self.request.clean();
        self.response.clean();
    }

    async fn accept(&mut self, stream: TcpStream, peer: SocketAddr) -> Result<(), ErrorKind> {
        let conn = match &self.tls {
            Some(acceptor) => {
                let stream = acceptor
                    .accept(stream)
                    .await
                    .map_err(ErrorKind::Handshake)?;
                Connection::Tls(Box::new(stream))
            }
            None => Connection::Plain(stream),
        };

        self.process(conn, peer).await
    }

    async fn process(&mut self, conn: Connection, peer: SocketAddr) -> Result<(), ErrorKind> {
        let (mut reader, writer) = tokio::io::split(conn);

        let filled = fill(&mut reader, &mut self.buffer).await?;
        if filled == self.buffer.len() && !has_blank_line(&self.buffer) {
            warn!(worker = self.id, %peer, size = filled, "header block exceeds the read buffer");
        }
        let head = self.request.parse(&self.buffer[..filled])?;

        self.request.remote_addr = peer;
        let content_length = self.request.content_length();
        self.request
            .body
            .stage(&self.buffer[head..filled], content_length, reader);
        self.response.attach(writer);

        debug!(
            worker = self.id,
            %peer,
            method = %String::from_utf8_lossy(self.request.method()),
            path = %String::from_utf8_lossy(self.request.path()),
            "request",
        );

        self.handler
            .handle(&mut self.response, &mut self.request)
            .await;
        self.response.finish().await?;

        Ok(())
    }
}

/// Resolves once the server is closed (or the server handle is gone).
pub(crate) async fn wait_closed(signal: &mut watch::Receiver<bool>) {
    let _ = signal.wait_for(|closed| *closed).await;
}

/// Reads until the header block is complete, `buffer` is full or the
/// client stops sending.
async fn fill(reader: &mut ConnReader, buffer: &mut [u8]) -> Result<usize, ErrorKind> {
    let mut filled = 0;

    while filled < buffer.len() {
        let n = reader.read(&mut buffer[filled..]).await?;
        if n == 0 {
            break;
        }

        // A terminator may straddle two reads.
        let scan_from = filled.saturating_sub(2);
        filled += n;

        if has_blank_line(&buffer[scan_from..filled]) {
            break;
        }
    }

    match filled {
        0 => Err(ErrorKind::EmptyRequest),
        n => Ok(n),
    }
}

#[inline]
fn has_blank_line(bytes: &[u8]) -> bool {
    memmem::find(bytes, b"\n\n").is_some() || memmem::find(bytes, b"\n\r\n").is_some()
}
