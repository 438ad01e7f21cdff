use crate::{
    errors::Error,
    opts::Opts,
    pools::Pools,
    server::{
        connection::Incoming,
        tls,
        worker::{wait_closed, Handler, Worker},
    },
};
use socket2::{Domain, Protocol, Socket, Type};
use std::{
    io, mem,
    net::SocketAddr,
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc, Mutex, OnceLock, PoisonError,
    },
};
use tokio::{
    net::{lookup_host, TcpListener},
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tracing::{debug, dispatcher, info, instrument::WithSubscriber, warn, Dispatch};

const READY: u8 = 0;
const LISTENING: u8 = 1;
const CLOSED: u8 = 2;

const BACKLOG: i32 = 1024;

/// A fixed set of workers behind one listener.
///
/// Every accepted connection goes to the next worker in round-robin order
/// and waits in that worker's queue; when the queue is full the accept loop
/// waits with it. Each worker serves its queue strictly in order.
///
/// ```text
///                 [ accept ]
///                     ||
///            round-robin cursor
///          //         ||         \\
///   [ queue 0 ]  [ queue 1 ]  [ queue N ]
///       ||            ||           ||
///   [ worker 0 ] [ worker 1 ] [ worker N ]
///    parse -> handler -> write -> close -> reset
/// ```
///
/// The lifecycle only moves forward: `ready -> listening -> closed`.
///
/// # Examples
/// ```no_run
/// use std::{sync::Arc, time::Duration};
/// use webworkers::{Handler, Opts, Request, Response, Webworkers};
///
/// struct Hello;
///
/// impl Handler for Hello {
///     async fn handle(&self, response: &mut Response, _: &mut Request) {
///         let _ = response.write(b"hello").await;
///     }
/// }
///
/// #[tokio::main]
/// async fn main() -> Result<(), webworkers::Error> {
///     let server = Arc::new(Webworkers::new(Opts::default(), Hello)?);
///
///     let listening = tokio::spawn({
///         let server = server.clone();
///         async move { server.listen().await }
///     });
///
///     tokio::time::sleep(Duration::from_secs(60)).await;
///     server.close()?;
///     server.wait().await;
///     listening.await.expect("accept loop panicked")
/// }
/// ```
pub struct Webworkers<H> {
    state: AtomicU8,
    address: String,

    queues: Box<[mpsc::Sender<Incoming>]>,
    cursor: Mutex<usize>,

    idle: Mutex<Option<Vec<Worker<H>>>>,
    running: Mutex<Vec<JoinHandle<()>>>,
    closed: watch::Sender<bool>,

    local_addr: OnceLock<SocketAddr>,
    dispatch: Dispatch,
}

impl<H: Handler> Webworkers<H> {
    /// Validates `opts`, loads the TLS pairs if enabled and builds the
    /// workers. Nothing runs until [`listen`](Self::listen) or
    /// [`serve`](Self::serve).
    pub fn new(mut opts: Opts, handler: H) -> Result<Self, Error> {
        opts.validate()?;

        let dispatch = mem::take(&mut opts.error_output).into_dispatch();
        let tls = match opts.tls {
            true => Some(dispatcher::with_default(&dispatch, || {
                tls::acceptor(&opts.certs)
            })?),
            false => None,
        };

        let pools = Arc::new(Pools::new(opts.worker_cap));
        let handler = Arc::new(handler);
        let (closed, _) = watch::channel(false);

        let mut queues = Vec::with_capacity(opts.worker_cap);
        let mut workers = Vec::with_capacity(opts.worker_cap);

        for id in 0..opts.worker_cap {
            let (sender, receiver) = mpsc::channel(opts.queue_len);
            queues.push(sender);
            workers.push(Worker::new(
                id,
                receiver,
                closed.subscribe(),
                handler.clone(),
                tls.clone(),
                opts.read_buffer_size,
                &pools,
            ));
        }

        Ok(Self {
            state: AtomicU8::new(READY),
            address: opts.address,

            queues: queues.into_boxed_slice(),
            cursor: Mutex::new(0),

            idle: Mutex::new(Some(workers)),
            running: Mutex::new(Vec::new()),
            closed,

            local_addr: OnceLock::new(),
            dispatch,
        })
    }

    /// Binds the configured address and accepts connections until
    /// [`close`](Self::close).
    ///
    /// # Errors
    /// - [`Error::IsListening`] / [`Error::IsClosed`] if not in the ready
    ///   state; nothing is touched in that case
    /// - [`Error::Io`] if the address cannot be resolved or bound; the
    ///   instance still counts as listening, so only [`close`](Self::close)
    ///   is left to call
    ///
    /// Failed accepts are logged and never end the loop, so once bound this
    /// returns `Ok(())` when the server is closed.
    pub async fn listen(&self) -> Result<(), Error> {
        self.begin()?;

        let listener = bind(&self.address).await?;
        self.run(listener).await
    }

    /// Like [`listen`](Self::listen) on a listener bound by the caller. The
    /// configured address is ignored.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), Error> {
        self.begin()?;
        self.run(listener).await
    }

    /// Stops accepting. Workers finish the connection in hand, drain their
    /// queue, then exit; see [`wait`](Self::wait).
    pub fn close(&self) -> Result<(), Error> {
        if self.state.swap(CLOSED, Ordering::AcqRel) == CLOSED {
            return Err(Error::IsClosed);
        }

        self.closed.send_replace(true);
        dispatcher::with_default(&self.dispatch, || info!("closing"));
        Ok(())
    }

    /// Waits for every started worker to exit.
    pub async fn wait(&self) {
        let running = mem::take(&mut *self.running.lock().unwrap_or_else(PoisonError::into_inner));

        for task in running {
            if let Err(e) = task.await {
                dispatcher::with_default(&self.dispatch, || warn!(error = %e, "worker failed"));
            }
        }
    }

    /// Address of the bound listener, once listening.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }

    #[inline]
    pub fn worker_cap(&self) -> usize {
        self.queues.len()
    }

    /// Index of the worker the next connection goes to.
    fn next_worker(&self) -> usize {
        let mut cursor = self.cursor.lock().unwrap_or_else(PoisonError::into_inner);

        let current = *cursor;
        *cursor = (current + 1) % self.queues.len();
        current
    }

    fn begin(&self) -> Result<(), Error> {
        match self
            .state
            .compare_exchange(READY, LISTENING, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => Ok(()),
            Err(CLOSED) => Err(Error::IsClosed),
            Err(_) => Err(Error::IsListening),
        }
    }

    async fn run(&self, listener: TcpListener) -> Result<(), Error> {
        let addr = listener.local_addr()?;
        let _ = self.local_addr.set(addr);

        self.spawn_workers();

        self.accept_loop(listener, addr)
            .with_subscriber(self.dispatch.clone())
            .await;
        Ok(())
    }

    /// Starts the workers unless the server closed first. Holding `running`
    /// across the check keeps [`wait`](Self::wait) from missing them.
    fn spawn_workers(&self) {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if self.state.load(Ordering::Acquire) == CLOSED {
            return;
        }

        let idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner).take();
        let Some(workers) = idle else {
            return;
        };

        running.extend(
            workers
                .into_iter()
                .map(|worker| tokio::spawn(worker.run().with_subscriber(self.dispatch.clone()))),
        );
    }

    async fn accept_loop(&self, listener: TcpListener, addr: SocketAddr) {
        info!(%addr, workers = self.queues.len(), "listening");
        let mut closed = self.closed.subscribe();

        loop {
            let accepted = tokio::select! {
                biased;

                _ = wait_closed(&mut closed) => break,
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => self.assign(Incoming { stream, peer }, &mut closed).await,
                Err(e) => warn!(error = %e, "accept failed"),
            }
        }

        info!(%addr, "stopped listening");
    }

    async fn assign(&self, incoming: Incoming, closed: &mut watch::Receiver<bool>) {
        let id = self.next_worker();
        let peer = incoming.peer;

        let sent = tokio::select! {
            sent = self.queues[id].send(incoming) => sent,
            _ = wait_closed(closed) => {
                debug!(worker = id, %peer, "closed while queueing, connection dropped");
                return;
            }
        };

        match sent {
            Ok(()) => debug!(worker = id, %peer, "queued"),
            Err(_) => warn!(worker = id, %peer, "worker queue closed, connection dropped"),
        }
    }
}

async fn bind(address: &str) -> io::Result<TcpListener> {
    let addr = lookup_host(address).await?.next().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{address} resolved to no address"),
        )
    })?;

    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(BACKLOG)?;

    TcpListener::from_std(socket.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        http::{request::Request, response::Response},
        opts::TlsPair,
    };
    use std::time::Duration;

    struct Noop;

    impl Handler for Noop {
        async fn handle(&self, _: &mut Response, _: &mut Request) {}
    }

    fn opts(workers: usize) -> Opts {
        Opts {
            worker_cap: workers,
            queue_len: 4,
            address: String::from("127.0.0.1:0"),
            ..Opts::default()
        }
    }

    async fn listening(server: &Arc<Webworkers<Noop>>) -> JoinHandle<Result<(), Error>> {
        let task = tokio::spawn({
            let server = server.clone();
            async move { server.listen().await }
        });

        while server.local_addr().is_none() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        task
    }

    #[test]
    fn invalid_opts() {
        let opts = Opts {
            worker_cap: 0,
            address: String::new(),
            ..Opts::default()
        };

        assert!(matches!(
            Webworkers::new(opts, Noop).err(),
            Some(Error::InvalidOpts(errs)) if errs.len() == 2
        ));
    }

    #[test]
    fn tls_without_loadable_pairs() {
        let opts = Opts {
            tls: true,
            certs: vec![TlsPair::new("/nonexistent/x.crt", "/nonexistent/x.key")],
            ..opts(1)
        };

        assert!(matches!(
            Webworkers::new(opts, Noop).err(),
            Some(Error::TlsPair { .. })
        ));
    }

    #[test]
    fn round_robin() {
        let server = Webworkers::new(opts(3), Noop).unwrap();

        let picked: Vec<_> = (0..7).map(|_| server.next_worker()).collect();
        assert_eq!(picked, [0, 1, 2, 0, 1, 2, 0]);
        assert_eq!(server.worker_cap(), 3);
    }

    #[tokio::test]
    async fn lifecycle() {
        let server = Arc::new(Webworkers::new(opts(2), Noop).unwrap());
        assert!(server.local_addr().is_none());

        let task = listening(&server).await;
        assert!(matches!(server.listen().await, Err(Error::IsListening)));

        assert!(server.close().is_ok());
        assert!(matches!(server.close(), Err(Error::IsClosed)));

        assert!(task.await.unwrap().is_ok());
        server.wait().await;

        assert!(matches!(server.listen().await, Err(Error::IsClosed)));
    }

    #[tokio::test]
    async fn close_before_listen() {
        let server = Webworkers::new(opts(1), Noop).unwrap();

        assert!(server.close().is_ok());
        assert!(matches!(server.listen().await, Err(Error::IsClosed)));
        assert!(server.local_addr().is_none());
        server.wait().await;
    }

    #[tokio::test]
    async fn bind_failure_is_final() {
        let server = Webworkers::new(
            Opts {
                address: String::from("not an address"),
                ..opts(1)
            },
            Noop,
        )
        .unwrap();

        assert!(matches!(server.listen().await, Err(Error::Io(_))));
        assert!(matches!(server.listen().await, Err(Error::IsListening)));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        assert!(matches!(server.serve(listener).await, Err(Error::IsListening)));
        assert!(server.local_addr().is_none());

        assert!(server.close().is_ok());
        server.wait().await;
    }

    #[tokio::test]
    async fn close_between_begin_and_spawn() {
        let server = Webworkers::new(opts(2), Noop).unwrap();

        server.begin().unwrap();
        server.close().unwrap();
        server.spawn_workers();

        assert!(server.running.lock().unwrap().is_empty());
        server.wait().await;
    }
}
