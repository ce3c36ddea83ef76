//! Memcached ASCII client over TCP
//!
//! One lazily-opened connection per server, consistent hashing across
//! servers, redistribution away from servers that recently failed, and an
//! optional bound on in-flight operations.

use super::locator::{KetamaLocator, resolve_hosts};
use super::protocol::{ParseResult, RequestWriter, Response, check_key, parse_response};
use super::{CacheClient, OpFuture};
use crate::config::MemcachedCacheConfig;
use crate::{CacheError, ClientError, ProtocolError};
use bytes::{Buf, Bytes, BytesMut};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How long a failed server is skipped before it is tried again
const NODE_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Client for a memcached cluster
#[derive(Clone)]
pub struct MemcachedClient {
    inner: Arc<Inner>,
}

struct Inner {
    nodes: Vec<Node>,
    locator: KetamaLocator,
    queue: Option<Arc<Semaphore>>,
    settings: Settings,
    cancel_token: CancellationToken,
}

#[derive(Debug, Clone, Copy)]
struct Settings {
    op_timeout: Duration,
    read_buffer_size: usize,
    max_value_len: usize,
}

enum Request {
    Get(String),
    Set {
        key: String,
        ttl_secs: u32,
        value: Bytes,
    },
    Delete(String),
    FlushAll,
}

impl Request {
    fn key(&self) -> Option<&str> {
        match self {
            Request::Get(key) | Request::Set { key, .. } | Request::Delete(key) => Some(key),
            Request::FlushAll => None,
        }
    }
}

enum Reply {
    Value(Option<Bytes>),
    Done(bool),
}

impl Reply {
    fn into_value(self) -> Result<Option<Bytes>, ClientError> {
        match self {
            Reply::Value(value) => Ok(value),
            Reply::Done(_) => Err(unexpected("status reply to get")),
        }
    }

    fn into_done(self) -> Result<bool, ClientError> {
        match self {
            Reply::Done(done) => Ok(done),
            Reply::Value(_) => Err(unexpected("value reply to storage command")),
        }
    }
}

fn unexpected(what: &str) -> ClientError {
    ProtocolError::InvalidResponse(what.to_string()).into()
}

impl MemcachedClient {
    /// Create a client for already-resolved server addresses
    pub fn new(addrs: Vec<SocketAddr>, config: &MemcachedCacheConfig) -> crate::Result<Self> {
        if addrs.is_empty() {
            return Err(CacheError::Config(
                "memcached client needs at least one server".to_string(),
            ));
        }

        let locator = KetamaLocator::new(&addrs);
        let queue = (config.max_operation_queue_size > 0)
            .then(|| Arc::new(Semaphore::new(config.max_operation_queue_size)));

        info!(
            servers = ?addrs,
            timeout_ms = config.timeout_ms,
            max_queue = config.max_operation_queue_size,
            "Memcached client created"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                nodes: addrs.into_iter().map(Node::new).collect(),
                locator,
                queue,
                settings: Settings {
                    op_timeout: config.timeout(),
                    read_buffer_size: config.read_buffer_size,
                    max_value_len: config.max_object_size,
                },
                cancel_token: CancellationToken::new(),
            }),
        })
    }

    /// Resolve the configured hosts and create a client
    pub async fn connect(config: &MemcachedCacheConfig) -> crate::Result<Self> {
        let addrs = resolve_hosts(&config.hosts).await?;
        Self::new(addrs, config)
    }

    /// Server addresses in configuration order
    pub fn servers(&self) -> Vec<SocketAddr> {
        self.inner.nodes.iter().map(|n| n.addr).collect()
    }

    /// Stop the client: in-flight operations fail with [`ClientError::Shutdown`]
    /// and new ones are refused
    pub fn shutdown(&self) {
        info!("Shutting down memcached client");
        self.inner.cancel_token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.cancel_token.is_cancelled()
    }

    fn issue<T, F>(&self, request: Request, convert: F) -> Result<OpFuture<T>, ClientError>
    where
        T: Send + 'static,
        F: FnOnce(Reply) -> Result<T, ClientError> + Send + 'static,
    {
        if self.inner.cancel_token.is_cancelled() {
            return Err(ClientError::NotReady("client is shut down".to_string()));
        }
        if let Some(key) = request.key() {
            check_key(key.as_bytes())?;
        }
        let runtime = Handle::try_current()
            .map_err(|_| ClientError::NotReady("no tokio runtime".to_string()))?;

        let permit = match &self.inner.queue {
            Some(queue) => Some(
                Arc::clone(queue)
                    .try_acquire_owned()
                    .map_err(|_| ClientError::QueueFull)?,
            ),
            None => None,
        };

        let inner = Arc::clone(&self.inner);
        Ok(runtime.spawn(async move {
            let _permit = permit;
            let result = tokio::select! {
                () = inner.cancel_token.cancelled() => Err(ClientError::Shutdown),
                result = inner.dispatch(&request) => result.and_then(convert),
            };
            if let Err(ref e) = result {
                debug!(key = request.key().unwrap_or("*"), error = %e, "Memcached operation failed");
            }
            result
        }))
    }
}

impl CacheClient for MemcachedClient {
    fn get(&self, key: &str) -> Result<OpFuture<Option<Bytes>>, ClientError> {
        self.issue(Request::Get(key.to_string()), Reply::into_value)
    }

    fn set(&self, key: &str, ttl_secs: u32, value: Bytes) -> Result<(), ClientError> {
        let request = Request::Set {
            key: key.to_string(),
            ttl_secs,
            value,
        };
        self.issue(request, Reply::into_done).map(drop)
    }

    fn delete(&self, key: &str) -> Result<(), ClientError> {
        self.issue(Request::Delete(key.to_string()), Reply::into_done)
            .map(drop)
    }

    fn flush(&self) -> Result<OpFuture<bool>, ClientError> {
        self.issue(Request::FlushAll, Reply::into_done)
    }
}

impl Inner {
    async fn dispatch(&self, request: &Request) -> Result<Reply, ClientError> {
        match request.key() {
            Some(key) => self.pick_node(key.as_bytes())?.call(request, self.settings).await,
            None => self.broadcast(request).await,
        }
    }

    /// Owner of the key, or the next available server if the owner is down
    fn pick_node(&self, key: &[u8]) -> Result<&Node, ClientError> {
        let mut candidates = self.locator.candidates(key);
        let primary = candidates
            .next()
            .map(|index| &self.nodes[index])
            .ok_or_else(|| ClientError::NotReady("no memcached servers".to_string()))?;

        if primary.is_available() {
            return Ok(primary);
        }
        Ok(candidates
            .map(|index| &self.nodes[index])
            .find(|node| node.is_available())
            .unwrap_or(primary))
    }

    /// Send to every server; true only if all of them succeeded
    async fn broadcast(&self, request: &Request) -> Result<Reply, ClientError> {
        let mut all_ok = true;
        for node in &self.nodes {
            match node.call(request, self.settings).await {
                Ok(Reply::Done(ok)) => all_ok &= ok,
                Ok(Reply::Value(_)) => return Err(unexpected("value reply to flush_all")),
                Err(e) => {
                    warn!(server = %node.addr, error = %e, "flush_all failed on server");
                    all_ok = false;
                }
            }
        }
        Ok(Reply::Done(all_ok))
    }
}

struct Node {
    addr: SocketAddr,
    conn: tokio::sync::Mutex<Option<Connection>>,
    down_until: parking_lot::Mutex<Option<Instant>>,
}

impl Node {
    fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            conn: tokio::sync::Mutex::new(None),
            down_until: parking_lot::Mutex::new(None),
        }
    }

    fn is_available(&self) -> bool {
        self.down_until
            .lock()
            .is_none_or(|until| Instant::now() >= until)
    }

    fn mark_down(&self) {
        *self.down_until.lock() = Some(Instant::now() + NODE_RETRY_INTERVAL);
    }

    fn mark_up(&self) {
        *self.down_until.lock() = None;
    }

    async fn call(&self, request: &Request, settings: Settings) -> Result<Reply, ClientError> {
        let mut guard = self.conn.lock().await;

        // an aborted caller can leave a reply unread on the stream
        if guard.as_ref().is_some_and(|conn| conn.in_flight) {
            debug!(server = %self.addr, "Dropping connection with an unread reply");
            *guard = None;
        }

        if guard.is_none() {
            let opened = tokio::time::timeout(
                settings.op_timeout,
                Connection::open(self.addr, settings),
            )
            .await;
            match opened {
                Ok(Ok(conn)) => {
                    debug!(server = %self.addr, "Connected to memcached");
                    self.mark_up();
                    *guard = Some(conn);
                }
                Ok(Err(e)) => {
                    warn!(server = %self.addr, error = %e, "Unable to connect to memcached");
                    self.mark_down();
                    return Err(e.into());
                }
                Err(_) => {
                    warn!(server = %self.addr, "Timed out connecting to memcached");
                    self.mark_down();
                    return Err(ClientError::Timeout);
                }
            }
        }
        let Some(conn) = guard.as_mut() else {
            return Err(ClientError::NotReady(format!("no connection to {}", self.addr)));
        };

        let result = tokio::time::timeout(settings.op_timeout, conn.execute(request))
            .await
            .unwrap_or(Err(ClientError::Timeout));

        // stream position is unknown after a transport failure
        if matches!(
            result,
            Err(ClientError::Io(_) | ClientError::Protocol(_) | ClientError::Timeout)
        ) {
            *guard = None;
            if matches!(result, Err(ClientError::Io(_))) {
                self.mark_down();
            }
        }
        result
    }
}

struct Connection {
    stream: TcpStream,
    read_buf: BytesMut,
    request: RequestWriter,
    max_value_len: usize,
    /// Set while a request is on the wire and its reply not fully read
    in_flight: bool,
}

impl Connection {
    async fn open(addr: SocketAddr, settings: Settings) -> std::io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        // Disable Nagle's algorithm for lower latency
        if let Err(e) = stream.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY: {}", e);
        }
        Ok(Self {
            stream,
            read_buf: BytesMut::with_capacity(settings.read_buffer_size),
            request: RequestWriter::default(),
            max_value_len: settings.max_value_len,
            in_flight: false,
        })
    }

    /// Run one request/reply exchange
    ///
    /// `in_flight` stays set if the future is dropped before the reply is read.
    async fn execute(&mut self, request: &Request) -> Result<Reply, ClientError> {
        self.in_flight = true;
        let reply = self.exchange(request).await;
        self.in_flight = false;
        reply
    }

    async fn exchange(&mut self, request: &Request) -> Result<Reply, ClientError> {
        match request {
            Request::Get(key) => self.get(key.as_bytes()).await.map(Reply::Value),
            Request::Set {
                key,
                ttl_secs,
                value,
            } => {
                self.request.set(key.as_bytes(), 0, *ttl_secs, value);
                self.send().await?;
                match self.read_response().await? {
                    Response::Stored => Ok(Reply::Done(true)),
                    Response::NotStored | Response::Exists => Ok(Reply::Done(false)),
                    other => Err(Self::reject(other)),
                }
            }
            Request::Delete(key) => {
                self.request.delete(key.as_bytes());
                self.send().await?;
                match self.read_response().await? {
                    Response::Deleted => Ok(Reply::Done(true)),
                    Response::NotFound => Ok(Reply::Done(false)),
                    other => Err(Self::reject(other)),
                }
            }
            Request::FlushAll => {
                self.request.flush_all();
                self.send().await?;
                match self.read_response().await? {
                    Response::Ok => Ok(Reply::Done(true)),
                    other => Err(Self::reject(other)),
                }
            }
        }
    }

    async fn get(&mut self, key: &[u8]) -> Result<Option<Bytes>, ClientError> {
        self.request.get(key);
        self.send().await?;

        let mut found = None;
        loop {
            match self.read_response().await? {
                Response::Value {
                    key: returned, data
                } => {
                    if returned != key {
                        return Err(ProtocolError::UnexpectedKey(
                            String::from_utf8_lossy(&returned).to_string(),
                        )
                        .into());
                    }
                    found = Some(data);
                }
                Response::End => return Ok(found),
                other => return Err(Self::reject(other)),
            }
        }
    }

    fn reject(response: Response) -> ClientError {
        match response {
            Response::Error(message) => ClientError::Server(message),
            other => ProtocolError::InvalidResponse(format!("{other:?}")).into(),
        }
    }

    async fn send(&mut self) -> Result<(), ClientError> {
        let result = self.stream.write_all(self.request.buffer()).await;
        self.request.clear();
        result.map_err(ClientError::from)
    }

    async fn read_response(&mut self) -> Result<Response, ClientError> {
        loop {
            match parse_response(&self.read_buf, self.max_value_len) {
                ParseResult::Complete(response, consumed) => {
                    self.read_buf.advance(consumed);
                    return Ok(response);
                }
                ParseResult::NeedMoreData => {
                    if self.stream.read_buf(&mut self.read_buf).await? == 0 {
                        return Err(std::io::Error::new(
                            std::io::ErrorKind::UnexpectedEof,
                            "connection closed by server",
                        )
                        .into());
                    }
                }
                ParseResult::Error(e) => return Err(e.into()),
            }
        }
    }
}
