//! Connection management
//!
//! This module handles a single TCP connection to the cache server: the
//! AUTH/SELECT handshake, the write path, and a reader task that matches
//! replies to requests.
//!
//! Every request pushes a oneshot sender onto the connection's pending queue
//! while the write lock is held, so the queue order is exactly the order the
//! bytes went out. The reader task decodes replies as they arrive and resolves
//! the oldest pending sender for each one. A write that does not finish
//! (I/O error, or the caller's future dropped mid-write) closes the
//! connection, since the queue no longer matches the stream.

use crate::commands::Command;
use crate::protocol::{RespDecoder, RespEncoder};
use bytes::{Bytes, BytesMut};
use cachewire_core::{
    config::CacheConfig,
    error::{CacheError, CacheResult},
    value::RespValue,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, info, warn};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle state of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// No socket yet
    Disconnected = 0,
    /// TCP connect in progress
    Connecting = 1,
    /// Socket open, AUTH in progress
    Authenticating = 2,
    /// Handshake finished, accepting commands
    Ready = 3,
    /// Socket closed; terminal
    Closed = 4,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Disconnected,
            1 => Self::Connecting,
            2 => Self::Authenticating,
            3 => Self::Ready,
            _ => Self::Closed,
        }
    }
}

type PendingReply = oneshot::Sender<CacheResult<RespValue>>;

/// State shared between the write path and the reader task
struct Shared {
    state: AtomicU8,
    healthy: AtomicBool,
    pending: Mutex<VecDeque<PendingReply>>,
}

impl Shared {
    fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn pending(&self) -> MutexGuard<'_, VecDeque<PendingReply>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Hand a reply to the oldest pending request
    fn resolve(&self, value: RespValue) -> bool {
        let Some(tx) = self.pending().pop_front() else {
            return false;
        };
        let result = match value {
            RespValue::Error(msg) => Err(CacheError::Server(msg)),
            other => Ok(other),
        };
        // The caller may have timed out and dropped its receiver
        let _ = tx.send(result);
        true
    }

    /// Mark the connection closed and reject everything still queued
    fn close(&self, reason: &str) {
        let mut pending = self.pending();
        self.set_state(ConnectionState::Closed);
        self.healthy.store(false, Ordering::Release);
        for tx in pending.drain(..) {
            let _ = tx.send(Err(CacheError::Connection(reason.to_string())));
        }
    }
}

/// Closes the connection if dropped before `finish` is called
struct WriteGuard<'a> {
    shared: &'a Shared,
    id: u64,
    finished: bool,
}

impl WriteGuard<'_> {
    fn finish(mut self) {
        self.finished = true;
    }
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            warn!("Write on connection #{} interrupted", self.id);
            self.shared.close("write interrupted");
        }
    }
}

/// Socket halves and reader task of one connection
struct Link {
    id: u64,
    shared: Arc<Shared>,
    writer: AsyncMutex<Option<OwnedWriteHalf>>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl Link {
    fn abort_reader(&self) {
        let reader = self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(reader) = reader {
            reader.abort();
        }
    }

    async fn close(&self, reason: &str) {
        self.shared.close(reason);
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        self.abort_reader();
        debug!("Connection #{} closed: {}", self.id, reason);
    }
}

/// Closes a connection without owning it
///
/// The pool keeps one per connection so it can close connections that are
/// checked out.
#[derive(Clone)]
pub struct CloseHandle {
    link: Arc<Link>,
}

impl CloseHandle {
    /// Close the socket and reject every queued request
    pub async fn close(&self, reason: &str) {
        self.link.close(reason).await;
    }
}

impl std::fmt::Debug for CloseHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("CloseHandle").field(&self.link.id).finish()
    }
}

/// A connection to a cache server
pub struct Connection {
    id: u64,
    addr: String,
    link: Arc<Link>,
    operation_timeout: Duration,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("addr", &self.addr)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Connect to a server and run the AUTH/SELECT handshake
    pub async fn connect(host: &str, port: u16, config: &CacheConfig) -> CacheResult<Self> {
        let addr = format!("{}:{}", host, port);
        let id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
        debug!("Connecting #{} to {}", id, addr);

        let shared = Arc::new(Shared {
            state: AtomicU8::new(ConnectionState::Connecting as u8),
            healthy: AtomicBool::new(true),
            pending: Mutex::new(VecDeque::new()),
        });

        let stream = timeout(config.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| CacheError::Timeout)?
            .map_err(|e| CacheError::Connection(format!("Failed to connect to {}: {}", addr, e)))?;
        stream.set_nodelay(true)?;

        if let Some(keepalive_duration) = config.tcp_keepalive {
            let keepalive = socket2::TcpKeepalive::new().with_time(keepalive_duration);
            socket2::SockRef::from(&stream)
                .set_tcp_keepalive(&keepalive)
                .map_err(|e| {
                    CacheError::Connection(format!("Failed to set TCP keepalive: {}", e))
                })?;
        }

        let (read_half, write_half) = stream.into_split();
        let reader = tokio::spawn(read_loop(read_half, shared.clone(), id));

        let conn = Self {
            id,
            addr,
            link: Arc::new(Link {
                id,
                shared,
                writer: AsyncMutex::new(Some(write_half)),
                reader: Mutex::new(Some(reader)),
            }),
            operation_timeout: config.operation_timeout,
        };

        if let Err(e) = conn.handshake(config).await {
            warn!("Handshake on connection #{} failed: {}", conn.id, e);
            conn.disconnect().await;
            return Err(e);
        }

        info!("Connection #{} to {} ready", conn.id, conn.addr);
        Ok(conn)
    }

    async fn handshake(&self, config: &CacheConfig) -> CacheResult<()> {
        if let Some(ref password) = config.password {
            self.link.shared.set_state(ConnectionState::Authenticating);
            self.authenticate(password).await?;
        }

        if let Some(db) = config.database {
            self.select_database(db).await?;
        }

        self.link.shared.set_state(ConnectionState::Ready);
        Ok(())
    }

    /// Authenticate with the server
    async fn authenticate(&self, password: &str) -> CacheResult<()> {
        debug!("Authenticating connection #{}", self.id);
        match self.send_and_wait("AUTH", &[RespValue::from(password)]).await {
            Ok(RespValue::SimpleString(ref s)) if s == "OK" => Ok(()),
            Ok(other) => Err(CacheError::Auth(format!(
                "Unexpected authentication response: {:?}",
                other
            ))),
            Err(CacheError::Server(msg)) => Err(CacheError::Auth(msg)),
            Err(e) => Err(e),
        }
    }

    /// Select a database
    async fn select_database(&self, db: u8) -> CacheResult<()> {
        match self.send_and_wait("SELECT", &[RespValue::from(db as i64)]).await? {
            RespValue::SimpleString(ref s) if s == "OK" => Ok(()),
            other => Err(CacheError::Protocol(format!(
                "Unexpected SELECT response: {:?}",
                other
            ))),
        }
    }

    /// Connection id, unique within the process
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Current lifecycle state
    pub fn state(&self) -> ConnectionState {
        self.link.shared.state()
    }

    /// Ready and never timed out
    pub fn is_healthy(&self) -> bool {
        self.state() == ConnectionState::Ready && self.link.shared.healthy.load(Ordering::Acquire)
    }

    /// A handle that can close this connection from elsewhere
    pub fn close_handle(&self) -> CloseHandle {
        CloseHandle {
            link: self.link.clone(),
        }
    }

    /// Execute a command and wait for its reply
    ///
    /// Error replies come back as [`CacheError::Server`].
    pub async fn execute_command(
        &self,
        command: &str,
        args: &[RespValue],
    ) -> CacheResult<RespValue> {
        self.ensure_ready()?;
        self.send_and_wait(command, args).await
    }

    /// Execute a command builder and parse its reply
    pub async fn execute<C: Command>(&self, command: &C) -> CacheResult<C::Output> {
        let response = self
            .execute_command(command.command_name(), &command.args())
            .await?;
        command.parse_response(response)
    }

    /// Write several commands in one go and collect their replies in order
    ///
    /// The outer error covers failures that affect the whole batch (encoding,
    /// not ready, write failure). Each inner result belongs to one command.
    pub async fn execute_pipeline(
        &self,
        commands: &[(String, Vec<RespValue>)],
    ) -> CacheResult<Vec<CacheResult<RespValue>>> {
        self.ensure_ready()?;
        if commands.is_empty() {
            return Ok(Vec::new());
        }

        let mut buf = BytesMut::new();
        for (command, args) in commands {
            RespEncoder::encode_command_into(command, args, &mut buf)?;
        }

        let receivers = self.write_request(buf.freeze(), commands.len()).await?;
        let deadline = Instant::now() + self.operation_timeout;

        let mut results = Vec::with_capacity(receivers.len());
        for rx in receivers {
            results.push(self.await_reply(rx, deadline).await);
        }
        Ok(results)
    }

    /// Close the socket and reject every queued request
    pub async fn disconnect(&self) {
        self.link.close("Connection closed by client").await;
    }

    fn ensure_ready(&self) -> CacheResult<()> {
        match self.state() {
            ConnectionState::Ready => Ok(()),
            state => Err(CacheError::Connection(format!(
                "Connection #{} is not ready ({:?})",
                self.id, state
            ))),
        }
    }

    async fn send_and_wait(&self, command: &str, args: &[RespValue]) -> CacheResult<RespValue> {
        let payload = RespEncoder::encode_command(command, args)?;
        let mut receivers = self.write_request(payload, 1).await?;
        let deadline = Instant::now() + self.operation_timeout;
        match receivers.pop() {
            Some(rx) => self.await_reply(rx, deadline).await,
            None => Err(CacheError::Connection("No reply slot queued".to_string())),
        }
    }

    /// Queue `count` reply slots and write `payload` under the write lock
    async fn write_request(
        &self,
        payload: Bytes,
        count: usize,
    ) -> CacheResult<Vec<oneshot::Receiver<CacheResult<RespValue>>>> {
        let shared: &Shared = &self.link.shared;
        let mut writer = self.link.writer.lock().await;
        let Some(stream) = writer.as_mut() else {
            return Err(CacheError::Connection(format!(
                "Connection #{} is closed",
                self.id
            )));
        };

        let receivers = {
            let mut pending = shared.pending();
            if shared.state() == ConnectionState::Closed {
                return Err(CacheError::Connection(format!(
                    "Connection #{} is closed",
                    self.id
                )));
            }
            (0..count)
                .map(|_| {
                    let (tx, rx) = oneshot::channel();
                    pending.push_back(tx);
                    rx
                })
                .collect::<Vec<_>>()
        };

        let guard = WriteGuard {
            shared,
            id: self.id,
            finished: false,
        };
        if let Err(e) = stream.write_all(&payload).await {
            warn!("Write on connection #{} failed: {}", self.id, e);
            guard.finish();
            shared.close(&format!("write failed: {}", e));
            return Err(CacheError::Io(e));
        }
        guard.finish();
        Ok(receivers)
    }

    async fn await_reply(
        &self,
        rx: oneshot::Receiver<CacheResult<RespValue>>,
        deadline: Instant,
    ) -> CacheResult<RespValue> {
        match timeout_at(deadline, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(CacheError::Connection(format!(
                "Connection #{} closed before the reply arrived",
                self.id
            ))),
            Err(_) => {
                // The slot stays queued so later replies still line up; the
                // connection itself is no longer trusted.
                warn!("Command on connection #{} timed out", self.id);
                self.link.shared.healthy.store(false, Ordering::Release);
                Err(CacheError::Timeout)
            }
        }
    }

}

impl Drop for Connection {
    fn drop(&mut self) {
        self.link.shared.close("Connection dropped");
        self.link.abort_reader();
        // Release the socket now even if a close handle outlives us
        if let Ok(mut writer) = self.link.writer.try_lock() {
            writer.take();
        }
    }
}

async fn read_loop(mut reader: OwnedReadHalf, shared: Arc<Shared>, id: u64) {
    let mut buf = BytesMut::with_capacity(8192);
    let mut decoder = RespDecoder::new();

    let reason = 'read: loop {
        match reader.read_buf(&mut buf).await {
            Ok(0) => break "Connection closed by server".to_string(),
            Ok(_) => {}
            Err(e) => break format!("read failed: {}", e),
        }

        loop {
            match decoder.decode(&mut buf) {
                Ok(Some(value)) => {
                    if !shared.resolve(value) {
                        break 'read "reply received with no request pending".to_string();
                    }
                }
                Ok(None) => break,
                Err(e) => break 'read e.to_string(),
            }
        }
    };

    if shared.state() != ConnectionState::Closed {
        warn!("Connection #{} lost: {}", id, reason);
    }
    shared.close(&reason);
}
