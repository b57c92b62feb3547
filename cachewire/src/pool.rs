//! Connection pooling
//!
//! A fixed number of connections is opened up front and shared between
//! callers. `acquire` hands out an idle connection or parks the caller in a
//! FIFO waiter queue; dropping the returned [`PooledConnection`] releases it,
//! handing it straight to the oldest waiter when there is one.
//!
//! Connections that come back unhealthy (timed out, closed by the server,
//! protocol error) are dropped and replaced in the background with
//! exponential backoff. Idle connections are checked again before they are
//! handed out, since the server may close them while they sit in the pool.

use crate::connection::{CloseHandle, Connection};
use cachewire_core::{
    config::CacheConfig,
    error::{CacheError, CacheResult},
};
use futures_util::future::join_all;
use std::collections::{HashMap, VecDeque};
use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Snapshot of pool occupancy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Configured capacity
    pub size: usize,
    /// Connections waiting in the idle list
    pub idle: usize,
    /// Connections currently checked out
    pub in_use: usize,
    /// Callers parked in `acquire`
    pub waiting: usize,
}

#[derive(Default)]
struct PoolState {
    idle: VecDeque<Connection>,
    /// One per live connection, idle or checked out
    handles: HashMap<u64, CloseHandle>,
    waiters: VecDeque<oneshot::Sender<Connection>>,
    in_use: usize,
    recycling: usize,
    destroyed: bool,
}

impl PoolState {
    fn live(&self) -> usize {
        self.idle.len() + self.in_use + self.recycling
    }

    fn track(&mut self, conn: &Connection) {
        self.handles.insert(conn.id(), conn.close_handle());
    }

    /// Take out idle connections that closed while parked
    fn take_stale(&mut self) -> Vec<Connection> {
        let (healthy, stale): (Vec<_>, Vec<_>) =
            self.idle.drain(..).partition(Connection::is_healthy);
        self.idle = VecDeque::from(healthy);
        for conn in &stale {
            self.handles.remove(&conn.id());
        }
        stale
    }
}

struct PoolInner {
    host: String,
    port: u16,
    config: CacheConfig,
    state: Mutex<PoolState>,
}

impl PoolInner {
    fn state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release(self: &Arc<Self>, conn: Connection) {
        let mut state = self.state();
        state.in_use = state.in_use.saturating_sub(1);

        if state.destroyed {
            drop(state);
            debug!("Pool destroyed, closing connection #{}", conn.id());
            return;
        }

        if !conn.is_healthy() {
            warn!("Connection #{} returned unhealthy, replacing it", conn.id());
            state.handles.remove(&conn.id());
            drop(conn);
            self.schedule_replacement(&mut state);
            return;
        }

        Self::hand_off(&mut state, conn);
    }

    /// Replace every idle connection the server has closed
    fn recycle_stale(self: &Arc<Self>, state: &mut PoolState) {
        for conn in state.take_stale() {
            warn!("Idle connection #{} was closed, replacing it", conn.id());
            drop(conn);
            self.schedule_replacement(state);
        }
    }

    /// Give `conn` to the oldest waiter still listening, or park it as idle
    fn hand_off(state: &mut PoolState, mut conn: Connection) {
        while let Some(waiter) = state.waiters.pop_front() {
            match waiter.send(conn) {
                Ok(()) => {
                    state.in_use += 1;
                    return;
                }
                Err(returned) => conn = returned,
            }
        }
        state.idle.push_back(conn);
    }

    fn schedule_replacement(self: &Arc<Self>, state: &mut PoolState) {
        if !self.config.reconnect.enabled {
            Self::shrink(state);
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("No runtime available to replace a pooled connection");
            Self::shrink(state);
            return;
        };
        state.recycling += 1;
        handle.spawn(replace_connection(self.clone()));
    }

    /// Capacity was lost; once nothing is left, parked callers cannot be served
    fn shrink(state: &mut PoolState) {
        if state.live() == 0 {
            error!("Connection pool has no live connections left");
            state.waiters.clear();
        }
    }
}

async fn replace_connection(inner: Arc<PoolInner>) {
    let attempts = inner.config.retry_attempts.max(1);
    for attempt in 0..attempts {
        let delay = inner
            .config
            .reconnect
            .delay_for(inner.config.retry_delay, attempt);
        tokio::time::sleep(delay).await;

        if inner.state().destroyed {
            inner.state().recycling -= 1;
            return;
        }

        match Connection::connect(&inner.host, inner.port, &inner.config).await {
            Ok(conn) => {
                info!("Replacement connection #{} ready", conn.id());
                let mut state = inner.state();
                state.recycling -= 1;
                if state.destroyed {
                    return;
                }
                state.track(&conn);
                PoolInner::hand_off(&mut state, conn);
                return;
            }
            Err(e) => {
                warn!(
                    "Reconnect attempt {}/{} to {}:{} failed: {}",
                    attempt + 1,
                    attempts,
                    inner.host,
                    inner.port,
                    e
                );
            }
        }
    }

    error!(
        "Giving up on replacing a connection to {}:{} after {} attempts",
        inner.host, inner.port, attempts
    );
    let mut state = inner.state();
    state.recycling -= 1;
    PoolInner::shrink(&mut state);
}

/// A connection checked out of the pool
///
/// Dereferences to [`Connection`]. Dropping it returns the connection to the
/// pool.
pub struct PooledConnection {
    conn: Option<Connection>,
    pool: Arc<PoolInner>,
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        // Only `None` while dropping
        self.conn.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("PooledConnection").field(&self.conn).finish()
    }
}

/// A parked `acquire` call
///
/// If the caller gives up after a release already handed it a connection,
/// dropping the waiter puts that connection back.
struct Waiter {
    rx: oneshot::Receiver<Connection>,
    pool: Arc<PoolInner>,
}

impl Drop for Waiter {
    fn drop(&mut self) {
        self.rx.close();
        if let Ok(conn) = self.rx.try_recv() {
            self.pool.release(conn);
        }
    }
}

/// Fixed-size pool of connections to one server
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    /// Open `config.pool.size` connections concurrently
    ///
    /// # Errors
    ///
    /// Fails if any connection fails; the ones that did connect are closed.
    pub async fn initialize(host: &str, port: u16, config: CacheConfig) -> CacheResult<Self> {
        let size = config.pool.size;
        if size == 0 {
            return Err(CacheError::Config("pool size must be at least 1".to_string()));
        }
        debug!("Opening {} connections to {}:{}", size, host, port);

        let results = join_all((0..size).map(|_| Connection::connect(host, port, &config))).await;

        let mut connections = Vec::with_capacity(size);
        let mut failure = None;
        for result in results {
            match result {
                Ok(conn) => connections.push(conn),
                Err(e) => {
                    failure.get_or_insert(e);
                }
            }
        }

        if let Some(e) = failure {
            warn!("Pool initialization failed: {}", e);
            for conn in &connections {
                conn.disconnect().await;
            }
            return Err(e);
        }

        info!("Connection pool of {} ready for {}:{}", size, host, port);
        let mut state = PoolState::default();
        for conn in connections {
            state.track(&conn);
            state.idle.push_back(conn);
        }
        Ok(Self {
            inner: Arc::new(PoolInner {
                host: host.to_string(),
                port,
                config,
                state: Mutex::new(state),
            }),
        })
    }

    /// Check out a connection, waiting in FIFO order if none is idle
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Pool`] when the pool is destroyed or has no live
    /// connections, and [`CacheError::Timeout`] when `acquire_timeout` elapses.
    pub async fn acquire(&self) -> CacheResult<PooledConnection> {
        let rx = {
            let mut state = self.inner.state();
            if state.destroyed {
                return Err(CacheError::Pool("Connection pool destroyed".to_string()));
            }
            self.inner.recycle_stale(&mut state);
            if let Some(conn) = state.idle.pop_front() {
                state.in_use += 1;
                return Ok(self.checked_out(conn));
            }
            if state.live() == 0 {
                return Err(CacheError::Pool("No live connections in pool".to_string()));
            }
            let (tx, rx) = oneshot::channel();
            state.waiters.push_back(tx);
            rx
        };

        let mut waiter = Waiter {
            rx,
            pool: self.inner.clone(),
        };
        match timeout(self.inner.config.pool.acquire_timeout, &mut waiter.rx).await {
            Ok(Ok(conn)) => Ok(self.checked_out(conn)),
            Ok(Err(_)) => Err(CacheError::Pool(
                "Connection pool closed while waiting".to_string(),
            )),
            Err(_) => {
                debug!("Timed out waiting for a pooled connection");
                Err(CacheError::Timeout)
            }
        }
    }

    fn checked_out(&self, conn: Connection) -> PooledConnection {
        PooledConnection {
            conn: Some(conn),
            pool: self.inner.clone(),
        }
    }

    /// Close every connection and reject every waiter
    ///
    /// Connections still checked out are closed too; their holders see
    /// connection errors from then on.
    pub async fn destroy(&self) {
        let (idle, handles): (Vec<Connection>, Vec<CloseHandle>) = {
            let mut state = self.inner.state();
            state.destroyed = true;
            state.waiters.clear();
            (
                state.idle.drain(..).collect(),
                state.handles.drain().map(|(_, handle)| handle).collect(),
            )
        };
        for handle in &handles {
            handle.close("Connection pool destroyed").await;
        }
        drop(idle);
        info!(
            "Connection pool for {}:{} destroyed ({} connections closed)",
            self.inner.host,
            self.inner.port,
            handles.len()
        );
    }

    /// Current occupancy
    ///
    /// Idle connections the server has closed are replaced first, so they
    /// are not counted as idle.
    pub fn status(&self) -> PoolStatus {
        let mut state = self.inner.state();
        if !state.destroyed {
            self.inner.recycle_stale(&mut state);
        }
        PoolStatus {
            size: self.inner.config.pool.size,
            idle: state.idle.len(),
            in_use: state.in_use,
            waiting: state.waiters.iter().filter(|w| !w.is_closed()).count(),
        }
    }

    /// Configuration the pool's connections were opened with
    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("host", &self.inner.host)
            .field("port", &self.inner.port)
            .field("status", &self.status())
            .finish()
    }
}
