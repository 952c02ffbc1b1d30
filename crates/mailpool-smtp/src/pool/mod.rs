//! Bounded pool of authenticated SMTP connections.
//!
//! ```text
//! acquire ──→ idle? ── RSET ok ──────────────────────→ caller
//!   │           │  └── RSET fails → replace ─────────→ caller
//!   │           └── count < max ── connect + AUTH ───→ caller
//!   └── else: queue (FIFO) ←── release / close notification
//!
//! release ──→ broken / no keep-alive / closing ──→ close
//!   └── oldest waiter, else idle until the expiry timer fires
//! ```
//!
//! Bookkeeping lives behind one mutex. Every close of a socket happens after
//! the lock is released, because a closing connection reports back into the
//! pool.

mod state;

pub use state::DrainCallback;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};

use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::Config;
use crate::connection::{Connection, ConnectionId, Connector, Lifecycle, TcpConnector, establish};
use crate::error::{Error, Result};
use state::{Drained, Slot, State, Waiter};

/// A pooled connection for connector `C`.
pub type PooledConnection<C> = Connection<<C as Connector>::Stream>;

/// Pool of SMTP connections to one server.
///
/// Cloning is cheap; clones share the same connections.
pub struct Pool<C: Connector> {
    shared: Arc<Shared<C>>,
}

impl<C: Connector> Clone for Pool<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<C: Connector> fmt::Debug for Pool<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("Pool")
            .field("host", &self.shared.config.host)
            .field("count", &state.count)
            .field("idle", &state.idle_count())
            .field("waiting", &state.waiters.len())
            .field("closing", &state.closing)
            .finish()
    }
}

impl Pool<TcpConnector> {
    /// Creates a pool that connects over TCP to `config.host`.
    #[must_use]
    pub fn with_config(config: Config) -> Self {
        let connector = TcpConnector::new(&config);
        Self::new(connector, config)
    }
}

impl<C: Connector> Pool<C> {
    /// Creates a pool; no connection is opened until the first acquire.
    #[must_use]
    pub fn new(connector: C, mut config: Config) -> Self {
        config.max_pool_size = config.max_pool_size.max(1);
        let shared = Arc::new_cyclic(|self_ref| Shared {
            self_ref: self_ref.clone(),
            connector,
            config,
            next_id: AtomicU64::new(1),
            state: Mutex::new(State::new()),
            runtime: OnceLock::new(),
        });
        shared.remember_runtime();
        Self { shared }
    }

    /// Returns the configuration the pool was created with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    /// Gets a connection: a verified idle one, a new one, or the next one
    /// released once the pool is full.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PoolClosed`] after [`close`](Self::close), or the
    /// connect/handshake error of a new connection.
    pub async fn acquire(&self) -> Result<PooledConnection<C>> {
        self.shared.acquire().await
    }

    /// Returns a connection to the pool.
    ///
    /// Broken connections are dropped. Without keep-alive, or while the pool
    /// is closing, the connection is closed with `QUIT`. Otherwise it goes to
    /// the oldest waiter or becomes idle.
    pub fn release(&self, conn: PooledConnection<C>) {
        self.shared.release(conn);
    }

    /// Starts closing the pool.
    ///
    /// Queued callers fail with [`Error::PoolClosed`], idle connections are
    /// closed and lent ones are closed on release. `on_drained` runs once the
    /// last connection is gone; if there are none it runs before this
    /// returns.
    ///
    /// # Panics
    ///
    /// Panics if the pool is already closed.
    pub fn close(&self, on_drained: Option<DrainCallback>) {
        let closing = self.shared.lock().begin_close(on_drained);
        let Some(closing) = closing else {
            panic!("pool is already closed");
        };
        debug!(
            waiters = closing.waiters.len(),
            idle = closing.idle.len(),
            "closing pool"
        );

        for waiter in closing.waiters {
            let _ = waiter.send(Err(Error::PoolClosed));
        }
        for conn in closing.idle {
            self.shared.close_detached(conn);
        }
        if let Some(drained) = closing.drained {
            self.shared.finish(drained);
        }
    }

    /// Closes the pool and waits until every connection is gone.
    ///
    /// # Panics
    ///
    /// Panics if the pool is already closed.
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        self.close(Some(Box::new(move || {
            let _ = tx.send(());
        })));
        let _ = rx.await;
    }

    /// Number of live connections, including attempts in progress.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.shared.lock().count
    }

    /// Number of idle connections.
    #[must_use]
    pub fn idle_count(&self) -> usize {
        self.shared.lock().idle_count()
    }

    /// Number of queued acquires.
    #[must_use]
    pub fn waiting(&self) -> usize {
        self.shared.lock().waiters.len()
    }

    /// Returns true once [`close`](Self::close) was called.
    #[must_use]
    pub fn is_closing(&self) -> bool {
        self.shared.lock().closing
    }
}

struct Shared<C: Connector> {
    self_ref: Weak<Self>,
    connector: C,
    config: Config,
    next_id: AtomicU64,
    state: Mutex<State<C::Stream>>,
    /// Runtime the pool was used from, for notifications that arrive on
    /// threads without one.
    runtime: OnceLock<Handle>,
}

enum Next<S> {
    Reuse(Connection<S>),
    Create,
    Wait(oneshot::Receiver<Result<Connection<S>>>),
}

impl<C: Connector> Shared<C> {
    fn lock(&self) -> MutexGuard<'_, State<C::Stream>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn remember_runtime(&self) {
        if self.runtime.get().is_none()
            && let Ok(handle) = Handle::try_current()
        {
            let _ = self.runtime.set(handle);
        }
    }

    /// The current runtime, else the one the pool was first used from.
    fn runtime(&self) -> Option<Handle> {
        Handle::try_current()
            .ok()
            .or_else(|| self.runtime.get().cloned())
    }

    async fn acquire(&self) -> Result<PooledConnection<C>> {
        self.remember_runtime();
        let next = {
            let mut state = self.lock();
            if state.closing {
                return Err(Error::PoolClosed);
            }
            if let Some(conn) = state.take_idle() {
                Next::Reuse(conn)
            } else if state.count < self.config.max_pool_size {
                state.count += 1;
                Next::Create
            } else {
                let (tx, rx) = oneshot::channel();
                state.waiters.push_back(tx);
                debug!(waiting = state.waiters.len(), "pool full, queueing");
                Next::Wait(rx)
            }
        };

        match next {
            Next::Reuse(mut conn) => match conn.probe().await {
                Ok(()) => {
                    debug!(id = conn.id(), "reusing idle connection");
                    Ok(conn)
                }
                Err(e) => {
                    warn!(id = conn.id(), error = %e, "idle connection failed probe");
                    // Reserve the replacement before the broken one reports
                    // its close, so a waiter cannot take the slot.
                    let reserved = {
                        let mut state = self.lock();
                        if state.closing {
                            false
                        } else {
                            state.count += 1;
                            true
                        }
                    };
                    drop(conn);
                    if !reserved {
                        return Err(Error::PoolClosed);
                    }
                    self.create().await
                }
            },
            Next::Create => self.create().await,
            Next::Wait(rx) => rx.await.map_err(|_| Error::PoolClosed)?,
        }
    }

    /// Opens a connection into a slot the caller already counted.
    async fn create(&self) -> Result<PooledConnection<C>> {
        let reservation = Reservation {
            shared: self,
            armed: true,
        };
        let session = establish(&self.connector, &self.config)
            .await
            .inspect_err(|e| debug!(error = %e, "connection attempt failed"))?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let listener: Weak<dyn Lifecycle> = self.self_ref.clone();
        let conn = Connection::new(id, session).with_listener(listener);
        {
            let mut state = self.lock();
            let close_pending = state.closing;
            state.live.insert(id, Slot::Lent { close_pending });
        }
        reservation.commit();

        debug!(id, auth = ?conn.auth(), "connection established");
        Ok(conn)
    }

    fn release(&self, conn: PooledConnection<C>) {
        let id = conn.id();
        if conn.is_broken() {
            debug!(id, "dropping broken connection");
            drop(conn);
            return;
        }

        let to_close = {
            let mut state = self.lock();
            if !self.config.keep_alive || state.closing || state.is_close_pending(id) {
                Some(conn)
            } else {
                let mut pending = Ok(conn);
                while let Some(waiter) = state.waiters.pop_front() {
                    match waiter.send(pending) {
                        Ok(()) => {
                            debug!(id, "handing connection to waiter");
                            return;
                        }
                        Err(back) => pending = back,
                    }
                }
                match pending {
                    Ok(conn) => {
                        let deadline = Instant::now() + self.config.idle_timeout;
                        let expiry = self.arm_expiry(id, deadline);
                        state.park(conn, deadline, expiry);
                        None
                    }
                    Err(_) => None,
                }
            }
        };

        if let Some(conn) = to_close {
            debug!(id, "closing released connection");
            self.close_detached(conn);
        }
    }

    fn arm_expiry(&self, id: ConnectionId, deadline: Instant) -> Option<JoinHandle<()>> {
        let runtime = self.runtime()?;
        let pool = self.self_ref.clone();
        Some(runtime.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let Some(shared) = pool.upgrade() else {
                return;
            };
            let expired = shared.lock().take_expired(id, Instant::now());
            if let Some(conn) = expired {
                debug!(id, "idle connection expired");
                conn.close().await;
            }
        }))
    }

    /// Connector shutdown and the drain callback, outside the lock.
    fn finish(&self, drained: Drained) {
        debug!("pool drained");
        self.connector.shutdown();
        if let Some(callback) = drained.0 {
            callback();
        }
    }

    /// Creates a connection for a waiter whose slot is already counted.
    async fn serve(self: Arc<Self>, waiter: Waiter<C::Stream>) {
        let result = self.create().await;
        if let Err(Ok(conn)) = waiter.send(result) {
            self.release(conn);
        }
    }
}

impl<C: Connector> Lifecycle for Shared<C> {
    fn connection_closed(&self, id: Option<ConnectionId>) {
        let runtime = self.runtime();
        let (removed, waiter, drained) = {
            let mut state = self.lock();
            state.count = state.count.saturating_sub(1);
            let removed = id.and_then(|id| state.live.remove(&id));

            let waiter = if !state.closing
                && state.count < self.config.max_pool_size
                && runtime.is_some()
            {
                let waiter = state.next_waiter();
                if waiter.is_some() {
                    state.count += 1;
                }
                waiter
            } else {
                None
            };

            (removed, waiter, state.check_drained())
        };
        drop(removed);
        debug!(?id, "connection closed");

        if let (Some(waiter), Some(runtime)) = (waiter, runtime) {
            match self.self_ref.upgrade() {
                Some(shared) => {
                    runtime.spawn(shared.serve(waiter));
                }
                None => {
                    let _ = waiter.send(Err(Error::PoolClosed));
                }
            }
        }
        if let Some(drained) = drained {
            self.finish(drained);
        }
    }
}

/// A counted slot for a connection attempt; gives it back unless committed.
struct Reservation<'a, C: Connector> {
    shared: &'a Shared<C>,
    armed: bool,
}

impl<C: Connector> Reservation<'_, C> {
    fn commit(mut self) {
        self.armed = false;
    }
}

impl<C: Connector> Drop for Reservation<'_, C> {
    fn drop(&mut self) {
        if self.armed {
            self.shared.connection_closed(None);
        }
    }
}

impl<C: Connector> Shared<C> {
    /// Closes a connection with `QUIT` on a background task, or drops it
    /// when the pool never saw a runtime.
    fn close_detached(&self, conn: PooledConnection<C>) {
        match self.runtime() {
            Some(runtime) => {
                runtime.spawn(conn.close());
            }
            None => drop(conn),
        }
    }
}
