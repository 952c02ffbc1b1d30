//! Bookkeeping guarded by the pool lock.
//!
//! Nothing here performs I/O. Connections leave the state by value so that
//! their close (and the notification it triggers) runs after the lock is
//! released.

use std::collections::{BTreeMap, VecDeque};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::connection::{Connection, ConnectionId, Status};
use crate::error::Result;

/// Called once when a closing pool has no connections left.
pub type DrainCallback = Box<dyn FnOnce() + Send + 'static>;

/// A queued `acquire`.
pub(super) type Waiter<S> = oneshot::Sender<Result<Connection<S>>>;

/// Pool-side record of a live connection.
pub(super) enum Slot<S> {
    /// Parked; expires at `deadline`.
    Idle {
        conn: Connection<S>,
        deadline: Instant,
        expiry: Option<JoinHandle<()>>,
    },
    /// Owned by a caller (or in flight to a waiter).
    Lent { close_pending: bool },
}

/// Everything `close` has to finish outside the lock.
pub(super) struct Closing<S> {
    pub waiters: Vec<Waiter<S>>,
    pub idle: Vec<Connection<S>>,
    pub drained: Option<Drained>,
}

/// The pool has drained; carries the callback, if one is still registered.
pub(super) struct Drained(pub Option<DrainCallback>);

pub(super) struct State<S> {
    /// Live connections plus reserved slots for attempts in progress.
    pub count: usize,
    pub live: BTreeMap<ConnectionId, Slot<S>>,
    pub waiters: VecDeque<Waiter<S>>,
    pub closing: bool,
    on_drained: Option<DrainCallback>,
    drained: bool,
}

impl<S> State<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new() -> Self {
        Self {
            count: 0,
            live: BTreeMap::new(),
            waiters: VecDeque::new(),
            closing: false,
            on_drained: None,
            drained: false,
        }
    }

    /// Takes the idle connection with the lowest id and marks it lent.
    pub fn take_idle(&mut self) -> Option<Connection<S>> {
        let id = self
            .live
            .iter()
            .find_map(|(id, slot)| matches!(slot, Slot::Idle { .. }).then_some(*id))?;

        match self.live.insert(id, Slot::Lent { close_pending: false }) {
            Some(Slot::Idle { mut conn, expiry, .. }) => {
                if let Some(expiry) = expiry {
                    expiry.abort();
                }
                conn.set_status(Status::InUse);
                Some(conn)
            }
            _ => None,
        }
    }

    /// Parks a connection until `deadline`.
    pub fn park(
        &mut self,
        mut conn: Connection<S>,
        deadline: Instant,
        expiry: Option<JoinHandle<()>>,
    ) {
        conn.set_status(Status::Idle);
        self.live.insert(conn.id(), Slot::Idle {
            conn,
            deadline,
            expiry,
        });
    }

    /// Takes connection `id` if it is idle and its deadline has passed.
    ///
    /// A connection that was reused and parked again has a later deadline
    /// and stays.
    pub fn take_expired(&mut self, id: ConnectionId, now: Instant) -> Option<Connection<S>> {
        match self.live.get(&id) {
            Some(Slot::Idle { deadline, .. }) if *deadline <= now => {}
            _ => return None,
        }
        match self.live.insert(id, Slot::Lent { close_pending: true }) {
            Some(Slot::Idle { conn, .. }) => Some(conn),
            _ => None,
        }
    }

    pub fn is_close_pending(&self, id: ConnectionId) -> bool {
        matches!(self.live.get(&id), Some(Slot::Lent { close_pending: true }))
    }

    /// Pops the oldest waiter whose caller is still waiting.
    pub fn next_waiter(&mut self) -> Option<Waiter<S>> {
        while let Some(waiter) = self.waiters.pop_front() {
            if !waiter.is_closed() {
                return Some(waiter);
            }
        }
        None
    }

    pub fn idle_count(&self) -> usize {
        self.live
            .values()
            .filter(|slot| matches!(slot, Slot::Idle { .. }))
            .count()
    }

    /// Switches to closing. Returns `None` if the pool was already closing.
    pub fn begin_close(&mut self, on_drained: Option<DrainCallback>) -> Option<Closing<S>> {
        if self.closing {
            return None;
        }
        self.closing = true;
        self.on_drained = on_drained;

        let waiters = self.waiters.drain(..).collect();

        let mut idle = Vec::new();
        for slot in self.live.values_mut() {
            if let Slot::Idle { conn, expiry, .. } =
                std::mem::replace(slot, Slot::Lent { close_pending: true })
            {
                if let Some(expiry) = expiry {
                    expiry.abort();
                }
                idle.push(conn);
            }
        }

        Some(Closing {
            waiters,
            idle,
            drained: self.check_drained(),
        })
    }

    /// Reports the drain exactly once: closing and nothing left.
    pub fn check_drained(&mut self) -> Option<Drained> {
        if self.closing && self.count == 0 && !self.drained {
            self.drained = true;
            Some(Drained(self.on_drained.take()))
        } else {
            None
        }
    }
}
