use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{error, info, warn};

use crate::session::{FetchError, Session, SessionFactory};

const CLOSE_TIMEOUT: Duration = Duration::from_secs(10);

enum Slot<S> {
    Ready(S),
    /// No live session; the next `acquire` of this slot builds one.
    Vacant,
}

struct Slots<S> {
    free: Vec<Slot<S>>,
    leased: usize,
}

/// Point-in-time view; `leased + free == capacity` holds until `shutdown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub capacity: usize,
    pub leased: usize,
    pub free: usize,
}

/// Fixed-size set of reusable sessions, each owned by at most one task at a time.
pub struct SessionPool<F: SessionFactory> {
    factory: F,
    capacity: usize,
    close_timeout: Duration,
    permits: Arc<Semaphore>,
    slots: Mutex<Slots<F::Session>>,
}

impl<F: SessionFactory> SessionPool<F> {
    /// Builds every session up front. Fails only if none could be created.
    pub async fn new(factory: F, capacity: usize) -> Result<Arc<Self>, FetchError> {
        Self::with_close_timeout(factory, capacity, CLOSE_TIMEOUT).await
    }

    /// Like [`SessionPool::new`]; a session that takes longer than
    /// `close_timeout` to close is abandoned.
    pub async fn with_close_timeout(
        factory: F,
        capacity: usize,
        close_timeout: Duration,
    ) -> Result<Arc<Self>, FetchError> {
        let mut free = Vec::with_capacity(capacity);
        let mut last_err = None;
        for i in 0..capacity {
            match factory.create().await {
                Ok(session) => free.push(Slot::Ready(session)),
                Err(e) => {
                    warn!("session {} of {} failed to start: {}", i + 1, capacity, e);
                    free.push(Slot::Vacant);
                    last_err = Some(e);
                }
            }
        }

        if !free.iter().any(|s| matches!(s, Slot::Ready(_))) {
            return Err(last_err.unwrap_or_else(|| FetchError::Launch("pool capacity is zero".into())));
        }
        info!("session pool ready ({} sessions)", capacity);

        Ok(Arc::new(Self {
            factory,
            capacity,
            close_timeout,
            permits: Arc::new(Semaphore::new(capacity)),
            slots: Mutex::new(Slots { free, leased: 0 }),
        }))
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> PoolStats {
        let slots = self.lock();
        PoolStats {
            capacity: self.capacity,
            leased: slots.leased,
            free: slots.free.len(),
        }
    }

    /// Waits for a free session and leases it exclusively.
    pub async fn acquire(self: &Arc<Self>) -> Result<Lease<F>, FetchError> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| FetchError::Launch("session pool is shut down".into()))?;

        let slot = {
            let mut slots = self.lock();
            let slot = slots.free.pop();
            if slot.is_some() {
                slots.leased += 1;
            }
            slot
        };

        let session = match slot {
            Some(Slot::Ready(session)) => session,
            Some(Slot::Vacant) => match self.factory.create().await {
                Ok(session) => session,
                Err(e) => {
                    self.put_back(Slot::Vacant);
                    return Err(e);
                }
            },
            // A permit always corresponds to a free slot.
            None => return Err(FetchError::Launch("no free session slot".into())),
        };

        Ok(Lease {
            session,
            slot: SlotGuard {
                pool: Arc::clone(self),
                permit: Some(permit),
                returned: false,
            },
        })
    }

    /// Probes the session and returns it, or a fresh replacement if it is dead.
    async fn check_in(&self, mut session: F::Session) -> Slot<F::Session> {
        if session.is_alive().await {
            return Slot::Ready(session);
        }

        warn!("session unresponsive, replacing it");
        self.retire(session).await;
        match self.factory.create().await {
            Ok(fresh) => Slot::Ready(fresh),
            Err(e) => {
                error!("failed to replace session: {}", e);
                Slot::Vacant
            }
        }
    }

    async fn retire(&self, session: F::Session) {
        if tokio::time::timeout(self.close_timeout, session.close()).await.is_err() {
            warn!("session did not close within {:?}, abandoning it", self.close_timeout);
        }
    }

    fn put_back(&self, slot: Slot<F::Session>) {
        let mut slots = self.lock();
        slots.leased -= 1;
        slots.free.push(slot);
    }

    /// Waits for every lease to come back, then closes all sessions.
    pub async fn shutdown(&self) {
        let Ok(all) = self.permits.acquire_many(self.capacity as u32).await else {
            return;
        };
        let free = std::mem::take(&mut self.lock().free);
        for slot in free {
            if let Slot::Ready(session) = slot {
                self.retire(session).await;
            }
        }
        all.forget();
        self.permits.close();
        info!("session pool closed");
    }

    fn lock(&self) -> MutexGuard<'_, Slots<F::Session>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Exclusive use of one pooled session.
///
/// Call [`Lease::release`] when done. A lease dropped without it (panic,
/// cancellation) discards its session and leaves the slot vacant.
pub struct Lease<F: SessionFactory> {
    session: F::Session,
    slot: SlotGuard<F>,
}

impl<F: SessionFactory> Lease<F> {
    pub fn session(&mut self) -> &mut F::Session {
        &mut self.session
    }

    pub async fn release(self) {
        let Lease { session, mut slot } = self;
        let checked = slot.pool.check_in(session).await;
        slot.pool.put_back(checked);
        slot.returned = true;
    }
}

/// Holds the lease's place in the pool until the slot is handed back.
struct SlotGuard<F: SessionFactory> {
    pool: Arc<SessionPool<F>>,
    permit: Option<OwnedSemaphorePermit>,
    returned: bool,
}

impl<F: SessionFactory> Drop for SlotGuard<F> {
    fn drop(&mut self) {
        if !self.returned {
            warn!("session lease dropped without release, slot left vacant");
            self.pool.put_back(Slot::Vacant);
        }
        // The slot is back in the free list before its permit is.
        self.permit.take();
    }
}
