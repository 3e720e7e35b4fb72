//! Unit-of-Work Binding
//!
//! A unit of work is one logical execution context (typically one inbound
//! request) bound to the current thread. It owns every REQUEST-scoped cache
//! created while it is bound, and its id is the context half of a lock
//! owner's identity.
//!
//! ```text
//! UnitOfWork::begin() ──▶ guard bound to thread ──▶ drop(guard)
//!                              │                         │
//!                  REQUEST caches created lazily   REQUEST caches discarded
//! ```
//!
//! A thread that never calls [`UnitOfWork::begin`] gets an implicit unit of
//! work on first use, which lives as long as the thread.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::error::Result;

thread_local! {
    static CURRENT: RefCell<Option<Arc<UnitOfWork>>> = const { RefCell::new(None) };
}

/// Identifier of one unit of work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ContextId(Uuid);

impl ContextId {
    fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for ContextId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub(crate) type ErasedCache = Arc<dyn Any + Send + Sync>;

/// Registry key: (provider instance, cache name)
type RequestCacheKey = (u64, String);

/// One bound execution context and its REQUEST-scoped caches
pub struct UnitOfWork {
    id: ContextId,
    started_at: DateTime<Utc>,
    caches: Mutex<HashMap<RequestCacheKey, ErasedCache>>,
    ended: AtomicBool,
}

impl UnitOfWork {
    fn new() -> Self {
        Self {
            id: ContextId::generate(),
            started_at: Utc::now(),
            caches: Mutex::new(HashMap::new()),
            ended: AtomicBool::new(false),
        }
    }

    /// Bind a fresh unit of work to the current thread.
    ///
    /// The previous binding (if any) is restored when the guard drops.
    pub fn begin() -> UnitOfWorkGuard {
        let uow = Arc::new(UnitOfWork::new());
        let previous = CURRENT.with(|current| current.replace(Some(Arc::clone(&uow))));
        debug!(context = %uow.id, "Unit of work started");
        UnitOfWorkGuard {
            uow,
            previous,
            _not_send: PhantomData,
        }
    }

    /// The unit of work bound to this thread, creating an implicit one if needed
    pub fn current() -> Arc<UnitOfWork> {
        CURRENT.with(|current| {
            let mut slot = current.borrow_mut();
            Arc::clone(slot.get_or_insert_with(|| Arc::new(UnitOfWork::new())))
        })
    }

    /// Id of the unit of work bound to this thread
    pub fn current_id() -> ContextId {
        Self::current().id
    }

    /// Id of this unit of work
    pub fn id(&self) -> ContextId {
        self.id
    }

    /// When this unit of work was created
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Number of REQUEST-scoped caches currently held
    pub fn cache_count(&self) -> usize {
        self.caches.lock().len()
    }

    /// Resolve a REQUEST-scoped cache, creating it on first use
    pub(crate) fn request_cache<F>(
        &self,
        provider: u64,
        name: &str,
        create: F,
    ) -> Result<ErasedCache>
    where
        F: FnOnce() -> Result<ErasedCache>,
    {
        let mut caches = self.caches.lock();
        let key = (provider, name.to_string());
        if let Some(existing) = caches.get(&key) {
            return Ok(Arc::clone(existing));
        }
        let cache = create()?;
        caches.insert(key, Arc::clone(&cache));
        Ok(cache)
    }

    /// Names of the REQUEST-scoped caches created by `provider`
    pub(crate) fn request_cache_names(&self, provider: u64) -> Vec<String> {
        self.caches
            .lock()
            .keys()
            .filter(|(owner, _)| *owner == provider)
            .map(|(_, name)| name.clone())
            .collect()
    }

    /// Drop the REQUEST-scoped caches created by `provider`
    pub(crate) fn unbind_provider(&self, provider: u64) -> usize {
        let mut caches = self.caches.lock();
        let before = caches.len();
        caches.retain(|(owner, _), _| *owner != provider);
        before - caches.len()
    }

    fn teardown(&self) -> usize {
        self.ended.store(true, Ordering::Release);
        let mut caches = self.caches.lock();
        let dropped = caches.len();
        caches.clear();
        dropped
    }
}

impl std::fmt::Debug for UnitOfWork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("id", &self.id)
            .field("started_at", &self.started_at)
            .field("caches", &self.cache_count())
            .finish()
    }
}

/// Keeps a unit of work bound to the current thread.
///
/// Not `Send`: the binding belongs to the thread that created it.
pub struct UnitOfWorkGuard {
    uow: Arc<UnitOfWork>,
    previous: Option<Arc<UnitOfWork>>,
    _not_send: PhantomData<*const ()>,
}

impl UnitOfWorkGuard {
    /// Id of the guarded unit of work
    pub fn id(&self) -> ContextId {
        self.uow.id
    }

    /// The guarded unit of work
    pub fn unit_of_work(&self) -> &Arc<UnitOfWork> {
        &self.uow
    }

    /// End the unit of work now
    pub fn end(self) {}
}

impl Drop for UnitOfWorkGuard {
    fn drop(&mut self) {
        let dropped = self.uow.teardown();
        let previous = self.previous.take();
        // Guards dropped out of nesting order: leave a newer binding alone
        // and never fall back to a unit that has already ended.
        CURRENT.with(|current| {
            let mut slot = current.borrow_mut();
            if slot.as_ref().is_some_and(|bound| Arc::ptr_eq(bound, &self.uow)) {
                *slot = previous.filter(|uow| !uow.ended.load(Ordering::Acquire));
            }
        });
        let elapsed_ms = (Utc::now() - self.uow.started_at()).num_milliseconds();
        debug!(
            context = %self.uow.id,
            caches = dropped,
            elapsed_ms,
            "Unit of work ended"
        );
    }
}

// =============================================================================
// Tests
// =============================================================================
