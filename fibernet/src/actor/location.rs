//! Location-keyed messaging.
//!
//! Some actors are known by a stable key (a player id, a room id) rather
//! than by their current [`ActorId`], which changes whenever the entity is
//! recreated or moves to another fiber. A [`LocationDirectory`] maps keys to
//! ids; [`LocationSender`] resolves them with a local cache.
//!
//! Sends to one key are serialized with the
//! [`MessageLocationSender`](CoroutineLockType::MessageLocationSender) lock,
//! so a key sees its messages in the order they were issued. A response with
//! `ERR_NOT_FOUND_ACTOR` drops the cached id; the response is still
//! returned, there is no silent retry.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;

use super::error::DispatchError;
use super::fiber::Fiber;
use crate::lock::CoroutineLockType;
use fibernet_core::{ActorId, Message, MessageCodec, Providers, Request, Response, error_code};

/// Maps location keys to the actor currently serving them.
#[async_trait(?Send)]
pub trait LocationDirectory {
    /// Current actor for `key`, if any.
    async fn lookup(&self, key: u64) -> Result<Option<ActorId>, DispatchError>;

    /// Point `key` at `actor`, replacing any previous entry.
    async fn register(&self, key: u64, actor: ActorId) -> Result<(), DispatchError>;

    /// Remove `key`.
    async fn unregister(&self, key: u64) -> Result<(), DispatchError>;
}

/// Process-local directory, shareable between fibers on any thread.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLocationDirectory {
    entries: Arc<RwLock<HashMap<u64, ActorId>>>,
}

impl InMemoryLocationDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered keys.
    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether no key is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait(?Send)]
impl LocationDirectory for InMemoryLocationDirectory {
    async fn lookup(&self, key: u64) -> Result<Option<ActorId>, DispatchError> {
        Ok(self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .copied())
    }

    async fn register(&self, key: u64, actor: ActorId) -> Result<(), DispatchError> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, actor);
        Ok(())
    }

    async fn unregister(&self, key: u64) -> Result<(), DispatchError> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&key);
        Ok(())
    }
}

struct LocationSenderInner<P: Providers, C: MessageCodec, D> {
    fiber: Fiber<P, C>,
    directory: D,
    cache: RefCell<HashMap<u64, ActorId>>,
    lock_timeout: Duration,
}

/// Sends to actors by location key from one fiber.
pub struct LocationSender<P: Providers, C: MessageCodec, D: LocationDirectory> {
    inner: Rc<LocationSenderInner<P, C, D>>,
}

impl<P: Providers, C: MessageCodec, D: LocationDirectory> Clone for LocationSender<P, C, D> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<P: Providers, C: MessageCodec, D: LocationDirectory> LocationSender<P, C, D> {
    /// Create a sender issuing from `fiber`.
    pub fn new(fiber: Fiber<P, C>, directory: D) -> Self {
        Self::with_lock_timeout(fiber, directory, Duration::from_secs(60))
    }

    /// Like [`new`](Self::new) with an explicit per-key lock timeout.
    pub fn with_lock_timeout(fiber: Fiber<P, C>, directory: D, lock_timeout: Duration) -> Self {
        Self {
            inner: Rc::new(LocationSenderInner {
                fiber,
                directory,
                cache: RefCell::new(HashMap::new()),
                lock_timeout,
            }),
        }
    }

    /// The directory in use.
    pub fn directory(&self) -> &D {
        &self.inner.directory
    }

    /// Cached actor for `key`.
    pub fn cached(&self, key: u64) -> Option<ActorId> {
        self.inner.cache.borrow().get(&key).copied()
    }

    /// Drop the cached actor for `key`.
    pub fn invalidate(&self, key: u64) {
        if self.inner.cache.borrow_mut().remove(&key).is_some() {
            tracing::debug!(key, "location cache invalidated");
        }
    }

    async fn resolve(&self, key: u64) -> Result<ActorId, DispatchError> {
        if let Some(actor) = self.cached(key) {
            return Ok(actor);
        }
        let actor = self
            .inner
            .directory
            .lookup(key)
            .await?
            .ok_or(DispatchError::LocationNotFound { key })?;
        self.inner.cache.borrow_mut().insert(key, actor);
        Ok(actor)
    }

    /// Send a message to the actor serving `key`.
    ///
    /// # Errors
    ///
    /// [`DispatchError::LocationNotFound`], a lock timeout, or a send error.
    pub async fn send<M: Message>(&self, key: u64, message: &M) -> Result<(), DispatchError> {
        let _lock = self
            .inner
            .fiber
            .locks()
            .wait(CoroutineLockType::MessageLocationSender, key, self.inner.lock_timeout)
            .await?;
        let target = self.resolve(key).await?;
        self.inner.fiber.send(target, message)
    }

    /// Call the actor serving `key`.
    ///
    /// # Errors
    ///
    /// [`DispatchError::LocationNotFound`], a lock timeout, or the call's
    /// error.
    pub async fn call<R: Request>(
        &self,
        key: u64,
        request: R,
    ) -> Result<R::Response, DispatchError> {
        let _lock = self
            .inner
            .fiber
            .locks()
            .wait(CoroutineLockType::MessageLocationSender, key, self.inner.lock_timeout)
            .await?;
        let target = self.resolve(key).await?;
        let response = self.inner.fiber.call(target, request).await?;
        if response.error() == error_code::ERR_NOT_FOUND_ACTOR {
            tracing::debug!(key, actor = %target, "located actor gone");
            self.invalidate(key);
        }
        Ok(response)
    }
}
