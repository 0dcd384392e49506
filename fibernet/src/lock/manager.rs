//! Lock manager, tickets and wait futures.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::oneshot;

use super::{CoroutineLockType, LockError};
use fibernet_core::TimeProvider;

/// Consecutive hand-offs allowed before the next one is deferred to
/// [`CoroutineLockManager::update`].
pub const MAX_NOTIFY_LEVEL: u32 = 10;

type LockKey = (CoroutineLockType, u64);
type Grant = Result<CoroutineLock, LockError>;

struct Waiter {
    id: u64,
    timeout: Duration,
    tx: oneshot::Sender<Grant>,
}

/// Holder plus waiters of one key. Present only while the key is held.
#[derive(Default)]
struct KeyQueue {
    waiters: VecDeque<Waiter>,
}

struct LockState {
    /// A key is held iff it has an entry.
    queues: HashMap<LockKey, KeyQueue>,
    /// Waiter deadlines in expiry order.
    timeouts: BTreeMap<(Duration, u64), LockKey>,
    /// Hand-offs deferred to the next update.
    next_frame: VecDeque<LockKey>,
    next_waiter_id: u64,
}

impl LockState {
    /// Give the lock to the next live waiter, or free the key.
    fn notify_next(&mut self, weak: &Weak<RefCell<LockState>>, key: LockKey, level: u32) {
        loop {
            let Some(queue) = self.queues.get_mut(&key) else {
                return;
            };
            let Some(waiter) = queue.waiters.pop_front() else {
                self.queues.remove(&key);
                return;
            };

            let lock = CoroutineLock {
                state: Some(weak.clone()),
                lock_type: key.0,
                key: key.1,
                level,
            };
            match waiter.tx.send(Ok(lock)) {
                Ok(()) => return,
                // Waiter gone; the ticket must not release through Drop
                // while this borrow is held.
                Err(Ok(mut lock)) => lock.disarm(),
                Err(Err(_)) => {}
            }
        }
    }
}

/// Per-key FIFO lock manager for one single-threaded context.
///
/// Cloning yields another handle to the same locks.
pub struct CoroutineLockManager<T: TimeProvider> {
    state: Rc<RefCell<LockState>>,
    time: T,
}

impl<T: TimeProvider> Clone for CoroutineLockManager<T> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            time: self.time.clone(),
        }
    }
}

impl<T: TimeProvider> CoroutineLockManager<T> {
    /// Create a manager reading deadlines from `time`.
    pub fn new(time: T) -> Self {
        Self {
            state: Rc::new(RefCell::new(LockState {
                queues: HashMap::new(),
                timeouts: BTreeMap::new(),
                next_frame: VecDeque::new(),
                next_waiter_id: 0,
            })),
            time,
        }
    }

    /// Request the lock for `(lock_type, key)`.
    ///
    /// The caller is queued immediately, so grant order is call order even
    /// if the returned futures are polled in a different order. A free key
    /// is granted at level 1 without waiting. A queued waiter fails with
    /// [`LockError::Timeout`] if it is still queued when
    /// [`sweep_timeouts`](Self::sweep_timeouts) passes its deadline. A zero
    /// `timeout` waits without a deadline.
    pub fn wait(&self, lock_type: CoroutineLockType, key: u64, timeout: Duration) -> WaitLock {
        let mut state = self.state.borrow_mut();
        let lock_key = (lock_type, key);

        if !state.queues.contains_key(&lock_key) {
            state.queues.insert(lock_key, KeyQueue::default());
            return WaitLock {
                state: WaitState::Ready(Some(CoroutineLock {
                    state: Some(Rc::downgrade(&self.state)),
                    lock_type,
                    key,
                    level: 1,
                })),
            };
        }

        let id = state.next_waiter_id;
        state.next_waiter_id += 1;
        let (tx, rx) = oneshot::channel();

        if let Some(queue) = state.queues.get_mut(&lock_key) {
            queue.waiters.push_back(Waiter { id, timeout, tx });
        }
        if !timeout.is_zero() {
            let deadline = self.time.now() + timeout;
            state.timeouts.insert((deadline, id), lock_key);
        }

        tracing::trace!(%lock_type, key, waiter = id, "queued for coroutine lock");
        WaitLock {
            state: WaitState::Pending(rx),
        }
    }

    /// Run hand-offs deferred since the last update, each at level 1.
    pub fn update(&self) {
        let mut state = self.state.borrow_mut();
        let deferred: Vec<LockKey> = state.next_frame.drain(..).collect();
        let weak = Rc::downgrade(&self.state);
        for key in deferred {
            state.notify_next(&weak, key, 1);
        }
    }

    /// Fail every waiter whose deadline is at or before `now`.
    ///
    /// Waiters that already got the lock or gave up are skipped.
    pub fn sweep_timeouts(&self, now: Duration) {
        let mut state = self.state.borrow_mut();
        loop {
            let Some((&(deadline, id), &lock_key)) = state.timeouts.iter().next() else {
                return;
            };
            if deadline > now {
                return;
            }
            state.timeouts.remove(&(deadline, id));

            let Some(queue) = state.queues.get_mut(&lock_key) else {
                continue;
            };
            let Some(position) = queue.waiters.iter().position(|w| w.id == id) else {
                continue;
            };
            let Some(waiter) = queue.waiters.remove(position) else {
                continue;
            };

            tracing::warn!(
                lock_type = %lock_key.0,
                key = lock_key.1,
                after = ?waiter.timeout,
                "coroutine lock timeout, possible deadlock"
            );
            let _ = waiter.tx.send(Err(LockError::Timeout {
                lock_type: lock_key.0,
                key: lock_key.1,
                after: waiter.timeout,
            }));
        }
    }

    /// [`update`](Self::update) then [`sweep_timeouts`](Self::sweep_timeouts)
    /// at the current time.
    pub fn tick(&self) {
        self.update();
        self.sweep_timeouts(self.time.now());
    }

    /// Waiters queued behind the holder of `(lock_type, key)`.
    pub fn queue_len(&self, lock_type: CoroutineLockType, key: u64) -> usize {
        self.state
            .borrow()
            .queues
            .get(&(lock_type, key))
            .map_or(0, |queue| queue.waiters.len())
    }

    /// Whether `(lock_type, key)` is held.
    pub fn is_locked(&self, lock_type: CoroutineLockType, key: u64) -> bool {
        self.state.borrow().queues.contains_key(&(lock_type, key))
    }

    /// Number of held keys across all types.
    pub fn lock_count(&self) -> usize {
        self.state.borrow().queues.len()
    }
}

/// Exclusive hold on one `(type, key)`. Released on drop.
#[must_use = "the lock is released as soon as the ticket is dropped"]
pub struct CoroutineLock {
    state: Option<Weak<RefCell<LockState>>>,
    lock_type: CoroutineLockType,
    key: u64,
    level: u32,
}

impl std::fmt::Debug for CoroutineLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoroutineLock")
            .field("lock_type", &self.lock_type)
            .field("key", &self.key)
            .field("level", &self.level)
            .finish()
    }
}

impl CoroutineLock {
    /// Lock domain.
    pub fn lock_type(&self) -> CoroutineLockType {
        self.lock_type
    }

    /// Lock key.
    pub fn key(&self) -> u64 {
        self.key
    }

    /// Number of consecutive hand-offs that led to this grant.
    pub fn level(&self) -> u32 {
        self.level
    }

    /// Release explicitly. Same as dropping the ticket.
    pub fn release(self) {}

    fn disarm(&mut self) {
        self.state = None;
    }
}

impl Drop for CoroutineLock {
    fn drop(&mut self) {
        let Some(state) = self.state.take().and_then(|weak| weak.upgrade()) else {
            return;
        };
        let weak = Rc::downgrade(&state);
        let key = (self.lock_type, self.key);
        let mut state = state.borrow_mut();

        if self.level >= MAX_NOTIFY_LEVEL {
            tracing::debug!(lock_type = %self.lock_type, key = self.key, "deferring lock hand-off");
            state.next_frame.push_back(key);
        } else {
            state.notify_next(&weak, key, self.level + 1);
        }
    }
}

enum WaitState {
    Ready(Option<CoroutineLock>),
    Pending(oneshot::Receiver<Grant>),
}

/// Future returned by [`CoroutineLockManager::wait`].
///
/// Dropping it gives up the place in the queue.
#[must_use = "dropping the future gives up the place in the queue"]
pub struct WaitLock {
    state: WaitState,
}

impl WaitLock {
    /// Whether the lock was granted without queueing.
    pub fn is_immediate(&self) -> bool {
        matches!(self.state, WaitState::Ready(_))
    }
}

impl Future for WaitLock {
    type Output = Result<CoroutineLock, LockError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().state {
            WaitState::Ready(lock) => match lock.take() {
                Some(lock) => Poll::Ready(Ok(lock)),
                None => Poll::Ready(Err(LockError::ManagerDropped)),
            },
            WaitState::Pending(rx) => match Pin::new(rx).poll(cx) {
                Poll::Ready(Ok(grant)) => Poll::Ready(grant),
                Poll::Ready(Err(_)) => Poll::Ready(Err(LockError::ManagerDropped)),
                Poll::Pending => Poll::Pending,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fibernet_core::TokioTimeProvider;

    const WAIT: Duration = Duration::from_secs(60);
    const MAILBOX: CoroutineLockType = CoroutineLockType::Mailbox;

    fn manager() -> CoroutineLockManager<TokioTimeProvider> {
        CoroutineLockManager::new(TokioTimeProvider::new())
    }

    #[tokio::test(start_paused = true)]
    async fn test_free_key_granted_at_level_one() {
        let locks = manager();
        let lock = locks.wait(MAILBOX, 7, WAIT).await.expect("granted");
        assert_eq!(lock.level(), 1);
        assert!(locks.is_locked(MAILBOX, 7));
        assert!(!locks.is_locked(CoroutineLockType::Db, 7));

        drop(lock);
        assert!(!locks.is_locked(MAILBOX, 7));
        assert_eq!(locks.lock_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_grant_order_is_call_order() {
        let locks = manager();
        let holder = locks.wait(MAILBOX, 1, WAIT).await.expect("granted");

        let first = locks.wait(MAILBOX, 1, WAIT);
        let second = locks.wait(MAILBOX, 1, WAIT);
        let third = locks.wait(MAILBOX, 1, WAIT);
        assert_eq!(locks.queue_len(MAILBOX, 1), 3);

        holder.release();
        let first = first.await.expect("first");
        assert_eq!(first.level(), 2);
        assert_eq!(locks.queue_len(MAILBOX, 1), 2);

        drop(first);
        let second = second.await.expect("second");
        assert_eq!(second.level(), 3);

        drop(second);
        let third = third.await.expect("third");
        assert_eq!(third.level(), 4);

        drop(third);
        assert_eq!(locks.lock_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hand_off_defers_at_max_level() {
        let locks = manager();
        let mut current = locks.wait(MAILBOX, 3, WAIT).await.expect("granted");
        let waiters: Vec<WaitLock> = (0..MAX_NOTIFY_LEVEL)
            .map(|_| locks.wait(MAILBOX, 3, WAIT))
            .collect();
        let mut waiters = waiters.into_iter();

        for expected in 2..=MAX_NOTIFY_LEVEL {
            let next = waiters.next().expect("waiter");
            drop(current);
            current = next.await.expect("granted");
            assert_eq!(current.level(), expected);
        }

        // Level 10 releases without handing off.
        drop(current);
        assert!(locks.is_locked(MAILBOX, 3));
        assert_eq!(locks.queue_len(MAILBOX, 3), 1);

        locks.update();
        let last = waiters.next().expect("last waiter").await.expect("granted");
        assert_eq!(last.level(), 1);
        assert_eq!(locks.queue_len(MAILBOX, 3), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_waiter_is_skipped() {
        let locks = manager();
        let holder = locks.wait(MAILBOX, 1, WAIT).await.expect("granted");
        let gone = locks.wait(MAILBOX, 1, WAIT);
        assert!(!gone.is_immediate());
        let next = locks.wait(MAILBOX, 1, WAIT);

        drop(gone);
        drop(holder);

        let next = next.await.expect("granted");
        assert_eq!(next.level(), 2);
        assert_eq!(locks.queue_len(MAILBOX, 1), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fails_queued_waiter_once() {
        let time = TokioTimeProvider::new();
        let locks = CoroutineLockManager::new(time.clone());
        let holder = locks.wait(MAILBOX, 5, WAIT).await.expect("granted");
        let waiter = locks.wait(MAILBOX, 5, Duration::from_secs(1));

        locks.sweep_timeouts(time.now());
        assert_eq!(locks.queue_len(MAILBOX, 5), 1);

        locks.sweep_timeouts(time.now() + Duration::from_secs(2));
        assert_eq!(
            waiter.await.map(|lock| lock.level()),
            Err(LockError::Timeout {
                lock_type: MAILBOX,
                key: 5,
                after: Duration::from_secs(1)
            })
        );
        assert_eq!(locks.queue_len(MAILBOX, 5), 0);

        drop(holder);
        assert_eq!(locks.lock_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_timeout_never_expires() {
        let time = TokioTimeProvider::new();
        let locks = CoroutineLockManager::new(time.clone());
        let holder = locks.wait(MAILBOX, 9, WAIT).await.expect("granted");
        let waiter = locks.wait(MAILBOX, 9, Duration::ZERO);

        locks.sweep_timeouts(time.now() + Duration::from_secs(3600));
        locks.tick();
        assert_eq!(locks.queue_len(MAILBOX, 9), 1);

        drop(holder);
        let lock = waiter.await.expect("granted after holder released");
        assert_eq!(lock.level(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_after_grant_is_noop() {
        let time = TokioTimeProvider::new();
        let locks = CoroutineLockManager::new(time.clone());
        let holder = locks.wait(MAILBOX, 5, WAIT).await.expect("granted");
        let waiter = locks.wait(MAILBOX, 5, Duration::from_secs(1));

        drop(holder);
        let lock = waiter.await.expect("granted");

        locks.sweep_timeouts(time.now() + Duration::from_secs(10));
        assert!(locks.is_locked(MAILBOX, 5));
        assert_eq!(lock.level(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiters_across_tasks() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let locks = manager();
                let order = Rc::new(RefCell::new(Vec::new()));
                let holder = locks.wait(MAILBOX, 9, WAIT).await.expect("granted");

                let mut handles = Vec::new();
                for i in 0..5 {
                    let wait = locks.wait(MAILBOX, 9, WAIT);
                    let order = order.clone();
                    handles.push(tokio::task::spawn_local(async move {
                        let _lock = wait.await.expect("granted");
                        order.borrow_mut().push(i);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }));
                }

                drop(holder);
                for handle in handles {
                    handle.await.expect("join");
                }
                assert_eq!(*order.borrow(), vec![0, 1, 2, 3, 4]);
                assert_eq!(locks.lock_count(), 0);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_manager_drop_fails_waiters() {
        let locks = manager();
        let holder = locks.wait(MAILBOX, 1, WAIT).await.expect("granted");
        let waiter = locks.wait(MAILBOX, 1, WAIT);

        drop(locks);
        assert_eq!(waiter.await.map(|l| l.level()), Err(LockError::ManagerDropped));
        drop(holder);
    }
}
