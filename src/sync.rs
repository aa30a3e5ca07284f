use core::{future::poll_fn, task::Poll};

use portable_atomic::{AtomicU8, AtomicUsize, Ordering};

use atomic_waker::AtomicWaker;

/// Returned by [RecordLock::try_lock], if the lock is held by someone else.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LockBusy;

/// A one bit lock, that never waits.
///
/// Both processors take this lock from contexts, where blocking isn't an option, so the only
/// operation offered is trying once.
pub struct RecordLock {
    state: AtomicU8,
}
impl RecordLock {
    const UNLOCKED: u8 = 0;
    const LOCKED: u8 = 1;
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(Self::UNLOCKED),
        }
    }
    /// Attempt to take the lock.
    pub fn try_lock(&self) -> Result<(), LockBusy> {
        self.state
            .compare_exchange(
                Self::UNLOCKED,
                Self::LOCKED,
                Ordering::Acquire,
                Ordering::Relaxed,
            )
            .map(|_| ())
            .map_err(|_| LockBusy)
    }
    /// Release the lock.
    ///
    /// This must only be called by the holder.
    pub fn unlock(&self) {
        self.state.store(Self::UNLOCKED, Ordering::Release);
    }
    /// Check if the lock is currently held.
    pub fn is_locked(&self) -> bool {
        self.state.load(Ordering::Relaxed) == Self::LOCKED
    }
}
impl Default for RecordLock {
    fn default() -> Self {
        Self::new()
    }
}

/// Counts frames, that were placed in the RX ring, and lets the client await them.
///
/// The engine side never touches this directly. It calls its sync handler, which is expected to
/// end up in [FrameNotifier::put] on the client side, e.g. through an IPC interrupt.
pub struct FrameNotifier {
    waker: AtomicWaker,
    pending: AtomicUsize,
}
impl FrameNotifier {
    pub const fn new() -> Self {
        Self {
            waker: AtomicWaker::new(),
            pending: AtomicUsize::new(0),
        }
    }
    /// Note, that another frame is ready.
    pub fn put(&self) {
        self.pending.fetch_add(1, Ordering::Release);
        self.waker.wake();
    }
    /// Notifications, that weren't awaited yet.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }
    /// Consume one notification, if there is one.
    fn take(&self) -> bool {
        self.pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |pending| {
                pending.checked_sub(1)
            })
            .is_ok()
    }
    /// Asynchronously wait for the next notification.
    pub async fn next(&self) {
        poll_fn(|cx| {
            if self.take() {
                return Poll::Ready(());
            }
            self.waker.register(cx.waker());
            // Catch a put, that raced the registration.
            if self.take() {
                Poll::Ready(())
            } else {
                Poll::Pending
            }
        })
        .await
    }
}
impl Default for FrameNotifier {
    fn default() -> Self {
        Self::new()
    }
}
