//! Cancellation for walks and metadata fan-out.
//!
//! A [`Context`] is a cheap, clonable handle observed at every suspension
//! point: before a level scan, while waiting for a pool token, between
//! metadata fetches. Cancelling a context cancels every context derived from
//! it. Deadlines are inherited by derived contexts (the earliest one wins).

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use crossbeam_channel::{after, at, bounded, never, select, Receiver, Sender};
use parking_lot::Mutex;

use crate::error::{Result, WalkError};

#[derive(Clone)]
pub struct Context {
    inner: Arc<Inner>,
}

struct Inner {
    /// Disconnected once the context is cancelled.
    done: Receiver<()>,
    deadline: Option<Instant>,
    state: Mutex<State>,
}

struct State {
    cancelled: bool,
    trigger: Option<Sender<()>>,
    children: Vec<Weak<Inner>>,
}

/// Cancels the [`Context`] it was created with, and everything derived from it.
#[derive(Clone)]
pub struct CancelHandle {
    inner: Arc<Inner>,
}

impl Context {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self::with_deadline_inner(None)
    }

    /// Derive a context that is cancelled when the returned handle fires or
    /// when `self` is cancelled.
    pub fn with_cancel(&self) -> (Context, CancelHandle) {
        let child = self.derive(None);
        let handle = CancelHandle {
            inner: Arc::clone(&child.inner),
        };
        (child, handle)
    }

    /// Derive a context that expires after `timeout`.
    pub fn with_timeout(&self, timeout: Duration) -> Context {
        self.derive(Instant::now().checked_add(timeout))
    }

    /// Derive a context that expires at `deadline`.
    pub fn with_deadline(&self, deadline: Instant) -> Context {
        self.derive(Some(deadline))
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    /// Why this context is done, or `None` while it is still live.
    pub fn err(&self) -> Option<WalkError> {
        if self.inner.state.lock().cancelled {
            return Some(WalkError::Cancelled);
        }
        match self.inner.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(WalkError::DeadlineExceeded),
            _ => None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// Block on `rx` until a value arrives or the context is done.
    ///
    /// `Ok(None)` means every sender of `rx` has been dropped.
    pub fn recv<T>(&self, rx: &Receiver<T>) -> Result<Option<T>> {
        if let Some(err) = self.err() {
            return Err(err);
        }
        let expiry = self.expiry();
        select! {
            recv(rx) -> msg => Ok(msg.ok()),
            recv(self.inner.done) -> _ => Err(WalkError::Cancelled),
            recv(expiry) -> _ => Err(WalkError::DeadlineExceeded),
        }
    }

    /// Sleep for `duration`, waking early with an error if the context ends.
    pub fn sleep(&self, duration: Duration) -> Result<()> {
        if let Some(err) = self.err() {
            return Err(err);
        }
        let timer = after(duration);
        let expiry = self.expiry();
        select! {
            recv(timer) -> _ => Ok(()),
            recv(self.inner.done) -> _ => Err(WalkError::Cancelled),
            recv(expiry) -> _ => Err(WalkError::DeadlineExceeded),
        }
    }

    fn expiry(&self) -> Receiver<Instant> {
        match self.inner.deadline {
            Some(deadline) => at(deadline),
            None => never(),
        }
    }

    fn with_deadline_inner(deadline: Option<Instant>) -> Self {
        let (trigger, done) = bounded(0);
        Self {
            inner: Arc::new(Inner {
                done,
                deadline,
                state: Mutex::new(State {
                    cancelled: false,
                    trigger: Some(trigger),
                    children: Vec::new(),
                }),
            }),
        }
    }

    fn derive(&self, deadline: Option<Instant>) -> Context {
        let deadline = match (self.inner.deadline, deadline) {
            (Some(parent), Some(own)) => Some(parent.min(own)),
            (parent, own) => parent.or(own),
        };
        let child = Self::with_deadline_inner(deadline);

        let mut state = self.inner.state.lock();
        if state.cancelled {
            drop(state);
            cancel(&child.inner);
        } else {
            state.children.retain(|c| c.strong_count() > 0);
            state.children.push(Arc::downgrade(&child.inner));
        }
        child
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("deadline", &self.inner.deadline)
            .field("err", &self.err())
            .finish()
    }
}

impl CancelHandle {
    pub fn cancel(&self) {
        cancel(&self.inner);
    }
}

fn cancel(inner: &Inner) {
    let children = {
        let mut state = inner.state.lock();
        if state.cancelled {
            return;
        }
        state.cancelled = true;
        // Dropping the only sender disconnects `done` for every waiter.
        state.trigger = None;
        std::mem::take(&mut state.children)
    };
    for child in children.iter().filter_map(Weak::upgrade) {
        cancel(&child);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn background_is_never_done() {
        let ctx = Context::background();
        assert!(ctx.err().is_none());
        assert!(ctx.sleep(Duration::from_millis(1)).is_ok());
    }

    #[test]
    fn cancel_propagates_to_children() {
        let (parent, cancel) = Context::background().with_cancel();
        let (child, _) = parent.with_cancel();
        let grandchild = child.with_timeout(Duration::from_secs(60));

        cancel.cancel();
        assert!(matches!(parent.err(), Some(WalkError::Cancelled)));
        assert!(matches!(child.err(), Some(WalkError::Cancelled)));
        assert!(matches!(grandchild.err(), Some(WalkError::Cancelled)));
    }

    #[test]
    fn child_of_cancelled_parent_starts_cancelled() {
        let (parent, cancel) = Context::background().with_cancel();
        cancel.cancel();
        let (child, _) = parent.with_cancel();
        assert!(child.is_done());
    }

    #[test]
    fn deadline_expires() {
        let ctx = Context::background().with_timeout(Duration::from_millis(10));
        let err = ctx.sleep(Duration::from_secs(5)).unwrap_err();
        assert!(matches!(err, WalkError::DeadlineExceeded));
    }

    #[test]
    fn earliest_deadline_wins() {
        let parent = Context::background().with_timeout(Duration::from_millis(5));
        let child = parent.with_timeout(Duration::from_secs(60));
        assert_eq!(child.deadline(), parent.deadline());
    }

    #[test]
    fn cancel_wakes_blocked_receiver() {
        let (ctx, cancel) = Context::background().with_cancel();
        let (_tx, rx) = bounded::<()>(1);

        let waiter = thread::spawn(move || ctx.recv(&rx));
        thread::sleep(Duration::from_millis(20));
        cancel.cancel();

        let res = waiter.join().unwrap();
        assert!(matches!(res, Err(WalkError::Cancelled)));
    }

    #[test]
    fn recv_reports_disconnect() {
        let ctx = Context::background();
        let (tx, rx) = bounded::<u8>(1);
        tx.send(7).unwrap();
        drop(tx);
        assert_eq!(ctx.recv(&rx).unwrap(), Some(7));
        assert_eq!(ctx.recv(&rx).unwrap(), None);
    }
}
