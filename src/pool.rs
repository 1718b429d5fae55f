use crossbeam_channel::{bounded, Receiver, Sender};

use crate::context::Context;
use crate::error::{Result, WalkError};

/// A fixed-capacity pool of admission tokens.
///
/// Tokens live in a bounded channel: acquiring one is a receive, releasing
/// it (on drop) sends it back. The number of outstanding tokens can never
/// exceed the capacity the pool was built with.
pub(crate) struct TokenPool {
    tokens: Receiver<()>,
    returns: Sender<()>,
    capacity: usize,
}

/// Proof of admission. Returns itself to the pool when dropped.
pub(crate) struct Token {
    returns: Sender<()>,
}

impl TokenPool {
    pub(crate) fn new(capacity: usize) -> Self {
        let (returns, tokens) = bounded(capacity);
        for _ in 0..capacity {
            // Cannot fail: the channel holds exactly `capacity` tokens.
            let _ = returns.try_send(());
        }
        Self {
            tokens,
            returns,
            capacity,
        }
    }

    /// Take a token if one is free right now.
    pub(crate) fn try_acquire(&self) -> Option<Token> {
        self.tokens.try_recv().ok().map(|()| self.token())
    }

    /// Wait for a token, giving up when `ctx` is done.
    pub(crate) fn acquire(&self, ctx: &Context) -> Result<Token> {
        match ctx.recv(&self.tokens)? {
            Some(()) => Ok(self.token()),
            // Unreachable while `self` owns a sender.
            None => Err(WalkError::Backend("token pool closed".into())),
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    /// Tokens currently held by callers.
    pub(crate) fn outstanding(&self) -> usize {
        self.capacity - self.tokens.len()
    }

    fn token(&self) -> Token {
        Token {
            returns: self.returns.clone(),
        }
    }
}

impl Drop for Token {
    fn drop(&mut self) {
        let _ = self.returns.try_send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn try_acquire_respects_capacity() {
        let pool = TokenPool::new(2);
        let a = pool.try_acquire();
        let b = pool.try_acquire();
        assert!(a.is_some() && b.is_some());
        assert!(pool.try_acquire().is_none());
        assert_eq!(pool.outstanding(), 2);

        drop(a);
        assert_eq!(pool.outstanding(), 1);
        assert!(pool.try_acquire().is_some());
        drop(b);
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn acquire_observes_cancellation() {
        let pool = TokenPool::new(1);
        let _held = pool.try_acquire();
        let ctx = Context::background().with_timeout(Duration::from_millis(10));
        let err = pool.acquire(&ctx).err();
        assert!(matches!(err, Some(WalkError::DeadlineExceeded)));
        assert_eq!(pool.outstanding(), 1);
    }

    #[test]
    fn zero_capacity_never_admits() {
        let pool = TokenPool::new(0);
        assert!(pool.try_acquire().is_none());
        assert_eq!(pool.capacity(), 0);
    }
}
