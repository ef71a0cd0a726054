//! Per-call context threaded through every store call.

use tokio_util::sync::CancellationToken;

use crate::error::StoreError;

/// Cancellable context for one orchestrated call.
///
/// Cloning shares the underlying token, so cancelling any clone cancels them all.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    token: CancellationToken,
}

impl CallContext {
    /// A context that is never cancelled unless [`CallContext::cancel`] is called.
    pub fn background() -> Self {
        Self::default()
    }

    /// Wrap an existing token, e.g. one owned by a test harness or a signal handler.
    pub fn with_token(token: CancellationToken) -> Self {
        Self { token }
    }

    /// A context cancelled together with `self`, but cancellable on its own too.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Fail with [`StoreError::Cancelled`] once the context has been cancelled.
    pub fn check(&self) -> Result<(), StoreError> {
        if self.is_cancelled() { Err(StoreError::Cancelled) } else { Ok(()) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelling_a_clone_cancels_the_original() {
        let context = CallContext::background();
        let clone = context.clone();
        assert!(context.check().is_ok());
        clone.cancel();
        assert_eq!(context.check(), Err(StoreError::Cancelled));
    }

    #[test]
    fn child_follows_parent_but_not_the_reverse() {
        let parent = CallContext::background();
        let child = parent.child();
        child.cancel();
        assert!(!parent.is_cancelled());

        let second = parent.child();
        parent.cancel();
        assert!(second.is_cancelled());
    }
}
