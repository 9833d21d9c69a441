/// Cooperative cancellation shared between transports and tool handlers.

use std::sync::Arc;
use tokio::sync::watch;

/// Cloneable cancellation signal.
///
/// All clones observe the same flag. Once cancelled a token stays cancelled.
#[derive(Clone, Debug)]
pub struct CancelToken {
    sender: Arc<watch::Sender<bool>>,
    receiver: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
            receiver,
        }
    }

    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves once the token has been cancelled.
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        // The sender lives as long as any clone of this token, so this only
        // returns once the flag flips.
        let _ = receiver.wait_for(|cancelled| *cancelled).await;
    }

    /// Returns a guard that cancels this token when dropped.
    pub fn drop_guard(&self) -> CancelGuard {
        CancelGuard {
            token: self.clone(),
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Cancels its token on drop.
#[derive(Debug)]
pub struct CancelGuard {
    token: CancelToken,
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
