//! A backend that plays back prepared replies.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use super::{BackendError, CompletionRequest, InferenceBackend, Reply};

/// Replies are served in order; every request is recorded.
///
/// Once the script runs out every call fails with
/// [`BackendError::Unavailable`].
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    replies: Mutex<VecDeque<Result<Reply, BackendError>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedBackend {
    /// A backend that will answer with `replies`, in order.
    pub fn new(replies: impl IntoIterator<Item = Reply>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().map(Ok).collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue another reply.
    pub fn push(&self, reply: Reply) {
        self.lock_replies().push_back(Ok(reply));
    }

    /// Queue a failure.
    pub fn push_error(&self, error: BackendError) {
        self.lock_replies().push_back(Err(error));
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replies not yet served.
    pub fn remaining(&self) -> usize {
        self.lock_replies().len()
    }

    fn lock_replies(&self) -> std::sync::MutexGuard<'_, VecDeque<Result<Reply, BackendError>>> {
        self.replies.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl InferenceBackend for ScriptedBackend {
    async fn complete(&self, request: CompletionRequest) -> Result<Reply, BackendError> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request);
        self.lock_replies()
            .pop_front()
            .unwrap_or_else(|| Err(BackendError::Unavailable("script exhausted".to_string())))
    }
}
