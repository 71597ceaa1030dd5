use tokio_util::sync::CancellationToken;

/// The cancellation context passed down from a workflow to its running
/// tasks (spec §5 Suspension points: "all suspensions are cancellable via a
/// context/token passed from the workflow down to the task"; spec §9 Design
/// Notes: "Coroutine/async control flow -> context-passing + explicit
/// suspension points").
///
/// A `CancelContext` is cheap to clone; cancelling the workflow-level token
/// cancels every task-level child derived from it.
#[derive(Clone)]
pub struct CancelContext {
    token: CancellationToken,
}

impl CancelContext {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// A child context for one task: cancelled when either the task itself
    /// is cancelled or the parent workflow is cancelled, never the other
    /// direction.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }
}

impl Default for CancelContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancelling_parent_cancels_child() {
        let parent = CancelContext::new();
        let child = parent.child();
        assert!(!child.is_cancelled());
        parent.cancel();
        assert!(child.is_cancelled());
    }

    #[tokio::test]
    async fn cancelling_child_does_not_cancel_parent() {
        let parent = CancelContext::new();
        let child = parent.child();
        child.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());
    }
}
