use std::error::Error;
use std::sync::Arc;

/// Outcome of a failed lazy computation.
///
/// Clonable so that one failure can be handed to every caller that waited on
/// the same computation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LazyError {
    #[error("computation was cancelled")]
    Cancelled,

    #[error("computation failed: {0}")]
    Failed(Arc<dyn Error + Send + Sync>),
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct Message(String);

impl LazyError {
    pub fn failed(err: impl Error + Send + Sync + 'static) -> Self {
        Self::Failed(Arc::new(err))
    }

    pub fn message(message: impl Into<String>) -> Self {
        Self::failed(Message(message.into()))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// The underlying error of a [`LazyError::Failed`], if it has type `E`.
    pub fn downcast_ref<E: Error + 'static>(&self) -> Option<&E> {
        match self {
            Self::Cancelled => None,
            Self::Failed(err) => err.downcast_ref::<E>(),
        }
    }
}
