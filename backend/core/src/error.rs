use thiserror::Error;

/// Top-level error type for the mdforge runtime.
///
/// `Clone` so that a single pool initialisation failure can be handed to every
/// caller waiting on (or later arriving at) the same pool.
#[derive(Debug, Clone, Error)]
pub enum ForgeError {
    #[error("parse failed: {0}")]
    Parse(String),

    #[error("worker pool initialization failed: {0}")]
    PoolInit(String),

    #[error("worker pool has been destroyed")]
    PoolDestroyed,

    #[error("worker {worker} crashed: {message}")]
    WorkerCrashed { worker: usize, message: String },

    #[error("worker {0} was terminated")]
    WorkerTerminated(usize),

    #[error("channel closed: {0}")]
    ChannelClosed(String),

    /// Anything else, flattened to its message (with the context chain) so
    /// the enum stays `Clone`.
    #[error("{0}")]
    Other(String),
}

impl From<anyhow::Error> for ForgeError {
    fn from(err: anyhow::Error) -> Self {
        ForgeError::Other(format!("{err:#}"))
    }
}

impl ForgeError {
    /// True for errors that mean the pool itself is unusable, as opposed to a
    /// single failed call.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ForgeError::PoolInit(_) | ForgeError::PoolDestroyed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_classification() {
        assert!(ForgeError::PoolInit("no threads".into()).is_fatal());
        assert!(ForgeError::PoolDestroyed.is_fatal());
        assert!(!ForgeError::Parse("bad".into()).is_fatal());
        assert!(!ForgeError::WorkerCrashed { worker: 0, message: "gone".into() }.is_fatal());
    }

    #[test]
    fn anyhow_conversion_keeps_context() {
        let err = anyhow::anyhow!("inner").context("outer");
        let forge: ForgeError = err.into();
        assert_eq!(forge.to_string(), "outer: inner");
    }
}
