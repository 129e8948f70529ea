use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::ids::{ItemId, TaskId};

pub type FetchResult<T> = Result<T, FetchError>;

/// Failure of a scheduled fetch or of a fetcher call.
///
/// Clonable so one settled result can be handed to every waiter of a
/// shared step future.
#[derive(Error, Debug, Clone)]
pub enum FetchError {
    #[error("PlotFetcher for item {item_id} has not been initialized")]
    Uninitialized { item_id: ItemId },

    #[error("Task cancelled: {task_id}")]
    Cancelled { task_id: TaskId },

    #[error("Fetch failed: {message}")]
    Failed { message: String },

    #[error("Source error: {0}")]
    Source(Arc<dyn std::error::Error + Send + Sync>),
}

impl FetchError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }

    pub fn from_source(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Source(Arc::new(err))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {path}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid config: {what}")]
    Invalid { what: &'static str },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_is_distinguishable() {
        let cancelled = FetchError::Cancelled {
            task_id: TaskId::new("1_a_2"),
        };
        assert!(cancelled.is_cancelled());
        assert!(!FetchError::failed("timeout").is_cancelled());
    }

    #[test]
    fn source_errors_keep_their_message() {
        let io = std::io::Error::other("connection reset");
        let err = FetchError::from_source(io);
        assert_eq!(err.to_string(), "Source error: connection reset");
        let cloned = err.clone();
        assert_eq!(cloned.to_string(), err.to_string());
    }
}
