use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum DomainError {
    #[error("{entity} `{id}` not found")]
    NotFound { entity: &'static str, id: String },
    #[error("artifact computation for `{key}` failed: {message}")]
    ComputationFailed { key: String, message: String },
    #[error("inconsistent state: {message}")]
    InconsistentState { message: String },
    #[error("artifact storage error: {message}")]
    Storage { message: String },
    #[error("validation failed: {message}")]
    Validation { message: String },
}

impl DomainError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn computation_failed(key: impl ToString, message: impl Into<String>) -> Self {
        Self::ComputationFailed {
            key: key.to_string(),
            message: message.into(),
        }
    }

    pub fn inconsistent(message: impl Into<String>) -> Self {
        Self::InconsistentState {
            message: message.into(),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }
}
