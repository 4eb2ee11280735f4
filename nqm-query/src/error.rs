use nqm_core::NqmError;
use thiserror::Error;

/// Errors produced while decoding, resolving or transporting a compound query.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("malformed query: {0}")]
    MalformedQuery(String),
    #[error("invalid filter field {field}: {reason}")]
    InvalidFilterField { field: String, reason: String },
    #[error("invalid compact encoding: {0}")]
    InvalidCompactEncoding(String),
    #[error("time range out of range: {0}")]
    TimeOutOfRange(String),
}

impl QueryError {
    pub fn invalid_field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        QueryError::InvalidFilterField {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn compact(message: impl Into<String>) -> Self {
        QueryError::InvalidCompactEncoding(message.into())
    }

    /// Same error, scoped under a parent JSON path (e.g. `filters.agent`).
    pub(crate) fn under(self, parent: &str) -> Self {
        match self {
            QueryError::InvalidFilterField { field, reason } if field.is_empty() => {
                QueryError::InvalidFilterField {
                    field: parent.to_string(),
                    reason,
                }
            }
            QueryError::InvalidFilterField { field, reason } => QueryError::InvalidFilterField {
                field: format!("{}.{}", parent, field),
                reason,
            },
            other => other,
        }
    }
}

impl From<QueryError> for NqmError {
    fn from(err: QueryError) -> Self {
        NqmError::QueryError(err.to_string())
    }
}
