use axum::{http::StatusCode, response::IntoResponse, response::Response, Json};
use serde_json::json;
use thiserror::Error;

/// The error taxonomy from spec §7, shared by every logpipe component.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Malformed or out-of-bounds input. Client-visible, never retried.
    #[error("validation failed: {0}")]
    Validation(String),

    /// DMQ or PLS unreachable or timed out after the component's retry budget.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Connection reset, transaction serialization failure — retry with backoff.
    #[error("transient backend error: {0}")]
    TransientBackend(String),

    /// Data the PLS rejects (constraint, encoding) — quarantine and ack.
    #[error("permanent record error: {0}")]
    PermanentRecord(String),

    /// DMQ corruption, configuration contradiction, or pool exhaustion past
    /// `acquire_timeout` after retries. Terminates the process.
    #[error("fatal error: {0}")]
    Fatal(String),
}

impl PipelineError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, PipelineError::TransientBackend(_))
    }
}

impl From<sqlx::Error> for PipelineError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) => {
                // Unique-violation on `ingest_id` is the idempotent no-op path,
                // not an error — callers that expect it should match on
                // `db_err.is_unique_violation()` before converting. Any other
                // constraint/encoding rejection is permanent.
                if db_err.is_unique_violation() {
                    PipelineError::PermanentRecord(format!(
                        "duplicate ingest_id (idempotent no-op): {err}"
                    ))
                } else if db_err.code().as_deref() == Some("40001") {
                    // serialization_failure
                    PipelineError::TransientBackend(err.to_string())
                } else {
                    PipelineError::PermanentRecord(err.to_string())
                }
            }
            sqlx::Error::PoolTimedOut => PipelineError::BackendUnavailable(err.to_string()),
            sqlx::Error::Io(_) => PipelineError::TransientBackend(err.to_string()),
            _ => PipelineError::TransientBackend(err.to_string()),
        }
    }
}

impl From<redis::RedisError> for PipelineError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_connection_dropped() || err.is_connection_refusal() || err.is_timeout() {
            PipelineError::BackendUnavailable(err.to_string())
        } else {
            PipelineError::TransientBackend(err.to_string())
        }
    }
}

impl IntoResponse for PipelineError {
    fn into_response(self) -> Response {
        let status = match &self {
            PipelineError::Validation(_) => StatusCode::BAD_REQUEST,
            PipelineError::BackendUnavailable(_) | PipelineError::TransientBackend(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            PipelineError::PermanentRecord(_) => StatusCode::UNPROCESSABLE_ENTITY,
            PipelineError::Fatal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": {
                "code": error_code(&self),
                "message": self.to_string(),
            }
        }));

        (status, body).into_response()
    }
}

fn error_code(err: &PipelineError) -> &'static str {
    match err {
        PipelineError::Validation(_) => "VALIDATION",
        PipelineError::BackendUnavailable(_) => "BACKEND_UNAVAILABLE",
        PipelineError::TransientBackend(_) => "TRANSIENT_BACKEND",
        PipelineError::PermanentRecord(_) => "PERMANENT_RECORD",
        PipelineError::Fatal(_) => "FATAL",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_backend_is_retryable() {
        assert!(PipelineError::TransientBackend("x".into()).is_retryable());
        assert!(!PipelineError::PermanentRecord("x".into()).is_retryable());
        assert!(!PipelineError::BackendUnavailable("x".into()).is_retryable());
        assert!(!PipelineError::Validation("x".into()).is_retryable());
        assert!(!PipelineError::Fatal("x".into()).is_retryable());
    }

    #[test]
    fn sqlx_pool_timeout_maps_to_backend_unavailable() {
        let err = PipelineError::from(sqlx::Error::PoolTimedOut);
        assert!(matches!(err, PipelineError::BackendUnavailable(_)));
    }

    #[test]
    fn sqlx_io_error_is_transient() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let err = PipelineError::from(sqlx::Error::Io(io));
        assert!(err.is_retryable());
    }

    #[test]
    fn validation_maps_to_400() {
        let response = PipelineError::Validation("bad".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn backend_unavailable_maps_to_503() {
        let response = PipelineError::BackendUnavailable("down".into()).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn permanent_record_maps_to_422() {
        let response = PipelineError::PermanentRecord("bad row".into()).into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
