use std::fmt::{self, Display, Formatter};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Maximum length of `device_id`, per the ingest validation contract.
pub const DEVICE_ID_MAX_LEN: usize = 50;
/// Maximum length of `message`, per the ingest validation contract.
pub const MESSAGE_MAX_LEN: usize = 1000;
/// Maximum number of records accepted in a single batch submission.
pub const BATCH_MAX_LEN: usize = 1000;

/// Severity of a log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl Display for LogLevel {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warning => write!(f, "WARNING"),
            LogLevel::Error => write!(f, "ERROR"),
            LogLevel::Critical => write!(f, "CRITICAL"),
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "DEBUG" => Ok(LogLevel::Debug),
            "INFO" => Ok(LogLevel::Info),
            "WARNING" => Ok(LogLevel::Warning),
            "ERROR" => Ok(LogLevel::Error),
            "CRITICAL" => Ok(LogLevel::Critical),
            other => Err(PipelineError::Validation(format!(
                "unknown log_level '{other}'"
            ))),
        }
    }
}

/// A single device telemetry log record, as submitted by a client.
///
/// `ingest_id` is absent on submission and assigned by the DMQ on `Append`;
/// it is the idempotency key used by the PLS unique index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    pub device_id: String,
    pub log_level: LogLevel,
    pub message: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingest_id: Option<i64>,
}

impl LogRecord {
    /// Validate the record against the ingest contract in spec §6.
    ///
    /// Does not assign `timestamp` or `ingest_id` — deserializing via serde
    /// already applies the `Utc::now` default to `timestamp` before this
    /// runs.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.device_id.is_empty() {
            return Err(PipelineError::Validation(
                "device_id must not be empty".into(),
            ));
        }
        if self.device_id.len() > DEVICE_ID_MAX_LEN {
            return Err(PipelineError::Validation(format!(
                "device_id exceeds {DEVICE_ID_MAX_LEN} chars"
            )));
        }
        if self.message.is_empty() {
            return Err(PipelineError::Validation("message must not be empty".into()));
        }
        if self.message.len() > MESSAGE_MAX_LEN {
            return Err(PipelineError::Validation(format!(
                "message exceeds {MESSAGE_MAX_LEN} chars"
            )));
        }
        Ok(())
    }
}

/// Validate a batch submission's size bound (1..=1000), per spec §8 boundary behaviors.
pub fn validate_batch_len(len: usize) -> Result<(), PipelineError> {
    if len == 0 {
        return Err(PipelineError::Validation(
            "batch must contain at least one record".into(),
        ));
    }
    if len > BATCH_MAX_LEN {
        return Err(PipelineError::Validation(format!(
            "batch exceeds {BATCH_MAX_LEN} records"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_record() -> LogRecord {
        LogRecord {
            device_id: "d1".into(),
            log_level: LogLevel::Info,
            message: "hello".into(),
            timestamp: Utc::now(),
            log_data: None,
            ingest_id: None,
        }
    }

    #[test]
    fn accepts_valid_record() {
        assert!(valid_record().validate().is_ok());
    }

    #[test]
    fn rejects_empty_device_id() {
        let mut r = valid_record();
        r.device_id = String::new();
        assert!(matches!(r.validate(), Err(PipelineError::Validation(_))));
    }

    #[test]
    fn rejects_oversized_device_id() {
        let mut r = valid_record();
        r.device_id = "d".repeat(DEVICE_ID_MAX_LEN + 1);
        assert!(r.validate().is_err());
    }

    #[test]
    fn rejects_oversized_message() {
        let mut r = valid_record();
        r.message = "m".repeat(MESSAGE_MAX_LEN + 1);
        assert!(r.validate().is_err());
    }

    #[test]
    fn rejects_empty_message() {
        let mut r = valid_record();
        r.message = String::new();
        assert!(r.validate().is_err());
    }

    #[test]
    fn log_level_roundtrips_through_str() {
        for lvl in [
            LogLevel::Debug,
            LogLevel::Info,
            LogLevel::Warning,
            LogLevel::Error,
            LogLevel::Critical,
        ] {
            let s = lvl.to_string();
            assert_eq!(s.parse::<LogLevel>().unwrap(), lvl);
        }
    }

    #[test]
    fn log_level_rejects_unknown() {
        assert!("FOO".parse::<LogLevel>().is_err());
    }

    #[test]
    fn batch_len_boundaries() {
        assert!(validate_batch_len(0).is_err());
        assert!(validate_batch_len(1).is_ok());
        assert!(validate_batch_len(BATCH_MAX_LEN).is_ok());
        assert!(validate_batch_len(BATCH_MAX_LEN + 1).is_err());
    }
}
