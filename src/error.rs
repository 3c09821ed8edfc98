//! Error types for broker access and startup configuration

use thiserror::Error;

use crate::types::ParseSideError;

/// Failure talking to the broker
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Network failure, timeout or non-2xx HTTP status
    #[error("transport error: {0}")]
    Transport(String),

    /// Broker answered with a non-zero `retCode`
    #[error("broker error {code}: {message}")]
    Api { code: i64, message: String },

    /// Missing or unparsable payload
    #[error("data error: {0}")]
    Data(String),

    #[error("unknown position side: {0:?}")]
    UnknownSide(String),
}

impl BrokerError {
    /// Transport failures are retried after the loop's fixed delay
    pub fn is_transport(&self) -> bool {
        matches!(self, BrokerError::Transport(_))
    }

    pub fn data(msg: impl Into<String>) -> Self {
        BrokerError::Data(msg.into())
    }
}

impl From<reqwest::Error> for BrokerError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<ParseSideError> for BrokerError {
    fn from(err: ParseSideError) -> Self {
        Self::UnknownSide(err.0)
    }
}

impl From<serde_json::Error> for BrokerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Data(err.to_string())
    }
}

pub type BrokerResult<T> = Result<T, BrokerError>;

/// Fatal startup errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing credentials for account {account}: set {key_var} and {secret_var}")]
    MissingCredentials {
        account: String,
        key_var: String,
        secret_var: String,
    },

    #[error("missing environment variable {0}")]
    MissingEnv(String),

    #[error("no accounts configured")]
    NoAccounts,

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_classification() {
        assert!(BrokerError::Transport("timeout".into()).is_transport());
        assert!(!BrokerError::Api {
            code: 10001,
            message: "params error".into()
        }
        .is_transport());
        assert!(!BrokerError::data("empty list").is_transport());
    }

    #[test]
    fn test_display() {
        let err = BrokerError::Api {
            code: 110007,
            message: "insufficient balance".into(),
        };
        assert_eq!(err.to_string(), "broker error 110007: insufficient balance");
    }
}
