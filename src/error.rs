//! Error taxonomy for gateway operations
//!
//! Provider exceptions are translated exactly once, at the adapter boundary,
//! into this sum type. Retry decisions depend only on the variant, never on
//! message inspection.

use std::collections::HashMap;

use serde_json::Value;
use thiserror::Error;

/// Errors surfaced to callers of the gateway
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// Provider signalled a rate limit (HTTP 429). Retryable.
    #[error("Rate limit exceeded: {message}")]
    RateLimit { message: String },

    /// The provider call exceeded the configured timeout
    #[error("Request to {model} timed out after {timeout_secs}s")]
    Timeout { model: String, timeout_secs: u64 },

    /// Credentials were rejected by the provider
    #[error("Authentication failed for provider {provider}: {message}")]
    Authentication { provider: String, message: String },

    /// The prompt did not fit the model's context window.
    /// Token figures are zero when the provider does not report them.
    #[error("Context window exceeded for {model}: {tokens} tokens (max {max_tokens})")]
    ContextLength {
        model: String,
        tokens: u32,
        max_tokens: u32,
    },

    /// The provider refused the content on policy grounds
    #[error("Content filtered by {model}: {reason}")]
    ContentFilter { model: String, reason: String },

    /// The requested model does not exist at the provider
    #[error("Model not available: {model}")]
    ModelNotAvailable { model: String, message: String },

    /// The request failed validation, either locally or at the provider
    #[error("Invalid request: {message}")]
    InvalidRequest {
        message: String,
        param: Option<String>,
    },

    /// Transient provider outage (HTTP 5xx). Retryable.
    #[error("Provider unavailable: {message}")]
    ServiceUnavailable { message: String },

    /// Provider-side API or connection failure that is not transient
    #[error("Provider error: {message}")]
    Provider { message: String },

    /// The cost tracker detected a budget crossing
    #[error("Budget exceeded: spent ${spent_usd:.4} of ${budget_usd:.4}")]
    BudgetExceeded { spent_usd: f64, budget_usd: f64 },

    /// The caller cancelled the in-flight operation
    #[error("Request cancelled")]
    Cancelled,

    /// Anything that does not fit an above kind, message preserved
    #[error("{message}")]
    Other { message: String },
}

impl GatewayError {
    /// Stable machine-readable code for this error kind
    pub fn error_code(&self) -> &'static str {
        match self {
            GatewayError::RateLimit { .. } => "rate_limit",
            GatewayError::Timeout { .. } => "timeout",
            GatewayError::Authentication { .. } => "authentication",
            GatewayError::ContextLength { .. } => "context_length",
            GatewayError::ContentFilter { .. } => "content_filter",
            GatewayError::ModelNotAvailable { .. } => "model_not_available",
            GatewayError::InvalidRequest { .. } => "invalid_request",
            GatewayError::ServiceUnavailable { .. } => "service_unavailable",
            GatewayError::Provider { .. } => "provider_error",
            GatewayError::BudgetExceeded { .. } => "budget_exceeded",
            GatewayError::Cancelled => "cancelled",
            GatewayError::Other { .. } => "llm_error",
        }
    }

    /// Whether the adapter may retry the call that produced this error.
    /// Only rate limits and transient provider outages qualify.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            GatewayError::RateLimit { .. } | GatewayError::ServiceUnavailable { .. }
        )
    }

    /// Authentication failures abort fallback immediately: trying another
    /// deployment of the same credential cannot succeed.
    pub fn aborts_fallback(&self) -> bool {
        matches!(
            self,
            GatewayError::Authentication { .. }
                | GatewayError::InvalidRequest { .. }
                | GatewayError::Cancelled
        )
    }

    /// Structured details attached to the error, for caller-side reporting
    pub fn details(&self) -> HashMap<String, Value> {
        let mut details = HashMap::new();
        match self {
            GatewayError::Timeout {
                model,
                timeout_secs,
            } => {
                details.insert("model".into(), Value::from(model.clone()));
                details.insert("timeout_seconds".into(), Value::from(*timeout_secs));
            }
            GatewayError::Authentication { provider, .. } => {
                details.insert("provider".into(), Value::from(provider.clone()));
            }
            GatewayError::ContextLength {
                model,
                tokens,
                max_tokens,
            } => {
                details.insert("model".into(), Value::from(model.clone()));
                details.insert("tokens".into(), Value::from(*tokens));
                details.insert("max_tokens".into(), Value::from(*max_tokens));
            }
            GatewayError::ContentFilter { model, .. }
            | GatewayError::ModelNotAvailable { model, .. } => {
                details.insert("model".into(), Value::from(model.clone()));
            }
            GatewayError::InvalidRequest {
                param: Some(param), ..
            } => {
                details.insert("param".into(), Value::from(param.clone()));
            }
            GatewayError::BudgetExceeded {
                spent_usd,
                budget_usd,
            } => {
                details.insert("spent_usd".into(), Value::from(*spent_usd));
                details.insert("budget_usd".into(), Value::from(*budget_usd));
            }
            _ => {}
        }
        details
    }

    /// Wrap the last adapter error once a whole fallback chain is exhausted
    pub fn exhausted(self) -> GatewayError {
        GatewayError::Provider {
            message: format!("all deployments failed, last error: {}", self),
        }
    }
}

/// Result type for gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_predicate() {
        assert!(GatewayError::RateLimit {
            message: "slow down".into()
        }
        .retryable());
        assert!(GatewayError::ServiceUnavailable {
            message: "503".into()
        }
        .retryable());
        assert!(!GatewayError::Timeout {
            model: "gpt-4".into(),
            timeout_secs: 60
        }
        .retryable());
        assert!(!GatewayError::InvalidRequest {
            message: "bad".into(),
            param: None
        }
        .retryable());
        assert!(!GatewayError::Cancelled.retryable());
    }

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(
            GatewayError::ContextLength {
                model: "gpt-4".into(),
                tokens: 9000,
                max_tokens: 8192
            }
            .error_code(),
            "context_length"
        );
        assert_eq!(GatewayError::Cancelled.error_code(), "cancelled");
        assert_eq!(
            GatewayError::Other {
                message: "mystery".into()
            }
            .error_code(),
            "llm_error"
        );
    }

    #[test]
    fn test_details_carry_partial_data() {
        let err = GatewayError::ContextLength {
            model: "gpt-4".into(),
            tokens: 9000,
            max_tokens: 8192,
        };
        let details = err.details();
        assert_eq!(details["tokens"], Value::from(9000));
        assert_eq!(details["max_tokens"], Value::from(8192));
    }

    #[test]
    fn test_authentication_aborts_fallback() {
        let err = GatewayError::Authentication {
            provider: "openai".into(),
            message: "bad key".into(),
        };
        assert!(err.aborts_fallback());
        assert!(!GatewayError::ServiceUnavailable {
            message: "503".into()
        }
        .aborts_fallback());
    }
}
