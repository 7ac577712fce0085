/// Shared error type used across all VoxGate crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("auth failed: {0}")]
    AuthFailed(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation: {0}")]
    Validation(String),

    #[error("plan limit exceeded: {0}")]
    PlanLimitExceeded(String),

    #[error("concurrency limit reached ({current}/{max})")]
    ConcurrencyLimit { current: u32, max: u32 },

    #[error("usage limit exceeded: {0}")]
    UsageLimitExceeded(String),

    #[error("subscription inactive: {0}")]
    SubscriptionInactive(String),

    #[error("provider {provider} not allowed for {category}")]
    ProviderNotAllowed { category: String, provider: String },

    #[error("provider {provider} (transient): {message}")]
    ProviderTransient { provider: String, message: String },

    #[error("provider {provider} (fatal): {message}")]
    ProviderFatal { provider: String, message: String },

    #[error("cancelled")]
    Cancelled,

    #[error("audio frame dropped")]
    AudioDropped,

    #[error("config: {0}")]
    Config(String),

    #[error("internal: {0}")]
    Internal(String),
}

impl Error {
    /// Stable wire code for this error kind (sent to clients and logged).
    pub fn code(&self) -> &'static str {
        match self {
            Error::Io(_) | Error::Json(_) | Error::Internal(_) => "INTERNAL",
            Error::Http(_) => "HTTP_ERROR",
            Error::Timeout(_) => "TIMEOUT",
            Error::AuthFailed(_) => "AUTH_FAILED",
            Error::Forbidden(_) => "FORBIDDEN",
            Error::NotFound(_) => "NOT_FOUND",
            Error::Validation(_) => "VALIDATION_ERROR",
            Error::PlanLimitExceeded(_) => "PLAN_LIMIT_EXCEEDED",
            Error::ConcurrencyLimit { .. } => "CONCURRENCY_LIMIT",
            Error::UsageLimitExceeded(_) => "USAGE_LIMIT_EXCEEDED",
            Error::SubscriptionInactive(_) => "SUBSCRIPTION_INACTIVE",
            Error::ProviderNotAllowed { .. } => "PROVIDER_NOT_ALLOWED",
            Error::ProviderTransient { .. } => "PROVIDER_TRANSIENT",
            Error::ProviderFatal { .. } => "PROVIDER_FATAL",
            Error::Cancelled => "CANCELLED",
            Error::AudioDropped => "audio_dropped",
            Error::Config(_) => "CONFIG_ERROR",
        }
    }

    /// Whether the error is worth retrying inside an adapter's retry budget.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Http(_) | Error::Timeout(_) | Error::ProviderTransient { .. }
        )
    }

    /// Whether the error must terminate the whole session rather than one turn.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::AuthFailed(_) | Error::Forbidden(_) | Error::ProviderFatal { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(
            Error::ConcurrencyLimit { current: 2, max: 2 }.code(),
            "CONCURRENCY_LIMIT"
        );
        assert_eq!(
            Error::ProviderNotAllowed {
                category: "tts".into(),
                provider: "cartesia".into()
            }
            .code(),
            "PROVIDER_NOT_ALLOWED"
        );
        assert_eq!(Error::AudioDropped.code(), "audio_dropped");
    }

    #[test]
    fn transient_classification() {
        assert!(Error::Timeout("stt chunk".into()).is_transient());
        assert!(Error::ProviderTransient {
            provider: "deepgram".into(),
            message: "rate limited".into()
        }
        .is_transient());
        assert!(!Error::AuthFailed("bad key".into()).is_transient());
        assert!(Error::AuthFailed("bad key".into()).is_fatal());
    }
}
