//! Small shared helpers for the HTTP/WS adapters.

use vx_domain::Error;

/// Map a reqwest transport error into the domain error space. Network-level
/// failures are transient from the retry budget's point of view.
pub(crate) fn from_reqwest(provider: &str, err: reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::Timeout(format!("{provider}: {err}"))
    } else {
        Error::ProviderTransient {
            provider: provider.to_string(),
            message: err.to_string(),
        }
    }
}

/// Classify a non-success HTTP status from a provider endpoint.
pub(crate) fn status_error(provider: &str, status: reqwest::StatusCode, body: &str) -> Error {
    let message = format!("HTTP {status}: {}", body.chars().take(200).collect::<String>());
    match status.as_u16() {
        401 => Error::AuthFailed(format!("{provider}: {message}")),
        403 => Error::ProviderFatal {
            provider: provider.to_string(),
            message,
        },
        404 | 400 | 422 => Error::ProviderFatal {
            provider: provider.to_string(),
            message,
        },
        _ => Error::ProviderTransient {
            provider: provider.to_string(),
            message,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_status_is_fatal() {
        let err = status_error("deepgram", reqwest::StatusCode::UNAUTHORIZED, "no key");
        assert!(err.is_fatal());
        assert!(!err.is_transient());
    }

    #[test]
    fn rate_limit_is_transient() {
        let err = status_error("openai", reqwest::StatusCode::TOO_MANY_REQUESTS, "slow down");
        assert!(err.is_transient());
    }
}
