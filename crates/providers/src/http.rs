//! Shared HTTP plumbing for the provider backends.
//!
//! Both backends speak JSON over `reqwest` and fail in the same ways, so
//! the client construction, transport-error mapping, and status
//! classification live here instead of being repeated per provider.

use recurse_core::error::ProviderError;
use std::time::Duration;
use tracing::warn;

/// Build the HTTP client every backend uses.
pub(crate) fn build_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(10))
        .build()
        .expect("client construction with static options cannot fail")
}

/// Map a reqwest failure onto the domain error.
pub(crate) fn transport_error(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout(err.to_string())
    } else {
        ProviderError::Network(err.to_string())
    }
}

/// Pass a successful response through; classify everything else.
///
/// 429 honours the `Retry-After` header when the backend sends one;
/// 401/403 surface as credential problems; any other non-success status
/// carries the response body back for diagnosis.
pub(crate) async fn check_status(
    provider: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        let header = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        return Err(ProviderError::RateLimited {
            retry_after_secs: retry_after_secs(header.as_deref()),
        });
    }

    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return Err(ProviderError::AuthenticationFailed(format!(
            "{provider} rejected the credentials ({status})"
        )));
    }

    let status_code = status.as_u16();
    let body = response.text().await.unwrap_or_default();
    warn!(provider, status = status_code, body = %body, "Backend returned an error");
    Err(ProviderError::ApiError {
        status_code,
        message: body,
    })
}

/// Parse a `Retry-After` seconds value, falling back to a short pause.
pub(crate) fn retry_after_secs(header: Option<&str>) -> u64 {
    header
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(5)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_after_parses_seconds() {
        assert_eq!(retry_after_secs(Some("30")), 30);
        assert_eq!(retry_after_secs(Some(" 7 ")), 7);
    }

    #[test]
    fn retry_after_falls_back_on_junk() {
        // HTTP-date form and garbage both take the default pause.
        assert_eq!(retry_after_secs(Some("Wed, 21 Oct 2026 07:28:00 GMT")), 5);
        assert_eq!(retry_after_secs(None), 5);
    }
}
