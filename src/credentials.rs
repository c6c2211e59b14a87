use std::convert::Infallible;
use std::fmt;

use axum::{extract::FromRequestParts, http::request::Parts};

pub const PROVIDER_TOKEN_HEADER: &str = "x-tushare-token";
pub const SUMMARY_KEY_HEADER: &str = "x-openai-key";

// Per-request secrets relayed from caller headers to the collaborators that
// need them. Scoped to a single request and passed by argument; never stored
// in process-global state.
#[derive(Clone, Default)]
pub struct Credentials {
    pub provider_token: Option<String>,
    pub summary_key: Option<String>,
}

// Secrets must never reach logs, including via span fields.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field(
                "provider_token",
                &self.provider_token.as_ref().map(|_| "<redacted>"),
            )
            .field(
                "summary_key",
                &self.summary_key.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

impl<S> FromRequestParts<S> for Credentials
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self {
            provider_token: header_value(parts, PROVIDER_TOKEN_HEADER),
            summary_key: header_value(parts, SUMMARY_KEY_HEADER),
        })
    }
}

fn header_value(parts: &Parts, name: &str) -> Option<String> {
    parts
        .headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts_with_headers(headers: &[(&str, &str)]) -> Parts {
        let mut builder = Request::builder().uri("/api/financials");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[tokio::test]
    async fn test_extracts_both_headers() {
        let mut parts = parts_with_headers(&[
            ("X-Tushare-Token", "provider-secret"),
            ("X-OpenAI-Key", "llm-secret"),
        ]);
        let credentials = Credentials::from_request_parts(&mut parts, &())
            .await
            .unwrap();
        assert_eq!(credentials.provider_token.as_deref(), Some("provider-secret"));
        assert_eq!(credentials.summary_key.as_deref(), Some("llm-secret"));
    }

    #[tokio::test]
    async fn test_missing_headers_are_none() {
        let mut parts = parts_with_headers(&[]);
        let credentials = Credentials::from_request_parts(&mut parts, &())
            .await
            .unwrap();
        assert!(credentials.provider_token.is_none());
        assert!(credentials.summary_key.is_none());
    }

    #[tokio::test]
    async fn test_blank_header_counts_as_missing() {
        let mut parts = parts_with_headers(&[("X-Tushare-Token", "   ")]);
        let credentials = Credentials::from_request_parts(&mut parts, &())
            .await
            .unwrap();
        assert!(credentials.provider_token.is_none());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let credentials = Credentials {
            provider_token: Some("provider-secret".to_string()),
            summary_key: None,
        };
        let rendered = format!("{credentials:?}");
        assert!(!rendered.contains("provider-secret"));
        assert!(rendered.contains("redacted"));
    }
}
