use axum::{
    extract::FromRequestParts,
    http::{HeaderMap, request::Parts},
};
use axum_extra::headers::{Authorization, HeaderMapExt, authorization::Bearer};
use subtle::ConstantTimeEq;
use tracing::debug;

use crate::error::StratusError;
use crate::server::router::StratusState;

pub const X_API_KEY: &str = "x-api-key";

/// Where the caller put its key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySource {
    Header,
    Bearer,
}

impl KeySource {
    fn as_str(self) -> &'static str {
        match self {
            KeySource::Header => X_API_KEY,
            KeySource::Bearer => "bearer",
        }
    }
}

/// The presented key; `x-api-key` takes precedence over a bearer token.
fn presented_key(headers: &HeaderMap) -> Option<(KeySource, String)> {
    if let Some(key) = headers.get(X_API_KEY).and_then(|v| v.to_str().ok()) {
        return Some((KeySource::Header, key.to_string()));
    }
    headers
        .typed_get::<Authorization<Bearer>>()
        .map(|auth| (KeySource::Bearer, auth.token().to_string()))
}

fn check_key(expected: &str, headers: &HeaderMap) -> Result<KeySource, StratusError> {
    let (source, key) =
        presented_key(headers).ok_or(StratusError::Unauthorized("missing API key"))?;
    if bool::from(key.as_bytes().ct_eq(expected.as_bytes())) {
        Ok(source)
    } else {
        debug!(source = source.as_str(), "Rejected API key");
        Err(StratusError::Unauthorized("invalid API key"))
    }
}

/// Guards the `/v1` routes with the configured API key.
#[derive(Debug, Clone, Copy)]
pub struct RequireKeyAuth(pub KeySource);

impl FromRequestParts<StratusState> for RequireKeyAuth {
    type Rejection = StratusError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &StratusState,
    ) -> Result<Self, Self::Rejection> {
        check_key(&state.api_key, &parts.headers).map(RequireKeyAuth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_key_header_wins_over_bearer() {
        let mut headers = HeaderMap::new();
        headers.insert(X_API_KEY, "from-header".parse().unwrap());
        headers.insert("authorization", "Bearer from-bearer".parse().unwrap());
        assert_eq!(
            presented_key(&headers),
            Some((KeySource::Header, "from-header".to_string()))
        );
        assert_eq!(check_key("from-header", &headers).unwrap(), KeySource::Header);

        headers.remove(X_API_KEY);
        assert_eq!(check_key("from-bearer", &headers).unwrap(), KeySource::Bearer);
    }

    #[test]
    fn rejections_carry_the_reason() {
        let err = check_key("secret", &HeaderMap::new()).unwrap_err();
        assert!(matches!(err, StratusError::Unauthorized("missing API key")));

        let mut headers = HeaderMap::new();
        headers.insert(X_API_KEY, "guess".parse().unwrap());
        let err = check_key("secret", &headers).unwrap_err();
        assert!(matches!(err, StratusError::Unauthorized("invalid API key")));
    }
}
