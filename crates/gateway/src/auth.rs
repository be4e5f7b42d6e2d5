//! Bearer-token extraction for the channel routes.

use axum::http::HeaderMap;

use crate::routes::ApiError;

/// Pull the caller's bot token out of the `Authorization` header.
pub fn bearer_token(headers: &HeaderMap) -> Result<String, ApiError> {
    let Some(value) = headers.get(axum::http::header::AUTHORIZATION) else {
        return Err(ApiError::unauthorized("Missing Authorization header"));
    };

    let value = value
        .to_str()
        .map_err(|_| ApiError::unauthorized("Authorization header must be in format: Bearer <token>"))?;

    let (scheme, token) = value.split_once(' ').unwrap_or((value, ""));
    let token = token.trim();
    if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() {
        return Err(ApiError::unauthorized(
            "Authorization header must be in format: Bearer <token>",
        ));
    }
    Ok(token.to_string())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use axum::http::{HeaderMap, HeaderValue};

    use super::*;

    fn headers_with(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            HeaderValue::from_str(value).unwrap(),
        );
        headers
    }

    #[test]
    fn extracts_bearer_token() {
        let token = bearer_token(&headers_with("Bearer xoxb-123")).unwrap();
        assert_eq!(token, "xoxb-123");
    }

    #[test]
    fn scheme_is_case_insensitive() {
        let token = bearer_token(&headers_with("bearer xoxb-123")).unwrap();
        assert_eq!(token, "xoxb-123");
    }

    #[test]
    fn missing_header_is_rejected() {
        let err = bearer_token(&HeaderMap::new()).unwrap_err();
        assert_eq!(err.detail, "Missing Authorization header");
    }

    #[test]
    fn wrong_scheme_is_rejected() {
        assert!(bearer_token(&headers_with("Basic dXNlcg==")).is_err());
    }

    #[test]
    fn empty_token_is_rejected() {
        assert!(bearer_token(&headers_with("Bearer ")).is_err());
        assert!(bearer_token(&headers_with("Bearer")).is_err());
    }
}
