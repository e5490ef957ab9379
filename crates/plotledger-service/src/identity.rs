//! Caller identity taken from headers set by the upstream session layer.

use crate::error::ApiError;
use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use plotledger_core::{Actor, Role, TenantId};

pub const TENANT_HEADER: &str = "x-tenant-id";
pub const USER_HEADER: &str = "x-user-id";
pub const ROLE_HEADER: &str = "x-user-role";

/// Extractor wrapping the [`Actor`] for the current request.
#[derive(Debug, Clone)]
pub struct Identity(pub Actor);

#[async_trait]
impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        actor_from_headers(&parts.headers).map(Identity)
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str, ApiError> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ApiError::unauthenticated(format!("missing {name} header")))
}

pub fn actor_from_headers(headers: &HeaderMap) -> Result<Actor, ApiError> {
    let tenant = header(headers, TENANT_HEADER)?;
    let user_id = header(headers, USER_HEADER)?
        .parse()
        .map_err(|_| ApiError::unauthenticated(format!("{USER_HEADER} must be an integer")))?;
    let role = Role::parse(header(headers, ROLE_HEADER)?).ok_or_else(|| {
        ApiError::unauthenticated(format!("{ROLE_HEADER} must be RESIDENT or CHAIRMAN"))
    })?;
    Ok(Actor::new(TenantId::new(tenant), user_id, role))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn parses_complete_identity() {
        let mut headers = HeaderMap::new();
        headers.insert(TENANT_HEADER, HeaderValue::from_static("green-acres"));
        headers.insert(USER_HEADER, HeaderValue::from_static("42"));
        headers.insert(ROLE_HEADER, HeaderValue::from_static("chairman"));

        let actor = actor_from_headers(&headers).unwrap();
        assert_eq!(actor.tenant_id.as_str(), "green-acres");
        assert_eq!(actor.user_id, 42);
        assert!(actor.is_chairman());
    }

    #[test]
    fn rejects_missing_or_garbled_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(TENANT_HEADER, HeaderValue::from_static("green-acres"));
        assert!(actor_from_headers(&headers).is_err());

        headers.insert(USER_HEADER, HeaderValue::from_static("forty-two"));
        headers.insert(ROLE_HEADER, HeaderValue::from_static("RESIDENT"));
        assert!(actor_from_headers(&headers).is_err());

        headers.insert(USER_HEADER, HeaderValue::from_static("42"));
        headers.insert(ROLE_HEADER, HeaderValue::from_static("treasurer"));
        assert!(actor_from_headers(&headers).is_err());
    }
}
