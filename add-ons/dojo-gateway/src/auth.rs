//! Identity resolution.
//!
//! Credential issuance (social login, cookie minting) belongs to the external
//! identity provider; the gateway only resolves already-issued session tokens
//! against the `auth_sessions` table. No valid token means a hard 401; a
//! request is never downgraded to an anonymous caller.

use crate::store::WorkspaceStore;
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use dojo_core::GatewayError;

#[derive(Debug, Clone)]
pub struct Identity {
    pub user_id: String,
}

pub fn resolve_identity(
    store: &WorkspaceStore,
    headers: &HeaderMap,
) -> Result<Identity, GatewayError> {
    let token = bearer_token(headers).ok_or(GatewayError::AuthenticationRequired)?;

    let user_id = store
        .resolve_session(token)
        .map_err(|e| GatewayError::Store(e.to_string()))?;

    match user_id {
        Some(user_id) => Ok(Identity { user_id }),
        None => {
            tracing::debug!(target: "dojo::auth", "Session token rejected (unknown or expired)");
            Err(GatewayError::AuthenticationRequired)
        }
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use tempfile::TempDir;

    fn store_with_session() -> (TempDir, WorkspaceStore) {
        let dir = TempDir::new().unwrap();
        let store = WorkspaceStore::new(dir.path().join("dojo.sqlite3")).unwrap();
        store.upsert_user("user-1", "one@example.com").unwrap();
        let future = chrono::Utc::now().timestamp_millis() + 60_000;
        store.create_session("tok-valid", "user-1", future).unwrap();
        (dir, store)
    }

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_valid_bearer_resolves_identity() {
        let (_dir, store) = store_with_session();
        let identity = resolve_identity(&store, &headers("Bearer tok-valid")).unwrap();
        assert_eq!(identity.user_id, "user-1");
    }

    #[test]
    fn test_missing_header_is_unauthenticated() {
        let (_dir, store) = store_with_session();
        let err = resolve_identity(&store, &HeaderMap::new()).unwrap_err();
        assert!(matches!(err, GatewayError::AuthenticationRequired));
    }

    #[test]
    fn test_unknown_token_is_unauthenticated() {
        let (_dir, store) = store_with_session();
        let err = resolve_identity(&store, &headers("Bearer tok-bogus")).unwrap_err();
        assert!(matches!(err, GatewayError::AuthenticationRequired));
    }

    #[test]
    fn test_non_bearer_scheme_is_unauthenticated() {
        let (_dir, store) = store_with_session();
        let err = resolve_identity(&store, &headers("Basic dXNlcjpwdw==")).unwrap_err();
        assert!(matches!(err, GatewayError::AuthenticationRequired));
    }
}
