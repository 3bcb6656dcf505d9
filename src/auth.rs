//! Bearer-token authentication shared by the control HTTP surface and the
//! session/metrics WebSocket upgrade paths.
//!
//! [`TokenRegistry`] holds the set of valid tokens. If none are configured at
//! startup it mints a fresh one (≥ 256 bits of entropy, rendered as lowercase
//! hex) and logs it exactly once — the usability behavior the reference
//! server's default-API-key warning aims for, but with a real secret instead
//! of a well-known placeholder.

use std::collections::HashSet;
use std::sync::RwLock;

use axum::{
    extract::Request,
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use rand::RngCore;
use serde_json::json;
use tracing::warn;

/// Holds the set of valid bearer tokens.
///
/// Cloneable — all clones share the same inner registry via `Arc`.
#[derive(Clone)]
pub struct TokenRegistry {
    inner: std::sync::Arc<RwLock<HashSet<String>>>,
}

impl TokenRegistry {
    /// Build a registry seeded with `tokens`. If `tokens` is empty, mints a
    /// fresh cryptographically random token and logs it once.
    pub fn new(tokens: Vec<String>) -> Self {
        let mut set: HashSet<String> = tokens.into_iter().filter(|t| !t.is_empty()).collect();
        if set.is_empty() {
            let minted = mint_token();
            warn!("No API tokens configured — minted one for this run: {minted}");
            set.insert(minted);
        }
        Self {
            inner: std::sync::Arc::new(RwLock::new(set)),
        }
    }

    /// Add a token to the registry.
    pub fn add(&self, token: String) {
        self.inner.write().expect("token registry poisoned").insert(token);
    }

    /// Check whether `candidate` is a member of the registry.
    ///
    /// Iterates every stored token and compares in constant time with
    /// respect to each candidate/token pair; the loop never exits early on
    /// the first match, so the total comparison cost is independent of
    /// which (if any) token matched.
    pub fn contains(&self, candidate: &str) -> bool {
        let set = self.inner.read().expect("token registry poisoned");
        let mut found = false;
        for token in set.iter() {
            found |= constant_time_eq(token.as_bytes(), candidate.as_bytes());
        }
        found
    }

    /// Snapshot the current token set (used for diagnostics/tests only).
    pub fn snapshot(&self) -> Vec<String> {
        self.inner
            .read()
            .expect("token registry poisoned")
            .iter()
            .cloned()
            .collect()
    }
}

/// Mint a fresh token: 32 bytes of OS randomness, rendered as 64 hex chars.
fn mint_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Constant-time byte comparison to prevent a timing side-channel on token
/// length or content.
///
/// Always iterates over the full length of `expected` regardless of
/// `provided`'s length, so an attacker cannot determine token length or
/// prefix from response times.
pub fn constant_time_eq(expected: &[u8], provided: &[u8]) -> bool {
    let mut diff = u8::from(expected.len() != provided.len());
    for i in 0..expected.len() {
        let p = if i < provided.len() { provided[i] } else { 0xff };
        diff |= expected[i] ^ p;
    }
    diff == 0
}

/// Axum middleware that rejects requests without a valid
/// `Authorization: Bearer <token>` header. The registry is injected via the
/// [`TokenRegistry`] extension.
///
/// # Error responses
///
/// - `401 Unauthorized` — header missing or malformed
/// - `403 Forbidden` — token present but not in the registry
pub async fn require_bearer_token(request: Request, next: Next) -> Response {
    let registry = match request.extensions().get::<TokenRegistry>() {
        Some(r) => r.clone(),
        None => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "Server configuration error", "error_code": "MESSAGE_PROCESSING_ERROR"})),
            )
                .into_response();
        }
    };

    let provided = match request
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
    {
        Some(h) if h.starts_with("Bearer ") => &h[7..],
        _ => {
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": "Missing or invalid Authorization header", "error_code": "AUTH_REQUIRED"})),
            )
                .into_response();
        }
    };

    if !registry.contains(provided) {
        return (
            StatusCode::FORBIDDEN,
            Json(json!({"error": "Invalid API token", "error_code": "AUTH_REQUIRED"})),
        )
            .into_response();
    }

    next.run(request).await
}

/// Extract a bearer credential from either the `token` query parameter or
/// the `Authorization` header, preferring the bearer form of the header.
///
/// Used by the WebSocket upgrade path, which can't rely on a middleware
/// layer since browsers can't set custom headers on the upgrade request.
pub fn extract_credential(query_token: Option<&str>, auth_header: Option<&str>) -> Option<String> {
    if let Some(h) = auth_header {
        if let Some(stripped) = h.strip_prefix("Bearer ") {
            return Some(stripped.to_string());
        }
    }
    query_token
        .filter(|t| !t.is_empty())
        .map(ToString::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_registry_mints_a_token() {
        let reg = TokenRegistry::new(vec![]);
        let snap = reg.snapshot();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].len(), 64);
    }

    #[test]
    fn contains_matches_seeded_token() {
        let reg = TokenRegistry::new(vec!["good".to_string()]);
        assert!(reg.contains("good"));
        assert!(!reg.contains("nope"));
    }

    #[test]
    fn contains_is_independent_of_set_size() {
        let mut tokens: Vec<String> = (0..50).map(|i| format!("token-{i}")).collect();
        tokens.push("the-one".to_string());
        let reg = TokenRegistry::new(tokens);
        assert!(reg.contains("the-one"));
        assert!(!reg.contains("the-two"));
    }

    #[test]
    fn add_makes_a_token_valid_immediately() {
        let reg = TokenRegistry::new(vec!["a".to_string()]);
        assert!(!reg.contains("b"));
        reg.add("b".to_string());
        assert!(reg.contains("b"));
    }

    #[test]
    fn constant_time_eq_rejects_mismatched_lengths_and_content() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"ab"));
    }

    #[test]
    fn extract_credential_prefers_header_over_query() {
        let got = extract_credential(Some("q"), Some("Bearer h"));
        assert_eq!(got.as_deref(), Some("h"));
        let got = extract_credential(Some("q"), None);
        assert_eq!(got.as_deref(), Some("q"));
        let got = extract_credential(None, None);
        assert!(got.is_none());
    }
}
