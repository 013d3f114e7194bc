//! Connection authentication seam.
//!
//! Token issuance and validation belong to the suite's auth service; the
//! router only needs a yes/no answer for the `{token, user_id}` pair a
//! connection presents. [`TokenVerifier`] is that seam.

/// Decides whether a presented credential pair binds a connection.
pub trait TokenVerifier: Send + Sync + 'static {
    /// Returns `true` if `token` is valid for `user_id`.
    fn verify(&self, token: &str, user_id: &str) -> bool;
}

/// Default verifier: treats tokens as opaque and rejects only
/// structurally empty credentials.
///
/// Deployments plug a real verifier (shared secret, auth-service
/// lookup) in via [`crate::router::RouterState::with_config`].
pub struct OpaqueVerifier;

impl TokenVerifier for OpaqueVerifier {
    fn verify(&self, token: &str, user_id: &str) -> bool {
        !token.is_empty() && !user_id.is_empty()
    }
}
