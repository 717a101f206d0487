//! Two-tier viewer access control: a global password plus a
//! per-session password fallback.
//!
//! Clients never send a cleartext password: every `X-Password` and
//! `X-Session-Password` header carries the SHA-256 hex digest of the
//! underlying secret (the digest is what `/api/v1/check_password` and
//! `/api/v1/sessions/{sid}/check_password` both compare against too). The
//! server hashes its own configured secrets once per request and compares
//! hex digests with a constant-time comparator, since a digest's length
//! never varies with the guessed password's correctness.

use sha2::{Digest, Sha256};

/// Outcome of a failed authorization check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// No credential was presented, or the one presented did not match
    /// anything it was checked against. Maps to HTTP 401.
    #[error("missing or invalid credential")]
    Unauthorized,
    /// A credential was valid for a narrower scope than the endpoint
    /// requires (a session password presented to a global-only endpoint).
    /// Maps to HTTP 403.
    #[error("credential valid for a different scope")]
    Forbidden,
}

/// Granted access to one session's detail endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionGrant {
    /// `true` if access was granted via the global password rather than
    /// the session's own viewer password (including the legacy-document
    /// fallback when a session has no viewer password of its own).
    pub used_global: bool,
}

/// Hex-encodes the SHA-256 digest of `input`.
#[must_use]
pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|byte| format!("{byte:02x}")).collect()
}

/// Constant-time equality over two strings of digest text. Bails out to a
/// length check first since a fixed-length hex digest never leaks timing
/// information through its length, only through byte comparison.
#[must_use]
fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff: u8 = 0;
    for (x, y) in a.bytes().zip(b.bytes()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Validates viewer credentials against the configured global password
/// and, per session, the session's own auto-generated viewer password.
pub struct AccessControl {
    backend_password_digest: String,
}

impl AccessControl {
    /// Builds a validator over the cleartext global password; its digest
    /// is computed once, here, rather than on every request.
    #[must_use]
    pub fn new(backend_password: &str) -> Self {
        Self {
            backend_password_digest: sha256_hex(backend_password),
        }
    }

    fn matches_global(&self, candidate_digest: &str) -> bool {
        constant_time_eq(candidate_digest, &self.backend_password_digest)
    }

    /// `true` if `candidate_digest` is the configured global password's
    /// digest. Backs `POST /api/v1/check_password`.
    #[must_use]
    pub fn check_global(&self, candidate_digest: &str) -> bool {
        self.matches_global(candidate_digest)
    }

    /// `(valid, used_global)` for `POST /api/v1/sessions/{sid}/check_password`.
    #[must_use]
    pub fn check_session(
        &self,
        candidate_digest: &str,
        session_viewer_password: Option<&str>,
    ) -> (bool, bool) {
        match session_viewer_password {
            Some(stored) => {
                let stored_digest = sha256_hex(stored);
                if constant_time_eq(candidate_digest, &stored_digest) {
                    (true, false)
                } else {
                    (self.matches_global(candidate_digest), true)
                }
            }
            None => (self.matches_global(candidate_digest), true),
        }
    }

    /// Authorizes a request to a global-only endpoint (`/api/v1/metadata-fields`,
    /// `/api/v1/sessions/search`). Presenting `X-Session-Password` instead
    /// of `X-Password` is a scope mismatch (403), not a missing credential
    /// (401), since the caller plainly holds *some* valid secret, just not
    /// one that reaches this endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Unauthorized`] if `x_password` is absent or
    /// wrong, or [`AuthError::Forbidden`] if only `x_session_password` was
    /// presented.
    pub fn authorize_global(
        &self,
        x_password: Option<&str>,
        x_session_password: Option<&str>,
    ) -> Result<(), AuthError> {
        if let Some(candidate) = x_password {
            return if self.matches_global(candidate) {
                Ok(())
            } else {
                Err(AuthError::Unauthorized)
            };
        }
        if x_session_password.is_some() {
            return Err(AuthError::Forbidden);
        }
        Err(AuthError::Unauthorized)
    }

    /// Authorizes a request to `GET /api/v1/sessions/{sid}`, which accepts
    /// either credential. `X-Session-Password` is checked first: a match
    /// against the session's own viewer password scopes access to that
    /// session only; if the session has no viewer password of its own
    /// (legacy documents), the check falls back to the global password and
    /// reports `used_global=true`. `X-Password` alone also grants access,
    /// always as `used_global=true`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Unauthorized`] if neither header is present or
    /// neither matches.
    pub fn authorize_session(
        &self,
        x_password: Option<&str>,
        x_session_password: Option<&str>,
        session_viewer_password: Option<&str>,
    ) -> Result<SessionGrant, AuthError> {
        if let Some(candidate) = x_session_password {
            let (valid, used_global) = self.check_session(candidate, session_viewer_password);
            return if valid {
                Ok(SessionGrant { used_global })
            } else {
                Err(AuthError::Unauthorized)
            };
        }
        if let Some(candidate) = x_password {
            return if self.matches_global(candidate) {
                Ok(SessionGrant { used_global: true })
            } else {
                Err(AuthError::Unauthorized)
            };
        }
        Err(AuthError::Unauthorized)
    }
}
