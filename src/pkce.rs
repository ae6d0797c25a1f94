use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::{TryRngCore, rngs::OsRng};
use sha2::{Digest, Sha256};

use crate::AuthError;

const VERIFIER_BYTES: usize = 32;

pub(crate) const CHALLENGE_METHOD: &str = "S256";

/// Fills `N` bytes from the OS RNG and encodes them as unpadded base64url.
pub(crate) fn random_url_safe<const N: usize>() -> Result<String, AuthError> {
    let mut bytes = [0u8; N];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|err| AuthError::OsRng {
            message: err.to_string(),
        })?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// Code verifier and its S256 challenge for one authorization attempt.
///
/// Only used when [`AuthConfig::with_pkce`](crate::AuthConfig::with_pkce) is
/// enabled; the verifier travels with the pending flow until the exchange.
#[derive(Clone)]
pub struct PkcePair {
    pub code_verifier: String,
    pub code_challenge: String,
}

impl PkcePair {
    pub fn generate() -> Result<Self, AuthError> {
        Ok(Self::from_verifier(random_url_safe::<VERIFIER_BYTES>()?))
    }

    pub fn from_verifier(code_verifier: impl Into<String>) -> Self {
        let code_verifier = code_verifier.into();
        let digest = Sha256::digest(code_verifier.as_bytes());
        Self {
            code_challenge: URL_SAFE_NO_PAD.encode(digest),
            code_verifier,
        }
    }

    pub fn challenge_method(&self) -> &'static str {
        CHALLENGE_METHOD
    }
}

impl std::fmt::Debug for PkcePair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PkcePair")
            .field("code_verifier", &"<redacted>")
            .field("code_challenge", &self.code_challenge)
            .finish()
    }
}
