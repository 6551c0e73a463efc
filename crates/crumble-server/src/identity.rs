use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};

/// Claims carried by the socket bearer token, as minted by the login
/// service at OAuth callback time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub picture: String,
    pub exp: u64,
}

/// Identity attached to an authenticated connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedUser {
    pub user_id: String,
    pub name: String,
    pub avatar: String,
}

#[derive(Debug)]
pub enum AuthError {
    MissingToken,
    InvalidToken(String),
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingToken => write!(f, "authentication required"),
            Self::InvalidToken(e) => write!(f, "invalid token: {e}"),
        }
    }
}

impl std::error::Error for AuthError {}

/// Validates HS256 bearer tokens presented at socket-open time. Tokens
/// are opaque to the rest of the server; there is no refresh path.
#[derive(Clone)]
pub struct IdentityVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl IdentityVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    pub fn verify(&self, token: &str) -> Result<VerifiedUser, AuthError> {
        let data = decode::<Claims>(token, &self.key, &self.validation)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))?;
        Ok(VerifiedUser {
            user_id: data.claims.user_id,
            name: data.claims.name,
            avatar: data.claims.picture,
        })
    }
}
