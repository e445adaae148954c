use actix_web::{dev::Payload, FromRequest, HttpRequest};
use actix_web_httpauth::extractors::bearer::BearerAuth;
use jsonwebtoken::{decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::env;
use std::future::{ready, Ready};
use std::sync::OnceLock;
use utoipa::ToSchema;

use crate::error::ApiError;
use crate::models::Id;

const DEFAULT_TTL_HOURS: i64 = 24;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }
}

impl TryFrom<String> for Role {
    type Error = String;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.as_str() {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// user id, as a decimal string
    pub sub: String,
    pub email: String,
    pub role: Role,
    pub exp: usize,
}

/// Signing key and token lifetime.
#[derive(Debug, Clone)]
pub struct JwtSettings {
    pub secret: String,
    pub ttl: chrono::Duration,
}

static SETTINGS: OnceLock<JwtSettings> = OnceLock::new();

/// Install the settings loaded at boot. Only the first call wins; returns whether
/// this one did.
pub fn install(settings: JwtSettings) -> bool {
    SETTINGS.set(settings).is_ok()
}

fn settings() -> Result<JwtSettings, ApiError> {
    if let Some(s) = SETTINGS.get() {
        return Ok(s.clone());
    }
    // nothing installed: read the environment directly
    let secret = env::var("JWT_SECRET").map_err(|_| ApiError::Internal("JWT_SECRET not set".into()))?;
    let hours = env::var("JWT_TTL_HOURS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_TTL_HOURS);
    Ok(JwtSettings { secret, ttl: chrono::Duration::hours(hours) })
}

/// Validate a JWT and return its claims.
fn decode_jwt(token: &str) -> Result<Claims, ApiError> {
    let secret = settings()?.secret;
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    validation.leeway = 0;
    let data = decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)
        .map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => ApiError::Unauthorized("token expired".into()),
            _ => ApiError::Unauthorized("invalid token".into()),
        })?;
    Ok(data.claims)
}

/// Extractor yielding validated `Claims`.
#[derive(Debug, Clone)]
pub struct Auth(pub Claims);

impl Auth {
    pub fn role(&self) -> Role {
        self.0.role
    }

    pub fn is_admin(&self) -> bool {
        self.0.role == Role::Admin
    }

    pub fn user_id(&self) -> Result<Id, ApiError> {
        self.0
            .sub
            .parse()
            .map_err(|_| ApiError::Unauthorized("invalid token subject".into()))
    }
}

impl FromRequest for Auth {
    type Error = ApiError;
    type Future = Ready<Result<Self, ApiError>>;

    fn from_request(req: &HttpRequest, pl: &mut Payload) -> Self::Future {
        // Delegate to BearerAuth to parse the header.
        match BearerAuth::from_request(req, pl).into_inner() {
            Ok(bearer) => ready(decode_jwt(bearer.token()).map(Auth)),
            Err(_) => ready(Err(ApiError::Unauthorized("token missing".into()))),
        }
    }
}

/// Helper macro for permission-guarding handlers through [`crate::policy::authorize`].
#[macro_export]
macro_rules! require_permission {
    ($auth:expr, $action:expr) => {
        if !$crate::policy::authorize($auth.role(), $action) {
            return Err($crate::error::ApiError::Forbidden);
        }
    };
}

/// Create a signed token for a user.
pub fn create_jwt(user_id: Id, email: &str, role: Role) -> Result<String, ApiError> {
    let JwtSettings { secret, ttl } = settings()?;
    let expiration = chrono::Utc::now()
        .checked_add_signed(ttl)
        .ok_or_else(|| ApiError::Internal("token expiry overflow".into()))?
        .timestamp() as usize;

    let claims = Claims {
        sub: user_id.to_string(),
        email: email.to_string(),
        role,
        exp: expiration,
    };

    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes()))
        .map_err(|e| ApiError::Internal(format!("jwt encode: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn installed_settings_sign_and_verify() {
        let secret = "installed-secret-0123456789abcdef0123";
        install(JwtSettings { secret: secret.into(), ttl: chrono::Duration::hours(2) });

        let token = create_jwt(7, "ana@example.com", Role::User).unwrap();
        let data = decode::<Claims>(
            &token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &Validation::new(Algorithm::HS256),
        )
        .unwrap();
        let expected = (chrono::Utc::now() + chrono::Duration::hours(2)).timestamp();
        assert!((data.claims.exp as i64 - expected).abs() <= 60);
        assert_eq!(decode_jwt(&token).unwrap().sub, "7");
    }
}
