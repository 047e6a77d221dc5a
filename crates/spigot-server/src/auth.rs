//! Bearer-token extractor and admin-secret verifier.
//!
//! Tokens are issued by the sign-in service; this server only validates
//! them. The subject id travels in the `userID` claim.

use argon2::{Argon2, PasswordHash, PasswordVerifier};
use axum::extract::FromRequestParts;
use axum::http::{HeaderMap, header, request::Parts};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use spigot_engine::Backend;
use uuid::Uuid;

use crate::{AppState, error::Error};

#[derive(Clone)]
pub struct AuthConfig {
  /// HS256 key shared with the sign-in service.
  pub jwt_secret:        String,
  /// PHC string produced by argon2. `None` locks the admin endpoints.
  pub admin_secret_hash: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Claims {
  #[serde(rename = "userID")]
  user_id: String,
}

/// The authenticated subject behind a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
  pub subject_id: Uuid,
}

pub fn verify_bearer(headers: &HeaderMap, config: &AuthConfig) -> Result<Caller, Error> {
  let token = headers
    .get(header::AUTHORIZATION)
    .and_then(|v| v.to_str().ok())
    .and_then(|v| v.strip_prefix("Bearer "))
    .ok_or(Error::Unauthorized)?;

  // Expiry is checked when present but not required.
  let mut validation = Validation::new(Algorithm::HS256);
  validation.required_spec_claims.clear();

  let data = jsonwebtoken::decode::<Claims>(
    token.trim(),
    &DecodingKey::from_secret(config.jwt_secret.as_bytes()),
    &validation,
  )
  .map_err(|_| Error::Unauthorized)?;

  let subject_id = Uuid::parse_str(&data.claims.user_id).map_err(|_| Error::Unauthorized)?;
  Ok(Caller { subject_id })
}

pub fn verify_admin_secret(secret: &str, config: &AuthConfig) -> Result<(), Error> {
  let hash = config.admin_secret_hash.as_deref().ok_or(Error::Forbidden)?;
  let parsed = PasswordHash::new(hash).map_err(|_| Error::Forbidden)?;
  Argon2::default()
    .verify_password(secret.as_bytes(), &parsed)
    .map_err(|_| Error::Forbidden)
}

impl<B: Backend> FromRequestParts<AppState<B>> for Caller {
  type Rejection = Error;

  async fn from_request_parts(
    parts: &mut Parts,
    state: &AppState<B>,
  ) -> Result<Self, Self::Rejection> {
    verify_bearer(&parts.headers, &state.auth)
  }
}

#[cfg(test)]
mod tests {
  use argon2::{PasswordHasher, password_hash::SaltString};
  use axum::http::HeaderValue;
  use jsonwebtoken::{EncodingKey, Header};
  use rand_core::OsRng;
  use serde_json::json;

  use super::*;

  fn config(admin: Option<&str>) -> AuthConfig {
    let admin_secret_hash = admin.map(|secret| {
      let salt = SaltString::generate(&mut OsRng);
      Argon2::default().hash_password(secret.as_bytes(), &salt).unwrap().to_string()
    });
    AuthConfig { jwt_secret: "signing-key".to_string(), admin_secret_hash }
  }

  fn token(key: &str, claims: serde_json::Value) -> String {
    jsonwebtoken::encode(&Header::default(), &claims, &EncodingKey::from_secret(key.as_bytes()))
      .unwrap()
  }

  fn bearer(token: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
      header::AUTHORIZATION,
      HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
    );
    headers
  }

  #[test]
  fn valid_token() {
    let id = Uuid::new_v4();
    let headers = bearer(&token("signing-key", json!({ "userID": id.to_string() })));
    assert_eq!(verify_bearer(&headers, &config(None)).unwrap(), Caller { subject_id: id });
  }

  #[test]
  fn wrong_key() {
    let headers = bearer(&token("other-key", json!({ "userID": Uuid::new_v4().to_string() })));
    assert!(matches!(verify_bearer(&headers, &config(None)), Err(Error::Unauthorized)));
  }

  #[test]
  fn expired_token() {
    let claims = json!({ "userID": Uuid::new_v4().to_string(), "exp": 1_000_000 });
    let headers = bearer(&token("signing-key", claims));
    assert!(matches!(verify_bearer(&headers, &config(None)), Err(Error::Unauthorized)));
  }

  #[test]
  fn non_uuid_subject() {
    let headers = bearer(&token("signing-key", json!({ "userID": "42" })));
    assert!(matches!(verify_bearer(&headers, &config(None)), Err(Error::Unauthorized)));
  }

  #[test]
  fn missing_header() {
    assert!(matches!(verify_bearer(&HeaderMap::new(), &config(None)), Err(Error::Unauthorized)));
  }

  #[test]
  fn admin_secret() {
    let cfg = config(Some("hunter2"));
    assert!(verify_admin_secret("hunter2", &cfg).is_ok());
    assert!(matches!(verify_admin_secret("wrong", &cfg), Err(Error::Forbidden)));
  }

  #[test]
  fn admin_endpoints_locked_without_hash() {
    assert!(matches!(verify_admin_secret("anything", &config(None)), Err(Error::Forbidden)));
  }
}
