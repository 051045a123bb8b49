use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use tracing::{debug, warn};
use uuid::Uuid;

use super::claims::{Claims, TokenKind};
use crate::config::JwtConfig;
use crate::state::AppState;

/// Verified owner id of the caller.
pub struct AuthUser(pub Uuid);

pub fn verify_access(token: &str, cfg: &JwtConfig) -> Result<Claims, (StatusCode, String)> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_audience(std::slice::from_ref(&cfg.audience));
    validation.set_issuer(std::slice::from_ref(&cfg.issuer));
    let decoding = DecodingKey::from_secret(cfg.secret.as_bytes());

    let data = decode::<Claims>(token, &decoding, &validation).map_err(|e| {
        warn!(error = %e, "invalid or expired token");
        (StatusCode::UNAUTHORIZED, "invalid or expired token".to_string())
    })?;

    if data.claims.kind != TokenKind::Access {
        return Err((StatusCode::UNAUTHORIZED, "access token required".into()));
    }
    debug!(user_id = %data.claims.sub, "jwt verified");
    Ok(data.claims)
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = (StatusCode, String);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let auth = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .ok_or((StatusCode::UNAUTHORIZED, "missing Authorization header".into()))?;

        let token = auth
            .strip_prefix("Bearer ")
            .or_else(|| auth.strip_prefix("bearer "))
            .ok_or((StatusCode::UNAUTHORIZED, "invalid auth scheme".into()))?;

        let claims = verify_access(token, &state.config.jwt)?;
        Ok(AuthUser(claims.sub))
    }
}
