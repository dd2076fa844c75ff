use crate::config::AuthConfig;
use anyhow::{Result, anyhow};
use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Claims of a service-to-service token
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String, // calling service id
    pub exp: usize,
    pub jti: String,
}

fn algorithm(config: &AuthConfig) -> Result<Algorithm> {
    Algorithm::from_str(&config.jwt_algorithm)
        .map_err(|_| anyhow!("Unsupported JWT algorithm: {}", config.jwt_algorithm))
}

pub fn create_service_jwt(service_id: &str, config: &AuthConfig, ttl: Duration) -> Result<String> {
    let expiration = Utc::now()
        .checked_add_signed(ttl)
        .ok_or_else(|| anyhow!("token expiry out of range"))?
        .timestamp();

    let claims = Claims {
        sub: service_id.to_owned(),
        exp: expiration as usize,
        jti: uuid::Uuid::new_v4().to_string(),
    };

    let token = encode(
        &Header::new(algorithm(config)?),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret.as_ref()),
    )?;

    Ok(token)
}

/// Decodes the token and checks that it was issued for the configured service
pub fn validate_service_jwt(token: &str, config: &AuthConfig) -> Result<Claims> {
    let validation = Validation::new(algorithm(config)?);
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.jwt_secret.as_ref()),
        &validation,
    )?;

    if token_data.claims.sub != config.service_id {
        return Err(anyhow!("token subject is not the expected service"));
    }

    Ok(token_data.claims)
}
