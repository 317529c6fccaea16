use std::time::{SystemTime, UNIX_EPOCH};

use crate::models::Claims;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::Error};

fn now() -> usize {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as usize)
        .unwrap_or_default()
}

pub fn generate_session_token(
    user_id: u64,
    username: String,
    role: &str,
    session_id: &str,
    secret: &str,
    ttl: usize,
) -> Result<String, Error> {
    let iat = now();
    let claims = Claims {
        user_id,
        sub: username,
        role: role.to_string(),
        sid: session_id.to_string(),
        iat,
        exp: iat + ttl,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

pub fn verify_token(token: &str, secret: &str) -> Result<Claims, String> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_round_trips_session_id() {
        let token = generate_session_token(7, "alice".into(), "doer", "sid-1", "s3cret", 60).unwrap();
        let claims = verify_token(&token, "s3cret").unwrap();
        assert_eq!(claims.sid, "sid-1");
        assert_eq!(claims.user_id, 7);
        assert_eq!(claims.role, "doer");
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = generate_session_token(7, "alice".into(), "doer", "sid-1", "s3cret", 60).unwrap();
        assert!(verify_token(&token, "other").is_err());
    }
}
