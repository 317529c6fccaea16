use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Deserialize, ToSchema)]
pub struct LoginReqDto {
    #[schema(example = "alice")]
    pub username: String,
    #[schema(example = "correct horse battery staple")]
    pub password: String,
}

#[derive(Serialize, ToSchema)]
pub struct LoginResponse {
    pub success: bool,
    /// Signed session token, also set as the `session` cookie
    pub token: String,
    /// Must be echoed in `X-CSRF-Token` on every POST
    pub csrf_token: String,
    #[schema(example = "alice")]
    pub username: String,
    #[schema(example = "doer")]
    pub role: String,
    #[schema(example = 28800)]
    pub expires_in: usize,
}

#[derive(Serialize, ToSchema)]
pub struct MeResponse {
    pub success: bool,
    pub user_id: u64,
    pub username: String,
    pub role: String,
    pub department_id: Option<u64>,
    pub csrf_token: String,
}

#[derive(Deserialize, ToSchema)]
pub struct PasswordResetReq {
    #[schema(example = "alice")]
    pub username: String,
    #[schema(example = "Forgot my password after vacation")]
    pub reason: Option<String>,
}

/// Session token claims. `sid` points at the `user_sessions` row that
/// decides whether the token is still honoured.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: u64,
    pub sub: String,
    pub role: String,
    pub sid: String,
    pub iat: usize,
    pub exp: usize,
}
