use crate::{
    auth::{
        auth::RequestContext,
        jwt::generate_session_token,
        middleware::SESSION_COOKIE,
        password::verify_password,
        session::{ClientInfo, SessionStore},
    },
    config::Config,
    error::{ApiMessage, AppError},
    model::{role::Role, user::User},
    models::{LoginReqDto, LoginResponse, MeResponse, PasswordResetReq},
};
use actix_web::{
    HttpRequest, HttpResponse,
    cookie::{Cookie, SameSite},
    web,
};
use sqlx::MySqlPool;
use std::str::FromStr;
use tracing::{debug, error, info, instrument, warn};

const MAX_DEVICE_LEN: usize = 255;

fn client_info(req: &HttpRequest) -> ClientInfo {
    let ip_address = req
        .connection_info()
        .realip_remote_addr()
        .map(|ip| ip.to_string());
    let device = req
        .headers()
        .get("User-Agent")
        .and_then(|h| h.to_str().ok())
        .map(|ua| ua.chars().take(MAX_DEVICE_LEN).collect());

    ClientInfo { ip_address, device }
}

/// Log in and open a tracked session
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginReqDto,
    responses(
        (status = 200, description = "Session opened", body = LoginResponse),
        (status = 400, description = "Missing username or password", body = ApiMessage),
        (status = 401, description = "Invalid credentials", body = ApiMessage),
        (status = 403, description = "Account inactive", body = ApiMessage)
    ),
    tag = "Auth"
)]
#[instrument(
    name = "auth_login",
    skip(req, pool, config, store, user),
    fields(username = %user.username)
)]
pub async fn login(
    req: HttpRequest,
    user: web::Json<LoginReqDto>,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    store: web::Data<SessionStore>,
) -> Result<HttpResponse, AppError> {
    info!("Login request received");

    if user.username.trim().is_empty() || user.password.is_empty() {
        info!("Validation failed: empty username or password");
        return Err(AppError::validation("Username or password required"));
    }

    debug!("Fetching user from database");

    let db_user = sqlx::query_as::<_, User>(
        r#"
        SELECT id, username, password, role, department_id, email, is_active
        FROM users
        WHERE username = ?
        "#,
    )
    .bind(user.username.trim())
    .fetch_optional(pool.get_ref())
    .await?;

    let Some(db_user) = db_user else {
        info!("Invalid credentials: user not found");
        return Err(AppError::Unauthorized("Invalid credentials".to_string()));
    };

    if let Err(e) = verify_password(&user.password, &db_user.password) {
        info!(error = %e, "Invalid credentials: password mismatch");
        return Err(AppError::Unauthorized("Invalid credentials".to_string()));
    }

    if !db_user.is_active {
        info!(user_id = db_user.id, "Login refused: account inactive");
        return Err(AppError::forbidden("Account is inactive"));
    }

    let role = Role::from_str(&db_user.role).map_err(|_| {
        warn!(user_id = db_user.id, role = %db_user.role, "User has an unknown role");
        AppError::forbidden("Account has no valid role")
    })?;

    let session = store
        .open(pool.get_ref(), &db_user, role, client_info(&req))
        .await?;

    let token = generate_session_token(
        db_user.id,
        db_user.username.clone(),
        role.as_ref(),
        &session.session_id,
        &config.jwt_secret,
        config.session_ttl,
    )
    .map_err(|e| {
        error!(error = %e, "Failed to sign session token");
        AppError::Internal("Could not open session".to_string())
    })?;

    info!(user_id = db_user.id, session_id = %session.session_id, "Login successful");

    let cookie = Cookie::build(SESSION_COOKIE, token.clone())
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .finish();

    Ok(HttpResponse::Ok().cookie(cookie).json(LoginResponse {
        success: true,
        token,
        csrf_token: session.csrf_token,
        username: db_user.username,
        role: role.to_string(),
        expires_in: config.session_ttl,
    }))
}

/// Close the caller's session
#[utoipa::path(
    post,
    path = "/api/auth/logout",
    responses(
        (status = 200, description = "Session closed", body = ApiMessage),
        (status = 401, description = "Not logged in", body = ApiMessage)
    ),
    security(("bearer_auth" = [])),
    tag = "Auth"
)]
pub async fn logout(
    ctx: RequestContext,
    store: web::Data<SessionStore>,
) -> Result<HttpResponse, AppError> {
    let closed = store.close(&ctx.pool, &ctx.user.session_id).await?;
    info!(user_id = ctx.user.user_id, closed, "Logout");

    let mut response = HttpResponse::Ok().json(ApiMessage::ok("Logged out"));
    if let Err(e) = response.add_removal_cookie(&Cookie::new(SESSION_COOKIE, "")) {
        warn!(error = %e, "Failed to clear session cookie");
    }
    Ok(response)
}

/// Current identity and CSRF token
#[utoipa::path(
    get,
    path = "/api/auth/me",
    responses(
        (status = 200, description = "Caller identity", body = MeResponse),
        (status = 401, description = "Not logged in", body = ApiMessage)
    ),
    security(("bearer_auth" = [])),
    tag = "Auth"
)]
pub async fn me(ctx: RequestContext) -> HttpResponse {
    let user = ctx.user;
    HttpResponse::Ok().json(MeResponse {
        success: true,
        user_id: user.user_id,
        username: user.username,
        role: user.role.to_string(),
        department_id: user.department_id,
        csrf_token: user.csrf_token,
    })
}

/// File a password reset request for an administrator to review
#[utoipa::path(
    post,
    path = "/auth/password-reset",
    request_body = PasswordResetReq,
    responses(
        (status = 200, description = "Request accepted", body = ApiMessage),
        (status = 400, description = "Missing username", body = ApiMessage)
    ),
    tag = "Auth"
)]
#[instrument(name = "password_reset_request", skip(pool, body), fields(username = %body.username))]
pub async fn request_password_reset(
    pool: web::Data<MySqlPool>,
    body: web::Json<PasswordResetReq>,
) -> Result<HttpResponse, AppError> {
    let username = body.username.trim();
    if username.is_empty() || username.len() > 100 {
        return Err(AppError::validation("Username is required"));
    }

    // Same answer whether or not the account exists
    let accepted = ApiMessage::ok("If the account exists, an administrator will review the request");

    let known = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM users WHERE username = ? AND is_active = 1",
    )
    .bind(username)
    .fetch_one(pool.get_ref())
    .await?;

    if known == 0 {
        debug!("Reset requested for unknown or inactive account");
        return Ok(HttpResponse::Ok().json(accepted));
    }

    let reason = body
        .reason
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty());

    // one open request per account
    let inserted = sqlx::query(
        r#"
        INSERT INTO password_reset_requests (username, reason, status, requested_at)
        SELECT ?, ?, 'PENDING', NOW()
        FROM DUAL
        WHERE NOT EXISTS (
            SELECT 1 FROM password_reset_requests WHERE username = ? AND status = 'PENDING'
        )
        "#,
    )
    .bind(username)
    .bind(reason)
    .bind(username)
    .execute(pool.get_ref())
    .await?;

    info!(created = inserted.rows_affected() > 0, "Password reset request recorded");
    Ok(HttpResponse::Ok().json(accepted))
}
