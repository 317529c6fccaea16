use crate::{
    api::notifications::notify_username,
    auth::{
        auth::RequestContext,
        password::{hash_password, weakness},
        session::SessionStore,
    },
    error::{ApiMessage, AppError},
    model::{
        notification::NotificationType,
        password_reset::{PasswordResetRequest, ResetStatus},
    },
    utils::query_builder::{FilterField, FilterKind, ListSpec, SortDir, SortField, SortKind},
};
use actix_web::{HttpResponse, web};
use serde::{Deserialize, Serialize};
use sqlx::MySqlConnection;
use std::collections::HashMap;
use tracing::{error, info};
use utoipa::ToSchema;

const LIST: ListSpec = ListSpec {
    filters: &[
        FilterField { param: "username", column: "username", kind: FilterKind::Exact },
        FilterField { param: "status", column: "status", kind: FilterKind::Exact },
        FilterField { param: "from", column: "requested_at", kind: FilterKind::From },
        FilterField { param: "to", column: "requested_at", kind: FilterKind::To },
    ],
    sorts: &[
        SortField { param: "username", column: "username", kind: SortKind::Text },
        SortField { param: "status", column: "status", kind: SortKind::Text },
        SortField { param: "requested_at", column: "requested_at", kind: SortKind::Date },
    ],
    default_sort: SortField { param: "requested_at", column: "requested_at", kind: SortKind::Date },
    default_dir: SortDir::Desc,
};

#[derive(Serialize, ToSchema)]
pub struct ResetListResponse {
    pub success: bool,
    pub data: Vec<PasswordResetRequest>,
    pub page: u32,
    pub per_page: u32,
    pub total: i64,
}

#[derive(Deserialize, ToSchema)]
pub struct ApproveReset {
    /// Password the account gets once approved
    #[schema(example = "correct-horse-battery")]
    pub new_password: String,
}

/// Moves a PENDING request to `status`. Returns the account name, or None
/// when the request is missing or was already decided.
async fn settle(
    conn: &mut MySqlConnection,
    request_id: u64,
    status: ResetStatus,
    admin: &str,
) -> Result<Option<String>, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE password_reset_requests
        SET status = ?, processed_by = ?, processed_at = NOW()
        WHERE id = ?
        AND status = 'PENDING'
        "#,
    )
    .bind(status.as_ref())
    .bind(admin)
    .bind(request_id)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Ok(None);
    }

    sqlx::query_scalar::<_, String>("SELECT username FROM password_reset_requests WHERE id = ?")
        .bind(request_id)
        .fetch_optional(&mut *conn)
        .await
}

/// Password reset requests (admin)
#[utoipa::path(
    get,
    path = "/api/password-resets",
    params(
        ("username" = Option<String>, Query, description = "Exact username"),
        ("status" = Option<String>, Query, description = "PENDING | Approved | Rejected"),
        ("from" = Option<String>, Query, description = "Requested on or after"),
        ("to" = Option<String>, Query, description = "Requested on or before"),
        ("sort" = Option<String>, Query, description = "username | status | requested_at"),
        ("dir" = Option<String>, Query, description = "asc | desc"),
        ("page" = Option<u32>, Query, description = "Page number"),
        ("per_page" = Option<u32>, Query, description = "Items per page")
    ),
    responses(
        (status = 200, description = "Paginated requests", body = ResetListResponse),
        (status = 403, description = "Admin only", body = ApiMessage)
    ),
    security(("bearer_auth" = [])),
    tag = "Password reset"
)]
pub async fn list_resets(
    ctx: RequestContext,
    query: web::Query<HashMap<String, String>>,
) -> Result<HttpResponse, AppError> {
    ctx.user.require_admin()?;

    let plan = LIST.build(&query, vec![])?;

    let count_sql = plan.filtered_sql("SELECT COUNT(*) FROM password_reset_requests");
    let total = sqlx::query_scalar_with::<_, i64, _>(&count_sql, plan.arguments())
        .fetch_one(&ctx.pool)
        .await?;

    let data_sql = plan.page_sql(
        "SELECT id, username, reason, status, requested_at, processed_by, processed_at FROM password_reset_requests",
    );
    let data = sqlx::query_as_with::<_, PasswordResetRequest, _>(&data_sql, plan.page_arguments())
        .fetch_all(&ctx.pool)
        .await?;

    Ok(HttpResponse::Ok().json(ResetListResponse {
        success: true,
        data,
        page: plan.page,
        per_page: plan.per_page,
        total,
    }))
}

/// Approve a reset: set the new password and end the account's sessions
#[utoipa::path(
    post,
    path = "/api/password-resets/{request_id}/approve",
    params(("request_id" = u64, Path, description = "Reset request ID")),
    request_body = ApproveReset,
    responses(
        (status = 200, description = "Approved, or success=false when already processed", body = ApiMessage),
        (status = 400, description = "Weak password", body = ApiMessage),
        (status = 403, description = "Admin only", body = ApiMessage)
    ),
    security(("bearer_auth" = [])),
    tag = "Password reset"
)]
pub async fn approve_reset(
    ctx: RequestContext,
    path: web::Path<u64>,
    body: web::Json<ApproveReset>,
    store: web::Data<SessionStore>,
) -> Result<HttpResponse, AppError> {
    ctx.user.require_admin()?;
    let request_id = path.into_inner();

    if let Some(reason) = weakness(&body.new_password) {
        return Err(AppError::validation(reason));
    }

    let hashed = hash_password(&body.new_password).map_err(|e| {
        error!(error = %e, "Failed to hash password");
        AppError::Internal("Could not set password".to_string())
    })?;

    let mut tx = ctx.pool.begin().await?;

    let Some(username) = settle(&mut tx, request_id, ResetStatus::Approved, &ctx.user.username).await? else {
        return Ok(HttpResponse::Ok().json(ApiMessage::failure(
            "Reset request not found or already processed",
        )));
    };

    let user_id = sqlx::query_scalar::<_, u64>("SELECT id FROM users WHERE username = ? FOR UPDATE")
        .bind(&username)
        .fetch_optional(&mut *tx)
        .await?;

    let Some(user_id) = user_id else {
        // account vanished since the request; keep the request open
        info!(request_id, %username, "Reset approval for unknown account");
        return Ok(HttpResponse::Ok().json(ApiMessage::failure("Account no longer exists")));
    };

    sqlx::query("UPDATE users SET password = ? WHERE id = ?")
        .bind(&hashed)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

    let closed = SessionStore::close_all_for_user(&mut tx, user_id).await?;

    notify_username(
        &mut tx,
        &username,
        NotificationType::PasswordReset,
        "Your password reset request was approved",
        Some(request_id),
    )
    .await?;

    tx.commit().await?;
    store.evict(&closed).await;

    info!(request_id, %username, sessions_closed = closed.len(), by = %ctx.user.username, "Password reset approved");
    Ok(HttpResponse::Ok().json(ApiMessage::ok("Password reset approved")))
}

/// Reject a reset request
#[utoipa::path(
    post,
    path = "/api/password-resets/{request_id}/reject",
    params(("request_id" = u64, Path, description = "Reset request ID")),
    responses(
        (status = 200, description = "Rejected, or success=false when already processed", body = ApiMessage),
        (status = 403, description = "Admin only", body = ApiMessage)
    ),
    security(("bearer_auth" = [])),
    tag = "Password reset"
)]
pub async fn reject_reset(
    ctx: RequestContext,
    path: web::Path<u64>,
) -> Result<HttpResponse, AppError> {
    ctx.user.require_admin()?;
    let request_id = path.into_inner();

    let mut tx = ctx.pool.begin().await?;

    let Some(username) = settle(&mut tx, request_id, ResetStatus::Rejected, &ctx.user.username).await? else {
        return Ok(HttpResponse::Ok().json(ApiMessage::failure(
            "Reset request not found or already processed",
        )));
    };

    notify_username(
        &mut tx,
        &username,
        NotificationType::PasswordReset,
        "Your password reset request was rejected",
        Some(request_id),
    )
    .await?;

    tx.commit().await?;

    info!(request_id, %username, by = %ctx.user.username, "Password reset rejected");
    Ok(HttpResponse::Ok().json(ApiMessage::ok("Password reset rejected")))
}
