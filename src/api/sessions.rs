use crate::{
    auth::{auth::RequestContext, session::SessionStore},
    error::{ApiMessage, AppError},
    model::session::SessionRecord,
    utils::{
        collate::dedup_then_sort,
        query_builder::{FilterField, FilterKind, ListSpec, SortDir, SortField, SortKind},
    },
};
use actix_web::{HttpResponse, web};
use serde::Serialize;
use std::collections::HashMap;
use tracing::info;
use utoipa::ToSchema;

const LIST: ListSpec = ListSpec {
    filters: &[
        FilterField { param: "username", column: "username", kind: FilterKind::Exact },
        FilterField { param: "user_id", column: "user_id", kind: FilterKind::Id },
        FilterField { param: "is_active", column: "is_active", kind: FilterKind::Flag },
        FilterField { param: "ip_address", column: "ip_address", kind: FilterKind::Exact },
        FilterField { param: "device", column: "device", kind: FilterKind::Contains },
        FilterField { param: "from", column: "login_time", kind: FilterKind::From },
        FilterField { param: "to", column: "login_time", kind: FilterKind::To },
    ],
    sorts: &[
        SortField { param: "username", column: "username", kind: SortKind::Text },
        SortField { param: "login_time", column: "login_time", kind: SortKind::Date },
        SortField { param: "logout_time", column: "logout_time", kind: SortKind::Date },
        SortField { param: "duration", column: "duration_seconds", kind: SortKind::Plain },
    ],
    default_sort: SortField { param: "login_time", column: "login_time", kind: SortKind::Date },
    default_dir: SortDir::Desc,
};

const SELECT_SESSION: &str = r#"
    SELECT id, user_id, username, login_time, logout_time, duration_seconds,
           ip_address, device, is_active
    FROM user_sessions"#;

#[derive(Serialize, ToSchema)]
pub struct SessionListResponse {
    pub success: bool,
    pub data: Vec<SessionRecord>,
    pub page: u32,
    pub per_page: u32,
    pub total: i64,
}

#[derive(Serialize, ToSchema)]
pub struct ActiveSessionsResponse {
    pub success: bool,
    /// Latest open session per user, by username
    pub data: Vec<SessionRecord>,
}

/// Session history (admin)
#[utoipa::path(
    get,
    path = "/api/sessions",
    params(
        ("username" = Option<String>, Query, description = "Exact username"),
        ("user_id" = Option<u64>, Query, description = "User ID"),
        ("is_active" = Option<bool>, Query, description = "Open sessions only"),
        ("ip_address" = Option<String>, Query, description = "Exact IP"),
        ("device" = Option<String>, Query, description = "User agent contains"),
        ("from" = Option<String>, Query, description = "Logged in on or after"),
        ("to" = Option<String>, Query, description = "Logged in on or before"),
        ("sort" = Option<String>, Query, description = "username | login_time | logout_time | duration"),
        ("dir" = Option<String>, Query, description = "asc | desc"),
        ("page" = Option<u32>, Query, description = "Page number"),
        ("per_page" = Option<u32>, Query, description = "Items per page")
    ),
    responses(
        (status = 200, description = "Paginated sessions", body = SessionListResponse),
        (status = 403, description = "Admin only", body = ApiMessage)
    ),
    security(("bearer_auth" = [])),
    tag = "Sessions"
)]
pub async fn list_sessions(
    ctx: RequestContext,
    query: web::Query<HashMap<String, String>>,
) -> Result<HttpResponse, AppError> {
    ctx.user.require_admin()?;

    let plan = LIST.build(&query, vec![])?;

    let count_sql = plan.filtered_sql("SELECT COUNT(*) FROM user_sessions");
    let total = sqlx::query_scalar_with::<_, i64, _>(&count_sql, plan.arguments())
        .fetch_one(&ctx.pool)
        .await?;

    let data_sql = plan.page_sql(SELECT_SESSION);
    let data = sqlx::query_as_with::<_, SessionRecord, _>(&data_sql, plan.page_arguments())
        .fetch_all(&ctx.pool)
        .await?;

    Ok(HttpResponse::Ok().json(SessionListResponse {
        success: true,
        data,
        page: plan.page,
        per_page: plan.per_page,
        total,
    }))
}

/// Newest first in, one row per user out, ordered by username.
fn latest_per_user(rows: Vec<SessionRecord>) -> Vec<SessionRecord> {
    dedup_then_sort(
        rows,
        |s| s.user_id,
        |a, b| a.username.to_lowercase().cmp(&b.username.to_lowercase()),
    )
}

/// Who is logged in right now (admin)
#[utoipa::path(
    get,
    path = "/api/sessions/active",
    responses(
        (status = 200, description = "One open session per user", body = ActiveSessionsResponse),
        (status = 403, description = "Admin only", body = ApiMessage)
    ),
    security(("bearer_auth" = [])),
    tag = "Sessions"
)]
pub async fn active_sessions(ctx: RequestContext) -> Result<HttpResponse, AppError> {
    ctx.user.require_admin()?;

    let rows = sqlx::query_as::<_, SessionRecord>(&format!(
        "{SELECT_SESSION} WHERE is_active = 1 ORDER BY login_time DESC, id DESC"
    ))
    .fetch_all(&ctx.pool)
    .await?;

    Ok(HttpResponse::Ok().json(ActiveSessionsResponse {
        success: true,
        data: latest_per_user(rows),
    }))
}

/// Deactivate an account and close its open sessions (admin)
#[utoipa::path(
    post,
    path = "/api/users/{user_id}/deactivate",
    params(("user_id" = u64, Path, description = "User ID")),
    responses(
        (status = 200, description = "Deactivated, or success=false when unknown or already inactive", body = ApiMessage),
        (status = 400, description = "Cannot deactivate yourself", body = ApiMessage),
        (status = 403, description = "Admin only", body = ApiMessage)
    ),
    security(("bearer_auth" = [])),
    tag = "Sessions"
)]
pub async fn deactivate_user(
    ctx: RequestContext,
    path: web::Path<u64>,
    store: web::Data<SessionStore>,
) -> Result<HttpResponse, AppError> {
    ctx.user.require_admin()?;
    let user_id = path.into_inner();

    if user_id == ctx.user.user_id {
        return Err(AppError::validation("You cannot deactivate your own account"));
    }

    let mut tx = ctx.pool.begin().await?;

    let result = sqlx::query("UPDATE users SET is_active = 0 WHERE id = ? AND is_active = 1")
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

    if result.rows_affected() == 0 {
        return Ok(HttpResponse::Ok().json(ApiMessage::failure(
            "User not found or already inactive",
        )));
    }

    let closed = SessionStore::close_all_for_user(&mut tx, user_id).await?;
    tx.commit().await?;

    // evict only once committed
    store.evict(&closed).await;

    info!(user_id, sessions_closed = closed.len(), by = %ctx.user.username, "User deactivated");
    Ok(HttpResponse::Ok().json(ApiMessage::ok(format!(
        "User deactivated, {} session(s) closed",
        closed.len()
    ))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::datetime;

    fn session(id: &str, user_id: u64, username: &str, login: &str) -> SessionRecord {
        SessionRecord {
            id: id.into(),
            user_id,
            username: username.into(),
            login_time: datetime::parse(login).unwrap(),
            logout_time: None,
            duration_seconds: None,
            ip_address: None,
            device: None,
            is_active: true,
        }
    }

    #[test]
    fn active_view_keeps_newest_session_per_user() {
        let rows = vec![
            session("s4", 2, "bob", "2024-01-04 09:00:00"),
            session("s3", 1, "Alice", "2024-01-03 09:00:00"),
            session("s2", 2, "bob", "2024-01-02 09:00:00"),
            session("s1", 1, "Alice", "2024-01-01 09:00:00"),
        ];
        let out = latest_per_user(rows);
        let ids: Vec<_> = out.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["s3", "s4"]);
    }

    #[test]
    fn duration_sort_is_plain() {
        let params: HashMap<String, String> = [
            ("sort".to_string(), "duration".to_string()),
            ("dir".to_string(), "desc".to_string()),
        ]
        .into_iter()
        .collect();
        let plan = LIST.build(&params, vec![]).unwrap();
        assert_eq!(plan.order_sql(), " ORDER BY duration_seconds DESC, id DESC");
    }
}
