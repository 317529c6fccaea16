use crate::{
    auth::auth::RequestContext,
    error::{ApiMessage, AppError},
    model::notification::{Notification, NotificationType},
    utils::query_builder::{Clause, FilterField, FilterKind, ListSpec, SortDir, SortField, SortKind},
};
use actix_web::{HttpResponse, web};
use serde::Serialize;
use sqlx::MySqlConnection;
use std::collections::HashMap;
use tracing::debug;
use utoipa::ToSchema;

const LIST: ListSpec = ListSpec {
    filters: &[
        FilterField { param: "type", column: "notification_type", kind: FilterKind::Exact },
        FilterField { param: "is_read", column: "is_read", kind: FilterKind::Flag },
        FilterField { param: "from", column: "created_at", kind: FilterKind::From },
        FilterField { param: "to", column: "created_at", kind: FilterKind::To },
    ],
    sorts: &[
        SortField { param: "created_at", column: "created_at", kind: SortKind::Date },
        SortField { param: "type", column: "notification_type", kind: SortKind::Text },
    ],
    default_sort: SortField { param: "created_at", column: "created_at", kind: SortKind::Date },
    default_dir: SortDir::Desc,
};

#[derive(Serialize, ToSchema)]
pub struct NotificationListResponse {
    pub success: bool,
    pub data: Vec<Notification>,
    pub page: u32,
    pub per_page: u32,
    pub total: i64,
    pub unread: i64,
}

#[derive(Serialize, ToSchema)]
pub struct UnreadCountResponse {
    pub success: bool,
    #[schema(example = 3)]
    pub unread: i64,
}

/// Adds a notification for the user called `username`, if that user exists.
pub async fn notify_username(
    conn: &mut MySqlConnection,
    username: &str,
    kind: NotificationType,
    message: &str,
    related_id: Option<u64>,
) -> Result<(), sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO notifications (user_id, notification_type, message, is_read, related_id, created_at)
        SELECT id, ?, ?, 0, ?, NOW()
        FROM users
        WHERE username = ?
        "#,
    )
    .bind(kind.as_ref())
    .bind(message)
    .bind(related_id)
    .bind(username)
    .execute(conn)
    .await?;

    if result.rows_affected() == 0 {
        debug!(username, kind = %kind, "No user to notify");
    }
    Ok(())
}

/// Adds a notification for `user_id`.
pub async fn notify_user(
    conn: &mut MySqlConnection,
    user_id: u64,
    kind: NotificationType,
    message: &str,
    related_id: Option<u64>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO notifications (user_id, notification_type, message, is_read, related_id, created_at)
        VALUES (?, ?, ?, 0, ?, NOW())
        "#,
    )
    .bind(user_id)
    .bind(kind.as_ref())
    .bind(message)
    .bind(related_id)
    .execute(conn)
    .await?;
    Ok(())
}

async fn unread_for(ctx: &RequestContext) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM notifications WHERE user_id = ? AND is_read = 0",
    )
    .bind(ctx.user.user_id)
    .fetch_one(&ctx.pool)
    .await
}

/// Caller's notifications
#[utoipa::path(
    get,
    path = "/api/notifications",
    params(
        ("type" = Option<String>, Query, description = "Notification type tag"),
        ("is_read" = Option<bool>, Query, description = "Read flag"),
        ("from" = Option<String>, Query, description = "Created on or after"),
        ("to" = Option<String>, Query, description = "Created on or before"),
        ("sort" = Option<String>, Query, description = "created_at | type"),
        ("dir" = Option<String>, Query, description = "asc | desc"),
        ("page" = Option<u32>, Query, description = "Page number"),
        ("per_page" = Option<u32>, Query, description = "Items per page")
    ),
    responses(
        (status = 200, description = "Paginated notifications", body = NotificationListResponse),
        (status = 400, description = "Malformed filter", body = ApiMessage)
    ),
    security(("bearer_auth" = [])),
    tag = "Notifications"
)]
pub async fn list_notifications(
    ctx: RequestContext,
    query: web::Query<HashMap<String, String>>,
) -> Result<HttpResponse, AppError> {
    // notifications are personal for every role
    let plan = LIST.build(&query, vec![Clause::eq("user_id", ctx.user.user_id)])?;

    let count_sql = plan.filtered_sql("SELECT COUNT(*) FROM notifications");
    let total = sqlx::query_scalar_with::<_, i64, _>(&count_sql, plan.arguments())
        .fetch_one(&ctx.pool)
        .await?;

    let data_sql = plan.page_sql(
        "SELECT id, user_id, notification_type, message, is_read, related_id, created_at FROM notifications",
    );
    let data = sqlx::query_as_with::<_, Notification, _>(&data_sql, plan.page_arguments())
        .fetch_all(&ctx.pool)
        .await?;

    let unread = unread_for(&ctx).await?;

    Ok(HttpResponse::Ok().json(NotificationListResponse {
        success: true,
        data,
        page: plan.page,
        per_page: plan.per_page,
        total,
        unread,
    }))
}

/// Unread notification count
#[utoipa::path(
    get,
    path = "/api/notifications/unread-count",
    responses((status = 200, description = "Unread count", body = UnreadCountResponse)),
    security(("bearer_auth" = [])),
    tag = "Notifications"
)]
pub async fn unread_count(ctx: RequestContext) -> Result<HttpResponse, AppError> {
    let unread = unread_for(&ctx).await?;
    Ok(HttpResponse::Ok().json(UnreadCountResponse {
        success: true,
        unread,
    }))
}

/// Mark one notification read
#[utoipa::path(
    post,
    path = "/api/notifications/{notification_id}/read",
    params(("notification_id" = u64, Path, description = "Notification ID")),
    responses((status = 200, description = "Outcome", body = ApiMessage)),
    security(("bearer_auth" = [])),
    tag = "Notifications"
)]
pub async fn mark_read(
    ctx: RequestContext,
    path: web::Path<u64>,
) -> Result<HttpResponse, AppError> {
    let notification_id = path.into_inner();

    let result = sqlx::query("UPDATE notifications SET is_read = 1 WHERE id = ? AND user_id = ?")
        .bind(notification_id)
        .bind(ctx.user.user_id)
        .execute(&ctx.pool)
        .await?;

    if result.rows_affected() == 0 {
        // either not ours, missing, or already read
        let exists = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM notifications WHERE id = ? AND user_id = ?",
        )
        .bind(notification_id)
        .bind(ctx.user.user_id)
        .fetch_one(&ctx.pool)
        .await?;

        if exists == 0 {
            return Ok(HttpResponse::Ok().json(ApiMessage::failure("Notification not found")));
        }
    }

    Ok(HttpResponse::Ok().json(ApiMessage::ok("Notification marked as read")))
}

/// Mark every notification read
#[utoipa::path(
    post,
    path = "/api/notifications/read-all",
    responses((status = 200, description = "Outcome", body = ApiMessage)),
    security(("bearer_auth" = [])),
    tag = "Notifications"
)]
pub async fn mark_all_read(ctx: RequestContext) -> Result<HttpResponse, AppError> {
    let result =
        sqlx::query("UPDATE notifications SET is_read = 1 WHERE user_id = ? AND is_read = 0")
            .bind(ctx.user.user_id)
            .execute(&ctx.pool)
            .await?;

    Ok(HttpResponse::Ok().json(ApiMessage::ok(format!(
        "{} notification(s) marked as read",
        result.rows_affected()
    ))))
}

/// Delete one notification
#[utoipa::path(
    post,
    path = "/api/notifications/{notification_id}/delete",
    params(("notification_id" = u64, Path, description = "Notification ID")),
    responses((status = 200, description = "Outcome", body = ApiMessage)),
    security(("bearer_auth" = [])),
    tag = "Notifications"
)]
pub async fn delete_notification(
    ctx: RequestContext,
    path: web::Path<u64>,
) -> Result<HttpResponse, AppError> {
    let notification_id = path.into_inner();

    let result = sqlx::query("DELETE FROM notifications WHERE id = ? AND user_id = ?")
        .bind(notification_id)
        .bind(ctx.user.user_id)
        .execute(&ctx.pool)
        .await?;

    if result.rows_affected() == 0 {
        return Ok(HttpResponse::Ok().json(ApiMessage::failure("Notification not found")));
    }

    Ok(HttpResponse::Ok().json(ApiMessage::ok("Notification deleted")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn other_users_cannot_be_requested() {
        let params: HashMap<String, String> =
            [("user_id".to_string(), "1".to_string()), ("is_read".to_string(), "0".to_string())]
                .into_iter()
                .collect();
        let plan = LIST.build(&params, vec![Clause::eq("user_id", 42u64)]).unwrap();

        // user_id is not an allow-listed filter, only the scope binds it
        assert_eq!(plan.where_sql(), " WHERE user_id = ? AND is_read = ?");
    }
}
