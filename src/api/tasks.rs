use crate::{
    api::notifications::notify_user,
    auth::auth::{AuthUser, RequestContext},
    error::{ApiMessage, AppError},
    model::{
        datetime,
        notification::NotificationType,
        role::Role,
        task::{Task, TaskStatus},
    },
    utils::query_builder::{
        Clause, FilterField, FilterKind, ListQuery, ListSpec, Predicate, SortDir, SortField,
        SortKind, SqlValue,
    },
};
use actix_web::{HttpResponse, web};
use chrono::{NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::info;
use utoipa::ToSchema;

const LIST: ListSpec = ListSpec {
    filters: &[
        FilterField { param: "task_code", column: "task_code", kind: FilterKind::Exact },
        FilterField { param: "doer_name", column: "doer_name", kind: FilterKind::Exact },
        FilterField { param: "status", column: "status", kind: FilterKind::Exact },
        FilterField { param: "department_id", column: "department_id", kind: FilterKind::Id },
        FilterField { param: "delayed", column: "delay_flag", kind: FilterKind::Flag },
        FilterField { param: "search", column: "description", kind: FilterKind::Contains },
        FilterField { param: "from", column: "planned_date", kind: FilterKind::From },
        FilterField { param: "to", column: "planned_date", kind: FilterKind::To },
    ],
    sorts: &[
        SortField { param: "task_code", column: "task_code", kind: SortKind::Serial },
        SortField { param: "doer_name", column: "doer_name", kind: SortKind::Text },
        SortField { param: "status", column: "status", kind: SortKind::Text },
        SortField { param: "planned_date", column: "planned_date", kind: SortKind::Date },
        SortField { param: "created_at", column: "created_at", kind: SortKind::Date },
    ],
    default_sort: SortField { param: "planned_date", column: "planned_date", kind: SortKind::Date },
    default_dir: SortDir::Asc,
};

const SELECT_TASK: &str = r#"
    SELECT id, task_code, doer_id, doer_name, department_id, description,
           planned_date, actual_date, status, delay_flag, delay_seconds, created_at
    FROM tasks"#;

/// Admins see every task, managers their department plus their own, doers
/// and clients only tasks delegated to them.
pub fn visibility(user: &AuthUser) -> Vec<Clause> {
    match (user.role, user.department_id) {
        (Role::Admin, _) => vec![],
        (Role::Manager, Some(dept)) => vec![Clause::AnyOf(vec![
            Predicate::eq("department_id", dept),
            Predicate::eq("doer_id", user.user_id),
        ])],
        _ => vec![Clause::eq("doer_id", user.user_id)],
    }
}

/// `status IN ('pending', 'shifted')` as a conjunct.
pub fn open_status() -> Clause {
    Clause::AnyOf(
        TaskStatus::OPEN
            .iter()
            .map(|s| Predicate::eq("status", s.as_ref()))
            .collect(),
    )
}

#[derive(Serialize, ToSchema)]
pub struct TaskListResponse {
    pub success: bool,
    pub data: Vec<Task>,
    #[schema(example = 1)]
    pub page: u32,
    #[schema(example = 20)]
    pub per_page: u32,
    pub total: i64,
}

#[derive(Deserialize, ToSchema)]
pub struct StatusUpdate {
    #[schema(example = "completed")]
    pub status: TaskStatus,
    /// New deadline, required when shifting
    #[schema(example = "2024-01-09 17:00:00")]
    pub planned_date: Option<String>,
}

/// Task list
#[utoipa::path(
    get,
    path = "/api/tasks",
    params(
        ("task_code" = Option<String>, Query, description = "Exact task code"),
        ("doer_name" = Option<String>, Query, description = "Exact doer name"),
        ("status" = Option<String>, Query, description = "pending | shifted | completed"),
        ("department_id" = Option<u64>, Query, description = "Department"),
        ("delayed" = Option<bool>, Query, description = "Completed late"),
        ("search" = Option<String>, Query, description = "Description contains"),
        ("from" = Option<String>, Query, description = "Planned on or after"),
        ("to" = Option<String>, Query, description = "Planned on or before"),
        ("sort" = Option<String>, Query, description = "task_code | doer_name | status | planned_date | created_at"),
        ("dir" = Option<String>, Query, description = "asc | desc"),
        ("page" = Option<u32>, Query, description = "Page number"),
        ("per_page" = Option<u32>, Query, description = "Items per page")
    ),
    responses(
        (status = 200, description = "Paginated tasks", body = TaskListResponse),
        (status = 400, description = "Malformed filter", body = ApiMessage),
        (status = 401, description = "Unauthorized", body = ApiMessage)
    ),
    security(("bearer_auth" = [])),
    tag = "Tasks"
)]
pub async fn list_tasks(
    ctx: RequestContext,
    query: web::Query<HashMap<String, String>>,
) -> Result<HttpResponse, AppError> {
    let plan = LIST.build(&query, visibility(&ctx.user))?;

    let count_sql = plan.filtered_sql("SELECT COUNT(*) FROM tasks");
    let total = sqlx::query_scalar_with::<_, i64, _>(&count_sql, plan.arguments())
        .fetch_one(&ctx.pool)
        .await?;

    let data_sql = plan.page_sql(SELECT_TASK);
    let data = sqlx::query_as_with::<_, Task, _>(&data_sql, plan.page_arguments())
        .fetch_all(&ctx.pool)
        .await?;

    Ok(HttpResponse::Ok().json(TaskListResponse {
        success: true,
        data,
        page: plan.page,
        per_page: plan.per_page,
        total,
    }))
}

/// SET list and its leading bind values for a status change.
fn status_change(
    update: &StatusUpdate,
    now: NaiveDateTime,
) -> Result<(&'static str, Vec<SqlValue>), AppError> {
    match update.status {
        TaskStatus::Completed => Ok((
            r#"status = 'completed', actual_date = ?,
               delay_flag = (planned_date IS NOT NULL AND planned_date < ?),
               delay_seconds = CASE WHEN planned_date IS NOT NULL AND planned_date < ?
                                    THEN TIMESTAMPDIFF(SECOND, planned_date, ?) ELSE 0 END"#,
            vec![now.into(), now.into(), now.into(), now.into()],
        )),
        TaskStatus::Shifted => {
            let planned = update
                .planned_date
                .as_deref()
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .ok_or_else(|| AppError::validation("planned_date is required to shift a task"))?;
            let planned = datetime::parse(planned)
                .ok_or_else(|| AppError::validation("planned_date must be YYYY-MM-DD HH:MM:SS"))?;
            if planned <= now {
                return Err(AppError::validation("planned_date must be in the future"));
            }
            Ok(("status = 'shifted', planned_date = ?", vec![planned.into()]))
        }
        TaskStatus::Pending => Err(AppError::validation("Status must be completed or shifted")),
    }
}

/// Complete or shift an open task
#[utoipa::path(
    post,
    path = "/api/tasks/{task_id}/status",
    params(("task_id" = u64, Path, description = "Task ID")),
    request_body = StatusUpdate,
    responses(
        (status = 200, description = "Updated, or success=false when not open or not visible", body = ApiMessage),
        (status = 400, description = "Invalid status change", body = ApiMessage),
        (status = 401, description = "Unauthorized", body = ApiMessage)
    ),
    security(("bearer_auth" = [])),
    tag = "Tasks"
)]
pub async fn update_task_status(
    ctx: RequestContext,
    path: web::Path<u64>,
    body: web::Json<StatusUpdate>,
) -> Result<HttpResponse, AppError> {
    let task_id = path.into_inner();
    let (set_sql, leading) = status_change(&body, Utc::now().naive_utc())?;

    let guard = ListQuery::scoped(visibility(&ctx.user)).and([Clause::eq("id", task_id), open_status()]);
    let sql = format!("UPDATE tasks SET {set_sql}{}", guard.where_sql());

    let mut tx = ctx.pool.begin().await?;

    let result = sqlx::query_with(&sql, guard.arguments_after(&leading))
        .execute(&mut *tx)
        .await?;

    if result.rows_affected() == 0 {
        info!(task_id, status = %body.status, "Task not open or not visible");
        return Ok(HttpResponse::Ok().json(ApiMessage::failure(
            "Task not found or already completed",
        )));
    }

    let (doer_id, task_code) =
        sqlx::query_as::<_, (u64, String)>("SELECT doer_id, task_code FROM tasks WHERE id = ?")
            .bind(task_id)
            .fetch_one(&mut *tx)
            .await?;

    // a manager acting on someone else's task tells the doer
    if doer_id != ctx.user.user_id {
        notify_user(
            &mut tx,
            doer_id,
            NotificationType::TaskUpdate,
            &format!("Task {task_code} was marked {} by {}", body.status, ctx.user.username),
            Some(task_id),
        )
        .await?;
    }

    tx.commit().await?;

    info!(task_id, status = %body.status, by = %ctx.user.username, "Task status updated");
    Ok(HttpResponse::Ok().json(ApiMessage::ok(format!("Task {}", body.status))))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(role: Role, department_id: Option<u64>) -> AuthUser {
        AuthUser {
            user_id: 7,
            username: "alice".into(),
            role,
            department_id,
            session_id: "s".into(),
            csrf_token: "c".into(),
        }
    }

    fn now() -> NaiveDateTime {
        datetime::parse("2024-01-05 12:00:00").unwrap()
    }

    #[test]
    fn visibility_by_role() {
        assert!(visibility(&user(Role::Admin, Some(1))).is_empty());
        assert_eq!(
            visibility(&user(Role::Doer, Some(1))),
            vec![Clause::eq("doer_id", 7u64)]
        );
        assert_eq!(
            visibility(&user(Role::Manager, Some(3))),
            vec![Clause::AnyOf(vec![
                Predicate::eq("department_id", 3u64),
                Predicate::eq("doer_id", 7u64),
            ])]
        );
        // no department: only own tasks
        assert_eq!(
            visibility(&user(Role::Manager, None)),
            vec![Clause::eq("doer_id", 7u64)]
        );
    }

    #[test]
    fn update_guard_keeps_scope_and_open_status() {
        let guard = ListQuery::scoped(visibility(&user(Role::Client, None)))
            .and([Clause::eq("id", 9u64), open_status()]);
        assert_eq!(
            guard.where_sql(),
            " WHERE doer_id = ? AND id = ? AND (status = ? OR status = ?)"
        );
    }

    #[test]
    fn shifting_needs_a_future_deadline() {
        let missing = StatusUpdate { status: TaskStatus::Shifted, planned_date: None };
        assert!(matches!(status_change(&missing, now()), Err(AppError::Validation(_))));

        let past = StatusUpdate {
            status: TaskStatus::Shifted,
            planned_date: Some("2024-01-01 09:00:00".into()),
        };
        assert!(matches!(status_change(&past, now()), Err(AppError::Validation(_))));

        let ok = StatusUpdate {
            status: TaskStatus::Shifted,
            planned_date: Some("2024-01-09 17:00:00".into()),
        };
        let (sql, values) = status_change(&ok, now()).unwrap();
        assert_eq!(sql.matches('?').count(), values.len());
    }

    #[test]
    fn completing_binds_every_placeholder() {
        let done = StatusUpdate { status: TaskStatus::Completed, planned_date: None };
        let (sql, values) = status_change(&done, now()).unwrap();
        assert_eq!(sql.matches('?').count(), values.len());
    }

    #[test]
    fn back_to_pending_is_rejected() {
        let pending = StatusUpdate { status: TaskStatus::Pending, planned_date: None };
        assert!(status_change(&pending, now()).is_err());
    }
}
