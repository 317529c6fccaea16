use crate::{
    api::notifications::notify_username,
    auth::auth::{AuthUser, RequestContext},
    config::Config,
    error::{ApiMessage, AppError},
    model::{
        datetime,
        leave_request::{LeaveRequest, LeaveStatus, UNPROCESSED_GUARD},
        notification::NotificationType,
        role::Role,
    },
    sheets::{SheetSync, sync_or_warn},
    utils::query_builder::{
        Clause, FilterField, FilterKind, ListQuery, ListSpec, Op, Predicate, SortDir, SortField,
        SortKind, SqlValue,
    },
};
use actix_web::{HttpResponse, web};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::{MySqlConnection, MySqlPool};
use std::collections::HashMap;
use std::future::Future;
use strum_macros::{AsRefStr, Display};
use tracing::{error, info};
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema, AsRefStr, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LeaveType {
    Annual,
    Sick,
    Casual,
    Unpaid,
}

#[derive(Deserialize, ToSchema)]
pub struct CreateLeave {
    #[schema(example = "2026-01-01", format = "date", value_type = String)]
    pub start_date: NaiveDate,
    #[schema(example = "2026-01-03", format = "date", value_type = String)]
    pub end_date: NaiveDate,
    #[schema(example = "sick")]
    pub leave_type: LeaveType, // enum ensures Swagger dropdown
    pub reason: Option<String>,
    /// Manager who decides on the request
    #[schema(example = "carol")]
    pub manager_name: String,
}

#[derive(Deserialize, ToSchema, Default)]
pub struct DecisionNote {
    #[schema(example = "Enjoy the break")]
    pub note: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub struct LeaveListResponse {
    pub success: bool,
    pub data: Vec<LeaveRequest>,
    #[schema(example = 1)]
    pub page: u32,
    #[schema(example = 20)]
    pub per_page: u32,
    #[schema(example = 1)]
    pub total: i64,
}

const LIST: ListSpec = ListSpec {
    filters: &[
        FilterField { param: "employee_name", column: "employee_name", kind: FilterKind::Exact },
        FilterField { param: "manager_name", column: "manager_name", kind: FilterKind::Exact },
        FilterField { param: "leave_type", column: "leave_type", kind: FilterKind::Exact },
        FilterField { param: "status", column: "status", kind: FilterKind::Exact },
        FilterField { param: "from", column: "start_date", kind: FilterKind::From },
        FilterField { param: "to", column: "end_date", kind: FilterKind::To },
    ],
    sorts: &[
        SortField { param: "employee_name", column: "employee_name", kind: SortKind::Text },
        SortField { param: "leave_type", column: "leave_type", kind: SortKind::Text },
        SortField { param: "status", column: "status", kind: SortKind::Text },
        SortField { param: "start_date", column: "start_date", kind: SortKind::Date },
        SortField { param: "created_at", column: "created_at", kind: SortKind::Date },
    ],
    default_sort: SortField { param: "created_at", column: "created_at", kind: SortKind::Date },
    default_dir: SortDir::Desc,
};

const SELECT_LEAVE: &str = r#"
    SELECT id, employee_name, leave_type, start_date, end_date, reason, status,
           manager_name, manager_email, processed_by, processed_at, created_at
    FROM leave_requests"#;

/// Rows the caller may see: admins everything, managers their own requests
/// and the ones they decide on, everyone else only their own.
pub fn visibility(user: &AuthUser) -> Vec<Clause> {
    let me = user.username.as_str();
    match user.role {
        Role::Admin => vec![],
        Role::Manager => vec![Clause::AnyOf(vec![
            Predicate::eq("employee_name", me),
            Predicate::eq("manager_name", me),
        ])],
        Role::Doer | Role::Client => vec![Clause::eq("employee_name", me)],
    }
}

async fn log_action(
    conn: &mut MySqlConnection,
    leave_id: u64,
    action: LeaveStatus,
    acted_by: &str,
    note: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO leave_request_actions (leave_request_id, action, acted_by, acted_at, note)
        VALUES (?, ?, ?, NOW(), ?)
        "#,
    )
    .bind(leave_id)
    .bind(action.as_ref())
    .bind(acted_by)
    .bind(note)
    .execute(conn)
    .await?;
    Ok(())
}

fn sheet_row(leave: &LeaveRequest) -> Vec<String> {
    vec![
        leave.id.to_string(),
        leave.employee_name.clone(),
        leave.leave_type.clone(),
        leave.start_date.to_string(),
        leave.end_date.to_string(),
        LeaveStatus::from_stored(leave.status.as_deref())
            .map(|s| s.to_string())
            .unwrap_or_else(|| leave.status.clone().unwrap_or_default()),
        leave.processed_by.clone().unwrap_or_default(),
        leave
            .processed_at
            .as_ref()
            .map(datetime::format)
            .unwrap_or_default(),
    ]
}

/// The deciding manager named on a new request; never the requester.
fn approver_name<'a>(payload: &'a CreateLeave, user: &AuthUser) -> Result<&'a str, AppError> {
    let manager_name = payload.manager_name.trim();
    if manager_name.is_empty() {
        return Err(AppError::validation("manager_name is required"));
    }
    if manager_name == user.username {
        return Err(AppError::validation("manager_name cannot be yourself"));
    }
    Ok(manager_name)
}

/* =========================
Create leave request
========================= */
#[utoipa::path(
    post,
    path = "/api/leave",
    request_body = CreateLeave,
    responses(
        (status = 200, description = "Leave request submitted", body = ApiMessage),
        (status = 400, description = "Bad request", body = ApiMessage),
        (status = 401, description = "Unauthorized", body = ApiMessage)
    ),
    security(("bearer_auth" = [])),
    tag = "Leave"
)]
pub async fn create_leave(
    ctx: RequestContext,
    payload: web::Json<CreateLeave>,
) -> Result<HttpResponse, AppError> {
    if payload.start_date > payload.end_date {
        return Err(AppError::validation("start_date cannot be after end_date"));
    }

    let manager_name = approver_name(&payload, &ctx.user)?;

    let manager_email = sqlx::query_scalar::<_, Option<String>>(
        r#"
        SELECT email
        FROM users
        WHERE username = ?
        AND role IN ('manager', 'admin')
        AND is_active = 1
        "#,
    )
    .bind(manager_name)
    .fetch_optional(&ctx.pool)
    .await?
    .ok_or_else(|| AppError::validation("manager_name is not an active manager"))?;

    let reason = payload
        .reason
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty());

    let result = sqlx::query(
        r#"
        INSERT INTO leave_requests
            (employee_name, leave_type, start_date, end_date, reason, status, manager_name, manager_email, created_at)
        VALUES (?, ?, ?, ?, ?, 'PENDING', ?, ?, NOW())
        "#,
    )
    .bind(&ctx.user.username)
    .bind(payload.leave_type.as_ref())
    .bind(payload.start_date)
    .bind(payload.end_date)
    .bind(reason)
    .bind(manager_name)
    .bind(manager_email)
    .execute(&ctx.pool)
    .await?;

    info!(
        leave_id = result.last_insert_id(),
        employee = %ctx.user.username,
        "Leave request submitted"
    );

    Ok(HttpResponse::Ok().json(ApiMessage::ok("Leave request submitted")))
}

/* =========================
Approve / reject (Manager/Admin)
========================= */

/// Conditions a decision UPDATE must meet besides the unprocessed guard.
/// Managers only decide requests addressed to them and filed by someone else.
fn decision_guard(leave_id: u64, actor: &AuthUser) -> ListQuery {
    let mut clauses = vec![Clause::eq("id", leave_id)];
    if actor.role == Role::Manager {
        let me = actor.username.as_str();
        clauses.push(Clause::eq("manager_name", me));
        clauses.push(Clause::Single(Predicate::new("employee_name", Op::Ne, me)));
    }
    ListQuery::scoped(clauses)
}

/// Moves a pending request to its decided state.
pub trait LeaveDecisions {
    /// The decided row, or `None` when no unprocessed request the actor may
    /// decide matched.
    fn settle(
        &self,
        leave_id: u64,
        decision: LeaveStatus,
        actor: &AuthUser,
        note: Option<&str>,
    ) -> impl Future<Output = Result<Option<LeaveRequest>, AppError>>;
}

pub struct MySqlLeaveDecisions<'a> {
    pool: &'a MySqlPool,
}

impl<'a> MySqlLeaveDecisions<'a> {
    pub fn new(pool: &'a MySqlPool) -> Self {
        Self { pool }
    }
}

impl LeaveDecisions for MySqlLeaveDecisions<'_> {
    async fn settle(
        &self,
        leave_id: u64,
        decision: LeaveStatus,
        actor: &AuthUser,
        note: Option<&str>,
    ) -> Result<Option<LeaveRequest>, AppError> {
        let mut tx = self.pool.begin().await?;

        let guard = decision_guard(leave_id, actor);
        let sql = format!(
            "UPDATE leave_requests SET status = ?, processed_by = ?, processed_at = NOW(){} AND {UNPROCESSED_GUARD}",
            guard.where_sql()
        );
        let leading = [SqlValue::from(decision.as_ref()), SqlValue::from(actor.username.as_str())];
        let result = sqlx::query_with(&sql, guard.arguments_after(&leading))
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            // dropping tx rolls back
            return Ok(None);
        }

        log_action(&mut tx, leave_id, decision, &actor.username, note).await?;

        let leave = sqlx::query_as::<_, LeaveRequest>(&format!("{SELECT_LEAVE} WHERE id = ?"))
            .bind(leave_id)
            .fetch_one(&mut *tx)
            .await?;

        notify_username(
            &mut tx,
            &leave.employee_name,
            NotificationType::LeaveDecision,
            &format!(
                "Your leave request #{leave_id} was {} by {}",
                decided(decision),
                actor.username
            ),
            Some(leave_id),
        )
        .await?;

        tx.commit().await.map_err(|e| {
            error!(error = %e, leave_id, "Leave decision commit failed");
            AppError::from(e)
        })?;

        Ok(Some(leave))
    }
}

fn decided(decision: LeaveStatus) -> &'static str {
    match decision {
        LeaveStatus::Approve => "approved",
        _ => "rejected",
    }
}

/// Settles the request, then mirrors the decided row to the sheet. A
/// request that was already processed gets `success=false` and no sync.
async fn apply_decision<D: LeaveDecisions>(
    decisions: &D,
    leave_id: u64,
    decision: LeaveStatus,
    actor: &AuthUser,
    note: Option<&str>,
    sheets: &dyn SheetSync,
    config: &Config,
) -> Result<ApiMessage, AppError> {
    let note = note.map(str::trim).filter(|n| !n.is_empty());

    let Some(leave) = decisions.settle(leave_id, decision, actor, note).await? else {
        info!(leave_id, decision = %decision, "Leave already processed or not visible");
        return Ok(ApiMessage::failure("Leave request not found or already processed"));
    };

    info!(leave_id, decision = %decision, by = %actor.username, "Leave processed");

    let warning = sync_or_warn(
        sheets,
        config.sheet_id.as_deref(),
        &config.leave_sheet_tab,
        sheet_row(&leave),
    )
    .await;

    Ok(ApiMessage::ok(format!("Leave {}", decided(decision))).with_warning(warning))
}

async fn decide(
    ctx: RequestContext,
    leave_id: u64,
    decision: LeaveStatus,
    note: Option<String>,
    sheets: &dyn SheetSync,
    config: &Config,
) -> Result<HttpResponse, AppError> {
    ctx.user.require_manager_or_admin()?;

    let decisions = MySqlLeaveDecisions::new(&ctx.pool);
    let message = apply_decision(
        &decisions,
        leave_id,
        decision,
        &ctx.user,
        note.as_deref(),
        sheets,
        config,
    )
    .await?;

    Ok(HttpResponse::Ok().json(message))
}

#[utoipa::path(
    post,
    path = "/api/leave/{leave_id}/approve",
    params(("leave_id" = u64, Path, description = "ID of the leave request to approve")),
    request_body(content = DecisionNote, description = "Optional note"),
    responses(
        (status = 200, description = "Approved, or success=false when already processed", body = ApiMessage),
        (status = 401, description = "Unauthorized", body = ApiMessage),
        (status = 403, description = "Forbidden", body = ApiMessage)
    ),
    security(("bearer_auth" = [])),
    tag = "Leave"
)]
pub async fn approve_leave(
    ctx: RequestContext,
    path: web::Path<u64>,
    body: Option<web::Json<DecisionNote>>,
    sheets: web::Data<dyn SheetSync>,
    config: web::Data<Config>,
) -> Result<HttpResponse, AppError> {
    let note = body.and_then(|b| b.into_inner().note);
    decide(ctx, path.into_inner(), LeaveStatus::Approve, note, sheets.get_ref(), &config).await
}

#[utoipa::path(
    post,
    path = "/api/leave/{leave_id}/reject",
    params(("leave_id" = u64, Path, description = "ID of the leave request to reject")),
    request_body(content = DecisionNote, description = "Optional note"),
    responses(
        (status = 200, description = "Rejected, or success=false when already processed", body = ApiMessage),
        (status = 401, description = "Unauthorized", body = ApiMessage),
        (status = 403, description = "Forbidden", body = ApiMessage)
    ),
    security(("bearer_auth" = [])),
    tag = "Leave"
)]
pub async fn reject_leave(
    ctx: RequestContext,
    path: web::Path<u64>,
    body: Option<web::Json<DecisionNote>>,
    sheets: web::Data<dyn SheetSync>,
    config: web::Data<Config>,
) -> Result<HttpResponse, AppError> {
    let note = body.and_then(|b| b.into_inner().note);
    decide(ctx, path.into_inner(), LeaveStatus::Reject, note, sheets.get_ref(), &config).await
}

/// Withdraw one's own pending request
#[utoipa::path(
    post,
    path = "/api/leave/{leave_id}/cancel",
    params(("leave_id" = u64, Path, description = "ID of the leave request to cancel")),
    responses(
        (status = 200, description = "Cancelled, or success=false when already processed", body = ApiMessage),
        (status = 401, description = "Unauthorized", body = ApiMessage)
    ),
    security(("bearer_auth" = [])),
    tag = "Leave"
)]
pub async fn cancel_leave(
    ctx: RequestContext,
    path: web::Path<u64>,
) -> Result<HttpResponse, AppError> {
    let leave_id = path.into_inner();
    let mut tx = ctx.pool.begin().await?;

    let result = sqlx::query(&format!(
        "UPDATE leave_requests SET status = ?, processed_by = ?, processed_at = NOW() WHERE id = ? AND employee_name = ? AND {UNPROCESSED_GUARD}"
    ))
    .bind(LeaveStatus::Cancelled.as_ref())
    .bind(&ctx.user.username)
    .bind(leave_id)
    .bind(&ctx.user.username)
    .execute(&mut *tx)
    .await?;

    if result.rows_affected() == 0 {
        return Ok(HttpResponse::Ok().json(ApiMessage::failure(
            "Leave request not found or already processed",
        )));
    }

    log_action(&mut tx, leave_id, LeaveStatus::Cancelled, &ctx.user.username, None).await?;
    tx.commit().await?;

    info!(leave_id, employee = %ctx.user.username, "Leave cancelled");
    Ok(HttpResponse::Ok().json(ApiMessage::ok("Leave cancelled")))
}

/// for getting a leave application details endpoint
#[utoipa::path(
    get,
    path = "/api/leave/{leave_id}",
    params(("leave_id" = u64, Path, description = "ID of the leave request to fetch")),
    responses(
        (status = 200, description = "Leave request found", body = LeaveRequest),
        (status = 401, description = "Unauthorized", body = ApiMessage),
        (status = 404, description = "Leave request not found", body = ApiMessage)
    ),
    security(("bearer_auth" = [])),
    tag = "Leave"
)]
pub async fn get_leave(
    ctx: RequestContext,
    path: web::Path<u64>,
) -> Result<HttpResponse, AppError> {
    let leave_id = path.into_inner();

    let plan = LIST.build(
        &HashMap::new(),
        visibility(&ctx.user)
            .into_iter()
            .chain([Clause::eq("id", leave_id)])
            .collect(),
    )?;

    let sql = plan.filtered_sql(SELECT_LEAVE);
    let leave = sqlx::query_as_with::<_, LeaveRequest, _>(&sql, plan.arguments())
        .fetch_optional(&ctx.pool)
        .await?;

    match leave {
        Some(data) => Ok(HttpResponse::Ok().json(data)),
        None => Ok(HttpResponse::NotFound().json(ApiMessage::failure("Leave request not found"))),
    }
}

/// for getting leave applications endpoint
#[utoipa::path(
    get,
    path = "/api/leave",
    params(
        ("employee_name" = Option<String>, Query, description = "Exact employee name"),
        ("manager_name" = Option<String>, Query, description = "Exact manager name"),
        ("leave_type" = Option<String>, Query, description = "annual | sick | casual | unpaid"),
        ("status" = Option<String>, Query, description = "PENDING | Approve | Reject | Cancelled"),
        ("from" = Option<String>, Query, description = "Starts on or after (YYYY-MM-DD)"),
        ("to" = Option<String>, Query, description = "Ends on or before (YYYY-MM-DD)"),
        ("sort" = Option<String>, Query, description = "employee_name | leave_type | status | start_date | created_at"),
        ("dir" = Option<String>, Query, description = "asc | desc"),
        ("page" = Option<u32>, Query, description = "Page number"),
        ("per_page" = Option<u32>, Query, description = "Items per page")
    ),
    responses(
        (status = 200, description = "Paginated leave list", body = LeaveListResponse),
        (status = 400, description = "Malformed filter", body = ApiMessage),
        (status = 401, description = "Unauthorized", body = ApiMessage)
    ),
    security(("bearer_auth" = [])),
    tag = "Leave"
)]
pub async fn leave_list(
    ctx: RequestContext,
    query: web::Query<HashMap<String, String>>,
) -> Result<HttpResponse, AppError> {
    let plan = LIST.build(&query, visibility(&ctx.user))?;

    let count_sql = plan.filtered_sql("SELECT COUNT(*) FROM leave_requests");
    let total = sqlx::query_scalar_with::<_, i64, _>(&count_sql, plan.arguments())
        .fetch_one(&ctx.pool)
        .await?;

    let data_sql = plan.page_sql(SELECT_LEAVE);
    let data = sqlx::query_as_with::<_, LeaveRequest, _>(&data_sql, plan.page_arguments())
        .fetch_all(&ctx.pool)
        .await?;

    Ok(HttpResponse::Ok().json(LeaveListResponse {
        success: true,
        data,
        page: plan.page,
        per_page: plan.per_page,
        total,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sheets::testing::RecordingSheetSync;
    use std::sync::Mutex;

    fn user(role: Role) -> AuthUser {
        AuthUser {
            user_id: 1,
            username: "carol".into(),
            role,
            department_id: Some(2),
            session_id: "s".into(),
            csrf_token: "c".into(),
        }
    }

    #[test]
    fn visibility_narrows_by_role() {
        assert!(visibility(&user(Role::Admin)).is_empty());
        assert_eq!(
            visibility(&user(Role::Doer)),
            vec![Clause::eq("employee_name", "carol")]
        );
        assert_eq!(
            visibility(&user(Role::Manager)),
            vec![Clause::AnyOf(vec![
                Predicate::eq("employee_name", "carol"),
                Predicate::eq("manager_name", "carol"),
            ])]
        );
    }

    #[test]
    fn doer_cannot_widen_visibility_with_filters() {
        let params: HashMap<String, String> =
            [("employee_name".to_string(), "dave".to_string())].into_iter().collect();
        let plan = LIST.build(&params, visibility(&user(Role::Doer))).unwrap();
        assert_eq!(
            plan.where_sql(),
            " WHERE employee_name = ? AND employee_name = ?"
        );
    }

    /// Applies the same rules as the guarded UPDATE to rows held in memory.
    struct MemoryDecisions {
        rows: Mutex<Vec<LeaveRequest>>,
    }

    impl MemoryDecisions {
        fn with(rows: Vec<LeaveRequest>) -> Self {
            Self { rows: Mutex::new(rows) }
        }
    }

    impl LeaveDecisions for MemoryDecisions {
        async fn settle(
            &self,
            leave_id: u64,
            decision: LeaveStatus,
            actor: &AuthUser,
            _note: Option<&str>,
        ) -> Result<Option<LeaveRequest>, AppError> {
            let mut rows = self.rows.lock().unwrap();
            let Some(row) = rows.iter_mut().find(|r| {
                r.id == leave_id
                    && LeaveStatus::from_stored(r.status.as_deref()) == Some(LeaveStatus::Pending)
                    && (actor.role != Role::Manager
                        || (r.manager_name.as_deref() == Some(actor.username.as_str())
                            && r.employee_name != actor.username))
            }) else {
                return Ok(None);
            };
            row.status = Some(decision.to_string());
            row.processed_by = Some(actor.username.clone());
            row.processed_at = datetime::parse("2024-01-30 09:00:00");
            Ok(Some(row.clone()))
        }
    }

    fn pending(id: u64, employee: &str, manager: &str) -> LeaveRequest {
        LeaveRequest {
            id,
            employee_name: employee.into(),
            leave_type: "annual".into(),
            start_date: NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2024, 2, 2).unwrap(),
            reason: None,
            status: None,
            manager_name: Some(manager.into()),
            manager_email: None,
            processed_by: None,
            processed_at: None,
            created_at: datetime::parse("2024-01-29 09:00:00").unwrap(),
        }
    }

    fn synced_config() -> Config {
        let mut config = Config::for_tests();
        config.sheet_id = Some("sheet-1".into());
        config
    }

    #[actix_web::test]
    async fn second_decision_reports_already_processed() {
        let decisions = MemoryDecisions::with(vec![pending(5, "alice", "carol")]);
        let sheets = RecordingSheetSync::default();
        let config = synced_config();
        let carol = user(Role::Manager);

        let first = apply_decision(&decisions, 5, LeaveStatus::Approve, &carol, None, &sheets, &config)
            .await
            .unwrap();
        let second = apply_decision(&decisions, 5, LeaveStatus::Reject, &carol, None, &sheets, &config)
            .await
            .unwrap();

        assert!(first.success);
        assert!(!second.success);
        assert!(second.message.contains("already processed"));
        assert_eq!(sheets.written(), 1);
        assert_eq!(
            decisions.rows.lock().unwrap()[0].status.as_deref(),
            Some("Approve")
        );
    }

    #[actix_web::test]
    async fn sheet_failure_keeps_the_decision() {
        let decisions = MemoryDecisions::with(vec![pending(6, "alice", "carol")]);
        let sheets = RecordingSheetSync { fail: true, ..Default::default() };

        let msg = apply_decision(&decisions, 6, LeaveStatus::Approve, &user(Role::Admin), None, &sheets, &synced_config())
            .await
            .unwrap();

        assert!(msg.success);
        assert!(msg.warning.is_some());
    }

    #[actix_web::test]
    async fn manager_cannot_decide_own_request() {
        let decisions = MemoryDecisions::with(vec![pending(7, "carol", "carol")]);
        let sheets = RecordingSheetSync::default();

        let msg = apply_decision(&decisions, 7, LeaveStatus::Approve, &user(Role::Manager), None, &sheets, &synced_config())
            .await
            .unwrap();

        assert!(!msg.success);
        assert_eq!(sheets.written(), 0);
    }

    #[test]
    fn manager_guard_excludes_own_requests() {
        let guard = decision_guard(7, &user(Role::Manager));
        assert_eq!(
            guard.where_sql(),
            " WHERE id = ? AND manager_name = ? AND employee_name <> ?"
        );
        assert_eq!(decision_guard(7, &user(Role::Admin)).where_sql(), " WHERE id = ?");
    }

    #[test]
    fn request_cannot_name_its_own_author_as_manager() {
        let payload = |manager: &str| CreateLeave {
            start_date: NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2024, 2, 2).unwrap(),
            leave_type: LeaveType::Annual,
            reason: None,
            manager_name: manager.into(),
        };
        let carol = user(Role::Manager);

        assert!(matches!(approver_name(&payload(" carol "), &carol), Err(AppError::Validation(_))));
        assert!(matches!(approver_name(&payload(""), &carol), Err(AppError::Validation(_))));
        assert_eq!(approver_name(&payload("dave"), &carol).unwrap(), "dave");
    }

    #[test]
    fn decisions_only_touch_unprocessed_rows() {
        assert!(UNPROCESSED_GUARD.contains("status IS NULL"));
        assert!(UNPROCESSED_GUARD.contains("status = ''"));
        assert!(UNPROCESSED_GUARD.contains("'PENDING'"));
    }

    #[test]
    fn sheet_row_carries_decision_fields() {
        let leave = LeaveRequest {
            id: 12,
            employee_name: "alice".into(),
            leave_type: "sick".into(),
            start_date: NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2024, 2, 3).unwrap(),
            reason: None,
            status: Some("Approve".into()),
            manager_name: Some("carol".into()),
            manager_email: None,
            processed_by: Some("carol".into()),
            processed_at: datetime::parse("2024-01-30 09:00:00"),
            created_at: datetime::parse("2024-01-29 09:00:00").unwrap(),
        };
        assert_eq!(
            sheet_row(&leave),
            vec!["12", "alice", "sick", "2024-02-01", "2024-02-03", "Approve", "carol", "2024-01-30 09:00:00"]
        );
    }

    #[test]
    fn leave_types_use_lowercase_tags() {
        assert_eq!(LeaveType::Casual.as_ref(), "casual");
        let parsed: LeaveType = serde_json::from_str("\"annual\"").unwrap();
        assert!(matches!(parsed, LeaveType::Annual));
    }
}
