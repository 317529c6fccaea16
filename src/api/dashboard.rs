//! Task counters for the dashboard, one independent query per bucket.

use crate::{
    auth::auth::{AuthUser, RequestContext},
    error::{ApiMessage, AppError},
    model::{role::Role, task::TaskStatus},
    api::tasks::open_status,
    utils::query_builder::{Clause, ListQuery, Op, Predicate, parse_bound},
};
use actix_web::{HttpResponse, web};
use chrono::{NaiveDateTime, NaiveTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, MySqlPool};
use std::future::Future;
use std::str::FromStr;
use strum::IntoEnumIterator;
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};
use tracing::{debug, warn};
use utoipa::{IntoParams, ToSchema};

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum Bucket {
    Total,
    Pending,
    Shifted,
    Completed,
    CompletedOnTime,
    CompletedLate,
    Overdue,
}

impl Bucket {
    /// Conditions this bucket adds on top of the caller's scope.
    fn clauses(self, now: NaiveDateTime) -> Vec<Clause> {
        let completed = Clause::eq("status", TaskStatus::Completed.as_ref());
        match self {
            Bucket::Total => vec![],
            Bucket::Pending => vec![Clause::eq("status", TaskStatus::Pending.as_ref())],
            Bucket::Shifted => vec![Clause::eq("status", TaskStatus::Shifted.as_ref())],
            Bucket::Completed => vec![completed],
            Bucket::CompletedOnTime => vec![completed, Clause::eq("delay_flag", false)],
            Bucket::CompletedLate => vec![completed, Clause::eq("delay_flag", true)],
            Bucket::Overdue => vec![
                open_status(),
                Clause::Single(Predicate::new("planned_date", Op::Lt, now)),
            ],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display, AsRefStr)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum DashboardScope {
    Personal,
    Team,
    All,
}

/// Counts rows of `tasks` matching a query.
pub trait BucketCounter {
    fn count(&self, query: &ListQuery) -> impl Future<Output = Result<i64, sqlx::Error>>;
}

pub struct MySqlBucketCounter<'a> {
    pool: &'a MySqlPool,
}

impl BucketCounter for MySqlBucketCounter<'_> {
    async fn count(&self, query: &ListQuery) -> Result<i64, sqlx::Error> {
        let sql = query.filtered_sql("SELECT COUNT(*) FROM tasks");
        sqlx::query_scalar_with::<_, i64, _>(&sql, query.arguments())
            .fetch_one(self.pool)
            .await
    }
}

#[derive(Debug, Default, Serialize, ToSchema)]
pub struct Summary {
    pub total: i64,
    pub pending: i64,
    pub shifted: i64,
    pub completed: i64,
    pub completed_on_time: i64,
    pub completed_late: i64,
    pub overdue: i64,
    /// Completed over total, as a percentage with one decimal
    #[schema(example = 62.5)]
    pub completion_rate: f64,
}

impl Summary {
    fn set(&mut self, bucket: Bucket, value: i64) {
        match bucket {
            Bucket::Total => self.total = value,
            Bucket::Pending => self.pending = value,
            Bucket::Shifted => self.shifted = value,
            Bucket::Completed => self.completed = value,
            Bucket::CompletedOnTime => self.completed_on_time = value,
            Bucket::CompletedLate => self.completed_late = value,
            Bucket::Overdue => self.overdue = value,
        }
    }

    fn finish(mut self) -> Self {
        self.completion_rate = completion_rate(self.completed, self.total);
        self
    }
}

fn completion_rate(completed: i64, total: i64) -> f64 {
    if total <= 0 {
        return 0.0;
    }
    (completed as f64 * 1000.0 / total as f64).round() / 10.0
}

#[derive(Serialize, ToSchema)]
pub struct SummaryResponse {
    pub success: bool,
    #[schema(example = "team")]
    pub scope: String,
    pub data: Summary,
    /// Buckets that could not be counted and are reported as 0
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub degraded: Vec<String>,
}

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct SummaryQuery {
    /// personal | team | all
    pub scope: Option<String>,
    /// Planned on or after (YYYY-MM-DD or full date-time)
    pub from: Option<String>,
    /// Planned on or before
    pub to: Option<String>,
}

/// Scope actually applied for the caller. Doers and clients are always
/// personal; managers never see beyond their department.
pub fn effective_scope(user: &AuthUser, requested: Option<DashboardScope>) -> DashboardScope {
    match user.role {
        Role::Doer | Role::Client => DashboardScope::Personal,
        Role::Manager => match (requested, user.department_id) {
            (Some(DashboardScope::Personal), _) | (_, None) => DashboardScope::Personal,
            _ => DashboardScope::Team,
        },
        Role::Admin => requested.unwrap_or(DashboardScope::All),
    }
}

pub fn scope_clauses(user: &AuthUser, scope: DashboardScope) -> Vec<Clause> {
    match (scope, user.department_id) {
        (DashboardScope::Personal, _) => vec![Clause::eq("doer_id", user.user_id)],
        (DashboardScope::Team, Some(dept)) => vec![Clause::eq("department_id", dept)],
        (DashboardScope::Team, None) if user.role.is_admin() => vec![],
        (DashboardScope::Team, None) => vec![Clause::eq("doer_id", user.user_id)],
        (DashboardScope::All, _) => vec![],
    }
}

fn date_range(from: Option<&str>, to: Option<&str>) -> Result<Vec<Clause>, AppError> {
    let mut clauses = Vec::new();
    if let Some(raw) = from.map(str::trim).filter(|v| !v.is_empty()) {
        let bound = parse_bound(raw, NaiveTime::MIN)
            .ok_or_else(|| AppError::validation("Invalid value for from"))?;
        clauses.push(Clause::Single(Predicate::new("planned_date", Op::Gte, bound)));
    }
    if let Some(raw) = to.map(str::trim).filter(|v| !v.is_empty()) {
        let end_of_day = NaiveTime::from_hms_opt(23, 59, 59)
            .ok_or_else(|| AppError::Internal("bad time constant".to_string()))?;
        let bound = parse_bound(raw, end_of_day)
            .ok_or_else(|| AppError::validation("Invalid value for to"))?;
        clauses.push(Clause::Single(Predicate::new("planned_date", Op::Lte, bound)));
    }
    Ok(clauses)
}

/// Runs every bucket concurrently. A failed bucket reads 0 and is named in
/// the second element; the others are unaffected.
pub async fn summarize<C: BucketCounter>(
    counter: &C,
    base: &ListQuery,
    now: NaiveDateTime,
) -> (Summary, Vec<String>) {
    let buckets: Vec<Bucket> = Bucket::iter().collect();
    let queries: Vec<ListQuery> = buckets.iter().map(|b| base.and(b.clauses(now))).collect();

    let results = join_all(queries.iter().map(|q| counter.count(q))).await;

    let mut summary = Summary::default();
    let mut degraded = Vec::new();
    for (bucket, result) in buckets.into_iter().zip(results) {
        match result {
            Ok(n) => summary.set(bucket, n),
            Err(e) => {
                warn!(bucket = %bucket, error = %e, "Dashboard bucket failed, reporting 0");
                degraded.push(bucket.to_string());
            }
        }
    }
    (summary.finish(), degraded)
}

/// Task counters for the caller's scope
#[utoipa::path(
    get,
    path = "/api/dashboard/summary",
    params(SummaryQuery),
    responses(
        (status = 200, description = "Bucket counts", body = SummaryResponse),
        (status = 400, description = "Malformed scope or date", body = ApiMessage),
        (status = 401, description = "Unauthorized", body = ApiMessage)
    ),
    security(("bearer_auth" = [])),
    tag = "Dashboard"
)]
pub async fn summary(
    ctx: RequestContext,
    query: web::Query<SummaryQuery>,
) -> Result<HttpResponse, AppError> {
    let requested = match query.scope.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => Some(
            DashboardScope::from_str(raw)
                .map_err(|_| AppError::validation("scope must be personal, team or all"))?,
        ),
        None => None,
    };
    let scope = effective_scope(&ctx.user, requested);

    let mut clauses = scope_clauses(&ctx.user, scope);
    clauses.extend(date_range(query.from.as_deref(), query.to.as_deref())?);
    let base = ListQuery::scoped(clauses);

    debug!(user_id = ctx.user.user_id, scope = %scope, "Building dashboard summary");

    let counter = MySqlBucketCounter { pool: &ctx.pool };
    let (data, degraded) = summarize(&counter, &base, Utc::now().naive_utc()).await;

    Ok(HttpResponse::Ok().json(SummaryResponse {
        success: true,
        scope: scope.to_string(),
        data,
        degraded,
    }))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum GroupBy {
    Doer,
    Department,
}

#[derive(Debug, Serialize, FromRow, ToSchema)]
pub struct PerformanceRow {
    #[schema(example = "alice")]
    pub label: String,
    pub total: i64,
    pub completed: i64,
    pub late: i64,
    pub pending: i64,
}

#[derive(Serialize, ToSchema)]
pub struct PerformanceResponse {
    pub success: bool,
    #[schema(example = "doer")]
    pub group_by: String,
    pub data: Vec<PerformanceRow>,
}

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PerformanceQuery {
    /// doer | department
    pub group_by: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
}

fn performance_sql(group_by: GroupBy, plan: &ListQuery) -> String {
    let (label, join, group) = match group_by {
        GroupBy::Doer => ("doer_name", "", "doer_id, doer_name"),
        GroupBy::Department => (
            "COALESCE(d.name, 'Unassigned')",
            " LEFT JOIN departments d ON d.id = department_id",
            "department_id, d.name",
        ),
    };

    // MySQL SUM() is DECIMAL, cast so it decodes as i64
    format!(
        "SELECT {label} AS label, COUNT(*) AS total, \
         CAST(COALESCE(SUM(status = 'completed'), 0) AS SIGNED) AS completed, \
         CAST(COALESCE(SUM(status = 'completed' AND delay_flag = 1), 0) AS SIGNED) AS late, \
         CAST(COALESCE(SUM(status IN ('pending', 'shifted')), 0) AS SIGNED) AS pending \
         FROM tasks{join}{} GROUP BY {group} ORDER BY total DESC, label ASC",
        plan.where_sql()
    )
}

/// Grouped task counts for managers (own department) and admins
#[utoipa::path(
    get,
    path = "/api/dashboard/performance",
    params(PerformanceQuery),
    responses(
        (status = 200, description = "Counts per doer or department", body = PerformanceResponse),
        (status = 400, description = "Malformed parameter", body = ApiMessage),
        (status = 403, description = "Manager/Admin only", body = ApiMessage)
    ),
    security(("bearer_auth" = [])),
    tag = "Dashboard"
)]
pub async fn performance(
    ctx: RequestContext,
    query: web::Query<PerformanceQuery>,
) -> Result<HttpResponse, AppError> {
    ctx.user.require_manager_or_admin()?;

    let group_by = match query.group_by.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => GroupBy::from_str(raw)
            .map_err(|_| AppError::validation("group_by must be doer or department"))?,
        None => GroupBy::Doer,
    };

    let scope = effective_scope(&ctx.user, Some(DashboardScope::All));
    let mut clauses = scope_clauses(&ctx.user, scope);
    clauses.extend(date_range(query.from.as_deref(), query.to.as_deref())?);
    let plan = ListQuery::scoped(clauses);

    let sql = performance_sql(group_by, &plan);
    let data = sqlx::query_as_with::<_, PerformanceRow, _>(&sql, plan.arguments())
        .fetch_all(&ctx.pool)
        .await?;

    Ok(HttpResponse::Ok().json(PerformanceResponse {
        success: true,
        group_by: group_by.to_string(),
        data,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::datetime;
    use crate::utils::query_builder::SqlValue;

    /// Answers by bucket shape; fails whichever query matches `fail_when`.
    struct FakeCounter {
        fail_when: Option<fn(&ListQuery) -> bool>,
    }

    impl BucketCounter for FakeCounter {
        async fn count(&self, query: &ListQuery) -> Result<i64, sqlx::Error> {
            if self.fail_when.is_some_and(|f| f(query)) {
                return Err(sqlx::Error::PoolTimedOut);
            }
            // deterministic: more conditions, fewer rows
            Ok(100 / (query.clauses().len() as i64 + 1))
        }
    }

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

    #[actix_web::test]
    async fn every_bucket_is_counted() {
        let base = ListQuery::scoped(vec![Clause::eq("doer_id", 7u64)]);
        let (summary, degraded) = summarize(&FakeCounter { fail_when: None }, &base, now()).await;

        assert!(degraded.is_empty());
        assert_eq!(summary.total, 50);
        assert_eq!(summary.pending, 33);
        assert_eq!(summary.completed_late, 25);
        assert_eq!(summary.overdue, 25);
        assert_eq!(summary.completion_rate, 66.0);
    }

    #[actix_web::test]
    async fn failed_bucket_reads_zero_and_others_survive() {
        // overdue is the only bucket bounded by planned_date < now
        fn overdue_only(q: &ListQuery) -> bool {
            q.clauses().iter().any(|c| matches!(c, Clause::Single(p) if p.op == Op::Lt))
        }
        let counter = FakeCounter { fail_when: Some(overdue_only) };
        let base = ListQuery::scoped(vec![]);
        let (summary, degraded) = summarize(&counter, &base, now()).await;

        assert_eq!(degraded, vec!["overdue".to_string()]);
        assert_eq!(summary.overdue, 0);
        assert_eq!(summary.total, 100);
        assert_eq!(summary.pending, 50);
        assert_eq!(summary.completed_on_time, 33);
    }

    #[test]
    fn bucket_queries_keep_the_scope_first() {
        let base = ListQuery::scoped(vec![Clause::eq("department_id", 3u64)]);
        for bucket in Bucket::iter() {
            let q = base.and(bucket.clauses(now()));
            assert_eq!(q.clauses()[0], Clause::eq("department_id", 3u64));
            assert_eq!(q.values()[0], &SqlValue::U64(3));
        }
    }

    #[test]
    fn scope_is_clamped_by_role() {
        let doer = user(Role::Doer, Some(1));
        assert_eq!(effective_scope(&doer, Some(DashboardScope::All)), DashboardScope::Personal);

        let manager = user(Role::Manager, Some(3));
        assert_eq!(effective_scope(&manager, None), DashboardScope::Team);
        assert_eq!(effective_scope(&manager, Some(DashboardScope::All)), DashboardScope::Team);
        assert_eq!(effective_scope(&manager, Some(DashboardScope::Personal)), DashboardScope::Personal);
        assert_eq!(scope_clauses(&manager, DashboardScope::Team), vec![Clause::eq("department_id", 3u64)]);

        let loose_manager = user(Role::Manager, None);
        assert_eq!(effective_scope(&loose_manager, None), DashboardScope::Personal);

        let admin = user(Role::Admin, None);
        assert_eq!(effective_scope(&admin, None), DashboardScope::All);
        assert!(scope_clauses(&admin, DashboardScope::All).is_empty());
    }

    #[test]
    fn date_range_is_validated() {
        assert_eq!(date_range(Some("2024-01-01"), Some("2024-01-31")).unwrap().len(), 2);
        assert!(date_range(None, None).unwrap().is_empty());
        assert!(matches!(date_range(Some("soon"), None), Err(AppError::Validation(_))));
    }

    #[test]
    fn completion_rate_handles_empty_scope() {
        assert_eq!(completion_rate(0, 0), 0.0);
        assert_eq!(completion_rate(5, 8), 62.5);
        assert_eq!(completion_rate(1, 3), 33.3);
    }

    #[test]
    fn performance_sql_binds_only_scope_values() {
        let plan = ListQuery::scoped(vec![Clause::eq("department_id", 3u64)]);
        let sql = performance_sql(GroupBy::Department, &plan);
        assert_eq!(sql.matches('?').count(), 1);
        assert!(sql.contains("GROUP BY department_id, d.name"));
        assert!(sql.contains("AS SIGNED) AS late"));
    }
}
