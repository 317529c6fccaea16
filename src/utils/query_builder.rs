//! Allow-listed WHERE / ORDER BY / LIMIT construction for list endpoints.
//!
//! Column names only ever come from the static [`ListSpec`] tables, user
//! input only ever travels as bound arguments.

use std::collections::HashMap;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use sqlx::Arguments;
use sqlx::mysql::MySqlArguments;

use crate::error::AppError;
use crate::model::datetime;

// SQL bindable value
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    String(String),
    U64(u64),
    I64(i64),
    Bool(bool),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
}

impl SqlValue {
    fn add_to(&self, args: &mut MySqlArguments) {
        match self {
            SqlValue::String(v) => args.add(v.clone()),
            SqlValue::U64(v) => args.add(*v),
            SqlValue::I64(v) => args.add(*v),
            SqlValue::Bool(v) => args.add(*v),
            SqlValue::Date(v) => args.add(*v),
            SqlValue::DateTime(v) => args.add(*v),
        }
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::String(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::String(v)
    }
}

impl From<u64> for SqlValue {
    fn from(v: u64) -> Self {
        SqlValue::U64(v)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::I64(v)
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

impl From<NaiveDateTime> for SqlValue {
    fn from(v: NaiveDateTime) -> Self {
        SqlValue::DateTime(v)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Ne,
    Like,
    Gte,
    Lte,
    Lt,
}

impl Op {
    fn as_sql(self) -> &'static str {
        match self {
            Op::Eq => "=",
            Op::Ne => "<>",
            Op::Like => "LIKE",
            Op::Gte => ">=",
            Op::Lte => "<=",
            Op::Lt => "<",
        }
    }
}

/// One `column op ?` comparison.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub column: &'static str,
    pub op: Op,
    pub value: SqlValue,
}

impl Predicate {
    pub fn eq(column: &'static str, value: impl Into<SqlValue>) -> Self {
        Self {
            column,
            op: Op::Eq,
            value: value.into(),
        }
    }

    pub fn new(column: &'static str, op: Op, value: impl Into<SqlValue>) -> Self {
        Self {
            column,
            op,
            value: value.into(),
        }
    }

    fn render(&self) -> String {
        format!("{} {} ?", self.column, self.op.as_sql())
    }
}

/// A conjunct of the WHERE clause.
#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    Single(Predicate),
    /// Parenthesised OR group, e.g. "my own rows or rows I manage"
    AnyOf(Vec<Predicate>),
}

impl Clause {
    pub fn eq(column: &'static str, value: impl Into<SqlValue>) -> Self {
        Clause::Single(Predicate::eq(column, value))
    }

    fn render(&self) -> String {
        match self {
            Clause::Single(p) => p.render(),
            Clause::AnyOf(group) if group.is_empty() => "1 = 0".to_string(),
            Clause::AnyOf(group) => format!(
                "({})",
                group
                    .iter()
                    .map(Predicate::render)
                    .collect::<Vec<_>>()
                    .join(" OR ")
            ),
        }
    }

    fn values(&self) -> Vec<&SqlValue> {
        match self {
            Clause::Single(p) => vec![&p.value],
            Clause::AnyOf(group) => group.iter().map(|p| &p.value).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    /// Case-sensitive exact match on a text column
    Exact,
    /// `LIKE %value%`
    Contains,
    /// Unsigned id
    Id,
    /// `1/0/true/false`
    Flag,
    /// Lower bound, date or date-time
    From,
    /// Upper bound, inclusive of the whole day when only a date is given
    To,
}

#[derive(Debug, Clone, Copy)]
pub struct FilterField {
    pub param: &'static str,
    pub column: &'static str,
    pub kind: FilterKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKind {
    /// Case-insensitive text
    Text,
    /// `PREFIX-0042` codes, ordered by the numeric suffix
    Serial,
    /// Date or date-time, NULLs always last
    Date,
    Plain,
}

#[derive(Debug, Clone, Copy)]
pub struct SortField {
    pub param: &'static str,
    pub column: &'static str,
    pub kind: SortKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDir {
    Asc,
    Desc,
}

impl SortDir {
    fn as_sql(self) -> &'static str {
        match self {
            SortDir::Asc => "ASC",
            SortDir::Desc => "DESC",
        }
    }
}

/// Static description of what a list endpoint may filter and sort on.
#[derive(Debug)]
pub struct ListSpec {
    pub filters: &'static [FilterField],
    pub sorts: &'static [SortField],
    pub default_sort: SortField,
    pub default_dir: SortDir,
}

pub const DEFAULT_PER_PAGE: u32 = 20;
pub const MAX_PER_PAGE: u32 = 100;

/// A validated, immutable list query ready to render.
#[derive(Debug, Clone)]
pub struct ListQuery {
    clauses: Vec<Clause>,
    sort: SortField,
    dir: SortDir,
    pub page: u32,
    pub per_page: u32,
}

impl ListSpec {
    /// Builds the query from raw request parameters.
    ///
    /// `scope` holds the caller's visibility clauses; they always come first
    /// and user filters are only ever added next to them.
    pub fn build(
        &self,
        params: &HashMap<String, String>,
        scope: Vec<Clause>,
    ) -> Result<ListQuery, AppError> {
        let mut clauses = scope;

        // iterate the allow-list, not the params, so order is stable
        for field in self.filters {
            let Some(raw) = params.get(field.param).map(|v| v.trim()) else {
                continue;
            };
            if raw.is_empty() {
                continue;
            }
            clauses.push(Clause::Single(filter_predicate(field, raw)?));
        }

        let (sort, dir) = self.sort_from(params);
        let (page, per_page) = page_from(params)?;

        Ok(ListQuery {
            clauses,
            sort,
            dir,
            page,
            per_page,
        })
    }

    fn sort_from(&self, params: &HashMap<String, String>) -> (SortField, SortDir) {
        let requested = params
            .get("sort")
            .and_then(|s| self.sorts.iter().find(|f| f.param == s.trim()));

        match requested {
            Some(field) => {
                let dir = match params.get("dir").map(|d| d.trim().to_ascii_lowercase()) {
                    Some(d) if d == "desc" => SortDir::Desc,
                    Some(d) if d == "asc" => SortDir::Asc,
                    _ => SortDir::Asc,
                };
                (*field, dir)
            }
            None => (self.default_sort, self.default_dir),
        }
    }
}

fn filter_predicate(field: &FilterField, raw: &str) -> Result<Predicate, AppError> {
    let bad = || AppError::validation(format!("Invalid value for {}", field.param));

    let predicate = match field.kind {
        FilterKind::Exact => Predicate::eq(field.column, raw),
        FilterKind::Contains => Predicate::new(field.column, Op::Like, format!("%{}%", escape_like(raw))),
        FilterKind::Id => Predicate::eq(field.column, raw.parse::<u64>().map_err(|_| bad())?),
        FilterKind::Flag => Predicate::eq(field.column, parse_flag(raw).ok_or_else(bad)?),
        FilterKind::From => Predicate::new(field.column, Op::Gte, parse_bound(raw, NaiveTime::MIN).ok_or_else(bad)?),
        FilterKind::To => {
            let end_of_day = NaiveTime::from_hms_opt(23, 59, 59).ok_or_else(bad)?;
            Predicate::new(field.column, Op::Lte, parse_bound(raw, end_of_day).ok_or_else(bad)?)
        }
    };
    Ok(predicate)
}

pub fn parse_flag(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}

/// Accepts `YYYY-MM-DD` (completed with `time`) or a full date-time.
pub fn parse_bound(raw: &str, time: NaiveTime) -> Option<NaiveDateTime> {
    datetime::parse(raw).or_else(|| {
        NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .ok()
            .map(|d| d.and_time(time))
    })
}

fn escape_like(raw: &str) -> String {
    raw.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

fn page_from(params: &HashMap<String, String>) -> Result<(u32, u32), AppError> {
    let number = |key: &str, default: u32| -> Result<u32, AppError> {
        match params.get(key).map(|v| v.trim()).filter(|v| !v.is_empty()) {
            Some(v) => v
                .parse::<u32>()
                .map_err(|_| AppError::validation(format!("Invalid value for {key}"))),
            None => Ok(default),
        }
    };

    let page = number("page", 1)?.max(1);
    let per_page = number("per_page", DEFAULT_PER_PAGE)?.clamp(1, MAX_PER_PAGE);
    Ok((page, per_page))
}

impl ListQuery {
    /// Query with no user filters, used by aggregations that share the
    /// visibility rules.
    pub fn scoped(clauses: Vec<Clause>) -> Self {
        Self {
            clauses,
            sort: SortField {
                param: "id",
                column: "id",
                kind: SortKind::Plain,
            },
            dir: SortDir::Asc,
            page: 1,
            per_page: DEFAULT_PER_PAGE,
        }
    }

    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    /// Returns a copy with extra conjuncts appended.
    pub fn and(&self, extra: impl IntoIterator<Item = Clause>) -> Self {
        let mut next = self.clone();
        next.clauses.extend(extra);
        next
    }

    pub fn where_sql(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!(
                " WHERE {}",
                self.clauses
                    .iter()
                    .map(Clause::render)
                    .collect::<Vec<_>>()
                    .join(" AND ")
            )
        }
    }

    /// ORDER BY ending in `id` so equal sort keys still page deterministically.
    pub fn order_sql(&self) -> String {
        let col = self.sort.column;
        let dir = self.dir.as_sql();
        let key = match self.sort.kind {
            SortKind::Text => format!("LOWER({col}) {dir}"),
            SortKind::Serial => format!("CAST(SUBSTRING_INDEX({col}, '-', -1) AS UNSIGNED) {dir}"),
            SortKind::Date => format!("{col} IS NULL, {col} {dir}"),
            SortKind::Plain => format!("{col} {dir}"),
        };
        if col == "id" {
            format!(" ORDER BY {key}")
        } else {
            format!(" ORDER BY {key}, id {dir}")
        }
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.per_page)
    }

    /// `base` + WHERE, for COUNT(*) and other aggregates.
    pub fn filtered_sql(&self, base: &str) -> String {
        format!("{base}{}", self.where_sql())
    }

    /// `base` + WHERE + ORDER BY + LIMIT/OFFSET.
    pub fn page_sql(&self, base: &str) -> String {
        format!("{base}{}{} LIMIT ? OFFSET ?", self.where_sql(), self.order_sql())
    }

    pub fn values(&self) -> Vec<&SqlValue> {
        self.clauses.iter().flat_map(Clause::values).collect()
    }

    /// Bind arguments for [`filtered_sql`](Self::filtered_sql).
    pub fn arguments(&self) -> MySqlArguments {
        let mut args = MySqlArguments::default();
        for value in self.values() {
            value.add_to(&mut args);
        }
        args
    }

    /// Bind arguments for statements whose own placeholders (e.g. an
    /// UPDATE's SET list) come before the WHERE clause.
    pub fn arguments_after(&self, leading: &[SqlValue]) -> MySqlArguments {
        let mut args = MySqlArguments::default();
        for value in leading.iter().chain(self.values()) {
            value.add_to(&mut args);
        }
        args
    }

    /// Bind arguments for [`page_sql`](Self::page_sql).
    pub fn page_arguments(&self) -> MySqlArguments {
        let mut args = self.arguments();
        args.add(u64::from(self.per_page));
        args.add(self.offset());
        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FILTERS: &[FilterField] = &[
        FilterField { param: "employee_name", column: "employee_name", kind: FilterKind::Exact },
        FilterField { param: "status", column: "status", kind: FilterKind::Exact },
        FilterField { param: "search", column: "reason", kind: FilterKind::Contains },
        FilterField { param: "from", column: "start_date", kind: FilterKind::From },
        FilterField { param: "to", column: "end_date", kind: FilterKind::To },
    ];
    const SORTS: &[SortField] = &[
        SortField { param: "employee_name", column: "employee_name", kind: SortKind::Text },
        SortField { param: "code", column: "task_code", kind: SortKind::Serial },
        SortField { param: "start_date", column: "start_date", kind: SortKind::Date },
    ];
    const SPEC: ListSpec = ListSpec {
        filters: FILTERS,
        sorts: SORTS,
        default_sort: SortField { param: "created_at", column: "created_at", kind: SortKind::Date },
        default_dir: SortDir::Desc,
    };

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn empty_params_render_no_where_and_default_order() {
        let q = SPEC.build(&HashMap::new(), vec![]).unwrap();
        assert_eq!(q.where_sql(), "");
        assert_eq!(q.order_sql(), " ORDER BY created_at IS NULL, created_at DESC, id DESC");
        assert_eq!((q.page, q.per_page), (1, DEFAULT_PER_PAGE));
    }

    #[test]
    fn filters_render_as_parameterized_conjunction() {
        let q = SPEC
            .build(
                &params(&[("status", "PENDING"), ("employee_name", "alice"), ("from", "2024-01-01")]),
                vec![],
            )
            .unwrap();

        assert_eq!(
            q.where_sql(),
            " WHERE employee_name = ? AND status = ? AND start_date >= ?"
        );
        assert_eq!(
            q.values(),
            vec![
                &SqlValue::from("alice"),
                &SqlValue::from("PENDING"),
                &SqlValue::DateTime(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap().and_time(NaiveTime::MIN)),
            ]
        );
    }

    #[test]
    fn parameter_order_does_not_change_the_query() {
        let a = SPEC.build(&params(&[("status", "Reject"), ("employee_name", "bob")]), vec![]).unwrap();
        let b = SPEC.build(&params(&[("employee_name", "bob"), ("status", "Reject")]), vec![]).unwrap();
        assert_eq!(a.where_sql(), b.where_sql());
        assert_eq!(a.values(), b.values());
    }

    #[test]
    fn user_input_never_reaches_sql_text() {
        let evil = "x' OR '1'='1";
        let q = SPEC
            .build(
                &params(&[
                    ("employee_name", evil),
                    ("search", evil),
                    ("status; DROP TABLE tasks", "1"),
                    ("sort", "created_at; DROP TABLE tasks"),
                    ("dir", "desc; --"),
                ]),
                vec![],
            )
            .unwrap();

        let sql = q.page_sql("SELECT * FROM leave_requests");
        assert!(!sql.contains(evil));
        assert!(!sql.contains("DROP"));
        assert_eq!(sql.matches('?').count(), q.values().len() + 2);
        // unknown sort falls back to the default
        assert!(sql.contains("ORDER BY created_at IS NULL, created_at DESC, id DESC"));
    }

    #[test]
    fn contains_filter_escapes_wildcards() {
        let q = SPEC.build(&params(&[("search", "50%_off")]), vec![]).unwrap();
        assert_eq!(q.values(), vec![&SqlValue::from("%50\\%\\_off%")]);
    }

    #[test]
    fn to_bound_covers_the_whole_day() {
        let q = SPEC.build(&params(&[("to", "2024-01-31")]), vec![]).unwrap();
        let expected = NaiveDate::from_ymd_opt(2024, 1, 31)
            .unwrap()
            .and_hms_opt(23, 59, 59)
            .unwrap();
        assert_eq!(q.values(), vec![&SqlValue::DateTime(expected)]);
    }

    #[test]
    fn malformed_values_are_validation_failures() {
        let err = SPEC.build(&params(&[("from", "last tuesday")]), vec![]).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let err = SPEC.build(&params(&[("page", "two")]), vec![]).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn sort_kinds_render_their_expression() {
        let text = SPEC.build(&params(&[("sort", "employee_name")]), vec![]).unwrap();
        assert_eq!(text.order_sql(), " ORDER BY LOWER(employee_name) ASC, id ASC");

        let serial = SPEC.build(&params(&[("sort", "code"), ("dir", "DESC")]), vec![]).unwrap();
        assert_eq!(
            serial.order_sql(),
            " ORDER BY CAST(SUBSTRING_INDEX(task_code, '-', -1) AS UNSIGNED) DESC, id DESC"
        );

        let date = SPEC.build(&params(&[("sort", "start_date")]), vec![]).unwrap();
        assert_eq!(date.order_sql(), " ORDER BY start_date IS NULL, start_date ASC, id ASC");
    }

    #[test]
    fn equal_sort_keys_fall_back_to_id() {
        let q = SPEC.build(&params(&[("sort", "employee_name"), ("dir", "desc")]), vec![]).unwrap();
        assert!(q.order_sql().ends_with(", id DESC"));

        // already unique
        assert_eq!(ListQuery::scoped(vec![]).order_sql(), " ORDER BY id ASC");
    }

    #[test]
    fn scope_comes_first_and_cannot_be_replaced() {
        let scope = vec![Clause::eq("employee_name", "bob")];
        let q = SPEC
            .build(&params(&[("employee_name", "alice")]), scope)
            .unwrap();

        // bob's scope survives next to the requested alice filter
        assert_eq!(q.where_sql(), " WHERE employee_name = ? AND employee_name = ?");
        assert_eq!(q.values(), vec![&SqlValue::from("bob"), &SqlValue::from("alice")]);
    }

    #[test]
    fn scoped_query_is_a_superset_of_admin_conditions() {
        let p = params(&[("status", "PENDING"), ("from", "2024-01-01")]);
        let admin = SPEC.build(&p, vec![]).unwrap();
        let manager = SPEC
            .build(
                &p,
                vec![Clause::AnyOf(vec![
                    Predicate::eq("employee_name", "carol"),
                    Predicate::eq("manager_name", "carol"),
                ])],
            )
            .unwrap();

        for clause in admin.clauses() {
            assert!(manager.clauses().contains(clause));
        }
        assert!(manager.where_sql().starts_with(" WHERE (employee_name = ? OR manager_name = ?) AND "));
    }

    #[test]
    fn pagination_is_clamped() {
        let q = SPEC.build(&params(&[("page", "0"), ("per_page", "500")]), vec![]).unwrap();
        assert_eq!((q.page, q.per_page), (1, MAX_PER_PAGE));

        let q = SPEC.build(&params(&[("page", "3"), ("per_page", "10")]), vec![]).unwrap();
        assert_eq!(q.offset(), 20);
    }
}
