use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr, ToSchema)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Shifted,
    Completed,
}

impl TaskStatus {
    /// Statuses a doer still has to act on.
    pub const OPEN: [TaskStatus; 2] = [TaskStatus::Pending, TaskStatus::Shifted];
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct Task {
    #[schema(example = 42)]
    pub id: u64,
    #[schema(example = "DT-0042")]
    pub task_code: String,
    pub doer_id: u64,
    #[schema(example = "alice")]
    pub doer_name: String,
    pub department_id: Option<u64>,
    pub description: String,
    #[schema(value_type = Option<String>, example = "2024-01-05 17:00:00")]
    #[serde(with = "crate::model::datetime::option")]
    pub planned_date: Option<NaiveDateTime>,
    #[schema(value_type = Option<String>)]
    #[serde(with = "crate::model::datetime::option")]
    pub actual_date: Option<NaiveDateTime>,
    #[schema(example = "pending")]
    pub status: String,
    pub delay_flag: bool,
    pub delay_seconds: Option<i64>,
    #[schema(value_type = String, example = "2024-01-02 10:00:00")]
    #[serde(with = "crate::model::datetime")]
    pub created_at: NaiveDateTime,
}
