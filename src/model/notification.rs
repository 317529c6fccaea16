use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NotificationType {
    LeaveDecision,
    PasswordReset,
    TaskUpdate,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct Notification {
    pub id: u64,
    pub user_id: u64,
    #[schema(example = "leave_decision")]
    pub notification_type: String,
    #[schema(example = "Your leave request #12 was approved")]
    pub message: String,
    pub is_read: bool,
    pub related_id: Option<u64>,
    #[schema(value_type = String)]
    #[serde(with = "crate::model::datetime")]
    pub created_at: NaiveDateTime,
}
