use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display, AsRefStr)]
pub enum ResetStatus {
    #[strum(serialize = "PENDING")]
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct PasswordResetRequest {
    pub id: u64,
    #[schema(example = "alice")]
    pub username: String,
    pub reason: Option<String>,
    #[schema(example = "PENDING")]
    pub status: String,
    #[schema(value_type = String)]
    #[serde(with = "crate::model::datetime")]
    pub requested_at: NaiveDateTime,
    pub processed_by: Option<String>,
    #[schema(value_type = Option<String>)]
    #[serde(with = "crate::model::datetime::option")]
    pub processed_at: Option<NaiveDateTime>,
}
