use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct SessionRecord {
    #[schema(example = "9b2f5c1e-3d4a-4c8e-9f00-1a2b3c4d5e6f")]
    pub id: String,
    pub user_id: u64,
    #[schema(example = "alice")]
    pub username: String,
    #[schema(value_type = String)]
    #[serde(with = "crate::model::datetime")]
    pub login_time: NaiveDateTime,
    #[schema(value_type = Option<String>)]
    #[serde(with = "crate::model::datetime::option")]
    pub logout_time: Option<NaiveDateTime>,
    pub duration_seconds: Option<i64>,
    pub ip_address: Option<String>,
    pub device: Option<String>,
    pub is_active: bool,
}
