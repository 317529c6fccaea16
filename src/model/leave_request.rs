use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

/// Stored status tags. Legacy rows may carry an empty or NULL status, which
/// is read as `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr)]
pub enum LeaveStatus {
    #[strum(serialize = "PENDING")]
    #[serde(rename = "PENDING")]
    Pending,
    Approve,
    Reject,
    Cancelled,
}

impl LeaveStatus {
    pub fn from_stored(raw: Option<&str>) -> Option<Self> {
        match raw.map(str::trim) {
            None | Some("") => Some(LeaveStatus::Pending),
            Some(s) => s.parse().ok(),
        }
    }
}

/// Row filter that only matches requests nobody has processed yet.
pub const UNPROCESSED_GUARD: &str = "(status IS NULL OR status = '' OR status = 'PENDING')";

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct LeaveRequest {
    #[schema(example = 1)]
    pub id: u64,
    #[schema(example = "alice")]
    pub employee_name: String,
    #[schema(example = "sick")]
    pub leave_type: String,
    #[schema(example = "2024-02-01", value_type = String)]
    pub start_date: NaiveDate,
    #[schema(example = "2024-02-03", value_type = String)]
    pub end_date: NaiveDate,
    pub reason: Option<String>,
    #[schema(example = "PENDING")]
    pub status: Option<String>,
    pub manager_name: Option<String>,
    pub manager_email: Option<String>,
    pub processed_by: Option<String>,
    #[schema(value_type = Option<String>)]
    #[serde(with = "crate::model::datetime::option")]
    pub processed_at: Option<NaiveDateTime>,
    #[schema(value_type = String)]
    #[serde(with = "crate::model::datetime")]
    pub created_at: NaiveDateTime,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_and_null_status_read_as_pending() {
        assert_eq!(LeaveStatus::from_stored(None), Some(LeaveStatus::Pending));
        assert_eq!(LeaveStatus::from_stored(Some("  ")), Some(LeaveStatus::Pending));
        assert_eq!(LeaveStatus::from_stored(Some("Approve")), Some(LeaveStatus::Approve));
        assert_eq!(LeaveStatus::from_stored(Some("bogus")), None);
        assert_eq!(LeaveStatus::Pending.as_ref(), "PENDING");
        assert_eq!(LeaveStatus::Reject.to_string(), "Reject");
    }
}
