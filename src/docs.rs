use crate::api::dashboard::{PerformanceResponse, PerformanceRow, Summary, SummaryResponse};
use crate::api::leave_request::{CreateLeave, DecisionNote, LeaveListResponse, LeaveType};
use crate::api::notifications::{NotificationListResponse, UnreadCountResponse};
use crate::api::password_reset::{ApproveReset, ResetListResponse};
use crate::api::sessions::{ActiveSessionsResponse, SessionListResponse};
use crate::api::tasks::{StatusUpdate, TaskListResponse};
use crate::error::ApiMessage;
use crate::model::leave_request::LeaveRequest;
use crate::model::notification::Notification;
use crate::model::password_reset::PasswordResetRequest;
use crate::model::session::SessionRecord;
use crate::model::task::{Task, TaskStatus};
use crate::models::{LoginReqDto, LoginResponse, MeResponse, PasswordResetReq};
use utoipa::Modify;
use utoipa::openapi::security::{ApiKey, ApiKeyValue, HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{OpenApi, openapi};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Delegation Desk API",
        version = "1.0.0",
        description = r#"
## Delegation Desk

JSON endpoints behind a task delegation and leave management web app.

### Key Features
- **Tasks**: filtered task lists, completing or shifting tasks, and a
  server-sent event stream of newly delegated work
- **Leave**: submit, approve, reject and cancel leave requests; decisions
  are mirrored to a spreadsheet
- **Password resets**: users file requests, administrators decide
- **Dashboard**: per-status counters and per-doer/department performance
- **Sessions**: tracked logins, the active-session view and account
  deactivation
- **Notifications**: per-user inbox

### Security
Log in at `/auth/login`. Send the returned token as `Authorization: Bearer`
(or rely on the `session` cookie) and the CSRF token as `X-CSRF-Token` on
every POST under `/api`.
"#,
    ),
    paths(
        crate::auth::handlers::login,
        crate::auth::handlers::request_password_reset,
        crate::auth::handlers::me,
        crate::auth::handlers::logout,

        crate::api::tasks::list_tasks,
        crate::api::tasks::update_task_status,
        crate::api::task_stream::task_stream,

        crate::api::leave_request::leave_list,
        crate::api::leave_request::get_leave,
        crate::api::leave_request::create_leave,
        crate::api::leave_request::approve_leave,
        crate::api::leave_request::reject_leave,
        crate::api::leave_request::cancel_leave,

        crate::api::password_reset::list_resets,
        crate::api::password_reset::approve_reset,
        crate::api::password_reset::reject_reset,

        crate::api::dashboard::summary,
        crate::api::dashboard::performance,

        crate::api::sessions::list_sessions,
        crate::api::sessions::active_sessions,
        crate::api::sessions::deactivate_user,

        crate::api::notifications::list_notifications,
        crate::api::notifications::unread_count,
        crate::api::notifications::mark_read,
        crate::api::notifications::mark_all_read,
        crate::api::notifications::delete_notification
    ),
    components(
        schemas(
            ApiMessage,
            LoginReqDto,
            LoginResponse,
            MeResponse,
            PasswordResetReq,
            Task,
            TaskStatus,
            TaskListResponse,
            StatusUpdate,
            LeaveRequest,
            LeaveType,
            CreateLeave,
            DecisionNote,
            LeaveListResponse,
            PasswordResetRequest,
            ApproveReset,
            ResetListResponse,
            Summary,
            SummaryResponse,
            PerformanceRow,
            PerformanceResponse,
            SessionRecord,
            SessionListResponse,
            ActiveSessionsResponse,
            Notification,
            NotificationListResponse,
            UnreadCountResponse
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Auth", description = "Login, logout and reset requests"),
        (name = "Tasks", description = "Delegated tasks and their change stream"),
        (name = "Leave", description = "Leave management APIs"),
        (name = "Password reset", description = "Administrator review of reset requests"),
        (name = "Dashboard", description = "Task counters"),
        (name = "Sessions", description = "Session tracking and account deactivation"),
        (name = "Notifications", description = "Per-user notifications"),
    )
)]
pub struct ApiDoc;

pub struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
        components.add_security_scheme(
            "csrf_token",
            SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new("X-CSRF-Token"))),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_every_route_group() {
        let doc = ApiDoc::openapi();
        let paths = &doc.paths.paths;
        for path in [
            "/auth/login",
            "/api/tasks/stream",
            "/api/leave/{leave_id}/cancel",
            "/api/password-resets/{request_id}/approve",
            "/api/dashboard/summary",
            "/api/users/{user_id}/deactivate",
            "/api/notifications/read-all",
        ] {
            assert!(paths.contains_key(path), "missing {path}");
        }
        assert!(doc.components.unwrap().security_schemes.contains_key("bearer_auth"));
    }
}
