pub mod dashboard;
pub mod leave_request;
pub mod notifications;
pub mod password_reset;
pub mod sessions;
pub mod task_stream;
pub mod tasks;
