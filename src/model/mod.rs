pub mod datetime;
pub mod leave_request;
pub mod notification;
pub mod password_reset;
pub mod role;
pub mod session;
pub mod task;
pub mod user;
