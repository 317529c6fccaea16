use crate::{auth::session::SessionState, error::AppError, model::role::Role};
use actix_web::{FromRequest, HttpMessage, HttpRequest, dev::Payload, web::Data};
use futures::future::{Ready, ready};
use sqlx::MySqlPool;

/// Identity of the caller, placed in request extensions by the session gate.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: u64,
    pub username: String,
    pub role: Role,
    pub department_id: Option<u64>,
    pub session_id: String,
    pub csrf_token: String,
}

impl From<SessionState> for AuthUser {
    fn from(state: SessionState) -> Self {
        Self {
            user_id: state.user_id,
            username: state.username,
            role: state.role,
            department_id: state.department_id,
            session_id: state.session_id,
            csrf_token: state.csrf_token,
        }
    }
}

impl FromRequest for AuthUser {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(
            req.extensions()
                .get::<AuthUser>()
                .cloned()
                .ok_or_else(|| AppError::Unauthorized("Not logged in".to_string())),
        )
    }
}

impl AuthUser {
    pub fn require_admin(&self) -> Result<(), AppError> {
        if self.role.is_admin() {
            Ok(())
        } else {
            Err(AppError::forbidden("Admin only"))
        }
    }

    pub fn require_manager_or_admin(&self) -> Result<(), AppError> {
        if self.role.is_privileged() {
            Ok(())
        } else {
            Err(AppError::forbidden("Manager/Admin only"))
        }
    }
}

/// Request-scoped handle bundling the caller's identity with the store.
pub struct RequestContext {
    pub user: AuthUser,
    pub pool: MySqlPool,
}

impl FromRequest for RequestContext {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, payload: &mut Payload) -> Self::Future {
        let pool = match req.app_data::<Data<MySqlPool>>() {
            Some(p) => p.get_ref().clone(),
            None => return ready(Err(AppError::Internal("Store missing".to_string()))),
        };

        let user = match AuthUser::from_request(req, payload).into_inner() {
            Ok(u) => u,
            Err(e) => return ready(Err(e)),
        };

        ready(Ok(RequestContext { user, pool }))
    }
}
