use crate::auth::auth::AuthUser;
use crate::auth::jwt::verify_token;
use crate::auth::session::SessionStore;
use crate::config::Config;
use crate::error::AppError;
use actix_web::{
    Error, HttpMessage, HttpRequest, ResponseError,
    body::BoxBody,
    dev::{ServiceRequest, ServiceResponse},
    http::Method,
    middleware::Next,
    web::Data,
};
use sqlx::MySqlPool;
use tracing::{debug, warn};

pub const SESSION_COOKIE: &str = "session";
pub const CSRF_HEADER: &str = "X-CSRF-Token";

/// Bearer header first, then the session cookie (EventSource cannot send
/// headers).
pub fn session_token(req: &HttpRequest) -> Option<String> {
    let from_header = req
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::to_string);

    from_header.or_else(|| req.cookie(SESSION_COOKIE).map(|c| c.value().to_string()))
}

fn is_mutation(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH | Method::DELETE)
}

fn reject(req: ServiceRequest, err: AppError) -> Result<ServiceResponse<BoxBody>, Error> {
    Ok(req.into_response(err.error_response()))
}

pub async fn session_gate(
    req: ServiceRequest,
    next: Next<BoxBody>,
) -> Result<ServiceResponse<BoxBody>, Error> {
    let (Some(config), Some(store), Some(pool)) = (
        req.app_data::<Data<Config>>().cloned(),
        req.app_data::<Data<SessionStore>>().cloned(),
        req.app_data::<Data<MySqlPool>>().cloned(),
    ) else {
        return reject(req, AppError::Internal("App state missing".to_string()));
    };

    let Some(token) = session_token(req.request()) else {
        return reject(req, AppError::Unauthorized("Not logged in".to_string()));
    };

    let claims = match verify_token(&token, &config.jwt_secret) {
        Ok(c) => c,
        Err(e) => {
            debug!(error = %e, "Rejected session token");
            return reject(req, AppError::Unauthorized("Invalid or expired session".to_string()));
        }
    };

    let state = match store.resolve(pool.get_ref(), &claims.sid).await {
        Ok(Some(state)) => state,
        Ok(None) => {
            return reject(req, AppError::Unauthorized("Session has ended".to_string()));
        }
        Err(e) => return reject(req, AppError::from(e)),
    };

    if is_mutation(req.method()) {
        let presented = req
            .headers()
            .get(CSRF_HEADER)
            .and_then(|h| h.to_str().ok())
            .unwrap_or_default();

        if presented.is_empty() || presented != state.csrf_token {
            warn!(user_id = state.user_id, path = %req.path(), "CSRF token mismatch");
            return reject(req, AppError::forbidden("Invalid CSRF token"));
        }
    }

    req.extensions_mut().insert(AuthUser::from(state));

    next.call(req).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::auth::RequestContext;
    use crate::auth::jwt::generate_session_token;
    use crate::auth::session::SessionState;
    use crate::model::role::Role;
    use actix_web::{App, HttpResponse, http::StatusCode, middleware::from_fn, test, web};
    use std::time::Duration;

    async fn whoami(ctx: RequestContext) -> HttpResponse {
        HttpResponse::Ok().body(ctx.user.username)
    }

    async fn fixtures() -> (Data<Config>, Data<SessionStore>, Data<MySqlPool>, String) {
        let config = Config::for_tests();
        let store = SessionStore::new(Duration::from_secs(60));
        store
            .remember(SessionState {
                session_id: "sid-1".into(),
                user_id: 9,
                username: "alice".into(),
                role: Role::Doer,
                department_id: None,
                csrf_token: "csrf-1".into(),
            })
            .await;
        let token =
            generate_session_token(9, "alice".into(), "doer", "sid-1", &config.jwt_secret, 60)
                .unwrap();
        let pool = MySqlPool::connect_lazy(&config.database_url).unwrap();
        (Data::new(config), Data::new(store), Data::new(pool), token)
    }

    macro_rules! gated_app {
        ($config:expr, $store:expr, $pool:expr) => {
            test::init_service(
                App::new()
                    .app_data($config)
                    .app_data($store)
                    .app_data($pool)
                    .service(
                        web::scope("/api")
                            .wrap(from_fn(session_gate))
                            .route("/me", web::get().to(whoami))
                            .route("/me", web::post().to(whoami)),
                    ),
            )
            .await
        };
    }

    #[actix_web::test]
    async fn missing_token_is_401_json() {
        let (config, store, pool, _) = fixtures().await;
        let app = gated_app!(config, store, pool);
        let resp = test::call_service(&app, test::TestRequest::get().uri("/api/me").to_request()).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["success"], false);
    }

    #[actix_web::test]
    async fn bearer_or_cookie_authenticates_reads() {
        let (config, store, pool, token) = fixtures().await;
        let app = gated_app!(config, store, pool);

        let req = test::TestRequest::get()
            .uri("/api/me")
            .insert_header(("Authorization", format!("Bearer {token}")))
            .to_request();
        let body = test::call_and_read_body(&app, req).await;
        assert_eq!(&body[..], b"alice");

        let req = test::TestRequest::get()
            .uri("/api/me")
            .cookie(actix_web::cookie::Cookie::new(SESSION_COOKIE, token))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[actix_web::test]
    async fn mutations_require_matching_csrf_token() {
        let (config, store, pool, token) = fixtures().await;
        let app = gated_app!(config, store, pool);

        let req = test::TestRequest::post()
            .uri("/api/me")
            .insert_header(("Authorization", format!("Bearer {token}")))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        let req = test::TestRequest::post()
            .uri("/api/me")
            .insert_header(("Authorization", format!("Bearer {token}")))
            .insert_header((CSRF_HEADER, "wrong"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        let req = test::TestRequest::post()
            .uri("/api/me")
            .insert_header(("Authorization", format!("Bearer {token}")))
            .insert_header((CSRF_HEADER, "csrf-1"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[actix_web::test]
    async fn forged_token_is_rejected() {
        let (config, store, pool, _) = fixtures().await;
        let app = gated_app!(config, store, pool);
        let forged = generate_session_token(1, "mallory".into(), "admin", "sid-1", "guess", 60).unwrap();
        let req = test::TestRequest::get()
            .uri("/api/me")
            .insert_header(("Authorization", format!("Bearer {forged}")))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }
}
