use crate::{
    api::{dashboard, leave_request, notifications, password_reset, sessions, task_stream, tasks},
    auth::{handlers, middleware::session_gate},
    config::Config,
};
use actix_governor::{
    Governor, GovernorConfig, GovernorConfigBuilder, PeerIpKeyExtractor,
    governor::middleware::NoOpMiddleware,
};
use actix_web::{middleware::from_fn, web};
use std::sync::Arc;
use tracing::warn;

/// Per-IP limiter allowing `requests_per_min` with a burst of the same size.
fn limiter_config(requests_per_min: u32) -> GovernorConfig<PeerIpKeyExtractor, NoOpMiddleware> {
    let per_ms = if requests_per_min == 0 {
        60_000
    } else {
        (60_000 / u64::from(requests_per_min)).max(1)
    };

    GovernorConfigBuilder::default()
        .per_millisecond(per_ms)
        .burst_size(requests_per_min.max(1))
        .key_extractor(PeerIpKeyExtractor)
        .finish()
        .unwrap_or_else(|| {
            warn!(requests_per_min, "Invalid rate limit, using governor defaults");
            GovernorConfig::default()
        })
}

fn build_limiter(requests_per_min: u32) -> Governor<PeerIpKeyExtractor, NoOpMiddleware> {
    Governor::new(&limiter_config(requests_per_min))
}

pub fn configure(cfg: &mut web::ServiceConfig, config: Config) {
    let login_limiter = Arc::new(build_limiter(config.rate_login_per_min));
    let reset_limiter = Arc::new(build_limiter(config.rate_reset_per_min));
    let protected_limiter = Arc::new(build_limiter(config.rate_protected_per_min));

    // Public routes
    cfg.service(
        web::scope("/auth")
            .service(
                web::resource("/login")
                    .wrap(login_limiter)
                    .route(web::post().to(handlers::login)),
            )
            .service(
                web::resource("/password-reset")
                    .wrap(reset_limiter)
                    .route(web::post().to(handlers::request_password_reset)),
            ),
    );

    // Protected routes
    cfg.service(
        web::scope(&config.api_prefix)
            .wrap(from_fn(session_gate))
            .wrap(protected_limiter)
            .service(
                web::scope("/auth")
                    .route("/me", web::get().to(handlers::me))
                    .route("/logout", web::post().to(handlers::logout)),
            )
            .service(
                web::scope("/tasks")
                    .service(web::resource("").route(web::get().to(tasks::list_tasks)))
                    // registered before /{id} patterns
                    .service(web::resource("/stream").route(web::get().to(task_stream::task_stream)))
                    .service(
                        web::resource("/{id}/status")
                            .route(web::post().to(tasks::update_task_status)),
                    ),
            )
            .service(
                web::scope("/leave")
                    // /leave
                    .service(
                        web::resource("")
                            .route(web::get().to(leave_request::leave_list))
                            .route(web::post().to(leave_request::create_leave)),
                    )
                    // /leave/{id}
                    .service(web::resource("/{id}").route(web::get().to(leave_request::get_leave)))
                    .service(
                        web::resource("/{id}/approve")
                            .route(web::post().to(leave_request::approve_leave)),
                    )
                    .service(
                        web::resource("/{id}/reject")
                            .route(web::post().to(leave_request::reject_leave)),
                    )
                    .service(
                        web::resource("/{id}/cancel")
                            .route(web::post().to(leave_request::cancel_leave)),
                    ),
            )
            .service(
                web::scope("/password-resets")
                    .service(web::resource("").route(web::get().to(password_reset::list_resets)))
                    .service(
                        web::resource("/{id}/approve")
                            .route(web::post().to(password_reset::approve_reset)),
                    )
                    .service(
                        web::resource("/{id}/reject")
                            .route(web::post().to(password_reset::reject_reset)),
                    ),
            )
            .service(
                web::scope("/dashboard")
                    .route("/summary", web::get().to(dashboard::summary))
                    .route("/performance", web::get().to(dashboard::performance)),
            )
            .service(
                web::scope("/sessions")
                    .service(web::resource("").route(web::get().to(sessions::list_sessions)))
                    .service(web::resource("/active").route(web::get().to(sessions::active_sessions))),
            )
            .service(
                web::resource("/users/{id}/deactivate")
                    .route(web::post().to(sessions::deactivate_user)),
            )
            .service(
                web::scope("/notifications")
                    .service(
                        web::resource("").route(web::get().to(notifications::list_notifications)),
                    )
                    .service(
                        web::resource("/unread-count")
                            .route(web::get().to(notifications::unread_count)),
                    )
                    .service(
                        web::resource("/read-all")
                            .route(web::post().to(notifications::mark_all_read)),
                    )
                    .service(
                        web::resource("/{id}/read").route(web::post().to(notifications::mark_read)),
                    )
                    .service(
                        web::resource("/{id}/delete")
                            .route(web::post().to(notifications::delete_notification)),
                    ),
            ),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_rate_still_builds_a_limiter() {
        let _ = limiter_config(0);
        let _ = limiter_config(100_000);
        let _ = limiter_config(60);
    }
}
