use actix_web::middleware::{Logger, NormalizePath};
use actix_web::web::Data;
use actix_web::{App, HttpResponse, HttpServer, Responder, get};
use std::sync::Arc;
use std::time::Duration;

mod api;
mod auth;
mod config;
mod db;
mod docs;
mod error;
mod model;
mod models;
mod routes;
mod sheets;
mod utils;

use auth::session::SessionStore;
use config::Config;
use db::init_db;
use sheets::{DisabledSheetSync, SheetSync};

use crate::docs::ApiDoc;
use tracing::{error, info, warn};
use tracing_appender::rolling;
use utoipa::OpenApi; // ApiDoc::openapi()
use utoipa_swagger_ui::SwaggerUi;

#[get("/")]
async fn index() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}

fn startup_error(e: anyhow::Error) -> std::io::Error {
    std::io::Error::other(format!("{e:#}"))
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let config = Config::from_env().map_err(|e| {
        eprintln!("Invalid configuration: {e:#}");
        startup_error(e)
    })?;

    // Rolling daily log
    let file_appender = rolling::daily(&config.log_dir, "app.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_max_level(config.log_level)
        .with_ansi(false)
        .with_target(false) // removes module path
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .init();

    info!(addr = %config.server_addr, "Server starting...");

    let pool = init_db(&config).await.map_err(|e| {
        error!(error = %e, "Database unavailable");
        startup_error(e)
    })?;

    let store = Data::new(SessionStore::new(Duration::from_secs(config.session_ttl as u64)));

    if config.sheet_id.is_some() {
        warn!("LEAVE_SHEET_ID is set but no spreadsheet client is built in; decisions are only logged");
    }
    let sheets: Data<dyn SheetSync> = Data::from(Arc::new(DisabledSheetSync) as Arc<dyn SheetSync>);

    let server_addr = config.server_addr.clone();

    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .wrap(NormalizePath::trim())
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}") // wildcard matches JS/CSS assets
                    .url("/api-doc/openapi.json", ApiDoc::openapi()),
            )
            .app_data(Data::new(pool.clone()))
            .app_data(Data::new(config.clone()))
            .app_data(store.clone())
            .app_data(sheets.clone())
            .service(index)
            .configure(|cfg| routes::configure(cfg, config.clone()))
    })
    .bind(server_addr)?
    .run()
    .await
}
