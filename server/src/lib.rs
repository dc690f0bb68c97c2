#![warn(clippy::unwrap_in_result)]
#![warn(clippy::unwrap_used)]

use std::{path::PathBuf, sync::Arc};

use axum::{
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method},
    routing::{delete, get, post},
    Json, Router,
};
use serde::Serialize;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::{
    classify::ServerErrorsFailureClass,
    cors::{AllowOrigin, Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    trace::TraceLayer,
};
use tracing::Span;
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

mod auth;
mod community;
pub mod config;
pub mod domain;
pub mod error;
pub mod file_reply;
mod handlers;
mod payments;
pub mod sqlite;

#[cfg(test)] // <-- not needed in integration tests
extern crate rstest;

use crate::config::Config;
use crate::domain::Storage;
use crate::error::StartupError;
use crate::file_reply::FileReply;
use crate::sqlite::{Mode, Sqlite};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Largest accepted request body. Premium storage fits in one upload.
const MAX_BODY_BYTES: usize = 600 * 1024 * 1024;
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Shared by every handler. The database is opened per request.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<PathBuf>,
    pub config: Arc<Config>,
}

#[derive(Serialize)]
struct ServiceInfo {
    message: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
    service: &'static str,
}

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    info(title = "SimSync API", description = "Backup and sharing of Sims 4 custom content"),
    paths(
        auth::probe,
        auth::sign_up,
        auth::sign_in,
        auth::refresh,
        auth::sign_out,
        auth::verify,
        auth::get_user,
        handlers::upload_file,
        handlers::list_files,
        handlers::get_file_content,
        handlers::delete_file,
        payments::create_checkout_session,
        payments::webhook,
        community::share,
        community::files,
        community::download,
        community::rate,
        community::unshare,
    ),
    components(responses(FileReply)),
    modifiers(&SecurityAddon),
    tags(
        (name = "auth", description = "Accounts and sessions"),
        (name = "files", description = "Personal backups"),
        (name = "payments", description = "Premium subscription"),
        (name = "community", description = "Shared files"),
    )
)]
struct ApiDoc;

pub async fn run(config: Config) -> Result<(), StartupError> {
    // The binary normally installs a subscriber first; this one covers library use.
    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "server=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .try_init();

    let db = config.db_path();
    if let Some(dir) = db.parent().filter(|d| !d.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(dir).await?;
    }
    Sqlite::open(&db, Mode::ReadWrite)?.new_database()?;

    let listener = TcpListener::bind(("0.0.0.0", config.port)).await?;
    tracing::info!("listening on {}", listener.local_addr()?);

    let app = create_routes(db, config);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

fn cors_layer(origin: &str) -> Option<CorsLayer> {
    match HeaderValue::from_str(origin) {
        Ok(origin) => Some(
            CorsLayer::new()
                .allow_origin(AllowOrigin::exact(origin))
                .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
                .allow_headers(Any),
        ),
        Err(e) => {
            tracing::warn!("CORS disabled, bad origin '{origin}': {e}");
            None
        }
    }
}

pub fn create_routes(db: PathBuf, config: Config) -> Router {
    let cors = cors_layer(&config.origin);
    let state = AppState {
        db: Arc::new(db),
        config: Arc::new(config),
    };

    let api = Router::new()
        .route("/auth/test", get(auth::probe))
        .route("/auth/signup", post(auth::sign_up))
        .route("/auth/signin", post(auth::sign_in))
        .route("/auth/token", post(auth::refresh))
        .route("/auth/signout", post(auth::sign_out))
        .route("/auth/verify", get(auth::verify))
        .route("/auth/user/:id", get(auth::get_user))
        .route("/files/upload", post(handlers::upload_file))
        .route("/files/list", get(handlers::list_files))
        .route("/files/content/:id", get(handlers::get_file_content))
        .route("/files/delete/:id", delete(handlers::delete_file))
        .route(
            "/payments/create-checkout-session",
            post(payments::create_checkout_session),
        )
        .route("/payments/webhook", post(payments::webhook))
        .route("/community/share", post(community::share))
        .route("/community/files", get(community::files))
        .route("/community/:id/download", post(community::download))
        .route("/community/:id/rate", post(community::rate))
        .route("/community/:id", delete(community::unshare));

    let router = Router::new()
        .route(
            "/",
            get(|| async {
                Json(ServiceInfo {
                    message: "SimSync API is running!",
                    version: VERSION,
                })
            }),
        )
        .route(
            "/health",
            get(|| async {
                Json(Health {
                    status: "healthy",
                    service: "simsync-api",
                })
            }),
        )
        .nest("/api", api)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http().on_failure(
                    |error: ServerErrorsFailureClass, _latency: Duration, _span: &Span| {
                        tracing::error!("Server error: {error}");
                    },
                ))
                .layer(DefaultBodyLimit::disable())
                .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
                .into_inner(),
        )
        .with_state(state);

    match cors {
        Some(cors) => router.layer(cors),
        None => router,
    }
}

pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install signal handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("signal received, starting graceful shutdown");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_documents_every_route() {
        // Arrange
        let doc = ApiDoc::openapi();

        // Act
        let paths: Vec<&String> = doc.paths.paths.keys().collect();

        // Assert
        assert_eq!(paths.len(), 18);
        assert!(doc.paths.paths.contains_key("/api/community/{id}/rate"));
        assert!(doc
            .components
            .as_ref()
            .is_some_and(|c| c.security_schemes.contains_key("bearer_auth")));
    }

    #[test]
    fn bad_origin_disables_cors() {
        // Arrange

        // Act
        let layer = cors_layer("http://bad\norigin");

        // Assert
        assert!(layer.is_none());
    }
}
