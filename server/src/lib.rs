use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{HeaderValue, header},
    routing::{delete, get, post},
};
use tokio::net::TcpListener;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::{
    classify::ServerErrorsFailureClass, limit::RequestBodyLimitLayer, services::ServeDir,
    set_header::SetResponseHeaderLayer, trace::TraceLayer,
};
use tracing::Span;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub mod codec;
pub mod config;
pub mod derivatives;
pub mod error;
pub mod folder;
pub mod fs_store;
mod handlers;
pub mod image_reply;
pub mod naming;
pub mod scanner;
pub mod service;
pub mod stats;

extern crate serde;

#[cfg(test)] // <-- not needed in integration tests
extern crate rstest;

pub use crate::config::Settings;
pub use crate::error::{Error, Result};
pub use crate::handlers::ApiDoc;
pub use crate::service::ImageService;

const STATIC_CACHE_CONTROL: &str = "public, max-age=31536000, immutable";
/// Room for multipart framing and the folder field on top of the file itself.
const MULTIPART_OVERHEAD: usize = 1024 * 1024;

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
    service: Arc<ImageService>,
    started: Instant,
}

impl AppState {
    #[must_use]
    pub fn new(service: ImageService) -> Self {
        Self {
            service: Arc::new(service),
            started: Instant::now(),
        }
    }
}

/// Runs the server until Ctrl+C or SIGTERM.
///
/// # Errors
///
/// Fails when the upload directory cannot be created or the port cannot be bound.
pub async fn run() -> io::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "imgstore=debug,server=debug,tower_http=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Settings::from_env();
    tokio::fs::create_dir_all(&settings.upload_dir).await?;

    let socket = SocketAddr::from(([0, 0, 0, 0], settings.port));
    tracing::info!("listening on {socket}");
    tracing::info!("public url: {}", settings.public_url);
    tracing::info!("upload directory: {}", settings.upload_dir.display());

    let app = create_routes(AppState::new(ImageService::new(settings)));
    let listener = TcpListener::bind(socket).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
}

pub fn create_routes(state: AppState) -> Router {
    let settings = state.service.settings();
    let body_limit = settings.max_file_size.saturating_add(MULTIPART_OVERHEAD);
    let uploads = ServiceBuilder::new()
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static(STATIC_CACHE_CONTROL),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .service(ServeDir::new(&settings.upload_dir));

    Router::new()
        .route("/health", get(handlers::health))
        .route("/upload", post(handlers::upload))
        .route(
            "/optimize/:folder/:year/:month/:filename",
            get(handlers::optimize),
        )
        .route("/api/images", get(handlers::list_images))
        .route("/api/images/*path", delete(handlers::delete_image))
        .route("/api/stats", get(handlers::get_stats))
        .route("/api-docs/openapi.json", get(handlers::openapi))
        .nest_service("/uploads", uploads)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http().on_failure(
                    |error: ServerErrorsFailureClass, _latency: Duration, _span: &Span| {
                        tracing::error!("Server error: {error}");
                    },
                ))
                .layer(DefaultBodyLimit::disable())
                .layer(RequestBodyLimitLayer::new(body_limit))
                .into_inner(),
        )
        .with_state(state)
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
            Ok(mut sig) => {
                sig.recv().await;
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
