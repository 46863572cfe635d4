pub mod config;
pub mod database;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod queries;
pub mod services;
pub mod state;

pub use config::Config;
pub use database::{DbConn, DbPool};
pub use error::{Error, Result};
pub use middleware::auth::AuthenticatedUser;
pub use state::AppState;

use axum::middleware::Next;
use axum::{
    Router,
    extract::{DefaultBodyLimit, Request},
    http::HeaderName,
    middleware as axum_middleware,
    response::Response,
    routing::{delete, get, patch, post, put},
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::middleware::auth::{StaticTokenAuthenticator, auth_middleware};
use crate::services::decoder::PlainTextDecoder;
use crate::services::export::TranscriptRenderer;

/// Load configuration from environment variables
pub fn load_config() -> Result<Config> {
    Ok(Config::load()?)
}

/// Initialize tracing subscriber with environment filter
///
/// Reads the RUST_LOG environment variable to set the log level and
/// defaults to "info" when it is not set.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();
}

/// Middleware to add request ID to response headers
async fn request_id_middleware(mut req: Request, next: Next) -> Response {
    let request_id = req
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| {
            let id = Uuid::now_v7().to_string();
            if let Ok(value) = id.parse() {
                req.headers_mut()
                    .insert(HeaderName::from_static("x-request-id"), value);
            }
            id
        });

    let mut response = next.run(req).await;
    if let Ok(value) = request_id.parse() {
        response
            .headers_mut()
            .insert(HeaderName::from_static("x-request-id"), value);
    }

    response
}

/// Create API v1 routes
///
/// Everything except `/health` sits behind the bearer-token middleware.
pub fn create_api_router(state: AppState) -> Router<AppState> {
    use crate::handlers::{chat, conversations, documents, export, health, messages, study};

    let protected = Router::new()
        .route("/upload", post(documents::upload))
        .route("/chat", post(chat::chat))
        .route("/chat/stream", post(chat::chat_stream))
        .route("/download", post(export::download_chat))
        .route("/conversations", get(conversations::list_conversations))
        .route("/conversations/{id}", get(conversations::get_conversation))
        .route(
            "/conversations/{id}",
            delete(conversations::delete_conversation),
        )
        .route(
            "/conversations/{id}/documents",
            post(documents::add_documents),
        )
        .route(
            "/conversations/{id}/documents/{doc_id}",
            delete(conversations::delete_document),
        )
        .route(
            "/conversations/{id}/documents/{doc_id}/toggle",
            patch(conversations::toggle_document),
        )
        .route("/conversations/{id}/notes", post(conversations::create_note))
        .route(
            "/conversations/{id}/notes/{note_id}",
            put(conversations::update_note),
        )
        .route(
            "/conversations/{id}/notes/{note_id}/convert",
            post(conversations::convert_note),
        )
        .route(
            "/conversations/{id}/flashcards",
            get(study::list_flashcards).delete(study::delete_all_flashcards),
        )
        .route(
            "/conversations/{id}/flashcards/generate",
            post(study::generate_flashcards),
        )
        .route(
            "/conversations/{id}/flashcards/{flashcard_id}",
            delete(study::delete_flashcard),
        )
        .route(
            "/conversations/{id}/mindmap",
            get(study::get_mindmap).delete(study::delete_mindmap),
        )
        .route(
            "/conversations/{id}/mindmap/generate",
            post(study::generate_mindmap),
        )
        .route("/messages/{id}", post(messages::edit_message))
        .route("/messages/{id}", delete(messages::delete_message))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .layer(DefaultBodyLimit::max(
            state.config.upload.max_file_size_bytes * 2,
        ));

    Router::new()
        .route("/health", get(health::health_check))
        .merge(protected)
}

/// Start the Axum API server
///
/// Connects the database pool, applies migrations, builds the application
/// state, and serves until CTRL+C.
pub async fn run_api_server(config: Config) -> Result<()> {
    use secrecy::ExposeSecret;

    let pool = DbPool::connect(config.database.connection_string().expose_secret())
        .await
        .map_err(|e| Error::Internal(format!("Failed to connect to database: {}", e)))?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| Error::Internal(format!("Failed to run migrations: {}", e)))?;

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let app_state = AppState::new(
        pool,
        config,
        Arc::new(PlainTextDecoder),
        Arc::new(StaticTokenAuthenticator::from_env()),
        Arc::new(TranscriptRenderer),
    );

    let api_routes = create_api_router(app_state.clone());
    let app = Router::new()
        .nest("/api/v1", api_routes)
        .layer(
            ServiceBuilder::new()
                .layer(axum_middleware::from_fn(request_id_middleware))
                .layer(
                    TraceLayer::new_for_http().make_span_with(|request: &Request<_>| {
                        let request_id = request
                            .headers()
                            .get("x-request-id")
                            .and_then(|v| v.to_str().ok())
                            .unwrap_or("unknown");

                        tracing::info_span!(
                            "http_request",
                            method = %request.method(),
                            path = %request.uri().path(),
                            request_id = %request_id,
                        )
                    }),
                )
                .layer(SetResponseHeaderLayer::if_not_present(
                    axum::http::header::X_CONTENT_TYPE_OPTIONS,
                    axum::http::HeaderValue::from_static("nosniff"),
                ))
                .layer(
                    CorsLayer::new()
                        .allow_origin(Any)
                        .allow_methods(Any)
                        .allow_headers(Any),
                )
                .layer(CompressionLayer::new()),
        )
        .with_state(app_state);

    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("API server listening on http://{}", addr);

    let shutdown_signal = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install CTRL+C handler: {}", e);
        }
        tracing::info!("Shutdown signal received");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    Ok(())
}
