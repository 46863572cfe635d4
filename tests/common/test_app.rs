//! HTTP test application wrapper.
//!
//! Spins up the real axum app on a random port against the configured
//! Postgres database. Each test gets its own server, its own user, and its
//! own bearer token, namespaced by the test function name so tests can run
//! in parallel and retries start from a clean slate.

use axum::Router;
use reqwest::Client;
use secrecy::ExposeSecret;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::net::TcpListener;
use uuid::Uuid;

use docuchat::middleware::auth::StaticTokenAuthenticator;
use docuchat::models::conversation::{Conversation, LlmMode};
use docuchat::models::sse::SseFrame;
use docuchat::queries;
use docuchat::services::decoder::PlainTextDecoder;
use docuchat::services::export::TranscriptRenderer;
use docuchat::services::llm::router::LlmRouter;
use docuchat::{AppState, Config, DbPool, create_api_router, load_config};

/// Configuration options for TestApp.
pub struct TestAppOptions {
    /// Replacement provider router (scripted providers for chat tests)
    pub llm: Option<Arc<LlmRouter>>,
    /// Override for the per-conversation lock timeout
    pub conversation_timeout_secs: Option<u64>,
}

impl Default for TestAppOptions {
    fn default() -> Self {
        Self {
            llm: None,
            conversation_timeout_secs: None,
        }
    }
}

pub struct TestApp {
    /// Server base URL (e.g., "http://127.0.0.1:54321")
    pub address: String,
    /// HTTP client for making requests
    pub client: Client,
    /// Application config as the server sees it
    pub config: Config,
    /// Database pool shared with the server
    pub pool: DbPool,
    /// Application state (for reaching the arbiter etc. in assertions)
    pub state: AppState,
    /// The test user every request authenticates as
    pub user_id: i64,
    /// Bearer token mapped to `user_id`
    pub token: String,
}

impl TestApp {
    /// Create a new HTTP test app with default options.
    ///
    /// # Important
    /// Always pass the test function name as `test_name`; it namespaces the
    /// test user's email so parallel tests and retries stay isolated.
    pub async fn new(test_name: &str) -> Self {
        Self::with_options(test_name, TestAppOptions::default()).await
    }

    pub async fn with_options(test_name: &str, options: TestAppOptions) -> Self {
        let mut config = load_config().expect("Failed to load config");
        if let Some(timeout) = options.conversation_timeout_secs {
            config.locks.conversation_timeout_secs = timeout;
        }

        let pool = DbPool::connect(config.database.connection_string().expose_secret())
            .await
            .expect("Failed to connect to database");

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .expect("Failed to run migrations");

        // Clean up leftovers from earlier runs of this test; conversations
        // and everything they own cascade from the user row.
        sqlx::query("DELETE FROM users WHERE email LIKE $1")
            .bind(format!("test_{test_name}_%"))
            .execute(&pool)
            .await
            .expect("Failed to clean up test data");

        let email = format!("test_{test_name}_{}@example.com", Uuid::now_v7());
        let (user_id,): (i64,) =
            sqlx::query_as("INSERT INTO users (email) VALUES ($1) RETURNING id")
                .bind(&email)
                .fetch_one(&pool)
                .await
                .expect("Failed to create test user");

        let token = format!("test-token-{}", Uuid::now_v7());
        let mut tokens = HashMap::new();
        tokens.insert(token.clone(), user_id);

        let mut state = AppState::new(
            pool.clone(),
            config.clone(),
            Arc::new(PlainTextDecoder),
            Arc::new(StaticTokenAuthenticator::new(tokens)),
            Arc::new(TranscriptRenderer),
        );
        if let Some(llm) = options.llm {
            state = state.with_llm_router(llm);
        }

        let api_routes = create_api_router(state.clone());
        let app = Router::new()
            .nest("/api/v1", api_routes)
            .with_state(state.clone());

        // Port 0 tells the OS to assign an available port.
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind random port");
        let port = listener.local_addr().expect("listener address").port();
        let address = format!("http://127.0.0.1:{port}");

        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("server failed");
        });

        // Give the server time to start
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            address,
            client,
            config,
            pool,
            state,
            user_id,
            token,
        }
    }

    /// Get a database connection
    pub async fn get_connection(&self) -> sqlx::pool::PoolConnection<sqlx::Postgres> {
        self.pool
            .acquire()
            .await
            .expect("Failed to acquire connection")
    }

    /// Get the full URL for an API endpoint
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.address, path)
    }

    /// Authenticated JSON POST.
    pub async fn post_json(&self, path: &str, body: &serde_json::Value) -> reqwest::Response {
        self.client
            .post(self.url(path))
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await
            .expect("request failed")
    }

    /// POSTs to `/chat/stream` and returns the parsed SSE frames once the
    /// stream completes.
    pub async fn chat_stream_frames(&self, body: &serde_json::Value) -> Vec<SseFrame> {
        let response = self.post_json("/api/v1/chat/stream", body).await;
        assert_eq!(response.status(), 200, "stream endpoint should accept");
        let text = response.text().await.expect("stream body");
        parse_sse_frames(&text)
    }

    /// Creates a conversation owned by the test user, bypassing upload.
    pub async fn create_conversation(&self, title: &str, llm_mode: LlmMode) -> Conversation {
        let mut conn = self.get_connection().await;
        queries::conversations::insert_conversation(&mut conn, self.user_id, title, llm_mode, "custom")
            .await
            .expect("Failed to create conversation")
    }

    /// Creates a document with `chunk_count` sequential chunks, each
    /// containing an identifiable `chunk body {i}` marker.
    pub async fn seed_chunked_document(
        &self,
        conversation_id: i64,
        filename: &str,
        chunk_count: usize,
    ) -> i64 {
        let mut conn = self.get_connection().await;
        let document = queries::documents::insert_document(
            &mut conn,
            conversation_id,
            filename,
            None,
            docuchat::models::document::DocumentKind::File,
        )
        .await
        .expect("Failed to create document");

        for i in 0..chunk_count {
            let content = format!(
                "chunk body {i} :: section text covering topic {i} with enough filler to count"
            );
            let metadata = serde_json::json!({
                "source": filename,
                "chunk_index": i,
                "chunk_id": i,
                "type": "document",
            });
            queries::chunks::insert_chunk(
                &mut conn,
                conversation_id,
                document.id,
                i as i32,
                &content,
                &metadata,
            )
            .await
            .expect("Failed to insert chunk");
        }

        document.id
    }
}

/// Parses `data: <json>` SSE events out of a complete response body,
/// ignoring keep-alive comments.
pub fn parse_sse_frames(body: &str) -> Vec<SseFrame> {
    body.lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .filter_map(|data| serde_json::from_str(data.trim()).ok())
        .collect()
}
