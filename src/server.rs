//! # Server Configuration
//!
//! Application state, router assembly, and server startup for the
//! automations service. The public webhook routes sit behind signature
//! verification; the job triggers and credential intake sit behind operator
//! bearer auth; everything carries a request-scoped trace context.

use std::sync::Arc;

use anyhow::Context;
use axum::{
    Router,
    extract::Request,
    middleware::{self, Next},
    response::Response,
    routing::{get, post, put},
};
use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::{Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

use crate::auth;
use crate::config::AppConfig;
use crate::crypto::CryptoKey;
use crate::dispatcher::DeliveryDispatcher;
use crate::follow_gate::FollowGateScheduler;
use crate::handlers;
use crate::platforms::PlatformRegistry;
use crate::processor::EventProcessor;
use crate::telemetry::{self, TraceContext};
use crate::token_refresh::TokenRefreshService;
use crate::webhook_verification;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub config: Arc<AppConfig>,
    pub crypto_key: CryptoKey,
    pub processor: Arc<EventProcessor>,
    pub follow_gate: Arc<FollowGateScheduler>,
    pub token_refresh: Arc<TokenRefreshService>,
}

impl AppState {
    /// Build the full component graph over one shared connection pool.
    pub fn from_config(config: Arc<AppConfig>, db: DatabaseConnection) -> anyhow::Result<Self> {
        let key_bytes = config
            .crypto_key
            .clone()
            .context("crypto key not present in configuration")?;
        let crypto_key = CryptoKey::new(key_bytes).context("initializing crypto key")?;

        let registry = PlatformRegistry::from_config(&config);
        let dispatcher = Arc::new(DeliveryDispatcher::new(
            Arc::clone(&config),
            db.clone(),
            registry.clone(),
            crypto_key.clone(),
        ));
        let processor = Arc::new(EventProcessor::new(
            Arc::clone(&config),
            db.clone(),
            registry.clone(),
            Arc::clone(&dispatcher),
            crypto_key.clone(),
        ));
        let follow_gate = Arc::new(FollowGateScheduler::new(
            Arc::clone(&config),
            db.clone(),
            registry.clone(),
            Arc::clone(&dispatcher),
            crypto_key.clone(),
        ));
        let token_refresh = Arc::new(TokenRefreshService::new(
            Arc::clone(&config),
            db.clone(),
            registry,
            crypto_key.clone(),
        ));

        Ok(Self {
            db,
            config,
            crypto_key,
            processor,
            follow_gate,
            token_refresh,
        })
    }
}

/// Attach a request-scoped trace context so log lines and error responses
/// carry a correlation id.
async fn trace_context_middleware(mut request: Request, next: Next) -> Response {
    let context = TraceContext::for_request();
    request.extensions_mut().insert(context.clone());
    telemetry::with_trace_context(context, next.run(request)).await
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    let operator_routes = Router::new()
        .route(
            "/jobs/follow-gate/run",
            post(handlers::jobs::run_follow_gate),
        )
        .route(
            "/jobs/token-refresh/run",
            post(handlers::jobs::run_token_refresh),
        )
        .route(
            "/creators/{creator_id}/credentials/{platform}",
            put(handlers::credentials::connect_credential)
                .delete(handlers::credentials::disconnect_credential),
        )
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state.config),
            auth::auth_middleware,
        ));

    let webhook_routes = Router::new()
        .route(
            "/webhooks/{platform}/{creator_id}",
            get(handlers::webhooks::verify_subscription).post(handlers::webhooks::accept_event),
        )
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state.config),
            webhook_verification::webhook_verification_middleware,
        ));

    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .merge(operator_routes)
        .merge(webhook_routes)
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
        .layer(middleware::from_fn(trace_context_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Starts the server with the given configuration
pub async fn run_server(
    config: AppConfig,
    db: DatabaseConnection,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = Arc::new(config);
    let state = AppState::from_config(Arc::clone(&config), db)?;
    let app = create_app(state);

    let addr = config
        .bind_addr()
        .map_err(|e| format!("Invalid server address: {}", e))?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %addr, profile = %config.profile, "Server listening");

    let shutdown = CancellationToken::new();
    {
        let token = shutdown.clone();
        tokio::spawn(async move {
            wait_for_shutdown_signal().await;
            tracing::info!("Shutdown signal received; draining connections");
            token.cancel();
        });
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    Ok(())
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "Failed to install ctrl-c handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "Failed to install SIGTERM handler");
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// Registers the bearer scheme the protected routes document.
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};

        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
            );
        }
    }
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::health,
        crate::handlers::webhooks::verify_subscription,
        crate::handlers::webhooks::accept_event,
        crate::handlers::jobs::run_follow_gate,
        crate::handlers::jobs::run_token_refresh,
        crate::handlers::credentials::connect_credential,
        crate::handlers::credentials::disconnect_credential,
    ),
    components(schemas(
        crate::models::ServiceInfo,
        crate::error::ApiError,
        crate::handlers::webhooks::WebhookAcceptResponse,
        crate::handlers::credentials::ConnectCredentialRequest,
        crate::handlers::credentials::CredentialInfo,
        crate::follow_gate::FollowGateTickReport,
        crate::token_refresh::TokenRefreshTickReport,
    )),
    modifiers(&SecurityAddon),
    info(
        title = "Automations API",
        description = "Inbound social-event automation engine: webhook ingestion, rule matching, follow gating, and delivery dispatch",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;
