//! # Server Configuration
//!
//! Shared application state, the Axum router and the HTTP server lifecycle.

use std::sync::Arc;

use axum::{
    Router, middleware,
    routing::{get, post},
};
use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use utoipa::{
    Modify, OpenApi,
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};
use utoipa_swagger_ui::SwaggerUi;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::handlers::{self, callback, integrations, sync, webhooks};
use crate::integrations::{IntegrationError, Registry};
use crate::oauth_flow::OAuthFlow;
use crate::repositories::UserIntegrationRepository;
use crate::telemetry;
use crate::token_guard::{IntegrationSession, RefreshLocks};

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: Arc<AppConfig>,
    pub registry: Arc<Registry>,
    /// Present when per-connection refresh serialization is enabled
    pub refresh_locks: Option<RefreshLocks>,
}

impl AppState {
    pub fn new(db: DatabaseConnection, config: AppConfig, registry: Registry) -> Self {
        let refresh_locks = config
            .token_refresh_single_flight
            .then(RefreshLocks::new);

        Self {
            db: Arc::new(db),
            config: Arc::new(config),
            registry: Arc::new(registry),
            refresh_locks,
        }
    }

    pub fn repo(&self) -> UserIntegrationRepository {
        UserIntegrationRepository::new(Arc::clone(&self.db))
    }

    pub fn oauth_flow(&self) -> OAuthFlow {
        OAuthFlow::new(self.repo())
    }

    /// Resolves `provider` and opens a session on the user's latest completed connection.
    pub async fn session(
        &self,
        user_id: Uuid,
        provider: &str,
    ) -> Result<IntegrationSession, IntegrationError> {
        let provider = self.registry.resolve(provider)?;
        let session = IntegrationSession::for_user(provider, self.repo(), user_id).await?;
        Ok(session.with_refresh_locks(self.refresh_locks.clone()))
    }
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/healthz", get(handlers::healthz))
        .route("/integrations", get(integrations::list_apps))
        .route("/integrations/connected", get(integrations::list_connected))
        .route("/integrations/callback/fitbit", get(callback::fitbit_callback))
        .route(
            "/integrations/callback/{provider}/oauth",
            get(callback::oauth_callback),
        )
        .route("/integrations/{provider}/connect", get(integrations::connect))
        .route(
            "/integrations/{provider}/activities",
            get(integrations::list_activities),
        )
        .route(
            "/integrations/{provider}/activities/{activity_ref}",
            get(integrations::activity_details),
        )
        .route(
            "/integrations/{provider}/webhook",
            post(webhooks::receive_webhook),
        )
        .route("/sync", post(sync::sync_activity))
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
        .layer(middleware::from_fn(telemetry::trace_id_middleware))
        .layer(TraceLayer::new_for_http())
}

/// Serves `state` until `shutdown` is cancelled.
pub async fn run_server(state: AppState, shutdown: CancellationToken) -> anyhow::Result<()> {
    let addr = state.config.bind_addr()?;
    let profile = state.config.profile.clone();
    let app = create_app(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, %profile, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

struct BearerAuthAddon;

impl Modify for BearerAuthAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::healthz,
        crate::handlers::integrations::list_apps,
        crate::handlers::integrations::list_connected,
        crate::handlers::integrations::connect,
        crate::handlers::integrations::list_activities,
        crate::handlers::integrations::activity_details,
        crate::handlers::callback::oauth_callback,
        crate::handlers::callback::fitbit_callback,
        crate::handlers::webhooks::receive_webhook,
        crate::handlers::sync::sync_activity,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::models::ProviderName,
            crate::models::ConnectionStatus,
            crate::error::ApiError,
            crate::error::ProviderError,
            crate::handlers::HealthResponse,
            crate::handlers::integrations::AppInfo,
            crate::handlers::integrations::ConnectedIntegration,
            crate::handlers::integrations::RedirectUrlResponse,
            crate::handlers::integrations::ActivitiesResponse,
            crate::handlers::webhooks::WebhookAcceptResponse,
            crate::handlers::sync::SyncRequest,
            crate::handlers::sync::SyncResponse,
        )
    ),
    modifiers(&BearerAuthAddon),
    info(
        title = "runsync API",
        description = "Connect fitness platforms and move activities between them",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;
