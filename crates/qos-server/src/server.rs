//! `AdminServer`: the Axum HTTP + WebSocket server.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::middleware::from_fn_with_state;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use qos_settings::{AuthSettings, CorsSettings};
use qos_store::{ConfigStore, EventSource, MetricsSource};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, info_span, warn};

use crate::admission::AdmissionLimiter;
use crate::auth::JwtAuthority;
use crate::config::ServerConfig;
use crate::cors::cors_layer;
use crate::errors::ServerError;
use crate::handlers::{apps, auth, clusters, connections, emergency, metrics, ws};
use crate::health::{self, HealthResponse};
use crate::middleware::{admission, require_auth};
use crate::realtime::SessionRegistry;
use crate::scope::RequestScopeTracker;
use crate::shutdown::ShutdownCoordinator;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Quota configuration store.
    pub store: Arc<dyn ConfigStore>,
    /// Pub/sub backend sessions subscribe to.
    pub events: Arc<dyn EventSource>,
    /// Source of system metrics snapshots.
    pub metrics: Arc<dyn MetricsSource>,
    /// Token issuer and verifier.
    pub jwt: Arc<JwtAuthority>,
    /// Admin account credentials.
    pub auth: Arc<AuthSettings>,
    /// Admission limiter; `None` when disabled.
    pub limiter: Option<Arc<AdmissionLimiter>>,
    /// Per-request cancellation scopes.
    pub scopes: RequestScopeTracker,
    /// Live realtime sessions.
    pub sessions: Arc<SessionRegistry>,
    /// Root cancellation and background tasks.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Prometheus handle for `/metrics`, when a recorder is installed.
    pub prometheus: Option<PrometheusHandle>,
    /// When the server started.
    pub start_time: Instant,
}

/// The admin server.
pub struct AdminServer {
    state: AppState,
    cors: CorsSettings,
}

impl AdminServer {
    /// Create a server over the given collaborators.
    pub fn new(
        config: ServerConfig,
        store: Arc<dyn ConfigStore>,
        events: Arc<dyn EventSource>,
        metrics: Arc<dyn MetricsSource>,
        jwt: JwtAuthority,
        auth: AuthSettings,
    ) -> Self {
        let limiter = config
            .admission
            .map(|policy| Arc::new(AdmissionLimiter::new(policy)));
        Self {
            state: AppState {
                store,
                events,
                metrics,
                jwt: Arc::new(jwt),
                auth: Arc::new(auth),
                limiter,
                scopes: RequestScopeTracker::new(),
                sessions: Arc::new(SessionRegistry::new()),
                shutdown: Arc::new(ShutdownCoordinator::new()),
                config: Arc::new(config),
                prometheus: None,
                start_time: Instant::now(),
            },
            cors: CorsSettings::default(),
        }
    }

    /// Use these CORS settings instead of the defaults.
    #[must_use]
    pub fn with_cors(mut self, cors: CorsSettings) -> Self {
        self.cors = cors;
        self
    }

    /// Serve this handle's output on `/metrics`.
    #[must_use]
    pub fn with_prometheus(mut self, handle: PrometheusHandle) -> Self {
        self.state.prometheus = Some(handle);
        self
    }

    /// Shared handler state.
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Live session registry.
    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.state.sessions
    }

    /// Shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.state.shutdown
    }

    /// Admission limiter, when enabled.
    pub fn limiter(&self) -> Option<&Arc<AdmissionLimiter>> {
        self.state.limiter.as_ref()
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.state.config
    }

    /// Build the Axum router with all routes and layers.
    pub fn router(&self) -> Router {
        let state = self.state.clone();
        let admit = from_fn_with_state(state.clone(), admission);
        let authenticate = from_fn_with_state(state.clone(), require_auth);

        let public = Router::new()
            .route("/api/v1/auth/login", post(auth::login))
            .route("/api/v1/auth/refresh", post(auth::refresh))
            .route_layer(admit.clone());

        // route_layer order: the last added runs first, so auth precedes admission
        let protected = Router::new()
            .route("/api/v1/apps", get(apps::list).post(apps::create))
            .route(
                "/api/v1/apps/{id}",
                get(apps::get).put(apps::update).delete(apps::delete),
            )
            .route("/api/v1/clusters", get(clusters::list))
            .route("/api/v1/clusters/{id}", get(clusters::get).put(clusters::update))
            .route(
                "/api/v1/connections",
                get(connections::stats).put(connections::set_limit),
            )
            .route("/api/v1/emergency", get(emergency::status))
            .route("/api/v1/emergency/activate", post(emergency::activate))
            .route("/api/v1/emergency/deactivate", post(emergency::deactivate))
            .route("/api/v1/metrics", get(metrics::system))
            .route("/api/v1/metrics/apps/{id}", get(metrics::app))
            .route("/api/v1/metrics/connections", get(connections::stats))
            .route_layer(admit)
            .route_layer(authenticate.clone());

        let realtime = Router::new()
            .route("/ws", get(ws::upgrade))
            .route_layer(authenticate);

        Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics::prometheus))
            .merge(public)
            .merge(protected)
            .merge(realtime)
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                    .layer(TraceLayer::new_for_http().make_span_with(|req: &Request<Body>| {
                        let request_id = req
                            .headers()
                            .get("x-request-id")
                            .and_then(|v| v.to_str().ok())
                            .unwrap_or("-");
                        info_span!(
                            "http",
                            method = %req.method(),
                            path = %req.uri().path(),
                            request_id = %request_id,
                        )
                    }))
                    .layer(PropagateRequestIdLayer::x_request_id())
                    .layer(CatchPanicLayer::new())
                    .layer(cors_layer(&self.cors)),
            )
            .with_state(state)
    }

    /// Bind the configured address.
    pub async fn bind(&self) -> Result<TcpListener, ServerError> {
        let addr = format!("{}:{}", self.state.config.host, self.state.config.port);
        TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })
    }

    /// Serve on `listener` until `signal` resolves, then shut down:
    /// cancel the root token, drain realtime sessions, stop accepting, and
    /// join background tasks. The whole sequence is bounded by the
    /// configured shutdown timeout.
    pub async fn serve<S>(self, listener: TcpListener, signal: S) -> Result<(), ServerError>
    where
        S: Future<Output = ()> + Send + 'static,
    {
        let state = self.state.clone();
        let config = Arc::clone(&state.config);

        if let Some(limiter) = &state.limiter {
            state.shutdown.track(
                limiter.spawn_sweeper(config.sweep_interval, state.shutdown.token().child_token()),
            );
        }

        if let Ok(addr) = listener.local_addr() {
            info!(addr = %addr, "admin server listening");
        }

        let drain_sessions = Arc::clone(&state.sessions);
        let coordinator = Arc::clone(&state.shutdown);
        let drain_timeout = config.realtime.drain_timeout;
        let graceful = async move {
            signal.await;
            info!("shutdown requested");
            coordinator.shutdown();
            let report = drain_sessions.close_all(drain_timeout).await;
            info!(
                signalled = report.signalled,
                completed = report.completed,
                "realtime sessions drained"
            );
        };

        let app = self
            .router()
            .into_make_service_with_connect_info::<SocketAddr>();
        let server = async move { axum::serve(listener, app).with_graceful_shutdown(graceful).await };

        let root = state.shutdown.token().clone();
        let shutdown_timeout = config.shutdown_timeout;
        let deadline = async move {
            root.cancelled().await;
            tokio::time::sleep(shutdown_timeout).await;
        };

        tokio::select! {
            result = server => result.map_err(ServerError::Serve)?,
            () = deadline => warn!("graceful shutdown timed out, dropping open connections"),
        }

        state.shutdown.graceful_shutdown(Some(shutdown_timeout)).await;
        info!("admin server stopped");
        Ok(())
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let probe = match tokio::time::timeout(state.config.request_timeout, state.store.ping()).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err("store ping timed out".to_string()),
    };
    let resp: HealthResponse = health::health_check(state.start_time, state.sessions.len(), probe);
    let status = if resp.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(resp))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
