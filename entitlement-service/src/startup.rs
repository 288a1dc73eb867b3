//! Application startup and lifecycle management.

use crate::config::{EntitlementConfig, StoreBackend};
use crate::grpc::{
    proto::{entitlement_service_server::EntitlementServiceServer, FILE_DESCRIPTOR_SET},
    trace_context_interceptor, EntitlementServiceImpl,
};
use crate::services::{
    get_metrics, init_metrics, Database, EntitlementServices, EntitlementStore, InMemoryStore,
};
use axum::{
    extract::State, http::StatusCode, middleware, response::IntoResponse, routing::get, Json,
    Router,
};
use chrono::Utc;
use serde_json::json;
use service_core::error::AppError;
use service_core::middleware::metrics::metrics_middleware;
use service_core::middleware::tracing::request_id_middleware;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tonic::transport::Server as GrpcServer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: EntitlementConfig,
    pub services: EntitlementServices,
}

/// State for health check endpoints.
#[derive(Clone)]
struct HealthState {
    store: Arc<dyn EntitlementStore>,
    service_name: String,
}

/// Health check endpoint for Docker/K8s liveness probes.
async fn health_check(State(state): State<HealthState>) -> impl IntoResponse {
    match state.store.health_check().await {
        Ok(_) => {
            tracing::debug!("Health check passed");
            (
                StatusCode::OK,
                Json(json!({
                    "status": "ok",
                    "service": state.service_name,
                    "version": env!("CARGO_PKG_VERSION")
                })),
            )
        }
        Err(e) => {
            tracing::warn!(error = %e, "Health check failed - store unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "service": state.service_name,
                    "error": e.to_string()
                })),
            )
        }
    }
}

/// Readiness check endpoint for K8s readiness probes.
async fn readiness_check(State(state): State<HealthState>) -> impl IntoResponse {
    match state.store.health_check().await {
        Ok(_) => {
            tracing::debug!("Readiness check passed");
            StatusCode::OK
        }
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

/// Metrics endpoint for Prometheus scraping.
async fn metrics_handler() -> impl IntoResponse {
    let metrics = get_metrics();
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        metrics,
    )
}

/// Periodically roll lapsed subscriptions over to their next plan.
async fn run_reconciliation(services: EntitlementServices, interval_secs: u64, batch_size: i64) {
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        match services
            .subscriptions
            .reconcile_lapsed(Utc::now(), batch_size)
            .await
        {
            Ok(count) => tracing::debug!(count = count, "Reconciliation pass finished"),
            Err(e) => tracing::error!(error = %e, "Reconciliation pass failed"),
        }
    }
}

async fn bind(host: &str, port: u16, kind: &str) -> Result<TcpListener, AppError> {
    let addr: SocketAddr = format!("{}:{}", host, port).parse().map_err(|e| {
        AppError::ConfigError(anyhow::anyhow!("Invalid {} address {}:{}: {}", kind, host, port, e))
    })?;
    TcpListener::bind(addr).await.map_err(|e| {
        tracing::error!(error = %e, addr = %addr, "Failed to bind {} listener", kind);
        AppError::from(e)
    })
}

/// Application container for managing server lifecycle.
pub struct Application {
    http_port: u16,
    grpc_port: u16,
    http_listener: TcpListener,
    grpc_listener: TcpListener,
    state: AppState,
}

impl Application {
    /// Build the application with the configured store backend.
    pub async fn build(config: EntitlementConfig) -> Result<Self, AppError> {
        let store: Arc<dyn EntitlementStore> = match config.store {
            StoreBackend::Postgres => {
                let db = Database::new(
                    &config.database.url,
                    config.database.max_connections,
                    config.database.min_connections,
                )
                .await
                .map_err(|e| {
                    tracing::error!(error = %e, "Failed to connect to PostgreSQL");
                    e
                })?;

                db.run_migrations().await.map_err(|e| {
                    tracing::error!(error = %e, "Failed to run migrations");
                    e
                })?;

                Arc::new(db)
            }
            StoreBackend::Memory => {
                tracing::warn!("Using in-memory store; data is lost on restart");
                Arc::new(InMemoryStore::new())
            }
        };

        Self::build_with_store(config, store).await
    }

    /// Build the application over an already constructed store.
    pub async fn build_with_store(
        config: EntitlementConfig,
        store: Arc<dyn EntitlementStore>,
    ) -> Result<Self, AppError> {
        init_metrics();

        let services = EntitlementServices::new(store);
        let free_plan = services.plans.ensure_free_plan().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to ensure Free plan");
            AppError::from(e)
        })?;
        tracing::info!(plan_id = %free_plan.plan_id, "Free plan available");

        let state = AppState {
            config: config.clone(),
            services,
        };

        let http_listener = bind(&config.common.host, config.common.port, "HTTP").await?;
        let http_port = http_listener.local_addr()?.port();

        // gRPC listens on HTTP port + 1; an ephemeral HTTP port gets an ephemeral gRPC port.
        let grpc_requested = if config.common.port == 0 {
            0
        } else {
            config.common.port + 1
        };
        let grpc_listener = bind(&config.common.host, grpc_requested, "gRPC").await?;
        let grpc_port = grpc_listener.local_addr()?.port();

        tracing::info!(
            http_port = http_port,
            grpc_port = grpc_port,
            "Entitlement service listeners bound"
        );

        Ok(Self {
            http_port,
            grpc_port,
            http_listener,
            grpc_listener,
            state,
        })
    }

    /// Get the HTTP port the server is listening on.
    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    /// Get the gRPC port the server is listening on.
    pub fn grpc_port(&self) -> u16 {
        self.grpc_port
    }

    pub fn services(&self) -> &EntitlementServices {
        &self.state.services
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let services = self.state.services.clone();
        let config = self.state.config.clone();

        // Build minimal HTTP router (health + metrics)
        let health_state = HealthState {
            store: services.store.clone(),
            service_name: config.service_name.clone(),
        };

        let http_router = Router::new()
            .route("/health", get(health_check))
            .route("/ready", get(readiness_check))
            .route("/metrics", get(metrics_handler))
            .layer(TraceLayer::new_for_http())
            .layer(middleware::from_fn(metrics_middleware))
            .layer(middleware::from_fn(request_id_middleware))
            .with_state(health_state);

        let entitlement_service = EntitlementServiceImpl::new(services.clone());

        // gRPC health service
        let (mut health_reporter, grpc_health_service) = tonic_health::server::health_reporter();
        health_reporter
            .set_serving::<EntitlementServiceServer<EntitlementServiceImpl>>()
            .await;

        // Reflection service for debugging
        let reflection_service = tonic_reflection::server::Builder::configure()
            .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
            .build_v1()
            .map_err(|e| {
                std::io::Error::other(format!("Failed to build reflection service: {}", e))
            })?;

        // gRPC trace layer for observability
        let grpc_trace_layer = TraceLayer::new_for_grpc()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::DEBUG));

        let entitlement_service_with_interceptor = EntitlementServiceServer::with_interceptor(
            entitlement_service,
            trace_context_interceptor,
        );

        let incoming = tokio_stream::wrappers::TcpListenerStream::new(self.grpc_listener);
        let grpc_server = GrpcServer::builder()
            .layer(grpc_trace_layer)
            .add_service(grpc_health_service)
            .add_service(reflection_service)
            .add_service(entitlement_service_with_interceptor)
            .serve_with_incoming(incoming);

        let reconciler = if config.reconcile.interval_secs > 0 {
            tracing::info!(
                interval_secs = config.reconcile.interval_secs,
                batch_size = config.reconcile.batch_size,
                "Starting subscription reconciliation"
            );
            Some(tokio::spawn(run_reconciliation(
                services,
                config.reconcile.interval_secs,
                config.reconcile.batch_size,
            )))
        } else {
            None
        };

        tracing::info!(
            service = %config.service_name,
            version = env!("CARGO_PKG_VERSION"),
            http_port = self.http_port,
            grpc_port = self.grpc_port,
            "Service ready to accept connections"
        );

        // Run both servers concurrently
        let result = tokio::select! {
            result = axum::serve(self.http_listener, http_router) => {
                result.map_err(|e| {
                    tracing::error!(error = %e, "HTTP server error");
                    std::io::Error::other(format!("HTTP server error: {}", e))
                })
            }
            result = grpc_server => {
                result.map_err(|e| {
                    tracing::error!(error = %e, "gRPC server error");
                    std::io::Error::other(format!("gRPC server error: {}", e))
                })
            }
        };

        if let Some(handle) = reconciler {
            handle.abort();
        }

        result
    }
}
