//! Test helper module for entitlement-service integration tests.
//!
//! Apps run over the in-memory store by default. PostgreSQL tests opt in
//! through `TEST_DATABASE_URL` and get their own schema.

#![allow(dead_code)]

use entitlement_service::config::EntitlementConfig;
use entitlement_service::grpc::proto::entitlement_service_client::EntitlementServiceClient;
use entitlement_service::grpc::proto::{CreatePlanRequest, ListPlansRequest, SubscriptionPlan};
use entitlement_service::services::{init_metrics, Database, EntitlementStore, InMemoryStore};
use entitlement_service::startup::Application;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tonic::transport::Channel;

// Counter for unique schema names
static SCHEMA_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Database URL for PostgreSQL tests, if configured.
pub fn test_database_url() -> Option<String> {
    std::env::var("TEST_DATABASE_URL").ok()
}

fn unique_schema_name() -> String {
    let counter = SCHEMA_COUNTER.fetch_add(1, Ordering::SeqCst);
    format!("test_entitlement_{}_{}", std::process::id(), counter)
}

/// Test application wrapper for integration tests.
pub struct TestApp {
    pub http_address: String,
    pub grpc_address: String,
    pub http_port: u16,
    pub grpc_port: u16,
    /// Handle on the in-memory store, when the app runs over one.
    pub memory: Option<Arc<InMemoryStore>>,
    schema_name: Option<String>,
}

impl TestApp {
    /// Spawn a new test application over a fresh in-memory store.
    pub async fn spawn() -> Self {
        let memory = Arc::new(InMemoryStore::new());
        let mut app = Self::spawn_with_store(memory.clone()).await;
        app.memory = Some(memory);
        app
    }

    /// Spawn over PostgreSQL in an isolated schema, or `None` without `TEST_DATABASE_URL`.
    pub async fn spawn_postgres() -> Option<Self> {
        let base_url = test_database_url()?;
        let schema_name = unique_schema_name();

        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(2)
            .connect(&base_url)
            .await
            .expect("Failed to connect to test database");
        sqlx::query(&format!("DROP SCHEMA IF EXISTS {} CASCADE", schema_name))
            .execute(&pool)
            .await
            .ok();
        sqlx::query(&format!("CREATE SCHEMA {}", schema_name))
            .execute(&pool)
            .await
            .expect("Failed to create test schema");
        pool.close().await;

        let separator = if base_url.contains('?') { "&" } else { "?" };
        let url = format!(
            "{}{}options=-c search_path%3D{}",
            base_url, separator, schema_name
        );

        let db = Database::new(&url, 5, 1)
            .await
            .expect("Failed to connect to test schema");
        db.run_migrations().await.expect("Failed to run migrations");

        let mut app = Self::spawn_with_store(Arc::new(db)).await;
        app.schema_name = Some(schema_name);
        Some(app)
    }

    /// Spawn over an existing store on random ports.
    pub async fn spawn_with_store(store: Arc<dyn EntitlementStore>) -> Self {
        init_metrics();

        let app = Application::build_with_store(EntitlementConfig::in_memory(0), store)
            .await
            .expect("Failed to build test application");

        let http_port = app.http_port();
        let grpc_port = app.grpc_port();
        let http_address = format!("http://127.0.0.1:{}", http_port);
        let grpc_address = format!("http://127.0.0.1:{}", grpc_port);

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        // Wait for HTTP server to be ready by polling health endpoint
        let client = reqwest::Client::new();
        let health_url = format!("{}/health", http_address);
        for _ in 0..50 {
            if client.get(&health_url).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        }

        // Additional wait for gRPC server
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;

        TestApp {
            http_address,
            grpc_address,
            http_port,
            grpc_port,
            memory: None,
            schema_name: None,
        }
    }

    /// Create a gRPC client connected to this test app.
    pub async fn grpc_client(&self) -> EntitlementServiceClient<Channel> {
        EntitlementServiceClient::connect(self.grpc_address.clone())
            .await
            .expect("Failed to connect to gRPC server")
    }

    /// The seeded Free plan.
    pub async fn free_plan(&self) -> SubscriptionPlan {
        self.grpc_client()
            .await
            .list_plans(ListPlansRequest { active_only: false })
            .await
            .expect("ListPlans failed")
            .into_inner()
            .plans
            .into_iter()
            .find(|p| p.name == "Free")
            .expect("Free plan missing")
    }

    /// Drop the PostgreSQL schema, if any.
    pub async fn cleanup(&self) {
        let (Some(schema_name), Some(url)) = (&self.schema_name, test_database_url()) else {
            return;
        };

        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(1)
            .connect(&url)
            .await
            .ok();

        if let Some(pool) = pool {
            let _ = sqlx::query(&format!("DROP SCHEMA IF EXISTS {} CASCADE", schema_name))
                .execute(&pool)
                .await;
            pool.close().await;
        }
    }
}

/// A paid plan request with the given pool ceiling.
pub fn paid_plan(name: &str, price: &str, max_listings: i32) -> CreatePlanRequest {
    CreatePlanRequest {
        name: name.to_string(),
        description: format!("{} plan", name),
        price_monthly: price.to_string(),
        price_yearly: String::new(),
        currency: "USD".to_string(),
        max_listings,
        max_featured_listings: 2,
        max_vehicle_listings: 1,
        features: vec!["priority_support".to_string()],
        is_active: None,
        sort_order: 10,
    }
}
