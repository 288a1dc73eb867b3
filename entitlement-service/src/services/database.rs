//! PostgreSQL store for entitlement-service.

use crate::models::{
    CreatePlan, ListingType, ListingUsage, MonthKey, NewSubscription, PricingConfigEntry,
    SubscriptionPlan, SubscriptionStatus, UpdatePlan, UserSubscription,
};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::store::EntitlementStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

/// Map a write on `subscription_plans`, turning a name clash into `Conflict`.
fn plan_write_error(action: &str, name: &str, e: sqlx::Error) -> AppError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            AppError::Conflict(anyhow::anyhow!("A plan named '{}' already exists", name))
        }
        _ => AppError::DatabaseError(anyhow::anyhow!("Failed to {}: {}", action, e)),
    }
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "entitlement-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }
}

#[async_trait]
impl EntitlementStore for Database {
    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["health_check"])
            .start_timer();

        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;

        timer.observe_duration();
        Ok(())
    }

    // =========================================================================
    // Plan Operations
    // =========================================================================

    #[instrument(skip(self, input), fields(name = %input.name))]
    async fn create_plan(&self, input: &CreatePlan) -> Result<SubscriptionPlan, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_plan"])
            .start_timer();

        let plan_id = Uuid::new_v4();
        let plan = sqlx::query_as::<_, SubscriptionPlan>(
            r#"
            INSERT INTO subscription_plans (plan_id, name, description, price_monthly, price_yearly, currency, max_listings, max_featured_listings, max_vehicle_listings, features, is_active, sort_order)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING plan_id, name, description, price_monthly, price_yearly, currency, max_listings, max_featured_listings, max_vehicle_listings, features, is_active, sort_order, created_utc, updated_utc
            "#,
        )
        .bind(plan_id)
        .bind(&input.name)
        .bind(&input.description)
        .bind(input.price_monthly)
        .bind(input.price_yearly)
        .bind(&input.currency)
        .bind(input.max_listings)
        .bind(input.max_featured_listings)
        .bind(input.max_vehicle_listings)
        .bind(Json(&input.features))
        .bind(input.is_active)
        .bind(input.sort_order)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| plan_write_error("create plan", &input.name, e))?;

        timer.observe_duration();
        info!(plan_id = %plan.plan_id, name = %plan.name, "Plan created");

        Ok(plan)
    }

    #[instrument(skip(self), fields(plan_id = %plan_id))]
    async fn get_plan(&self, plan_id: Uuid) -> Result<Option<SubscriptionPlan>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_plan"])
            .start_timer();

        let plan = sqlx::query_as::<_, SubscriptionPlan>(
            r#"
            SELECT plan_id, name, description, price_monthly, price_yearly, currency, max_listings, max_featured_listings, max_vehicle_listings, features, is_active, sort_order, created_utc, updated_utc
            FROM subscription_plans
            WHERE plan_id = $1
            "#,
        )
        .bind(plan_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get plan: {}", e)))?;

        timer.observe_duration();

        Ok(plan)
    }

    #[instrument(skip(self))]
    async fn get_plan_by_name(&self, name: &str) -> Result<Option<SubscriptionPlan>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_plan_by_name"])
            .start_timer();

        let plan = sqlx::query_as::<_, SubscriptionPlan>(
            r#"
            SELECT plan_id, name, description, price_monthly, price_yearly, currency, max_listings, max_featured_listings, max_vehicle_listings, features, is_active, sort_order, created_utc, updated_utc
            FROM subscription_plans
            WHERE name = $1
            "#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to get plan by name: {}", e))
        })?;

        timer.observe_duration();

        Ok(plan)
    }

    #[instrument(skip(self))]
    async fn list_plans(&self, active_only: bool) -> Result<Vec<SubscriptionPlan>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_plans"])
            .start_timer();

        let plans = sqlx::query_as::<_, SubscriptionPlan>(
            r#"
            SELECT plan_id, name, description, price_monthly, price_yearly, currency, max_listings, max_featured_listings, max_vehicle_listings, features, is_active, sort_order, created_utc, updated_utc
            FROM subscription_plans
            WHERE ($1 = FALSE OR is_active = TRUE)
            ORDER BY sort_order ASC, name ASC
            "#,
        )
        .bind(active_only)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list plans: {}", e)))?;

        timer.observe_duration();

        Ok(plans)
    }

    #[instrument(skip(self, input), fields(plan_id = %plan_id))]
    async fn update_plan(
        &self,
        plan_id: Uuid,
        input: &UpdatePlan,
    ) -> Result<Option<SubscriptionPlan>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_plan"])
            .start_timer();

        let plan = sqlx::query_as::<_, SubscriptionPlan>(
            r#"
            UPDATE subscription_plans
            SET name = COALESCE($2, name),
                description = COALESCE($3, description),
                price_monthly = COALESCE($4, price_monthly),
                price_yearly = COALESCE($5, price_yearly),
                max_listings = COALESCE($6, max_listings),
                max_featured_listings = COALESCE($7, max_featured_listings),
                max_vehicle_listings = COALESCE($8, max_vehicle_listings),
                features = COALESCE($9, features),
                is_active = COALESCE($10, is_active),
                sort_order = COALESCE($11, sort_order)
            WHERE plan_id = $1
            RETURNING plan_id, name, description, price_monthly, price_yearly, currency, max_listings, max_featured_listings, max_vehicle_listings, features, is_active, sort_order, created_utc, updated_utc
            "#,
        )
        .bind(plan_id)
        .bind(&input.name)
        .bind(&input.description)
        .bind(input.price_monthly)
        .bind(input.price_yearly)
        .bind(input.max_listings)
        .bind(input.max_featured_listings)
        .bind(input.max_vehicle_listings)
        .bind(input.features.as_ref().map(Json))
        .bind(input.is_active)
        .bind(input.sort_order)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            plan_write_error("update plan", input.name.as_deref().unwrap_or_default(), e)
        })?;

        timer.observe_duration();

        Ok(plan)
    }

    #[instrument(skip(self), fields(plan_id = %plan_id))]
    async fn delete_plan(&self, plan_id: Uuid) -> Result<bool, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["delete_plan"])
            .start_timer();

        let result = sqlx::query("DELETE FROM subscription_plans WHERE plan_id = $1")
            .bind(plan_id)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to delete plan: {}", e)))?;

        timer.observe_duration();

        let deleted = result.rows_affected() > 0;
        if deleted {
            info!(plan_id = %plan_id, "Plan deleted");
        }

        Ok(deleted)
    }

    // =========================================================================
    // Subscription Operations
    // =========================================================================

    #[instrument(skip(self), fields(user_id = %user_id))]
    async fn find_current_subscription(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<UserSubscription>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_current_subscription"])
            .start_timer();

        let subscription = sqlx::query_as::<_, UserSubscription>(
            r#"
            SELECT subscription_id, user_id, plan_id, status, current_period_start, current_period_end, cancel_at_period_end, cancelled_at, pending_plan_id, created_utc, updated_utc
            FROM user_subscriptions
            WHERE user_id = $1
              AND status IN ('active', 'cancelled', 'suspended')
              AND current_period_end >= $2
            ORDER BY created_utc DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to get current subscription: {}", e))
        })?;

        timer.observe_duration();

        Ok(subscription)
    }

    #[instrument(skip(self), fields(user_id = %user_id))]
    async fn find_latest_subscription(
        &self,
        user_id: Uuid,
    ) -> Result<Option<UserSubscription>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_latest_subscription"])
            .start_timer();

        let subscription = sqlx::query_as::<_, UserSubscription>(
            r#"
            SELECT subscription_id, user_id, plan_id, status, current_period_start, current_period_end, cancel_at_period_end, cancelled_at, pending_plan_id, created_utc, updated_utc
            FROM user_subscriptions
            WHERE user_id = $1
            ORDER BY created_utc DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to get latest subscription: {}", e))
        })?;

        timer.observe_duration();

        Ok(subscription)
    }

    #[instrument(skip(self, input), fields(user_id = %input.user_id, plan_id = %input.plan_id))]
    async fn open_subscription(
        &self,
        input: &NewSubscription,
    ) -> Result<UserSubscription, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["open_subscription"])
            .start_timer();

        let subscription_id = Uuid::new_v4();
        let inserted = sqlx::query_as::<_, UserSubscription>(
            r#"
            INSERT INTO user_subscriptions (subscription_id, user_id, plan_id, status, current_period_start, current_period_end)
            VALUES ($1, $2, $3, $6, $4, $5)
            ON CONFLICT DO NOTHING
            RETURNING subscription_id, user_id, plan_id, status, current_period_start, current_period_end, cancel_at_period_end, cancelled_at, pending_plan_id, created_utc, updated_utc
            "#,
        )
        .bind(subscription_id)
        .bind(input.user_id)
        .bind(input.plan_id)
        .bind(input.current_period_start)
        .bind(input.current_period_end)
        .bind(input.status.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to create subscription: {}", e))
        })?;

        if let Some(subscription) = inserted {
            timer.observe_duration();
            info!(subscription_id = %subscription.subscription_id, "Subscription created");
            return Ok(subscription);
        }

        // Lost the race against a concurrent insert for the same user.
        let existing = sqlx::query_as::<_, UserSubscription>(
            r#"
            SELECT subscription_id, user_id, plan_id, status, current_period_start, current_period_end, cancel_at_period_end, cancelled_at, pending_plan_id, created_utc, updated_utc
            FROM user_subscriptions
            WHERE user_id = $1 AND status IN ('active', 'cancelled', 'suspended')
            ORDER BY created_utc DESC
            LIMIT 1
            "#,
        )
        .bind(input.user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to get open subscription: {}", e))
        })?;

        timer.observe_duration();

        existing.ok_or_else(|| {
            AppError::DatabaseError(anyhow::anyhow!(
                "Subscription insert conflicted but no open subscription exists for user {}",
                input.user_id
            ))
        })
    }

    #[instrument(skip(self), fields(subscription_id = %subscription_id))]
    async fn expire_subscription(
        &self,
        subscription_id: Uuid,
    ) -> Result<Option<UserSubscription>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["expire_subscription"])
            .start_timer();

        let subscription = sqlx::query_as::<_, UserSubscription>(
            r#"
            UPDATE user_subscriptions
            SET status = 'expired'
            WHERE subscription_id = $1 AND status IN ('active', 'cancelled', 'suspended')
            RETURNING subscription_id, user_id, plan_id, status, current_period_start, current_period_end, cancel_at_period_end, cancelled_at, pending_plan_id, created_utc, updated_utc
            "#,
        )
        .bind(subscription_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to expire subscription: {}", e))
        })?;

        timer.observe_duration();

        Ok(subscription)
    }

    #[instrument(skip(self), fields(subscription_id = %subscription_id, plan_id = %plan_id))]
    async fn change_subscription_plan(
        &self,
        subscription_id: Uuid,
        plan_id: Uuid,
    ) -> Result<Option<UserSubscription>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["change_subscription_plan"])
            .start_timer();

        let subscription = sqlx::query_as::<_, UserSubscription>(
            r#"
            UPDATE user_subscriptions
            SET plan_id = $2,
                status = 'active',
                cancel_at_period_end = FALSE,
                cancelled_at = NULL,
                pending_plan_id = NULL
            WHERE subscription_id = $1 AND status IN ('active', 'cancelled')
            RETURNING subscription_id, user_id, plan_id, status, current_period_start, current_period_end, cancel_at_period_end, cancelled_at, pending_plan_id, created_utc, updated_utc
            "#,
        )
        .bind(subscription_id)
        .bind(plan_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to change plan: {}", e)))?;

        timer.observe_duration();

        Ok(subscription)
    }

    #[instrument(skip(self), fields(subscription_id = %subscription_id))]
    async fn schedule_cancellation(
        &self,
        subscription_id: Uuid,
        cancelled_at: DateTime<Utc>,
        pending_plan_id: Option<Uuid>,
    ) -> Result<Option<UserSubscription>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["schedule_cancellation"])
            .start_timer();

        let subscription = sqlx::query_as::<_, UserSubscription>(
            r#"
            UPDATE user_subscriptions
            SET status = 'cancelled',
                cancel_at_period_end = TRUE,
                cancelled_at = $2,
                pending_plan_id = $3
            WHERE subscription_id = $1 AND status = 'active'
            RETURNING subscription_id, user_id, plan_id, status, current_period_start, current_period_end, cancel_at_period_end, cancelled_at, pending_plan_id, created_utc, updated_utc
            "#,
        )
        .bind(subscription_id)
        .bind(cancelled_at)
        .bind(pending_plan_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to cancel subscription: {}", e))
        })?;

        timer.observe_duration();

        Ok(subscription)
    }

    #[instrument(skip(self), fields(subscription_id = %subscription_id))]
    async fn reactivate_subscription(
        &self,
        subscription_id: Uuid,
    ) -> Result<Option<UserSubscription>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["reactivate_subscription"])
            .start_timer();

        let subscription = sqlx::query_as::<_, UserSubscription>(
            r#"
            UPDATE user_subscriptions
            SET status = 'active',
                cancel_at_period_end = FALSE,
                cancelled_at = NULL,
                pending_plan_id = NULL
            WHERE subscription_id = $1 AND status = 'cancelled'
            RETURNING subscription_id, user_id, plan_id, status, current_period_start, current_period_end, cancel_at_period_end, cancelled_at, pending_plan_id, created_utc, updated_utc
            "#,
        )
        .bind(subscription_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to reactivate subscription: {}", e))
        })?;

        timer.observe_duration();

        Ok(subscription)
    }

    #[instrument(skip(self), fields(subscription_id = %subscription_id, status = %status.as_str()))]
    async fn update_subscription_status(
        &self,
        subscription_id: Uuid,
        status: SubscriptionStatus,
    ) -> Result<Option<UserSubscription>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_subscription_status"])
            .start_timer();

        let subscription = sqlx::query_as::<_, UserSubscription>(
            r#"
            UPDATE user_subscriptions
            SET status = $2
            WHERE subscription_id = $1 AND status IN ('active', 'cancelled', 'suspended')
            RETURNING subscription_id, user_id, plan_id, status, current_period_start, current_period_end, cancel_at_period_end, cancelled_at, pending_plan_id, created_utc, updated_utc
            "#,
        )
        .bind(subscription_id)
        .bind(status.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to update subscription status: {}", e))
        })?;

        timer.observe_duration();

        Ok(subscription)
    }

    #[instrument(skip(self))]
    async fn list_lapsed_subscriptions(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<UserSubscription>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_lapsed_subscriptions"])
            .start_timer();

        let subscriptions = sqlx::query_as::<_, UserSubscription>(
            r#"
            SELECT subscription_id, user_id, plan_id, status, current_period_start, current_period_end, cancel_at_period_end, cancelled_at, pending_plan_id, created_utc, updated_utc
            FROM user_subscriptions
            WHERE status IN ('active', 'cancelled')
              AND current_period_end < $1
            ORDER BY current_period_end ASC
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to list lapsed subscriptions: {}", e))
        })?;

        timer.observe_duration();

        Ok(subscriptions)
    }

    // =========================================================================
    // Usage Operations
    // =========================================================================

    #[instrument(skip(self), fields(user_id = %user_id, month = %month))]
    async fn get_usage(
        &self,
        user_id: Uuid,
        month: &MonthKey,
    ) -> Result<Option<ListingUsage>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_usage"])
            .start_timer();

        let usage = sqlx::query_as::<_, ListingUsage>(
            r#"
            SELECT user_id, month_year, free_listings_used, featured_listings_used, vehicle_listings_used
            FROM user_listing_usage
            WHERE user_id = $1 AND month_year = $2
            "#,
        )
        .bind(user_id)
        .bind(month.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get usage: {}", e)))?;

        timer.observe_duration();

        Ok(usage)
    }

    #[instrument(skip(self), fields(user_id = %user_id, month = %month, listing_type = %listing_type))]
    async fn increment_usage(
        &self,
        user_id: Uuid,
        month: &MonthKey,
        listing_type: ListingType,
    ) -> Result<ListingUsage, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["increment_usage"])
            .start_timer();

        let (free, featured, vehicle) = listing_type.ledger_increments();

        // Single statement so concurrent increments on the same row serialise
        // on the row lock.
        let usage = sqlx::query_as::<_, ListingUsage>(
            r#"
            INSERT INTO user_listing_usage (user_id, month_year, free_listings_used, featured_listings_used, vehicle_listings_used)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (user_id, month_year) DO UPDATE
            SET free_listings_used = user_listing_usage.free_listings_used + EXCLUDED.free_listings_used,
                featured_listings_used = user_listing_usage.featured_listings_used + EXCLUDED.featured_listings_used,
                vehicle_listings_used = user_listing_usage.vehicle_listings_used + EXCLUDED.vehicle_listings_used,
                updated_utc = NOW()
            RETURNING user_id, month_year, free_listings_used, featured_listings_used, vehicle_listings_used
            "#,
        )
        .bind(user_id)
        .bind(month.as_str())
        .bind(free)
        .bind(featured)
        .bind(vehicle)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to record usage: {}", e)))?;

        timer.observe_duration();

        Ok(usage)
    }

    // =========================================================================
    // Pricing Operations
    // =========================================================================

    #[instrument(skip(self))]
    async fn get_pricing_entry(&self, key: &str) -> Result<Option<PricingConfigEntry>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_pricing_entry"])
            .start_timer();

        let entry = sqlx::query_as::<_, PricingConfigEntry>(
            r#"
            SELECT config_key, config_value, is_active, updated_utc
            FROM pricing_config
            WHERE config_key = $1
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to get pricing config: {}", e))
        })?;

        timer.observe_duration();

        Ok(entry)
    }

    #[instrument(skip(self))]
    async fn list_pricing_entries(&self) -> Result<Vec<PricingConfigEntry>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_pricing_entries"])
            .start_timer();

        let entries = sqlx::query_as::<_, PricingConfigEntry>(
            r#"
            SELECT config_key, config_value, is_active, updated_utc
            FROM pricing_config
            ORDER BY config_key
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to list pricing config: {}", e))
        })?;

        timer.observe_duration();

        Ok(entries)
    }

    #[instrument(skip(self, value))]
    async fn upsert_pricing_entry(
        &self,
        key: &str,
        value: &serde_json::Value,
    ) -> Result<PricingConfigEntry, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["upsert_pricing_entry"])
            .start_timer();

        let entry = sqlx::query_as::<_, PricingConfigEntry>(
            r#"
            INSERT INTO pricing_config (config_key, config_value, is_active)
            VALUES ($1, $2, TRUE)
            ON CONFLICT (config_key) DO UPDATE
            SET config_value = EXCLUDED.config_value,
                is_active = TRUE
            RETURNING config_key, config_value, is_active, updated_utc
            "#,
        )
        .bind(key)
        .bind(value)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to set pricing config: {}", e))
        })?;

        timer.observe_duration();
        info!(config_key = %entry.config_key, "Pricing config updated");

        Ok(entry)
    }
}
