//! EntitlementService gRPC implementation.

use crate::grpc::proto::entitlement_service_server::EntitlementService;
use crate::grpc::proto::*;
use crate::models::{self, CreatePlan as CreatePlanInput, MonthKey, UpdatePlan as UpdatePlanInput};
use crate::services::{
    record_error, record_grpc_request, record_grpc_request_duration, EntitlementError,
    EntitlementServices,
};
use chrono::{DateTime, Utc};
use prost_types::Timestamp;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::time::Instant;
use tonic::{Request, Response, Status};
use uuid::Uuid;

/// EntitlementService implementation.
pub struct EntitlementServiceImpl {
    services: EntitlementServices,
}

impl EntitlementServiceImpl {
    pub fn new(services: EntitlementServices) -> Self {
        Self { services }
    }
}

/// Per-call bookkeeping: logs, metrics and status mapping.
struct Call {
    method: &'static str,
    start: Instant,
}

impl Call {
    fn start(method: &'static str) -> Self {
        Self {
            method,
            start: Instant::now(),
        }
    }

    fn ok<T>(self, body: T) -> Result<Response<T>, Status> {
        record_grpc_request(self.method, "ok");
        record_grpc_request_duration(self.method, self.start.elapsed().as_secs_f64());
        Ok(Response::new(body))
    }

    fn fail(&self, err: EntitlementError) -> Status {
        match &err {
            EntitlementError::Store(e) => tracing::error!(error = %e, "Request failed"),
            other => tracing::debug!(error = %other, "Request rejected"),
        }
        record_error(err.kind(), self.method);
        record_grpc_request(self.method, "error");
        record_grpc_request_duration(self.method, self.start.elapsed().as_secs_f64());
        Status::from(err)
    }

    fn invalid(&self, message: String) -> Status {
        self.fail(EntitlementError::InvalidInput(message))
    }
}

// Helper functions for type conversions
#[allow(clippy::result_large_err)]
fn parse_uuid(call: &Call, field: &str, s: &str) -> Result<Uuid, Status> {
    Uuid::parse_str(s).map_err(|_| call.invalid(format!("Invalid {}: {}", field, s)))
}

#[allow(clippy::result_large_err)]
fn parse_decimal(call: &Call, field: &str, s: &str) -> Result<Decimal, Status> {
    Decimal::from_str(s.trim()).map_err(|_| call.invalid(format!("Invalid {}: {}", field, s)))
}

#[allow(clippy::result_large_err)]
fn parse_optional_decimal(call: &Call, field: &str, s: &str) -> Result<Option<Decimal>, Status> {
    if s.trim().is_empty() {
        Ok(None)
    } else {
        parse_decimal(call, field, s).map(Some)
    }
}

#[allow(clippy::result_large_err)]
fn parse_listing_type(call: &Call, value: i32) -> Result<models::ListingType, Status> {
    models::ListingType::from_proto(value)
        .ok_or_else(|| call.invalid(format!("Invalid listing_type: {}", value)))
}

fn datetime_to_timestamp(dt: DateTime<Utc>) -> Option<Timestamp> {
    Some(Timestamp {
        seconds: dt.timestamp(),
        nanos: dt.timestamp_subsec_nanos() as i32,
    })
}

fn plan_to_proto(plan: models::SubscriptionPlan) -> SubscriptionPlan {
    SubscriptionPlan {
        plan_id: plan.plan_id.to_string(),
        name: plan.name,
        description: plan.description.unwrap_or_default(),
        price_monthly: plan.price_monthly.to_string(),
        price_yearly: plan.price_yearly.map(|p| p.to_string()).unwrap_or_default(),
        currency: plan.currency,
        max_listings: plan.max_listings,
        max_featured_listings: plan.max_featured_listings,
        max_vehicle_listings: plan.max_vehicle_listings,
        features: plan.features.0,
        is_active: plan.is_active,
        sort_order: plan.sort_order,
        created_at: datetime_to_timestamp(plan.created_utc),
        updated_at: datetime_to_timestamp(plan.updated_utc),
    }
}

fn subscription_to_proto(s: models::UserSubscription) -> UserSubscription {
    UserSubscription {
        subscription_id: s.subscription_id.to_string(),
        user_id: s.user_id.to_string(),
        plan_id: s.plan_id.to_string(),
        status: s.status().to_proto(),
        current_period_start: datetime_to_timestamp(s.current_period_start),
        current_period_end: datetime_to_timestamp(s.current_period_end),
        cancel_at_period_end: s.cancel_at_period_end,
        cancelled_at: s.cancelled_at.and_then(datetime_to_timestamp),
        pending_plan_id: s
            .pending_plan_id
            .map(|id| id.to_string())
            .unwrap_or_default(),
        created_at: datetime_to_timestamp(s.created_utc),
        updated_at: datetime_to_timestamp(s.updated_utc),
    }
}

fn usage_to_proto(usage: models::ListingUsage, report: Option<&models::UsageReport>) -> ListingUsage {
    ListingUsage {
        user_id: usage.user_id.to_string(),
        month_year: usage.month_year,
        free_listings_used: usage.free_listings_used,
        featured_listings_used: usage.featured_listings_used,
        vehicle_listings_used: usage.vehicle_listings_used,
        plan_id: report.map(|r| r.plan_id.to_string()).unwrap_or_default(),
        max_listings: report.map(|r| r.ceilings.listings.as_ceiling()).unwrap_or_default(),
        max_featured_listings: report
            .map(|r| r.ceilings.featured.as_ceiling())
            .unwrap_or_default(),
        max_vehicle_listings: report
            .map(|r| r.ceilings.vehicle.as_ceiling())
            .unwrap_or_default(),
    }
}

#[tonic::async_trait]
impl EntitlementService for EntitlementServiceImpl {
    // =========================================================================
    // Subscriptions
    // =========================================================================

    #[tracing::instrument(skip(self, request), fields(method = "GetSubscription"))]
    async fn get_subscription(
        &self,
        request: Request<GetSubscriptionRequest>,
    ) -> Result<Response<GetSubscriptionResponse>, Status> {
        let call = Call::start("GetSubscription");
        let req = request.into_inner();
        let user_id = parse_uuid(&call, "user_id", &req.user_id)?;

        tracing::debug!(user_id = %user_id, "Getting subscription");

        let subscription = self
            .services
            .subscriptions
            .get_or_create(user_id)
            .await
            .map_err(|e| call.fail(e))?;
        let plan = match self.services.plans.get(subscription.plan_id).await {
            Ok(plan) => Some(plan_to_proto(plan)),
            Err(EntitlementError::PlanNotFound(_)) => None,
            Err(e) => return Err(call.fail(e)),
        };

        call.ok(GetSubscriptionResponse {
            subscription: Some(subscription_to_proto(subscription)),
            plan,
        })
    }

    #[tracing::instrument(skip(self, request), fields(method = "UpgradeSubscription"))]
    async fn upgrade_subscription(
        &self,
        request: Request<UpgradeSubscriptionRequest>,
    ) -> Result<Response<SubscriptionResponse>, Status> {
        let call = Call::start("UpgradeSubscription");
        let req = request.into_inner();
        let user_id = parse_uuid(&call, "user_id", &req.user_id)?;
        let plan_id = parse_uuid(&call, "plan_id", &req.plan_id)?;

        tracing::info!(user_id = %user_id, plan_id = %plan_id, "Upgrading subscription");

        let subscription = self
            .services
            .subscriptions
            .upgrade(user_id, plan_id)
            .await
            .map_err(|e| call.fail(e))?;

        call.ok(SubscriptionResponse {
            subscription: Some(subscription_to_proto(subscription)),
        })
    }

    #[tracing::instrument(skip(self, request), fields(method = "CancelSubscription"))]
    async fn cancel_subscription(
        &self,
        request: Request<CancelSubscriptionRequest>,
    ) -> Result<Response<SubscriptionResponse>, Status> {
        let call = Call::start("CancelSubscription");
        let req = request.into_inner();
        let user_id = parse_uuid(&call, "user_id", &req.user_id)?;

        tracing::info!(user_id = %user_id, "Cancelling subscription");

        let subscription = self
            .services
            .subscriptions
            .cancel(user_id)
            .await
            .map_err(|e| call.fail(e))?;

        call.ok(SubscriptionResponse {
            subscription: Some(subscription_to_proto(subscription)),
        })
    }

    #[tracing::instrument(skip(self, request), fields(method = "DowngradeSubscription"))]
    async fn downgrade_subscription(
        &self,
        request: Request<DowngradeSubscriptionRequest>,
    ) -> Result<Response<SubscriptionResponse>, Status> {
        let call = Call::start("DowngradeSubscription");
        let req = request.into_inner();
        let user_id = parse_uuid(&call, "user_id", &req.user_id)?;
        let plan_id = parse_uuid(&call, "plan_id", &req.plan_id)?;

        tracing::info!(user_id = %user_id, plan_id = %plan_id, "Scheduling downgrade");

        let subscription = self
            .services
            .subscriptions
            .downgrade(user_id, plan_id)
            .await
            .map_err(|e| call.fail(e))?;

        call.ok(SubscriptionResponse {
            subscription: Some(subscription_to_proto(subscription)),
        })
    }

    #[tracing::instrument(skip(self, request), fields(method = "ReactivateSubscription"))]
    async fn reactivate_subscription(
        &self,
        request: Request<ReactivateSubscriptionRequest>,
    ) -> Result<Response<SubscriptionResponse>, Status> {
        let call = Call::start("ReactivateSubscription");
        let req = request.into_inner();
        let user_id = parse_uuid(&call, "user_id", &req.user_id)?;

        tracing::info!(user_id = %user_id, "Reactivating subscription");

        let subscription = self
            .services
            .subscriptions
            .reactivate(user_id)
            .await
            .map_err(|e| call.fail(e))?;

        call.ok(SubscriptionResponse {
            subscription: Some(subscription_to_proto(subscription)),
        })
    }

    #[tracing::instrument(skip(self, request), fields(method = "SuspendSubscription"))]
    async fn suspend_subscription(
        &self,
        request: Request<SuspendSubscriptionRequest>,
    ) -> Result<Response<SubscriptionResponse>, Status> {
        let call = Call::start("SuspendSubscription");
        let req = request.into_inner();
        let user_id = parse_uuid(&call, "user_id", &req.user_id)?;

        let subscription = self
            .services
            .subscriptions
            .suspend(user_id)
            .await
            .map_err(|e| call.fail(e))?;

        call.ok(SubscriptionResponse {
            subscription: Some(subscription_to_proto(subscription)),
        })
    }

    #[tracing::instrument(skip(self, request), fields(method = "ResumeSubscription"))]
    async fn resume_subscription(
        &self,
        request: Request<ResumeSubscriptionRequest>,
    ) -> Result<Response<SubscriptionResponse>, Status> {
        let call = Call::start("ResumeSubscription");
        let req = request.into_inner();
        let user_id = parse_uuid(&call, "user_id", &req.user_id)?;

        let subscription = self
            .services
            .subscriptions
            .resume(user_id)
            .await
            .map_err(|e| call.fail(e))?;

        call.ok(SubscriptionResponse {
            subscription: Some(subscription_to_proto(subscription)),
        })
    }

    // =========================================================================
    // Entitlements and usage
    // =========================================================================

    #[tracing::instrument(skip(self, request), fields(method = "CheckEntitlement"))]
    async fn check_entitlement(
        &self,
        request: Request<CheckEntitlementRequest>,
    ) -> Result<Response<CheckEntitlementResponse>, Status> {
        let call = Call::start("CheckEntitlement");
        let req = request.into_inner();
        let user_id = parse_uuid(&call, "user_id", &req.user_id)?;
        let listing_type = parse_listing_type(&call, req.listing_type)?;

        let decision = self
            .services
            .engine
            .check_entitlement(user_id, listing_type)
            .await;
        let outcome = decision.as_str().to_string();
        let summary = decision.summary();

        tracing::debug!(
            user_id = %user_id,
            listing_type = %listing_type,
            outcome = %outcome,
            "Entitlement checked"
        );

        call.ok(CheckEntitlementResponse {
            allowed: summary.allowed,
            requires_payment: summary.requires_payment,
            additional_cost: summary
                .additional_cost
                .map(|c| c.to_string())
                .unwrap_or_default(),
            reason: summary.reason.unwrap_or_default(),
            outcome,
        })
    }

    #[tracing::instrument(skip(self, request), fields(method = "RecordListingCreated"))]
    async fn record_listing_created(
        &self,
        request: Request<RecordListingCreatedRequest>,
    ) -> Result<Response<RecordListingCreatedResponse>, Status> {
        let call = Call::start("RecordListingCreated");
        let req = request.into_inner();
        let user_id = parse_uuid(&call, "user_id", &req.user_id)?;
        let listing_type = parse_listing_type(&call, req.listing_type)?;

        tracing::info!(user_id = %user_id, listing_type = %listing_type, "Recording listing");

        let usage = self
            .services
            .engine
            .record_listing_created(user_id, listing_type)
            .await
            .map_err(|e| call.fail(e))?;

        call.ok(RecordListingCreatedResponse {
            usage: Some(usage_to_proto(usage, None)),
        })
    }

    #[tracing::instrument(skip(self, request), fields(method = "GetUsage"))]
    async fn get_usage(
        &self,
        request: Request<GetUsageRequest>,
    ) -> Result<Response<GetUsageResponse>, Status> {
        let call = Call::start("GetUsage");
        let req = request.into_inner();
        let user_id = parse_uuid(&call, "user_id", &req.user_id)?;
        let month = if req.month_year.is_empty() {
            None
        } else {
            Some(MonthKey::parse(&req.month_year).map_err(|e| call.invalid(e))?)
        };

        let report = self
            .services
            .engine
            .get_usage(user_id, month)
            .await
            .map_err(|e| call.fail(e))?;

        call.ok(GetUsageResponse {
            usage: Some(usage_to_proto(report.usage.clone(), Some(&report))),
        })
    }

    // =========================================================================
    // Pricing
    // =========================================================================

    #[tracing::instrument(skip(self, _request), fields(method = "GetPricingConfig"))]
    async fn get_pricing_config(
        &self,
        _request: Request<GetPricingConfigRequest>,
    ) -> Result<Response<GetPricingConfigResponse>, Status> {
        let call = Call::start("GetPricingConfig");

        let prices = self
            .services
            .pricing
            .all()
            .await
            .map_err(|e| call.fail(e))?;

        call.ok(GetPricingConfigResponse {
            prices: prices
                .into_iter()
                .map(|(key, value)| (key, value.to_string()))
                .collect(),
        })
    }

    #[tracing::instrument(skip(self, request), fields(method = "SetPricingConfig"))]
    async fn set_pricing_config(
        &self,
        request: Request<SetPricingConfigRequest>,
    ) -> Result<Response<SetPricingConfigResponse>, Status> {
        let call = Call::start("SetPricingConfig");
        let req = request.into_inner();
        let value = parse_decimal(&call, "value", &req.value)?;

        let entry = self
            .services
            .pricing
            .set(&req.key, value)
            .await
            .map_err(|e| call.fail(e))?;

        call.ok(SetPricingConfigResponse {
            key: entry.config_key.clone(),
            value: entry
                .decimal_value()
                .map(|v| v.to_string())
                .unwrap_or_default(),
            updated_at: datetime_to_timestamp(entry.updated_utc),
        })
    }

    // =========================================================================
    // Plans
    // =========================================================================

    #[tracing::instrument(skip(self, request), fields(method = "ListPlans"))]
    async fn list_plans(
        &self,
        request: Request<ListPlansRequest>,
    ) -> Result<Response<ListPlansResponse>, Status> {
        let call = Call::start("ListPlans");
        let req = request.into_inner();

        let plans = if req.active_only {
            self.services.plans.list_active().await
        } else {
            self.services.plans.list().await
        }
        .map_err(|e| call.fail(e))?;

        call.ok(ListPlansResponse {
            plans: plans.into_iter().map(plan_to_proto).collect(),
        })
    }

    #[tracing::instrument(skip(self, request), fields(method = "GetPlan"))]
    async fn get_plan(
        &self,
        request: Request<GetPlanRequest>,
    ) -> Result<Response<PlanResponse>, Status> {
        let call = Call::start("GetPlan");
        let req = request.into_inner();
        let plan_id = parse_uuid(&call, "plan_id", &req.plan_id)?;

        let plan = self
            .services
            .plans
            .get(plan_id)
            .await
            .map_err(|e| call.fail(e))?;

        call.ok(PlanResponse {
            plan: Some(plan_to_proto(plan)),
        })
    }

    #[tracing::instrument(skip(self, request), fields(method = "CreatePlan"))]
    async fn create_plan(
        &self,
        request: Request<CreatePlanRequest>,
    ) -> Result<Response<PlanResponse>, Status> {
        let call = Call::start("CreatePlan");
        let req = request.into_inner();

        tracing::info!(name = %req.name, "Creating plan");

        let input = CreatePlanInput {
            name: req.name,
            description: if req.description.is_empty() {
                None
            } else {
                Some(req.description)
            },
            price_monthly: if req.price_monthly.is_empty() {
                Decimal::ZERO
            } else {
                parse_decimal(&call, "price_monthly", &req.price_monthly)?
            },
            price_yearly: parse_optional_decimal(&call, "price_yearly", &req.price_yearly)?,
            currency: if req.currency.is_empty() {
                "USD".to_string()
            } else {
                req.currency
            },
            max_listings: req.max_listings,
            max_featured_listings: req.max_featured_listings,
            max_vehicle_listings: req.max_vehicle_listings,
            features: req.features,
            is_active: req.is_active.unwrap_or(true),
            sort_order: req.sort_order,
        };

        let plan = self
            .services
            .plans
            .create(input)
            .await
            .map_err(|e| call.fail(e))?;

        call.ok(PlanResponse {
            plan: Some(plan_to_proto(plan)),
        })
    }

    #[tracing::instrument(skip(self, request), fields(method = "UpdatePlan"))]
    async fn update_plan(
        &self,
        request: Request<UpdatePlanRequest>,
    ) -> Result<Response<PlanResponse>, Status> {
        let call = Call::start("UpdatePlan");
        let req = request.into_inner();
        let plan_id = parse_uuid(&call, "plan_id", &req.plan_id)?;

        tracing::info!(plan_id = %plan_id, "Updating plan");

        let input = UpdatePlanInput {
            name: req.name,
            description: req.description,
            price_monthly: req
                .price_monthly
                .as_deref()
                .map(|p| parse_decimal(&call, "price_monthly", p))
                .transpose()?,
            price_yearly: req
                .price_yearly
                .as_deref()
                .map(|p| parse_decimal(&call, "price_yearly", p))
                .transpose()?,
            max_listings: req.max_listings,
            max_featured_listings: req.max_featured_listings,
            max_vehicle_listings: req.max_vehicle_listings,
            features: req.replace_features.then_some(req.features),
            is_active: req.is_active,
            sort_order: req.sort_order,
        };

        let plan = self
            .services
            .plans
            .update(plan_id, input)
            .await
            .map_err(|e| call.fail(e))?;

        call.ok(PlanResponse {
            plan: Some(plan_to_proto(plan)),
        })
    }

    #[tracing::instrument(skip(self, request), fields(method = "DeletePlan"))]
    async fn delete_plan(
        &self,
        request: Request<DeletePlanRequest>,
    ) -> Result<Response<DeletePlanResponse>, Status> {
        let call = Call::start("DeletePlan");
        let req = request.into_inner();
        let plan_id = parse_uuid(&call, "plan_id", &req.plan_id)?;

        tracing::info!(plan_id = %plan_id, "Deleting plan");

        self.services
            .plans
            .delete(plan_id)
            .await
            .map_err(|e| call.fail(e))?;

        call.ok(DeletePlanResponse { deleted: true })
    }
}
