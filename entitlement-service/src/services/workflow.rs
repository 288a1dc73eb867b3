//! Listing creation: entitlement check, image upload, optional payment,
//! publish, usage commit.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::models::{
    CreatedListing, EntitlementDecision, ListingDraft, ListingImage, Payment, PaymentRequest,
    PublishListing, ADDITIONAL_LISTING_PAYMENT,
};
use crate::services::entitlement::EntitlementEngine;
use crate::services::error::EntitlementError;
use service_core::error::AppError;

/// Stores listing images and returns their public URLs.
#[async_trait]
pub trait ImageUploader: Send + Sync {
    async fn upload(&self, user_id: Uuid, image: &ListingImage) -> Result<String, AppError>;
}

/// Charges a user for capacity beyond the monthly pool.
#[async_trait]
pub trait PaymentCollector: Send + Sync {
    async fn collect(&self, request: PaymentRequest) -> Result<Payment, AppError>;

    /// Reverse a settled charge whose listing was never created.
    async fn refund(&self, payment_id: Uuid, reason: &str) -> Result<Payment, AppError>;
}

/// Persists the listing itself.
#[async_trait]
pub trait ListingPublisher: Send + Sync {
    async fn publish(&self, listing: PublishListing) -> Result<Uuid, AppError>;
}

pub struct ListingCreationWorkflow {
    engine: EntitlementEngine,
    uploader: Arc<dyn ImageUploader>,
    payments: Arc<dyn PaymentCollector>,
    publisher: Arc<dyn ListingPublisher>,
    currency: String,
}

impl ListingCreationWorkflow {
    pub fn new(
        engine: EntitlementEngine,
        uploader: Arc<dyn ImageUploader>,
        payments: Arc<dyn PaymentCollector>,
        publisher: Arc<dyn ListingPublisher>,
    ) -> Self {
        Self {
            engine,
            uploader,
            payments,
            publisher,
            currency: "USD".to_string(),
        }
    }

    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = currency.into();
        self
    }

    /// Create a listing, charging for it when the monthly pool is used up.
    ///
    /// Usage is committed only after the listing has been published. A charge
    /// taken for a listing that fails to publish is refunded.
    #[instrument(skip(self, draft), fields(user_id = %draft.user_id, listing_type = %draft.listing_type))]
    pub async fn create_listing(
        &self,
        draft: ListingDraft,
    ) -> Result<CreatedListing, EntitlementError> {
        if draft.title.trim().is_empty() {
            return Err(EntitlementError::InvalidInput(
                "Listing title must not be empty".to_string(),
            ));
        }

        let decision = self
            .engine
            .check_entitlement(draft.user_id, draft.listing_type)
            .await;
        if let EntitlementDecision::Denied { reason } = &decision {
            return Err(EntitlementError::ListingDenied(reason.clone()));
        }

        let mut image_urls = Vec::with_capacity(draft.images.len());
        for image in &draft.images {
            let url = self.uploader.upload(draft.user_id, image).await?;
            image_urls.push(url);
        }

        let payment = match decision {
            EntitlementDecision::AllowedWithCharge { amount, reason } => {
                info!(amount = %amount, reason = %reason, "Collecting payment for listing");
                let payment = self
                    .payments
                    .collect(PaymentRequest {
                        user_id: draft.user_id,
                        amount,
                        currency: self.currency.clone(),
                        payment_type: ADDITIONAL_LISTING_PAYMENT.to_string(),
                        metadata: Some(serde_json::json!({
                            "listing_type": draft.listing_type.as_str(),
                            "title": draft.title,
                        })),
                    })
                    .await?;
                if !payment.is_settled() {
                    warn!(
                        payment_id = %payment.payment_id,
                        status = %payment.status.as_str(),
                        "Listing payment not completed"
                    );
                    return Err(EntitlementError::PaymentNotCompleted(format!(
                        "payment {} is {}",
                        payment.payment_id,
                        payment.status.as_str()
                    )));
                }
                Some(payment)
            }
            _ => None,
        };

        let published = self
            .publisher
            .publish(PublishListing {
                user_id: draft.user_id,
                listing_type: draft.listing_type,
                title: draft.title,
                description: draft.description,
                price: draft.price,
                image_urls: image_urls.clone(),
                payment_id: payment.as_ref().map(|p| p.payment_id),
                metadata: draft.metadata,
            })
            .await;
        let listing_id = match published {
            Ok(listing_id) => listing_id,
            Err(e) => {
                if let Some(payment) = &payment {
                    self.refund_unpublished(payment.payment_id, &e).await?;
                }
                return Err(e.into());
            }
        };

        self.engine
            .record_listing_created(draft.user_id, draft.listing_type)
            .await?;

        info!(listing_id = %listing_id, paid = payment.is_some(), "Listing created");
        Ok(CreatedListing {
            listing_id,
            listing_type: draft.listing_type,
            image_urls,
            payment,
        })
    }

    async fn refund_unpublished(
        &self,
        payment_id: Uuid,
        cause: &AppError,
    ) -> Result<(), EntitlementError> {
        match self
            .payments
            .refund(payment_id, "listing_publish_failed")
            .await
        {
            Ok(refund) => {
                warn!(
                    payment_id = %payment_id,
                    status = %refund.status.as_str(),
                    error = %cause,
                    "Listing publish failed, payment refunded"
                );
                Ok(())
            }
            Err(refund_error) => {
                error!(
                    payment_id = %payment_id,
                    error = %cause,
                    refund_error = %refund_error,
                    "Listing publish failed and refund failed"
                );
                Err(EntitlementError::RefundFailed {
                    payment_id,
                    reason: refund_error.to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ListingType, MonthKey, PaymentStatus};
    use crate::services::memory::InMemoryStore;
    use crate::services::plans::PlanRegistry;
    use crate::services::pricing::StaticPricing;
    use crate::services::subscriptions::SubscriptionManager;
    use crate::services::usage::UsageLedger;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    struct FakeUploader;

    #[async_trait]
    impl ImageUploader for FakeUploader {
        async fn upload(&self, user_id: Uuid, image: &ListingImage) -> Result<String, AppError> {
            Ok(format!("https://img.test/{}/{}", user_id, image.file_name))
        }
    }

    struct FakePayments {
        status: PaymentStatus,
        refunds_fail: bool,
        requests: Mutex<Vec<PaymentRequest>>,
        refunded: Mutex<Vec<Uuid>>,
    }

    #[async_trait]
    impl PaymentCollector for FakePayments {
        async fn collect(&self, request: PaymentRequest) -> Result<Payment, AppError> {
            let payment = Payment {
                payment_id: Uuid::new_v4(),
                user_id: request.user_id,
                amount: request.amount,
                currency: request.currency.clone(),
                payment_type: request.payment_type.clone(),
                status: self.status,
                metadata: request.metadata.clone(),
            };
            self.requests.lock().unwrap().push(request);
            Ok(payment)
        }

        async fn refund(&self, payment_id: Uuid, _reason: &str) -> Result<Payment, AppError> {
            if self.refunds_fail {
                return Err(AppError::InternalError(anyhow::anyhow!("processor offline")));
            }
            self.refunded.lock().unwrap().push(payment_id);
            Ok(Payment {
                payment_id,
                user_id: Uuid::nil(),
                amount: rust_decimal::Decimal::ZERO,
                currency: "USD".to_string(),
                payment_type: ADDITIONAL_LISTING_PAYMENT.to_string(),
                status: PaymentStatus::Refunded,
                metadata: None,
            })
        }
    }

    #[derive(Default)]
    struct FakePublisher {
        failing: AtomicBool,
        published: Mutex<Vec<PublishListing>>,
    }

    #[async_trait]
    impl ListingPublisher for FakePublisher {
        async fn publish(&self, listing: PublishListing) -> Result<Uuid, AppError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(AppError::InternalError(anyhow::anyhow!("listing store down")));
            }
            self.published.lock().unwrap().push(listing);
            Ok(Uuid::new_v4())
        }
    }

    struct Harness {
        engine: EntitlementEngine,
        subscriptions: SubscriptionManager,
        payments: Arc<FakePayments>,
        publisher: Arc<FakePublisher>,
        workflow: ListingCreationWorkflow,
    }

    fn harness(payment_status: PaymentStatus) -> Harness {
        harness_with_refunds(payment_status, false)
    }

    fn harness_with_refunds(payment_status: PaymentStatus, refunds_fail: bool) -> Harness {
        let store = Arc::new(InMemoryStore::new());
        let plans = PlanRegistry::new(store.clone());
        let subscriptions = SubscriptionManager::new(store.clone(), plans);
        let engine = EntitlementEngine::new(
            store.clone(),
            subscriptions.clone(),
            UsageLedger::new(store.clone()),
            Arc::new(StaticPricing::default()),
        );
        let payments = Arc::new(FakePayments {
            status: payment_status,
            refunds_fail,
            requests: Mutex::new(Vec::new()),
            refunded: Mutex::new(Vec::new()),
        });
        let publisher = Arc::new(FakePublisher::default());
        let workflow = ListingCreationWorkflow::new(
            engine.clone(),
            Arc::new(FakeUploader),
            payments.clone(),
            publisher.clone(),
        );
        Harness {
            engine,
            subscriptions,
            payments,
            publisher,
            workflow,
        }
    }

    fn draft(user_id: Uuid) -> ListingDraft {
        ListingDraft {
            user_id,
            listing_type: ListingType::Free,
            title: "Mountain bike".to_string(),
            description: "Barely used".to_string(),
            price: None,
            images: vec![ListingImage {
                file_name: "bike.jpg".to_string(),
                content_type: "image/jpeg".to_string(),
                bytes: vec![0xff, 0xd8],
            }],
            metadata: None,
        }
    }

    async fn used(h: &Harness, user_id: Uuid) -> i32 {
        h.engine
            .get_usage(user_id, Some(MonthKey::current()))
            .await
            .unwrap()
            .usage
            .free_listings_used
    }

    #[tokio::test]
    async fn listing_within_pool_needs_no_payment() {
        let h = harness(PaymentStatus::Succeeded);
        let user_id = Uuid::new_v4();

        let created = h.workflow.create_listing(draft(user_id)).await.unwrap();
        assert!(created.payment.is_none());
        assert_eq!(created.image_urls.len(), 1);
        assert!(h.payments.requests.lock().unwrap().is_empty());
        assert_eq!(used(&h, user_id).await, 1);
    }

    #[tokio::test]
    async fn listing_past_pool_is_charged() {
        let h = harness(PaymentStatus::Succeeded);
        let user_id = Uuid::new_v4();
        for _ in 0..5 {
            h.workflow.create_listing(draft(user_id)).await.unwrap();
        }

        let created = h.workflow.create_listing(draft(user_id)).await.unwrap();
        let payment = created.payment.expect("payment collected");
        assert_eq!(payment.payment_type, ADDITIONAL_LISTING_PAYMENT);
        assert_eq!(payment.amount.to_string(), "5.00");

        let published = h.publisher.published.lock().unwrap();
        assert_eq!(published.last().unwrap().payment_id, Some(payment.payment_id));
        drop(published);
        assert_eq!(used(&h, user_id).await, 6);
    }

    #[tokio::test]
    async fn failed_payment_creates_nothing() {
        let h = harness(PaymentStatus::Failed);
        let user_id = Uuid::new_v4();
        for _ in 0..5 {
            h.workflow.create_listing(draft(user_id)).await.unwrap();
        }

        let err = h.workflow.create_listing(draft(user_id)).await.unwrap_err();
        assert!(matches!(err, EntitlementError::PaymentNotCompleted(_)));
        assert_eq!(h.publisher.published.lock().unwrap().len(), 5);
        assert_eq!(used(&h, user_id).await, 5);
    }

    #[tokio::test]
    async fn charge_is_refunded_when_publish_fails() {
        let h = harness(PaymentStatus::Succeeded);
        let user_id = Uuid::new_v4();
        for _ in 0..5 {
            h.workflow.create_listing(draft(user_id)).await.unwrap();
        }
        h.publisher.failing.store(true, Ordering::SeqCst);

        let err = h.workflow.create_listing(draft(user_id)).await.unwrap_err();
        assert!(matches!(err, EntitlementError::Store(_)));
        assert_eq!(h.payments.requests.lock().unwrap().len(), 1);
        assert_eq!(h.payments.refunded.lock().unwrap().len(), 1);
        assert_eq!(used(&h, user_id).await, 5);
    }

    #[tokio::test]
    async fn failed_refund_reports_payment_id() {
        let h = harness_with_refunds(PaymentStatus::Succeeded, true);
        let user_id = Uuid::new_v4();
        for _ in 0..5 {
            h.workflow.create_listing(draft(user_id)).await.unwrap();
        }
        h.publisher.failing.store(true, Ordering::SeqCst);

        let err = h.workflow.create_listing(draft(user_id)).await.unwrap_err();
        match err {
            EntitlementError::RefundFailed { payment_id, .. } => {
                assert_ne!(payment_id, Uuid::nil())
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(used(&h, user_id).await, 5);
    }

    #[tokio::test]
    async fn free_listing_publish_failure_needs_no_refund() {
        let h = harness(PaymentStatus::Succeeded);
        let user_id = Uuid::new_v4();
        h.publisher.failing.store(true, Ordering::SeqCst);

        assert!(h.workflow.create_listing(draft(user_id)).await.is_err());
        assert!(h.payments.refunded.lock().unwrap().is_empty());
        assert_eq!(used(&h, user_id).await, 0);
    }

    #[tokio::test]
    async fn suspended_user_is_denied() {
        let h = harness(PaymentStatus::Succeeded);
        let user_id = Uuid::new_v4();
        h.subscriptions.suspend(user_id).await.unwrap();

        let err = h.workflow.create_listing(draft(user_id)).await.unwrap_err();
        assert!(matches!(err, EntitlementError::ListingDenied(_)));
        assert!(h.publisher.published.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn blank_title_is_rejected() {
        let h = harness(PaymentStatus::Succeeded);
        let mut input = draft(Uuid::new_v4());
        input.title = "  ".to_string();
        let err = h.workflow.create_listing(input).await.unwrap_err();
        assert!(matches!(err, EntitlementError::InvalidInput(_)));
    }
}
