use service_core::error::AppError;
use service_core::grpc::IntoStatus;
use thiserror::Error;
use tonic::Status;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum EntitlementError {
    #[error("Plan not found: {0}")]
    PlanNotFound(String),

    #[error("No active subscription for user {0}")]
    NoActiveSubscription(Uuid),

    #[error("A plan named '{0}' already exists")]
    DuplicatePlanName(String),

    #[error("Plan '{0}' is protected")]
    ProtectedPlan(String),

    #[error("Invalid subscription state: {0}")]
    InvalidState(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Listing denied: {0}")]
    ListingDenied(String),

    #[error("Payment not completed: {0}")]
    PaymentNotCompleted(String),

    #[error("Listing was not created and payment {payment_id} could not be refunded: {reason}")]
    RefundFailed { payment_id: Uuid, reason: String },

    #[error(transparent)]
    Store(#[from] AppError),
}

impl From<validator::ValidationErrors> for EntitlementError {
    fn from(err: validator::ValidationErrors) -> Self {
        EntitlementError::InvalidInput(err.to_string())
    }
}

impl EntitlementError {
    /// Short label used for the error metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            EntitlementError::PlanNotFound(_) => "plan_not_found",
            EntitlementError::NoActiveSubscription(_) => "no_active_subscription",
            EntitlementError::DuplicatePlanName(_) => "duplicate_plan_name",
            EntitlementError::ProtectedPlan(_) => "protected_plan",
            EntitlementError::InvalidState(_) => "invalid_state",
            EntitlementError::InvalidInput(_) => "invalid_input",
            EntitlementError::ListingDenied(_) => "listing_denied",
            EntitlementError::PaymentNotCompleted(_) => "payment_not_completed",
            EntitlementError::RefundFailed { .. } => "refund_failed",
            EntitlementError::Store(_) => "database",
        }
    }
}

impl From<EntitlementError> for AppError {
    fn from(err: EntitlementError) -> Self {
        match err {
            EntitlementError::PlanNotFound(_) | EntitlementError::NoActiveSubscription(_) => {
                AppError::NotFound(anyhow::anyhow!(err.to_string()))
            }
            EntitlementError::DuplicatePlanName(_)
            | EntitlementError::ProtectedPlan(_)
            | EntitlementError::InvalidState(_)
            | EntitlementError::InvalidInput(_) => {
                AppError::BadRequest(anyhow::anyhow!(err.to_string()))
            }
            EntitlementError::ListingDenied(_) => {
                AppError::Forbidden(anyhow::anyhow!(err.to_string()))
            }
            EntitlementError::PaymentNotCompleted(_) => AppError::PaymentRequired(err.to_string()),
            EntitlementError::RefundFailed { .. } => {
                AppError::InternalError(anyhow::anyhow!(err.to_string()))
            }
            EntitlementError::Store(e) => e,
        }
    }
}

impl From<EntitlementError> for Status {
    fn from(err: EntitlementError) -> Self {
        match err {
            EntitlementError::PlanNotFound(_) | EntitlementError::NoActiveSubscription(_) => {
                Status::not_found(err.to_string())
            }
            EntitlementError::DuplicatePlanName(_) => Status::already_exists(err.to_string()),
            EntitlementError::ProtectedPlan(_)
            | EntitlementError::InvalidState(_)
            | EntitlementError::PaymentNotCompleted(_) => {
                Status::failed_precondition(err.to_string())
            }
            EntitlementError::InvalidInput(_) => Status::invalid_argument(err.to_string()),
            EntitlementError::ListingDenied(_) => Status::permission_denied(err.to_string()),
            EntitlementError::RefundFailed { .. } => Status::internal(err.to_string()),
            EntitlementError::Store(e) => e.into_status(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonic::Code;

    #[test]
    fn protected_plan_is_bad_request_over_http() {
        let err: AppError = EntitlementError::ProtectedPlan("Free".to_string()).into();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[test]
    fn payment_not_completed_is_payment_required() {
        let err: AppError = EntitlementError::PaymentNotCompleted("failed".to_string()).into();
        assert!(matches!(err, AppError::PaymentRequired(_)));
    }

    #[test]
    fn refund_failure_keeps_payment_id() {
        let payment_id = Uuid::new_v4();
        let status = Status::from(EntitlementError::RefundFailed {
            payment_id,
            reason: "processor offline".to_string(),
        });
        assert_eq!(status.code(), Code::Internal);
        assert!(status.message().contains(&payment_id.to_string()));
    }

    #[test]
    fn grpc_codes() {
        let cases = [
            (EntitlementError::PlanNotFound("x".into()), Code::NotFound),
            (EntitlementError::DuplicatePlanName("Pro".into()), Code::AlreadyExists),
            (EntitlementError::ProtectedPlan("Free".into()), Code::FailedPrecondition),
            (EntitlementError::InvalidInput("bad".into()), Code::InvalidArgument),
            (EntitlementError::ListingDenied("suspended".into()), Code::PermissionDenied),
        ];
        for (err, code) in cases {
            assert_eq!(Status::from(err).code(), code);
        }
    }

    #[test]
    fn store_errors_are_masked() {
        let err = EntitlementError::Store(AppError::DatabaseError(anyhow::anyhow!(
            "connection refused"
        )));
        let status = Status::from(err);
        assert_eq!(status.code(), Code::Internal);
        assert_eq!(status.message(), "Database error");
    }
}
