//! Error conversion utilities between `AppError` and `tonic::Status`.
//!
//! | AppError | gRPC Status |
//! |----------|-------------|
//! | `ValidationError` | `INVALID_ARGUMENT` |
//! | `BadRequest` | `INVALID_ARGUMENT` |
//! | `NotFound` | `NOT_FOUND` |
//! | `Forbidden` | `PERMISSION_DENIED` |
//! | `Conflict` | `ALREADY_EXISTS` |
//! | `PaymentRequired` | `FAILED_PRECONDITION` |
//! | `InternalError` | `INTERNAL` |
//! | `ServiceUnavailable` | `UNAVAILABLE` |

use tonic::{Code, Status};

use crate::error::AppError;

/// Extension trait for converting types into `tonic::Status`.
pub trait IntoStatus {
    /// Convert into a `tonic::Status`.
    fn into_status(self) -> Status;
}

impl IntoStatus for AppError {
    fn into_status(self) -> Status {
        match self {
            AppError::ValidationError(err) => {
                Status::invalid_argument(format!("Validation error: {}", err))
            }
            AppError::BadRequest(err) => Status::invalid_argument(err.to_string()),
            AppError::NotFound(err) => Status::not_found(err.to_string()),
            AppError::Forbidden(err) => Status::permission_denied(err.to_string()),
            AppError::Conflict(err) => Status::already_exists(err.to_string()),
            AppError::PaymentRequired(msg) => Status::failed_precondition(msg),
            AppError::InternalError(err) => {
                // Log the full error but don't expose it to clients
                tracing::error!(error = %err, "Internal error");
                Status::internal("Internal server error")
            }
            AppError::ServiceUnavailable => Status::unavailable("Service unavailable"),
            AppError::DatabaseError(err) => {
                tracing::error!(error = %err, "Database error");
                Status::internal("Database error")
            }
            AppError::ConfigError(err) => {
                tracing::error!(error = %err, "Configuration error");
                Status::internal("Configuration error")
            }
        }
    }
}

impl From<AppError> for Status {
    fn from(err: AppError) -> Self {
        err.into_status()
    }
}

/// Convert a `tonic::Status` back to an `AppError`.
/// This is useful when a gRPC client receives an error and needs to propagate it.
impl From<Status> for AppError {
    fn from(status: Status) -> Self {
        match status.code() {
            Code::InvalidArgument | Code::OutOfRange => {
                AppError::BadRequest(anyhow::anyhow!("{}", status.message()))
            }
            Code::NotFound => AppError::NotFound(anyhow::anyhow!("{}", status.message())),
            Code::PermissionDenied | Code::Unauthenticated => {
                AppError::Forbidden(anyhow::anyhow!("{}", status.message()))
            }
            Code::AlreadyExists => AppError::Conflict(anyhow::anyhow!("{}", status.message())),
            Code::FailedPrecondition => AppError::PaymentRequired(status.message().to_string()),
            Code::Unavailable => AppError::ServiceUnavailable,
            Code::Internal | Code::Unknown | Code::DataLoss => {
                AppError::InternalError(anyhow::anyhow!("{}", status.message()))
            }
            Code::Aborted | Code::Cancelled | Code::DeadlineExceeded | Code::ResourceExhausted => {
                AppError::InternalError(anyhow::anyhow!("Request failed: {}", status.message()))
            }
            Code::Unimplemented => {
                AppError::InternalError(anyhow::anyhow!("Not implemented: {}", status.message()))
            }
            Code::Ok => {
                // This shouldn't happen, but handle it gracefully
                AppError::InternalError(anyhow::anyhow!("Unexpected OK status as error"))
            }
        }
    }
}

/// Result type alias for gRPC handlers.
pub type GrpcResult<T> = Result<tonic::Response<T>, Status>;
