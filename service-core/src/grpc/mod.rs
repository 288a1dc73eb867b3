//! gRPC utilities shared by the marketplace services.
//!
//! Currently this is the error mapping between `AppError` and `tonic::Status`.

pub mod error;

pub use error::{GrpcResult, IntoStatus};

// Re-export commonly used tonic types
pub use tonic::{Code, Request, Response, Status};
