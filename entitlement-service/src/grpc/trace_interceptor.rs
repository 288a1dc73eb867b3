//! W3C trace context propagation for incoming gRPC calls.

use opentelemetry::propagation::{Extractor, TextMapPropagator};
use opentelemetry_sdk::propagation::TraceContextPropagator;
use tonic::{Request, Status};
use tracing::Span;
use tracing_opentelemetry::OpenTelemetrySpanExt;

const TRACEPARENT_HEADER: &str = "traceparent";

/// Reads propagation headers out of gRPC metadata.
struct MetadataExtractor<'a>(&'a tonic::metadata::MetadataMap);

impl Extractor for MetadataExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0
            .keys()
            .filter_map(|k| match k {
                tonic::metadata::KeyRef::Ascii(key) => Some(key.as_str()),
                tonic::metadata::KeyRef::Binary(_) => None,
            })
            .collect()
    }
}

/// Parent the current span on the caller's `traceparent`, if any.
#[allow(clippy::result_large_err)]
pub fn trace_context_interceptor(request: Request<()>) -> Result<Request<()>, Status> {
    let context = TraceContextPropagator::new().extract(&MetadataExtractor(request.metadata()));
    Span::current().set_parent(context);

    if let Some(traceparent) = request
        .metadata()
        .get(TRACEPARENT_HEADER)
        .and_then(|v| v.to_str().ok())
    {
        tracing::debug!(traceparent = %traceparent, "gRPC request with trace context");
    }

    Ok(request)
}
