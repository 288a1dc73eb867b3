//! Entitlement Service - Subscription usage accounting and listing entitlements.

pub mod config;
pub mod grpc;
pub mod models;
pub mod services;
pub mod startup;
