//! Infrastructure adapters and runtime bootstrap.

pub mod bus;
pub mod db;
pub mod error;
pub mod grpc;
pub mod http;
pub mod queue;
pub mod search;
pub mod telemetry;
