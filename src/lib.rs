//! Review, recommendation and engagement-event service.
//!
//! Every transport (REST, gRPC, the request queue) feeds the same
//! [`application::service::ServiceContext`], which runs a request through
//! its route's lifecycle and answers with one JSON envelope.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
