//! Service layer: match orchestration and the work it schedules.
//!
//! [`MatchService`] drives the lifecycle. It leases servers through the
//! [`LeaseManager`], archives demos with the [`DemoPipeline`], announces
//! changes through the [`EventDispatcher`] and runs detached work on the
//! [`TaskQueue`].

pub mod analyzer;
pub mod demo_pipeline;
pub mod dispatcher;
pub mod lease_manager;
pub mod match_service;
pub mod tasks;
pub mod zip_stream;

pub use analyzer::ReplayAnalyzer;
pub use demo_pipeline::{DemoOutcome, DemoPipeline};
pub use dispatcher::EventDispatcher;
pub use lease_manager::{Lease, LeaseManager, LeaseRequest};
pub use match_service::MatchService;
pub use tasks::{TaskQueue, TaskStats};
