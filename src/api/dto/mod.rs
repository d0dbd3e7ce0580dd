//! Data Transfer Objects for REST request/response serialization.
//!
//! Responses reuse the domain views ([`crate::domain::MatchView`]);
//! only request shapes that differ from the domain live here.

pub mod match_dto;

pub use match_dto::*;
