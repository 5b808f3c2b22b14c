//! Fusion Shared - wire types for the HTTP API
//!
//! This crate contains the request and response bodies exchanged with API
//! clients, plus the payload handed to remote batch processing jobs.
//!
//! # Design Principles
//!
//! 1. **Minimal dependencies** - only serde, serde_json and the domain crate
//! 2. **No business logic** - pure data types and serialization

pub mod requests;
pub mod responses;

pub use requests::{GenerationRequest, PlanRequest, ProcessingPayload};
pub use responses::{
    BatchStatusResponse, ErrorBody, GenerationAccepted, HealthResponse, JobStatusResponse,
    PlanResponse, PresignedUrlsResponse, UNKNOWN_STATUS,
};
