//! # kea-id
//!
//! Worker name generation, parsing, and validation.
//!
//! ## Design Principles
//!
//! - Worker names are system-generated and never reused
//! - Names have a canonical string representation with strict parsing
//! - Names are valid Kubernetes object names (lowercase DNS-1123 labels)
//!
//! ## Name Format
//!
//! Every worker name uses the format `{prefix}-{uuid}`:
//!
//! - `k8s-elastic-agent-0f6d7c0e-3c2b-4a55-9d0e-8a4c1f2b9e7d`
//!
//! The random v4 UUID gives 122 bits of randomness, so names created
//! concurrently by independent processes do not collide.

mod error;
mod types;

pub use error::IdError;
pub use types::*;
