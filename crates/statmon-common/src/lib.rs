//! Types and primitives shared by the statmon agent and server.
//!
//! [`types`] defines the wire representation of a metric, [`sign`] the
//! integrity tag both sides agree on, and [`crypto`] the optional RSA
//! envelope used for bulk payloads. [`proto`] is the gRPC form of a batch.

pub mod crypto;
pub mod env;
pub mod id;
#[allow(clippy::doc_markdown, clippy::default_trait_access)]
pub mod proto;
pub mod sign;
pub mod types;
