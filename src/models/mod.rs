//! Core data models for the acquisition pipeline.
//!
//! Descriptors and samples are ephemeral and live only inside one run.
//! `MetaRecord` maps onto the `meta` table via `sqlx::FromRow`.

pub mod attributes;
pub mod descriptor;
pub mod fingerprint;
pub mod meta;

pub use attributes::StaticAttributes;
pub use descriptor::{Label, ObjectDescriptor, Partition};
pub use fingerprint::Fingerprint;
pub use meta::{MetaCandidate, MetaRecord};
