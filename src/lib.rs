//! Enumerates samples stored under the "malicious" and "clean" partitions
//! of an object store, fingerprints them, extracts static binary
//! attributes, and records one row per distinct fingerprint.

pub mod config;
pub mod context;
pub mod db;
pub mod errors;
pub mod models;
pub mod services;
pub mod sources;
