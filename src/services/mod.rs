//! The acquisition pipeline, leaf-first: enumerator, fetcher, hasher,
//! analyzer (plus its tool runner), persister, and the orchestrating
//! pipeline.

pub mod analyzer;
pub mod enumerator;
pub mod fetcher;
pub mod hasher;
pub mod persister;
pub mod pipeline;
pub mod tools;
