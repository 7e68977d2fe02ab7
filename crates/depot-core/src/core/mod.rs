//! Internal implementation modules for `depot-core`.
//!
//! Most callers should go through `depot_core::api` rather than importing
//! these modules directly.

pub mod audit;
pub mod catalog;
pub mod content;
pub mod depot;
pub mod export;
pub mod push;
pub mod repo;
pub mod scratch;
pub mod tree;
