//! Tollgate - Hierarchical Rate Limiting
//!
//! This crate implements a hierarchical, condition-aware admission-control
//! engine. Rate rules are attached to named nodes of a configuration tree;
//! at request time a lookup key is resolved bottom-up to every applicable
//! token-bucket limiter, and the verdicts are composed into a single
//! admit/reject decision.

pub mod bandwidth;
pub mod config;
pub mod error;
pub mod limiter;
pub mod matcher;
pub mod rate;
pub mod tree;
