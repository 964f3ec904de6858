//! Rate model: limit clauses, combinator-joined groups, and the source
//! descriptors that attach them to configuration tree nodes.

mod limits;
mod source;

pub use limits::{Operator, Rate, Rates};
pub use source::{RateConfig, RateSource};
