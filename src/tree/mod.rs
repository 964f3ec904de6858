//! Generic rooted tree used to hold the rate configuration hierarchy.

mod node;

pub use node::Node;
