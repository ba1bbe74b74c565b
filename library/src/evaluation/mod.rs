//! Recursive memoized evaluation over composite graphs.

mod engine;

pub use engine::{full_pass, selective_pass};
