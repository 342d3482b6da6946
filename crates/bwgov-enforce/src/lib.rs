#![forbid(unsafe_code)]

mod adapter;
pub mod annotation;

pub use adapter::{EnforcementAdapter, EnforcementOutcome};
