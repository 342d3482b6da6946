#![forbid(unsafe_code)]

mod controller;

pub use controller::{AdaptiveController, ControlState};
