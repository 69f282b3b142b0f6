#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use lb_rename_core as core;

mod args;
pub mod metrics;
pub mod reconcile;

pub use self::args::Args;
