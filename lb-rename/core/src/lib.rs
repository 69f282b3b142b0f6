#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

mod api;
mod cascade;
pub mod memory;
pub mod name;
mod resource;


pub use self::{
    api::LoadBalancerApi,
    cascade::{Cascade, Error},
    name::{Kind, Prefixes, StructuredName},
    resource::{HealthMonitor, Listener, LoadBalancer, Pool, RenameOpts, UpdateOpts},
};
pub use tokio_util::sync::CancellationToken;
