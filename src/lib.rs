#[macro_use]
extern crate tracing;

pub mod context;
pub mod controller;
pub mod dns;
pub mod key;
pub mod public_ip;
pub mod queue;
pub mod reconcile;
pub mod resources;
pub mod watchers;
