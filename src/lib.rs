#[macro_use]
extern crate tracing;

#[macro_use]
pub mod metric;

pub mod config;
pub mod exposition;
pub mod http;
pub mod redfish;
pub mod server;
pub mod trace;

pub fn get_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
