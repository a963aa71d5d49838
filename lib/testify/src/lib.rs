pub mod bmc;
pub mod http;
mod portpicker;
mod socket;
pub mod wait;

// re-export
pub use portpicker::{pick_unused_local_port, pick_unused_port};
pub use socket::{next_addr, next_addr_for_ip};
