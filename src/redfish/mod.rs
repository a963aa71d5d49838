//! Collects hardware health of a server from its BMC's Redfish service.
//!
//! A scrape authenticates against the target ([`session`]), walks the
//! resource graph from the service root ([`walker`]), turns the fetched
//! documents into vendor independent records ([`normalize`]) and those
//! into metrics ([`builder`]). [`scrape`] sequences the steps under one
//! deadline.

pub mod builder;
pub mod client;
pub mod normalize;
pub mod record;
pub mod resource;
pub mod scrape;
pub mod session;
pub mod walker;

pub use scrape::{Profile, ScrapeOptions, ScrapeState, Scraper};
pub use session::SessionCache;

/// Where every walk starts.
pub const SERVICE_ROOT: &str = "/redfish/v1";
