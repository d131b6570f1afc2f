//! HTTP facade for recording listings, transform triggers, and status

pub mod shared;
pub use shared::SharedState;

pub mod http_server;
pub use http_server::run;
