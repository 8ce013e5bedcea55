//! Network edges: the upstream client used by url mappings and the
//! listener serving the dispatcher.

pub mod client;
pub mod headers;
pub mod server;
pub mod tls;

pub use server::Server;
