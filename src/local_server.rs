//! Loopback HTTP receiver for hosts that cannot register a custom URI scheme.
//!
//! The receiver stands in for the deep-link handler: GitHub redirects the
//! browser to `http://127.0.0.1:<port>/<path>`, and every hit is forwarded to
//! [`RedirectIngress`](crate::RedirectIngress).

mod config;
mod handler;
mod server;
mod target;

pub use config::LocalServerConfig;
pub use server::LocalServer;
