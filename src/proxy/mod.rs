//! The HTTP side of the router: request resolution, forwarding, and the
//! server lifecycle.

pub mod error;
pub mod health;
pub mod resolve;
pub mod router;
pub mod server;
pub mod shutdown;
pub mod upstream;

pub use error::{ErrorResponse, ProxyError};
pub use router::{build_router, RouterEngine};
pub use server::{ProxyHandle, ProxyServer};
