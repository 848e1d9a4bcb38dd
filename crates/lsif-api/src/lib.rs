pub mod error;
pub mod handlers;
pub mod metrics;
pub mod quota;
pub mod routes;
pub mod server;
pub mod state;
pub mod upload;

pub use error::*;
pub use handlers::*;
pub use routes::*;
pub use server::*;
pub use state::*;
