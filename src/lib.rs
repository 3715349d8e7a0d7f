pub mod chunk;
pub mod cli;
pub mod config;
pub mod consistency;
pub mod corpus;
pub mod embed;
pub mod error;
pub mod identity;
mod imvec;
pub mod lifecycle;
mod metrics;
pub mod pipeline;
pub mod search;
pub mod server;
pub mod store;

pub use config::Opts;
pub use error::{Error, Result};
pub use imvec::{Imvec, ImvecBuilder};
