pub mod batch;
pub mod clock;
pub mod config;
pub mod controller;
pub mod decode;
pub mod driver;
pub mod error;
pub mod ingest;
pub mod messages;
pub mod participants;
pub mod player;
pub mod seek;
pub mod session;
pub mod surface;
pub mod timeline;
pub mod types;

pub use error::{ReplayError, Result};
