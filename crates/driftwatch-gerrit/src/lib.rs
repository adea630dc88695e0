mod client;
mod error;
mod http;
pub mod mock;
pub mod types;

pub use client::GerritClient;
pub use error::GerritError;
pub use http::GerritHttp;
pub use mock::MockGerrit;
