pub mod auth;
pub mod client;
pub mod error;
pub mod types;

pub use auth::MalProvider;
pub use client::MalClient;
pub use error::MalError;
