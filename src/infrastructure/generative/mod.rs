//! Generative client adapters.

pub mod client;
pub mod mock;
pub mod retry;
pub mod types;

pub use client::HttpGenerativeClient;
pub use mock::ScriptedClient;
pub use retry::RetryPolicy;
