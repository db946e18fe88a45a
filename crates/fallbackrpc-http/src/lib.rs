//! fallbackrpc-http: `reqwest` transport for fallbackrpc.
//!
//! ```rust,no_run
//! use fallbackrpc_core::ClientConfig;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ClientConfig::new(["https://rpc-a.example.com", "https://rpc-b.example.com"]);
//! let client = fallbackrpc_http::connect(config)?;
//! let block: String = client.call("eth_blockNumber", serde_json::Value::Null).await?;
//! # Ok(())
//! # }
//! ```

pub mod client;

pub use client::{connect, BuildError, ReqwestTransport};
