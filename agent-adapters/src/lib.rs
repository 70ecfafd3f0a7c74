//! Model adapters and the oracle interface used by the planning agent.
//!
//! [`traits`] defines the streaming [`traits::ModelAdapter`] contract,
//! [`openai`] implements it for OpenAI-compatible endpoints, and [`oracle`]
//! narrows any adapter to the single `chat(prompt) -> text` call the
//! orchestrator depends on.

#![warn(missing_docs, clippy::pedantic)]

pub mod openai;
pub mod oracle;
pub mod traits;

mod http_client;

pub use oracle::{AdapterOracle, Oracle, OracleError, OracleResult};
