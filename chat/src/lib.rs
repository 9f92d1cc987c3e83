pub mod config;
pub mod grounding;
pub mod llm;
pub mod server;
pub mod session;
pub mod turn;
