pub mod approvals;
pub mod cost;
pub mod errors;
pub mod events;
pub mod llm;
pub mod memory;
pub mod orchestrator;
pub mod session;
pub mod settings;
pub mod tasks;
