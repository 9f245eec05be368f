pub mod agent;
pub mod brain;
pub mod channel;
pub mod config;
pub mod dom;
pub mod error;
pub mod hands;
pub mod owner;
pub mod parse;
pub mod prompts;
pub mod snapshot;
pub mod types;

pub use agent::{Agent, AgentSettings, ElementStrategy, StepOutcome, TaskOutcome};
pub use brain::{LanguageModel, ModelGateway};
pub use channel::{Lifecycle, SessionHandle};
pub use owner::{SessionOwner, SessionSettings};
