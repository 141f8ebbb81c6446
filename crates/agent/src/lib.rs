//! Agent runtime: turns Teams messages into CRM actions.
//!
//! Each message runs a constrained loop:
//! 1. **Planning** (`planner`) - slash commands, a pending numbered choice,
//!    or the LLM picks one action from the catalog (`actions`)
//! 2. **Guardrails** (`guardrails`) - disabled deletes and list limits
//! 3. **Handlers** (`handlers`) - validate, resolve, call Salesforce or Graph,
//!    update conversation state
//! 4. **Reply** - adaptive cards from `teamsforce-teams`
//!
//! The LLM only chooses the action and extracts parameters. Field validation,
//! record resolution and every CRM call are deterministic.

pub mod actions;
pub mod email;
pub mod guardrails;
pub mod handlers;
pub mod llm;
pub mod login;
pub mod planner;
pub mod runtime;

pub use actions::AgentAction;
pub use guardrails::{GuardrailDecision, GuardrailPolicy};
pub use handlers::{ActionHandlers, Turn};
pub use llm::{ChatCompletionsClient, LlmClient};
pub use login::LoginService;
pub use planner::{Planner, PromptError};
pub use runtime::AgentRuntime;
