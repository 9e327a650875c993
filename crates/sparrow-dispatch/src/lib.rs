//! Request classification and multi-provider dispatch for Sparrow.
mod classifier;
mod dispatcher;
mod prompts;
mod tickets;

pub use classifier::{classify_request, RequestType};
pub use dispatcher::{Dispatcher, NO_RESPONSE_APOLOGY};
pub use prompts::{system_prompt_for, CLASSIFY_PROMPT, GENERAL_PROMPT, PROJECT_MANAGER_PROMPT};
pub use tickets::{IssueTicket, IssueType};
