use thiserror::Error;

/// Error kinds recognized across the agent kernel.
///
/// Security and validation failures are always caught at the tool registry
/// boundary and converted into error tool-results; they never unwind past a
/// session-loop turn.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Guard rejection: path jail, SSRF, shell filter, missing credentials.
    #[error("Security violation: {0}")]
    Security(String),

    /// Malformed arguments, invalid URL/email/cron expression.
    #[error("Invalid input: {0}")]
    Validation(String),

    /// LLM, HTTP, or IMAP failure. Not retried by the kernel.
    #[error("Transport failure: {0}")]
    Transport(String),

    /// Daily cost hard-stop reached.
    #[error("Daily LLM budget exceeded")]
    BudgetExhausted,

    /// A human (or expiry) rejected a pending approval.
    #[error("Approval rejected: {0}")]
    ApprovalRejected(String),
}

impl AgentError {
    pub fn security(msg: impl Into<String>) -> Self {
        AgentError::Security(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        AgentError::Validation(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        AgentError::Transport(msg.into())
    }

    /// True for kinds that must be audit-logged with `blocked: true`.
    pub fn is_blocked(&self) -> bool {
        matches!(self, AgentError::Security(_))
    }
}
