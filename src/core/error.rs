use thiserror::Error;

/// Boundary errors of the LLM gateway and the remote-tool transport.
///
/// Everything else in the engine is absorbed into the transcript: validation
/// rejections become agent replies, tool failures become failed tool results.
/// Only the variants here can abort a turn.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The routed backend failed and no fallback is configured.
    #[error("llm backend [{backend}] failed after {attempts} attempts: {cause}")]
    Backend {
        backend: String,
        attempts: u32,
        cause: anyhow::Error,
    },

    /// Both backends are down. Reports both identities for diagnosis.
    #[error("llm backends exhausted (primary [{primary}], fallback [{fallback}]): {cause}")]
    BackendsExhausted {
        primary: String,
        fallback: String,
        cause: anyhow::Error,
    },

    /// The backend kept answering outside the strict JSON contract.
    #[error("llm backend [{backend}] returned non-conforming replies after {attempts} attempts")]
    Contract { backend: String, attempts: u32 },

    /// A tool-server definition asks for a transport we do not speak.
    #[error("unsupported transport '{transport}' for tool server [{server}] (stdio only)")]
    UnsupportedTransport { server: String, transport: String },
}
