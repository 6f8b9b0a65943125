//! Revive Clients - HTTP clients for the services Revive talks to
//!
//! - openai: OpenAI-compatible threads/assistants/runs and chat completions
//! - gateway: messaging gateway used for outbound WhatsApp-style sends

pub mod gateway;
pub mod openai;

pub use gateway::{GatewayClient, GatewayError, SendReceipt};
pub use openai::{
    ChatCompletion, ChatMessage, ChatRequest, OpenAiClient, OpenAiError, Run, RunStatus,
    ThreadMessage, Usage,
};
