//! The provider multiplexer: one internal chat-completion shape, translated
//! on the wire to and from each upstream dialect, with failover and a
//! supervisor for the local inference daemon.

pub mod anthropic;
pub mod chain;
pub mod error;
pub mod gemini;
pub mod model;
pub mod openai;
pub mod supervisor;

pub use {
    chain::{FailoverOutcome, Provider, ProviderChain, provider_for_model},
    error::ProviderError,
    model::{
        ChatMessage, ChatRequest, CompletionResponse, ContentBlock, StreamEvent, ToolCall,
        ToolCallAssembler, Usage, UserContent,
    },
    supervisor::LocalDaemon,
};
