//! Langbase Pipes API client, used to grade interview answers.

mod client;
mod types;

pub use client::LangbaseClient;
pub use types::{
    CreatePipeRequest, CreatePipeResponse, Message, MessageRole, PipeRequest, PipeResponse,
    RawResponse, Usage,
};
