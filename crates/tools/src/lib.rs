//! Built-in tools: the static capability catalogue, the executor that runs
//! tool calls under access-level and path-scope enforcement, and the
//! collaborator traits for externally-implemented engines.

pub mod catalogue;
pub mod collab;
pub mod executor;
pub mod fs_tools;
pub mod shell;
pub mod web;

pub use {
    catalogue::{Capability, catalogue, find_capability, visible_tools},
    collab::Collaborators,
    executor::ToolExecutor,
};
