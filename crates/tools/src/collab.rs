//! Collaborator contracts: engines implemented outside the core that the
//! tool executor calls through these traits. Any error a collaborator
//! returns reaches the model as a tool-result string prefixed `"Error:"`.

use std::sync::Arc;

use {anyhow::Result, async_trait::async_trait, serde::Serialize};

#[derive(Debug, Clone, Serialize)]
pub struct MemoryHit {
    pub id: String,
    pub text: String,
    pub score: f64,
}

#[async_trait]
pub trait MemoryIndex: Send + Sync {
    async fn add(&self, text: &str) -> Result<String>;
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<MemoryHit>>;
    async fn timeline_search(&self, query: &str, top_k: usize) -> Result<Vec<MemoryHit>>;
    async fn remove(&self, id: &str) -> Result<()>;
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentHit {
    pub name: String,
    pub chunk_index: usize,
    pub text: String,
    pub score: f64,
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<DocumentHit>>;
}

#[derive(Debug, Clone, Serialize)]
pub struct SandboxOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub artifacts: Vec<String>,
}

#[async_trait]
pub trait CodeSandbox: Send + Sync {
    async fn execute(&self, code: &str, language: &str) -> Result<SandboxOutput>;
}

#[derive(Debug, Clone, Serialize)]
pub struct BrowserOutput {
    pub ok: bool,
    pub content: String,
}

#[async_trait]
pub trait BrowserAutomation: Send + Sync {
    async fn execute(&self, action: &str, params: serde_json::Value) -> Result<BrowserOutput>;
}

#[derive(Debug, Clone, Serialize)]
pub struct CalendarEvent {
    pub title: String,
    pub start: String,
    pub end: Option<String>,
}

#[async_trait]
pub trait CalendarCollaborator: Send + Sync {
    async fn list_events(&self, days: u32) -> Result<Vec<CalendarEvent>>;
    async fn create_event(&self, event: CalendarEvent) -> Result<String>;
    async fn find_free_slots(&self, duration_minutes: u32, days: u32) -> Result<Vec<String>>;
}

#[async_trait]
pub trait ImageGenerator: Send + Sync {
    /// Returns a text summary carrying the image URL.
    async fn generate(&self, prompt: &str, size: Option<&str>) -> Result<String>;
}

/// Host for external `mcp_*` tools, dispatched over a stdio protocol.
#[async_trait]
pub trait ExternalToolHost: Send + Sync {
    async fn execute(&self, tool_name: &str, arguments: serde_json::Value) -> Result<String>;
}

/// The executor's handle to every collaborator. Absent collaborators make
/// their tools report themselves unconfigured.
#[derive(Clone, Default)]
pub struct Collaborators {
    pub memory: Option<Arc<dyn MemoryIndex>>,
    pub documents: Option<Arc<dyn DocumentStore>>,
    pub sandbox: Option<Arc<dyn CodeSandbox>>,
    pub browser: Option<Arc<dyn BrowserAutomation>>,
    pub calendar: Option<Arc<dyn CalendarCollaborator>>,
    pub images: Option<Arc<dyn ImageGenerator>>,
    pub external_tools: Option<Arc<dyn ExternalToolHost>>,
}
