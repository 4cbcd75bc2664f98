//! Static registry of built-in tools: name, category, minimum access
//! level, and JSON-schema parameter shape.

use std::sync::LazyLock;

use torbo_common::{AccessLevel, ToolCategory};
use torbo_config::{AgentConfig, ToolsConfig};

#[derive(Debug, Clone)]
pub struct Capability {
    pub tool_name: &'static str,
    pub category: ToolCategory,
    pub minimum_level: AccessLevel,
    pub description: &'static str,
    pub parameters: serde_json::Value,
}

fn string_param(name: &str, description: &str) -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": { name: { "type": "string", "description": description } },
        "required": [name],
    })
}

static CATALOGUE: LazyLock<Vec<Capability>> = LazyLock::new(|| {
    vec![
        Capability {
            tool_name: "web_search",
            category: ToolCategory::Search,
            minimum_level: AccessLevel::Chat,
            description: "Search the web and return the top results.",
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "Search query" },
                    "max_results": { "type": "integer", "description": "Result cap (default 5)" },
                },
                "required": ["query"],
            }),
        },
        Capability {
            tool_name: "web_fetch",
            category: ToolCategory::Web,
            minimum_level: AccessLevel::Chat,
            description: "Fetch a URL and return its readable content.",
            parameters: string_param("url", "HTTP or HTTPS URL to fetch"),
        },
        Capability {
            tool_name: "memory_search",
            category: ToolCategory::Memory,
            minimum_level: AccessLevel::Chat,
            description: "Search long-term memory. Set timeline=true for time-ordered recall.",
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "What to recall" },
                    "timeline": { "type": "boolean", "description": "Time-ordered search" },
                },
                "required": ["query"],
            }),
        },
        Capability {
            tool_name: "memory_add",
            category: ToolCategory::Memory,
            minimum_level: AccessLevel::Chat,
            description: "Store a fact in long-term memory.",
            parameters: string_param("text", "Fact to remember"),
        },
        Capability {
            tool_name: "memory_remove",
            category: ToolCategory::Memory,
            minimum_level: AccessLevel::Chat,
            description: "Delete a memory by id.",
            parameters: string_param("id", "Memory id to delete"),
        },
        Capability {
            tool_name: "document_search",
            category: ToolCategory::Search,
            minimum_level: AccessLevel::Chat,
            description: "Search indexed documents.",
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "Search query" },
                    "top_k": { "type": "integer", "description": "Result cap (default 5)" },
                },
                "required": ["query"],
            }),
        },
        Capability {
            tool_name: "generate_image",
            category: ToolCategory::Images,
            minimum_level: AccessLevel::Chat,
            description: "Generate an image from a prompt.",
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "prompt": { "type": "string", "description": "Image description" },
                    "size": { "type": "string", "description": "e.g. 1024x1024" },
                },
                "required": ["prompt"],
            }),
        },
        Capability {
            tool_name: "list_directory",
            category: ToolCategory::Files,
            minimum_level: AccessLevel::Read,
            description: "List the entries of a directory.",
            parameters: string_param("path", "Directory path"),
        },
        Capability {
            tool_name: "read_file",
            category: ToolCategory::Files,
            minimum_level: AccessLevel::Read,
            description: "Read a text file.",
            parameters: string_param("path", "File path"),
        },
        Capability {
            tool_name: "calendar_list",
            category: ToolCategory::Calendar,
            minimum_level: AccessLevel::Read,
            description: "List upcoming calendar events.",
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "days": { "type": "integer", "description": "Days ahead (default 7)" },
                },
            }),
        },
        Capability {
            tool_name: "calendar_free_slots",
            category: ToolCategory::Calendar,
            minimum_level: AccessLevel::Read,
            description: "Find free time slots.",
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "duration_minutes": { "type": "integer", "description": "Slot length" },
                    "days": { "type": "integer", "description": "Days ahead (default 7)" },
                },
                "required": ["duration_minutes"],
            }),
        },
        Capability {
            tool_name: "write_file",
            category: ToolCategory::Files,
            minimum_level: AccessLevel::Write,
            description: "Write a text file. The previous version is backed up first.",
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "File path" },
                    "content": { "type": "string", "description": "New file content" },
                },
                "required": ["path", "content"],
            }),
        },
        Capability {
            tool_name: "calendar_create",
            category: ToolCategory::Calendar,
            minimum_level: AccessLevel::Write,
            description: "Create a calendar event.",
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "title": { "type": "string", "description": "Event title" },
                    "start": { "type": "string", "description": "ISO-8601 start time" },
                    "end": { "type": "string", "description": "ISO-8601 end time" },
                },
                "required": ["title", "start"],
            }),
        },
        Capability {
            tool_name: "run_command",
            category: ToolCategory::Execution,
            minimum_level: AccessLevel::Exec,
            description: "Run a shell command. Returns stdout, stderr, and the exit code.",
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "command": { "type": "string", "description": "Shell command" },
                    "timeout": { "type": "integer", "description": "Seconds (default 30, max 300)" },
                    "working_dir": { "type": "string", "description": "Working directory" },
                },
                "required": ["command"],
            }),
        },
        Capability {
            tool_name: "execute_code",
            category: ToolCategory::Scripting,
            minimum_level: AccessLevel::Exec,
            description: "Run code in the sandbox.",
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "code": { "type": "string", "description": "Source code" },
                    "language": { "type": "string", "description": "e.g. python" },
                },
                "required": ["code", "language"],
            }),
        },
        Capability {
            tool_name: "browser_action",
            category: ToolCategory::Browser,
            minimum_level: AccessLevel::Exec,
            description: "Drive the browser automation engine.",
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "action": { "type": "string", "description": "Action name" },
                    "params": { "type": "object", "description": "Action parameters" },
                },
                "required": ["action"],
            }),
        },
    ]
});

/// The full catalogue.
pub fn catalogue() -> &'static [Capability] {
    &CATALOGUE
}

/// Look up a built-in tool by name.
pub fn find_capability(name: &str) -> Option<&'static Capability> {
    CATALOGUE.iter().find(|c| c.tool_name == name)
}

/// The tool schemas advertised to the model for one request: level
/// permitting, agent category toggles permitting, server category toggles
/// permitting.
pub fn visible_tools(
    effective: AccessLevel,
    agent: &AgentConfig,
    tools_cfg: &ToolsConfig,
) -> Vec<serde_json::Value> {
    CATALOGUE
        .iter()
        .filter(|c| effective >= c.minimum_level)
        .filter(|c| agent.category_enabled(c.category))
        .filter(|c| tools_cfg.category_enabled(c.category))
        .map(|c| {
            serde_json::json!({
                "name": c.tool_name,
                "description": c.description,
                "parameters": c.parameters,
            })
        })
        .collect()
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn names(tools: &[serde_json::Value]) -> Vec<&str> {
        tools.iter().filter_map(|t| t["name"].as_str()).collect()
    }

    #[test]
    fn fixed_minimum_levels() {
        assert_eq!(
            find_capability("web_search").unwrap().minimum_level,
            AccessLevel::Chat
        );
        assert_eq!(
            find_capability("read_file").unwrap().minimum_level,
            AccessLevel::Read
        );
        assert_eq!(
            find_capability("write_file").unwrap().minimum_level,
            AccessLevel::Write
        );
        assert_eq!(
            find_capability("run_command").unwrap().minimum_level,
            AccessLevel::Exec
        );
    }

    #[test]
    fn chat_level_hides_file_tools() {
        let agent = AgentConfig::builtin_main();
        let tools = visible_tools(AccessLevel::Chat, &agent, &ToolsConfig::default());
        let names = names(&tools);
        assert!(names.contains(&"web_search"));
        assert!(!names.contains(&"read_file"));
        assert!(!names.contains(&"run_command"));
    }

    #[test]
    fn full_level_sees_everything() {
        let agent = AgentConfig::builtin_main();
        let tools = visible_tools(AccessLevel::Full, &agent, &ToolsConfig::default());
        assert_eq!(tools.len(), catalogue().len());
    }

    #[test]
    fn agent_category_toggle_hides_tools() {
        let mut agent = AgentConfig::builtin_main();
        agent
            .enabled_capabilities
            .insert(ToolCategory::Search, false);
        let tools = visible_tools(AccessLevel::Full, &agent, &ToolsConfig::default());
        let names = names(&tools);
        assert!(!names.contains(&"web_search"));
        assert!(!names.contains(&"document_search"));
        assert!(names.contains(&"web_fetch"));
    }

    #[test]
    fn server_category_toggle_hides_tools() {
        let agent = AgentConfig::builtin_main();
        let mut cfg = ToolsConfig::default();
        cfg.enabled_categories.insert(ToolCategory::Execution, false);
        let tools = visible_tools(AccessLevel::Full, &agent, &cfg);
        assert!(!names(&tools).contains(&"run_command"));
    }

    #[test]
    fn schemas_are_canonical_shape() {
        let agent = AgentConfig::builtin_main();
        for tool in visible_tools(AccessLevel::Full, &agent, &ToolsConfig::default()) {
            assert!(tool["name"].is_string());
            assert!(tool["description"].is_string());
            assert_eq!(tool["parameters"]["type"], "object");
        }
    }
}
