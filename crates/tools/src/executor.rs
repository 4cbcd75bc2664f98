//! The tool executor: a dispatch switch over the built-in catalogue, with
//! access-level and scope enforcement re-checked at execution time.
//!
//! Execution never fails outward — every outcome, including denials and
//! collaborator errors, becomes a tool-result message so the model can
//! react and the conversation continues.

use std::{path::PathBuf, time::Duration};

use tracing::{info, warn};

use {
    torbo_common::AccessLevel,
    torbo_config::{AgentConfig, ToolsConfig},
    torbo_policy::{CommandClass, ScopePolicy, classify_command},
    torbo_providers::{ChatMessage, ToolCall},
};

use crate::{
    catalogue::find_capability,
    collab::{CalendarEvent, Collaborators},
    fs_tools, shell, web,
};

pub struct ToolExecutor {
    tools_cfg: ToolsConfig,
    collaborators: Collaborators,
}

impl ToolExecutor {
    pub fn new(tools_cfg: ToolsConfig) -> Self {
        Self {
            tools_cfg,
            collaborators: Collaborators::default(),
        }
    }

    pub fn with_collaborators(mut self, collaborators: Collaborators) -> Self {
        self.collaborators = collaborators;
        self
    }

    /// Execute one tool call on behalf of an agent running at `effective`
    /// level. Always returns a tool-result message.
    pub async fn execute(
        &self,
        call: &ToolCall,
        agent: &AgentConfig,
        effective: AccessLevel,
    ) -> ChatMessage {
        let content = self.run(call, agent, effective).await;
        if content.starts_with("Error:") || content.starts_with("BLOCKED:") {
            warn!(tool = %call.name, agent = %agent.id, result = %content, "tool call refused or failed");
        } else {
            info!(tool = %call.name, agent = %agent.id, "tool executed");
        }
        ChatMessage::tool_result(call.id.clone(), content)
    }

    async fn run(&self, call: &ToolCall, agent: &AgentConfig, effective: AccessLevel) -> String {
        // External tools bypass the catalogue; the host enforces its own
        // contract.
        if call.name.starts_with("mcp_") {
            return match self.collaborators.external_tools {
                Some(ref host) => host
                    .execute(&call.name, call.arguments.clone())
                    .await
                    .unwrap_or_else(|e| format!("Error: {e}")),
                None => "Error: external tools are not configured".to_string(),
            };
        }

        let Some(capability) = find_capability(&call.name) else {
            return format!("Error: unknown tool {}", call.name);
        };

        // Defense in depth: visibility filtering already applied these
        // checks, but a forced tool_choice must not slip through.
        if effective < capability.minimum_level {
            return format!(
                "BLOCKED: requires {} access level",
                capability.minimum_level
            );
        }
        if !agent.category_enabled(capability.category)
            || !self.tools_cfg.category_enabled(capability.category)
        {
            return format!("BLOCKED: tool category {:?} is disabled", capability.category);
        }

        let scope = ScopePolicy::new(&agent.directory_scopes, effective == AccessLevel::Full);
        let args = &call.arguments;

        match call.name.as_str() {
            "read_file" => match required_str(args, "path") {
                Some(path) => fs_tools::read_file(&scope, path)
                    .await
                    .unwrap_or_else(fmt_err),
                None => invalid_args(),
            },
            "write_file" => {
                // Empty content is a legal write; only the path must be set.
                let content = args.get("content").and_then(|v| v.as_str());
                match (required_str(args, "path"), content) {
                    (Some(path), Some(content)) => fs_tools::write_file(&scope, path, content)
                        .await
                        .unwrap_or_else(fmt_err),
                    _ => invalid_args(),
                }
            },
            "list_directory" => match required_str(args, "path") {
                Some(path) => fs_tools::list_directory(&scope, path)
                    .await
                    .unwrap_or_else(fmt_err),
                None => invalid_args(),
            },
            "run_command" => match required_str(args, "command") {
                Some(command) => self.run_command(command, args, effective).await,
                None => invalid_args(),
            },
            "web_fetch" => match required_str(args, "url") {
                Some(url) => web::web_fetch(url, self.tools_cfg.web_fetch_max_chars)
                    .await
                    .unwrap_or_else(fmt_err),
                None => invalid_args(),
            },
            "web_search" => match required_str(args, "query") {
                Some(query) => {
                    let max = args["max_results"].as_u64().map(|n| n as usize);
                    web::web_search(&self.tools_cfg.web_search, query, max)
                        .await
                        .unwrap_or_else(fmt_err)
                },
                None => invalid_args(),
            },
            "memory_search" => match (&self.collaborators.memory, required_str(args, "query")) {
                (Some(memory), Some(query)) => {
                    let timeline = args["timeline"].as_bool().unwrap_or(false);
                    let result = if timeline {
                        memory.timeline_search(query, 5).await
                    } else {
                        memory.search(query, 5).await
                    };
                    result
                        .map(|hits| {
                            if hits.is_empty() {
                                "No matching memories".to_string()
                            } else {
                                hits.iter()
                                    .map(|h| format!("[{}] {}", h.id, h.text))
                                    .collect::<Vec<_>>()
                                    .join("\n")
                            }
                        })
                        .unwrap_or_else(fmt_err)
                },
                (None, _) => not_configured("memory"),
                (_, None) => invalid_args(),
            },
            "memory_add" => match (&self.collaborators.memory, required_str(args, "text")) {
                (Some(memory), Some(text)) => memory
                    .add(text)
                    .await
                    .map(|id| format!("Remembered ({id})"))
                    .unwrap_or_else(fmt_err),
                (None, _) => not_configured("memory"),
                (_, None) => invalid_args(),
            },
            "memory_remove" => match (&self.collaborators.memory, required_str(args, "id")) {
                (Some(memory), Some(id)) => memory
                    .remove(id)
                    .await
                    .map(|()| format!("Removed memory {id}"))
                    .unwrap_or_else(fmt_err),
                (None, _) => not_configured("memory"),
                (_, None) => invalid_args(),
            },
            "document_search" => {
                match (&self.collaborators.documents, required_str(args, "query")) {
                    (Some(documents), Some(query)) => {
                        let top_k = args["top_k"].as_u64().unwrap_or(5) as usize;
                        documents
                            .search(query, top_k)
                            .await
                            .map(|hits| {
                                if hits.is_empty() {
                                    "No matching documents".to_string()
                                } else {
                                    hits.iter()
                                        .map(|h| {
                                            format!("{} #{}: {}", h.name, h.chunk_index, h.text)
                                        })
                                        .collect::<Vec<_>>()
                                        .join("\n")
                                }
                            })
                            .unwrap_or_else(fmt_err)
                    },
                    (None, _) => not_configured("document search"),
                    (_, None) => invalid_args(),
                }
            },
            "execute_code" => {
                match (
                    &self.collaborators.sandbox,
                    required_str(args, "code"),
                    required_str(args, "language"),
                ) {
                    (Some(sandbox), Some(code), Some(language)) => sandbox
                        .execute(code, language)
                        .await
                        .map(|out| {
                            format!(
                                "exit {}\nstdout:\n{}\nstderr:\n{}",
                                out.exit_code, out.stdout, out.stderr
                            )
                        })
                        .unwrap_or_else(fmt_err),
                    (None, ..) => not_configured("code sandbox"),
                    _ => invalid_args(),
                }
            },
            "browser_action" => {
                match (&self.collaborators.browser, required_str(args, "action")) {
                    (Some(browser), Some(action)) => browser
                        .execute(action, args["params"].clone())
                        .await
                        .map(|out| out.content)
                        .unwrap_or_else(fmt_err),
                    (None, _) => not_configured("browser automation"),
                    (_, None) => invalid_args(),
                }
            },
            "calendar_list" => match &self.collaborators.calendar {
                Some(calendar) => {
                    let days = args["days"].as_u64().unwrap_or(7) as u32;
                    calendar
                        .list_events(days)
                        .await
                        .map(|events| {
                            if events.is_empty() {
                                "No upcoming events".to_string()
                            } else {
                                events
                                    .iter()
                                    .map(|e| format!("{} — {}", e.start, e.title))
                                    .collect::<Vec<_>>()
                                    .join("\n")
                            }
                        })
                        .unwrap_or_else(fmt_err)
                },
                None => not_configured("calendar"),
            },
            "calendar_create" => {
                match (
                    &self.collaborators.calendar,
                    required_str(args, "title"),
                    required_str(args, "start"),
                ) {
                    (Some(calendar), Some(title), Some(start)) => calendar
                        .create_event(CalendarEvent {
                            title: title.to_string(),
                            start: start.to_string(),
                            end: args["end"].as_str().map(|s| s.to_string()),
                        })
                        .await
                        .map(|id| format!("Created event {id}"))
                        .unwrap_or_else(fmt_err),
                    (None, ..) => not_configured("calendar"),
                    _ => invalid_args(),
                }
            },
            "calendar_free_slots" => match &self.collaborators.calendar {
                Some(calendar) => match args["duration_minutes"].as_u64() {
                    Some(duration) => {
                        let days = args["days"].as_u64().unwrap_or(7) as u32;
                        calendar
                            .find_free_slots(duration as u32, days)
                            .await
                            .map(|slots| {
                                if slots.is_empty() {
                                    "No free slots found".to_string()
                                } else {
                                    slots.join("\n")
                                }
                            })
                            .unwrap_or_else(fmt_err)
                    },
                    None => invalid_args(),
                },
                None => not_configured("calendar"),
            },
            "generate_image" => {
                match (&self.collaborators.images, required_str(args, "prompt")) {
                    (Some(images), Some(prompt)) => images
                        .generate(prompt, args["size"].as_str())
                        .await
                        .unwrap_or_else(fmt_err),
                    (None, _) => not_configured("image generation"),
                    (_, None) => invalid_args(),
                }
            },
            other => format!("Error: unknown tool {other}"),
        }
    }

    async fn run_command(
        &self,
        command: &str,
        args: &serde_json::Value,
        effective: AccessLevel,
    ) -> String {
        match classify_command(command) {
            CommandClass::Blocked => {
                warn!(command, "blocked command refused");
                return "BLOCKED: command matches a blocked pattern".to_string();
            },
            CommandClass::Destructive if effective < AccessLevel::Full => {
                warn!(command, "destructive command refused below full access");
                return "BLOCKED: destructive command requires full access level".to_string();
            },
            CommandClass::Destructive => {
                warn!(command, "destructive command allowed at full access");
            },
            CommandClass::Moderate => {
                info!(command, "moderate command");
            },
            CommandClass::Safe => {},
        }

        let shell_cfg = &self.tools_cfg.shell;
        let timeout = args["timeout"]
            .as_u64()
            .unwrap_or(shell_cfg.timeout_seconds)
            .min(shell_cfg.max_timeout_seconds);
        let working_dir = args["working_dir"]
            .as_str()
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .or_else(|| shell_cfg.working_dir.as_ref().map(PathBuf::from))
            .or_else(|| directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf()));

        let opts = shell::ExecOpts {
            shell: shell_cfg.program.clone(),
            timeout: Duration::from_secs(timeout),
            working_dir,
        };

        match shell::exec_command(command, &opts).await {
            Ok(result) => {
                let mut out = format!("exit {}\n", result.exit_code);
                if !result.stdout.is_empty() {
                    out.push_str(&result.stdout);
                }
                if !result.stderr.is_empty() {
                    out.push_str("\nstderr:\n");
                    out.push_str(&result.stderr);
                }
                out
            },
            Err(e) if e.downcast_ref::<shell::ExecTimeout>().is_some() => {
                format!("Error: timeout — command did not finish ({e})")
            },
            Err(e) => format!("Error: {e}"),
        }
    }
}

fn required_str<'a>(args: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(|v| v.as_str()).filter(|s| !s.is_empty())
}

fn invalid_args() -> String {
    "Error: invalid arguments".to_string()
}

fn not_configured(what: &str) -> String {
    format!("Error: {what} is not configured")
}

fn fmt_err(e: anyhow::Error) -> String {
    let msg = e.to_string();
    if msg.starts_with("BLOCKED:") {
        msg
    } else {
        format!("Error: {msg}")
    }
}
