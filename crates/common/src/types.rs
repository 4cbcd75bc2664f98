use serde::{Deserialize, Serialize};

/// The six-level access ladder. Levels are totally ordered; every API route
/// and every built-in tool declares the minimum level it requires.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    /// Blocks all non-pairing traffic.
    Off = 0,
    /// Plain conversation plus read-only web/memory tools.
    #[default]
    Chat = 1,
    /// Filesystem reads.
    Read = 2,
    /// Filesystem writes.
    Write = 3,
    /// Shell and code execution.
    Exec = 4,
    /// Everything, including the VIP bypass of path scoping.
    Full = 5,
}

impl AccessLevel {
    /// The effective level of an agent under a global server clamp.
    #[must_use]
    pub fn clamped_by(self, server: AccessLevel) -> AccessLevel {
        self.min(server)
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "off" => Some(Self::Off),
            "chat" => Some(Self::Chat),
            "read" => Some(Self::Read),
            "write" => Some(Self::Write),
            "exec" => Some(Self::Exec),
            "full" => Some(Self::Full),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Chat => "chat",
            Self::Read => "read",
            Self::Write => "write",
            Self::Exec => "exec",
            Self::Full => "full",
        }
    }
}

impl std::fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Category a tool belongs to. Agents and the server can toggle whole
/// categories off; a disabled category hides every tool in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCategory {
    Web,
    Files,
    Execution,
    Calendar,
    Automation,
    Screen,
    Clipboard,
    System,
    Search,
    Notifications,
    Network,
    Scripting,
    Memory,
    Images,
    Browser,
}

impl ToolCategory {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "web" => Some(Self::Web),
            "files" => Some(Self::Files),
            "execution" => Some(Self::Execution),
            "calendar" => Some(Self::Calendar),
            "automation" => Some(Self::Automation),
            "screen" => Some(Self::Screen),
            "clipboard" => Some(Self::Clipboard),
            "system" => Some(Self::System),
            "search" => Some(Self::Search),
            "notifications" => Some(Self::Notifications),
            "network" => Some(Self::Network),
            "scripting" => Some(Self::Scripting),
            "memory" => Some(Self::Memory),
            "images" => Some(Self::Images),
            "browser" => Some(Self::Browser),
            _ => None,
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_are_ordered() {
        assert!(AccessLevel::Off < AccessLevel::Chat);
        assert!(AccessLevel::Chat < AccessLevel::Read);
        assert!(AccessLevel::Read < AccessLevel::Write);
        assert!(AccessLevel::Write < AccessLevel::Exec);
        assert!(AccessLevel::Exec < AccessLevel::Full);
    }

    #[test]
    fn clamp_takes_minimum() {
        assert_eq!(
            AccessLevel::Full.clamped_by(AccessLevel::Read),
            AccessLevel::Read
        );
        assert_eq!(
            AccessLevel::Chat.clamped_by(AccessLevel::Full),
            AccessLevel::Chat
        );
    }

    #[test]
    fn parse_round_trips() {
        for level in [
            AccessLevel::Off,
            AccessLevel::Chat,
            AccessLevel::Read,
            AccessLevel::Write,
            AccessLevel::Exec,
            AccessLevel::Full,
        ] {
            assert_eq!(AccessLevel::parse(level.as_str()), Some(level));
        }
        assert_eq!(AccessLevel::parse("ADMIN"), None);
    }

    #[test]
    fn serde_uses_lowercase() {
        let json = serde_json::to_string(&AccessLevel::Exec).unwrap();
        assert_eq!(json, "\"exec\"");
        let back: AccessLevel = serde_json::from_str("\"full\"").unwrap();
        assert_eq!(back, AccessLevel::Full);
    }
}
