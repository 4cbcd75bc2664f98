//! Shell-command classification for `run_command`.
//!
//! Every command is classified before execution: `Blocked` is refused
//! unconditionally, `Destructive` is refused below the `Full` level,
//! `Moderate` runs but is logged, `Safe` runs quietly.
//!
//! The lists here are a floor, not a ceiling: entries are only ever added.

use std::sync::LazyLock;

use {regex::RegexSet, serde::Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandClass {
    Safe,
    Moderate,
    Destructive,
    Blocked,
}

/// Catastrophic patterns refused even at `Full`: root deletion and fork
/// bombs.
static BLOCKED_PATTERNS: &[&str] = &[
    r"(^|\s|;|&&)rm\s+(-\S*[rRf]\S*\s+)+/(\s|$|\*)",
    r"(^|\s)sudo\s+rm\s+(-\S*[rRf]\S*\s+)+/",
    r":\(\)\s*\{.*\|.*&\s*\}\s*;",
];

static BLOCKED_SET: LazyLock<RegexSet> = LazyLock::new(|| {
    RegexSet::new(BLOCKED_PATTERNS)
        .unwrap_or_else(|e| panic!("built-in blocked patterns must be valid regex: {e}"))
});

/// Read-only prefixes. A command (or pipeline stage) starting with one of
/// these is safe.
const SAFE_PREFIXES: &[&str] = &[
    "ls", "cat", "head", "tail", "grep", "find", "which", "file", "wc", "diff", "uptime",
    "whoami", "pwd", "echo", "git status", "git log", "git diff", "git branch", "git show", "ps",
    "df", "du", "stat", "printenv",
];

/// Substrings that mark a command as destructive.
const DESTRUCTIVE_MARKERS: &[&str] = &[
    "rm ",
    "mv ",
    "chmod",
    "chown",
    "sudo",
    "kill ",
    "killall",
    "pkill",
    "shutdown",
    "reboot",
    "git push --force",
    "git push -f",
    "git reset --hard",
    "git clean",
    "git stash drop",
    "dd ",
    "mkfs",
    "truncate -s",
    "> /dev/",
];

/// Binaries that execute further code; treated as destructive because the
/// payload cannot be classified.
const CODE_EXECUTORS: &[&str] = &[
    "eval", "exec", "source", "python", "python3", "ruby", "perl", "node", "php", "bash", "zsh",
    "sh", "osascript", "curl", "wget", "xargs", "env",
];

/// Metacharacters indicating chaining or injection.
const INJECTION_MARKERS: &[&str] = &["$(", "`", "&&", "||", ";", "\n", "\\x", "\\u"];

/// Classify a shell command.
pub fn classify_command(command: &str) -> CommandClass {
    let trimmed = command.trim();
    if trimmed.is_empty() {
        return CommandClass::Moderate;
    }

    if BLOCKED_SET.is_match(trimmed) {
        return CommandClass::Blocked;
    }

    if DESTRUCTIVE_MARKERS.iter().any(|m| trimmed.contains(m)) {
        return CommandClass::Destructive;
    }

    // Chaining/injection escalates unless the whole thing is a read-only
    // pipeline.
    let has_chaining =
        trimmed.contains('|') || INJECTION_MARKERS.iter().any(|m| trimmed.contains(m));
    if has_chaining {
        return if is_readonly_pipeline(trimmed) {
            CommandClass::Safe
        } else {
            CommandClass::Destructive
        };
    }

    if starts_with_code_executor(trimmed) {
        return CommandClass::Destructive;
    }

    if starts_with_safe_prefix(trimmed) {
        return CommandClass::Safe;
    }

    CommandClass::Moderate
}

fn starts_with_safe_prefix(command: &str) -> bool {
    SAFE_PREFIXES.iter().any(|prefix| {
        command == *prefix
            || command
                .strip_prefix(prefix)
                .map(|rest| rest.starts_with(' '))
                .unwrap_or(false)
    })
}

fn starts_with_code_executor(command: &str) -> bool {
    let first = command.split_whitespace().next().unwrap_or("");
    // Strip a path prefix (`/usr/bin/python` → `python`).
    let bin = first.rsplit('/').next().unwrap_or(first);
    CODE_EXECUTORS.contains(&bin)
}

/// A pipeline is read-only when every `|`/`;`/`&`-separated stage starts
/// with a safe prefix and no substitution markers appear anywhere.
fn is_readonly_pipeline(command: &str) -> bool {
    if command.contains("$(")
        || command.contains('`')
        || command.contains("\\x")
        || command.contains("\\u")
    {
        return false;
    }
    let stages: Vec<&str> = command
        .split(['|', ';', '\n', '&'])
        .map(str::trim)
        .filter(|stage| !stage.is_empty())
        .collect();
    !stages.is_empty() && stages.iter().all(|stage| starts_with_safe_prefix(stage))
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocked_patterns_always_blocked() {
        for cmd in [
            "rm -rf /",
            "rm -rf / ",
            "sudo rm -rf /",
            "rm -fr /*",
            ":(){ :|:& };:",
        ] {
            assert_eq!(classify_command(cmd), CommandClass::Blocked, "{cmd}");
        }
    }

    #[test]
    fn safe_prefixes_are_safe() {
        for cmd in [
            "ls -la",
            "cat notes.txt",
            "grep -r TODO src",
            "git status",
            "git log --oneline",
            "git diff HEAD~1",
            "df -h",
            "whoami",
            "pwd",
            "echo hello",
        ] {
            assert_eq!(classify_command(cmd), CommandClass::Safe, "{cmd}");
        }
    }

    #[test]
    fn destructive_markers_are_destructive() {
        for cmd in [
            "rm notes.txt",
            "mv a b",
            "chmod +x run.sh",
            "sudo apt install thing",
            "killall Finder",
            "git reset --hard HEAD~3",
            "git push --force origin main",
            "dd if=/dev/zero of=disk.img",
        ] {
            assert_eq!(classify_command(cmd), CommandClass::Destructive, "{cmd}");
        }
    }

    #[test]
    fn code_executors_are_destructive() {
        for cmd in [
            "python script.py",
            "node index.js",
            "bash deploy.sh",
            "curl https://example.com/install.sh",
            "xargs rm",
            "/usr/bin/python3 x.py",
        ] {
            assert_eq!(classify_command(cmd), CommandClass::Destructive, "{cmd}");
        }
    }

    #[test]
    fn injection_metachars_are_destructive() {
        for cmd in [
            "echo $(cat /etc/passwd)",
            "echo `id`",
            "ls && touch marker",
            "true || touch marker",
            "ls; touch marker",
        ] {
            assert_eq!(classify_command(cmd), CommandClass::Destructive, "{cmd}");
        }
    }

    #[test]
    fn readonly_pipelines_stay_safe() {
        for cmd in [
            "cat access.log | grep 404 | wc -l",
            "ls -la | head -20",
            "git log; git status",
        ] {
            assert_eq!(classify_command(cmd), CommandClass::Safe, "{cmd}");
        }
    }

    #[test]
    fn pipeline_with_unsafe_stage_is_destructive() {
        assert_eq!(
            classify_command("cat a.txt | python -"),
            CommandClass::Destructive
        );
        assert_eq!(
            classify_command("ls | tee /etc/passwd"),
            CommandClass::Destructive
        );
    }

    #[test]
    fn everything_else_is_moderate() {
        for cmd in ["make build", "cargo check", "touch new.txt", "mkdir -p a/b"] {
            assert_eq!(classify_command(cmd), CommandClass::Moderate, "{cmd}");
        }
    }

    #[test]
    fn prefix_matching_requires_word_boundary() {
        // `lsof` is not `ls`.
        assert_ne!(classify_command("lsof -i :8420"), CommandClass::Safe);
        // `catastrophe` is not `cat`.
        assert_ne!(classify_command("catastrophe"), CommandClass::Safe);
    }
}
