use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Duration;

use crate::constants::{
    COMMAND_TIMEOUT_SECS, DANGEROUS_COMMANDS, MAX_OUTPUT_BYTES, NETWORK_PATTERNS,
    SESSION_TIMEOUT_SECS,
};

static NETWORK_REGEXES: Lazy<Vec<Regex>> = Lazy::new(|| {
    NETWORK_PATTERNS
        .iter()
        .filter_map(|pattern| Regex::new(&format!("(?i){}", pattern)).ok())
        .collect()
});

/// Switches governing what the shell executor may run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellPolicy {
    pub allow_shell_exec: bool,
    pub allow_network: bool,
    pub stream_output: bool,
    pub timeout: Duration,
    pub session_timeout: Duration,
    pub max_output_bytes: usize,
}

impl Default for ShellPolicy {
    fn default() -> Self {
        Self {
            allow_shell_exec: true,
            allow_network: false,
            stream_output: false,
            timeout: Duration::from_secs(COMMAND_TIMEOUT_SECS),
            session_timeout: Duration::from_secs(SESSION_TIMEOUT_SECS),
            max_output_bytes: MAX_OUTPUT_BYTES,
        }
    }
}

/// Why a command was refused before spawning
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    ShellDisabled,
    Dangerous(String),
    Network(String),
    Empty,
}

impl Rejection {
    pub fn message(&self) -> String {
        match self {
            Rejection::ShellDisabled => {
                "Shell execution is disabled. Set PAI_ALLOW_SHELL_EXEC=true to enable.".to_string()
            }
            Rejection::Dangerous(pattern) => {
                format!("Dangerous command blocked (matched '{}')", pattern)
            }
            Rejection::Network(pattern) => format!(
                "Network access blocked (matched '{}'). Set PAI_ALLOW_NETWORK=true to allow it.",
                pattern
            ),
            Rejection::Empty => "Empty command".to_string(),
        }
    }
}

impl ShellPolicy {
    /// Screen a command against every switch, in order of severity
    pub fn screen(&self, command: &str) -> Result<(), Rejection> {
        if !self.allow_shell_exec {
            return Err(Rejection::ShellDisabled);
        }
        if command.trim().is_empty() {
            return Err(Rejection::Empty);
        }
        if let Some(pattern) = dangerous_match(command) {
            return Err(Rejection::Dangerous(pattern.to_string()));
        }
        if !self.allow_network {
            if let Some(pattern) = network_match(command) {
                return Err(Rejection::Network(pattern));
            }
        }
        Ok(())
    }
}

/// First destructive pattern found in `command`
pub fn dangerous_match(command: &str) -> Option<&'static str> {
    let lower = command.to_lowercase();
    if let Some(pattern) = DANGEROUS_COMMANDS
        .iter()
        .find(|pattern| lower.contains(&pattern.to_lowercase()))
    {
        return Some(pattern);
    }

    // Removing anything under a system directory
    let system_dirs = ["/etc", "/usr", "/boot", "/proc", "/sys", "c:\\windows"];
    let removes = lower.split_whitespace().any(|w| w == "rm" || w == "del");
    if removes {
        return system_dirs.iter().copied().find(|dir| lower.contains(dir));
    }
    None
}

/// First network-reaching command found in `command`
pub fn network_match(command: &str) -> Option<String> {
    NETWORK_REGEXES
        .iter()
        .find_map(|re| re.find(command).map(|m| m.as_str().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dangerous_commands_always_blocked() {
        let policy = ShellPolicy {
            allow_network: true,
            ..Default::default()
        };
        assert!(matches!(policy.screen("rm -rf /"), Err(Rejection::Dangerous(_))));
        assert!(matches!(policy.screen(":(){ :|:& };:"), Err(Rejection::Dangerous(_))));
        assert!(matches!(policy.screen("sudo rm -r /etc/hosts"), Err(Rejection::Dangerous(_))));
        assert!(policy.screen("ls -la").is_ok());
    }

    #[test]
    fn test_network_blocked_unless_allowed() {
        let policy = ShellPolicy::default();
        for cmd in [
            "curl https://example.com",
            "pip install requests",
            "git clone https://x/y.git",
            "npm install left-pad",
            "cargo add serde",
        ] {
            assert!(matches!(policy.screen(cmd), Err(Rejection::Network(_))), "{cmd}");
        }
        assert!(policy.screen("git status").is_ok());
        assert!(policy.screen("python -m pytest").is_ok());
        // Word boundaries: "curly" is not curl
        assert!(policy.screen("echo curly").is_ok());

        let open = ShellPolicy {
            allow_network: true,
            ..Default::default()
        };
        assert!(open.screen("curl https://example.com").is_ok());
    }

    #[test]
    fn test_disabled_shell_rejects_everything() {
        let policy = ShellPolicy {
            allow_shell_exec: false,
            ..Default::default()
        };
        let rejection = policy.screen("echo hi").unwrap_err();
        assert_eq!(rejection, Rejection::ShellDisabled);
        assert!(rejection.message().contains("PAI_ALLOW_SHELL_EXEC"));
    }

    #[test]
    fn test_empty_command_rejected() {
        assert_eq!(ShellPolicy::default().screen("  "), Err(Rejection::Empty));
    }
}
