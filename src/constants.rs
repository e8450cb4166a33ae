/// Constants module to avoid magic numbers in the codebase

// Planner endpoint
pub const DEFAULT_PLANNER_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_PLANNER_MODEL: &str = "gemini-2.5-flash";
pub const HTTP_REQUEST_TIMEOUT_SECS: u64 = 600; // 10 minutes for large model requests

// Timeouts
pub const COMMAND_TIMEOUT_SECS: u64 = 30;
pub const SESSION_TIMEOUT_SECS: u64 = 900;
pub const READER_JOIN_TIMEOUT_MS: u64 = 500;
pub const SESSION_END_GRACE_MS: u64 = 1500;

// Captured output
pub const MAX_OUTPUT_BYTES: usize = 64 * 1024;
pub const OUTPUT_CHANNEL_CAPACITY: usize = 256;

// Dispatcher policy
pub const DEFAULT_MAX_ACTIONS_PER_STEP: usize = 1;
pub const DEFAULT_NOOP_STREAK_THRESHOLD: usize = 3;
pub const DIFF_PREVIEW_LINES: usize = 20;
pub const MAX_PLANNING_STEPS: usize = 25;

// Retry policy
pub const DEFAULT_MAX_RETRY_ATTEMPTS: u32 = 4;
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 500;
pub const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 8_000;
pub const DEFAULT_ROTATION_DELAY_MS: u64 = 250;
pub const DEFAULT_KEY_COOLDOWN_SECS: i64 = 600;

// Workspace layout
pub const HISTORY_DIR: &str = ".pai_history";
pub const AUDIT_LOG_FILE: &str = "audit.log";
pub const LOCAL_CONFIG_DIR: &str = ".pai";
pub const CREDENTIALS_FILE: &str = "credentials.json";

/// Path segments that are never readable, writable or listable by the agent.
pub const SENSITIVE_SEGMENTS: &[&str] = &[
    ".git",
    ".env",
    "venv",
    ".venv",
    "__pycache__",
    ".pai_history",
    ".idea",
    ".vscode",
    "node_modules",
    "target",
    ".mypy_cache",
    ".pytest_cache",
];

// Dangerous Commands (for safety checks)
pub const DANGEROUS_COMMANDS: &[&str] = &[
    "rm -rf /",
    "rm -rf /*",
    "rm -rf ~",
    "rm -rf ~/",
    "format c:",
    "del /f /s /q c:",
    ":(){ :|:& };:", // Fork bomb
    "mkfs",
    "dd if=/dev/zero",
    "chmod -R 777 /",
    "chmod -R 000 /",
    "> /dev/sda",
    "shutdown",
    "reboot",
];

/// Commands that reach the network. Matched on word boundaries.
pub const NETWORK_PATTERNS: &[&str] = &[
    r"\bcurl\b",
    r"\bwget\b",
    r"\bInvoke-WebRequest\b",
    r"\biwr\b",
    r"\bpip3?\s+(install|download)\b",
    r"\bpoetry\s+(add|install)\b",
    r"\bnpm\s+(install|i|add|ci)\b",
    r"\byarn\s+(add|install)\b",
    r"\bpnpm\s+(add|install|i)\b",
    r"\bcargo\s+(install|add|fetch|update)\b",
    r"\bgo\s+(get|install)\b",
    r"\bgem\s+install\b",
    r"\b(apt|apt-get|yum|dnf|brew|pacman)\s+(install|update|upgrade)\b",
    r"\bgit\s+(clone|fetch|pull|push)\b",
    r"\bssh\b",
    r"\bscp\b",
    r"\bsftp\b",
    r"\brsync\b",
    r"\bnc\b",
    r"\btelnet\b",
];
