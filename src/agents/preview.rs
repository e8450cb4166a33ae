use std::fmt;

use super::parser::{parse_plan, PlanLine};
use super::types::{ActionKind, ParsedAction};

/// Shell family a preview is rendered for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetOs {
    Posix,
    Windows,
}

impl TargetOs {
    pub fn current() -> Self {
        if cfg!(target_os = "windows") {
            TargetOs::Windows
        } else {
            TargetOs::Posix
        }
    }

    fn shell(&self) -> &'static str {
        match self {
            TargetOs::Posix => "bash",
            TargetOs::Windows => "powershell",
        }
    }

    fn path_sep(&self) -> char {
        match self {
            TargetOs::Posix => '/',
            TargetOs::Windows => '\\',
        }
    }
}

impl fmt::Display for TargetOs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetOs::Posix => f.write_str(std::env::consts::OS),
            TargetOs::Windows => f.write_str("windows"),
        }
    }
}

/// Render the shell equivalents of a plan's action lines. Display only; nothing
/// here is executed.
pub fn preview_commands(plan: &str, os: TargetOs) -> String {
    let mut lines = vec![format!(
        "# OS: {} | Shell: {} | PathSep: {}",
        os,
        os.shell(),
        os.path_sep()
    )];
    for line in parse_plan(plan) {
        if let PlanLine::Action(action) = line {
            let rendered = match os {
                TargetOs::Posix => posix_command(&action),
                TargetOs::Windows => powershell_command(&action),
            };
            if !rendered.is_empty() {
                lines.push(rendered);
            }
        }
    }
    lines.join("\n")
}

fn or_dot(path: &str) -> &str {
    if path.is_empty() {
        "."
    } else {
        path
    }
}

fn posix_command(action: &ParsedAction) -> String {
    let (a, b) = (action.param(0), action.param(1));
    match action.kind {
        ActionKind::CreateDirectory => format!("mkdir -p '{}'", a),
        ActionKind::CreateFile => format!("touch '{}'", a),
        ActionKind::DeletePath => format!("rm -rf '{}'", a),
        ActionKind::MovePath => format!("mv '{}' '{}'", a, b),
        ActionKind::ListPaths => format!("ls -la '{}'", or_dot(a)),
        ActionKind::ShowTree => format!(
            "(command -v tree >/dev/null 2>&1 && tree '{0}') || find '{0}' -print",
            or_dot(a)
        ),
        ActionKind::ReadFile => format!("sed -n '1,200p' '{}'", a),
        ActionKind::WriteFile => format!("# write content to '{}' (omitted in preview)", a),
        ActionKind::ModifyFile => format!("# modify '{}' (apply diff)", a),
        ActionKind::Execute => a.to_string(),
        ActionKind::ExecuteInput => format!("printf '%s\\n' '{}' | {}", b, a),
        ActionKind::Finish => format!("# finish: {}", a),
    }
}

fn powershell_command(action: &ParsedAction) -> String {
    let (a, b) = (action.param(0), action.param(1));
    match action.kind {
        ActionKind::CreateDirectory => {
            format!("New-Item -ItemType Directory -Force -Path '{}' | Out-Null", a)
        }
        ActionKind::CreateFile => format!("New-Item -ItemType File -Force -Path '{}' | Out-Null", a),
        ActionKind::DeletePath => format!("Remove-Item -Recurse -Force -Path '{}'", a),
        ActionKind::MovePath => format!("Move-Item -Force -Path '{}' -Destination '{}'", a, b),
        ActionKind::ListPaths => format!("Get-ChildItem -Force -Recurse '{}'", or_dot(a)),
        ActionKind::ShowTree => format!(
            "Get-ChildItem -Force -Recurse '{}' | Format-List FullName",
            or_dot(a)
        ),
        ActionKind::ReadFile => format!("Get-Content -TotalCount 200 '{}'", a),
        ActionKind::WriteFile => format!("# write content to '{}' (omitted in preview)", a),
        ActionKind::ModifyFile => format!("# modify '{}' (apply diff)", a),
        ActionKind::Execute => a.to_string(),
        ActionKind::ExecuteInput => format!("'{}' | {}", b, a),
        ActionKind::Finish => format!("# finish: {}", a),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAN: &str = "Plan first.\nCREATE_DIRECTORY::src\nMOVE_PATH::a.txt::src/a.txt\nLIST_PATHS::\nFINISH::done";

    #[test]
    fn test_posix_preview() {
        let preview = preview_commands(PLAN, TargetOs::Posix);
        let lines: Vec<&str> = preview.lines().collect();
        assert!(lines[0].starts_with("# OS:"));
        assert_eq!(lines[1], "mkdir -p 'src'");
        assert_eq!(lines[2], "mv 'a.txt' 'src/a.txt'");
        assert_eq!(lines[3], "ls -la '.'");
        assert_eq!(lines[4], "# finish: done");
        assert_eq!(lines.len(), 5);
    }

    #[test]
    fn test_powershell_preview() {
        let preview = preview_commands(PLAN, TargetOs::Windows);
        assert!(preview.contains("New-Item -ItemType Directory -Force -Path 'src'"));
        assert!(preview.contains("Move-Item -Force -Path 'a.txt' -Destination 'src/a.txt'"));
        assert!(preview.contains("Shell: powershell"));
    }
}
