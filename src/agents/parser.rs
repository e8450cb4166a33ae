use super::types::{ActionKind, ParsedAction};

/// One non-empty line of a planner block
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanLine {
    /// Free text shown to the user, never executed
    Commentary(String),
    Action(ParsedAction),
    /// Looks like an action but names no known header
    Unrecognized { header: String, line: String },
}

/// Split a planner block into classified lines. Blank lines and code fences are
/// dropped.
pub fn parse_plan(plan: &str) -> Vec<PlanLine> {
    plan.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("```"))
        .map(parse_line)
        .collect()
}

/// Classify a single trimmed line
pub fn parse_line(line: &str) -> PlanLine {
    let Some((left, rest)) = line.split_once("::") else {
        return PlanLine::Commentary(line.to_string());
    };

    let header = strip_decoration(left);
    if !is_header_like(header) {
        return PlanLine::Commentary(line.to_string());
    }

    let Some(kind) = ActionKind::from_header(header) else {
        return PlanLine::Unrecognized {
            header: header.to_string(),
            line: line.to_string(),
        };
    };

    PlanLine::Action(ParsedAction::new(kind, split_params(kind, rest)))
}

/// Action-shaped header: a known header in any case, or an upper-case identifier
fn is_header_like(header: &str) -> bool {
    if ActionKind::from_header(header).is_some() {
        return true;
    }
    let mut chars = header.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_uppercase())
        && chars.all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

/// Drop list bullets and inline-code markers planners like to add
fn strip_decoration(text: &str) -> &str {
    text.trim()
        .trim_start_matches(|c: char| c == '-' || c == '*' || c == '`' || c.is_whitespace())
        .trim()
}

fn split_params(kind: ActionKind, rest: &str) -> Vec<String> {
    let rest = rest.trim().trim_end_matches('`');
    if rest.is_empty() {
        return Vec::new();
    }
    rest.splitn(kind.arity(), "::")
        .map(clean_param)
        .collect()
}

fn clean_param(param: &str) -> String {
    let trimmed = param.trim();
    for quote in ['"', '\'', '`'] {
        if trimmed.len() >= 2 && trimmed.starts_with(quote) && trimmed.ends_with(quote) {
            return trimmed[1..trimmed.len() - 1].to_string();
        }
    }
    trimmed.to_string()
}
