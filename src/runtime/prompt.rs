use crate::agents::ActionKind;

/// What each header does, shown to the planner
fn describe(kind: ActionKind) -> &'static str {
    match kind {
        ActionKind::CreateDirectory => "CREATE_DIRECTORY::path - Create a directory (and parents).",
        ActionKind::CreateFile => "CREATE_FILE::path - Create an empty file. Never overwrites.",
        ActionKind::WriteFile => {
            "WRITE_FILE::path::description - Write a NEW file; its content is generated from the description."
        }
        ActionKind::ReadFile => "READ_FILE::path - Read a file's content.",
        ActionKind::ModifyFile => {
            "MODIFY_FILE::path::description - Change an EXISTING file as described. The edit must change something."
        }
        ActionKind::DeletePath => "DELETE_PATH::path - Delete a file or directory (recursive).",
        ActionKind::MovePath => "MOVE_PATH::source::destination - Move or rename.",
        ActionKind::ListPaths => "LIST_PATHS::path - List files and directories recursively.",
        ActionKind::ShowTree => "SHOW_TREE::path - Show the directory structure.",
        ActionKind::Execute => "EXECUTE::command - Run a shell command in the project root.",
        ActionKind::ExecuteInput => {
            "EXECUTE_INPUT::command::input - Run a command and feed it the given standard input."
        }
        ActionKind::Finish => "FINISH::message - Use when the request is fully completed.",
    }
}

/// Protocol section of the planner prompt
pub fn protocol_description(max_actions_per_step: usize) -> String {
    let mut text = String::from("Available commands (one per line, exact format `HEADER::params`):\n");
    for (i, kind) in ActionKind::ALL.iter().enumerate() {
        text.push_str(&format!("{}. `{}`\n", i + 1, describe(*kind)));
    }
    text.push_str(&format!(
        "\nRules:\n- At most {} command(s) are executed per step; further commands are skipped.\n\
         - Lines without `::` are commentary shown to the user.\n\
         - Paths are relative to the project root. Sensitive paths (.git, .env, virtualenvs, caches) are off limits.\n\
         - Use WRITE_FILE only for new files and MODIFY_FILE for existing ones.\n\
         - Long-running or interactive programs time out; give them input with EXECUTE_INPUT.\n\
         - Read the System Response of the previous step before planning the next one.\n",
        max_actions_per_step
    ));
    text
}

/// Full planner prompt for one step
pub fn build_planner_prompt(
    request: &str,
    history: &str,
    last_result: Option<&str>,
    max_actions_per_step: usize,
) -> String {
    let mut prompt = String::from(
        "You are Pai, an expert and autonomous software developer AI.\n\
         Your goal is to help the user build and manage software projects.\n\
         You operate by creating a plan of workspace commands.\n\n",
    );
    prompt.push_str(&protocol_description(max_actions_per_step));
    prompt.push_str("\n--- PREVIOUS HISTORY ---\n");
    prompt.push_str(history);
    prompt.push_str("\n--- END OF HISTORY ---\n\n");

    if let Some(result) = last_result {
        prompt.push_str("--- SYSTEM RESPONSE OF THE LAST STEP ---\n");
        prompt.push_str(result);
        prompt.push_str("\n--- END OF SYSTEM RESPONSE ---\n\n");
    }

    prompt.push_str(&format!("Latest request from user:\n\"{}\"\n\n", request));
    prompt.push_str(
        "Based on the request and the entire history, output the next step of the plan. \
         When the request is complete, answer with FINISH::<summary>.",
    );
    prompt
}
