use anyhow::Result;
use async_trait::async_trait;

#[cfg(test)]
use mockall::automock;

/// What the dispatcher needs written for WRITE_FILE and MODIFY_FILE
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentRequest {
    pub path: String,
    pub description: String,
    /// Current file content, present for modifications
    pub current: Option<String>,
    /// Set on the retry after a no-op modification
    pub strict: bool,
}

impl ContentRequest {
    pub fn write(path: &str, description: &str) -> Self {
        Self {
            path: path.to_string(),
            description: description.to_string(),
            current: None,
            strict: false,
        }
    }

    pub fn modify(path: &str, description: &str, current: String) -> Self {
        Self {
            path: path.to_string(),
            description: description.to_string(),
            current: Some(current),
            strict: false,
        }
    }

    pub fn stricter(mut self) -> Self {
        self.strict = true;
        self
    }

    /// Prompt text sent to the planner model
    pub fn to_prompt(&self) -> String {
        match &self.current {
            None => format!(
                "You are an expert programming assistant. Write the complete content for the file '{}' based on the following description: \"{}\". Provide ONLY the raw file content without any explanations or markdown.",
                self.path, self.description
            ),
            Some(current) => {
                let mut prompt = format!(
                    "You are an expert programming assistant. Modify the file '{}' as follows: \"{}\".\n\n--- CURRENT CONTENT ---\n{}\n--- END OF CURRENT CONTENT ---\n\nReturn ONLY the complete new file content without any explanations or markdown.",
                    self.path, self.description, current
                );
                if self.strict {
                    prompt.push_str(
                        "\nYour previous answer was identical to the current content. The file MUST change: apply the requested modification now.",
                    );
                }
                prompt
            }
        }
    }
}

/// Produces file content from a description
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    async fn generate(&self, request: &ContentRequest) -> Result<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strict_prompt_demands_change() {
        let request = ContentRequest::modify("a.py", "rename x", "x = 1".to_string());
        assert!(!request.to_prompt().contains("MUST change"));
        assert!(request.stricter().to_prompt().contains("MUST change"));
    }

    #[test]
    fn test_write_prompt_names_path() {
        let prompt = ContentRequest::write("src/app.py", "a flask app").to_prompt();
        assert!(prompt.contains("src/app.py"));
        assert!(prompt.contains("a flask app"));
    }
}
