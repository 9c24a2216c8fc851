//! Story prompts.

use crate::feature::Story;

/// An operator's answer to a question the agent asked about a story.
#[derive(Debug, Clone, PartialEq)]
pub struct OperatorGuidance {
    pub question: String,
    pub answer: String,
}

/// Prompt for one attempt at a story.
pub fn story_prompt(feature_title: &str, story: &Story, guidance: Option<&OperatorGuidance>) -> String {
    let mut prompt = format!(
        "You are implementing one story of the feature \"{}\".\n\n## Story {}: {}\n\n### Scope\n",
        feature_title, story.id, story.title
    );

    if story.scope.is_empty() {
        prompt.push_str("- No explicit scope; infer it from the story title\n");
    } else {
        for item in &story.scope {
            prompt.push_str(&format!("- {}\n", item));
        }
    }

    if !story.repos.is_empty() {
        prompt.push_str("\n### Repositories\n");
        for repo in &story.repos {
            prompt.push_str(&format!("- {}\n", repo));
        }
    }

    if let Some(guidance) = guidance {
        prompt.push_str(&format!(
            "\n## Operator Guidance\n\nYou previously asked: {}\nThe operator answered: {}\n",
            guidance.question, guidance.answer
        ));
    }

    prompt.push_str(
        r#"
## Rules
1. Work only within the scope of this story
2. Run the relevant tests before reporting completion
3. Commit your work with clear messages

## Reporting
End your response with exactly one status line:
CLAW_STATUS: COMPLETE
CLAW_STATUS: BLOCKED <reason>
CLAW_STATUS: NEEDS_INPUT <question>

For each commit you create, add a line:
CLAW_COMMIT: <sha> <message>

If you open a pull request, add:
CLAW_PR: <number>
"#,
    );

    prompt
}

/// Append the previous attempt's failure to a prompt.
pub fn with_previous_failure(prompt: &str, iteration: u32, error: &str) -> String {
    format!(
        "{}\n\n## Previous Attempt Failed\n\nIteration: {}\nError: {}\n\nPlease analyze the error and try a different approach.",
        prompt, iteration, error
    )
}

/// Prompt for answering an operator question about the running session.
pub fn question_prompt(feature_title: &str, current: Option<&Story>, question: &str) -> String {
    let mut prompt = format!("You are assisting with the feature \"{}\".\n", feature_title);
    if let Some(story) = current {
        prompt.push_str(&format!(
            "The story in progress is {}: {}.\n",
            story.id, story.title
        ));
    }
    prompt.push_str(&format!(
        "\nAnswer the operator's question briefly. Do not modify any files.\n\nQuestion: {}\n",
        question
    ));
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    fn story() -> Story {
        Story::new("2", "Add session middleware")
            .with_scope(&["cookie sessions", "logout"])
            .with_repos(&["api"])
    }

    #[test]
    fn test_story_prompt_sections() {
        let prompt = story_prompt("User auth", &story(), None);
        assert!(prompt.contains("feature \"User auth\""));
        assert!(prompt.contains("## Story 2: Add session middleware"));
        assert!(prompt.contains("- cookie sessions\n- logout\n"));
        assert!(prompt.contains("### Repositories\n- api\n"));
        assert!(prompt.contains("CLAW_STATUS: NEEDS_INPUT <question>"));
        assert!(!prompt.contains("Operator Guidance"));
    }

    #[test]
    fn test_story_prompt_with_guidance() {
        let guidance = OperatorGuidance {
            question: "Redis or cookies?".to_string(),
            answer: "Cookies".to_string(),
        };
        let prompt = story_prompt("User auth", &Story::new("1", "Login"), Some(&guidance));
        assert!(prompt.contains("No explicit scope"));
        assert!(prompt.contains("## Operator Guidance"));
        assert!(prompt.contains("You previously asked: Redis or cookies?"));
        assert!(prompt.contains("The operator answered: Cookies"));
    }

    #[test]
    fn test_previous_failure_section() {
        let prompt = with_previous_failure("base", 2, "3 tests failed");
        assert_eq!(
            prompt,
            "base\n\n## Previous Attempt Failed\n\nIteration: 2\nError: 3 tests failed\n\nPlease analyze the error and try a different approach."
        );
    }

    #[test]
    fn test_question_prompt() {
        let s = story();
        let prompt = question_prompt("User auth", Some(&s), "What is left?");
        assert!(prompt.contains("story in progress is 2"));
        assert!(prompt.ends_with("Question: What is left?\n"));
    }
}
