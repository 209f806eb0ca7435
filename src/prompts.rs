//! Centralized prompt and interview text.
//!
//! Holds the grading pipe's system prompt and the fixed question templates
//! the interview uses. Keeping them here makes them easy to review and version.

/// System prompt for the interview grading pipe.
///
/// Used both when creating the pipe and when building grading messages.
pub const GRADER_PROMPT: &str = r#"You evaluate a math student's free-text answer to a follow-up interview question, using the rubric you are given.

Your response MUST be valid JSON in this exact format:
{
  "rating": "excellent | good | developing | needs_work",
  "strengths": "what the student did well",
  "areas_for_growth": "what to improve",
  "understanding_level": "deep | surface | misconception"
}

Guidelines:
- Pick the rubric band that best matches the response
- "misconception" means the student holds a specific wrong idea, not just an incomplete one
- Be specific and constructive
- Quote the student when it helps

Always respond with valid JSON only, no other text."#;

/// Explanation question: the learner walks through their reasoning.
pub const EXPLANATION_TEMPLATE: &str =
    "Solve this problem and explain each step of your reasoning, including why you chose it:\n\n{problem}";

/// Transfer question: the concept in a new context.
pub const TRANSFER_TEMPLATE: &str = "Describe a real-world situation where you would use {skill}. Then explain how your situation is like this problem:\n\n{problem}";

/// Misconception probe: what goes wrong with a typical error.
pub const MISCONCEPTION_PROBE_TEMPLATE: &str = "Here is a problem on {skill}:\n\n{problem}\n\nWhat is a common mistake someone might make on a problem like this? Why doesn't that approach work?";

/// Text used when the item bank has no problem for the skill.
pub const NO_BASE_PROBLEM: &str = "(choose any problem you like that uses this skill)";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_templates_have_placeholders() {
        assert!(EXPLANATION_TEMPLATE.contains("{problem}"));
        assert!(TRANSFER_TEMPLATE.contains("{skill}"));
        assert!(TRANSFER_TEMPLATE.contains("{problem}"));
        assert!(MISCONCEPTION_PROBE_TEMPLATE.contains("{skill}"));
        assert!(MISCONCEPTION_PROBE_TEMPLATE.contains("{problem}"));
    }

    #[test]
    fn test_grader_prompt_names_every_band() {
        for band in ["excellent", "good", "developing", "needs_work"] {
            assert!(GRADER_PROMPT.contains(band));
        }
        for level in ["deep", "surface", "misconception"] {
            assert!(GRADER_PROMPT.contains(level));
        }
    }
}
