//! Seam to the external grader of free-text interview answers.
//!
//! The engine only ever talks to [`Grader`]. The default implementation,
//! [`LangbaseGrader`], runs a Langbase pipe and parses its completion either
//! as JSON or as `RATING: ...` / `STRENGTHS: ...` lines.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::extract_json_from_completion;
use super::interview::{QuestionType, Rubric};
use crate::config::Config;
use crate::error::{GradingError, GradingResult};
use crate::langbase::{LangbaseClient, Message, PipeRequest};
use crate::prompts::GRADER_PROMPT;

/// Rubric band assigned by the grader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rating {
    Excellent,
    Good,
    Developing,
    NeedsWork,
}

impl FromStr for Rating {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "excellent" => Ok(Rating::Excellent),
            "good" => Ok(Rating::Good),
            "developing" => Ok(Rating::Developing),
            "needs_work" => Ok(Rating::NeedsWork),
            _ => Err(format!("Unknown rating: {}", s)),
        }
    }
}

impl fmt::Display for Rating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Rating::Excellent => "excellent",
            Rating::Good => "good",
            Rating::Developing => "developing",
            Rating::NeedsWork => "needs_work",
        };
        f.write_str(s)
    }
}

/// Depth of understanding shown in a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnderstandingLevel {
    Deep,
    Surface,
    Misconception,
}

impl FromStr for UnderstandingLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "deep" => Ok(UnderstandingLevel::Deep),
            "surface" => Ok(UnderstandingLevel::Surface),
            "misconception" => Ok(UnderstandingLevel::Misconception),
            _ => Err(format!("Unknown understanding level: {}", s)),
        }
    }
}

/// What the grader returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub rating: Rating,
    pub strengths: String,
    pub areas_for_growth: String,
    pub understanding_level: UnderstandingLevel,
}

/// What the grader is given.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRequest {
    pub question_id: String,
    pub question_type: QuestionType,
    pub skill_id: String,
    pub question: String,
    pub rubric: Rubric,
    pub response: String,
}

/// External grading collaborator.
#[async_trait]
pub trait Grader: Send + Sync {
    /// Grade one response. Failures leave the question pending.
    async fn evaluate(&self, request: &EvaluationRequest) -> GradingResult<Evaluation>;

    /// Pipe or model label recorded in the invocation log.
    fn pipe_name(&self) -> Option<&str> {
        None
    }
}

/// Grades by running a Langbase pipe.
#[derive(Clone)]
pub struct LangbaseGrader {
    langbase: LangbaseClient,
    pipe_name: String,
}

impl LangbaseGrader {
    pub fn new(langbase: LangbaseClient, config: &Config) -> Self {
        Self {
            langbase,
            pipe_name: config.pipes.grader.clone(),
        }
    }

    fn build_messages(&self, request: &EvaluationRequest) -> Vec<Message> {
        let rubric = &request.rubric;
        vec![
            Message::system(GRADER_PROMPT),
            Message::user(format!(
                "Question: {}\nQuestion type: {}\nSkill: {}\nStudent's response: {}\n\n\
                 Rubric:\n- Excellent: {}\n- Good: {}\n- Developing: {}\n- Needs work: {}",
                request.question,
                request.question_type,
                request.skill_id,
                request.response,
                rubric.excellent,
                rubric.good,
                rubric.developing,
                rubric.needs_work,
            )),
        ]
    }
}

#[async_trait]
impl Grader for LangbaseGrader {
    async fn evaluate(&self, request: &EvaluationRequest) -> GradingResult<Evaluation> {
        let pipe_request = PipeRequest::new(&self.pipe_name, self.build_messages(request));
        let response = self.langbase.call_pipe(pipe_request).await?;

        debug!(
            question_id = %request.question_id,
            completion_len = response.completion.len(),
            "Grader completion received"
        );

        parse_evaluation(&response.completion)
    }

    fn pipe_name(&self) -> Option<&str> {
        Some(&self.pipe_name)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TextOrList {
    Text(String),
    List(Vec<String>),
}

impl TextOrList {
    fn into_text(self) -> String {
        match self {
            TextOrList::Text(s) => s.trim().to_string(),
            TextOrList::List(items) => items.join("; "),
        }
    }
}

#[derive(Deserialize)]
struct EvaluationPayload {
    rating: String,
    #[serde(default)]
    strengths: Option<TextOrList>,
    #[serde(default, alias = "areasForGrowth")]
    areas_for_growth: Option<TextOrList>,
    #[serde(default, alias = "understandingLevel")]
    understanding_level: Option<String>,
}

/// Parse a grader completion.
///
/// Accepts a JSON object (optionally fenced in a code block) or the line
/// format `RATING: / STRENGTHS: / AREAS_FOR_GROWTH: / UNDERSTANDING_LEVEL:`.
/// A missing or unknown rating is an error; a missing understanding level
/// reads as surface.
pub fn parse_evaluation(completion: &str) -> GradingResult<Evaluation> {
    if let Ok(json) = extract_json_from_completion(completion) {
        if let Ok(payload) = serde_json::from_str::<EvaluationPayload>(json) {
            return build_evaluation(
                &payload.rating,
                payload.strengths.map(TextOrList::into_text),
                payload.areas_for_growth.map(TextOrList::into_text),
                payload.understanding_level.as_deref(),
            );
        }
    }

    let mut rating = None;
    let mut strengths = None;
    let mut areas = None;
    let mut understanding = None;

    for line in completion.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim().trim_matches(|c: char| c == '*' || c == '-').trim();
        let value = value.trim().trim_matches('*').trim().to_string();
        match normalize(key).as_str() {
            "rating" => rating = Some(value),
            "strengths" => strengths = Some(value),
            "areas_for_growth" => areas = Some(value),
            "understanding_level" => understanding = Some(value),
            _ => {}
        }
    }

    let rating = rating.ok_or_else(|| GradingError::InvalidEvaluation {
        message: format!(
            "No rating found in completion: '{}'",
            completion.chars().take(100).collect::<String>()
        ),
    })?;

    build_evaluation(&rating, strengths, areas, understanding.as_deref())
}

fn build_evaluation(
    rating: &str,
    strengths: Option<String>,
    areas_for_growth: Option<String>,
    understanding_level: Option<&str>,
) -> GradingResult<Evaluation> {
    let rating = rating
        .parse::<Rating>()
        .map_err(|message| GradingError::InvalidEvaluation { message })?;
    let understanding_level = match understanding_level {
        Some(level) => level
            .parse::<UnderstandingLevel>()
            .map_err(|message| GradingError::InvalidEvaluation { message })?,
        None => UnderstandingLevel::Surface,
    };

    Ok(Evaluation {
        rating,
        strengths: strengths.unwrap_or_default(),
        areas_for_growth: areas_for_growth.unwrap_or_default(),
        understanding_level,
    })
}

fn normalize(s: &str) -> String {
    s.trim()
        .trim_matches(|c: char| c == '[' || c == ']')
        .to_lowercase()
        .replace([' ', '-'], "_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_json() {
        let eval = parse_evaluation(
            r#"{"rating": "good", "strengths": "clear steps", "areas_for_growth": "check units", "understanding_level": "surface"}"#,
        )
        .unwrap();
        assert_eq!(
            eval,
            Evaluation {
                rating: Rating::Good,
                strengths: "clear steps".to_string(),
                areas_for_growth: "check units".to_string(),
                understanding_level: UnderstandingLevel::Surface,
            }
        );
    }

    #[test]
    fn test_parse_fenced_json_with_lists() {
        let completion = "Here you go:\n```json\n{\"rating\": \"needs_work\", \"strengths\": [\"tried\", \"neat\"], \"areasForGrowth\": [\"sign errors\"], \"understandingLevel\": \"misconception\"}\n```";
        let eval = parse_evaluation(completion).unwrap();
        assert_eq!(eval.rating, Rating::NeedsWork);
        assert_eq!(eval.strengths, "tried; neat");
        assert_eq!(eval.areas_for_growth, "sign errors");
        assert_eq!(eval.understanding_level, UnderstandingLevel::Misconception);
    }

    #[test]
    fn test_parse_line_format() {
        let completion = "RATING: Excellent\nSTRENGTHS: Explained every step\n\
                          AREAS_FOR_GROWTH: None really\n**UNDERSTANDING_LEVEL:** deep";
        let eval = parse_evaluation(completion).unwrap();
        assert_eq!(eval.rating, Rating::Excellent);
        assert_eq!(eval.strengths, "Explained every step");
        assert_eq!(eval.understanding_level, UnderstandingLevel::Deep);
    }

    #[test]
    fn test_missing_understanding_defaults_to_surface() {
        let eval = parse_evaluation("RATING: developing").unwrap();
        assert_eq!(eval.understanding_level, UnderstandingLevel::Surface);
        assert_eq!(eval.strengths, "");
    }

    #[test]
    fn test_missing_rating_is_error() {
        let result = parse_evaluation("The student did fine.");
        assert!(matches!(result, Err(GradingError::InvalidEvaluation { .. })));
    }

    #[test]
    fn test_unknown_rating_is_error() {
        let result = parse_evaluation(r#"{"rating": "stellar"}"#);
        assert!(matches!(result, Err(GradingError::InvalidEvaluation { .. })));
    }

    #[test]
    fn test_rating_aliases() {
        assert_eq!("Needs Work".parse::<Rating>().unwrap(), Rating::NeedsWork);
        assert_eq!("needs-work".parse::<Rating>().unwrap(), Rating::NeedsWork);
        assert_eq!("[good]".parse::<Rating>().unwrap(), Rating::Good);
        assert_eq!(Rating::NeedsWork.to_string(), "needs_work");
    }
}
