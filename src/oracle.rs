//! Semantic similarity oracle contract.
//!
//! Fuzzy judgements (are these two names the same person? does the recent
//! conversation point at this candidate?) are delegated to an external judge,
//! usually a language model. The contract is deliberately narrow: render a
//! prompt, get text back, extract a decimal in [0, 1]. Anything else counts as
//! "no evidence".

use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

use crate::similarity::{name_similarity, normalize_name};

/// Errors reported by an oracle backend.
#[derive(Debug, Error)]
pub enum OracleError {
    /// The backend could not be reached or refused the request.
    #[error("oracle unavailable: {0}")]
    Unavailable(String),

    /// The backend did not answer in time.
    #[error("oracle timed out after {0}ms")]
    Timeout(u64),
}

/// A question put to the oracle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OraclePrompt {
    /// Do two names refer to the same actor?
    NameSimilarity {
        /// Name being resolved.
        left: String,
        /// Known entity name.
        right: String,
    },

    /// Does the recent conversation suggest `identifier` means this candidate?
    ContextualHint {
        /// Name being resolved.
        identifier: String,
        /// Names of the candidate entity.
        candidate_names: Vec<String>,
        /// Recent turns, oldest first, rendered as `speaker: text`.
        transcript: Vec<String>,
    },
}

impl OraclePrompt {
    /// Renders the prompt as plain text for a language-model backend.
    #[must_use]
    pub fn render(&self) -> String {
        match self {
            Self::NameSimilarity { left, right } => format!(
                "Rate how likely it is that these two names refer to the same person.\n\
                 Name A: {left}\n\
                 Name B: {right}\n\
                 Respond with only a decimal number between 0 and 1."
            ),
            Self::ContextualHint {
                identifier,
                candidate_names,
                transcript,
            } => format!(
                "Given the recent conversation, rate how likely it is that \"{identifier}\" \
                 refers to the entity known as: {}.\n\
                 Conversation:\n{}\n\
                 Respond with only a decimal number between 0 and 1.",
                candidate_names.join(", "),
                transcript.join("\n")
            ),
        }
    }
}

/// External judge producing similarity scores.
pub trait SimilarityOracle: Send + Sync {
    /// Name of the oracle backend (for logs).
    fn name(&self) -> &str;

    /// Answers a prompt. The response is expected to contain a decimal in [0, 1].
    fn generate(&self, prompt: &OraclePrompt) -> Result<String, OracleError>;
}

fn score_regex() -> Option<&'static Regex> {
    static SCORE: OnceLock<Option<Regex>> = OnceLock::new();
    SCORE.get_or_init(|| Regex::new(r"\d*\.?\d+").ok()).as_ref()
}

/// Extracts the first decimal in [0, 1] from an oracle response.
///
/// Returns `None` when the first number found is out of range or there is no
/// number at all.
#[must_use]
pub fn parse_score(response: &str) -> Option<f32> {
    let m = score_regex()?.find(response)?;
    let value: f32 = m.as_str().parse().ok()?;
    (value.is_finite() && (0.0..=1.0).contains(&value)).then_some(value)
}

/// Asks the oracle and extracts a score, degrading every failure to `None`.
pub(crate) fn ask(oracle: &dyn SimilarityOracle, prompt: &OraclePrompt) -> Option<f32> {
    match oracle.generate(prompt) {
        Ok(response) => {
            let score = parse_score(&response);
            if score.is_none() {
                tracing::debug!(
                    oracle = oracle.name(),
                    response = %response,
                    "oracle response carried no usable score"
                );
            }
            score
        }
        Err(e) => {
            tracing::warn!(oracle = oracle.name(), error = %e, "oracle call failed, factor skipped");
            None
        }
    }
}

/// Deterministic offline oracle.
///
/// Name questions are answered with Jaro-Winkler similarity. Context questions
/// are answered by counting transcript turns that mention one of the
/// candidate's names. Suitable for tests and for deployments without a
/// language model.
#[derive(Debug, Clone, Copy, Default)]
pub struct LexicalOracle;

impl LexicalOracle {
    /// Creates a new lexical oracle.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    #[allow(clippy::cast_precision_loss)]
    fn context_score(candidate_names: &[String], transcript: &[String]) -> f32 {
        let names: Vec<String> = candidate_names
            .iter()
            .map(|n| normalize_name(n))
            .filter(|n| !n.is_empty())
            .collect();
        let mentions = transcript
            .iter()
            .filter(|turn| {
                let turn = turn.to_lowercase();
                names.iter().any(|n| turn.contains(n.as_str()))
            })
            .count();
        if mentions == 0 {
            0.0
        } else {
            (0.3 + 0.15 * mentions as f32).min(0.9)
        }
    }
}

impl SimilarityOracle for LexicalOracle {
    fn name(&self) -> &str {
        "lexical"
    }

    fn generate(&self, prompt: &OraclePrompt) -> Result<String, OracleError> {
        let score = match prompt {
            OraclePrompt::NameSimilarity { left, right } => name_similarity(left, right),
            OraclePrompt::ContextualHint {
                candidate_names,
                transcript,
                ..
            } => Self::context_score(candidate_names, transcript),
        };
        Ok(format!("{score:.4}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Broken;

    impl SimilarityOracle for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn generate(&self, _prompt: &OraclePrompt) -> Result<String, OracleError> {
            Err(OracleError::Unavailable("down".to_string()))
        }
    }

    #[test]
    fn parse_score_extracts_first_decimal() {
        assert_eq!(parse_score("0.85"), Some(0.85));
        assert_eq!(parse_score("Score: 0.4 (fairly likely)"), Some(0.4));
        assert_eq!(parse_score("1"), Some(1.0));
        assert_eq!(parse_score(".5"), Some(0.5));
    }

    #[test]
    fn parse_score_rejects_garbage_and_out_of_range() {
        assert_eq!(parse_score("no idea"), None);
        assert_eq!(parse_score("85"), None);
        assert_eq!(parse_score(""), None);
    }

    #[test]
    fn ask_degrades_errors_to_none() {
        let prompt = OraclePrompt::NameSimilarity {
            left: "a".to_string(),
            right: "b".to_string(),
        };
        assert_eq!(ask(&Broken, &prompt), None);
    }

    #[test]
    fn lexical_oracle_scores_names() {
        let prompt = OraclePrompt::NameSimilarity {
            left: "Alice".to_string(),
            right: "Alicia".to_string(),
        };
        let score = ask(&LexicalOracle, &prompt).unwrap();
        assert!(score > 0.7);
    }

    #[test]
    fn lexical_oracle_scores_context_mentions() {
        let prompt = OraclePrompt::ContextualHint {
            identifier: "she".to_string(),
            candidate_names: vec!["Alice".to_string()],
            transcript: vec![
                "bob: have you seen Alice today?".to_string(),
                "carol: no".to_string(),
            ],
        };
        let score = ask(&LexicalOracle, &prompt).unwrap();
        assert!((score - 0.45).abs() < 1e-3, "got {score}");

        let silent = OraclePrompt::ContextualHint {
            identifier: "she".to_string(),
            candidate_names: vec!["Alice".to_string()],
            transcript: vec!["carol: no".to_string()],
        };
        assert_eq!(ask(&LexicalOracle, &silent), Some(0.0));
    }

    #[test]
    fn render_mentions_both_names() {
        let text = OraclePrompt::NameSimilarity {
            left: "Alice".to_string(),
            right: "Alicia".to_string(),
        }
        .render();
        assert!(text.contains("Name A: Alice"));
        assert!(text.contains("Name B: Alicia"));
    }
}
