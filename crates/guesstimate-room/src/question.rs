//! The question bank and per-room decks.

use std::sync::Arc;

use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

/// One estimation question.
///
/// The on-disk field names are `question`, `answer`, and `unit`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    #[serde(rename = "question")]
    pub prompt: String,
    #[serde(rename = "answer")]
    pub correct_answer: f64,
    pub unit: String,
}

/// Errors that can occur while loading a question bank.
#[derive(Debug, thiserror::Error)]
pub enum QuestionBankError {
    #[error("question bank is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("question bank is empty")]
    Empty,

    #[error("question {index} has an empty prompt")]
    EmptyPrompt { index: usize },

    /// Answers must be finite and strictly positive so that settlement's
    /// relative-distance tier is well defined.
    #[error("question {index} has invalid answer {answer}")]
    InvalidAnswer { index: usize, answer: f64 },
}

/// The validated, read-only set of questions loaded at startup.
///
/// Cloning is cheap; every room draws its own shuffled deck from it.
#[derive(Debug, Clone)]
pub struct QuestionBank {
    questions: Arc<[Question]>,
}

impl QuestionBank {
    pub fn new(questions: Vec<Question>) -> Result<Self, QuestionBankError> {
        if questions.is_empty() {
            return Err(QuestionBankError::Empty);
        }
        for (index, q) in questions.iter().enumerate() {
            if q.prompt.trim().is_empty() {
                return Err(QuestionBankError::EmptyPrompt { index });
            }
            if !q.correct_answer.is_finite() || q.correct_answer <= 0.0 {
                return Err(QuestionBankError::InvalidAnswer {
                    index,
                    answer: q.correct_answer,
                });
            }
        }
        Ok(Self {
            questions: questions.into(),
        })
    }

    /// Parses a JSON array of `{question, answer, unit}` records.
    pub fn from_json(json: &str) -> Result<Self, QuestionBankError> {
        let questions: Vec<Question> = serde_json::from_str(json)?;
        Self::new(questions)
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    /// A fresh permutation of the whole bank.
    pub fn shuffled_deck<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<Question> {
        let mut deck = self.questions.to_vec();
        deck.shuffle(rng);
        deck
    }
}
