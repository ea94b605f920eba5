//! Question source
//!
//! The coordinator only needs a sequential supplier of questions. The default
//! supplier is an in-memory bank loaded once at startup from a text file with
//! one `prompt,opt1,opt2,opt3,opt4,correct` record per line.

use crate::error::ConfigError;
use crate::types::Question;
use std::collections::VecDeque;
use std::path::Path;

/// Sequential supplier of questions, consumed one at a time
pub trait QuestionSource: Send {
    fn next(&mut self) -> Option<Question>;

    fn has_more(&self) -> bool;

    fn remaining(&self) -> usize;
}

#[derive(Debug, Clone, Default)]
pub struct QuestionBank {
    queue: VecDeque<Question>,
}

impl QuestionBank {
    pub fn new(questions: Vec<Question>) -> Self {
        Self {
            queue: questions.into(),
        }
    }

    /// Load a bank from disk. Unreadable files and banks without a single
    /// usable question are startup errors.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let bank = Self::parse(&text);
        if bank.queue.is_empty() {
            return Err(ConfigError::NoQuestions(path.to_path_buf()));
        }

        tracing::info!("Loaded {} questions from {}", bank.queue.len(), path.display());
        Ok(bank)
    }

    /// Parse question records, skipping lines that don't form a question
    pub fn parse(text: &str) -> Self {
        let mut queue = VecDeque::new();

        for (line_no, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            match parse_line(line) {
                Some(q) => queue.push_back(q),
                None => tracing::warn!("Skipping malformed question on line {}", line_no + 1),
            }
        }

        Self { queue }
    }
}

fn parse_line(line: &str) -> Option<Question> {
    let parts: Vec<&str> = line.split(',').map(str::trim).collect();
    if parts.len() != 6 || parts[..5].iter().any(|p| p.is_empty()) {
        return None;
    }

    let options = [
        parts[1].to_string(),
        parts[2].to_string(),
        parts[3].to_string(),
        parts[4].to_string(),
    ];
    let correct_index = correct_index(&options, parts[5])?;

    Some(Question {
        prompt: parts[0].to_string(),
        options,
        correct_index,
    })
}

/// The correct field names an option by text, by 1-based number or by letter
fn correct_index(options: &[String; 4], correct: &str) -> Option<usize> {
    if let Some(i) = options.iter().position(|o| o == correct) {
        return Some(i);
    }
    match correct {
        "1" | "A" | "a" => Some(0),
        "2" | "B" | "b" => Some(1),
        "3" | "C" | "c" => Some(2),
        "4" | "D" | "d" => Some(3),
        _ => None,
    }
}

impl QuestionSource for QuestionBank {
    fn next(&mut self) -> Option<Question> {
        self.queue.pop_front()
    }

    fn has_more(&self) -> bool {
        !self.queue.is_empty()
    }

    fn remaining(&self) -> usize {
        self.queue.len()
    }
}
