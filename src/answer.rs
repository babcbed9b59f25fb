//! Answer post-processing and starter questions
//!
//! Citation blocks and follow-up lines are model output conventions. These
//! helpers read them when present and never fail when they are not.

use crate::agent::prompt::FOLLOW_UP_PREFIX;
use crate::llm::{complete_text, LanguageModel, Turn};
use crate::store::StoredChunk;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Follow-up suggestions kept per answer
pub const MAX_FOLLOW_UPS: usize = 3;

/// Chunks shown to the model when drafting starter questions
const STARTER_CONTEXT_CHUNKS: usize = 3;

pub const FALLBACK_STARTER_QUESTIONS: [&str; 3] = [
    "What is this document about?",
    "Summarize the key points.",
    "List specific details.",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub document: String,
    pub page: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AnswerParts {
    /// Answer text without follow-up lines or the trailing `---`
    pub body: String,
    pub sources: Vec<Citation>,
    pub follow_ups: Vec<String>,
}

pub struct AnswerParser {
    sources_marker: Regex,
    citation: Regex,
}

impl AnswerParser {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            sources_marker: Regex::new(r"(?i)^\s*(\*\*)?sources:?(\*\*)?:?\s*$")?,
            citation: Regex::new(r"^\s*[-*]\s*\[(?P<doc>[^,\]]+),\s*[Pp]age\s+(?P<page>[^\]]+)\]")?,
        })
    }

    pub fn parse(&self, text: &str) -> AnswerParts {
        let mut body_lines = Vec::new();
        let mut follow_ups = Vec::new();
        let mut sources = Vec::new();
        let mut in_sources = false;

        for line in text.lines() {
            let trimmed = line.trim();

            if let Some(question) = trimmed.strip_prefix(FOLLOW_UP_PREFIX) {
                let question = question.trim();
                if !question.is_empty() && follow_ups.len() < MAX_FOLLOW_UPS {
                    follow_ups.push(question.to_string());
                }
                continue;
            }

            if self.sources_marker.is_match(line) {
                in_sources = true;
            } else if in_sources {
                if let Some(caps) = self.citation.captures(line) {
                    sources.push(Citation {
                        document: caps["doc"].trim().to_string(),
                        page: caps["page"].trim().to_string(),
                    });
                }
            }

            body_lines.push(line);
        }

        let body = body_lines
            .join("\n")
            .trim_end_matches(|c: char| c == '-' || c.is_whitespace())
            .to_string();

        AnswerParts {
            body,
            sources,
            follow_ups,
        }
    }
}

fn starter_prompt(chunks: &[StoredChunk]) -> String {
    let excerpt = chunks
        .iter()
        .take(STARTER_CONTEXT_CHUNKS)
        .map(|c| c.text.as_str())
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "Based on the following document excerpt, write 3 short, specific questions a reader \
         might ask.\nReturn ONLY a JSON list of strings, e.g. [\"Question 1\", \"Question 2\"].\n\n\
         Excerpt:\n{}",
        excerpt
    )
}

/// Pull a JSON string list out of a reply, tolerating markdown fences
pub fn parse_question_list(reply: &str) -> Option<Vec<String>> {
    let mut content = reply.trim();
    if let Some(fenced) = content.split("```").nth(1) {
        content = fenced.trim();
        content = content.strip_prefix("json").unwrap_or(content).trim();
    }

    let questions: Vec<String> = serde_json::from_str::<Vec<String>>(content)
        .ok()?
        .into_iter()
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty())
        .collect();

    if questions.is_empty() {
        None
    } else {
        Some(questions)
    }
}

fn fallback_questions() -> Vec<String> {
    FALLBACK_STARTER_QUESTIONS
        .iter()
        .map(|q| q.to_string())
        .collect()
}

/// Three questions to offer right after ingestion
///
/// Any model or parse failure yields the fixed fallback list; an empty
/// document yields nothing.
pub async fn starter_questions(model: &dyn LanguageModel, chunks: &[StoredChunk]) -> Vec<String> {
    if chunks.is_empty() {
        return Vec::new();
    }

    let turns = [Turn::user(starter_prompt(chunks))];
    match complete_text(model, &turns).await {
        Ok(reply) => match parse_question_list(&reply) {
            Some(questions) => {
                debug!("Model suggested {} starter questions", questions.len());
                questions
            }
            None => {
                warn!("Starter question reply was not a JSON list: {}", reply);
                fallback_questions()
            }
        },
        Err(e) => {
            warn!("Starter question generation failed: {}", e);
            fallback_questions()
        }
    }
}
