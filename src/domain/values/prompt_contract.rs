//! The structural contract a summarization response must satisfy before it
//! is allowed downstream.

use crate::domain::error::DomainError;
use serde::Serialize;

pub const DEFAULT_SECTIONS: [&str; 3] = ["Core Theme", "Sub-topics", "Key Figures"];

const DEFAULT_SYSTEM_PROMPT: &str = "You are a financial analyst who condenses long spoken market commentary \
into concise, well-structured Markdown notes. Output only the notes.";

#[derive(Debug, Clone, Serialize)]
pub struct PromptContract {
    pub system_prompt: String,
    pub required_sections: Vec<String>,
    /// Responses longer than this are rejected.
    pub max_chars: usize,
    /// Transcripts are truncated to this many characters before submission.
    pub max_input_chars: usize,
}

impl Default for PromptContract {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            required_sections: DEFAULT_SECTIONS.iter().map(|s| s.to_string()).collect(),
            max_chars: 12_000,
            max_input_chars: 60_000,
        }
    }
}

impl PromptContract {
    pub fn render_user_prompt(&self, text: &str) -> String {
        let headings: Vec<String> = self
            .required_sections
            .iter()
            .map(|s| format!("## {s}"))
            .collect();
        let input: String = text.chars().take(self.max_input_chars).collect();

        format!(
            "Summarize the transcript below.\n\
             Use exactly these Markdown headings, in this order:\n{}\n\n\
             - Under \"Core Theme\", name the main economic themes in a few words each.\n\
             - Under \"Sub-topics\", use ### headings per theme with a bold one-line takeaway \
             followed by bullet points (at most one level of indentation).\n\
             - Under \"Key Figures\", list concrete numbers: index moves, valuations, dates, \
             and the cause/effect links stated by the speaker.\n\
             Drop filler words and repetition. Do not add commentary of your own.\n\
             Keep the whole answer under {} characters.\n\n\
             Transcript:\n{}",
            headings.join("\n"),
            self.max_chars,
            input
        )
    }

    /// Normalize and check a response. Empty, oversized or structurally
    /// incomplete output is `MalformedResponse`.
    pub fn validate(&self, response: &str) -> Result<String, DomainError> {
        let text = strip_code_fence(response.trim()).trim().to_string();
        if text.is_empty() {
            return Err(DomainError::MalformedResponse("empty summary".into()));
        }
        let len = text.chars().count();
        if len > self.max_chars {
            return Err(DomainError::MalformedResponse(format!(
                "summary is {len} chars, limit is {}",
                self.max_chars
            )));
        }

        let headings: Vec<String> = text
            .lines()
            .map(str::trim_start)
            .filter(|l| l.starts_with('#'))
            .map(|l| l.trim_start_matches('#').trim().to_lowercase())
            .collect();
        let missing: Vec<&str> = self
            .required_sections
            .iter()
            .filter(|s| {
                let wanted = s.to_lowercase();
                !headings.iter().any(|h| h.contains(&wanted))
            })
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(DomainError::MalformedResponse(format!(
                "summary is missing sections: {}",
                missing.join(", ")
            )));
        }

        Ok(text)
    }
}

fn strip_code_fence(s: &str) -> &str {
    let Some(rest) = s.strip_prefix("```") else {
        return s;
    };
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    body.strip_suffix("```").unwrap_or(body)
}
