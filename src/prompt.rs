use crate::ollama::ChatMessage;
use serde::Serialize;

pub const TEACHER_PREAMBLE: &str = "You are a patient and experienced teacher. Explain concepts clearly and simply, as if teaching a student. Use examples, analogies, and break down complex ideas into digestible steps. Encourage learning and curiosity.";

pub const RESEARCHER_PREAMBLE: &str = "You are an academic researcher. Provide detailed, evidence-based responses with proper analysis. Consider multiple perspectives, cite reasoning, and structure your responses like a research paper with clear hypotheses and conclusions.";

pub const COUNCIL_PREAMBLE: &str = "You are participating in a council of AI models. Your goal is to provide a thoughtful, balanced perspective that considers multiple viewpoints before reaching a conclusion.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Normal,
    Teacher,
    Researcher,
    Council,
}

impl Mode {
    /// Unknown mode names behave as `normal`.
    pub fn parse(value: &str) -> Self {
        match value {
            "teacher" => Self::Teacher,
            "researcher" => Self::Researcher,
            "council" => Self::Council,
            _ => Self::Normal,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Teacher => "teacher",
            Self::Researcher => "researcher",
            Self::Council => "council",
        }
    }

    fn preamble(self) -> Option<&'static str> {
        match self {
            Self::Normal => None,
            Self::Teacher => Some(TEACHER_PREAMBLE),
            Self::Researcher => Some(RESEARCHER_PREAMBLE),
            Self::Council => Some(COUNCIL_PREAMBLE),
        }
    }
}

pub fn compose(mode: Mode, prompt: &str) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(2);
    if let Some(preamble) = mode.preamble() {
        messages.push(ChatMessage::system(preamble));
    }
    messages.push(ChatMessage::user(prompt));
    messages
}
