//! Prompt assembly.

use serde::{Deserialize, Serialize};

use kindred_core::traits::GenerationRequest;
use kindred_core::types::ResponseKind;

/// One chat message in OpenAI wire format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// System message with the persona's voice, user message with the entry
/// and what kind of response is wanted.
pub fn build_messages(request: &GenerationRequest) -> Vec<ChatMessage> {
    let persona = &request.persona;
    let mut system = format!(
        "You are {}, a companion who responds to entries in someone's private journal.",
        persona.name
    );
    if let Some(voice) = &persona.voice {
        system.push_str(&format!(" You are {}.", voice));
    }
    system.push_str(" Never mention that you are an AI model.");

    let instruction = match request.response_kind {
        ResponseKind::Reaction => {
            "React to this journal entry with a single short line, like a quick acknowledgement."
        }
        ResponseKind::Reply => {
            "Write a short, warm reply to this journal entry in two or three sentences."
        }
    };

    vec![
        ChatMessage::system(system),
        ChatMessage::user(format!(
            "{}\n\nJournal entry:\n{}",
            instruction, request.entry_content
        )),
    ]
}
