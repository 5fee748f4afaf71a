use rig::completion::Message as RigMessage;
use rig::message::{AssistantContent, Text, UserContent};
use rig::OneOrMany;

use crate::agent::memory::StoredMessage;
use crate::agent::recall::MemoryContext;
use crate::error::{AdapterError, Result};
use crate::message::{Content, ContentPart, Message, Role};

/// Built-in tutor instructions.
pub const DEFAULT_INSTRUCTIONS: &str = r#"You are Mentor, a patient and encouraging tutor.

- Adapt explanations to the student's level and learning style.
- Prefer guiding questions and worked examples over handing out final answers.
- Check understanding before moving on, and point out what the student did well.
- Use the available tools when they help answer accurately. Never invent tool results.

## Memory
You keep a working-memory profile for each student. When you learn something durable
about the student (name, grade, goals, preferences, recurring difficulties), call
update_working_memory with the complete updated profile. Do not mention this
bookkeeping to the student."#;

/// Assembles the system prompt and chat history for one generation.
pub struct ContextBuilder<'a> {
    instructions: &'a str,
    memory: &'a MemoryContext,
    last_messages: usize,
}

impl<'a> ContextBuilder<'a> {
    pub fn new(instructions: &'a str, memory: &'a MemoryContext, last_messages: usize) -> Self {
        Self {
            instructions,
            memory,
            last_messages,
        }
    }

    /// Instructions, caller system messages, working memory, then recalled excerpts.
    pub fn build_system_prompt(&self, conversation: &[Message]) -> String {
        let mut parts = vec![self.instructions.to_string()];

        let caller_system: Vec<String> = conversation
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.text())
            .filter(|t| !t.trim().is_empty())
            .collect();
        if !caller_system.is_empty() {
            parts.push(caller_system.join("\n\n"));
        }

        parts.push(format!(
            "# Working Memory\n\n{}",
            self.memory.working_memory.trim_end()
        ));

        if !self.memory.recalled.is_empty() {
            parts.push(format!(
                "# Relevant Past Conversations\n\n\
                 Excerpts from earlier sessions with this student, oldest first within each thread.\n\n{}",
                format_excerpts(&self.memory.recalled)
            ));
        }

        parts.join("\n\n---\n\n")
    }

    /// Split the conversation into (history, prompt).
    ///
    /// History is the caller's earlier messages when it sent any, otherwise the
    /// stored recency window for the thread. Either way it holds at most
    /// `last_messages` turns. The prompt is the final message, which must come
    /// from the user.
    pub fn build_messages(&self, conversation: &[Message]) -> Result<(Vec<RigMessage>, RigMessage)> {
        let turns: Vec<&Message> = conversation
            .iter()
            .filter(|m| m.role != Role::System)
            .collect();

        let Some((last, earlier)) = turns.split_last() else {
            return Err(AdapterError::InvalidConversation(
                "conversation has no user message".into(),
            ));
        };
        if last.role != Role::User {
            return Err(AdapterError::InvalidConversation(
                "conversation must end with a user message".into(),
            ));
        }

        let history: Vec<RigMessage> = if earlier.is_empty() {
            let skip = self.memory.recent.len().saturating_sub(self.last_messages);
            self.memory.recent[skip..]
                .iter()
                .filter_map(stored_to_rig)
                .collect()
        } else {
            let skip = earlier.len().saturating_sub(self.last_messages);
            earlier[skip..].iter().filter_map(|m| to_rig_message(m)).collect()
        };

        let prompt = to_rig_message(last).ok_or_else(|| {
            AdapterError::InvalidConversation("the final user message is empty".into())
        })?;

        Ok((history, prompt))
    }
}

fn format_excerpts(messages: &[StoredMessage]) -> String {
    let mut out = String::new();
    let mut current_thread: Option<&str> = None;
    for m in messages {
        if current_thread != Some(m.thread_id.as_str()) {
            if current_thread.is_some() {
                out.push('\n');
            }
            out.push_str(&format!("## Thread {}\n", m.thread_id));
            current_thread = Some(m.thread_id.as_str());
        }
        let ts = chrono::DateTime::from_timestamp(m.created_at, 0)
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "unknown".into());
        out.push_str(&format!("[{ts}] {}: {}\n", m.role.to_uppercase(), m.content));
    }
    out
}

fn text_content(text: &str) -> Text {
    Text {
        text: text.to_string(),
    }
}

fn stored_to_rig(m: &StoredMessage) -> Option<RigMessage> {
    if m.content.trim().is_empty() {
        return None;
    }
    match Role::parse(&m.role)? {
        Role::User => Some(RigMessage::User {
            content: OneOrMany::one(UserContent::Text(text_content(&m.content))),
        }),
        Role::Assistant => Some(RigMessage::Assistant {
            id: None,
            content: OneOrMany::one(AssistantContent::Text(text_content(&m.content))),
        }),
        Role::System => None,
    }
}

/// Convert a caller message. System messages and empty content yield `None`.
pub fn to_rig_message(msg: &Message) -> Option<RigMessage> {
    match msg.role {
        Role::System => None,
        Role::Assistant => {
            let text = msg.content.text();
            if text.is_empty() {
                return None;
            }
            Some(RigMessage::Assistant {
                id: None,
                content: OneOrMany::one(AssistantContent::Text(text_content(&text))),
            })
        }
        Role::User => {
            let parts: Vec<UserContent> = match &msg.content {
                Content::Text(t) if t.is_empty() => Vec::new(),
                Content::Text(t) => vec![UserContent::Text(text_content(t))],
                Content::Parts(parts) => parts
                    .iter()
                    .filter_map(|p| match p {
                        ContentPart::Text { text } if text.is_empty() => None,
                        ContentPart::Text { text } => Some(UserContent::Text(text_content(text))),
                        ContentPart::Image { image } => {
                            Some(UserContent::image_url(image.clone(), None, None))
                        }
                    })
                    .collect(),
            };
            let content = OneOrMany::many(parts).ok()?;
            Some(RigMessage::User { content })
        }
    }
}
