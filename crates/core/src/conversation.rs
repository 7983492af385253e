use chrono::{DateTime, Utc};
use grok_provider::{ContentPart, Message, MessageContent, Role};

/// Conversation history for one session: the user's messages, assistant
/// replies, and the tool_use/tool_result pairs produced by each batch.
#[derive(Debug)]
pub struct Thread {
    pub id: String,
    pub created_at: DateTime<Utc>,
    messages: Vec<Message>,
}

impl Thread {
    pub fn new() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            messages: Vec::new(),
        }
    }

    pub fn push_message(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn push_user_text(&mut self, text: impl Into<String>) {
        self.messages.push(Message {
            role: Role::User,
            content: MessageContent::Text(text.into()),
        });
    }

    pub fn push_assistant_text(&mut self, text: impl Into<String>) {
        self.messages.push(Message {
            role: Role::Assistant,
            content: MessageContent::Text(text.into()),
        });
    }

    pub fn push_assistant_parts(&mut self, parts: Vec<ContentPart>) {
        self.messages.push(Message {
            role: Role::Assistant,
            content: MessageContent::Parts(parts),
        });
    }

    pub fn push_tool_results(&mut self, parts: Vec<ContentPart>) {
        self.messages.push(Message {
            role: Role::User,
            content: MessageContent::Parts(parts),
        });
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    /// Number of tool_result parts across the whole conversation; used by
    /// turn summaries.
    pub fn tool_result_count(&self) -> usize {
        self.messages
            .iter()
            .filter_map(|m| match &m.content {
                MessageContent::Parts(parts) => Some(
                    parts
                        .iter()
                        .filter(|p| matches!(p, ContentPart::ToolResult { .. }))
                        .count(),
                ),
                _ => None,
            })
            .sum()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }
}

impl Default for Thread {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pushes_are_ordered() {
        let mut thread = Thread::new();
        thread.push_user_text("fix the bug");
        thread.push_assistant_parts(vec![ContentPart::ToolUse {
            id: "c1".into(),
            name: "view_file".into(),
            input: serde_json::json!({"path": "a.ts"}),
        }]);
        thread.push_tool_results(vec![ContentPart::ToolResult {
            tool_use_id: "c1".into(),
            content: "…".into(),
        }]);
        thread.push_assistant_text("done");

        assert_eq!(thread.message_count(), 4);
        assert_eq!(thread.messages()[0].role, Role::User);
        assert_eq!(thread.messages()[3].role, Role::Assistant);
        assert_eq!(thread.tool_result_count(), 1);
    }
}
