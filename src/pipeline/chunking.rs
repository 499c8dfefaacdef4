use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Separator placed between message texts inside a chunk.
const MESSAGE_SEPARATOR: &str = "\n";

/// A single message of a conversation, in conversation order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(default)]
    pub author: String,
    /// Message role or type (`user`, `assistant`, `system`, ...).
    #[serde(default)]
    pub role: String,
    pub text: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl Message {
    pub fn new(author: impl Into<String>, role: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            author: author.into(),
            role: role.into(),
            text: text.into(),
            timestamp: None,
        }
    }
}

/// A contiguous run of messages, ready for embedding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageChunk {
    /// 0-based position of this chunk within the conversation.
    pub ordinal: usize,
    /// 0-based index of the first source message (inclusive).
    pub first_message: usize,
    /// 0-based index of the last source message (inclusive).
    pub last_message: usize,
    /// Member message texts joined with a newline.
    pub text: String,
    /// `true` when a single message alone exceeds the size budget.
    pub oversized: bool,
}

impl MessageChunk {
    /// Number of source messages covered by this chunk.
    pub fn message_count(&self) -> usize {
        self.last_message - self.first_message + 1
    }
}

/// Lazy iterator over the chunks of a message list.
///
/// Cloning the iterator (or calling [`chunk_messages`] again) restarts the
/// sequence from wherever the clone was taken.
#[derive(Debug, Clone)]
pub struct Chunks<'a> {
    messages: &'a [Message],
    max_chars: usize,
    next_message: usize,
    next_ordinal: usize,
}

/// Split `messages` into chunks of at most `max_chars` characters.
///
/// Boundaries only ever fall between messages. Messages are packed greedily
/// until the next one would push the chunk over the budget; a message that
/// is larger than the budget on its own is emitted as a single oversized
/// chunk rather than truncated. Sizes count Unicode scalar values, including
/// the newline separators between messages.
pub fn chunk_messages(messages: &[Message], max_chars: usize) -> Chunks<'_> {
    Chunks {
        messages,
        max_chars: max_chars.max(1),
        next_message: 0,
        next_ordinal: 0,
    }
}

impl<'a> Iterator for Chunks<'a> {
    type Item = MessageChunk;

    fn next(&mut self) -> Option<MessageChunk> {
        let first = self.next_message;
        let head = self.messages.get(first)?;

        let mut text = head.text.clone();
        let mut len = head.text.chars().count();
        let oversized = len > self.max_chars;
        let mut last = first;

        if !oversized {
            let sep_len = MESSAGE_SEPARATOR.chars().count();
            for message in &self.messages[first + 1..] {
                let msg_len = message.text.chars().count();
                if len + sep_len + msg_len > self.max_chars {
                    break;
                }
                text.push_str(MESSAGE_SEPARATOR);
                text.push_str(&message.text);
                len += sep_len + msg_len;
                last += 1;
            }
        }

        let chunk = MessageChunk {
            ordinal: self.next_ordinal,
            first_message: first,
            last_message: last,
            text,
            oversized,
        };
        self.next_message = last + 1;
        self.next_ordinal += 1;
        Some(chunk)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.messages.len().saturating_sub(self.next_message);
        (usize::from(remaining > 0), Some(remaining))
    }
}

impl std::iter::FusedIterator for Chunks<'_> {}
