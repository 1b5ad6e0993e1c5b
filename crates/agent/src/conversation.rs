use std::sync::Arc;

use crate::message::{Message, MessageId};

/// Ordered transcript of the session.
///
/// Messages are shared `Arc`s, so cloning a conversation to publish a new
/// snapshot copies pointers only; unchanged messages are shared between
/// snapshots.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    messages: Vec<Arc<Message>>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[Arc<Message>] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Arc<Message>> {
        self.messages.last()
    }

    pub fn get(&self, id: &MessageId) -> Option<&Arc<Message>> {
        self.messages.iter().rev().find(|m| &m.id == id)
    }

    /// Replace the slot holding `message.id`, or append when absent.
    ///
    /// An empty message is never published. Returns whether the
    /// conversation changed.
    pub fn upsert(&mut self, message: Arc<Message>) -> bool {
        if message.is_empty() {
            return false;
        }
        // The in-progress message is almost always last.
        match self.messages.iter().rposition(|m| m.id == message.id) {
            Some(idx) => {
                if self.messages[idx] == message {
                    return false;
                }
                self.messages[idx] = message;
            }
            None => self.messages.push(message),
        }
        true
    }

    /// History sent with the next request, without client-derived blocks.
    pub fn outbound_history(&self) -> Vec<Message> {
        self.messages
            .iter()
            .map(|m| m.without_derived_blocks())
            .filter(|m| !m.is_empty())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{ChartSpec, ContentBlock};

    fn assistant(id: &str, text: &str) -> Arc<Message> {
        let mut msg = Message::assistant(MessageId::from(id));
        msg.content.push(ContentBlock::Text { text: text.into() });
        Arc::new(msg)
    }

    #[test]
    fn test_upsert_replaces_slot() {
        let mut conv = Conversation::new();
        conv.upsert(Arc::new(Message::user("hi")));
        assert!(conv.upsert(assistant("a1", "Hel")));
        assert!(conv.upsert(assistant("a1", "Hello")));
        assert_eq!(conv.len(), 2);
        assert_eq!(conv.get(&MessageId::from("a1")).map(|m| m.text()), Some("Hello".into()));
    }

    #[test]
    fn test_upsert_skips_empty_and_identical() {
        let mut conv = Conversation::new();
        assert!(!conv.upsert(Arc::new(Message::assistant(MessageId::from("a1")))));
        assert!(conv.is_empty());

        assert!(conv.upsert(assistant("a1", "x")));
        assert!(!conv.upsert(assistant("a1", "x")));
    }

    #[test]
    fn test_snapshots_share_unchanged_messages() {
        let mut conv = Conversation::new();
        conv.upsert(Arc::new(Message::user("q")));
        let before = conv.clone();
        conv.upsert(assistant("a1", "answer"));
        assert!(Arc::ptr_eq(&before.messages()[0], &conv.messages()[0]));
        assert_eq!(before.len(), 1);
    }

    #[test]
    fn test_outbound_history_strips_derived_blocks() {
        let mut conv = Conversation::new();
        conv.upsert(Arc::new(Message::user("chart it")));
        let mut chart_only = Message::assistant(MessageId::from("a1"));
        chart_only.content.push(ContentBlock::Chart {
            chart: ChartSpec { chart_spec: "{}".into() },
        });
        conv.upsert(Arc::new(chart_only));
        conv.upsert(assistant("a2", "ok"));

        let history = conv.outbound_history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].text(), "chart it");
        assert_eq!(history[1].text(), "ok");
        assert_eq!(conv.len(), 3);
    }
}
