//! Conversation memory carried between router turns.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Human,
    Ai,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Human => write!(f, "Human"),
            Role::Ai => write!(f, "AI"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

/// Ordered (role, content) turns. Append-only until [`clear`](Self::clear).
#[derive(Debug, Clone, Default)]
pub struct ConversationMemory {
    turns: Vec<Turn>,
}

impl ConversationMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, role: Role, content: impl Into<String>) {
        self.turns.push(Turn {
            role,
            content: content.into(),
        });
    }

    /// Record one completed exchange.
    pub fn record_exchange(&mut self, input: &str, output: &str) {
        self.append(Role::Human, input);
        self.append(Role::Ai, output);
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    /// History in `Role: content` lines, as it appears in the prompt.
    pub fn render(&self) -> String {
        self.turns
            .iter()
            .map(|t| format!("{}: {}", t.role, t.content))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exchange_order_and_render() {
        let mut memory = ConversationMemory::new();
        memory.record_exchange("hi", "hello");
        memory.record_exchange("total?", "42");

        assert_eq!(memory.len(), 4);
        assert_eq!(memory.turns()[2].role, Role::Human);
        assert_eq!(memory.render(), "Human: hi\nAI: hello\nHuman: total?\nAI: 42");
    }

    #[test]
    fn test_clear() {
        let mut memory = ConversationMemory::new();
        memory.append(Role::Human, "x");
        memory.clear();
        assert!(memory.is_empty());
        assert_eq!(memory.render(), "");
    }
}
