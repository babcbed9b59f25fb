use super::prompt::SYSTEM_PROMPT;
use crate::llm::{Role, Turn};

/// Ordered turns of one request; only ever appended to
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    turns: Vec<Turn>,
}

impl Conversation {
    /// Prior turns plus the new question, with the system instruction in
    /// front unless the history already opens with one
    pub fn new(history: Vec<Turn>, question: &str) -> Self {
        let mut turns = Vec::with_capacity(history.len() + 2);
        if history.first().map(|t| t.role) != Some(Role::System) {
            turns.push(Turn::system(SYSTEM_PROMPT));
        }
        turns.extend(history);
        turns.push(Turn::user(question));
        Self { turns }
    }

    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn into_turns(self) -> Vec<Turn> {
        self.turns
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_prompt_prepended_once() {
        let conversation = Conversation::new(
            vec![Turn::user("What is it?"), Turn::assistant("A fridge.")],
            "How big?",
        );
        let roles: Vec<Role> = conversation.turns().iter().map(|t| t.role).collect();
        assert_eq!(
            roles,
            vec![Role::System, Role::User, Role::Assistant, Role::User]
        );
        assert_eq!(conversation.turns()[0].content, SYSTEM_PROMPT);
        assert_eq!(conversation.last().unwrap().content, "How big?");
    }

    #[test]
    fn test_existing_system_turn_is_kept() {
        let conversation = Conversation::new(vec![Turn::system("custom rules")], "Hi");
        assert_eq!(conversation.len(), 2);
        assert_eq!(conversation.turns()[0].content, "custom rules");
    }

    #[test]
    fn test_append_keeps_order() {
        let mut conversation = Conversation::new(Vec::new(), "q");
        conversation.push(Turn::tool("call_1", "result"));
        conversation.push(Turn::assistant("answer"));

        let turns = conversation.into_turns();
        assert_eq!(turns.len(), 4);
        assert_eq!(turns[2].role, Role::Tool);
        assert_eq!(turns[3].content, "answer");
    }
}
