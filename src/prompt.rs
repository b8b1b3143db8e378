//! Turning a lineage into model input.

use serde::{Deserialize, Serialize};

use crate::node::{Node, NodeRole};
use crate::settings::Settings;

pub const HUMAN_PROMPT: &str = "\n\nHuman:";
pub const AI_PROMPT: &str = "\n\nAssistant:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    fn new(role: ChatRole, content: &str) -> Self {
        Self { role, content: content.to_string() }
    }
}

/// Chat messages for a lineage (index 0 = newest node), oldest first.
///
/// A lineage whose root is not a System node gets the default preamble as
/// its first message.
pub fn messages_from_lineage(lineage: &[&Node], settings: &Settings) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(lineage.len() + 1);

    for (depth, node) in lineage.iter().enumerate().rev() {
        let is_root = depth == lineage.len() - 1;

        match node.role {
            NodeRole::System => messages.push(ChatMessage::new(ChatRole::System, &node.text)),
            _ if is_root => messages.push(ChatMessage::new(ChatRole::System, &settings.default_preamble)),
            _ => {}
        }

        match node.role {
            NodeRole::User => messages.push(ChatMessage::new(ChatRole::User, &node.text)),
            NodeRole::Assistant | NodeRole::EditedAssistant => {
                messages.push(ChatMessage::new(ChatRole::Assistant, &node.text))
            }
            NodeRole::System => {}
        }
    }

    messages
}

/// Flat Human/Assistant transcript of a lineage.
///
/// With `anthropic` set, the second message is folded into the first turn
/// without its own role marker (system text and first user message share
/// one Human turn).
pub fn prompt_from_lineage(
    lineage: &[&Node],
    settings: &Settings,
    end_with_blank_assistant: bool,
    anthropic: bool,
) -> String {
    let mut prompt = String::new();

    for (i, message) in messages_from_lineage(lineage, settings).iter().enumerate() {
        if i == 1 && anthropic {
            prompt.push(' ');
            prompt.push_str(&message.content);
            continue;
        }
        let marker = match message.role {
            ChatRole::System | ChatRole::User => HUMAN_PROMPT,
            ChatRole::Assistant => AI_PROMPT,
        };
        prompt.push_str(marker);
        prompt.push(' ');
        prompt.push_str(&message.content);
    }

    if end_with_blank_assistant {
        prompt.push_str(AI_PROMPT);
    }

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{new_node, NodeSpec, Position};

    fn n(id: &str, role: NodeRole, text: &str) -> Node {
        new_node(NodeSpec::new(role, text, Position::default()).with_id(id))
    }

    fn settings() -> Settings {
        Settings { default_preamble: "PRE".into(), ..Settings::default() }
    }

    #[test]
    fn test_messages_root_to_leaf() {
        let sys = n("s", NodeRole::System, "You are helpful");
        let user = n("u", NodeRole::User, "Hi");
        let asst = n("a", NodeRole::EditedAssistant, "Hello!");
        let msgs = messages_from_lineage(&[&asst, &user, &sys], &settings());
        assert_eq!(
            msgs,
            vec![
                ChatMessage::new(ChatRole::System, "You are helpful"),
                ChatMessage::new(ChatRole::User, "Hi"),
                ChatMessage::new(ChatRole::Assistant, "Hello!"),
            ]
        );
    }

    #[test]
    fn test_preamble_added_for_non_system_root() {
        let user = n("u", NodeRole::User, "Hi");
        let msgs = messages_from_lineage(&[&user], &settings());
        assert_eq!(msgs[0], ChatMessage::new(ChatRole::System, "PRE"));
        assert_eq!(msgs[1], ChatMessage::new(ChatRole::User, "Hi"));
    }

    #[test]
    fn test_mid_lineage_system_node_kept() {
        let user = n("u", NodeRole::User, "Hi");
        let sys = n("s", NodeRole::System, "Be brief");
        let user2 = n("u2", NodeRole::User, "Again");
        let msgs = messages_from_lineage(&[&user2, &sys, &user], &settings());
        let roles: Vec<ChatRole> = msgs.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![ChatRole::System, ChatRole::User, ChatRole::System, ChatRole::User]);
    }

    #[test]
    fn test_empty_lineage_has_no_messages() {
        assert!(messages_from_lineage(&[], &settings()).is_empty());
    }

    #[test]
    fn test_prompt_transcript() {
        let sys = n("s", NodeRole::System, "Sys");
        let user = n("u", NodeRole::User, "Hi");
        let prompt = prompt_from_lineage(&[&user, &sys], &settings(), true, false);
        assert_eq!(prompt, "\n\nHuman: Sys\n\nHuman: Hi\n\nAssistant:");
    }

    #[test]
    fn test_prompt_anthropic_folds_second_message() {
        let sys = n("s", NodeRole::System, "Sys");
        let user = n("u", NodeRole::User, "Hi");
        let prompt = prompt_from_lineage(&[&user, &sys], &settings(), false, true);
        assert_eq!(prompt, "\n\nHuman: Sys Hi");
    }
}
