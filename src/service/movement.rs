//! Exits and the replies of the move command.
//!
//! A room's exits are the `#channel-name` mentions in its topic. Only names
//! that resolve to a text channel in the guild count.

use std::collections::HashSet;
use std::sync::OnceLock;

use log::error;
use regex::Regex;

use crate::platform::{Channel, TextChannel};

fn exit_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| match Regex::new(r"#([\w-]+)") {
            Ok(re) => Some(re),
            Err(e) => {
                error!("Invalid exit pattern: {}", e);
                None
            }
        })
        .as_ref()
}

/// Lowercased names of every `#mention` in `text`, in order of appearance.
pub fn exit_mentions(text: &str) -> Vec<String> {
    let Some(pattern) = exit_pattern() else {
        return Vec::new();
    };
    pattern
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().to_lowercase())
        .collect()
}

/// Text channels named by `#mentions` in `topic`, de-duplicated, in topic order.
pub fn extract_exits_from_topic(topic: Option<&str>, channels: &[Channel]) -> Vec<TextChannel> {
    let Some(topic) = topic else {
        return Vec::new();
    };
    let mut seen = HashSet::new();
    let mut exits = Vec::new();
    for name in exit_mentions(topic) {
        if !seen.insert(name.clone()) {
            continue;
        }
        if let Some(channel) = channels
            .iter()
            .filter_map(Channel::as_text)
            .find(|t| t.name.to_lowercase() == name)
        {
            exits.push(channel.clone());
        }
    }
    exits
}

/// The exit the player asked for.
///
/// A `#mention` in `input` wins; otherwise the first exit whose name appears
/// anywhere in the input (case-insensitive).
pub fn find_exit_in_input<'a>(input: &str, exits: &'a [TextChannel]) -> Option<&'a TextChannel> {
    for name in exit_mentions(input) {
        if let Some(exit) = exits.iter().find(|e| e.name.to_lowercase() == name) {
            return Some(exit);
        }
    }
    let lowered = input.to_lowercase();
    exits
        .iter()
        .find(|e| lowered.contains(&e.name.to_lowercase()))
}

/// What a `/move` ended up doing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveOutcome {
    Moved { channel: TextChannel },
    AlreadyThere,
    NoExits,
    UnknownExit { exits: Vec<TextChannel> },
}

impl MoveOutcome {
    /// The ephemeral reply shown to the player.
    pub fn reply(&self) -> String {
        match self {
            MoveOutcome::Moved { channel } => {
                format!("You moved! Click <#{}> to enter.", channel.id.get())
            }
            MoveOutcome::AlreadyThere => "You're already there.".to_string(),
            MoveOutcome::NoExits => "There are no obvious exits.".to_string(),
            MoveOutcome::UnknownExit { exits } => {
                let list = exits
                    .iter()
                    .map(|e| format!("#{}", e.name))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("You can't go there. Exits: {}", list)
            }
        }
    }
}

pub const MOVE_FAILED_REPLY: &str = "Failed to move. Please try again.";
pub const NO_TOPIC_REPLY: &str = "No topic set";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::ChannelId;

    fn text(id: u64, name: &str) -> TextChannel {
        TextChannel {
            id: ChannelId(id),
            name: name.into(),
            category_id: Some(ChannelId(1)),
            topic: None,
        }
    }

    fn channels() -> Vec<Channel> {
        vec![
            Channel::Text(text(10, "foyer")),
            Channel::Text(text(11, "sitting-room")),
            Channel::Text(text(12, "hallway")),
        ]
    }

    #[test]
    fn exit_pattern_builds() {
        assert!(exit_pattern().is_some());
        assert_eq!(exit_mentions("To #Hall_2 and #west-wing."), vec!["hall_2", "west-wing"]);
    }

    #[test]
    fn exits_follow_topic_order_and_skip_unknown() {
        let topic = "Doors lead to #Hallway, #sitting-room and #garden. #hallway again.";
        let exits = extract_exits_from_topic(Some(topic), &channels());
        let names: Vec<&str> = exits.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["hallway", "sitting-room"]);
        assert!(extract_exits_from_topic(None, &channels()).is_empty());
    }

    #[test]
    fn mention_beats_plain_name() {
        let exits = vec![text(10, "foyer"), text(12, "hallway")];
        let picked = find_exit_in_input("the foyer, no wait, #hallway", &exits);
        assert_eq!(picked.map(|e| e.id), Some(ChannelId(12)));
        let picked = find_exit_in_input("back to the FOYER", &exits);
        assert_eq!(picked.map(|e| e.id), Some(ChannelId(10)));
        assert!(find_exit_in_input("upstairs", &exits).is_none());
    }

    #[test]
    fn replies_match_outcomes() {
        assert_eq!(MoveOutcome::NoExits.reply(), "There are no obvious exits.");
        assert_eq!(MoveOutcome::AlreadyThere.reply(), "You're already there.");
        assert_eq!(
            MoveOutcome::UnknownExit {
                exits: vec![text(10, "foyer"), text(12, "hallway")]
            }
            .reply(),
            "You can't go there. Exits: #foyer, #hallway"
        );
        assert_eq!(
            MoveOutcome::Moved {
                channel: text(12, "hallway")
            }
            .reply(),
            "You moved! Click <#12> to enter."
        );
    }
}
