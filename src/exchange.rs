//! Exchange pairing over the raw message log
//!
//! The model consumes history as matched (user, bot) pairs, not role-tagged
//! log lines. Strict alternation is not guaranteed in the log (a crash between
//! the user and bot writes leaves a dangling user message), so pairing is a
//! pure fold that tolerates consecutive same-role entries.

use crate::db::{Message, Role};

/// One (user message, bot reply) pair reconstructed from the turn log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangePair {
    pub user: String,
    pub bot: String,
}

/// Fold an ordered message sequence into exchange pairs.
///
/// Rules:
/// - a `user` message becomes the pending half, overwriting any previous
///   unpaired `user` message (only the most recent un-replied turn counts);
/// - a `bot` message with a pending `user` message emits a pair and clears
///   the slot;
/// - a `bot` message with no pending `user` message is dropped;
/// - a trailing unanswered `user` message is excluded.
pub fn pair_exchanges(messages: &[Message]) -> Vec<ExchangePair> {
    let mut pairs = Vec::new();
    let mut pending_user: Option<&str> = None;

    for message in messages {
        match message.role {
            Role::User => pending_user = Some(&message.content),
            Role::Bot => {
                if let Some(user) = pending_user.take() {
                    pairs.push(ExchangePair {
                        user: user.to_string(),
                        bot: message.content.clone(),
                    });
                }
            }
        }
    }

    pairs
}

/// Render exchange pairs into the compact text block the prompts consume.
/// Pairs where both halves are blank are skipped.
pub fn format_history(pairs: &[ExchangePair]) -> String {
    pairs
        .iter()
        .filter_map(|pair| {
            let user = pair.user.trim();
            let bot = pair.bot.trim();
            if user.is_empty() && bot.is_empty() {
                None
            } else {
                Some(format!("Пользователь: {user}\nАссистент: {bot}"))
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn msg(id: i64, role: Role, content: &str) -> Message {
        Message {
            id,
            dialog_id: 1,
            role,
            content: content.to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_pairs_simple_alternation() {
        let messages = vec![
            msg(1, Role::User, "a"),
            msg(2, Role::Bot, "b"),
            msg(3, Role::User, "c"),
            msg(4, Role::Bot, "d"),
        ];
        assert_eq!(
            pair_exchanges(&messages),
            vec![
                ExchangePair {
                    user: "a".into(),
                    bot: "b".into()
                },
                ExchangePair {
                    user: "c".into(),
                    bot: "d".into()
                },
            ]
        );
    }

    #[test]
    fn test_trailing_unanswered_user_is_excluded() {
        let messages = vec![
            msg(1, Role::User, "a"),
            msg(2, Role::Bot, "b"),
            msg(3, Role::User, "c"),
        ];
        let pairs = pair_exchanges(&messages);
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].user, "a");
        assert_eq!(pairs[0].bot, "b");
    }

    #[test]
    fn test_leading_unpaired_bot_is_dropped() {
        let messages = vec![
            msg(1, Role::Bot, "x"),
            msg(2, Role::User, "a"),
            msg(3, Role::Bot, "b"),
        ];
        let pairs = pair_exchanges(&messages);
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].user, "a");
        assert_eq!(pairs[0].bot, "b");
    }

    #[test]
    fn test_later_user_message_overwrites_pending() {
        let messages = vec![
            msg(1, Role::User, "first"),
            msg(2, Role::User, "second"),
            msg(3, Role::Bot, "reply"),
        ];
        let pairs = pair_exchanges(&messages);
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].user, "second");
    }

    #[test]
    fn test_empty_log() {
        assert!(pair_exchanges(&[]).is_empty());
    }

    #[test]
    fn test_format_history_skips_blank_pairs() {
        let pairs = vec![
            ExchangePair {
                user: "не включается".into(),
                bot: "проверьте кабель".into(),
            },
            ExchangePair {
                user: "  ".into(),
                bot: String::new(),
            },
        ];
        let rendered = format_history(&pairs);
        assert_eq!(
            rendered,
            "Пользователь: не включается\nАссистент: проверьте кабель"
        );
    }
}
