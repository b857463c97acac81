use teloxide::types::CallbackQuery;

use dozer_core::domain::{ChannelId, MessageId, MessageRef, ReactionEvent};

use crate::{author_from_user, REACTION_CALLBACK_PREFIX};

/// Translate a reaction button press into a reaction event.
pub fn reaction_event(q: &CallbackQuery) -> Option<ReactionEvent> {
    let emoji = q.data.as_deref()?.strip_prefix(REACTION_CALLBACK_PREFIX)?;
    let msg = q.message.as_ref()?;
    Some(ReactionEvent::Added {
        message: MessageRef {
            channel_id: ChannelId(msg.chat.id.0),
            message_id: MessageId(i64::from(msg.id.0)),
        },
        user: author_from_user(&q.from),
        emoji: emoji.to_string(),
    })
}
