use teloxide::types::Message;

use dozer_core::domain::{ChannelId, GuildId, InboundEvent, MessageId, MessageRef, Origin};

use crate::author_from_user;

/// Snapshot a Telegram message for the dispatcher.
///
/// Messages without a sender or without text (stickers, service messages)
/// yield `None`. Captions count as text.
pub fn inbound_event(msg: &Message) -> Option<InboundEvent> {
    let user = msg.from()?;
    let content = msg.text().or_else(|| msg.caption())?;

    let channel_id = ChannelId(msg.chat.id.0);
    let origin = if msg.chat.is_private() {
        Origin::Direct { channel_id }
    } else {
        Origin::Guild {
            guild_id: GuildId(msg.chat.id.0),
            guild_name: msg.chat.title().map(str::to_string),
            channel_id,
        }
    };

    Some(InboundEvent {
        message: MessageRef {
            channel_id,
            message_id: MessageId(i64::from(msg.id.0)),
        },
        author: author_from_user(user),
        origin,
        content: content.to_string(),
        timestamp: msg.date,
    })
}
