//! Telegram adapter (teloxide).
//!
//! Implements the `dozer-core` [`GatewayPort`] over the Telegram Bot API.
//! Group chats play the role of guilds. Reactions are modelled as inline
//! keyboard buttons whose callback data is `react:<emoji>`.

use std::{
    borrow::Cow,
    collections::HashMap,
    sync::{Mutex, OnceLock},
};

use async_trait::async_trait;

use teloxide::{
    prelude::*,
    types::{ChatMemberKind, InlineKeyboardButton, InlineKeyboardMarkup, ParseMode, User},
    ApiError, RequestError,
};

use tokio::time::sleep;

pub mod format;
pub mod handlers;
pub mod router;

use dozer_core::{
    domain::{Author, ChannelId, MessageId, MessageRef, Origin, UserId},
    errors::Error,
    gateway::{
        port::GatewayPort,
        types::{GatewayCapabilities, Page},
    },
    permissions::{Permission, PermissionSet},
    Result,
};

/// Callback data prefix of reaction buttons.
pub const REACTION_CALLBACK_PREFIX: &str = "react:";

const MAX_MESSAGE_LEN: usize = 4096;

pub struct TelegramGateway {
    bot: Bot,
    me: OnceLock<teloxide::types::UserId>,
    /// Reaction buttons currently attached to each message, in insertion order.
    keyboards: Mutex<HashMap<MessageRef, Vec<String>>>,
}

impl TelegramGateway {
    pub fn new(bot: Bot) -> Self {
        Self {
            bot,
            me: OnceLock::new(),
            keyboards: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_token(token: impl Into<String>) -> Self {
        Self::new(Bot::new(token))
    }

    pub fn bot(&self) -> Bot {
        self.bot.clone()
    }

    /// Record the bot's own account; needed for bot permission lookups.
    pub fn set_me(&self, id: teloxide::types::UserId) {
        let _ = self.me.set(id);
    }

    fn tg_chat(channel: ChannelId) -> teloxide::types::ChatId {
        teloxide::types::ChatId(channel.0)
    }

    fn tg_msg_id(message_id: MessageId) -> Result<teloxide::types::MessageId> {
        i32::try_from(message_id.0)
            .map(teloxide::types::MessageId)
            .map_err(|_| Error::Gateway(format!("message id out of range: {}", message_id.0)))
    }

    fn tg_user(user: UserId) -> Option<teloxide::types::UserId> {
        u64::try_from(user.0).ok().map(teloxide::types::UserId)
    }

    fn map_err(e: RequestError) -> Error {
        Error::Gateway(format!("telegram error: {e}"))
    }

    async fn with_retry<T, Fut>(&self, mut op: impl FnMut() -> Fut) -> Result<T>
    where
        Fut: std::future::IntoFuture<Output = std::result::Result<T, RequestError>>,
        Fut::IntoFuture: Send,
    {
        const MAX_RETRIES: usize = 1;
        let mut attempts = 0usize;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) => match e {
                    RequestError::RetryAfter(d) if attempts < MAX_RETRIES => {
                        attempts += 1;
                        sleep(d).await;
                        continue;
                    }
                    other => return Err(Self::map_err(other)),
                },
            }
        }
    }

    fn keyboard_for(&self, msg: MessageRef) -> Option<InlineKeyboardMarkup> {
        let keyboards = self.keyboards.lock().unwrap_or_else(|e| e.into_inner());
        keyboards.get(&msg).map(|emojis| reaction_keyboard(emojis))
    }

    async fn send_html(&self, channel: ChannelId, html: String) -> Result<MessageRef> {
        let msg = self
            .with_retry(|| {
                self.bot
                    .send_message(Self::tg_chat(channel), html.clone())
                    .parse_mode(ParseMode::Html)
            })
            .await?;
        Ok(MessageRef {
            channel_id: channel,
            message_id: MessageId(i64::from(msg.id.0)),
        })
    }

    async fn edit_html(&self, msg: MessageRef, html: String) -> Result<()> {
        let message_id = Self::tg_msg_id(msg.message_id)?;
        let markup = self.keyboard_for(msg);
        self.with_retry(|| {
            let req = self
                .bot
                .edit_message_text(Self::tg_chat(msg.channel_id), message_id, html.clone())
                .parse_mode(ParseMode::Html);
            // Telegram drops the keyboard on edits that omit it.
            let req = match markup.clone() {
                Some(markup) => req.reply_markup(markup),
                None => req,
            };
            async move { unchanged_is_ok(req.await) }
        })
        .await
    }

    async fn chat_member(
        &self,
        origin: &Origin,
        user: UserId,
    ) -> Result<Option<teloxide::types::ChatMember>> {
        let Some(tg_user) = Self::tg_user(user) else {
            return Ok(None);
        };
        match self
            .bot
            .get_chat_member(Self::tg_chat(origin.channel_id()), tg_user)
            .await
        {
            Ok(member) => Ok(Some(member)),
            Err(RequestError::Api(ApiError::UserNotFound)) => Ok(None),
            Err(RequestError::Api(e)) => {
                tracing::debug!(user = %user, error = %e, "chat member lookup rejected");
                Ok(None)
            }
            Err(e) => Err(Self::map_err(e)),
        }
    }
}

/// Convert a Telegram account into the core author identity.
pub fn author_from_user(user: &User) -> Author {
    Author {
        id: UserId(user.id.0 as i64),
        name: user.full_name(),
        handle: user.username.clone(),
        is_bot: user.is_bot,
    }
}

/// One button row carrying every control emoji of a message.
pub fn reaction_keyboard(emojis: &[String]) -> InlineKeyboardMarkup {
    let row = emojis
        .iter()
        .map(|e| InlineKeyboardButton::callback(e.clone(), format!("{REACTION_CALLBACK_PREFIX}{e}")))
        .collect::<Vec<_>>();
    InlineKeyboardMarkup::new(vec![row])
}

/// Map a Telegram membership to the gateway-neutral permission set.
pub fn permissions_of(kind: &ChatMemberKind) -> PermissionSet {
    let mut set = PermissionSet::empty();
    let base = [
        Permission::SendMessages,
        Permission::EmbedLinks,
        Permission::AddReactions,
        Permission::ReadMessageHistory,
    ];
    match kind {
        ChatMemberKind::Owner(_) => return PermissionSet::all(),
        ChatMemberKind::Administrator(admin) => {
            base.into_iter().for_each(|p| set.insert(p));
            let grants = [
                (admin.can_manage_chat, Permission::ManageGuild),
                (admin.can_change_info, Permission::ManageChannels),
                (admin.can_promote_members, Permission::ManageRoles),
                (admin.can_delete_messages, Permission::ManageMessages),
                (admin.can_restrict_members, Permission::KickMembers),
                (admin.can_restrict_members, Permission::BanMembers),
            ];
            for (granted, p) in grants {
                if granted {
                    set.insert(p);
                }
            }
        }
        ChatMemberKind::Member => base.into_iter().for_each(|p| set.insert(p)),
        ChatMemberKind::Restricted(restricted) => {
            set.insert(Permission::ReadMessageHistory);
            if restricted.can_send_messages {
                set.insert(Permission::SendMessages);
                set.insert(Permission::AddReactions);
            }
        }
        ChatMemberKind::Left | ChatMemberKind::Banned(_) => {}
    }
    set
}

/// Edits that leave a message as it was are not failures.
fn unchanged_is_ok<T>(res: std::result::Result<T, RequestError>) -> std::result::Result<(), RequestError> {
    match res {
        Ok(_) | Err(RequestError::Api(ApiError::MessageNotModified)) => Ok(()),
        Err(e) => Err(e),
    }
}

/// Cut `text` to at most `max` characters.
fn clamp_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Cut markdown to `max` chars. A code block the cut leaves open is closed
/// again within the limit so it still renders as one block.
fn clamp_markdown(text: &str, max: usize) -> Cow<'_, str> {
    const CLOSE_FENCE: &str = "\n```";
    if text.chars().nth(max).is_none() {
        return Cow::Borrowed(text);
    }
    let cut = clamp_chars(text, max.saturating_sub(CLOSE_FENCE.len()));
    if cut.matches("```").count() % 2 == 1 {
        Cow::Owned(format!("{cut}{CLOSE_FENCE}"))
    } else {
        Cow::Borrowed(clamp_chars(text, max))
    }
}

#[async_trait]
impl GatewayPort for TelegramGateway {
    fn capabilities(&self) -> GatewayCapabilities {
        GatewayCapabilities {
            supports_edit: true,
            supports_reactions: true,
            supports_reaction_removal: false,
        }
    }

    fn mention(&self, user: &Author) -> String {
        match &user.handle {
            Some(handle) => format!("@{handle}"),
            None => user.name.clone(),
        }
    }

    async fn send_text(&self, channel: ChannelId, text: &str) -> Result<MessageRef> {
        let html = format::markdown_to_html(&clamp_markdown(text, MAX_MESSAGE_LEN));
        self.send_html(channel, html).await
    }

    async fn edit_text(&self, msg: MessageRef, text: &str) -> Result<()> {
        let html = format::markdown_to_html(&clamp_markdown(text, MAX_MESSAGE_LEN));
        self.edit_html(msg, html).await
    }

    async fn send_page(&self, channel: ChannelId, page: &Page) -> Result<MessageRef> {
        self.send_html(channel, format::render_page(page)).await
    }

    async fn edit_page(&self, msg: MessageRef, page: &Page) -> Result<()> {
        self.edit_html(msg, format::render_page(page)).await
    }

    async fn add_reaction(&self, msg: MessageRef, emoji: &str) -> Result<()> {
        let message_id = Self::tg_msg_id(msg.message_id)?;
        let markup = {
            let mut keyboards = self.keyboards.lock().unwrap_or_else(|e| e.into_inner());
            let emojis = keyboards.entry(msg).or_default();
            if !emojis.iter().any(|e| e == emoji) {
                emojis.push(emoji.to_string());
            }
            reaction_keyboard(emojis)
        };
        self.with_retry(|| {
            let req = self
                .bot
                .edit_message_reply_markup(Self::tg_chat(msg.channel_id), message_id)
                .reply_markup(markup.clone());
            async move { unchanged_is_ok(req.await) }
        })
        .await
    }

    async fn remove_reaction(&self, _msg: MessageRef, _emoji: &str, _user: UserId) -> Result<()> {
        // Buttons are shared by everyone; there is no per-user state to undo.
        Ok(())
    }

    async fn clear_reactions(&self, msg: MessageRef) -> Result<()> {
        let message_id = Self::tg_msg_id(msg.message_id)?;
        self.keyboards
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&msg);
        self.with_retry(|| {
            let req = self
                .bot
                .edit_message_reply_markup(Self::tg_chat(msg.channel_id), message_id);
            async move { unchanged_is_ok(req.await) }
        })
        .await
    }

    async fn member(&self, origin: &Origin, user: UserId) -> Result<Option<Author>> {
        let member = self.chat_member(origin, user).await?;
        Ok(member
            .filter(|m| !matches!(m.kind, ChatMemberKind::Left | ChatMemberKind::Banned(_)))
            .map(|m| author_from_user(&m.user)))
    }

    async fn member_permissions(&self, origin: &Origin, user: UserId) -> Result<PermissionSet> {
        if origin.is_direct() {
            return Ok(PermissionSet::all());
        }
        let member = self.chat_member(origin, user).await?;
        Ok(member
            .map(|m| permissions_of(&m.kind))
            .unwrap_or_default())
    }

    async fn bot_permissions(&self, origin: &Origin) -> Result<PermissionSet> {
        if origin.is_direct() {
            return Ok(PermissionSet::all());
        }
        let Some(me) = self.me.get() else {
            return Err(Error::Gateway("bot identity not known yet".to_string()));
        };
        self.member_permissions(origin, UserId(me.0 as i64)).await
    }
}
