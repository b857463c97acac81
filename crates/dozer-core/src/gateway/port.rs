use async_trait::async_trait;

use crate::{
    domain::{Author, ChannelId, MessageRef, Origin, UserId},
    gateway::types::{GatewayCapabilities, Page},
    permissions::PermissionSet,
    Result,
};

/// Outbound side of the chat gateway.
///
/// The dispatcher and the pager are pure producers against this port; transport
/// details (polling, reconnects, payload formats) stay in the adapter crate.
#[async_trait]
pub trait GatewayPort: Send + Sync {
    fn capabilities(&self) -> GatewayCapabilities;

    /// Render a user mention in the gateway's own syntax.
    fn mention(&self, user: &Author) -> String;

    async fn send_text(&self, channel: ChannelId, text: &str) -> Result<MessageRef>;
    async fn edit_text(&self, msg: MessageRef, text: &str) -> Result<()>;

    async fn send_page(&self, channel: ChannelId, page: &Page) -> Result<MessageRef>;
    async fn edit_page(&self, msg: MessageRef, page: &Page) -> Result<()>;

    async fn add_reaction(&self, msg: MessageRef, emoji: &str) -> Result<()>;
    async fn remove_reaction(&self, msg: MessageRef, emoji: &str, user: UserId) -> Result<()>;
    async fn clear_reactions(&self, msg: MessageRef) -> Result<()>;

    /// Look up a member of the origin's guild (or the DM partner).
    async fn member(&self, origin: &Origin, user: UserId) -> Result<Option<Author>>;

    async fn member_permissions(&self, origin: &Origin, user: UserId) -> Result<PermissionSet>;
    async fn bot_permissions(&self, origin: &Origin) -> Result<PermissionSet>;
}
