use std::{sync::Arc, time::Duration};

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::{
    command::CommandContext,
    domain::{MessageRef, Origin, ReactionEvent, UserId},
    gateway::port::GatewayPort,
    permissions::Permission,
    Result,
};

use super::{Pager, ReactionHub};

/// Drives one [`Pager`] against a sent message until it expires.
pub struct PagerSession {
    gateway: Arc<dyn GatewayPort>,
    hub: Arc<ReactionHub>,
    shutdown: CancellationToken,
    owner: UserId,
    origin: Origin,
    timeout: Duration,
}

impl PagerSession {
    pub fn new(
        gateway: Arc<dyn GatewayPort>,
        hub: Arc<ReactionHub>,
        shutdown: CancellationToken,
        owner: UserId,
        origin: Origin,
        timeout: Duration,
    ) -> Self {
        Self {
            gateway,
            hub,
            shutdown,
            owner,
            origin,
            timeout,
        }
    }

    /// Session answering the invoking user in the invoking channel.
    pub fn for_command(ctx: &CommandContext) -> Self {
        let services = ctx.services();
        Self::new(
            services.gateway.clone(),
            services.reactions.clone(),
            services.lifecycle.token(),
            ctx.author().id,
            ctx.origin().clone(),
            services.cfg.pager_timeout,
        )
    }

    /// Send the current page and, if interactive, follow reactions until expiry.
    ///
    /// Returns the sent message. Only the initial send can fail; later
    /// gateway errors end the session instead.
    pub async fn run(self, mut pager: Pager) -> Result<MessageRef> {
        let channel = self.origin.channel_id();
        let page = pager.render().cloned().unwrap_or_default();
        let message = self.gateway.send_page(channel, &page).await?;

        let caps = self.gateway.capabilities();
        if !pager.is_interactive() || !caps.supports_reactions || !caps.supports_edit {
            return Ok(message);
        }

        // Subscribe before offering controls so no early reaction is missed.
        let mut reactions = self.hub.subscribe(message);
        for emoji in pager.controls() {
            if let Err(e) = self.gateway.add_reaction(message, emoji).await {
                tracing::debug!(error = %e, emoji, "failed to add pager control");
            }
        }

        let auto_remove = pager.wants_auto_remove()
            && caps.supports_reaction_removal
            && self.bot_can_manage_messages().await;

        let mut deadline = Instant::now() + self.timeout;
        loop {
            let event = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep_until(deadline) => break,
                event = reactions.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            let (user, emoji) = match event {
                ReactionEvent::MessageDeleted { .. } => {
                    pager.expire();
                    return Ok(message);
                }
                ReactionEvent::Removed { .. } => continue,
                ReactionEvent::Added { user, emoji, .. } => (user, emoji),
            };
            if user.is_bot {
                continue;
            }

            if user.id == self.owner && pager.accept(&emoji) {
                deadline = Instant::now() + self.timeout;
                if pager.is_expired() {
                    break;
                }
                if let Some(page) = pager.render() {
                    if let Err(e) = self.gateway.edit_page(message, page).await {
                        tracing::warn!(error = %e, "pager edit failed; expiring");
                        break;
                    }
                }
            }

            if auto_remove {
                if let Err(e) = self.gateway.remove_reaction(message, &emoji, user.id).await {
                    tracing::debug!(error = %e, "failed to remove reaction");
                }
            }
        }

        pager.expire();
        if let Err(e) = self.gateway.clear_reactions(message).await {
            tracing::debug!(error = %e, "failed to clear pager controls");
        }
        Ok(message)
    }

    async fn bot_can_manage_messages(&self) -> bool {
        match self.gateway.bot_permissions(&self.origin).await {
            Ok(perms) => perms.contains(Permission::ManageMessages),
            Err(_) => false,
        }
    }
}
