//! Developer-only re-dispatch of a message as another user.

use std::sync::Arc;

use chrono::Utc;

use crate::{
    audit::AuditEvent,
    command::CommandError,
    dispatch::{DispatchOutcome, Dispatcher},
    domain::{Author, InboundEvent, MessageRef, Origin},
};

#[derive(Clone, Copy, Debug, Default)]
pub struct ImpersonationInvoker;

impl ImpersonationInvoker {
    pub fn new() -> Self {
        Self
    }

    /// Dispatch `text` with `target` as the author.
    ///
    /// Only configured developers may do this. The impersonated run skips the
    /// global rate gate; every other check applies to `target`.
    pub async fn invoke_as(
        &self,
        dispatcher: &Arc<Dispatcher>,
        real: &Author,
        target: Author,
        text: &str,
        origin: Origin,
        message: MessageRef,
    ) -> Result<DispatchOutcome, CommandError> {
        let services = dispatcher.services();

        if !services.cfg.is_developer(real.id.0) {
            tracing::warn!(user = %real, origin = %origin, "impersonation refused");
            if let Err(e) = services
                .audit
                .write(AuditEvent::impersonation_denied(real, &origin, text))
            {
                tracing::warn!(error = %e, "failed to write audit record");
            }
            return Err(CommandError::NotDeveloper(
                "you are not a developer!".to_string(),
            ));
        }

        tracing::info!(user = %real, target = %target, origin = %origin, content = text, "running command as another user");
        if let Err(e) = services
            .audit
            .write(AuditEvent::impersonation(real, &target, &origin, text))
        {
            tracing::warn!(error = %e, "failed to write audit record");
        }

        let event = InboundEvent {
            message,
            author: target,
            origin,
            content: text.to_string(),
            timestamp: Utc::now(),
        };
        Ok(dispatcher.dispatch(event, true).await)
    }
}
