//! Developer-only commands. The dispatcher rejects everyone else silently.

use async_trait::async_trait;

use crate::{
    audit::AuditEvent,
    command::{Command, CommandContext, CommandResult, CommandSpec, UserInputError},
    domain::UserId,
    lifecycle::RestartMarker,
};

pub const CATEGORY: &str = "Development";

pub struct Su {
    spec: CommandSpec,
}

impl Su {
    pub fn new() -> Self {
        Self {
            spec: CommandSpec::new("su", CATEGORY, "Execute a command as another user.")
                .signature("<user id> <command>")
                .usage("`{prefix}su 12345 {prefix}ping` - simulate user 12345 sending `{prefix}ping`")
                .developer_only(),
        }
    }
}

#[async_trait]
impl Command for Su {
    fn spec(&self) -> &CommandSpec {
        &self.spec
    }

    async fn run(&self, ctx: CommandContext, args: String) -> CommandResult {
        let args = args.trim();
        let (raw_user, text) = match args.split_once(char::is_whitespace) {
            Some((user, text)) => (user, text.trim()),
            None => (args, ""),
        };
        if raw_user.is_empty() {
            return Err(UserInputError::missing_argument("user").into());
        }
        if text.is_empty() {
            return Err(UserInputError::missing_argument("command").into());
        }

        let not_found = || UserInputError::bad_argument(format!("Member \"{raw_user}\" not found"));
        let user_id = raw_user
            .trim_start_matches('@')
            .parse::<i64>()
            .map_err(|_| not_found())?;
        let target = ctx
            .services()
            .gateway
            .member(ctx.origin(), UserId(user_id))
            .await?
            .ok_or_else(not_found)?;

        let outcome = ctx
            .dispatcher
            .invoke_as(
                ctx.author(),
                target,
                text,
                ctx.origin().clone(),
                ctx.dispatch.message,
            )
            .await?;
        tracing::debug!(?outcome, "impersonated command finished");
        Ok(())
    }
}

/// `restart` and `shutdown` share everything but the flag and the wording.
pub struct Lifecycle {
    spec: CommandSpec,
    restart: bool,
}

impl Lifecycle {
    pub fn restart() -> Self {
        Self {
            spec: CommandSpec::new("restart", CATEGORY, "Restart the bot process.")
                .usage("`{prefix}restart` - restart the bot with its original command line")
                .developer_only(),
            restart: true,
        }
    }

    pub fn shutdown() -> Self {
        Self {
            spec: CommandSpec::new("shutdown", CATEGORY, "Stop the bot process.")
                .usage("`{prefix}shutdown` - log out and exit")
                .developer_only(),
            restart: false,
        }
    }
}

#[async_trait]
impl Command for Lifecycle {
    fn spec(&self) -> &CommandSpec {
        &self.spec
    }

    async fn run(&self, ctx: CommandContext, _args: String) -> CommandResult {
        let services = ctx.services();
        let text = if self.restart {
            "Restarting Dozer..."
        } else {
            "Shutting down Dozer..."
        };
        let sent = ctx.send(text).await?;

        if self.restart {
            if let Err(e) = RestartMarker::new(sent).write(&services.cfg.restart_file) {
                tracing::warn!(error = %e, "failed to write restart marker");
            }
        }
        if let Err(e) = services
            .audit
            .write(AuditEvent::lifecycle(ctx.author(), ctx.origin(), self.restart))
        {
            tracing::warn!(error = %e, "failed to write audit record");
        }

        services.lifecycle.shutdown(self.restart);
        Ok(())
    }
}
