use std::time::Duration;

use async_trait::async_trait;

use crate::{
    command::{Command, CommandContext, CommandResult, CommandSpec, UserInputError},
    permissions::Permission,
    prefix::validate_prefix,
    rate_gate::BucketScope,
};

pub const CATEGORY: &str = "Configuration";

pub struct ShowPrefix {
    spec: CommandSpec,
}

impl ShowPrefix {
    pub fn new() -> Self {
        Self {
            spec: CommandSpec::new("prefix", CATEGORY, "Show the command prefix used here.")
                .usage("`{prefix}prefix` - show this server's prefix"),
        }
    }
}

#[async_trait]
impl Command for ShowPrefix {
    fn spec(&self) -> &CommandSpec {
        &self.spec
    }

    async fn run(&self, ctx: CommandContext, _args: String) -> CommandResult {
        let prefixes = &ctx.services().prefixes;
        let prefix = prefixes.resolve(ctx.origin().guild_id());
        let text = if ctx.origin().is_direct() {
            format!("My prefix in DMs is `{prefix}`. Mentioning me works too.")
        } else {
            format!("My prefix in this server is `{prefix}`. Mentioning me works too.")
        };
        ctx.send(&text).await?;
        Ok(())
    }
}

pub struct SetPrefix {
    spec: CommandSpec,
}

impl SetPrefix {
    pub fn new() -> Self {
        Self {
            spec: CommandSpec::new("setprefix", CATEGORY, "Change the command prefix for this server.")
                .signature("<prefix>")
                .usage("`{prefix}setprefix !` - commands in this server now start with `!`")
                .guild_only()
                .requires(&[Permission::ManageGuild])
                .cooldown(1, Duration::from_secs(10), BucketScope::Guild)
                .max_concurrency(1, BucketScope::Guild),
        }
    }
}

#[async_trait]
impl Command for SetPrefix {
    fn spec(&self) -> &CommandSpec {
        &self.spec
    }

    async fn run(&self, ctx: CommandContext, args: String) -> CommandResult {
        let Some(guild_id) = ctx.origin().guild_id() else {
            return Err(crate::command::CommandError::NoPrivateMessage);
        };
        let mut words = args.split_whitespace();
        let Some(prefix) = words.next() else {
            return Err(UserInputError::missing_argument("prefix").into());
        };
        if words.next().is_some() {
            return Err(UserInputError::too_many_arguments().into());
        }
        validate_prefix(prefix).map_err(UserInputError::bad_argument)?;

        ctx.services().prefixes.set(guild_id, prefix).await?;
        tracing::info!(guild = %guild_id, prefix, by = %ctx.author(), "prefix changed");
        ctx.send(&format!("Prefix set to `{prefix}`.")).await?;
        Ok(())
    }
}
