//! Command model: declarations, the failure taxonomy and the registry.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;

use crate::{
    concurrency::{ConcurrencyLimiter, MaxConcurrency},
    dispatch::{DispatchContext, Dispatcher, Services},
    domain::{Author, MessageRef, Origin},
    errors::Error,
    permissions::Permission,
    rate_gate::{BucketScope, Cooldown, CooldownMapping},
    Result,
};

/// Kinds of user-correctable argument problems.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UserInputKind {
    MissingRequiredArgument,
    BadArgument,
    TooManyArguments,
}

#[derive(Debug, thiserror::Error)]
#[error("{kind:?}: {}", .detail.as_deref().unwrap_or(""))]
pub struct UserInputError {
    pub kind: UserInputKind,
    pub detail: Option<String>,
}

impl UserInputError {
    pub fn missing_argument(param: &str) -> Self {
        Self {
            kind: UserInputKind::MissingRequiredArgument,
            detail: Some(format!("{param} is a required argument that is missing.")),
        }
    }

    pub fn bad_argument(detail: impl Into<String>) -> Self {
        Self {
            kind: UserInputKind::BadArgument,
            detail: Some(detail.into()),
        }
    }

    pub fn too_many_arguments() -> Self {
        Self {
            kind: UserInputKind::TooManyArguments,
            detail: None,
        }
    }
}

/// Every failure the dispatch path can produce.
///
/// The set is closed: anything not expressible here is `Internal`.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    /// Bot author, global rate limit and similar structural blocks.
    #[error("{0}")]
    InvalidContext(String),

    #[error("command \"{0}\" is not found")]
    CommandNotFound(String),

    /// Developer-only command (or impersonation) by someone not on the allow-list.
    #[error("{0}")]
    NotDeveloper(String),

    #[error("this command cannot be used in private messages")]
    NoPrivateMessage,

    #[error(transparent)]
    UserInput(#[from] UserInputError),

    #[error("caller is missing permissions: {0:?}")]
    MissingPermissions(Vec<Permission>),

    #[error("bot is missing permissions: {0:?}")]
    BotMissingPermissions(Vec<Permission>),

    #[error("command is on cooldown, retry after {:.2}s", .retry_after.as_secs_f64())]
    OnCooldown { retry_after: Duration },

    #[error("too many concurrent uses ({number} per {})", .per.label())]
    MaxConcurrency { per: BucketScope, number: u32 },

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<Error> for CommandError {
    fn from(e: Error) -> Self {
        CommandError::Internal(anyhow::Error::new(e))
    }
}

pub type CommandResult = std::result::Result<(), CommandError>;

/// Static declaration of a command and the checks the dispatcher runs for it.
#[derive(Clone, Debug)]
pub struct CommandSpec {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub category: &'static str,
    /// First line is the one-line summary used in listings.
    pub help: &'static str,
    pub signature: &'static str,
    /// Example usage; `{prefix}` is substituted when rendered.
    pub usage: &'static str,
    pub guild_only: bool,
    pub developer_only: bool,
    pub required_permissions: Vec<Permission>,
    pub bot_permissions: Vec<Permission>,
    pub cooldown: Option<Cooldown>,
    pub max_concurrency: Option<MaxConcurrency>,
}

impl CommandSpec {
    pub fn new(name: &'static str, category: &'static str, help: &'static str) -> Self {
        Self {
            name,
            aliases: &[],
            category,
            help,
            signature: "",
            usage: "",
            guild_only: false,
            developer_only: false,
            required_permissions: Vec::new(),
            bot_permissions: Vec::new(),
            cooldown: None,
            max_concurrency: None,
        }
    }

    pub fn aliases(mut self, aliases: &'static [&'static str]) -> Self {
        self.aliases = aliases;
        self
    }

    pub fn signature(mut self, signature: &'static str) -> Self {
        self.signature = signature;
        self
    }

    pub fn usage(mut self, usage: &'static str) -> Self {
        self.usage = usage;
        self
    }

    pub fn guild_only(mut self) -> Self {
        self.guild_only = true;
        self
    }

    pub fn developer_only(mut self) -> Self {
        self.developer_only = true;
        self
    }

    pub fn requires(mut self, perms: &[Permission]) -> Self {
        self.required_permissions = perms.to_vec();
        self
    }

    pub fn bot_requires(mut self, perms: &[Permission]) -> Self {
        self.bot_permissions = perms.to_vec();
        self
    }

    pub fn cooldown(mut self, rate: u32, per: Duration, scope: BucketScope) -> Self {
        self.cooldown = Some(Cooldown { rate, per, scope });
        self
    }

    pub fn max_concurrency(mut self, max: u32, scope: BucketScope) -> Self {
        self.max_concurrency = Some(MaxConcurrency { max, scope });
        self
    }

    pub fn summary(&self) -> &str {
        self.help.lines().next().unwrap_or_default().trim()
    }

    /// `name <args>` as shown in help listings.
    pub fn display_signature(&self) -> String {
        if self.signature.is_empty() {
            self.name.to_string()
        } else {
            format!("{} {}", self.name, self.signature)
        }
    }
}

/// Everything a command body gets: the invocation plus shared services.
#[derive(Clone)]
pub struct CommandContext {
    pub dispatch: DispatchContext,
    pub dispatcher: Arc<Dispatcher>,
}

impl CommandContext {
    pub fn services(&self) -> &Services {
        self.dispatcher.services()
    }

    pub fn author(&self) -> &Author {
        &self.dispatch.author
    }

    pub fn origin(&self) -> &Origin {
        &self.dispatch.origin
    }

    pub fn prefix(&self) -> &str {
        &self.dispatch.prefix
    }

    pub fn mention(&self) -> String {
        self.services().gateway.mention(&self.dispatch.author)
    }

    /// Reply in the invoking channel.
    pub async fn send(&self, text: &str) -> Result<MessageRef> {
        self.services()
            .gateway
            .send_text(self.dispatch.origin.channel_id(), text)
            .await
    }
}

#[async_trait]
pub trait Command: Send + Sync {
    fn spec(&self) -> &CommandSpec;

    async fn run(&self, ctx: CommandContext, args: String) -> CommandResult;
}

/// A registered command with its live cooldown / concurrency state.
pub struct RegisteredCommand {
    pub command: Arc<dyn Command>,
    pub cooldown: Option<CooldownMapping>,
    pub concurrency: Option<ConcurrencyLimiter>,
}

impl RegisteredCommand {
    pub fn spec(&self) -> &CommandSpec {
        self.command.spec()
    }
}

#[derive(Default)]
pub struct CommandRegistry {
    by_name: BTreeMap<String, Arc<RegisteredCommand>>,
    lookup: HashMap<String, Arc<RegisteredCommand>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, command: Arc<dyn Command>) -> Result<()> {
        let spec = command.spec().clone();
        let names = std::iter::once(spec.name).chain(spec.aliases.iter().copied());
        for name in names.clone() {
            if self.lookup.contains_key(name) {
                return Err(Error::Config(format!(
                    "command name or alias registered twice: {name}"
                )));
            }
        }

        let entry = Arc::new(RegisteredCommand {
            command,
            cooldown: spec.cooldown.map(CooldownMapping::new),
            concurrency: spec.max_concurrency.map(ConcurrencyLimiter::new),
        });
        for name in names {
            self.lookup.insert(name.to_string(), entry.clone());
        }
        self.by_name.insert(spec.name.to_string(), entry);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<RegisteredCommand>> {
        self.lookup.get(name).cloned()
    }

    /// Unique commands sorted by name.
    pub fn commands(&self) -> impl Iterator<Item = &Arc<RegisteredCommand>> {
        self.by_name.values()
    }

    pub fn categories(&self) -> Vec<&'static str> {
        let mut out: Vec<&'static str> = self.commands().map(|c| c.spec().category).collect();
        out.sort_unstable();
        out.dedup();
        out
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop(CommandSpec);

    #[async_trait]
    impl Command for Noop {
        fn spec(&self) -> &CommandSpec {
            &self.0
        }

        async fn run(&self, _ctx: CommandContext, _args: String) -> CommandResult {
            Ok(())
        }
    }

    #[test]
    fn aliases_resolve_to_the_same_entry() {
        let mut reg = CommandRegistry::new();
        reg.register(Arc::new(Noop(
            CommandSpec::new("help", "General", "Show this message.").aliases(&["about"]),
        )))
        .unwrap();

        let a = reg.get("help").unwrap();
        let b = reg.get("about").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(reg.len(), 1);
        assert!(reg.get("Help").is_none());
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut reg = CommandRegistry::new();
        reg.register(Arc::new(Noop(CommandSpec::new("ping", "General", "x"))))
            .unwrap();
        let err = reg
            .register(Arc::new(Noop(
                CommandSpec::new("pong", "General", "x").aliases(&["ping"]),
            )))
            .unwrap_err();
        assert!(err.to_string().contains("ping"));
    }

    #[test]
    fn summary_is_first_help_line() {
        let spec = CommandSpec::new("su", "Development", "Execute a command as another user.\nMore.")
            .signature("<user> <command>");
        assert_eq!(spec.summary(), "Execute a command as another user.");
        assert_eq!(spec.display_signature(), "su <user> <command>");
    }
}
