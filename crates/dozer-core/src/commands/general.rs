use std::time::Instant;

use async_trait::async_trait;

use crate::{
    command::{
        Command, CommandContext, CommandResult, CommandSpec, RegisteredCommand, UserInputError,
    },
    domain::Origin,
    gateway::types::{Page, PageField},
    pager::{Control, PageKey, PageSet, Pager, PagerSession, INFO_EMOJI},
};

pub const CATEGORY: &str = "General";

pub struct Ping {
    spec: CommandSpec,
}

impl Ping {
    pub fn new() -> Self {
        Self {
            spec: CommandSpec::new(
                "ping",
                CATEGORY,
                "Check the bot is online, and calculate its response time.",
            )
            .usage("`{prefix}ping` - Calculate and display the bot's response time"),
        }
    }
}

#[async_trait]
impl Command for Ping {
    fn spec(&self) -> &CommandSpec {
        &self.spec
    }

    async fn run(&self, ctx: CommandContext, _args: String) -> CommandResult {
        let location = match ctx.origin() {
            Origin::Direct { .. } => "DMs".to_string(),
            Origin::Guild {
                guild_name: Some(name),
                ..
            } => format!("the **{name}** server"),
            Origin::Guild { guild_id, .. } => format!("the **{guild_id}** server"),
        };
        let started = Instant::now();
        let text = format!("Pong! We're in {location}.");
        let sent = ctx.send(&text).await?;
        let took = started.elapsed().as_millis();
        ctx.services()
            .gateway
            .edit_text(sent, &format!("{text}\nTook {took} ms to respond."))
            .await?;
        Ok(())
    }
}

pub struct Help {
    spec: CommandSpec,
}

impl Help {
    pub fn new() -> Self {
        Self {
            spec: CommandSpec::new("help", CATEGORY, "Show this message.")
                .aliases(&["about"])
                .signature("[command|category]")
                .usage(
                    "`{prefix}help` - General help message\n\
                     `{prefix}help help` - Help about the help command\n\
                     `{prefix}help General` - Help about the General category",
                ),
        }
    }
}

#[async_trait]
impl Command for Help {
    fn spec(&self) -> &CommandSpec {
        &self.spec
    }

    async fn run(&self, ctx: CommandContext, args: String) -> CommandResult {
        let target: Vec<&str> = args.split_whitespace().collect();
        let registry = ctx.dispatcher.registry();
        let prefix = ctx.prefix().to_string();

        let pager = match target.as_slice() {
            [] => help_all(&prefix, registry.commands().map(|c| c.as_ref())),
            [name] if registry.categories().iter().any(|c| c == name) => help_category(
                &prefix,
                name,
                registry
                    .commands()
                    .filter(|c| c.spec().category == *name)
                    .map(|c| c.as_ref()),
            ),
            [name] => match registry.get(name) {
                Some(cmd) => help_command(&prefix, cmd.spec()),
                None => {
                    return Err(UserInputError::bad_argument("that command does not exist!").into())
                }
            },
            _ => return Err(UserInputError::bad_argument("that command does not exist!").into()),
        };

        PagerSession::for_command(&ctx).run(pager).await?;
        Ok(())
    }
}

fn command_fields<'a>(prefix: &str, commands: impl Iterator<Item = &'a RegisteredCommand>) -> Vec<PageField> {
    commands
        .map(|c| {
            let spec = c.spec();
            PageField::new(
                format!("{prefix}{}", spec.display_signature()),
                spec.summary(),
            )
        })
        .collect()
}

fn with_info(pages: PageSet, info: Page) -> Pager {
    Pager::new(pages.with_named("info", info))
        .with_extra_controls(vec![(
            INFO_EMOJI.to_string(),
            Control::Toggle("info".to_string()),
        )])
        .start_at(PageKey::Named("info".to_string()))
        .auto_remove(true)
}

fn help_all<'a>(prefix: &str, commands: impl Iterator<Item = &'a RegisteredCommand>) -> Pager {
    let info = Page::new("Dozer: Info")
        .description("A guild management bot")
        .field(
            "About",
            "Dozer: a collaborative bot for community servers.",
        )
        .field(
            "Usage",
            format!("Commands start with `{prefix}` or a mention of the bot. Use `{prefix}help <command>` for details."),
        )
        .footer("Dozer Help | all commands | Info page");
    let pages = PageSet::chunked(
        "Dozer: Commands",
        "",
        "Dozer Help | all commands",
        command_fields(prefix, commands),
    );
    with_info(pages, info)
}

fn help_category<'a>(
    prefix: &str,
    category: &str,
    commands: impl Iterator<Item = &'a RegisteredCommand>,
) -> Pager {
    let pages = PageSet::chunked(
        &format!("Category: {category}"),
        "",
        &format!("Dozer Help | {category:?} category"),
        command_fields(prefix, commands),
    );
    Pager::new(pages).auto_remove(true)
}

fn help_command(prefix: &str, spec: &CommandSpec) -> Pager {
    let mut info = Page::new(format!("Command: {prefix}{}", spec.display_signature()))
        .description(spec.help)
        .footer(format!("Dozer Help | {:?} command | Info", spec.name));
    if !spec.aliases.is_empty() {
        info = info.field("Aliases", spec.aliases.join(", "));
    }
    if !spec.usage.is_empty() {
        info = info.field("Usage", spec.usage.replace("{prefix}", prefix));
    }
    // No subcommands: the info page is the only page.
    Pager::new(PageSet::default().with_named("info", info)).start_at(PageKey::Named("info".to_string()))
}
