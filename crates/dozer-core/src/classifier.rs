//! Maps every [`CommandError`] onto a closed set of categories, each with a
//! fixed user-facing response policy.

use std::sync::OnceLock;

use regex::Regex;

use crate::{
    audit::iso_timestamp_utc,
    command::{CommandError, UserInputError},
    domain::{Author, Origin},
    panics::CommandPanic,
    permissions::{pretty_concat, Permission},
    reporting::ErrorReport,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCategory {
    InvalidContext,
    NoPrivateMessage,
    UserInput,
    MissingCallerPermission,
    MissingBotPermission,
    OnCooldown,
    ConcurrencyLimit,
    Internal,
}

/// What the dispatcher should do with a classified failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    /// No reply, no log above debug.
    Silent,
    /// One reply to the invoking channel.
    Reply,
    /// One reply, an error log and a report to the error tracker.
    Error,
}

#[derive(Clone, Debug)]
pub struct ClassifiedError {
    pub category: ErrorCategory,
    pub severity: Severity,
    pub reply: Option<String>,
    pub report: Option<ErrorReport>,
}

/// Invocation details the responses are rendered against.
#[derive(Clone, Debug)]
pub struct ErrorScene<'a> {
    /// Gateway mention text for the author.
    pub mention: &'a str,
    pub command: Option<&'a str>,
    pub author: &'a Author,
    pub origin: &'a Origin,
    pub content: &'a str,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ErrorClassifier;

impl ErrorClassifier {
    pub fn new() -> Self {
        Self
    }

    pub fn classify(&self, error: &CommandError, scene: &ErrorScene<'_>) -> ClassifiedError {
        let mention = scene.mention;
        match error {
            CommandError::InvalidContext(_)
            | CommandError::CommandNotFound(_)
            | CommandError::NotDeveloper(_) => silent(),

            CommandError::NoPrivateMessage => reply(
                ErrorCategory::NoPrivateMessage,
                format!("{mention}, This command cannot be used in DMs."),
            ),

            CommandError::UserInput(e) => {
                reply(ErrorCategory::UserInput, user_input_reply(mention, e))
            }

            CommandError::MissingPermissions(perms) => reply(
                ErrorCategory::MissingCallerPermission,
                format!(
                    "{mention}, you need {} permissions to run this command!",
                    permission_list(perms)
                ),
            ),

            CommandError::BotMissingPermissions(perms) => reply(
                ErrorCategory::MissingBotPermission,
                format!(
                    "{mention}, I need {} permissions to run this command!",
                    permission_list(perms)
                ),
            ),

            CommandError::OnCooldown { retry_after } => reply(
                ErrorCategory::OnCooldown,
                format!(
                    "{mention}, That command is on cooldown! Try again in {:.2}s!",
                    retry_after.as_secs_f64()
                ),
            ),

            CommandError::MaxConcurrency { per, number } => reply(
                ErrorCategory::ConcurrencyLimit,
                format!(
                    "{mention}, That command has exceeded the max `{}` concurrency limit of `{number}` instance! Please try again later.",
                    per.label()
                ),
            ),

            CommandError::Internal(err) => {
                let summary = format!("{err:#}").replace('\n', " ");
                // Non-panic errors carry a backtrace only when RUST_BACKTRACE enables it.
                let mut detail = format!("{err:?}");
                if let Some(trace) = err
                    .downcast_ref::<CommandPanic>()
                    .and_then(|p| p.backtrace.as_deref())
                {
                    detail.push_str("\n\n");
                    detail.push_str(trace);
                }
                ClassifiedError {
                    category: ErrorCategory::Internal,
                    severity: Severity::Error,
                    reply: Some(format!("```\n{summary}\n```")),
                    report: Some(ErrorReport {
                        timestamp: iso_timestamp_utc(),
                        command: scene.command.map(|s| s.to_string()),
                        author_id: scene.author.id.0,
                        author: scene.author.to_string(),
                        origin: scene.origin.to_string(),
                        content: scene.content.to_string(),
                        summary,
                        detail,
                    }),
                }
            }
        }
    }
}

fn silent() -> ClassifiedError {
    ClassifiedError {
        category: ErrorCategory::InvalidContext,
        severity: Severity::Silent,
        reply: None,
        report: None,
    }
}

fn reply(category: ErrorCategory, text: String) -> ClassifiedError {
    ClassifiedError {
        category,
        severity: Severity::Reply,
        reply: Some(text),
        report: None,
    }
}

fn user_input_reply(mention: &str, e: &UserInputError) -> String {
    let words = kind_words(&format!("{:?}", e.kind));
    match e.detail.as_deref() {
        Some(detail) if !detail.trim().is_empty() => {
            format!("{mention}, {words}: {}", clean_mentions(detail))
        }
        _ => format!("{mention}, {words}."),
    }
}

/// `MissingRequiredArgument` -> `missing required argument`.
fn kind_words(name: &str) -> String {
    static WORD: OnceLock<Option<Regex>> = OnceLock::new();
    let Some(re) = WORD.get_or_init(|| Regex::new(r"[A-Z][a-z]+").ok()) else {
        return name.to_lowercase();
    };
    re.find_iter(name)
        .map(|m| m.as_str().to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Defuse mass mentions echoed back from user input.
fn clean_mentions(text: &str) -> String {
    static MASS: OnceLock<Option<Regex>> = OnceLock::new();
    let Some(re) = MASS.get_or_init(|| Regex::new(r"@(everyone|here)").ok()) else {
        return text.to_string();
    };
    re.replace_all(text, "@\u{200b}$1").into_owned()
}

fn permission_list(perms: &[Permission]) -> String {
    let labels: Vec<String> = perms.iter().map(|p| p.label()).collect();
    pretty_concat(&labels)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        domain::{ChannelId, UserId},
        rate_gate::BucketScope,
    };

    fn author() -> Author {
        Author {
            id: UserId(5),
            name: "Ana".to_string(),
            handle: Some("ana".to_string()),
            is_bot: false,
        }
    }

    fn classify(err: &CommandError) -> ClassifiedError {
        let author = author();
        let origin = Origin::Direct {
            channel_id: ChannelId(3),
        };
        let scene = ErrorScene {
            mention: "@ana",
            command: Some("ping"),
            author: &author,
            origin: &origin,
            content: "&ping",
        };
        ErrorClassifier::new().classify(err, &scene)
    }

    #[test]
    fn structural_blocks_are_silent() {
        for err in [
            CommandError::InvalidContext("Global rate-limit exceeded!".to_string()),
            CommandError::CommandNotFound("nope".to_string()),
            CommandError::NotDeveloper("nope".to_string()),
        ] {
            let c = classify(&err);
            assert_eq!(c.category, ErrorCategory::InvalidContext);
            assert_eq!(c.severity, Severity::Silent);
            assert!(c.reply.is_none());
            assert!(c.report.is_none());
        }
    }

    #[test]
    fn direct_message_reply() {
        let c = classify(&CommandError::NoPrivateMessage);
        assert_eq!(c.category, ErrorCategory::NoPrivateMessage);
        assert_eq!(
            c.reply.as_deref(),
            Some("@ana, This command cannot be used in DMs.")
        );
    }

    #[test]
    fn user_input_splits_kind_and_cleans_detail() {
        let c = classify(&CommandError::UserInput(UserInputError::bad_argument(
            "@everyone is not a user",
        )));
        assert_eq!(c.category, ErrorCategory::UserInput);
        assert_eq!(
            c.reply.as_deref(),
            Some("@ana, bad argument: @\u{200b}everyone is not a user")
        );

        let c = classify(&CommandError::UserInput(UserInputError::missing_argument(
            "user",
        )));
        assert_eq!(
            c.reply.as_deref(),
            Some("@ana, missing required argument: user is a required argument that is missing.")
        );

        let c = classify(&CommandError::UserInput(
            UserInputError::too_many_arguments(),
        ));
        assert_eq!(c.reply.as_deref(), Some("@ana, too many arguments."));
    }

    #[test]
    fn permission_lists_are_joined_naturally() {
        let c = classify(&CommandError::MissingPermissions(vec![
            Permission::ManageGuild,
            Permission::ManageMessages,
            Permission::KickMembers,
        ]));
        assert_eq!(c.category, ErrorCategory::MissingCallerPermission);
        assert_eq!(
            c.reply.as_deref(),
            Some("@ana, you need Manage Server, Manage Messages, and Kick Members permissions to run this command!")
        );

        let c = classify(&CommandError::BotMissingPermissions(vec![
            Permission::AddReactions,
        ]));
        assert_eq!(c.category, ErrorCategory::MissingBotPermission);
        assert_eq!(
            c.reply.as_deref(),
            Some("@ana, I need Add Reactions permissions to run this command!")
        );
    }

    #[test]
    fn cooldown_has_two_decimals() {
        let c = classify(&CommandError::OnCooldown {
            retry_after: Duration::from_millis(6_251),
        });
        assert_eq!(c.category, ErrorCategory::OnCooldown);
        assert_eq!(
            c.reply.as_deref(),
            Some("@ana, That command is on cooldown! Try again in 6.25s!")
        );
    }

    #[test]
    fn concurrency_names_scope_and_limit() {
        let c = classify(&CommandError::MaxConcurrency {
            per: BucketScope::Guild,
            number: 1,
        });
        assert_eq!(c.category, ErrorCategory::ConcurrencyLimit);
        assert_eq!(
            c.reply.as_deref(),
            Some("@ana, That command has exceeded the max `Guild` concurrency limit of `1` instance! Please try again later.")
        );
    }

    #[test]
    fn internal_errors_reply_compactly_and_report_fully() {
        let err = anyhow::anyhow!("disk full").context("writing prefixes");
        let c = classify(&CommandError::Internal(err));
        assert_eq!(c.category, ErrorCategory::Internal);
        assert_eq!(c.severity, Severity::Error);
        assert_eq!(
            c.reply.as_deref(),
            Some("```\nwriting prefixes: disk full\n```")
        );

        let report = c.report.unwrap();
        assert_eq!(report.command.as_deref(), Some("ping"));
        assert_eq!(report.author_id, 5);
        assert_eq!(report.origin, "DM #3");
        assert!(report.detail.contains("Caused by"));
        assert!(report.detail.contains("disk full"));
    }

    #[test]
    fn panic_backtrace_stays_out_of_the_reply() {
        let err = CommandPanic {
            message: "index out of bounds".to_string(),
            backtrace: Some("panicked at src/commands/general.rs:10:5\n   0: frame".to_string()),
        };
        let c = classify(&CommandError::Internal(err.into()));
        assert_eq!(
            c.reply.as_deref(),
            Some("```\ncommand panicked: index out of bounds\n```")
        );

        let report = c.report.unwrap();
        assert_eq!(report.summary, "command panicked: index out of bounds");
        assert!(report.detail.contains("panicked at src/commands/general.rs:10:5"));
        assert!(report.detail.contains("0: frame"));
    }
}
