use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Notify;

use dozer_core::{
    audit::AuditLogger,
    classifier::ErrorCategory,
    command::{Command, CommandContext, CommandError, CommandRegistry, CommandResult, CommandSpec},
    commands::{Lifecycle, Su},
    config::Config,
    dispatch::{DispatchOutcome, Dispatcher, Services},
    domain::{Author, ChannelId, GuildId, InboundEvent, MessageId, MessageRef, Origin, UserId},
    gateway::{
        port::GatewayPort,
        types::{GatewayCapabilities, Page},
    },
    lifecycle::{LifecycleController, RestartMarker},
    pager::ReactionHub,
    permissions::{Permission, PermissionSet},
    prefix::{PrefixEntry, PrefixResolver, PrefixStore},
    rate_gate::{BucketScope, RateGate},
    reporting::{ErrorReport, ErrorReporter},
    Result,
};

const DEVELOPER: i64 = 1;
/// Ids from here up are not members of any chat.
const FIRST_STRANGER: i64 = 1000;

#[derive(Default)]
struct FakeGateway {
    sent: Mutex<Vec<String>>,
    member_perms: Mutex<PermissionSet>,
    /// `None` grants the bot everything.
    bot_perms: Mutex<Option<PermissionSet>>,
}

impl FakeGateway {
    fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

fn reply_ref() -> MessageRef {
    MessageRef {
        channel_id: ChannelId(500),
        message_id: MessageId(1),
    }
}

#[async_trait]
impl GatewayPort for FakeGateway {
    fn capabilities(&self) -> GatewayCapabilities {
        GatewayCapabilities {
            supports_edit: true,
            supports_reactions: true,
            supports_reaction_removal: false,
        }
    }

    fn mention(&self, user: &Author) -> String {
        format!("@{}", user.name)
    }

    async fn send_text(&self, _channel: ChannelId, text: &str) -> Result<MessageRef> {
        self.sent.lock().unwrap().push(text.to_string());
        Ok(reply_ref())
    }

    async fn edit_text(&self, _msg: MessageRef, _text: &str) -> Result<()> {
        Ok(())
    }

    async fn send_page(&self, _channel: ChannelId, page: &Page) -> Result<MessageRef> {
        self.sent.lock().unwrap().push(page.title.clone());
        Ok(reply_ref())
    }

    async fn edit_page(&self, _msg: MessageRef, _page: &Page) -> Result<()> {
        Ok(())
    }

    async fn add_reaction(&self, _msg: MessageRef, _emoji: &str) -> Result<()> {
        Ok(())
    }

    async fn remove_reaction(&self, _msg: MessageRef, _emoji: &str, _user: UserId) -> Result<()> {
        Ok(())
    }

    async fn clear_reactions(&self, _msg: MessageRef) -> Result<()> {
        Ok(())
    }

    async fn member(&self, _origin: &Origin, user: UserId) -> Result<Option<Author>> {
        Ok((user.0 < FIRST_STRANGER).then(|| human(user.0)))
    }

    async fn member_permissions(&self, _origin: &Origin, _user: UserId) -> Result<PermissionSet> {
        Ok(self.member_perms.lock().unwrap().clone())
    }

    async fn bot_permissions(&self, _origin: &Origin) -> Result<PermissionSet> {
        Ok(self
            .bot_perms
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(PermissionSet::all))
    }
}

struct EmptyStore;

#[async_trait]
impl PrefixStore for EmptyStore {
    async fn load_all(&self) -> Result<Vec<PrefixEntry>> {
        Ok(Vec::new())
    }

    async fn store(&self, _guild_id: GuildId, _prefix: &str) -> Result<()> {
        Ok(())
    }
}

#[derive(Default)]
struct RecordingReporter(Mutex<Vec<ErrorReport>>);

impl ErrorReporter for RecordingReporter {
    fn report(&self, report: &ErrorReport) {
        self.0.lock().unwrap().push(report.clone());
    }
}

/// Lets a test hold a command body open while it sends more messages.
#[derive(Default)]
struct Latch {
    started: Notify,
    release: Notify,
}

enum Behavior {
    Succeed,
    Fail,
    Panic,
    Hold(Arc<Latch>),
}

struct TestCommand {
    spec: CommandSpec,
    behavior: Behavior,
    runs: Arc<AtomicUsize>,
    seen: Arc<Mutex<Vec<(i64, bool)>>>,
}

#[async_trait]
impl Command for TestCommand {
    fn spec(&self) -> &CommandSpec {
        &self.spec
    }

    async fn run(&self, ctx: CommandContext, _args: String) -> CommandResult {
        self.runs.fetch_add(1, Ordering::SeqCst);
        self.seen
            .lock()
            .unwrap()
            .push((ctx.author().id.0, ctx.dispatch.is_impersonated));
        match &self.behavior {
            Behavior::Succeed => Ok(()),
            Behavior::Fail => Err(anyhow::anyhow!("database unavailable").into()),
            Behavior::Panic => panic!("handler exploded"),
            Behavior::Hold(latch) => {
                latch.started.notify_one();
                latch.release.notified().await;
                Ok(())
            }
        }
    }
}

struct Harness {
    dispatcher: Arc<Dispatcher>,
    gateway: Arc<FakeGateway>,
    reporter: Arc<RecordingReporter>,
    audit_path: PathBuf,
    restart_path: PathBuf,
    runs: Arc<AtomicUsize>,
    seen: Arc<Mutex<Vec<(i64, bool)>>>,
    latch: Arc<Latch>,
}

impl Harness {
    fn audit_records(&self) -> Vec<serde_json::Value> {
        std::fs::read_to_string(&self.audit_path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.audit_path);
        let _ = std::fs::remove_file(&self.restart_path);
    }
}

fn human(id: i64) -> Author {
    Author {
        id: UserId(id),
        name: format!("user{id}"),
        handle: None,
        is_bot: false,
    }
}

fn harness(name: &str) -> Harness {
    let runs = Arc::new(AtomicUsize::new(0));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let latch = Arc::new(Latch::default());
    let command = |spec: CommandSpec, behavior: Behavior| -> Arc<dyn Command> {
        Arc::new(TestCommand {
            spec,
            behavior,
            runs: runs.clone(),
            seen: seen.clone(),
        })
    };

    let mut registry = CommandRegistry::new();
    registry
        .register(command(CommandSpec::new("count", "Test", "Count runs."), Behavior::Succeed))
        .unwrap();
    registry
        .register(command(CommandSpec::new("fail", "Test", "Fail."), Behavior::Fail))
        .unwrap();
    registry
        .register(command(CommandSpec::new("boom", "Test", "Panic."), Behavior::Panic))
        .unwrap();
    registry
        .register(command(
            CommandSpec::new("guarded", "Test", "Guild only.")
                .guild_only()
                .requires(&[Permission::ManageGuild, Permission::ManageMessages]),
            Behavior::Succeed,
        ))
        .unwrap();
    registry
        .register(command(
            CommandSpec::new("slow", "Test", "Cooldown.").cooldown(
                1,
                Duration::from_secs(10),
                BucketScope::User,
            ),
            Behavior::Succeed,
        ))
        .unwrap();
    registry
        .register(command(
            CommandSpec::new("devonly", "Test", "Developers.").developer_only(),
            Behavior::Succeed,
        ))
        .unwrap();
    registry
        .register(command(
            CommandSpec::new("single", "Test", "One at a time.")
                .cooldown(2, Duration::from_secs(60), BucketScope::User)
                .max_concurrency(1, BucketScope::User),
            Behavior::Hold(latch.clone()),
        ))
        .unwrap();
    registry
        .register(command(
            CommandSpec::new("tidy", "Test", "Needs the bot to manage messages.")
                .bot_requires(&[Permission::ManageMessages]),
            Behavior::Succeed,
        ))
        .unwrap();
    registry.register(Arc::new(Su::new())).unwrap();
    registry.register(Arc::new(Lifecycle::restart())).unwrap();

    let stem = format!(
        "/tmp/dozer-dispatch-{name}-{}-{}",
        std::process::id(),
        Utc::now().timestamp_nanos_opt().unwrap_or_default()
    );
    let audit_path = PathBuf::from(format!("{stem}.log"));
    let restart_path = PathBuf::from(format!("{stem}-restart.json"));
    let cfg = Config {
        developers: vec![DEVELOPER],
        audit_log_path: audit_path.clone(),
        audit_log_json: true,
        restart_file: restart_path.clone(),
        ..Config::default()
    };

    let gateway = Arc::new(FakeGateway::default());
    let reporter = Arc::new(RecordingReporter::default());
    let services = Services {
        prefixes: Arc::new(PrefixResolver::new("&", Arc::new(EmptyStore))),
        rate_gate: Arc::new(RateGate::new(cfg.rate_limit_requests, cfg.rate_limit_window)),
        reactions: Arc::new(ReactionHub::new()),
        lifecycle: Arc::new(LifecycleController::new()),
        audit: Arc::new(AuditLogger::new(&audit_path, true)),
        cfg: Arc::new(cfg),
        gateway: gateway.clone(),
        reporter: reporter.clone(),
    };

    Harness {
        dispatcher: Dispatcher::new(services, registry),
        gateway,
        reporter,
        audit_path,
        restart_path,
        runs,
        seen,
        latch,
    }
}

fn dm(author: Author, content: &str) -> InboundEvent {
    InboundEvent {
        message: MessageRef {
            channel_id: ChannelId(author.id.0),
            message_id: MessageId(10),
        },
        origin: Origin::Direct {
            channel_id: ChannelId(author.id.0),
        },
        author,
        content: content.to_string(),
        timestamp: Utc::now(),
    }
}

fn in_guild(author: Author, content: &str) -> InboundEvent {
    InboundEvent {
        origin: Origin::Guild {
            guild_id: GuildId(-100),
            guild_name: Some("Robots".to_string()),
            channel_id: ChannelId(-100),
        },
        ..dm(author, content)
    }
}

fn failed(category: ErrorCategory) -> impl Fn(&DispatchOutcome) -> bool {
    move |o: &DispatchOutcome| matches!(o, DispatchOutcome::Failed { category: c, .. } if *c == category)
}

#[tokio::test]
async fn bot_authors_are_ignored_without_side_effects() {
    let h = harness("bot");
    let mut bot = human(7);
    bot.is_bot = true;

    let outcome = h.dispatcher.dispatch(dm(bot, "&fail"), false).await;
    assert_eq!(outcome, DispatchOutcome::Ignored);
    assert!(h.gateway.sent().is_empty());
    assert!(h.reporter.0.lock().unwrap().is_empty());
    assert_eq!(h.runs.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn valid_command_runs_exactly_once() {
    let h = harness("once");
    let outcome = h.dispatcher.dispatch(dm(human(2), "&count"), false).await;
    assert_eq!(
        outcome,
        DispatchOutcome::Completed {
            command: "count".to_string()
        }
    );
    assert_eq!(h.runs.load(Ordering::SeqCst), 1);
    assert!(h.gateway.sent().is_empty());
}

#[tokio::test]
async fn messages_without_prefix_or_command_are_quiet() {
    let h = harness("quiet");
    assert_eq!(
        h.dispatcher.dispatch(dm(human(2), "hello"), false).await,
        DispatchOutcome::Ignored
    );
    let unknown = h.dispatcher.dispatch(dm(human(3), "&nope"), false).await;
    assert!(failed(ErrorCategory::InvalidContext)(&unknown));
    assert!(h.gateway.sent().is_empty());
}

#[tokio::test]
async fn internal_fault_replies_once_and_reports_once() {
    let h = harness("internal");
    let outcome = h.dispatcher.dispatch(dm(human(2), "&fail now"), false).await;
    assert!(failed(ErrorCategory::Internal)(&outcome));

    let sent = h.gateway.sent();
    assert_eq!(sent, vec!["```\ndatabase unavailable\n```".to_string()]);
    let reports = h.reporter.0.lock().unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].command.as_deref(), Some("fail"));
    assert_eq!(reports[0].content, "&fail now");
}

#[tokio::test]
async fn handler_panic_is_contained() {
    let h = harness("panic");
    let outcome = h.dispatcher.dispatch(dm(human(2), "&boom"), false).await;
    assert!(failed(ErrorCategory::Internal)(&outcome));
    assert_eq!(h.gateway.sent(), vec!["```\ncommand panicked: handler exploded\n```".to_string()]);
    {
        let reports = h.reporter.0.lock().unwrap();
        assert_eq!(reports.len(), 1);
        assert!(reports[0].detail.contains("panicked at"));
        assert!(reports[0].detail.contains("dispatch_flow.rs"));
    }

    // The dispatcher keeps working afterwards.
    let next = h.dispatcher.dispatch(dm(human(3), "&count"), false).await;
    assert!(matches!(next, DispatchOutcome::Completed { .. }));
}

#[tokio::test]
async fn global_rate_limit_is_silent() {
    let h = harness("rate");
    let user = human(4);
    assert!(matches!(
        h.dispatcher.dispatch(dm(user.clone(), "&count"), false).await,
        DispatchOutcome::Completed { .. }
    ));
    let second = h.dispatcher.dispatch(dm(user, "&count"), false).await;
    assert!(failed(ErrorCategory::InvalidContext)(&second));
    assert_eq!(h.runs.load(Ordering::SeqCst), 1);
    assert!(h.gateway.sent().is_empty());
}

#[tokio::test]
async fn guild_only_and_permission_checks_reply() {
    let h = harness("checks");
    let outcome = h.dispatcher.dispatch(dm(human(2), "&guarded"), false).await;
    assert!(failed(ErrorCategory::NoPrivateMessage)(&outcome));

    h.gateway
        .member_perms
        .lock()
        .unwrap()
        .insert(Permission::ManageMessages);
    let outcome = h
        .dispatcher
        .dispatch(in_guild(human(3), "&guarded"), false)
        .await;
    assert!(failed(ErrorCategory::MissingCallerPermission)(&outcome));

    assert_eq!(
        h.gateway.sent(),
        vec![
            "@user2, This command cannot be used in DMs.".to_string(),
            "@user3, you need Manage Server permissions to run this command!".to_string(),
        ]
    );
    assert_eq!(h.runs.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn cooldown_reply_reports_remaining_time() {
    let h = harness("cooldown");
    let first = h.dispatcher.dispatch(dm(human(2), "&slow"), true).await;
    assert!(matches!(first, DispatchOutcome::Completed { .. }));
    let second = h.dispatcher.dispatch(dm(human(2), "&slow"), true).await;
    assert!(failed(ErrorCategory::OnCooldown)(&second));

    let sent = h.gateway.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].starts_with("@user2, That command is on cooldown! Try again in "));
    assert!(sent[0].ends_with("s!"));
}

#[tokio::test]
async fn developer_only_commands_ignore_everyone_else() {
    let h = harness("devonly");
    let outcome = h.dispatcher.dispatch(dm(human(2), "&devonly"), false).await;
    assert!(failed(ErrorCategory::InvalidContext)(&outcome));
    assert!(h.gateway.sent().is_empty());

    let outcome = h
        .dispatcher
        .dispatch(dm(human(DEVELOPER), "&devonly"), false)
        .await;
    assert!(matches!(outcome, DispatchOutcome::Completed { .. }));
}

#[tokio::test]
async fn impersonation_bypasses_only_the_rate_gate() {
    let h = harness("su");
    let target = human(9);
    let origin = Origin::Direct {
        channel_id: ChannelId(1),
    };

    // Exhaust the target's global bucket first.
    assert!(matches!(
        h.dispatcher.dispatch(dm(target.clone(), "&count"), false).await,
        DispatchOutcome::Completed { .. }
    ));

    let outcome = h
        .dispatcher
        .invoke_as(&human(DEVELOPER), target.clone(), "&count", origin.clone(), reply_ref())
        .await
        .unwrap();
    assert!(matches!(outcome, DispatchOutcome::Completed { .. }));
    assert_eq!(
        h.seen.lock().unwrap().last().copied(),
        Some((9, true))
    );

    // Checks still apply to the target.
    let outcome = h
        .dispatcher
        .invoke_as(&human(DEVELOPER), target, "&devonly", origin, reply_ref())
        .await
        .unwrap();
    assert!(failed(ErrorCategory::InvalidContext)(&outcome));

    let records = h.audit_records();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0]["event"], "impersonation");
    assert_eq!(records[0]["user_id"], DEVELOPER);
    assert_eq!(records[0]["target_user_id"], 9);
    assert_eq!(records[0]["content"], "&count");
}

#[tokio::test]
async fn non_developers_cannot_impersonate() {
    let h = harness("su-denied");
    let err = h
        .dispatcher
        .invoke_as(
            &human(2),
            human(9),
            "&count",
            Origin::Direct {
                channel_id: ChannelId(2),
            },
            reply_ref(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CommandError::NotDeveloper(_)));
    assert_eq!(h.runs.load(Ordering::SeqCst), 0);

    let audit = std::fs::read_to_string(&h.audit_path).unwrap();
    let record: serde_json::Value = serde_json::from_str(audit.trim()).unwrap();
    assert_eq!(record["authorized"], false);
}

#[tokio::test]
async fn missing_bot_permission_is_explained() {
    let h = harness("bot-perms");
    *h.gateway.bot_perms.lock().unwrap() = Some(PermissionSet::default());
    let outcome = h
        .dispatcher
        .dispatch(in_guild(human(3), "&tidy"), false)
        .await;
    assert!(failed(ErrorCategory::MissingBotPermission)(&outcome));
    assert_eq!(
        h.gateway.sent(),
        vec!["@user3, I need Manage Messages permissions to run this command!".to_string()]
    );
    assert_eq!(h.runs.load(Ordering::SeqCst), 0);

    let mut granted = PermissionSet::default();
    granted.insert(Permission::ManageMessages);
    *h.gateway.bot_perms.lock().unwrap() = Some(granted);
    let outcome = h
        .dispatcher
        .dispatch(in_guild(human(4), "&tidy"), false)
        .await;
    assert!(matches!(outcome, DispatchOutcome::Completed { .. }));
}

// Each call below skips the global rate gate so only the command's own
// limits are in play.
#[tokio::test]
async fn concurrency_refusal_keeps_the_cooldown_token() {
    let h = harness("concurrency");
    let user = human(2);

    let first = {
        let dispatcher = h.dispatcher.clone();
        let event = dm(user.clone(), "&single");
        tokio::spawn(async move { dispatcher.dispatch(event, true).await })
    };
    h.latch.started.notified().await;

    let second = h.dispatcher.dispatch(dm(user.clone(), "&single"), true).await;
    assert!(failed(ErrorCategory::ConcurrencyLimit)(&second));
    assert_eq!(
        h.gateway.sent(),
        vec!["@user2, That command has exceeded the max `User` concurrency limit of `1` instance! Please try again later.".to_string()]
    );

    h.latch.release.notify_one();
    assert!(matches!(
        first.await.unwrap(),
        DispatchOutcome::Completed { .. }
    ));

    // The refused call spent nothing, so a second run fits the rate of two.
    h.latch.release.notify_one();
    let third = h.dispatcher.dispatch(dm(user.clone(), "&single"), true).await;
    assert!(matches!(third, DispatchOutcome::Completed { .. }));
    assert_eq!(h.runs.load(Ordering::SeqCst), 2);

    let fourth = h.dispatcher.dispatch(dm(user, "&single"), true).await;
    assert!(failed(ErrorCategory::OnCooldown)(&fourth));
    assert_eq!(h.gateway.sent().len(), 2);
}

#[tokio::test]
async fn su_runs_the_command_as_the_named_member() {
    let h = harness("su-command");
    let outcome = h
        .dispatcher
        .dispatch(dm(human(DEVELOPER), "&su 2 &count"), false)
        .await;
    assert_eq!(
        outcome,
        DispatchOutcome::Completed {
            command: "su".to_string()
        }
    );
    assert_eq!(h.runs.load(Ordering::SeqCst), 1);
    assert_eq!(h.seen.lock().unwrap().last().copied(), Some((2, true)));
    assert!(h.gateway.sent().is_empty());

    let records = h.audit_records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["event"], "impersonation");
    assert_eq!(records[0]["target_user_id"], 2);
    assert_eq!(records[0]["content"], "&count");
}

#[tokio::test]
async fn su_rejects_unknown_members_and_missing_commands() {
    let h = harness("su-input");
    // One developer sends several messages, so the global rate gate is skipped.
    for content in ["&su 1000 &count", "&su abc &count", "&su 2"] {
        let outcome = h
            .dispatcher
            .dispatch(dm(human(DEVELOPER), content), true)
            .await;
        assert!(failed(ErrorCategory::UserInput)(&outcome), "{content}");
    }
    assert_eq!(
        h.gateway.sent(),
        vec![
            "@user1, bad argument: Member \"1000\" not found".to_string(),
            "@user1, bad argument: Member \"abc\" not found".to_string(),
            "@user1, missing required argument: command is a required argument that is missing."
                .to_string(),
        ]
    );
    assert_eq!(h.runs.load(Ordering::SeqCst), 0);
    assert!(!h.audit_path.exists());
}

#[tokio::test]
async fn restart_leaves_a_marker_and_an_audit_record() {
    let h = harness("restart");
    let lifecycle = h.dispatcher.services().lifecycle.clone();

    let outcome = h
        .dispatcher
        .dispatch(in_guild(human(2), "&restart"), false)
        .await;
    assert!(failed(ErrorCategory::InvalidContext)(&outcome));
    assert!(!lifecycle.is_shutting_down());

    let outcome = h
        .dispatcher
        .dispatch(in_guild(human(DEVELOPER), "&restart"), false)
        .await;
    assert_eq!(
        outcome,
        DispatchOutcome::Completed {
            command: "restart".to_string()
        }
    );
    assert_eq!(h.gateway.sent(), vec!["Restarting Dozer...".to_string()]);
    assert!(lifecycle.is_shutting_down());
    assert!(lifecycle.restart_requested());

    let marker = RestartMarker::take_fresh(&h.restart_path).unwrap();
    assert_eq!(marker.message(), reply_ref());
    assert!(!h.restart_path.exists());

    let records = h.audit_records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["event"], "restart");
    assert_eq!(records[0]["user_id"], DEVELOPER);
    assert_eq!(records[0]["username"], "user1");
}
