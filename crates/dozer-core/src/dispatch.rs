//! Turns inbound messages into command invocations.
//!
//! Order of gates: author identity, prefix and lookup, the global rate gate,
//! then the command's own checks. Every failure ends in the classifier.

use std::{
    any::Any,
    sync::Arc,
    time::Instant,
};

use crate::{
    audit::AuditLogger,
    classifier::{ErrorCategory, ErrorClassifier, ErrorScene, Severity},
    command::{CommandContext, CommandError, CommandRegistry, RegisteredCommand},
    concurrency::ConcurrencyPermit,
    config::Config,
    domain::{Author, InboundEvent, MessageRef, Origin},
    gateway::port::GatewayPort,
    impersonation::ImpersonationInvoker,
    lifecycle::LifecycleController,
    pager::ReactionHub,
    panics::{self, CommandPanic, PanicTrace},
    permissions::PermissionSet,
    prefix::PrefixResolver,
    rate_gate::{AdmitMode, RateGate},
    reporting::ErrorReporter,
};

/// Shared collaborators handed to every command.
#[derive(Clone)]
pub struct Services {
    pub cfg: Arc<Config>,
    pub gateway: Arc<dyn GatewayPort>,
    pub prefixes: Arc<PrefixResolver>,
    pub rate_gate: Arc<RateGate>,
    pub reactions: Arc<ReactionHub>,
    pub lifecycle: Arc<LifecycleController>,
    pub audit: Arc<AuditLogger>,
    pub reporter: Arc<dyn ErrorReporter>,
}

/// One invocation, as seen by checks and the command body.
#[derive(Clone, Debug)]
pub struct DispatchContext {
    pub command: String,
    pub invoked_with: String,
    pub prefix: String,
    pub args: String,
    pub author: Author,
    pub origin: Origin,
    pub message: MessageRef,
    pub content: String,
    pub is_impersonated: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Not a command (no prefix, empty name) or a non-human author.
    Ignored,
    Completed { command: String },
    Failed {
        command: Option<String>,
        category: ErrorCategory,
    },
}

pub struct Dispatcher {
    services: Services,
    registry: CommandRegistry,
    classifier: ErrorClassifier,
}

impl Dispatcher {
    pub fn new(services: Services, registry: CommandRegistry) -> Arc<Self> {
        Arc::new(Self {
            services,
            registry,
            classifier: ErrorClassifier::new(),
        })
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    /// Called once the gateway session is up.
    pub async fn on_ready(&self, bot: Author, mentions: Vec<String>) {
        self.services.prefixes.set_mentions(mentions);
        let report = self.services.prefixes.refresh().await;
        tracing::info!(
            bot = %bot,
            commands = self.registry.len(),
            guild_prefixes = report.loaded,
            "signed in"
        );

        let needed: PermissionSet = self
            .registry
            .commands()
            .flat_map(|c| c.spec().bot_permissions.iter().copied())
            .collect();
        tracing::debug!(
            permissions = ?needed.iter().map(|p| p.as_str()).collect::<Vec<_>>(),
            "bot permissions used by registered commands"
        );
    }

    /// Entry point for every inbound message.
    pub async fn handle(self: &Arc<Self>, event: InboundEvent) {
        self.dispatch(event, false).await;
    }

    /// Run `text` as `target`, on behalf of the developer `real`.
    pub async fn invoke_as(
        self: &Arc<Self>,
        real: &Author,
        target: Author,
        text: &str,
        origin: Origin,
        message: MessageRef,
    ) -> Result<DispatchOutcome, CommandError> {
        ImpersonationInvoker::new()
            .invoke_as(self, real, target, text, origin, message)
            .await
    }

    pub async fn dispatch(self: &Arc<Self>, event: InboundEvent, impersonated: bool) -> DispatchOutcome {
        if event.author.is_bot {
            return DispatchOutcome::Ignored;
        }

        let Some((prefix, rest)) = self
            .services
            .prefixes
            .match_prefix(&event.origin, &event.content)
        else {
            return DispatchOutcome::Ignored;
        };
        let (invoked_with, args) = split_invocation(rest);
        if invoked_with.is_empty() {
            return DispatchOutcome::Ignored;
        }
        let invoked_with = invoked_with.to_string();
        let args = args.to_string();

        let Some(entry) = self.registry.get(&invoked_with) else {
            let err = CommandError::CommandNotFound(invoked_with);
            return self.fail(&event, None, err).await;
        };
        let name = entry.spec().name.to_string();

        let mode = if impersonated {
            AdmitMode::Bypass
        } else {
            AdmitMode::Checked
        };
        if !self.services.rate_gate.admit(event.author.id, mode).allowed {
            let err = CommandError::InvalidContext("Global rate-limit exceeded!".to_string());
            return self.fail(&event, Some(&name), err).await;
        }

        let permit = match self.check(&entry, &event).await {
            Ok(permit) => permit,
            Err(err) => return self.fail(&event, Some(&name), err).await,
        };

        let ctx = CommandContext {
            dispatch: DispatchContext {
                command: name.clone(),
                invoked_with,
                prefix,
                args: args.clone(),
                author: event.author.clone(),
                origin: event.origin.clone(),
                message: event.message,
                content: event.content.clone(),
                is_impersonated: impersonated,
            },
            dispatcher: self.clone(),
        };
        tracing::debug!(command = %name, author = %event.author, origin = %event.origin, impersonated, "running command");

        let command = entry.command.clone();
        let trace = PanicTrace::default();
        let task = tokio::spawn(panics::traced(trace.clone(), async move {
            let _permit = permit;
            command.run(ctx, args).await
        }));

        let result = match task.await {
            Ok(result) => result,
            Err(join) if join.is_panic() => Err(CommandError::Internal(
                CommandPanic {
                    message: panic_message(join.into_panic()),
                    backtrace: trace.take(),
                }
                .into(),
            )),
            Err(_) => Err(CommandError::Internal(anyhow::anyhow!(
                "command task was cancelled"
            ))),
        };

        match result {
            Ok(()) => DispatchOutcome::Completed { command: name },
            Err(err) => self.fail(&event, Some(&name), err).await,
        }
    }

    async fn check(
        &self,
        entry: &RegisteredCommand,
        event: &InboundEvent,
    ) -> Result<Option<ConcurrencyPermit>, CommandError> {
        let spec = entry.spec();
        let author = &event.author;
        let origin = &event.origin;

        if spec.guild_only && origin.is_direct() {
            return Err(CommandError::NoPrivateMessage);
        }
        if spec.developer_only && !self.services.cfg.is_developer(author.id.0) {
            return Err(CommandError::NotDeveloper(format!(
                "{} is a developer-only command",
                spec.name
            )));
        }

        if !spec.required_permissions.is_empty() {
            let granted = self
                .services
                .gateway
                .member_permissions(origin, author.id)
                .await?;
            let missing = granted.missing(&spec.required_permissions);
            if !missing.is_empty() {
                return Err(CommandError::MissingPermissions(missing));
            }
        }
        if !spec.bot_permissions.is_empty() {
            let granted = self.services.gateway.bot_permissions(origin).await?;
            let missing = granted.missing(&spec.bot_permissions);
            if !missing.is_empty() {
                return Err(CommandError::BotMissingPermissions(missing));
            }
        }

        // The permit comes first so a call refused for concurrency keeps its cooldown token.
        let permit = match &entry.concurrency {
            Some(limiter) => {
                let limit = limiter.limit();
                match limiter.try_acquire(limit.scope.key(author.id, origin)) {
                    Some(permit) => Some(permit),
                    None => {
                        return Err(CommandError::MaxConcurrency {
                            per: limit.scope,
                            number: limit.max,
                        })
                    }
                }
            }
            None => None,
        };

        if let Some(cooldown) = &entry.cooldown {
            if let Some(retry_after) = cooldown.update_at(author.id, origin, Instant::now()) {
                return Err(CommandError::OnCooldown { retry_after });
            }
        }
        Ok(permit)
    }

    async fn fail(&self, event: &InboundEvent, command: Option<&str>, error: CommandError) -> DispatchOutcome {
        let mention = self.services.gateway.mention(&event.author);
        let scene = ErrorScene {
            mention: &mention,
            command,
            author: &event.author,
            origin: &event.origin,
            content: &event.content,
        };
        let classified = self.classifier.classify(&error, &scene);

        if let Some(report) = &classified.report {
            tracing::error!(
                command = report.command.as_deref().unwrap_or("-"),
                author = %event.author,
                origin = %event.origin,
                content = %event.content,
                "command failed:\n{}",
                report.detail
            );
        } else if classified.severity == Severity::Reply {
            tracing::debug!(command = command.unwrap_or("-"), category = ?classified.category, "command rejected");
        }

        if let Some(reply) = &classified.reply {
            if let Err(e) = self
                .services
                .gateway
                .send_text(event.origin.channel_id(), reply)
                .await
            {
                tracing::warn!(error = %e, "failed to send error reply");
            }
        }
        if let Some(report) = &classified.report {
            self.services.reporter.report(report);
        }

        DispatchOutcome::Failed {
            command: command.map(|s| s.to_string()),
            category: classified.category,
        }
    }
}

/// Split `name rest...` after the prefix. Whitespace between the prefix and
/// the name is tolerated.
fn split_invocation(rest: &str) -> (&str, &str) {
    let rest = rest.trim_start();
    match rest.find(char::is_whitespace) {
        Some(i) => (&rest[..i], rest[i..].trim()),
        None => (rest, ""),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
