use std::sync::Arc;

use dozer_core::{
    audit::AuditLogger,
    commands::builtin_registry,
    config::Config,
    dispatch::{Dispatcher, Services},
    lifecycle::{Invocation, LifecycleController},
    pager::ReactionHub,
    prefix::{JsonPrefixStore, PrefixResolver},
    rate_gate::RateGate,
    reporting::{AuditReporter, ErrorReporter, FanoutReporter, WebhookReporter},
};
use dozer_telegram::TelegramGateway;

#[tokio::main]
async fn main() -> Result<(), dozer_core::Error> {
    // Captured before anything can touch the working directory.
    let invocation = Invocation::capture()?;

    let mut cfg = Config::load()?;
    dozer_core::logging::init("dozer", cfg.debug)?;
    let token = cfg.take_token();
    let cfg = Arc::new(cfg);

    let gateway = Arc::new(TelegramGateway::from_token(token));
    let audit = Arc::new(AuditLogger::new(
        cfg.audit_log_path.clone(),
        cfg.audit_log_json,
    ));

    let mut reporter = FanoutReporter::new().with(Arc::new(AuditReporter::new(audit.clone())));
    if let Some(url) = &cfg.error_report_url {
        reporter = reporter.with(Arc::new(WebhookReporter::new(url.clone())));
    }
    let reporter: Arc<dyn ErrorReporter> = Arc::new(reporter);

    let lifecycle = Arc::new(LifecycleController::new());
    let services = Services {
        cfg: cfg.clone(),
        gateway: gateway.clone(),
        prefixes: Arc::new(PrefixResolver::new(
            cfg.default_prefix.clone(),
            Arc::new(JsonPrefixStore::new(cfg.prefix_store_path.clone())),
        )),
        rate_gate: Arc::new(RateGate::new(cfg.rate_limit_requests, cfg.rate_limit_window)),
        reactions: Arc::new(ReactionHub::new()),
        lifecycle: lifecycle.clone(),
        audit,
        reporter,
    };
    let dispatcher = Dispatcher::new(services, builtin_registry()?);

    dozer_telegram::router::run_polling(gateway, dispatcher)
        .await
        .map_err(|e| dozer_core::Error::External(format!("telegram bot failed: {e}")))?;

    if lifecycle.restart_requested() {
        tracing::info!(program = %invocation.program().display(), "re-executing");
        return Err(invocation.exec());
    }
    tracing::info!("shut down");
    Ok(())
}
