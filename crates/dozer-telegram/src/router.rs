use std::sync::Arc;

use teloxide::{dptree, prelude::*};

use tokio_util::task::TaskTracker;

use dozer_core::{dispatch::Dispatcher, gateway::port::GatewayPort, lifecycle::RestartMarker};

use crate::{author_from_user, handlers, TelegramGateway};

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    /// Command tasks spawned by the message handler; drained on shutdown.
    pub tasks: TaskTracker,
}

/// Poll Telegram until the lifecycle controller asks us to stop.
///
/// On return every in-flight command has either finished or been abandoned
/// after the configured grace period.
pub async fn run_polling(
    gateway: Arc<TelegramGateway>,
    dispatcher: Arc<Dispatcher>,
) -> anyhow::Result<()> {
    let bot = gateway.bot();
    let services = dispatcher.services().clone();
    let cfg = services.cfg.clone();

    let me = bot.get_me().await?;
    gateway.set_me(me.id);
    let mention = format!("@{} ", me.username());
    dispatcher
        .on_ready(author_from_user(&me.user), vec![mention])
        .await;

    // A restart command leaves a marker pointing at its "Restarting..." reply.
    if let Some(marker) = RestartMarker::take_fresh(&cfg.restart_file) {
        if let Err(e) = gateway.edit_text(marker.message(), "Restarted Dozer.").await {
            tracing::warn!(error = %e, "failed to update restart message");
        }
    }

    let tasks = TaskTracker::new();
    let state = Arc::new(AppState {
        dispatcher: dispatcher.clone(),
        tasks: tasks.clone(),
    });

    let handler = dptree::entry()
        .branch(Update::filter_callback_query().endpoint(handlers::handle_callback))
        .branch(Update::filter_message().endpoint(handlers::handle_message));

    let mut updates = teloxide::dispatching::Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .build();

    let stop = updates.shutdown_token();
    let lifecycle = services.lifecycle.token();
    let watcher = tokio::spawn(async move {
        lifecycle.cancelled().await;
        match stop.shutdown() {
            Ok(done) => done.await,
            Err(e) => tracing::debug!(error = %e, "update dispatcher already stopping"),
        }
    });

    tracing::info!(username = %me.username(), "polling for updates");
    updates.dispatch().await;
    watcher.abort();

    tasks.close();
    if tokio::time::timeout(cfg.shutdown_grace, tasks.wait())
        .await
        .is_err()
    {
        tracing::warn!(
            pending = tasks.len(),
            grace_ms = cfg.shutdown_grace.as_millis() as u64,
            "abandoning in-flight commands"
        );
    }
    Ok(())
}
