//! Telegram update handlers.
//!
//! Handlers only translate updates. Command work runs on the router's task
//! tracker because teloxide delivers updates of one chat sequentially, and a
//! pager waiting for button presses would otherwise block its own callbacks.

use std::sync::Arc;

use teloxide::{
    prelude::*,
    types::{CallbackQuery, Message},
};

use crate::router::AppState;

mod callback;
mod message;

pub use callback::reaction_event;
pub use message::inbound_event;

pub async fn handle_message(msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(event) = inbound_event(&msg) else {
        return Ok(());
    };
    let dispatcher = state.dispatcher.clone();
    state.tasks.spawn(async move {
        dispatcher.handle(event).await;
    });
    Ok(())
}

pub async fn handle_callback(
    bot: Bot,
    q: CallbackQuery,
    state: Arc<AppState>,
) -> ResponseResult<()> {
    let routed = match reaction_event(&q) {
        Some(event) => state.dispatcher.services().reactions.dispatch(event),
        None => false,
    };

    let answer = bot.answer_callback_query(q.id.clone());
    let answer = if routed {
        answer
    } else {
        answer.text("This menu is no longer active.")
    };
    if let Err(e) = answer.await {
        tracing::debug!(error = %e, "failed to answer callback query");
    }
    Ok(())
}
