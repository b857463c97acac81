use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard,
    },
};

use tokio::sync::mpsc;

use crate::domain::{MessageRef, ReactionEvent};

const SUBSCRIPTION_BUFFER: usize = 32;

type Routes = HashMap<MessageRef, (u64, mpsc::Sender<ReactionEvent>)>;

/// Routes reaction events to whichever session watches the message.
#[derive(Debug, Default)]
pub struct ReactionHub {
    routes: Mutex<Routes>,
    next_id: AtomicU64,
}

/// Receiving end for one watched message. Unregisters on drop.
#[derive(Debug)]
pub struct ReactionSubscription {
    hub: Arc<ReactionHub>,
    message: MessageRef,
    id: u64,
    rx: mpsc::Receiver<ReactionEvent>,
}

impl ReactionHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Routes> {
        self.routes.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Watch `message`. A newer subscription for the same message replaces the old one.
    pub fn subscribe(self: &Arc<Self>, message: MessageRef) -> ReactionSubscription {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().insert(message, (id, tx));
        ReactionSubscription {
            hub: self.clone(),
            message,
            id,
            rx,
        }
    }

    /// Deliver an event; returns false if nobody watches the message.
    pub fn dispatch(&self, event: ReactionEvent) -> bool {
        let message = event.message();
        let Some((_, tx)) = self.lock().get(&message).cloned() else {
            return false;
        };
        match tx.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::debug!(?message, "reaction buffer full; dropping event");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    pub fn watched(&self) -> usize {
        self.lock().len()
    }
}

impl ReactionSubscription {
    pub async fn recv(&mut self) -> Option<ReactionEvent> {
        self.rx.recv().await
    }
}

impl Drop for ReactionSubscription {
    fn drop(&mut self) {
        let mut routes = self.hub.lock();
        // Only remove our own route, not a newer subscription's.
        if routes.get(&self.message).is_some_and(|(id, _)| *id == self.id) {
            routes.remove(&self.message);
        }
    }
}
