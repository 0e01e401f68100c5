use std::sync::{
    atomic::{AtomicU64, Ordering},
    Mutex,
};
use std::time::Duration;

use tokio::sync::oneshot;

use crate::transport::ComponentEvent;

type ComponentFilter = Box<dyn Fn(&ComponentEvent) -> bool + Send + Sync>;

struct Waiter {
    id: u64,
    filter: ComponentFilter,
    sender: oneshot::Sender<ComponentEvent>,
}

#[derive(Default)]
/// Routes component interactions to flows waiting for a user's choice.
///
/// Events nobody waits for are handed back to the caller.
pub struct ComponentCollector {
    waiters: Mutex<Vec<Waiter>>,
    next_id: AtomicU64,
}

impl ComponentCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for the first event accepted by `filter`, or `None` once `timeout` passes.
    pub async fn await_selection<F>(&self, filter: F, timeout: Duration) -> Option<ComponentEvent>
    where
        F: Fn(&ComponentEvent) -> bool + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = oneshot::channel();
        self.lock_waiters().push(Waiter {
            id,
            filter: Box::new(filter),
            sender,
        });

        let outcome = tokio::time::timeout(timeout, receiver).await;
        self.lock_waiters().retain(|waiter| waiter.id != id);
        match outcome {
            Ok(Ok(event)) => Some(event),
            Ok(Err(_)) | Err(_) => None,
        }
    }

    /// Delivers `event` to the oldest matching waiter; returns it when nobody took it.
    pub fn offer(&self, event: ComponentEvent) -> Result<(), ComponentEvent> {
        let mut waiters = self.lock_waiters();
        let Some(position) = waiters.iter().position(|waiter| (waiter.filter)(&event)) else {
            return Err(event);
        };
        let waiter = waiters.remove(position);
        waiter.sender.send(event)
    }

    pub fn waiting(&self) -> usize {
        self.lock_waiters().len()
    }

    fn lock_waiters(&self) -> std::sync::MutexGuard<'_, Vec<Waiter>> {
        self.waiters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
