use crate::application::scheduler::{TaskHandle, TaskScheduler};
use crate::domain::models::{NotificationRequest, Severity};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, oneshot, Notify};

pub type NotificationId = u64;

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DismissReason {
    Expired,
    User,
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationEvent {
    Shown {
        id: NotificationId,
        request: NotificationRequest,
    },
    Dismissed {
        id: NotificationId,
        reason: DismissReason,
    },
}

#[derive(Debug)]
struct Visible {
    id: NotificationId,
    dismiss: Option<oneshot::Sender<DismissReason>>,
}

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<(NotificationId, NotificationRequest)>,
    visible: Option<Visible>,
    next_id: NotificationId,
    closed: bool,
}

/// Single-flight FIFO of user-facing messages.
///
/// At most one notification is visible. It stays up for its display duration
/// or until dismissed, and only then is the next one shown. Display is driven
/// by [`NotificationQueue::start`]; without a running driver requests simply
/// accumulate.
#[derive(Debug)]
pub struct NotificationQueue {
    state: Mutex<QueueState>,
    wake: Notify,
    events: broadcast::Sender<NotificationEvent>,
    default_duration: Duration,
}

impl NotificationQueue {
    pub fn new(default_duration: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            state: Mutex::new(QueueState::default()),
            wake: Notify::new(),
            events,
            default_duration,
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn default_duration(&self) -> Duration {
        self.default_duration
    }

    pub fn notify(&self, message: impl Into<String>, severity: Severity) -> NotificationId {
        self.enqueue(NotificationRequest::new(message, severity, self.default_duration))
    }

    pub fn enqueue(&self, request: NotificationRequest) -> NotificationId {
        let id = {
            let mut state = self.lock();
            state.next_id += 1;
            let id = state.next_id;
            if state.closed {
                tracing::debug!(id, "notification dropped after shutdown");
                return id;
            }
            state.pending.push_back((id, request));
            id
        };
        self.wake.notify_one();
        id
    }

    /// Dismisses the visible notification early. Returns `false` when `id` is
    /// not the one currently shown.
    pub fn dismiss(&self, id: NotificationId) -> bool {
        let mut state = self.lock();
        match state.visible.as_mut() {
            Some(visible) if visible.id == id => visible
                .dismiss
                .take()
                .is_some_and(|sender| sender.send(DismissReason::User).is_ok()),
            _ => false,
        }
    }

    pub fn visible(&self) -> Option<NotificationId> {
        self.lock().visible.as_ref().map(|visible| visible.id)
    }

    /// Requests waiting behind the visible one, in display order.
    pub fn pending(&self) -> Vec<NotificationRequest> {
        self.lock()
            .pending
            .iter()
            .map(|(_, request)| request.clone())
            .collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NotificationEvent> {
        self.events.subscribe()
    }

    pub fn start(self: &Arc<Self>, scheduler: &TaskScheduler) -> TaskHandle {
        let queue = Arc::clone(self);
        scheduler.spawn_once(async move { queue.run().await })
    }

    /// Drops everything pending and takes down the visible notification.
    pub fn shutdown(&self) {
        {
            let mut state = self.lock();
            state.closed = true;
            state.pending.clear();
            if let Some(sender) = state.visible.as_mut().and_then(|visible| visible.dismiss.take()) {
                let _ = sender.send(DismissReason::Shutdown);
            }
        }
        self.wake.notify_one();
    }

    async fn run(&self) {
        loop {
            let next = {
                let mut state = self.lock();
                if state.closed && state.visible.is_none() {
                    return;
                }
                state.pending.pop_front().map(|(id, request)| {
                    let (sender, receiver) = oneshot::channel();
                    state.visible = Some(Visible {
                        id,
                        dismiss: Some(sender),
                    });
                    (id, request, receiver)
                })
            };

            let Some((id, request, dismissed)) = next else {
                self.wake.notified().await;
                continue;
            };

            let duration = request.display_duration;
            let _ = self.events.send(NotificationEvent::Shown { id, request });
            let reason = tokio::select! {
                _ = tokio::time::sleep(duration) => DismissReason::Expired,
                reason = dismissed => reason.unwrap_or(DismissReason::Shutdown),
            };

            self.lock().visible = None;
            let _ = self.events.send(NotificationEvent::Dismissed { id, reason });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    async fn next_event(
        receiver: &mut broadcast::Receiver<NotificationEvent>,
    ) -> (Instant, NotificationEvent) {
        let event = receiver.recv().await.expect("notification event");
        (Instant::now(), event)
    }

    #[tokio::test(start_paused = true)]
    async fn queued_notifications_display_one_at_a_time_in_order() {
        let scheduler = TaskScheduler::new();
        let queue = Arc::new(NotificationQueue::new(Duration::from_secs(3)));
        let mut events = queue.subscribe();
        queue.start(&scheduler);

        let first = queue.notify("first", Severity::Info);
        let (_, shown) = next_event(&mut events).await;
        assert!(matches!(shown, NotificationEvent::Shown { id, .. } if id == first));
        assert_eq!(queue.visible(), Some(first));

        let queued: Vec<NotificationId> = ["second", "third", "fourth"]
            .into_iter()
            .map(|message| queue.notify(message, Severity::Success))
            .collect();
        assert_eq!(queue.visible(), Some(first));
        assert_eq!(queue.pending().len(), 3);

        let mut order = vec![first];
        order.extend(queued);

        let mut last_dismissed_at: Option<Instant> = None;
        for (index, expected) in order.iter().enumerate() {
            if index > 0 {
                let (shown_at, shown) = next_event(&mut events).await;
                assert!(matches!(shown, NotificationEvent::Shown { id, .. } if id == *expected));
                let dismissed_at = last_dismissed_at.expect("previous dismissal");
                assert!(shown_at >= dismissed_at);
            }
            let (dismissed_at, dismissed) = next_event(&mut events).await;
            assert_eq!(
                dismissed,
                NotificationEvent::Dismissed {
                    id: *expected,
                    reason: DismissReason::Expired,
                }
            );
            last_dismissed_at = Some(dismissed_at);
        }
        assert!(queue.pending().is_empty());
        assert_eq!(queue.visible(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn user_dismissal_advances_the_queue_early() {
        let scheduler = TaskScheduler::new();
        let queue = Arc::new(NotificationQueue::new(Duration::from_secs(5)));
        let mut events = queue.subscribe();
        queue.start(&scheduler);

        let first = queue.notify("first", Severity::Warning);
        let second = queue.notify("second", Severity::Info);
        let (started, _) = next_event(&mut events).await;

        assert!(!queue.dismiss(second));
        assert!(queue.dismiss(first));

        let (_, dismissed) = next_event(&mut events).await;
        assert_eq!(
            dismissed,
            NotificationEvent::Dismissed {
                id: first,
                reason: DismissReason::User,
            }
        );
        let (shown_at, shown) = next_event(&mut events).await;
        assert!(matches!(shown, NotificationEvent::Shown { id, .. } if id == second));
        assert!(shown_at - started < Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn per_request_duration_overrides_default() {
        let scheduler = TaskScheduler::new();
        let queue = Arc::new(NotificationQueue::new(Duration::from_secs(3)));
        let mut events = queue.subscribe();
        queue.start(&scheduler);

        queue.enqueue(NotificationRequest::new(
            "long",
            Severity::Info,
            Duration::from_secs(10),
        ));
        let (shown_at, _) = next_event(&mut events).await;
        let (dismissed_at, _) = next_event(&mut events).await;
        assert_eq!(dismissed_at - shown_at, Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_drops_pending_and_stops_driver() {
        let scheduler = TaskScheduler::new();
        let queue = Arc::new(NotificationQueue::new(Duration::from_secs(3)));
        let mut events = queue.subscribe();
        let driver = queue.start(&scheduler);

        let first = queue.notify("first", Severity::Info);
        queue.notify("second", Severity::Info);
        let _ = next_event(&mut events).await;

        queue.shutdown();
        let (_, dismissed) = next_event(&mut events).await;
        assert_eq!(
            dismissed,
            NotificationEvent::Dismissed {
                id: first,
                reason: DismissReason::Shutdown,
            }
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(driver.is_finished());
        assert!(queue.pending().is_empty());

        queue.notify("late", Severity::Info);
        assert!(queue.pending().is_empty());
    }
}
