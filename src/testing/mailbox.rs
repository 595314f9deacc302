use std::{
    collections::HashMap,
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use tokio::sync::watch;

use crate::{
    Event, EventBinding, Handler, HandlerId,
    testing::MailData,
};

/// A handler that records every event it receives, per event name, for
/// later assertions.
///
/// Clones share the same log, so keep one clone in the test and hand another
/// to the dispatcher.
///
/// # Example
///
/// ```rust
/// use pulse::{Dispatcher, Measurement, Metadata, testing::Mailbox};
/// use serde_json::json;
/// use std::time::Duration;
///
/// let dispatcher = Dispatcher::default();
/// let mailbox = Mailbox::new("test").listen_to(["order.created"]);
/// dispatcher.add_handler(mailbox.clone())?;
///
/// let mut metadata = Metadata::new();
/// metadata.insert("status".into(), json!("ok"));
/// dispatcher.trigger_event("order.created", Measurement::new(), metadata)?;
///
/// assert!(mailbox.assert_receive("order.created", Duration::from_millis(100), |_, mail| {
///     mail.iter().any(|m| m.metadata["status"] == "ok")
/// }));
/// # Ok::<(), pulse::Error>(())
/// ```
#[derive(Clone)]
pub struct Mailbox {
    id: HandlerId,
    bindings: Vec<EventBinding>,
    log: Arc<MailLog>,
}

impl Mailbox {
    pub fn new(id: impl Into<HandlerId>) -> Self {
        Self {
            id: id.into(),
            bindings: Vec::new(),
            log: Arc::new(MailLog::new()),
        }
    }

    /// Record deliveries of each of `events`.
    pub fn listen_to<I, N>(mut self, events: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<Arc<str>>,
    {
        for event in events {
            let log = self.log.clone();
            self.bindings
                .push(EventBinding::new(event, move |e, _| log.append(e)));
        }
        self
    }

    /// Waits up to `timeout` for `predicate` to accept the deliveries of
    /// `event`.
    ///
    /// The predicate is re-run on a fresh snapshot after every delivery to
    /// this mailbox, never while the log is locked. It isn't called until
    /// `event` has been delivered at least once.
    pub fn assert_receive<P>(&self, event: &str, timeout: Duration, predicate: P) -> bool
    where
        P: Fn(&str, &[MailData]) -> bool,
    {
        let deadline = Instant::now().checked_add(timeout);
        loop {
            let (mail, seen) = self.log.snapshot(event);
            if mail.is_some_and(|mail| predicate(event, &mail)) {
                return true;
            }
            if !self.log.wait_for_append(seen, deadline) {
                return false;
            }
        }
    }

    /// Checks the current deliveries of `event` once, without waiting.
    pub fn assert_received<P>(&self, event: &str, predicate: P) -> bool
    where
        P: Fn(&str, &[MailData]) -> bool,
    {
        let (mail, _) = self.log.snapshot(event);
        mail.is_some_and(|mail| predicate(event, &mail))
    }

    /// True if `predicate` never accepts the deliveries of `event` within
    /// `timeout`.
    pub fn refute_receive<P>(&self, event: &str, timeout: Duration, predicate: P) -> bool
    where
        P: Fn(&str, &[MailData]) -> bool,
    {
        !self.assert_receive(event, timeout, predicate)
    }

    pub fn refute_received<P>(&self, event: &str, predicate: P) -> bool
    where
        P: Fn(&str, &[MailData]) -> bool,
    {
        !self.assert_received(event, predicate)
    }

    /// Async flavour of [`assert_receive`](Mailbox::assert_receive) for use
    /// inside a Tokio runtime.
    pub async fn assert_receive_async<P>(&self, event: &str, timeout: Duration, predicate: P) -> bool
    where
        P: Fn(&str, &[MailData]) -> bool,
    {
        let mut changes = self.log.version.subscribe();
        let wait = async {
            loop {
                if self.assert_received(event, &predicate) {
                    return true;
                }
                if changes.changed().await.is_err() {
                    return false;
                }
            }
        };
        tokio::time::timeout(timeout, wait).await.unwrap_or(false)
    }

    pub async fn refute_receive_async<P>(&self, event: &str, timeout: Duration, predicate: P) -> bool
    where
        P: Fn(&str, &[MailData]) -> bool,
    {
        !self.assert_receive_async(event, timeout, predicate).await
    }

    /// All deliveries of `event` so far, oldest first.
    pub fn received(&self, event: &str) -> Vec<MailData> {
        self.log.snapshot(event).0.unwrap_or_default()
    }

    pub fn count(&self, event: &str) -> usize {
        self.log.lock().entries.get(event).map_or(0, Vec::len)
    }

    /// Forget everything recorded so far.
    pub fn clear(&self) {
        self.log.lock().entries.clear();
    }
}

impl Handler for Mailbox {
    fn id(&self) -> HandlerId {
        self.id.clone()
    }

    fn bindings(&self) -> &[EventBinding] {
        &self.bindings
    }
}

#[derive(Default)]
struct Inbox {
    /// Bumped on every append; lets waiters tell a real append from a
    /// spurious wake-up.
    seq: u64,
    entries: HashMap<String, Vec<MailData>>,
}

struct MailLog {
    inbox: Mutex<Inbox>,
    appended: Condvar,
    version: watch::Sender<u64>,
}

impl MailLog {
    fn new() -> Self {
        let (version, _) = watch::channel(0);
        Self {
            inbox: Mutex::new(Inbox::default()),
            appended: Condvar::new(),
            version,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inbox> {
        self.inbox.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn append(&self, event: &Event) {
        {
            let mut inbox = self.lock();
            inbox
                .entries
                .entry(event.name().to_string())
                .or_default()
                .push(MailData::from(event));
            inbox.seq += 1;
        }
        self.appended.notify_all();
        self.version.send_modify(|v| *v += 1);
    }

    fn snapshot(&self, event: &str) -> (Option<Vec<MailData>>, u64) {
        let inbox = self.lock();
        (inbox.entries.get(event).cloned(), inbox.seq)
    }

    /// Blocks until something is appended after `seen`, or `deadline` passes.
    /// A `None` deadline waits indefinitely.
    fn wait_for_append(&self, seen: u64, deadline: Option<Instant>) -> bool {
        let mut inbox = self.lock();
        while inbox.seq == seen {
            inbox = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    self.appended
                        .wait_timeout(inbox, deadline - now)
                        .map(|(guard, _)| guard)
                        .unwrap_or_else(|e| e.into_inner().0)
                }
                None => self
                    .appended
                    .wait(inbox)
                    .unwrap_or_else(PoisonError::into_inner),
            };
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{HandlerConfig, Measurement, Metadata};
    use serde_json::json;

    fn deliver(mailbox: &Mailbox, name: &str, status: &str) {
        let mut metadata = Metadata::new();
        metadata.insert("status".into(), json!(status));
        let event = Event::new(name, Measurement::new(), metadata);
        for binding in mailbox.bindings().iter().filter(|b| b.event() == name) {
            (binding.callback())(&event, &HandlerConfig::none());
        }
    }

    fn has_status(status: &'static str) -> impl Fn(&str, &[MailData]) -> bool {
        move |_, mail| mail.iter().any(|m| m.metadata["status"] == status)
    }

    #[test]
    fn records_deliveries_in_order_per_event() {
        let mailbox = Mailbox::new("m").listen_to(["a", "b"]);
        deliver(&mailbox, "a", "first");
        deliver(&mailbox, "b", "other");
        deliver(&mailbox, "a", "second");

        let statuses: Vec<_> = mailbox
            .received("a")
            .iter()
            .map(|m| m.metadata_value("status").cloned())
            .collect();
        assert_eq!(statuses, vec![Some(json!("first")), Some(json!("second"))]);
        assert_eq!(mailbox.count("b"), 1);
        assert_eq!(mailbox.count("c"), 0);
    }

    #[test]
    fn predicate_is_not_called_for_undelivered_event() {
        let mailbox = Mailbox::new("m").listen_to(["a"]);
        assert!(!mailbox.assert_received("a", |_, _| true));
        assert!(mailbox.refute_received("a", |_, _| true));
        assert!(!mailbox.assert_receive("a", Duration::ZERO, |_, _| true));
    }

    #[test]
    fn clones_share_the_log() {
        let mailbox = Mailbox::new("m").listen_to(["a"]);
        let other = mailbox.clone();
        deliver(&other, "a", "ok");
        assert!(mailbox.assert_received("a", has_status("ok")));

        mailbox.clear();
        assert_eq!(other.count("a"), 0);
    }

    #[test]
    fn assert_receive_wakes_on_append() {
        let mailbox = Mailbox::new("m").listen_to(["a"]);
        let producer = mailbox.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            deliver(&producer, "a", "pending");
            std::thread::sleep(Duration::from_millis(50));
            deliver(&producer, "a", "ok");
        });

        let started = Instant::now();
        assert!(mailbox.assert_receive("a", Duration::from_secs(5), has_status("ok")));
        assert!(started.elapsed() < Duration::from_secs(5));
        handle.join().unwrap();
    }

    #[test]
    fn assert_receive_times_out() {
        let mailbox = Mailbox::new("m").listen_to(["a"]);
        deliver(&mailbox, "a", "failed");

        let started = Instant::now();
        assert!(!mailbox.assert_receive("a", Duration::from_millis(50), has_status("ok")));
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert!(mailbox.refute_receive("a", Duration::from_millis(10), has_status("ok")));
    }

    #[tokio::test]
    async fn async_assert_receive_wakes_on_append() {
        let mailbox = Mailbox::new("m").listen_to(["a"]);
        let producer = mailbox.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            deliver(&producer, "a", "ok");
        });

        assert!(
            mailbox
                .assert_receive_async("a", Duration::from_secs(5), has_status("ok"))
                .await
        );
        assert!(
            mailbox
                .refute_receive_async("a", Duration::from_millis(20), has_status("failed"))
                .await
        );
    }
}
