use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use {
    serde_json::Value,
    stagehand_channels::{CanonicalAction, ChannelOutbound, OutboundAction},
    tokio::{sync::Notify, time::Instant},
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use crate::queue::DedupQueue;

/// Sent when an action is rejected by the content policy.
pub const TEXT_ONLY_NOTICE: &str =
    "Only text messages are supported at this time. Please try with a text-only message.";

/// Data a participant carries from one stage to the next.
pub type Profile = serde_json::Map<String, Value>;

struct ProxyState {
    inbound: DedupQueue,
    /// Platform message id → what produced it.
    ledger: HashMap<i64, OutboundAction>,
    /// Start of the current inactivity window; `None` while actions flow.
    idle_since: Option<Instant>,
    last_activity: Instant,
    inactive: bool,
    profile: Profile,
    role: Option<String>,
}

/// How [`ParticipantProxy::wait_for_input`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    Ready,
    TimedOut,
    Disconnected,
}

/// One remote participant.
///
/// Stage loops pull actions with [`act`](Self::act) and reply with
/// [`observe`](Self::observe). The dispatcher pushes actions with
/// [`offer`](Self::offer).
pub struct ParticipantProxy {
    id: String,
    chat_id: String,
    outbound: Arc<dyn ChannelOutbound>,
    allow_images: AtomicBool,
    state: Mutex<ProxyState>,
    arrived: Notify,
    disconnected: CancellationToken,
}

impl ParticipantProxy {
    pub fn new(
        id: impl Into<String>,
        chat_id: impl Into<String>,
        outbound: Arc<dyn ChannelOutbound>,
        allow_images: bool,
    ) -> Self {
        Self {
            id: id.into(),
            chat_id: chat_id.into(),
            outbound,
            allow_images: AtomicBool::new(allow_images),
            state: Mutex::new(ProxyState {
                inbound: DedupQueue::new(),
                ledger: HashMap::new(),
                idle_since: None,
                last_activity: Instant::now(),
                inactive: false,
                profile: Profile::new(),
                role: None,
            }),
            arrived: Notify::new(),
            disconnected: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }

    fn state(&self) -> std::sync::MutexGuard<'_, ProxyState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ── Inbound ─────────────────────────────────────────────────────────────

    /// Queue an inbound action unless its message id was seen before.
    ///
    /// Returns `false` for duplicates and for disconnected participants.
    pub fn offer(&self, action: CanonicalAction) -> bool {
        if self.is_disconnected() {
            return false;
        }
        let message_id = action.message_id;
        let queued = self.state().inbound.offer(action);
        if queued {
            self.arrived.notify_one();
        } else {
            debug!(participant_id = %self.id, message_id, "dropping duplicate message");
        }
        queued
    }

    /// Pop the oldest action.
    ///
    /// Without a timeout an empty queue yields `None` at once. The first call
    /// that finds the queue empty opens an inactivity window; with a timeout
    /// the call waits until an action arrives or the window has lasted
    /// `timeout`, in which case the participant is marked inactive. Producing
    /// an action closes the window, whether or not the content policy lets it
    /// through.
    pub async fn act(&self, timeout: Option<Duration>) -> Option<CanonicalAction> {
        loop {
            let arrived = self.arrived.notified();
            let popped = {
                let mut state = self.state();
                match state.inbound.pop() {
                    Some(action) => {
                        state.idle_since = None;
                        state.inactive = false;
                        state.last_activity = Instant::now();
                        Ok(action)
                    },
                    None => Err(*state.idle_since.get_or_insert_with(Instant::now)),
                }
            };
            let window_start = match popped {
                Ok(action) => return self.admit(action).await,
                Err(window_start) => window_start,
            };
            let Some(timeout) = timeout else {
                return None;
            };
            if self.is_disconnected() {
                return None;
            }

            tokio::select! {
                _ = arrived => {},
                _ = self.disconnected.cancelled() => return None,
                _ = tokio::time::sleep_until(window_start + timeout) => {
                    self.mark_inactive();
                    return None;
                },
            }
        }
    }

    /// Wait until an action is queued, without taking it.
    ///
    /// Shares the inactivity window with [`act`](Self::act) but never marks
    /// the participant inactive; the caller decides what a timeout means.
    pub async fn wait_for_input(&self, timeout: Option<Duration>) -> Wait {
        loop {
            let arrived = self.arrived.notified();
            let window_start = {
                let mut state = self.state();
                if !state.inbound.is_empty() {
                    return Wait::Ready;
                }
                *state.idle_since.get_or_insert_with(Instant::now)
            };
            if self.is_disconnected() {
                return Wait::Disconnected;
            }
            let expired = async {
                match timeout {
                    Some(timeout) => tokio::time::sleep_until(window_start + timeout).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                _ = arrived => {},
                _ = self.disconnected.cancelled() => return Wait::Disconnected,
                () = expired => return Wait::TimedOut,
            }
        }
    }

    /// Pop the oldest action as is, skipping the content policy. Closes the
    /// inactivity window like [`act`](Self::act).
    pub fn take_next(&self) -> Option<CanonicalAction> {
        let mut state = self.state();
        let action = state.inbound.pop()?;
        state.idle_since = None;
        state.inactive = false;
        state.last_activity = Instant::now();
        Some(action)
    }

    /// Start a fresh inactivity window, e.g. on entering a new stage.
    pub fn reset_idle(&self) {
        let mut state = self.state();
        state.idle_since = None;
        state.inactive = false;
    }

    /// Content policy: images only when allowed, never empty text.
    async fn admit(&self, action: CanonicalAction) -> Option<CanonicalAction> {
        let rejected = if action.attachment.is_image() && !self.allow_images() {
            Some("image attachment")
        } else if action.trimmed_text().is_none() {
            Some("empty text")
        } else {
            None
        };
        match rejected {
            Some(reason) => {
                info!(
                    participant_id = %self.id,
                    message_id = action.message_id,
                    reason,
                    "rejecting inbound message"
                );
                self.observe(&OutboundAction::new(TEXT_ONLY_NOTICE)).await;
                None
            },
            None => Some(action),
        }
    }

    fn mark_inactive(&self) {
        let mut state = self.state();
        if !state.inactive {
            state.inactive = true;
            info!(participant_id = %self.id, "participant inactive");
        }
    }

    /// Whether the last timed `act` ran out without input.
    pub fn is_inactive(&self) -> bool {
        self.state().inactive
    }

    pub fn queue_len(&self) -> usize {
        self.state().inbound.len()
    }

    pub fn seen_count(&self) -> usize {
        self.state().inbound.seen_count()
    }

    /// When the last action was produced (or the proxy created).
    pub fn last_activity(&self) -> Instant {
        self.state().last_activity
    }

    // ── Outbound ────────────────────────────────────────────────────────────

    /// Send `action` to the participant and record the platform message id.
    ///
    /// Failures are logged and swallowed.
    pub async fn observe(&self, action: &OutboundAction) -> Option<i64> {
        match self.outbound.send_text(&self.chat_id, action).await {
            Ok(sent) => match sent.message_id {
                Some(message_id) => {
                    self.state().ledger.insert(message_id, action.clone());
                    Some(message_id)
                },
                None => {
                    warn!(participant_id = %self.id, raw = %sent.raw, "send reported no message id");
                    None
                },
            },
            Err(e) => {
                warn!(participant_id = %self.id, error = %e, "failed to deliver message");
                None
            },
        }
    }

    /// Fire a typing indicator. Failures are only logged.
    pub async fn send_typing(&self) {
        if let Err(e) = self.outbound.send_typing(&self.chat_id).await {
            debug!(participant_id = %self.id, error = %e, "typing indicator failed");
        }
    }

    /// What produced platform message `message_id`, if we sent it.
    pub fn observed(&self, message_id: i64) -> Option<OutboundAction> {
        self.state().ledger.get(&message_id).cloned()
    }

    pub fn ledger_len(&self) -> usize {
        self.state().ledger.len()
    }

    // ── Session data ────────────────────────────────────────────────────────

    pub fn allow_images(&self) -> bool {
        self.allow_images.load(Ordering::SeqCst)
    }

    pub fn set_allow_images(&self, allow: bool) {
        self.allow_images.store(allow, Ordering::SeqCst);
    }

    pub fn role(&self) -> Option<String> {
        self.state().role.clone()
    }

    pub fn set_role(&self, role: impl Into<String>) {
        self.state().role = Some(role.into());
    }

    pub fn profile(&self) -> Profile {
        self.state().profile.clone()
    }

    pub fn profile_value(&self, key: &str) -> Option<Value> {
        self.state().profile.get(key).cloned()
    }

    pub fn set_profile_value(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.state().profile.insert(key.into(), value.into());
    }

    /// Overwrite profile keys with the ones in `data`.
    pub fn merge_profile(&self, data: Profile) {
        self.state().profile.extend(data);
    }

    // ── Lifecycle ───────────────────────────────────────────────────────────

    /// Mark the participant gone. Wakes a pending [`act`](Self::act).
    pub fn disconnect(&self) {
        if !self.disconnected.is_cancelled() {
            info!(participant_id = %self.id, "participant disconnected");
            self.disconnected.cancel();
        }
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.is_cancelled()
    }

    /// Resolves once the participant disconnects.
    pub async fn disconnected(&self) {
        self.disconnected.cancelled().await;
    }
}

impl std::fmt::Debug for ParticipantProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParticipantProxy")
            .field("id", &self.id)
            .field("chat_id", &self.chat_id)
            .field("disconnected", &self.is_disconnected())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use {
        super::*,
        serde_json::json,
        stagehand_channels::{AttachmentKind, RecordingOutbound},
    };

    fn proxy_with(outbound: &Arc<RecordingOutbound>) -> Arc<ParticipantProxy> {
        let channel: Arc<dyn ChannelOutbound> = outbound.clone();
        Arc::new(ParticipantProxy::new("42", "42", channel, false))
    }

    fn text(id: i64, text: &str) -> CanonicalAction {
        CanonicalAction::text(id, "42", text)
    }

    #[tokio::test]
    async fn empty_queue_without_timeout_returns_none() {
        let proxy = proxy_with(&Arc::new(RecordingOutbound::new()));
        assert_eq!(proxy.act(None).await, None);
        assert!(!proxy.is_inactive());
    }

    #[tokio::test]
    async fn fifo_across_duplicates() {
        let proxy = proxy_with(&Arc::new(RecordingOutbound::new()));
        for (id, body) in [(1, "a"), (2, "b"), (1, "a"), (3, "c"), (2, "b")] {
            proxy.offer(text(id, body));
        }
        assert_eq!(proxy.queue_len(), 3);

        let mut seen = Vec::new();
        while let Some(action) = proxy.act(None).await {
            seen.push(action.text.unwrap());
        }
        assert_eq!(seen, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn redelivery_after_consumption_is_ignored() {
        let proxy = proxy_with(&Arc::new(RecordingOutbound::new()));
        proxy.offer(text(2, "Alice"));
        assert!(proxy.act(None).await.is_some());

        assert!(!proxy.offer(text(2, "Alice")));
        assert_eq!(proxy.queue_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn inactivity_window_starts_at_first_empty_act() {
        let proxy = proxy_with(&Arc::new(RecordingOutbound::new()));
        let timeout = Some(Duration::from_secs(10));

        // Opens the window.
        assert_eq!(proxy.act(None).await, None);
        tokio::time::advance(Duration::from_secs(6)).await;

        let started = Instant::now();
        assert_eq!(proxy.act(timeout).await, None);
        assert_eq!(started.elapsed(), Duration::from_secs(4));
        assert!(proxy.is_inactive());

        // Still expired until something arrives.
        assert_eq!(proxy.act(timeout).await, None);
        assert_eq!(started.elapsed(), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn produced_action_resets_window() {
        let proxy = proxy_with(&Arc::new(RecordingOutbound::new()));
        let timeout = Some(Duration::from_secs(10));

        assert_eq!(proxy.act(None).await, None);
        tokio::time::advance(Duration::from_secs(9)).await;
        proxy.offer(text(1, "hi"));
        assert!(proxy.act(timeout).await.is_some());
        assert!(!proxy.is_inactive());

        let started = Instant::now();
        assert_eq!(proxy.act(timeout).await, None);
        assert_eq!(started.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn reset_idle_opens_a_new_window() {
        let proxy = proxy_with(&Arc::new(RecordingOutbound::new()));
        let timeout = Some(Duration::from_secs(10));

        assert_eq!(proxy.act(None).await, None);
        tokio::time::advance(Duration::from_secs(60)).await;
        proxy.reset_idle();

        let started = Instant::now();
        assert_eq!(proxy.act(timeout).await, None);
        assert_eq!(started.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_input_leaves_the_action_queued() {
        let proxy = proxy_with(&Arc::new(RecordingOutbound::new()));
        let waiter = {
            let proxy = Arc::clone(&proxy);
            tokio::spawn(async move { proxy.wait_for_input(Some(Duration::from_secs(60))).await })
        };
        tokio::time::advance(Duration::from_secs(1)).await;
        proxy.offer(text(1, "/exit"));

        assert_eq!(waiter.await.unwrap(), Wait::Ready);
        assert_eq!(proxy.queue_len(), 1);
        assert_eq!(proxy.take_next().unwrap().text.as_deref(), Some("/exit"));
        assert_eq!(proxy.take_next(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_input_times_out_without_marking_inactive() {
        let proxy = proxy_with(&Arc::new(RecordingOutbound::new()));
        let started = Instant::now();
        assert_eq!(
            proxy.wait_for_input(Some(Duration::from_secs(5))).await,
            Wait::TimedOut
        );
        assert_eq!(started.elapsed(), Duration::from_secs(5));
        assert!(!proxy.is_inactive());

        proxy.disconnect();
        assert_eq!(proxy.wait_for_input(None).await, Wait::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn waiting_act_wakes_on_arrival() {
        let proxy = proxy_with(&Arc::new(RecordingOutbound::new()));
        let waiter = {
            let proxy = Arc::clone(&proxy);
            tokio::spawn(async move { proxy.act(Some(Duration::from_secs(60))).await })
        };
        tokio::time::sleep(Duration::from_secs(5)).await;
        proxy.offer(text(7, "late"));

        let action = waiter.await.unwrap().unwrap();
        assert_eq!(action.message_id, 7);
        assert!(!proxy.is_inactive());
    }

    #[tokio::test]
    async fn disconnect_wakes_waiting_act() {
        let proxy = proxy_with(&Arc::new(RecordingOutbound::new()));
        let waiter = {
            let proxy = Arc::clone(&proxy);
            tokio::spawn(async move { proxy.act(Some(Duration::from_secs(3600))).await })
        };
        tokio::task::yield_now().await;
        proxy.disconnect();

        assert_eq!(waiter.await.unwrap(), None);
        assert!(!proxy.offer(text(1, "too late")));
    }

    #[tokio::test]
    async fn image_rejected_with_single_notice() {
        let outbound = Arc::new(RecordingOutbound::new());
        let proxy = proxy_with(&outbound);
        let mut image = text(1, "");
        image.text = None;
        image.attachment = AttachmentKind::Image;
        proxy.offer(image);
        proxy.offer(text(2, "after"));

        assert_eq!(proxy.act(None).await, None);
        assert_eq!(outbound.texts_to("42"), vec![TEXT_ONLY_NOTICE]);
        assert_eq!(proxy.act(None).await.unwrap().message_id, 2);
        assert_eq!(outbound.texts_to("42").len(), 1);
    }

    #[tokio::test]
    async fn image_allowed_when_session_permits() {
        let outbound = Arc::new(RecordingOutbound::new());
        let proxy = proxy_with(&outbound);
        proxy.set_allow_images(true);
        let mut image = text(1, "look");
        image.attachment = AttachmentKind::Image;
        proxy.offer(image);

        assert!(proxy.act(None).await.is_some());
        assert!(outbound.sends().is_empty());
    }

    #[tokio::test]
    async fn empty_text_rejected_and_resets_window() {
        let outbound = Arc::new(RecordingOutbound::new());
        let proxy = proxy_with(&outbound);
        proxy.offer(text(1, "   "));

        assert_eq!(proxy.act(Some(Duration::from_secs(1))).await, None);
        assert!(!proxy.is_inactive());
        assert_eq!(outbound.texts_to("42"), vec![TEXT_ONLY_NOTICE]);
    }

    #[tokio::test]
    async fn observe_records_ledger_and_swallows_failures() {
        let outbound = Arc::new(RecordingOutbound::new());
        let proxy = proxy_with(&outbound);

        let sent = OutboundAction::new("hello").with_quick_replies(["/begin"]);
        let id = proxy.observe(&sent).await.unwrap();
        assert_eq!(proxy.observed(id), Some(sent));

        outbound.set_failing(true);
        assert_eq!(proxy.observe(&OutboundAction::new("lost")).await, None);
        assert_eq!(proxy.ledger_len(), 1);
    }

    #[test]
    fn profile_merge_overwrites_keys() {
        let proxy = proxy_with(&Arc::new(RecordingOutbound::new()));
        proxy.set_profile_value("name", "Alice");
        proxy.set_profile_value("color", "red");

        let mut handoff = Profile::new();
        handoff.insert("color".into(), json!("blue"));
        proxy.merge_profile(handoff);

        assert_eq!(proxy.profile_value("name"), Some(json!("Alice")));
        assert_eq!(proxy.profile_value("color"), Some(json!("blue")));
        proxy.set_role("Partner 1");
        assert_eq!(proxy.role().as_deref(), Some("Partner 1"));
    }
}
