use std::sync::Arc;

use {
    serde_json::Value,
    stagehand_channels::CanonicalAction,
    tokio::sync::mpsc,
    tokio_util::sync::CancellationToken,
    tracing::{debug, info},
};

use crate::registry::{Ingest, ParticipantRegistry};

/// Turns a raw relay payload into an action. `None` drops the payload.
pub trait InboundDecoder: Send + Sync {
    fn decode(&self, payload: Value) -> Option<CanonicalAction>;
}

impl<F> InboundDecoder for F
where
    F: Fn(Value) -> Option<CanonicalAction> + Send + Sync,
{
    fn decode(&self, payload: Value) -> Option<CanonicalAction> {
        self(payload)
    }
}

/// Drains relay payloads into the participant registry.
pub struct InboundDispatcher {
    registry: Arc<ParticipantRegistry>,
    decoder: Arc<dyn InboundDecoder>,
    typing_indicator: bool,
}

impl InboundDispatcher {
    pub fn new(registry: Arc<ParticipantRegistry>, decoder: Arc<dyn InboundDecoder>) -> Self {
        Self {
            registry,
            decoder,
            typing_indicator: false,
        }
    }

    /// Send a typing indicator for every newly queued action.
    #[must_use]
    pub fn with_typing_indicator(mut self, enabled: bool) -> Self {
        self.typing_indicator = enabled;
        self
    }

    /// Decode one payload and hand it to the registry.
    pub fn dispatch(&self, payload: Value) -> Option<Ingest> {
        let action = self.decoder.decode(payload)?;
        let participant_id = action.participant_id.clone();
        let message_id = action.message_id;
        let ingest = self.registry.ingest(action);
        debug!(participant_id = %participant_id, message_id, ?ingest, "inbound message");

        if ingest.is_queued()
            && self.typing_indicator
            && let Some(proxy) = self.registry.get(&participant_id)
        {
            tokio::spawn(async move { proxy.send_typing().await });
        }
        Some(ingest)
    }

    /// Run until `inbound` closes or `cancel` fires.
    pub async fn run(self, mut inbound: mpsc::UnboundedReceiver<Value>, cancel: CancellationToken) {
        info!("inbound dispatcher started");
        loop {
            let payload = tokio::select! {
                _ = cancel.cancelled() => break,
                payload = inbound.recv() => match payload {
                    Some(payload) => payload,
                    None => break,
                },
            };
            self.dispatch(payload);
        }
        info!("inbound dispatcher stopped");
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use {
        super::*,
        crate::registry::RegistryOptions,
        serde_json::json,
        stagehand_channels::{ChannelOutbound, RecordingOutbound},
        std::time::Duration,
    };

    /// `{"from": "42", "id": 1, "text": "hi"}` → action.
    fn decode(payload: Value) -> Option<CanonicalAction> {
        Some(CanonicalAction::text(
            payload["id"].as_i64()?,
            payload["from"].as_str()?,
            payload["text"].as_str()?,
        ))
    }

    fn dispatcher(outbound: &Arc<RecordingOutbound>) -> (InboundDispatcher, Arc<ParticipantRegistry>) {
        let channel: Arc<dyn ChannelOutbound> = outbound.clone();
        let (registry, _arrivals) = ParticipantRegistry::new(channel, RegistryOptions::default());
        let registry = Arc::new(registry);
        let dispatcher = InboundDispatcher::new(Arc::clone(&registry), Arc::new(decode));
        (dispatcher, registry)
    }

    #[tokio::test]
    async fn undecodable_payloads_are_dropped() {
        let outbound = Arc::new(RecordingOutbound::new());
        let (dispatcher, registry) = dispatcher(&outbound);

        assert_eq!(dispatcher.dispatch(json!({"edited": true})), None);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn typing_indicator_only_for_queued_actions() {
        let outbound = Arc::new(RecordingOutbound::new());
        let (dispatcher, _registry) = dispatcher(&outbound);
        let dispatcher = dispatcher.with_typing_indicator(true);

        let msg = json!({"from": "42", "id": 1, "text": "hi"});
        assert!(dispatcher.dispatch(msg.clone()).unwrap().is_queued());
        assert_eq!(dispatcher.dispatch(msg), Some(Ingest::Duplicate));

        tokio::time::timeout(Duration::from_secs(1), async {
            while outbound.typing_count("42") == 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        tokio::task::yield_now().await;
        assert_eq!(outbound.typing_count("42"), 1);
    }

    #[tokio::test]
    async fn run_drains_until_sender_closes() {
        let outbound = Arc::new(RecordingOutbound::new());
        let (dispatcher, registry) = dispatcher(&outbound);
        let (tx, rx) = mpsc::unbounded_channel();

        for id in [1, 2, 2, 3] {
            tx.send(json!({"from": "42", "id": id, "text": format!("m{id}")}))
                .unwrap();
        }
        drop(tx);
        dispatcher.run(rx, CancellationToken::new()).await;

        assert_eq!(registry.get("42").unwrap().queue_len(), 3);
    }
}
