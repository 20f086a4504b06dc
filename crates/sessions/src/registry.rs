use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use {
    stagehand_channels::{CanonicalAction, ChannelOutbound},
    tokio::sync::mpsc,
    tracing::{debug, info},
};

use crate::proxy::ParticipantProxy;

#[derive(Debug, Clone, Copy, Default)]
pub struct RegistryOptions {
    /// Whether new participants may send images.
    pub allow_images: bool,
}

/// What [`ParticipantRegistry::ingest`] did with an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ingest {
    Queued {
        /// The action created the participant.
        new_participant: bool,
    },
    Duplicate,
}

impl Ingest {
    pub fn is_queued(self) -> bool {
        matches!(self, Self::Queued { .. })
    }
}

/// Live participants by id.
///
/// First contact creates a proxy and announces it on the arrivals channel
/// handed out by [`new`](Self::new).
pub struct ParticipantRegistry {
    participants: Mutex<HashMap<String, Arc<ParticipantProxy>>>,
    outbound: Arc<dyn ChannelOutbound>,
    options: RegistryOptions,
    arrivals: mpsc::UnboundedSender<Arc<ParticipantProxy>>,
}

impl ParticipantRegistry {
    pub fn new(
        outbound: Arc<dyn ChannelOutbound>,
        options: RegistryOptions,
    ) -> (Self, mpsc::UnboundedReceiver<Arc<ParticipantProxy>>) {
        let (arrivals, rx) = mpsc::unbounded_channel();
        let registry = Self {
            participants: Mutex::new(HashMap::new()),
            outbound,
            options,
            arrivals,
        };
        (registry, rx)
    }

    fn participants(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<ParticipantProxy>>> {
        self.participants.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Route an action to its participant, creating the participant on
    /// first contact (or after the previous one was torn down).
    pub fn ingest(&self, action: CanonicalAction) -> Ingest {
        let participant_id = action.participant_id.clone();
        let (proxy, created) = {
            let mut participants = self.participants();
            match participants.get(&participant_id) {
                Some(proxy) if !proxy.is_disconnected() => (Arc::clone(proxy), false),
                _ => {
                    let proxy = Arc::new(ParticipantProxy::new(
                        participant_id.clone(),
                        action.chat_id.clone(),
                        Arc::clone(&self.outbound),
                        self.options.allow_images,
                    ));
                    participants.insert(participant_id.clone(), Arc::clone(&proxy));
                    (proxy, true)
                },
            }
        };

        let queued = proxy.offer(action);
        if created {
            info!(participant_id = %participant_id, "new participant");
            if self.arrivals.send(Arc::clone(&proxy)).is_err() {
                debug!(participant_id = %participant_id, "no router listening for arrivals");
            }
        }
        if queued {
            Ingest::Queued {
                new_participant: created,
            }
        } else {
            Ingest::Duplicate
        }
    }

    pub fn get(&self, participant_id: &str) -> Option<Arc<ParticipantProxy>> {
        self.participants().get(participant_id).cloned()
    }

    /// Drop `proxy` from the registry if it is still the registered one.
    pub fn remove(&self, proxy: &Arc<ParticipantProxy>) -> bool {
        let mut participants = self.participants();
        let registered = participants
            .get(proxy.id())
            .is_some_and(|current| Arc::ptr_eq(current, proxy));
        if registered {
            participants.remove(proxy.id());
        }
        registered
    }

    /// Disconnect and forget every participant.
    pub fn disconnect_all(&self) {
        let drained: Vec<_> = self.participants().drain().map(|(_, p)| p).collect();
        for proxy in drained {
            proxy.disconnect();
        }
    }

    pub fn len(&self) -> usize {
        self.participants().len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants().is_empty()
    }
}
