//! Inbound update handling: classification and normalization.

use {
    stagehand_channels::{AttachmentKind, CanonicalAction},
    tracing::{debug, warn},
};

use crate::types::{RawMessage, RawUpdate};

/// What a relay payload turned out to be.
#[derive(Debug, Clone)]
pub enum InboundEvent {
    /// A new message from a participant.
    Message(RawMessage),
    /// Any other update kind (edits, callback queries, membership changes).
    Control { kind: String },
    Malformed { reason: String },
}

/// Classify a raw relay payload.
pub fn classify(payload: serde_json::Value) -> InboundEvent {
    let update: RawUpdate = match serde_json::from_value(payload) {
        Ok(update) => update,
        Err(e) => {
            return InboundEvent::Malformed {
                reason: e.to_string(),
            };
        },
    };
    if let Some(message) = update.message {
        return InboundEvent::Message(message);
    }
    let kind = update
        .other
        .keys()
        .next()
        .cloned()
        .unwrap_or_else(|| "empty".to_string());
    debug!(update_id = update.update_id, kind = %kind, "control update");
    InboundEvent::Control { kind }
}

/// Attachment carried by a message.
///
/// Photos and documents with an image mime type count as images; every
/// other attachment field is reported generically.
pub fn attachment_kind(message: &RawMessage) -> AttachmentKind {
    if message.photo.is_some() {
        return AttachmentKind::Image;
    }
    if let Some(document) = &message.document {
        let is_image = document
            .mime_type
            .as_deref()
            .is_some_and(|mime| mime.contains("image"));
        return if is_image {
            AttachmentKind::Image
        } else {
            AttachmentKind::Other
        };
    }
    let has_other = message.audio.is_some()
        || message.voice.is_some()
        || message.video.is_some()
        || message.video_note.is_some()
        || message.sticker.is_some()
        || message.animation.is_some();
    if has_other {
        AttachmentKind::Other
    } else {
        AttachmentKind::None
    }
}

/// Turn a message into a canonical action.
///
/// The participant is the sender; messages without a sender (channel posts)
/// are attributed to the chat.
pub fn normalize(message: &RawMessage) -> CanonicalAction {
    let participant_id = message
        .from
        .as_ref()
        .map_or(message.chat.id, |user| user.id);
    CanonicalAction {
        message_id: message.message_id,
        participant_id: participant_id.to_string(),
        chat_id: message.chat.id.to_string(),
        text: message.text.clone(),
        attachment: attachment_kind(message),
        episode_done: false,
    }
}

/// Classify and normalize a relay payload; control updates and malformed
/// payloads are logged and dropped.
pub fn decode(payload: serde_json::Value) -> Option<CanonicalAction> {
    match classify(payload) {
        InboundEvent::Message(message) => Some(normalize(&message)),
        InboundEvent::Control { kind } => {
            debug!(kind = %kind, "ignoring control update");
            None
        },
        InboundEvent::Malformed { reason } => {
            warn!(reason = %reason, "dropping malformed update");
            None
        },
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use {super::*, rstest::rstest, serde_json::json};

    fn message(extra: serde_json::Value) -> serde_json::Value {
        let mut msg = json!({
            "message_id": 11,
            "from": {"id": 42, "first_name": "Alice"},
            "chat": {"id": 42, "type": "private"},
        });
        if let (Some(msg), Some(extra)) = (msg.as_object_mut(), extra.as_object()) {
            msg.extend(extra.clone());
        }
        json!({"update_id": 900, "message": msg})
    }

    fn classify_message(payload: serde_json::Value) -> RawMessage {
        match classify(payload) {
            InboundEvent::Message(message) => message,
            other => panic!("expected message, got {other:?}"),
        }
    }

    #[test]
    fn text_message_normalizes() {
        let raw = classify_message(message(json!({"text": "/begin"})));
        let action = normalize(&raw);
        assert_eq!(action, CanonicalAction {
            message_id: 11,
            participant_id: "42".into(),
            chat_id: "42".into(),
            text: Some("/begin".into()),
            attachment: AttachmentKind::None,
            episode_done: false,
        });
    }

    #[rstest]
    #[case(json!({"photo": [{"file_id": "a"}]}), AttachmentKind::Image)]
    #[case(json!({"document": {"mime_type": "image/jpeg"}}), AttachmentKind::Image)]
    #[case(json!({"document": {"mime_type": "image/png"}}), AttachmentKind::Image)]
    #[case(json!({"document": {"mime_type": "application/pdf"}}), AttachmentKind::Other)]
    #[case(json!({"document": {"file_name": "notes"}}), AttachmentKind::Other)]
    #[case(json!({"voice": {"file_id": "v"}}), AttachmentKind::Other)]
    #[case(json!({"sticker": {"file_id": "s"}}), AttachmentKind::Other)]
    #[case(json!({"text": "hi"}), AttachmentKind::None)]
    fn attachment_detection(#[case] extra: serde_json::Value, #[case] expected: AttachmentKind) {
        let raw = classify_message(message(extra));
        assert_eq!(attachment_kind(&raw), expected);
    }

    #[test]
    fn photo_without_text_keeps_text_empty() {
        let raw = classify_message(message(json!({"photo": [{"file_id": "a"}]})));
        let action = normalize(&raw);
        assert_eq!(action.text, None);
        assert!(action.attachment.is_image());
    }

    #[test]
    fn sender_missing_falls_back_to_chat() {
        let raw = classify_message(json!({
            "update_id": 1,
            "message": {"message_id": 5, "chat": {"id": -100}, "text": "post"},
        }));
        assert_eq!(normalize(&raw).participant_id, "-100");
    }

    #[rstest]
    #[case(json!({"update_id": 1, "edited_message": {"message_id": 1}}), "edited_message")]
    #[case(json!({"update_id": 1, "callback_query": {"id": "x"}}), "callback_query")]
    #[case(json!({"update_id": 1}), "empty")]
    fn control_updates(#[case] payload: serde_json::Value, #[case] expected: &str) {
        match classify(payload) {
            InboundEvent::Control { kind } => assert_eq!(kind, expected),
            other => panic!("expected control, got {other:?}"),
        }
    }

    #[test]
    fn decode_keeps_only_messages() {
        assert!(decode(message(json!({"text": "hi"}))).is_some());
        assert!(decode(json!({"update_id": 2, "callback_query": {}})).is_none());
        assert!(decode(json!(null)).is_none());
    }

    #[rstest]
    #[case(json!("just a string"))]
    #[case(json!({"update_id": 1, "message": {"text": "no ids"}}))]
    fn malformed_payloads(#[case] payload: serde_json::Value) {
        assert!(matches!(classify(payload), InboundEvent::Malformed { .. }));
    }
}
