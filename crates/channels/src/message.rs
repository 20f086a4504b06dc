use serde::{Deserialize, Serialize};

/// What kind of attachment an inbound message carried.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentKind {
    #[default]
    None,
    /// A photo, or a document whose mime type is an image.
    Image,
    /// Any other attachment (audio, voice, video, sticker, non-image file).
    Other,
}

impl AttachmentKind {
    pub fn is_image(self) -> bool {
        self == Self::Image
    }
}

/// One inbound message, normalized and deduplicated.
///
/// Produced once per unique `message_id` per participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalAction {
    pub message_id: i64,
    pub participant_id: String,
    /// Where replies go. Equal to `participant_id` for private chats.
    pub chat_id: String,
    /// `None` when the message carried no text; stages never see those.
    pub text: Option<String>,
    #[serde(default)]
    pub attachment: AttachmentKind,
    #[serde(default)]
    pub episode_done: bool,
}

impl CanonicalAction {
    /// Plain text message in a private chat.
    pub fn text(message_id: i64, participant_id: impl Into<String>, text: impl Into<String>) -> Self {
        let participant_id = participant_id.into();
        Self {
            message_id,
            chat_id: participant_id.clone(),
            participant_id,
            text: Some(text.into()),
            attachment: AttachmentKind::None,
            episode_done: false,
        }
    }

    /// Text with surrounding whitespace removed, if any is left.
    pub fn trimmed_text(&self) -> Option<&str> {
        self.text
            .as_deref()
            .map(str::trim)
            .filter(|text| !text.is_empty())
    }
}

/// A message a stage wants delivered to a participant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundAction {
    pub text: String,
    /// Rendered as a one-time reply keyboard.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub quick_replies: Vec<String>,
    /// Display name prefixed to the text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persona: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<i64>,
}

impl OutboundAction {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_quick_replies<I, S>(mut self, replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.quick_replies = replies.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_persona(mut self, persona: impl Into<String>) -> Self {
        self.persona = Some(persona.into());
        self
    }

    #[must_use]
    pub fn replying_to(mut self, message_id: i64) -> Self {
        self.reply_to = Some(message_id);
        self
    }

    /// Text as the participant sees it, persona prefix included.
    pub fn rendered_text(&self) -> String {
        match self.persona.as_deref().filter(|p| !p.is_empty()) {
            Some(persona) => format!("{persona}: {}", self.text),
            None => self.text.clone(),
        }
    }
}

/// Result of a successful send.
#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    /// Platform-assigned id, when the platform reports one.
    pub message_id: Option<i64>,
    pub raw: serde_json::Value,
}
