use std::time::Duration;

use {
    async_trait::async_trait,
    secrecy::{ExposeSecret, Secret},
    serde::Deserialize,
    serde_json::{Value, json},
    stagehand_channels::{ChannelOutbound, OutboundAction, SentMessage},
    stagehand_config::TelegramConfig,
    tracing::{debug, info, warn},
};

use crate::{
    Error, Result,
    error::Context,
};

/// Maximum text length the Bot API accepts in one message.
pub const TELEGRAM_MAX_MESSAGE_LEN: usize = 4096;

/// Optional parts of a `sendMessage` call.
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    /// Shown as a one-time reply keyboard, one button per row.
    pub quick_replies: Vec<String>,
    pub reply_to: Option<i64>,
}

impl From<&OutboundAction> for SendOptions {
    fn from(action: &OutboundAction) -> Self {
        Self {
            quick_replies: action.quick_replies.clone(),
            reply_to: action.reply_to,
        }
    }
}

/// Bot API response envelope.
#[derive(Debug, Deserialize)]
struct ApiEnvelope {
    ok: bool,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error_code: Option<i64>,
    #[serde(default)]
    description: Option<String>,
}

impl ApiEnvelope {
    fn into_result(self) -> Result<Value> {
        if self.ok {
            return Ok(self.result.unwrap_or(Value::Null));
        }
        Err(Error::api(
            self.error_code.unwrap_or_default(),
            self.description.unwrap_or_default(),
        ))
    }
}

/// Thin Bot API client. Every method is exactly one HTTPS call; no retries.
pub struct TelegramOutbound {
    client: reqwest::Client,
    api_url: String,
    token: Secret<String>,
}

impl TelegramOutbound {
    pub fn new(token: Secret<String>, api_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    pub fn from_config(config: &TelegramConfig) -> Result<Self> {
        if !config.has_token() {
            return Err(Error::message("telegram bot token is not configured"));
        }
        Self::new(
            config.token.clone(),
            config.api_url.clone(),
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    async fn call(&self, method: &str, payload: &Value) -> Result<Value> {
        let url = format!("{}/bot{}/{method}", self.api_url, self.token.expose_secret());
        let response = self.client.post(url).json(payload).send().await?;
        let envelope: ApiEnvelope = response
            .json()
            .await
            .context(format!("malformed {method} response"))?;
        let result = envelope.into_result();
        if let Err(e) = &result {
            warn!(method, error = %e, "telegram API call failed");
        }
        result
    }

    /// Send a text message and return the platform's message record.
    pub async fn send_text(
        &self,
        chat_id: &str,
        text: &str,
        options: &SendOptions,
    ) -> Result<SentMessage> {
        let mut payload = json!({
            "chat_id": chat_id_value(chat_id),
            "text": clamp_text(text),
        });
        if let Some(reply_to) = options.reply_to {
            payload["reply_to_message_id"] = json!(reply_to);
        }
        if !options.quick_replies.is_empty() {
            payload["reply_markup"] = reply_keyboard(&options.quick_replies);
        }

        let raw = self.call("sendMessage", &payload).await?;
        let message_id = raw.get("message_id").and_then(Value::as_i64);
        debug!(chat_id, ?message_id, "telegram message sent");
        Ok(SentMessage { message_id, raw })
    }

    /// Show the "typing…" status in `chat_id`.
    pub async fn send_typing_indicator(&self, chat_id: &str) -> Result<bool> {
        let result = self
            .call(
                "sendChatAction",
                &json!({ "chat_id": chat_id_value(chat_id), "action": "typing" }),
            )
            .await?;
        Ok(result.as_bool().unwrap_or(false))
    }

    /// Point the bot's webhook at `url`.
    pub async fn register_webhook(&self, url: &str) -> Result<bool> {
        let result = self.call("setWebhook", &json!({ "url": url })).await?;
        info!(url, "telegram webhook registered");
        Ok(result.as_bool().unwrap_or(false))
    }

    /// Remove the webhook integration.
    pub async fn delete_webhook(&self) -> Result<bool> {
        let result = self.call("deleteWebhook", &json!({})).await?;
        info!("telegram webhook deleted");
        Ok(result.as_bool().unwrap_or(false))
    }
}

#[async_trait]
impl ChannelOutbound for TelegramOutbound {
    async fn send_text(&self, chat_id: &str, action: &OutboundAction) -> anyhow::Result<SentMessage> {
        let sent = TelegramOutbound::send_text(
            self,
            chat_id,
            &action.rendered_text(),
            &SendOptions::from(action),
        )
        .await?;
        Ok(sent)
    }

    async fn send_typing(&self, chat_id: &str) -> anyhow::Result<()> {
        self.send_typing_indicator(chat_id).await?;
        Ok(())
    }
}

/// Numeric chat ids go out as numbers, `@channel` names as strings.
fn chat_id_value(chat_id: &str) -> Value {
    match chat_id.parse::<i64>() {
        Ok(id) => json!(id),
        Err(_) => json!(chat_id),
    }
}

fn reply_keyboard(replies: &[String]) -> Value {
    let rows: Vec<Value> = replies
        .iter()
        .map(|reply| json!([{ "text": reply }]))
        .collect();
    json!({
        "keyboard": rows,
        "one_time_keyboard": true,
        "resize_keyboard": true,
    })
}

fn clamp_text(text: &str) -> &str {
    match text.char_indices().nth(TELEGRAM_MAX_MESSAGE_LEN) {
        Some((cut, _)) => {
            warn!(len = text.chars().count(), "message too long, truncating");
            &text[..cut]
        },
        None => text,
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use std::sync::{Arc, Mutex};

    use {
        super::*,
        axum::{
            Json, Router,
            extract::{Path, State},
            routing::post,
        },
        rstest::rstest,
        tokio::net::TcpListener,
    };

    #[derive(Debug, Clone)]
    struct CapturedRequest {
        token: String,
        method: String,
        body: Value,
    }

    #[derive(Clone, Default)]
    struct MockTelegramApi {
        requests: Arc<Mutex<Vec<CapturedRequest>>>,
        /// When set, every call fails with this `(code, description)`.
        failure: Option<(i64, String)>,
    }

    async fn telegram_api_handler(
        State(state): State<MockTelegramApi>,
        Path((token, method)): Path<(String, String)>,
        Json(body): Json<Value>,
    ) -> Json<Value> {
        state.requests.lock().unwrap().push(CapturedRequest {
            token,
            method: method.clone(),
            body,
        });

        if let Some((code, description)) = &state.failure {
            return Json(json!({"ok": false, "error_code": code, "description": description}));
        }
        match method.as_str() {
            "sendMessage" => Json(json!({
                "ok": true,
                "result": {"message_id": 77, "chat": {"id": 42, "type": "private"}, "text": "ok"},
            })),
            _ => Json(json!({"ok": true, "result": true})),
        }
    }

    async fn start_mock_api(state: MockTelegramApi) -> TelegramOutbound {
        let app = Router::new()
            .route("/{token}/{method}", post(telegram_api_handler))
            .with_state(state);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        TelegramOutbound::new(
            Secret::new("123:ABC".into()),
            format!("http://{addr}/"),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    fn captured(state: &MockTelegramApi) -> Vec<CapturedRequest> {
        state.requests.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn send_text_returns_message_id() {
        let state = MockTelegramApi::default();
        let outbound = start_mock_api(state.clone()).await;

        let sent = outbound
            .send_text("42", "hello", &SendOptions::default())
            .await
            .unwrap();

        assert_eq!(sent.message_id, Some(77));
        let requests = captured(&state);
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].token, "bot123:ABC");
        assert_eq!(requests[0].method, "sendMessage");
        assert_eq!(requests[0].body, json!({"chat_id": 42, "text": "hello"}));
    }

    #[tokio::test]
    async fn channel_send_applies_persona_and_quick_replies() {
        let state = MockTelegramApi::default();
        let outbound = start_mock_api(state.clone()).await;
        let action = OutboundAction::new("Pick one")
            .with_persona("Guide")
            .with_quick_replies(["/begin", "/exit"])
            .replying_to(9);

        ChannelOutbound::send_text(&outbound, "42", &action)
            .await
            .unwrap();

        let body = &captured(&state)[0].body;
        assert_eq!(body["text"], "Guide: Pick one");
        assert_eq!(body["reply_to_message_id"], 9);
        assert_eq!(
            body["reply_markup"],
            json!({
                "keyboard": [[{"text": "/begin"}], [{"text": "/exit"}]],
                "one_time_keyboard": true,
                "resize_keyboard": true,
            })
        );
    }

    #[tokio::test]
    async fn api_failure_carries_code_and_description() {
        let state = MockTelegramApi {
            failure: Some((403, "Forbidden: bot was blocked by the user".into())),
            ..Default::default()
        };
        let outbound = start_mock_api(state.clone()).await;

        let err = outbound
            .send_text("42", "hello", &SendOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Api { code: 403, .. }));
        assert_eq!(err.to_string(), "403 - Forbidden: bot was blocked by the user");
        assert_eq!(captured(&state).len(), 1, "no retries");
    }

    #[tokio::test]
    async fn typing_and_webhook_calls() {
        let state = MockTelegramApi::default();
        let outbound = start_mock_api(state.clone()).await;

        assert!(outbound.send_typing_indicator("@channel").await.unwrap());
        assert!(
            outbound
                .register_webhook("https://relay.example.com/webhook")
                .await
                .unwrap()
        );
        assert!(outbound.delete_webhook().await.unwrap());

        let requests = captured(&state);
        let methods: Vec<&str> = requests.iter().map(|r| r.method.as_str()).collect();
        assert_eq!(methods, vec!["sendChatAction", "setWebhook", "deleteWebhook"]);
        assert_eq!(requests[0].body, json!({"chat_id": "@channel", "action": "typing"}));
        assert_eq!(requests[1].body["url"], "https://relay.example.com/webhook");
    }

    #[test]
    fn from_config_requires_token() {
        assert!(TelegramOutbound::from_config(&TelegramConfig::default()).is_err());
    }

    #[rstest]
    #[case(10, 10)]
    #[case(TELEGRAM_MAX_MESSAGE_LEN, TELEGRAM_MAX_MESSAGE_LEN)]
    #[case(TELEGRAM_MAX_MESSAGE_LEN + 5, TELEGRAM_MAX_MESSAGE_LEN)]
    fn clamps_long_text(#[case] len: usize, #[case] expected: usize) {
        let text = "é".repeat(len);
        assert_eq!(clamp_text(&text).chars().count(), expected);
    }
}
