//! WeCom (WeChat Work) group robot webhook

use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use super::{AlertError, AlertPayload, AlertSink};

#[derive(Debug, Deserialize)]
struct WebhookAck {
    errcode: i64,
    #[serde(default)]
    errmsg: String,
}

/// Posts markdown messages to `<base>/cgi-bin/webhook/send?key=<token>`
pub struct WeComWebhook {
    client: Client,
    url: String,
}

impl WeComWebhook {
    /// Create a sink whose requests give up after `timeout`
    pub fn new(base_url: &str, token: &str, timeout: Duration) -> Result<Self, AlertError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(WeComWebhook {
            client,
            url: format!(
                "{}/cgi-bin/webhook/send?key={}",
                base_url.trim_end_matches('/'),
                token
            ),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl AlertSink for WeComWebhook {
    async fn send(&self, payload: &AlertPayload) -> Result<(), AlertError> {
        let response = self
            .client
            .post(&self.url)
            .json(&message_body(payload))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AlertError::Status(status.as_u16()));
        }

        let body = response.text().await?;
        check_ack(&body)
    }
}

/// JSON body of a markdown robot message
pub fn message_body(payload: &AlertPayload) -> serde_json::Value {
    serde_json::json!({
        "msgtype": "markdown",
        "markdown": {
            "content": payload.content,
        }
    })
}

/// Interpret the robot's `{"errcode": .., "errmsg": ..}` reply
///
/// A 2xx reply without a JSON body is taken as accepted.
pub fn check_ack(body: &str) -> Result<(), AlertError> {
    match serde_json::from_str::<WebhookAck>(body) {
        Ok(ack) if ack.errcode != 0 => Err(AlertError::Rejected {
            code: ack.errcode,
            message: ack.errmsg,
        }),
        Ok(_) => Ok(()),
        Err(e) => {
            log::debug!("Webhook reply is not an acknowledgement ({}): {}", e, body);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EventKind;

    #[test]
    fn test_url() {
        let hook = WeComWebhook::new(
            "https://qyapi.weixin.qq.com/",
            "abc-123",
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(
            hook.url(),
            "https://qyapi.weixin.qq.com/cgi-bin/webhook/send?key=abc-123"
        );
    }

    #[test]
    fn test_message_body() {
        let payload = AlertPayload {
            kind: EventKind::LoginSuccess,
            color: "info",
            icon: "✅ Accepted",
            content: "# hello".to_string(),
        };
        let body = message_body(&payload);
        assert_eq!(body["msgtype"], "markdown");
        assert_eq!(body["markdown"]["content"], "# hello");
    }

    #[test]
    fn test_check_ack() {
        assert!(check_ack(r#"{"errcode":0,"errmsg":"ok"}"#).is_ok());
        assert!(check_ack("").is_ok());

        match check_ack(r#"{"errcode":93000,"errmsg":"invalid webhook url"}"#) {
            Err(AlertError::Rejected { code, message }) => {
                assert_eq!(code, 93000);
                assert_eq!(message, "invalid webhook url");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
