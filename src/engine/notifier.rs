//! Release Notifications
//!
//! Tells the distribution layer that a new firmware is available.

use std::time::Duration;

use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Notification rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Payload sent for every published release
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtaNotification {
    pub action: String,
    pub data: OtaUpdateData,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtaUpdateData {
    pub version: String,
    pub firmware_url: String,
    pub signature_url: String,
    pub checksum: String,
    /// Device topic to publish on, when the relay needs one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
}

impl OtaNotification {
    pub fn ota_update(data: OtaUpdateData) -> Self {
        Self {
            action: "ota_update".to_string(),
            data,
        }
    }
}

/// Delivers release notifications
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: &OtaNotification) -> Result<(), NotifyError>;
}

/// Posts the notification as JSON to a webhook
pub struct WebhookNotifier {
    url: String,
    client: reqwest::blocking::Client,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Result<Self, NotifyError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }
}

impl Notifier for WebhookNotifier {
    fn notify(&self, notification: &OtaNotification) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.url)
            .header(USER_AGENT, "OtaDeploy")
            .header(CONTENT_TYPE, "application/json")
            .json(notification)
            .send()?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
                body: response.text().unwrap_or_default(),
            });
        }

        info!(url = %self.url, version = %notification.data.version, "Notification delivered");
        Ok(())
    }
}

/// Used when no webhook is configured
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify(&self, notification: &OtaNotification) -> Result<(), NotifyError> {
        info!(version = %notification.data.version, "No notifier configured, skipping");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread::{self, JoinHandle};

    #[test]
    fn test_payload_shape() {
        let notification = OtaNotification::ota_update(OtaUpdateData {
            version: "1.0.1".to_string(),
            firmware_url: "https://ota.example.com/firmware/1.0.1".to_string(),
            signature_url: "https://cdn.example.com/signatures/1.0.1.sig".to_string(),
            checksum: "ab".repeat(32),
            topic: None,
        });

        let value = serde_json::to_value(&notification).unwrap();
        assert_eq!(
            value,
            json!({
                "action": "ota_update",
                "data": {
                    "version": "1.0.1",
                    "firmware_url": "https://ota.example.com/firmware/1.0.1",
                    "signature_url": "https://cdn.example.com/signatures/1.0.1.sig",
                    "checksum": "ab".repeat(32),
                }
            })
        );
    }

    #[test]
    fn test_topic_is_included_when_set() {
        let notification = OtaNotification::ota_update(OtaUpdateData {
            version: "1.0.1".to_string(),
            firmware_url: String::new(),
            signature_url: String::new(),
            checksum: String::new(),
            topic: Some("devices/esp32/ota".to_string()),
        });
        let value = serde_json::to_value(&notification).unwrap();
        assert_eq!(value["data"]["topic"], "devices/esp32/ota");
    }

    fn sample() -> OtaNotification {
        OtaNotification::ota_update(OtaUpdateData {
            version: "1.0.0".to_string(),
            firmware_url: "https://ota.example.com/firmware/1.0.0".to_string(),
            signature_url: "https://cdn.example.com/signatures/1.0.0.sig".to_string(),
            checksum: "ab".repeat(32),
            topic: None,
        })
    }

    /// Answers a single request with `status_line` and returns the request body
    fn one_shot_server(status_line: &'static str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/hook", listener.local_addr().unwrap());

        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut received = Vec::new();
            let mut buf = [0u8; 1024];
            loop {
                let n = stream.read(&mut buf).unwrap();
                received.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&received).to_string();
                if let Some(end) = text.find("\r\n\r\n") {
                    let length = text[..end]
                        .lines()
                        .find_map(|l| {
                            let (name, value) = l.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())
                                .flatten()
                        })
                        .unwrap_or(0);
                    if received.len() >= end + 4 + length || n == 0 {
                        let body = String::from_utf8_lossy(&received[end + 4..]).to_string();
                        let reply = format!(
                            "HTTP/1.1 {}\r\nContent-Length: 4\r\nConnection: close\r\n\r\nnope",
                            status_line
                        );
                        stream.write_all(reply.as_bytes()).unwrap();
                        return body;
                    }
                }
                if n == 0 {
                    return String::new();
                }
            }
        });

        (url, handle)
    }

    #[test]
    fn test_delivered_payload() {
        let (url, server) = one_shot_server("200 OK");
        let notifier = WebhookNotifier::new(url).unwrap();

        notifier.notify(&sample()).unwrap();

        let body: serde_json::Value = serde_json::from_str(&server.join().unwrap()).unwrap();
        assert_eq!(body["action"], "ota_update");
        assert_eq!(body["data"]["version"], "1.0.0");
    }

    #[test]
    fn test_non_success_status_is_rejected() {
        let (url, server) = one_shot_server("503 Service Unavailable");
        let notifier = WebhookNotifier::new(url).unwrap();

        let err = notifier.notify(&sample()).unwrap_err();
        server.join().unwrap();
        match err {
            NotifyError::Rejected { status, body } => {
                assert_eq!(status, 503);
                assert_eq!(body, "nope");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_unreachable_webhook_errors() {
        // a port that was just free and now has no listener
        let port = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
        let notifier = WebhookNotifier::new(format!("http://127.0.0.1:{}/hook", port)).unwrap();

        assert!(matches!(notifier.notify(&sample()), Err(NotifyError::Http(_))));
    }
}
