//! JSON-lines rendering of download events for `--events`.

use serde::Serialize;
use streamget_core::DownloadEvent;

/// One line of the event log.
#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub(crate) enum EventRecord {
    Request {
        url: String,
        attempt: u32,
    },
    Response {
        status: u16,
        #[serde(skip_serializing_if = "Option::is_none")]
        content_length: Option<u64>,
    },
    Redirect {
        from: String,
        to: String,
        status: u16,
        delay_ms: u64,
    },
    RateLimited {
        status: u16,
        retry: u32,
        delay_ms: u64,
    },
    Retry {
        retry: u32,
        delay_ms: u64,
        reason: String,
    },
    Reconnect {
        reconnect: u32,
        delay_ms: u64,
        offset: u64,
        reason: String,
    },
    Data {
        bytes: usize,
    },
    Completed {
        bytes_downloaded: u64,
    },
    Cancelled,
    Error {
        message: String,
    },
}

impl From<&DownloadEvent> for EventRecord {
    fn from(event: &DownloadEvent) -> Self {
        match event {
            DownloadEvent::Request { url, attempt } => Self::Request {
                url: url.clone(),
                attempt: *attempt,
            },
            DownloadEvent::Response {
                status,
                content_length,
            } => Self::Response {
                status: *status,
                content_length: *content_length,
            },
            DownloadEvent::Redirect {
                from,
                to,
                status,
                delay,
            } => Self::Redirect {
                from: from.clone(),
                to: to.clone(),
                status: *status,
                delay_ms: millis(*delay),
            },
            DownloadEvent::RateLimited {
                status,
                retry,
                delay,
            } => Self::RateLimited {
                status: *status,
                retry: *retry,
                delay_ms: millis(*delay),
            },
            DownloadEvent::Retry {
                retry,
                delay,
                reason,
            } => Self::Retry {
                retry: *retry,
                delay_ms: millis(*delay),
                reason: reason.clone(),
            },
            DownloadEvent::Reconnect {
                reconnect,
                delay,
                offset,
                reason,
            } => Self::Reconnect {
                reconnect: *reconnect,
                delay_ms: millis(*delay),
                offset: *offset,
                reason: reason.clone(),
            },
            DownloadEvent::Data(chunk) => Self::Data { bytes: chunk.len() },
            DownloadEvent::Completed { bytes_downloaded } => Self::Completed {
                bytes_downloaded: *bytes_downloaded,
            },
            DownloadEvent::Cancelled => Self::Cancelled,
            DownloadEvent::Error(error) => Self::Error {
                message: error.to_string(),
            },
        }
    }
}

fn millis(delay: std::time::Duration) -> u64 {
    u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)
}

/// Renders an event as one JSON line (no trailing newline).
pub(crate) fn render(event: &DownloadEvent) -> String {
    serde_json::to_string(&EventRecord::from(event))
        .unwrap_or_else(|_| format!("{{\"event\":\"{}\"}}", event.name()))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;
    use streamget_core::DownloadError;

    use super::*;

    #[test]
    fn test_render_redirect() {
        let line = render(&DownloadEvent::Redirect {
            from: "http://host/a".to_string(),
            to: "http://host/b".to_string(),
            status: 302,
            delay: Duration::from_millis(1500),
        });
        let value: serde_json::Value = serde_json::from_str(&line).expect("valid json");
        assert_eq!(value["event"], "redirect");
        assert_eq!(value["to"], "http://host/b");
        assert_eq!(value["delay_ms"], 1500);
    }

    #[test]
    fn test_render_data_reports_length_only() {
        let line = render(&DownloadEvent::Data(Bytes::from_static(b"secret body")));
        assert_eq!(line, r#"{"event":"data","bytes":11}"#);
    }

    #[test]
    fn test_render_error_message() {
        let line = render(&DownloadEvent::Error(DownloadError::status_code(
            "http://host/a",
            404,
        )));
        let value: serde_json::Value = serde_json::from_str(&line).expect("valid json");
        assert_eq!(value["event"], "error");
        assert!(value["message"].as_str().expect("string").contains("404"));
    }

    #[test]
    fn test_render_response_omits_unknown_length() {
        let line = render(&DownloadEvent::Response {
            status: 200,
            content_length: None,
        });
        assert_eq!(line, r#"{"event":"response","status":200}"#);
    }
}
