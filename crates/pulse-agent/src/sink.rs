// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! HTTP delivery of sealed payloads to the collector service.

use pulse_core::{RelayError, SealedPayload, TransportKind};
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE};
use std::time::Duration;
use tracing::debug;

/// Integrity signature header, hex-encoded HMAC-SHA256 over the body.
pub const SIGNATURE_HEADER: &str = "HashSHA256";
/// Marks the body as RSA-encrypted so the receiver decrypts before
/// decompressing.
pub const ENCRYPTED_HEADER: &str = "X-Encrypted";

pub struct MetricsSink {
    client: reqwest::Client,
    url: String,
}

impl MetricsSink {
    /// `server_address` is a host:port pair; the batch-update route is fixed
    /// by the collector contract.
    pub fn new(server_address: &str, timeout: Duration) -> Result<Self, RelayError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RelayError::Payload(format!("http client: {e}")))?;
        Ok(MetricsSink {
            client,
            url: format!("http://{server_address}/updates/"),
        })
    }

    pub async fn send(&self, payload: &SealedPayload) -> Result<(), RelayError> {
        let mut request = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .header(CONTENT_ENCODING, "gzip")
            .body(payload.body.clone());

        if payload.encrypted {
            request = request.header(ENCRYPTED_HEADER, "rsa");
        }
        if let Some(signature) = &payload.signature {
            request = request.header(SIGNATURE_HEADER, signature);
        }

        let response = request.send().await.map_err(map_reqwest)?;
        let status = response.status();
        if status.is_success() {
            debug!("delivered {} bytes to {}", payload.body.len(), self.url);
            Ok(())
        } else {
            Err(RelayError::Protocol {
                status: status.as_u16(),
                message: format!("collector rejected batch at {}", self.url),
            })
        }
    }
}

fn map_reqwest(err: reqwest::Error) -> RelayError {
    let kind = if err.is_timeout() {
        TransportKind::TimedOut
    } else if err.is_connect() {
        TransportKind::ConnectionRefused
    } else {
        TransportKind::Other
    };
    RelayError::Transport {
        kind,
        message: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> SealedPayload {
        SealedPayload {
            body: vec![0x1f, 0x8b, 0x01, 0x02],
            encrypted: false,
            signature: Some("ab".repeat(32)),
        }
    }

    #[tokio::test]
    async fn sends_body_with_contract_headers() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/updates/")
            .match_header("content-type", "application/json")
            .match_header("content-encoding", "gzip")
            .match_header("hashsha256", "ab".repeat(32).as_str())
            .with_status(200)
            .create_async()
            .await;

        let address = server.host_with_port();
        let sink = MetricsSink::new(&address, Duration::from_secs(5)).unwrap();
        sink.send(&payload()).await.unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn marks_encrypted_payloads() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/updates/")
            .match_header("x-encrypted", "rsa")
            .with_status(200)
            .create_async()
            .await;

        let address = server.host_with_port();
        let sink = MetricsSink::new(&address, Duration::from_secs(5)).unwrap();
        let mut sealed = payload();
        sealed.encrypted = true;
        sink.send(&sealed).await.unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn rejection_is_a_protocol_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/updates/")
            .with_status(400)
            .create_async()
            .await;

        let address = server.host_with_port();
        let sink = MetricsSink::new(&address, Duration::from_secs(5)).unwrap();
        let err = sink.send(&payload()).await.unwrap_err();

        assert!(matches!(err, RelayError::Protocol { status: 400, .. }));
        assert!(!pulse_core::is_transient(&err));
    }

    #[tokio::test]
    async fn refused_connection_is_transient() {
        // Nothing listens on this port.
        let sink = MetricsSink::new("127.0.0.1:9", Duration::from_secs(1)).unwrap();
        let err = sink.send(&payload()).await.unwrap_err();

        assert!(matches!(
            err,
            RelayError::Transport {
                kind: TransportKind::ConnectionRefused,
                ..
            }
        ));
        assert!(pulse_core::is_transient(&err));
    }
}
