//! Health probing of runtime containers

use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::config::HealthConfiguration;

/// Probe loop outcomes that are not success
#[derive(Debug)]
pub(super) enum ProbeError {
    Cancelled,
    Exhausted { attempts: u32 },
}

/// Poll the internal URL until it answers 2xx.
///
/// Any transport error or non-2xx response counts as a miss; exhausting the
/// configured attempts fails the run. The per-request timeout is enforced by
/// the client itself.
pub(super) async fn probe(
    client: &Client,
    url: &str,
    config: &HealthConfiguration,
    cancel: &CancellationToken,
) -> Result<u32, ProbeError> {
    for attempt in 1..=config.attempts {
        if cancel.is_cancelled() {
            return Err(ProbeError::Cancelled);
        }

        let request = client.get(url).send();
        let outcome = tokio::select! {
            _ = cancel.cancelled() => return Err(ProbeError::Cancelled),
            outcome = request => outcome,
        };

        match outcome {
            Ok(response) if response.status().is_success() => {
                debug!("Health probe succeeded for {} on attempt {}", url, attempt);
                return Ok(attempt);
            }
            Ok(response) => {
                trace!("Health probe miss for {}: {}", url, response.status());
            }
            Err(e) => {
                trace!("Health probe miss for {}: {}", url, e);
            }
        }

        if attempt < config.attempts {
            tokio::select! {
                _ = cancel.cancelled() => return Err(ProbeError::Cancelled),
                _ = tokio::time::sleep(config.interval) => {}
            }
        }
    }

    Err(ProbeError::Exhausted {
        attempts: config.attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn fast_config(attempts: u32) -> HealthConfiguration {
        HealthConfiguration {
            timeout: Duration::from_millis(250),
            interval: Duration::from_millis(10),
            attempts,
        }
    }

    #[tokio::test]
    async fn test_probe_succeeds_against_listener() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 512];
            let _ = stream.read(&mut buf).await;
            let _ = stream
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\n\r\n")
                .await;
        });

        let client = Client::new();
        let url = format!("http://127.0.0.1:{}", port);
        let attempt = probe(&client, &url, &fast_config(3), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(attempt, 1);
    }

    #[tokio::test]
    async fn test_probe_exhausts_against_closed_port() {
        let client = Client::new();
        // Nothing listens here; every attempt is a connection error
        let result = probe(
            &client,
            "http://127.0.0.1:9",
            &fast_config(4),
            &CancellationToken::new(),
        )
        .await;

        assert!(matches!(result, Err(ProbeError::Exhausted { attempts: 4 })));
    }

    #[tokio::test]
    async fn test_probe_cancellation() {
        let client = Client::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = probe(&client, "http://127.0.0.1:9", &fast_config(30), &cancel).await;
        assert!(matches!(result, Err(ProbeError::Cancelled)));
    }
}
