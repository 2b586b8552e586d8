//! RPC client
//!
//! HTTP-based peer client with streaming request/response bodies. After a
//! network error every call short-circuits with `RetryPending` until one RPC
//! timeout has passed; then a single probe is let through.

use std::pin::Pin;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures::stream::{Stream, StreamExt, TryStreamExt};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::io::{ReaderStream, StreamReader};

use crate::backend::ShardStream;
use crate::error::{Error, Result};

use super::{decode_reply, encode_args, encode_frame, read_frame, CallRequest, CallResponse};

/// HTTP-based RPC client bound to one peer service URL.
pub struct RpcClient {
    http: reqwest::Client,
    service_url: String,
    timeout: Duration,
    retry_until: Mutex<Option<Instant>>,
}

impl RpcClient {
    pub fn new(service_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .tcp_keepalive(timeout)
            .build()
            .map_err(|e| Error::Transport(e.to_string()))?;

        Ok(Self {
            http,
            service_url: service_url.into(),
            timeout,
            retry_until: Mutex::new(None),
        })
    }

    pub fn service_url(&self) -> &str {
        &self.service_url
    }

    fn check_retry_window(&self) -> Result<()> {
        let mut until = self.retry_until.lock();
        if let Some(deadline) = *until {
            if Instant::now() < deadline {
                return Err(Error::RetryPending);
            }
            // Window elapsed; let one probe through.
            *until = None;
        }
        Ok(())
    }

    fn note_network_error(&self) {
        *self.retry_until.lock() = Some(Instant::now() + self.timeout);
    }

    fn note_success(&self) {
        *self.retry_until.lock() = None;
    }

    /// Call a method with no payload stream, discarding any response body.
    /// An authentication rejection is retried once with fresh auth args.
    pub async fn call<A, R>(&self, method: &str, args: &A) -> Result<R>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        match self.call_with(method, args, None).await {
            Ok((reply, _body)) => Ok(reply),
            Err(Error::Auth(_)) => {
                let (reply, _body) = self.call_with(method, args, None).await?;
                Ok(reply)
            }
            Err(err) => Err(err),
        }
    }

    /// Call a method, optionally streaming `payload` after the call frame.
    /// Returns the decoded reply plus the remaining response body stream.
    pub async fn call_with<A, R>(
        &self,
        method: &str,
        args: &A,
        payload: Option<ShardStream>,
    ) -> Result<(R, ShardStream)>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        self.check_retry_window()?;

        match self.dispatch(method, args, payload).await {
            Ok(ok) => {
                self.note_success();
                Ok(ok)
            }
            Err(err) => {
                if matches!(err, Error::Transport(_)) {
                    self.note_network_error();
                }
                Err(err)
            }
        }
    }

    async fn dispatch<A, R>(
        &self,
        method: &str,
        args: &A,
        payload: Option<ShardStream>,
    ) -> Result<(R, ShardStream)>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        let frame = encode_frame(&CallRequest {
            method: method.to_string(),
            args: encode_args(args)?,
        })?;

        let body = match payload {
            Some(reader) => {
                let head =
                    futures::stream::once(async move { Ok::<Bytes, std::io::Error>(frame.into()) });
                let tail = ReaderStream::new(reader);
                reqwest::Body::wrap_stream(head.chain(tail))
            }
            None => reqwest::Body::from(frame),
        };

        let response = self
            .http
            .post(&self.service_url)
            .body(body)
            .send()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::Rpc(format!(
                "{} rpc call failed with status {}",
                method,
                response.status()
            )));
        }

        let stream = response
            .bytes_stream()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));
        let boxed: Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>> = Box::pin(stream);
        let mut reader = StreamReader::new(boxed);

        let response: CallResponse = read_frame(&mut reader).await?;
        if let Some(wire_err) = response.error {
            return Err(wire_err.into());
        }

        let reply = decode_reply(&response.reply)?;
        Ok((reply, Box::new(reader)))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_retry_window_blocks_calls() {
        let client = RpcClient::new(
            "http://127.0.0.1:9/_",
            Duration::from_secs(60),
        )
        .unwrap();

        client.note_network_error();
        assert!(matches!(
            client.check_retry_window(),
            Err(Error::RetryPending)
        ));
    }

    #[tokio::test]
    async fn test_retry_window_admits_probe_after_timeout() {
        let client = RpcClient::new(
            "http://127.0.0.1:9/_",
            Duration::from_millis(10),
        )
        .unwrap();

        client.note_network_error();
        tokio::time::sleep(Duration::from_millis(20)).await;
        client.check_retry_window().unwrap();
    }

    #[tokio::test]
    async fn test_success_clears_window() {
        let client = RpcClient::new(
            "http://127.0.0.1:9/_",
            Duration::from_secs(60),
        )
        .unwrap();

        client.note_network_error();
        client.note_success();
        client.check_retry_window().unwrap();
    }
}
