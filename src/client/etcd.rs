//! etcd v3 client over the JSON gateway.
//!
//! # Responsibilities
//! - Range reads (`POST /v3/kv/range`) for point and subtree reads
//! - Streaming watch (`POST /v3/watch`, newline-delimited JSON)
//! - Endpoint failover with health quarantine (endpoint.rs)
//!
//! # Wire Notes
//! - Keys and values are base64 encoded
//! - 64-bit integers arrive as JSON strings; numbers are accepted too
//! - An unparseable header revision decodes as `None`, not as an error

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures_util::StreamExt;
use serde::{Deserialize, Deserializer};
use serde_json::json;
use url::Url;

use crate::client::endpoint::{Endpoint, EndpointPool};
use crate::client::{
    prefix_range_end, ClientFactory, ConfigClient, EventKind, KeyValue, ReadResponse, Revision,
    WatchEvent, WatchMessage, WatchResponse, WatchStream,
};
use crate::config::StoreConfig;
use crate::error::ClientError;

/// etcd client with round-robin endpoint failover.
pub struct EtcdClient {
    http: reqwest::Client,
    pool: EndpointPool,
    request_timeout: Duration,
}

impl EtcdClient {
    /// Create a new client from the store configuration.
    pub fn new(config: &StoreConfig) -> Result<Self, ClientError> {
        let mut urls = Vec::with_capacity(config.endpoints.len());
        for raw in &config.endpoints {
            let url = Url::parse(raw)
                .map_err(|e| ClientError::Transport(format!("invalid endpoint '{}': {}", raw, e)))?;
            urls.push(url);
        }

        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.request_timeout_secs.clamp(1, 5)))
            .build()
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            pool: EndpointPool::new(
                urls,
                config.unhealthy_threshold as usize,
                Duration::from_secs(config.health_check_timeout_secs),
            ),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
        })
    }

    async fn post(
        &self,
        path: &str,
        body: &serde_json::Value,
        timeout: Duration,
    ) -> Result<reqwest::Response, ClientError> {
        let endpoint = self.pool.next_endpoint().ok_or(ClientError::NoHealthyEndpoint)?;
        let url = endpoint
            .url
            .join(path)
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        match self.http.post(url).json(body).timeout(timeout).send().await {
            Ok(resp) if resp.status().is_success() => {
                endpoint.mark_success();
                Ok(resp)
            }
            Ok(resp) => {
                let code = resp.status().as_u16();
                if resp.status().is_server_error() {
                    self.pool.report_failure(&endpoint);
                }
                let message = resp.text().await.unwrap_or_default();
                Err(ClientError::Status { code, message })
            }
            Err(e) => Err(self.transport_failure(&endpoint, e)),
        }
    }

    fn transport_failure(&self, endpoint: &Endpoint, err: reqwest::Error) -> ClientError {
        tracing::debug!(endpoint = %endpoint.url, error = %err, "Store request failed");
        self.pool.report_failure(endpoint);
        map_reqwest_error(&err)
    }

    async fn range(&self, key: &str, range_end: Option<Vec<u8>>) -> Result<ReadResponse, ClientError> {
        let mut body = json!({ "key": STANDARD.encode(key) });
        if let Some(end) = range_end {
            body["range_end"] = json!(STANDARD.encode(end));
        }

        let resp = self.post("/v3/kv/range", &body, self.request_timeout).await?;
        let bytes = resp.bytes().await.map_err(|e| map_reqwest_error(&e))?;
        decode_range(&bytes)
    }
}

#[async_trait]
impl ConfigClient for EtcdClient {
    async fn read(&self, key: &str) -> Result<ReadResponse, ClientError> {
        self.range(key, None).await
    }

    async fn readdir(&self, key: &str) -> Result<ReadResponse, ClientError> {
        self.range(key, Some(prefix_range_end(key))).await
    }

    async fn watch(
        &self,
        prefix: &str,
        from_revision: Revision,
        timeout: Duration,
    ) -> Result<WatchStream, ClientError> {
        let body = json!({
            "create_request": {
                "key": STANDARD.encode(prefix),
                "range_end": STANDARD.encode(prefix_range_end(prefix)),
                "start_revision": from_revision.to_string(),
            }
        });

        let resp = self.post("/v3/watch", &body, timeout).await?;
        Ok(decode_watch_body(resp))
    }
}

/// Builds [`EtcdClient`]s from configuration.
pub struct EtcdClientFactory {
    config: StoreConfig,
}

impl EtcdClientFactory {
    pub fn new(config: StoreConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ClientFactory for EtcdClientFactory {
    async fn connect(&self) -> Result<Arc<dyn ConfigClient>, ClientError> {
        let client = EtcdClient::new(&self.config)?;
        Ok(Arc::new(client) as Arc<dyn ConfigClient>)
    }
}

fn map_reqwest_error(err: &reqwest::Error) -> ClientError {
    if err.is_timeout() {
        ClientError::Timeout
    } else if err.is_decode() {
        ClientError::Decode(err.to_string())
    } else {
        ClientError::Transport(err.to_string())
    }
}

/// Split the chunked watch body into newline-delimited responses.
fn decode_watch_body(resp: reqwest::Response) -> WatchStream {
    let body = Box::pin(resp.bytes_stream());
    let stream = futures_util::stream::unfold(
        (body, Vec::<u8>::new(), false),
        |(mut body, mut buf, mut done)| async move {
            loop {
                if let Some(pos) = buf.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = buf.drain(..=pos).collect();
                    if line.iter().all(u8::is_ascii_whitespace) {
                        continue;
                    }
                    return Some((decode_watch_line(&line), (body, buf, done)));
                }
                if done {
                    if buf.iter().all(u8::is_ascii_whitespace) {
                        return None;
                    }
                    let line = std::mem::take(&mut buf);
                    return Some((decode_watch_line(&line), (body, buf, done)));
                }
                match body.next().await {
                    Some(Ok(chunk)) => buf.extend_from_slice(&chunk),
                    Some(Err(e)) => {
                        buf.clear();
                        return Some((Err(map_reqwest_error(&e)), (body, buf, true)));
                    }
                    None => done = true,
                }
            }
        },
    );
    Box::pin(stream)
}

#[derive(Debug, Deserialize)]
struct RawHeader {
    #[serde(default, deserialize_with = "lenient_opt_i64")]
    revision: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RawKv {
    #[serde(default)]
    key: String,
    #[serde(default)]
    value: String,
    #[serde(default, deserialize_with = "lenient_i64")]
    create_revision: i64,
    #[serde(default, deserialize_with = "lenient_i64")]
    mod_revision: i64,
}

#[derive(Debug, Deserialize)]
struct RawRange {
    header: Option<RawHeader>,
    #[serde(default)]
    kvs: Vec<RawKv>,
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    #[serde(default, rename = "type")]
    kind: Option<String>,
    kv: RawKv,
}

#[derive(Debug, Deserialize)]
struct RawWatchResult {
    header: Option<RawHeader>,
    #[serde(default)]
    created: bool,
    #[serde(default)]
    canceled: bool,
    #[serde(default, deserialize_with = "lenient_opt_i64")]
    compact_revision: Option<i64>,
    #[serde(default)]
    cancel_reason: Option<String>,
    #[serde(default)]
    events: Vec<RawEvent>,
}

#[derive(Debug, Deserialize)]
struct RawGatewayError {
    #[serde(default)]
    http_code: Option<u16>,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct RawWatchEnvelope {
    result: Option<RawWatchResult>,
    error: Option<RawGatewayError>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawInt {
    Num(i64),
    Str(String),
}

fn lenient_i64<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
    match RawInt::deserialize(d)? {
        RawInt::Num(n) => Ok(n),
        RawInt::Str(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

fn lenient_opt_i64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
    Ok(match Option::<RawInt>::deserialize(d)? {
        Some(RawInt::Num(n)) => Some(n),
        Some(RawInt::Str(s)) => s.parse().ok(),
        None => None,
    })
}

fn decode_kv(raw: RawKv) -> Result<KeyValue, ClientError> {
    let key = STANDARD
        .decode(&raw.key)
        .map_err(|e| ClientError::Decode(format!("key: {}", e)))?;
    let key = String::from_utf8(key).map_err(|e| ClientError::Decode(format!("key: {}", e)))?;
    let value = STANDARD
        .decode(&raw.value)
        .map_err(|e| ClientError::Decode(format!("value of {}: {}", key, e)))?;

    Ok(KeyValue {
        key,
        value,
        create_revision: raw.create_revision,
        mod_revision: raw.mod_revision,
    })
}

fn decode_range(bytes: &[u8]) -> Result<ReadResponse, ClientError> {
    let raw: RawRange =
        serde_json::from_slice(bytes).map_err(|e| ClientError::Decode(e.to_string()))?;
    let revision = raw
        .header
        .and_then(|h| h.revision)
        .ok_or_else(|| ClientError::Decode("range response without header revision".into()))?;

    let kvs = raw.kvs.into_iter().map(decode_kv).collect::<Result<Vec<_>, _>>()?;
    Ok(ReadResponse { revision, kvs })
}

fn decode_watch_line(line: &[u8]) -> Result<WatchResponse, ClientError> {
    let envelope: RawWatchEnvelope =
        serde_json::from_slice(line).map_err(|e| ClientError::Decode(e.to_string()))?;

    if let Some(err) = envelope.error {
        return Err(ClientError::Status {
            code: err.http_code.unwrap_or(500),
            message: err.message,
        });
    }

    let result = envelope
        .result
        .ok_or_else(|| ClientError::Decode("watch response without result".into()))?;
    let revision = result.header.as_ref().and_then(|h| h.revision);

    let message = if result.created {
        WatchMessage::Created
    } else if result.canceled {
        WatchMessage::Canceled {
            compact_revision: result.compact_revision.filter(|r| *r > 0),
            reason: result.cancel_reason,
        }
    } else {
        let mut events = Vec::with_capacity(result.events.len());
        for raw in result.events {
            let kind = match raw.kind.as_deref() {
                Some("DELETE") => EventKind::Delete,
                _ => EventKind::Put,
            };
            events.push(WatchEvent {
                kind,
                kv: decode_kv(raw.kv)?,
            });
        }
        WatchMessage::Events(events)
    };

    Ok(WatchResponse { revision, message })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b64(s: &str) -> String {
        STANDARD.encode(s)
    }

    #[test]
    fn test_decode_range() {
        let body = format!(
            r#"{{"header":{{"revision":"5"}},"kvs":[{{"key":"{}","value":"{}","create_revision":"4","mod_revision":5}}],"count":"1"}}"#,
            b64("/apisix/routes/1"),
            b64(r#"{"uri":"/a"}"#),
        );
        let resp = decode_range(body.as_bytes()).unwrap();
        assert_eq!(resp.revision, 5);
        assert_eq!(resp.kvs.len(), 1);
        assert_eq!(resp.kvs[0].key, "/apisix/routes/1");
        assert_eq!(resp.kvs[0].create_revision, 4);
        assert_eq!(resp.kvs[0].mod_revision, 5);
        assert_eq!(resp.kvs[0].value, br#"{"uri":"/a"}"#.to_vec());
    }

    #[test]
    fn test_decode_empty_range() {
        let resp = decode_range(br#"{"header":{"revision":"9"}}"#).unwrap();
        assert_eq!(resp.revision, 9);
        assert!(resp.kvs.is_empty());

        let err = decode_range(br#"{"kvs":[]}"#).unwrap_err();
        assert!(matches!(err, ClientError::Decode(_)));
    }

    #[test]
    fn test_decode_watch_created() {
        let resp = decode_watch_line(br#"{"result":{"header":{"revision":"7"},"created":true}}"#).unwrap();
        assert_eq!(resp.revision, Some(7));
        assert_eq!(resp.message, WatchMessage::Created);
    }

    #[test]
    fn test_decode_watch_events() {
        let line = format!(
            r#"{{"result":{{"header":{{"revision":"8"}},"events":[{{"kv":{{"key":"{}","value":"{}","mod_revision":"8"}}}},{{"type":"DELETE","kv":{{"key":"{}","mod_revision":"8"}}}}]}}}}"#,
            b64("/apisix/routes/1"),
            b64("{}"),
            b64("/apisix/routes/2"),
        );
        let resp = decode_watch_line(line.as_bytes()).unwrap();
        assert_eq!(resp.revision, Some(8));
        match resp.message {
            WatchMessage::Events(events) => {
                assert_eq!(events.len(), 2);
                assert_eq!(events[0].kind, EventKind::Put);
                assert_eq!(events[1].kind, EventKind::Delete);
                assert_eq!(events[1].kv.key, "/apisix/routes/2");
                assert!(events[1].kv.value.is_empty());
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn test_decode_watch_compacted() {
        let resp = decode_watch_line(
            br#"{"result":{"header":{"revision":"20"},"canceled":true,"compact_revision":"12"}}"#,
        )
        .unwrap();
        assert_eq!(
            resp.message,
            WatchMessage::Canceled {
                compact_revision: Some(12),
                reason: None
            }
        );
    }

    #[test]
    fn test_unparseable_revision_is_none() {
        let resp = decode_watch_line(br#"{"result":{"header":{"revision":"abc"},"events":[]}}"#).unwrap();
        assert_eq!(resp.revision, None);

        let resp = decode_watch_line(br#"{"result":{"events":[]}}"#).unwrap();
        assert_eq!(resp.revision, None);
    }

    #[test]
    fn test_gateway_error() {
        let err = decode_watch_line(br#"{"error":{"grpc_code":14,"http_code":503,"message":"unavailable"}}"#)
            .unwrap_err();
        assert_eq!(
            err,
            ClientError::Status {
                code: 503,
                message: "unavailable".into()
            }
        );
    }

    #[test]
    fn test_client_rejects_bad_endpoint() {
        let config = StoreConfig {
            endpoints: vec!["not a url".into()],
            ..StoreConfig::default()
        };
        assert!(EtcdClient::new(&config).is_err());
    }
}
