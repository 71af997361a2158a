//! HTTP client for the relay control protocol.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use relaycast_ipc::{mac_decode, BroadcastConfig, BroadcastStore, EngineSettings};
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use tokio::runtime::Runtime;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::error::ForwardError;
use crate::pairing::BroadcastPair;
use crate::retry::RetryPolicy;
use crate::{ForwardResult, ForwardingService, CONTROL_PATH, SLATE_FIELD, SLATE_PATH};

/// What the relay should output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayStatus {
    /// Forward the live feed.
    Play,

    /// Show the placeholder.
    Slate,
}

/// Body of a control request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlRequest {
    /// Camera MAC as `AA:BB:CC:DD:EE:FF`.
    #[serde(rename = "MAC")]
    pub mac: String,

    /// Requested output.
    #[serde(rename = "Status")]
    pub status: RelayStatus,

    /// Primary then secondary RTMP destination.
    #[serde(rename = "URLs")]
    pub urls: Vec<String>,
}

/// Relay client with a synchronous API over an owned async runtime.
pub struct RelayClient {
    store: Arc<dyn BroadcastStore>,
    http: reqwest::Client,
    runtime: Runtime,
    rtmp_base: String,
    policy: RetryPolicy,
}

impl RelayClient {
    /// Create a client resolving pairs through `store`.
    pub fn new(store: Arc<dyn BroadcastStore>, settings: &EngineSettings) -> ForwardResult<Self> {
        Self::with_timeout(store, settings, settings.control_timeout())
    }

    /// Create a client with an explicit per-request timeout.
    pub fn with_timeout(
        store: Arc<dyn BroadcastStore>,
        settings: &EngineSettings,
        timeout: Duration,
    ) -> ForwardResult<Self> {
        let runtime = Runtime::new()?;
        let http = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            store,
            http,
            runtime,
            rtmp_base: settings.rtmp_base.clone(),
            policy: RetryPolicy::from_settings(settings),
        })
    }

    /// Replace the retry policy.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Resolves the pair of `config` and builds the request for `status`.
    /// The request goes to the relay named by `config` itself; the pair only
    /// supplies the camera MAC and the destinations.
    pub fn control_request(
        &self,
        config: &BroadcastConfig,
        status: RelayStatus,
    ) -> ForwardResult<(Url, ControlRequest)> {
        let pair = BroadcastPair::resolve(self.store.as_ref(), config)?;
        let urls = pair.destinations(&self.rtmp_base)?;
        let url = relay_url(&config.relay_host, CONTROL_PATH)?;

        let request = ControlRequest {
            mac: mac_decode(pair.primary.camera_mac),
            status,
            urls,
        };
        Ok((url, request))
    }

    #[instrument(name = "relay_control", skip(self, config), fields(broadcast = %config.id))]
    fn control(&self, config: &BroadcastConfig, status: RelayStatus) -> ForwardResult<()> {
        let (url, request) = self.control_request(config, status)?;
        info!(%url, ?status, "Sending relay control request");
        self.send_with_retry(url, &request)
    }

    fn send_with_retry(&self, url: Url, request: &ControlRequest) -> ForwardResult<()> {
        self.runtime.block_on(async {
            let mut attempt = 0;
            loop {
                attempt += 1;
                match self.http.post(url.clone()).json(request).send().await {
                    Ok(response) => {
                        let status = response.status();
                        if status.is_success() {
                            debug!(attempt, "Relay accepted control request");
                        } else {
                            warn!(attempt, %status, "Relay answered control request with an error status");
                        }
                        return Ok(());
                    }
                    Err(e) if self.policy.should_retry(attempt) => {
                        let delay = self.policy.delay_for_attempt(attempt);
                        warn!(attempt, error = %e, ?delay, "Relay request failed, retrying");
                        tokio::time::sleep(delay).await;
                    }
                    Err(e) => {
                        return Err(ForwardError::RetriesExhausted {
                            attempts: attempt,
                            last: e.to_string(),
                        });
                    }
                }
            }
        })
    }
}

impl ForwardingService for RelayClient {
    fn stream(&self, config: &BroadcastConfig) -> ForwardResult<()> {
        self.control(config, RelayStatus::Play)
    }

    fn slate(&self, config: &BroadcastConfig) -> ForwardResult<()> {
        self.control(config, RelayStatus::Slate)
    }

    #[instrument(name = "relay_upload_slate", skip(self, config, data), fields(broadcast = %config.id, bytes = data.len()))]
    fn upload_slate(&self, config: &BroadcastConfig, name: &str, data: Bytes) -> ForwardResult<()> {
        let url = relay_url(&config.relay_host, SLATE_PATH)?;

        // The form is encoded in full, closing boundary included, before it is sent.
        let part = Part::bytes(data.to_vec()).file_name(name.to_string());
        let form = Form::new().part(SLATE_FIELD, part);

        info!(%url, "Uploading slate");
        let response = self
            .runtime
            .block_on(self.http.post(url).multipart(form).send())?;

        if !response.status().is_success() {
            warn!(status = %response.status(), "Relay answered slate upload with an error status");
        }
        Ok(())
    }
}

fn relay_url(host: &str, path: &str) -> ForwardResult<Url> {
    let host = host.trim();
    if host.is_empty() {
        return Err(ForwardError::InvalidRelayHost(host.to_string()));
    }

    Url::parse(&format!("http://{host}/"))
        .and_then(|base| base.join(path))
        .map_err(|_| ForwardError::InvalidRelayHost(host.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaycast_ipc::MemoryStore;
    use wiremock::matchers::{body_json, header_regex, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const CAMERA_MAC: u64 = 0x0A1B_2C3D_4E5F;

    fn store(relay_host: &str) -> Arc<MemoryStore> {
        let primary = BroadcastConfig {
            id: "p".to_string(),
            site_key: 3,
            name: "Reef-Cam".to_string(),
            camera_mac: CAMERA_MAC,
            rtmp_key: "aaaa-1111".to_string(),
            relay_host: relay_host.to_string(),
            ..Default::default()
        };
        let secondary = BroadcastConfig {
            id: "s".to_string(),
            site_key: 3,
            name: "Reef-Cam (secondary)".to_string(),
            camera_mac: 0x0102_0304_0506,
            rtmp_key: "bbbb-2222".to_string(),
            relay_host: relay_host.to_string(),
            ..Default::default()
        };
        Arc::new(MemoryStore::with_records([primary, secondary]))
    }

    fn settings() -> EngineSettings {
        EngineSettings {
            rtmp_base: "rtmp://relay.example/live2/".to_string(),
            ..Default::default()
        }
    }

    fn client(store: Arc<MemoryStore>, timeout: Duration) -> RelayClient {
        RelayClient::with_timeout(store, &settings(), timeout)
            .unwrap()
            .with_retry_policy(RetryPolicy::immediate(3))
    }

    fn expected_body(status: &str) -> serde_json::Value {
        serde_json::json!({
            "MAC": "0A:1B:2C:3D:4E:5F",
            "Status": status,
            "URLs": [
                "rtmp://relay.example/live2/aaaa-1111",
                "rtmp://relay.example/live2/bbbb-2222",
            ],
        })
    }

    #[test]
    fn test_control_request_same_for_either_half() {
        let store = store("relay.local:8080");
        let relay = client(store.clone(), Duration::from_secs(1));

        let primary = store.get("p").unwrap();
        let secondary = store.get("s").unwrap();
        let (url, from_primary) = relay.control_request(&primary, RelayStatus::Play).unwrap();
        let (_, from_secondary) = relay.control_request(&secondary, RelayStatus::Play).unwrap();

        assert_eq!(url.as_str(), "http://relay.local:8080/control");
        assert_eq!(from_primary, from_secondary);
        assert_eq!(serde_json::to_value(&from_primary).unwrap(), expected_body("play"));
    }

    #[test]
    fn test_control_request_sent_to_own_relay() {
        let store = store("primary-relay:8080");
        let mut secondary = store.get("s").unwrap();
        secondary.relay_host = "secondary-relay:9090".to_string();
        store.put(&secondary).unwrap();
        let relay = client(store.clone(), Duration::from_secs(1));

        let (primary_url, from_primary) = relay
            .control_request(&store.get("p").unwrap(), RelayStatus::Play)
            .unwrap();
        let (secondary_url, from_secondary) =
            relay.control_request(&secondary, RelayStatus::Play).unwrap();

        assert_eq!(primary_url.as_str(), "http://primary-relay:8080/control");
        assert_eq!(secondary_url.host_str(), Some("secondary-relay"));
        assert_eq!(secondary_url.port(), Some(9090));
        assert_eq!(from_primary, from_secondary);
    }

    #[test]
    fn test_stream_and_slate_post_control() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let server = rt.block_on(MockServer::start());
        rt.block_on(
            Mock::given(method("POST"))
                .and(path("/control"))
                .and(body_json(expected_body("play")))
                .respond_with(ResponseTemplate::new(200))
                .expect(1)
                .mount(&server),
        );
        rt.block_on(
            Mock::given(method("POST"))
                .and(path("/control"))
                .and(body_json(expected_body("slate")))
                .respond_with(ResponseTemplate::new(200))
                .expect(1)
                .mount(&server),
        );

        let store = store(&server.address().to_string());
        let relay = client(store.clone(), Duration::from_secs(5));

        relay.stream(&store.get("p").unwrap()).unwrap();
        relay.slate(&store.get("s").unwrap()).unwrap();

        rt.block_on(server.verify());
    }

    #[test]
    fn test_error_status_still_counts_as_delivered() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let server = rt.block_on(MockServer::start());
        rt.block_on(
            Mock::given(method("POST"))
                .and(path("/control"))
                .respond_with(ResponseTemplate::new(500))
                .expect(1)
                .mount(&server),
        );

        let store = store(&server.address().to_string());
        let relay = client(store.clone(), Duration::from_secs(5));

        assert!(relay.stream(&store.get("p").unwrap()).is_ok());
        rt.block_on(server.verify());
    }

    #[test]
    fn test_transport_failures_retried_three_times() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let server = rt.block_on(MockServer::start());
        rt.block_on(
            Mock::given(method("POST"))
                .and(path("/control"))
                .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
                .expect(3)
                .mount(&server),
        );

        let store = store(&server.address().to_string());
        let relay = client(store.clone(), Duration::from_millis(100));

        let err = relay.stream(&store.get("p").unwrap()).unwrap_err();
        assert!(matches!(err, ForwardError::RetriesExhausted { attempts: 3, .. }));
        assert!(!err.is_configuration());
        rt.block_on(server.verify());
    }

    #[test]
    fn test_unreachable_relay_fails() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();
        drop(listener);

        let store = store(&address.to_string());
        let relay = client(store.clone(), Duration::from_secs(1));

        assert!(matches!(
            relay.slate(&store.get("p").unwrap()),
            Err(ForwardError::RetriesExhausted { attempts: 3, .. })
        ));
    }

    #[test]
    fn test_missing_relay_host_is_configuration_error() {
        let store = store("");
        let relay = client(store.clone(), Duration::from_secs(1));

        let err = relay.stream(&store.get("p").unwrap()).unwrap_err();
        assert!(matches!(err, ForwardError::InvalidRelayHost(_)));
        assert!(err.is_configuration());
    }

    #[test]
    fn test_upload_slate_sends_multipart_file() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let server = rt.block_on(MockServer::start());
        rt.block_on(
            Mock::given(method("POST"))
                .and(path("/slate"))
                .and(header_regex("content-type", "^multipart/form-data; boundary="))
                .respond_with(ResponseTemplate::new(200))
                .expect(1)
                .mount(&server),
        );

        let store = store(&server.address().to_string());
        let relay = client(store.clone(), Duration::from_secs(5));

        relay
            .upload_slate(
                &store.get("p").unwrap(),
                "reef-slate.mp4",
                Bytes::from_static(b"slate-bytes"),
            )
            .unwrap();

        let requests = rt.block_on(server.received_requests()).unwrap();
        let body = String::from_utf8_lossy(&requests[0].body).to_string();
        assert!(body.contains("name=\"slate-file\""));
        assert!(body.contains("filename=\"reef-slate.mp4\""));
        assert!(body.contains("slate-bytes"));
        assert!(body.trim_end().ends_with("--"));
        rt.block_on(server.verify());
    }
}
