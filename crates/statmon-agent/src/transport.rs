use crate::error::TransportError;
use async_trait::async_trait;
use reqwest::header::{HeaderValue, CONTENT_TYPE};
use statmon_common::crypto::PayloadEncryptor;
use statmon_common::proto::metrics_client::MetricsClient;
use statmon_common::proto::{BulkSaveRequest, MetricRecord};
use statmon_common::types::Metric;
use std::time::Duration;
use tonic::metadata::{Ascii, MetadataValue};
use tonic::transport::{Channel, Endpoint};

/// Header carrying the agent's advertised address; the server's trusted
/// subnet check reads it.
pub const REAL_IP_HEADER: &str = "X-Real-IP";

/// gRPC metadata entry with the same role as [`REAL_IP_HEADER`].
pub const IP_METADATA_KEY: &str = "ip";

/// Delivers one batch to the server. A returned error means the whole batch
/// was not accepted.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn deliver(&self, batch: &[Metric]) -> Result<(), TransportError>;
}

/// `POST {base}/updates/` with a JSON array body, RSA-encrypted and sent as
/// `application/octet-stream` when an encryptor is configured.
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
    real_ip: Option<HeaderValue>,
    encryptor: Option<PayloadEncryptor>,
}

/// Builds the base URL from a configured address, defaulting to `http://`.
pub fn base_url(address: &str) -> String {
    let addr = address.trim().trim_end_matches('/');
    if addr.contains("://") {
        addr.to_string()
    } else {
        format!("http://{addr}")
    }
}

/// Picks the address to advertise: the configured override, else the first
/// non-loopback local address.
pub fn detect_real_ip(configured: Option<&str>) -> Option<String> {
    if let Some(ip) = configured.filter(|ip| !ip.trim().is_empty()) {
        return Some(ip.trim().to_string());
    }
    match local_ip_address::local_ip() {
        Ok(ip) => Some(ip.to_string()),
        Err(e) => {
            tracing::warn!(error = %e, "Could not detect local IP, sending without X-Real-IP");
            None
        }
    }
}

impl HttpTransport {
    pub fn new(
        address: &str,
        real_ip: Option<String>,
        encryptor: Option<PayloadEncryptor>,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let real_ip = match real_ip {
            Some(ip) => Some(
                HeaderValue::from_str(&ip)
                    .map_err(|_| TransportError::Other(format!("invalid agent address {ip:?}")))?,
            ),
            None => None,
        };
        Ok(Self {
            client,
            url: format!("{}/updates/", base_url(address)),
            real_ip,
            encryptor,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn deliver(&self, batch: &[Metric]) -> Result<(), TransportError> {
        let json = serde_json::to_vec(batch)?;
        let (body, content_type) = match &self.encryptor {
            Some(enc) => (enc.encrypt(&json)?, "application/octet-stream"),
            None => (json, "application/json"),
        };

        let mut req = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, content_type)
            .body(body);
        if let Some(ip) = &self.real_ip {
            req = req.header(REAL_IP_HEADER, ip.clone());
        }

        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(TransportError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        tracing::debug!(count = batch.len(), "Batch delivered");
        Ok(())
    }
}

/// Unary `statmon.Metrics/BulkSaveMetrics` calls over a lazily connected
/// channel. Payloads are not encrypted on this path.
pub struct GrpcTransport {
    client: MetricsClient<Channel>,
    endpoint: String,
    real_ip: Option<MetadataValue<Ascii>>,
}

impl GrpcTransport {
    pub fn new(
        address: &str,
        real_ip: Option<String>,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let real_ip = match real_ip {
            Some(ip) => Some(
                ip.parse()
                    .map_err(|_| TransportError::Other(format!("invalid agent address {ip:?}")))?,
            ),
            None => None,
        };
        let endpoint = base_url(address);
        // Must be called inside a Tokio runtime: the channel spawns its worker.
        let channel = Endpoint::from_shared(endpoint.clone())?
            .timeout(timeout)
            .connect_timeout(timeout)
            .connect_lazy();
        Ok(Self {
            client: MetricsClient::new(channel),
            endpoint,
            real_ip,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Transport for GrpcTransport {
    async fn deliver(&self, batch: &[Metric]) -> Result<(), TransportError> {
        let mut request = tonic::Request::new(BulkSaveRequest {
            metrics: batch.iter().map(MetricRecord::from).collect(),
        });
        if let Some(ip) = &self.real_ip {
            request.metadata_mut().insert(IP_METADATA_KEY, ip.clone());
        }
        let reply = self.client.clone().bulk_save_metrics(request).await?;
        tracing::debug!(
            count = batch.len(),
            gauges = reply.get_ref().gauges,
            counters = reply.get_ref().counters,
            "Batch delivered over gRPC"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url() {
        assert_eq!(base_url("127.0.0.1:8080"), "http://127.0.0.1:8080");
        assert_eq!(base_url("https://metrics.local/"), "https://metrics.local");
    }

    #[test]
    fn test_configured_ip_wins() {
        assert_eq!(
            detect_real_ip(Some(" 10.0.0.5 ")).as_deref(),
            Some("10.0.0.5")
        );
    }

    #[test]
    fn test_rejects_unusable_header_value() {
        let err = HttpTransport::new(
            "127.0.0.1:8080",
            Some("bad\nvalue".to_string()),
            None,
            Duration::from_secs(1),
        );
        assert!(matches!(err, Err(TransportError::Other(_))));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_an_error() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let addr = format!("127.0.0.1:{port}");
        let t = HttpTransport::new(&addr, None, None, Duration::from_secs(2)).unwrap();
        assert_eq!(t.url(), format!("http://{addr}/updates/"));
        let err = t.deliver(&[Metric::gauge("Alloc", 1.0)]).await.unwrap_err();
        assert!(matches!(err, TransportError::Http(_)));
    }

    #[test]
    fn test_grpc_rejects_unusable_metadata() {
        let err = GrpcTransport::new(
            "127.0.0.1:3200",
            Some("bad\nvalue".to_string()),
            Duration::from_secs(1),
        );
        assert!(matches!(err, Err(TransportError::Other(_))));
    }

    #[tokio::test]
    async fn test_grpc_unreachable_server_is_an_error() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let t = GrpcTransport::new(&format!("127.0.0.1:{port}"), None, Duration::from_secs(2))
            .unwrap();
        assert_eq!(t.endpoint(), format!("http://127.0.0.1:{port}"));
        let err = t.deliver(&[Metric::counter("PollCount", 1)]).await.unwrap_err();
        assert!(matches!(err, TransportError::Grpc(_)));
    }
}
