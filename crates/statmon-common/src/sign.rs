//! HMAC-SHA256 integrity tags over a metric's canonical string form.
//!
//! The canonical form is `"{name}:gauge:{value}"` with the value printed to
//! six decimal places, or `"{name}:counter:{delta}"`. Tags travel as
//! lowercase hex.
//!
//! # Empty secret
//!
//! A [`Signer`] built from an empty secret is *disabled*: [`Signer::sign`]
//! returns `None` and [`Signer::verify`] accepts every input, including an
//! absent or garbage tag. A server started without a key therefore accepts
//! unauthenticated metrics from anyone who can reach it (subject only to the
//! trusted-subnet check). Configure a key for any deployment reachable from
//! an untrusted network.

use crate::types::{Metric, MetricValue};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone, Default)]
pub struct Signer {
    key: Vec<u8>,
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

/// Builds the string both sides feed into the MAC.
pub fn canonical(name: &str, value: &MetricValue) -> String {
    match value {
        MetricValue::Gauge(v) => format!("{name}:gauge:{v:.6}"),
        MetricValue::Counter(d) => format!("{name}:counter:{d}"),
    }
}

impl Signer {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            key: secret.as_ref().to_vec(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.key.is_empty()
    }

    fn mac(&self, name: &str, value: &MetricValue) -> Option<HmacSha256> {
        if !self.is_enabled() {
            return None;
        }
        let mut mac = HmacSha256::new_from_slice(&self.key).ok()?;
        mac.update(canonical(name, value).as_bytes());
        Some(mac)
    }

    /// Returns the hex tag, or `None` when signing is disabled.
    pub fn sign(&self, name: &str, value: &MetricValue) -> Option<String> {
        self.mac(name, value)
            .map(|mac| hex::encode(mac.finalize().into_bytes()))
    }

    /// Attaches a tag to `metric` (clearing any stale one when disabled).
    pub fn sign_metric(&self, mut metric: Metric) -> Metric {
        metric.hash = self.sign(&metric.id, &metric.value);
        metric
    }

    /// Constant-time check of `tag` against the recomputed MAC.
    ///
    /// Always `true` when the secret is empty; see the module docs.
    pub fn verify(&self, name: &str, value: &MetricValue, tag: Option<&str>) -> bool {
        if !self.is_enabled() {
            return true;
        }
        let Some(tag) = tag else {
            return false;
        };
        let Ok(expected) = hex::decode(tag) else {
            return false;
        };
        match self.mac(name, value) {
            Some(mac) => mac.verify_slice(&expected).is_ok(),
            None => false,
        }
    }

    pub fn verify_metric(&self, metric: &Metric) -> bool {
        self.verify(&metric.id, &metric.value, metric.hash.as_deref())
    }
}
