use crate::access::AccessGuard;
use chrono::{DateTime, Utc};
use statmon_common::crypto::PayloadDecryptor;
use statmon_common::sign::Signer;
use statmon_storage::MetricStore;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn MetricStore>,
    pub signer: Arc<Signer>,
    /// Present when payload encryption is configured.
    pub decryptor: Option<Arc<PayloadDecryptor>>,
    pub guard: Arc<AccessGuard>,
    pub start_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(store: Arc<dyn MetricStore>, signer: Signer, guard: AccessGuard) -> Self {
        Self {
            store,
            signer: Arc::new(signer),
            decryptor: None,
            guard: Arc::new(guard),
            start_time: Utc::now(),
        }
    }

    pub fn with_decryptor(mut self, decryptor: PayloadDecryptor) -> Self {
        self.decryptor = Some(Arc::new(decryptor));
        self
    }
}
