//! gRPC form of bulk ingestion: `statmon.Metrics/BulkSaveMetrics`.
//!
//! Shares verification, folding and the store with `POST /updates/`. The
//! trusted-subnet check runs as an interceptor on the `ip` metadata entry,
//! before the request body is decoded.

use crate::access::AccessGuard;
use crate::api::apply_batch;
use crate::error::AppError;
use crate::state::AppState;
use statmon_common::proto::metrics_server::{Metrics, MetricsServer};
use statmon_common::proto::{BulkSaveRequest, BulkSaveResponse};
use statmon_common::types::Metric;
use std::sync::Arc;
use tonic::codegen::InterceptedService;
use tonic::service::Interceptor;
use tonic::{Request, Response, Status};

/// Metadata key carrying the agent's advertised address.
pub const IP_METADATA_KEY: &str = "ip";

pub struct MetricsService {
    state: AppState,
}

impl MetricsService {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }
}

#[tonic::async_trait]
impl Metrics for MetricsService {
    async fn bulk_save_metrics(
        &self,
        request: Request<BulkSaveRequest>,
    ) -> Result<Response<BulkSaveResponse>, Status> {
        let records = request.into_inner().metrics;
        let metrics = records
            .into_iter()
            .map(Metric::try_from)
            .collect::<Result<Vec<_>, _>>()
            .map_err(AppError::from)?;

        let summary = apply_batch(&self.state, &metrics).map_err(|e| {
            if e.status().is_server_error() {
                tracing::error!(error = %e, "gRPC batch failed");
            } else {
                tracing::warn!(error = %e, "gRPC batch rejected");
            }
            Status::from(e)
        })?;
        tracing::debug!(
            gauges = summary.gauges,
            counters = summary.counters,
            "gRPC batch applied"
        );
        Ok(Response::new(BulkSaveResponse {
            gauges: u32::try_from(summary.gauges).unwrap_or(u32::MAX),
            counters: u32::try_from(summary.counters).unwrap_or(u32::MAX),
        }))
    }
}

/// Rejects calls whose `ip` metadata falls outside the trusted subnet.
#[derive(Clone)]
pub struct SubnetInterceptor {
    guard: Arc<AccessGuard>,
}

impl SubnetInterceptor {
    pub fn new(guard: Arc<AccessGuard>) -> Self {
        Self { guard }
    }
}

impl Interceptor for SubnetInterceptor {
    fn call(&mut self, request: Request<()>) -> Result<Request<()>, Status> {
        let ip = request
            .metadata()
            .get(IP_METADATA_KEY)
            .and_then(|v| v.to_str().ok());
        if let Err(denied) = self.guard.check(ip) {
            tracing::warn!(reason = %denied, "gRPC call rejected by trusted subnet");
            return Err(AppError::from(denied).into());
        }
        Ok(request)
    }
}

/// The service as mounted on the server, guard included.
pub fn metrics_service(
    state: AppState,
) -> InterceptedService<MetricsServer<MetricsService>, SubnetInterceptor> {
    let interceptor = SubnetInterceptor::new(state.guard.clone());
    MetricsServer::with_interceptor(MetricsService::new(state), interceptor)
}
