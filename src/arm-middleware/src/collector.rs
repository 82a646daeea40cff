// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Receives request telemetry.

use crate::arm_error::ArmError;
use crate::connection::{ConnectionTiming, ConnectionTracer};
use crate::pipeline::{RequestHead, Response};
use crate::resource_id::ResourceIdentity;
use std::sync::Arc;
use std::time::Duration;

/// Describes a request attempt, as seen by the metrics policy.
#[derive(Clone, Debug)]
pub struct RequestInfo {
    pub request: RequestHead,
    /// The resource targeted by the request, if the path identifies one.
    pub resource_id: Option<ResourceIdentity>,
}

/// Describes the outcome of a request attempt.
#[derive(Clone, Debug)]
pub struct ResponseInfo<'a> {
    /// The response, if the transport returned one.
    pub response: Option<&'a Response>,
    /// The classified error, `None` if the attempt succeeded.
    pub error: Option<ArmError>,
    /// The time from the start notification until the pipeline returned.
    pub latency: Duration,
    /// The `x-ms-client-request-id` header of the request sent, possibly empty.
    pub request_id: String,
    /// The `x-ms-correlation-request-id` header of the request sent, possibly empty.
    pub correlation_id: String,
    /// The connection phases, if connection tracing is enabled.
    ///
    /// Hooks may still be running on the transport's tasks, use
    /// [ConnectionTracer::snapshot] to read a consistent view.
    pub connection: Option<Arc<ConnectionTracer>>,
}

impl ResponseInfo<'_> {
    /// Returns a snapshot of the connection phases, empty if tracing is disabled.
    pub fn connection_timing(&self) -> ConnectionTiming {
        self.connection
            .as_ref()
            .map(|c| c.snapshot())
            .unwrap_or_default()
    }
}

/// Receives start and completion notifications for each request attempt.
///
/// The notifications are delivered synchronously on the task sending the
/// request. Implementations must not block, and should offload any expensive
/// processing.
///
/// Every `request_started()` call is followed by exactly one
/// `request_completed()` call with an equivalent [RequestInfo], even if the
/// request fails, panics, or is cancelled.
///
/// # Example
/// ```
/// # use arm_middleware::collector::{Collector, RequestInfo, ResponseInfo};
/// #[derive(Debug)]
/// struct Counter(std::sync::atomic::AtomicU64);
/// impl Collector for Counter {
///     fn request_started(&self, _request: &RequestInfo) {}
///     fn request_completed(&self, _request: &RequestInfo, response: &ResponseInfo<'_>) {
///         if response.error.is_some() {
///             self.0.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
///         }
///     }
/// }
/// ```
pub trait Collector: Send + Sync + std::fmt::Debug {
    fn request_started(&self, request: &RequestInfo);
    fn request_completed(&self, request: &RequestInfo, response: &ResponseInfo<'_>);
}

/// A [Collector] that emits `tracing` events.
///
/// Start notifications are logged at `DEBUG` level, successful completions at
/// `INFO`, and failed completions at `WARN`.
#[derive(Clone, Debug, Default)]
pub struct LoggingCollector;

impl Collector for LoggingCollector {
    fn request_started(&self, request: &RequestInfo) {
        let resource = request.resource_id.as_ref();
        tracing::debug!(
            http.request.method = %request.request.method,
            url.full = %request.request.url,
            arm.subscription_id = resource.map(|r| r.subscription_id.as_str()),
            arm.resource_group = resource.map(|r| r.resource_group_name.as_str()),
            arm.resource_type = resource.map(|r| r.resource_type.as_str()),
            arm.resource_name = resource.map(|r| r.name.as_str()),
            "ARM request started"
        );
    }

    fn request_completed(&self, request: &RequestInfo, response: &ResponseInfo<'_>) {
        let resource = request.resource_id.as_ref();
        let timing = response.connection_timing();
        let status = response.response.map(|r| r.status().as_u16());
        let latency_ms = u64::try_from(response.latency.as_millis()).unwrap_or(u64::MAX);
        match &response.error {
            None => tracing::info!(
                http.request.method = %request.request.method,
                url.full = %request.request.url,
                http.response.status_code = status,
                arm.resource_type = resource.map(|r| r.resource_type.as_str()),
                arm.resource_name = resource.map(|r| r.name.as_str()),
                arm.request_id = response.request_id.as_str(),
                arm.correlation_id = response.correlation_id.as_str(),
                latency_ms,
                connection.total = %timing.total,
                connection.dns = %timing.dns,
                connection.connect = %timing.connect,
                connection.tls = %timing.tls,
                connection.protocol = timing.negotiated_protocol.as_str(),
                "ARM request completed"
            ),
            Some(error) => tracing::warn!(
                http.request.method = %request.request.method,
                url.full = %request.request.url,
                http.response.status_code = status,
                arm.resource_type = resource.map(|r| r.resource_type.as_str()),
                arm.resource_name = resource.map(|r| r.name.as_str()),
                arm.request_id = response.request_id.as_str(),
                arm.correlation_id = response.correlation_id.as_str(),
                arm.error.code = error.code.as_str(),
                arm.error.message = error.message.as_str(),
                latency_ms,
                connection.total = %timing.total,
                connection.dns = %timing.dns,
                connection.connect = %timing.connect,
                connection.tls = %timing.tls,
                "ARM request failed"
            ),
        }
    }
}
