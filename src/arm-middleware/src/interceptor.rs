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

//! Intercepts each request attempt and reports it to a [Collector].
//!
//! The [RequestMetricsPolicy] is a pass-through stage: it never modifies the
//! request beyond attaching connection hooks to a derived context, and it
//! always returns the downstream result unchanged.

use crate::arm_error::ArmError;
use crate::classify::classify;
use crate::collector::{Collector, RequestInfo, ResponseInfo};
use crate::connection::ConnectionTracer;
use crate::error::Error;
use crate::pipeline::{Context, Next, Policy, Request, Response};
use crate::resource_id::ResourceIdentity;
use crate::{CLIENT_REQUEST_ID_HEADER, CORRELATION_REQUEST_ID_HEADER, Result};
use std::sync::Arc;
use tokio::time::Instant;

/// A [Policy] that reports each request attempt to a [Collector].
///
/// Place this policy before any per-try policy that sets the request id
/// headers. The policy reads those headers from the request bound to the
/// response, so it sees the values actually sent.
///
/// # Example
/// ```
/// # use arm_middleware::collector::LoggingCollector;
/// # use arm_middleware::interceptor::RequestMetricsPolicy;
/// # use std::sync::Arc;
/// let policy = RequestMetricsPolicy::new(Arc::new(LoggingCollector))
///     .with_connection_tracing(true);
/// ```
#[derive(Clone, Debug, Default)]
pub struct RequestMetricsPolicy {
    collector: Option<Arc<dyn Collector>>,
    trace_connections: bool,
}

impl RequestMetricsPolicy {
    pub fn new(collector: Arc<dyn Collector>) -> Self {
        Self {
            collector: Some(collector),
            trace_connections: true,
        }
    }

    /// Enables or disables the connection phase tracing.
    pub fn with_connection_tracing(mut self, v: bool) -> Self {
        self.trace_connections = v;
        self
    }
}

#[async_trait::async_trait]
impl Policy for RequestMetricsPolicy {
    async fn send(&self, request: Request, next: Next<'_>) -> Result<Response> {
        let Some(collector) = self.collector.as_deref() else {
            return next.run(request).await;
        };
        if request.url().cannot_be_a_base() {
            return next.run(request).await;
        }

        let resource_id = match ResourceIdentity::parse(request.url().path()) {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::debug!("request is not for an ARM resource: {e}");
                None
            }
        };
        let tracer = self
            .trace_connections
            .then(|| Arc::new(ConnectionTracer::new()));
        let context = match &tracer {
            Some(t) => request.context().child().with_client_trace(t.clone()),
            None => request.context().child(),
        };
        let request = request.with_context(context.clone());
        let info = RequestInfo {
            request: request.head(),
            resource_id,
        };

        let start = Instant::now();
        collector.request_started(&info);
        let guard = CompletionGuard {
            collector,
            info,
            start,
            tracer,
            context,
            armed: true,
        };
        let result = next.run(request).await;
        guard.complete(result.as_ref());
        result
    }
}

/// Sends the completion notification exactly once.
///
/// If the request future is dropped, or the downstream stages panic, the
/// notification is sent from `drop()`.
struct CompletionGuard<'a> {
    collector: &'a dyn Collector,
    info: RequestInfo,
    start: Instant,
    tracer: Option<Arc<ConnectionTracer>>,
    context: Context,
    armed: bool,
}

impl CompletionGuard<'_> {
    fn complete(mut self, result: std::result::Result<&Response, &Error>) {
        self.armed = false;
        let (response, error) = match result {
            Ok(r) => (Some(r), None),
            Err(e) => (None, Some(e)),
        };
        self.notify(response, classify(error, response));
    }

    fn notify(&self, response: Option<&Response>, error: Option<ArmError>) {
        let bound = response.and_then(Response::request);
        let header = |name: &str| {
            bound
                .and_then(|r| r.headers.get(name))
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string()
        };
        let info = ResponseInfo {
            response,
            error,
            latency: self.start.elapsed(),
            request_id: header(CLIENT_REQUEST_ID_HEADER),
            correlation_id: header(CORRELATION_REQUEST_ID_HEADER),
            connection: self.tracer.clone(),
        };
        self.collector.request_completed(&self.info, &info);
    }
}

impl Drop for CompletionGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.armed = false;
        // A panic means the downstream stages never produced an outcome.
        let error = if std::thread::panicking() {
            classify(None, None)
        } else {
            let cause = self.context.err().unwrap_or_else(Error::cancelled);
            classify(Some(&cause), None)
        };
        self.notify(None, error);
    }
}
