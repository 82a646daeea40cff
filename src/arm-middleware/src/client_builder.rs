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

//! Configures and creates an [ArmClient].

use crate::client::ArmClient;
use crate::collector::{Collector, LoggingCollector};
use crate::interceptor::RequestMetricsPolicy;
use crate::pipeline::{Pipeline, Policy, Transport};
use crate::policies::{RequestIdPolicy, UserAgentPolicy};
use crate::transport::{HyperTransport, TransportOptions};
use std::sync::Arc;

/// The result type for this module.
pub type Result<T> = std::result::Result<T, Error>;

pub(crate) const LOGGING_VAR: &str = "ARM_MIDDLEWARE_LOGGING";
const DEFAULT_ENDPOINT: &str = "https://management.azure.com";

/// Indicates a problem while constructing a client.
///
/// # Example
/// ```
/// # use arm_middleware::client::ArmClient;
/// let err = ArmClient::builder().with_endpoint("not a URL").build().unwrap_err();
/// assert!(err.is_endpoint(), "{err:?}");
/// ```
#[derive(thiserror::Error, Debug)]
#[error(transparent)]
pub struct Error(ErrorKind);

impl Error {
    /// If true, the endpoint is not a valid base URL.
    pub fn is_endpoint(&self) -> bool {
        matches!(&self.0, ErrorKind::Endpoint(_))
    }

    /// If true, the user agent is not a valid header value.
    pub fn is_user_agent(&self) -> bool {
        matches!(&self.0, ErrorKind::UserAgent(_))
    }

    /// If true, the client could not initialize the transport.
    pub fn is_transport(&self) -> bool {
        matches!(&self.0, ErrorKind::Transport(_))
    }

    pub(crate) fn endpoint<T: Into<BoxError>>(source: T) -> Self {
        Self(ErrorKind::Endpoint(source.into()))
    }

    pub(crate) fn transport<T: Into<BoxError>>(source: T) -> Self {
        Self(ErrorKind::Transport(source.into()))
    }
}

#[derive(thiserror::Error, Debug)]
enum ErrorKind {
    #[error("invalid endpoint")]
    Endpoint(#[source] BoxError),
    #[error("invalid user agent {0:?}")]
    UserAgent(String),
    #[error("could not initialize the transport")]
    Transport(#[source] BoxError),
}

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

// Returns true if the environment enables the logging collector.
fn logging_enabled() -> bool {
    std::env::var(LOGGING_VAR)
        .map(|v| v == "true")
        .unwrap_or(false)
}

/// A builder for [ArmClient].
///
/// The client sends each request through:
///
/// 1. the per-call policies, in the order they were added,
/// 2. the user agent policy,
/// 3. the [RequestMetricsPolicy], if a collector is configured,
/// 4. the request id policy,
/// 5. the per-try policies, in the order they were added,
/// 6. the transport.
///
/// If no collector is configured and `ARM_MIDDLEWARE_LOGGING` is `true`, the
/// client reports requests to a [LoggingCollector].
#[derive(Clone, Debug)]
pub struct ClientBuilder {
    endpoint: Option<String>,
    collector: Option<Arc<dyn Collector>>,
    connection_tracing: bool,
    user_agent: Option<String>,
    per_call: Vec<Arc<dyn Policy>>,
    per_try: Vec<Arc<dyn Policy>>,
    transport: Option<Arc<dyn Transport>>,
    transport_options: TransportOptions,
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self {
            endpoint: None,
            collector: None,
            connection_tracing: true,
            user_agent: None,
            per_call: Vec::new(),
            per_try: Vec::new(),
            transport: None,
            transport_options: TransportOptions::default(),
        }
    }
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the endpoint, the default is `https://management.azure.com`.
    pub fn with_endpoint<V: Into<String>>(mut self, v: V) -> Self {
        self.endpoint = Some(v.into());
        self
    }

    /// Reports each request attempt to `v`.
    pub fn with_collector(mut self, v: Arc<dyn Collector>) -> Self {
        self.collector = Some(v);
        self
    }

    /// Enables or disables connection phase tracing, enabled by default.
    pub fn with_connection_tracing(mut self, v: bool) -> Self {
        self.connection_tracing = v;
        self
    }

    /// Prepends `v` to the default user agent.
    pub fn with_user_agent<V: Into<String>>(mut self, v: V) -> Self {
        self.user_agent = Some(v.into());
        self
    }

    /// Adds a policy that runs once per call.
    pub fn with_per_call_policy(mut self, v: Arc<dyn Policy>) -> Self {
        self.per_call.push(v);
        self
    }

    /// Adds a policy that runs once per attempt, after the metrics policy.
    pub fn with_per_try_policy(mut self, v: Arc<dyn Policy>) -> Self {
        self.per_try.push(v);
        self
    }

    /// Replaces the default [HyperTransport].
    pub fn with_transport(mut self, v: Arc<dyn Transport>) -> Self {
        self.transport = Some(v);
        self
    }

    /// Configures the default [HyperTransport].
    ///
    /// Ignored if the application provides a transport via
    /// [with_transport()][ClientBuilder::with_transport].
    pub fn with_transport_options(mut self, v: TransportOptions) -> Self {
        self.transport_options = v;
        self
    }

    pub fn build(self) -> Result<ArmClient> {
        let endpoint = self.endpoint.as_deref().unwrap_or(DEFAULT_ENDPOINT);
        let endpoint = url::Url::parse(endpoint).map_err(Error::endpoint)?;
        if endpoint.cannot_be_a_base() {
            return Err(Error::endpoint(format!(
                "{endpoint} cannot be used as a base URL"
            )));
        }
        let user_agent = match &self.user_agent {
            None => UserAgentPolicy::new(),
            Some(prefix) => UserAgentPolicy::with_prefix(prefix)
                .ok_or_else(|| Error(ErrorKind::UserAgent(prefix.clone())))?,
        };
        let collector = self.collector.or_else(|| {
            logging_enabled().then(|| Arc::new(LoggingCollector) as Arc<dyn Collector>)
        });
        let transport = match self.transport {
            Some(t) => t,
            None => Arc::new(HyperTransport::new(self.transport_options)?),
        };

        let mut policies = self.per_call;
        policies.push(Arc::new(user_agent));
        if let Some(collector) = collector {
            policies.push(Arc::new(
                RequestMetricsPolicy::new(collector).with_connection_tracing(self.connection_tracing),
            ));
        }
        policies.push(Arc::new(RequestIdPolicy));
        policies.extend(self.per_try);

        Ok(ArmClient::new(endpoint, Pipeline::new(policies, transport)))
    }
}
