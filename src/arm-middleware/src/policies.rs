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

//! Pipeline policies that decorate outgoing requests.

use crate::pipeline::{Next, Policy, Request, Response};
use crate::{CLIENT_REQUEST_ID_HEADER, Result};
use http::HeaderValue;
use http::header::USER_AGENT;

/// Sets the `x-ms-client-request-id` header, if the request does not have one.
///
/// Each attempt gets a fresh UUID v4, install this policy as a per-try
/// policy.
#[derive(Clone, Debug, Default)]
pub struct RequestIdPolicy;

#[async_trait::async_trait]
impl Policy for RequestIdPolicy {
    async fn send(&self, mut request: Request, next: Next<'_>) -> Result<Response> {
        if !request.headers().contains_key(CLIENT_REQUEST_ID_HEADER) {
            let id = uuid::Uuid::new_v4().to_string();
            // A hyphenated UUID is always a valid header value.
            if let Ok(v) = HeaderValue::from_str(&id) {
                request.headers_mut().insert(CLIENT_REQUEST_ID_HEADER, v);
            }
        }
        next.run(request).await
    }
}

/// Sets the `user-agent` header.
#[derive(Clone, Debug)]
pub struct UserAgentPolicy {
    value: HeaderValue,
}

impl UserAgentPolicy {
    /// The default user agent, `arm-middleware/{version}`.
    pub fn new() -> Self {
        Self {
            value: HeaderValue::from_static(concat!(
                "arm-middleware/",
                env!("CARGO_PKG_VERSION")
            )),
        }
    }

    /// Prepends `prefix` to the default user agent.
    ///
    /// Returns `None` if the result is not a valid header value.
    pub fn with_prefix(prefix: &str) -> Option<Self> {
        let default = Self::new();
        let value = format!("{prefix} {}", default.value.to_str().ok()?);
        HeaderValue::from_str(&value)
            .ok()
            .map(|value| Self { value })
    }

    pub fn value(&self) -> &HeaderValue {
        &self.value
    }
}

impl Default for UserAgentPolicy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Policy for UserAgentPolicy {
    async fn send(&self, mut request: Request, next: Next<'_>) -> Result<Response> {
        request
            .headers_mut()
            .insert(USER_AGENT, self.value.clone());
        next.run(request).await
    }
}

/// Adds a query parameter to each request.
///
/// # Example
/// ```
/// # use arm_middleware::policies::QueryParameterPolicy;
/// let policy = QueryParameterPolicy::new("api-version", "2024-07-01").replacing();
/// ```
#[derive(Clone, Debug)]
pub struct QueryParameterPolicy {
    name: String,
    value: String,
    replace: bool,
}

impl QueryParameterPolicy {
    /// Appends `name=value`, keeping any existing values for `name`.
    pub fn new<N: Into<String>, V: Into<String>>(name: N, value: V) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            replace: false,
        }
    }

    /// Removes any existing values for the parameter before adding it.
    pub fn replacing(mut self) -> Self {
        self.replace = true;
        self
    }

    fn apply(&self, url: &mut url::Url) {
        if !self.replace {
            url.query_pairs_mut().append_pair(&self.name, &self.value);
            return;
        }
        let kept: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(k, _)| k != &self.name)
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        url.query_pairs_mut()
            .clear()
            .extend_pairs(kept)
            .append_pair(&self.name, &self.value);
    }
}

#[async_trait::async_trait]
impl Policy for QueryParameterPolicy {
    async fn send(&self, mut request: Request, next: Next<'_>) -> Result<Response> {
        self.apply(request.url_mut());
        next.run(request).await
    }
}
