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

use crate::Result;
use crate::client_builder::ClientBuilder;
use crate::error::Error;
use crate::pipeline::{Pipeline, Request, Response};
use http::Method;
use std::sync::Arc;
use url::Url;

/// Sends requests to the management endpoint through the configured pipeline.
///
/// Clients are cheap to clone, all the clones share the same pipeline.
#[derive(Clone, Debug)]
pub struct ArmClient {
    endpoint: Url,
    pipeline: Arc<Pipeline>,
}

impl ArmClient {
    /// Returns a builder for [ArmClient].
    ///
    /// ```
    /// # use arm_middleware::client::ArmClient;
    /// let client = ArmClient::builder()
    ///     .with_endpoint("https://management.azure.com")
    ///     .build()?;
    /// assert_eq!(client.endpoint().as_str(), "https://management.azure.com/");
    /// # Ok::<(), arm_middleware::client_builder::Error>(())
    /// ```
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    pub(crate) fn new(endpoint: Url, pipeline: Pipeline) -> Self {
        Self {
            endpoint,
            pipeline: Arc::new(pipeline),
        }
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Creates a request for `path`, relative to the endpoint.
    ///
    /// `path` may include a query string.
    pub fn request(&self, method: Method, path: &str) -> Result<Request> {
        let url = self.endpoint.join(path).map_err(Error::binding)?;
        Ok(Request::new(method, url))
    }

    pub async fn send(&self, request: Request) -> Result<Response> {
        self.pipeline.send(request).await
    }
}
