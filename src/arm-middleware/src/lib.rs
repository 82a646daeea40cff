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

//! Request instrumentation for Azure Resource Manager (ARM) clients.
//!
//! This crate observes outbound management-plane requests. A
//! [RequestMetricsPolicy][interceptor::RequestMetricsPolicy] sits in the
//! request pipeline, notifies a [Collector][collector::Collector] when each
//! attempt starts and completes, records the latency of each connection
//! establishment phase, and normalizes transport failures and service error
//! bodies into a single [ArmError][arm_error::ArmError] taxonomy.
//!
//! The policy is a pure observer. Whatever the downstream pipeline returns is
//! returned to the caller unchanged.
//!
//! # Example
//! ```no_run
//! # async fn sample() -> Result<(), Box<dyn std::error::Error>> {
//! use arm_middleware::client::ArmClient;
//! use arm_middleware::collector::LoggingCollector;
//! use std::sync::Arc;
//!
//! let client = ArmClient::builder()
//!     .with_endpoint("https://management.azure.com")
//!     .with_collector(Arc::new(LoggingCollector))
//!     .build()?;
//! let request = client.request(
//!     http::Method::GET,
//!     "/subscriptions/sub/resourceGroups/rg/providers/Microsoft.Compute/virtualMachines/vm",
//! )?;
//! let response = client.send(request).await?;
//! println!("status = {}", response.status());
//! # Ok(()) }
//! ```

/// An alias of [std::result::Result] where the error is always [crate::error::Error].
pub type Result<T> = std::result::Result<T, crate::error::Error>;

pub mod arm_error;
pub mod classify;
pub mod client;
pub mod client_builder;
pub mod collector;
pub mod connection;
pub mod error;
pub mod interceptor;
pub mod pipeline;
pub mod policies;
pub mod resource_id;
pub mod transport;

/// Header carrying the client-generated request id.
pub const CLIENT_REQUEST_ID_HEADER: &str = "x-ms-client-request-id";

/// Header carrying the correlation id shared by related requests.
pub const CORRELATION_REQUEST_ID_HEADER: &str = "x-ms-correlation-request-id";
