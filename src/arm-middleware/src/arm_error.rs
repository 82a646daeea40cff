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

//! The normalized error taxonomy and helpers for ARM service errors.

use crate::classify::{ErrorBody, UNAVAILABLE};
use crate::pipeline::Response;
use http::StatusCode;
use serde::{Deserialize, Serialize};

/// Error codes used by ARM services in common failure scenarios.
pub mod codes {
    pub const RESOURCE_NOT_FOUND: &str = "ResourceNotFound";
    pub const OPERATION_NOT_ALLOWED: &str = "OperationNotAllowed";
    pub const ALLOCATION_FAILED: &str = "AllocationFailed";
    pub const OVERCONSTRAINED_ALLOCATION_REQUEST: &str = "OverconstrainedAllocationRequest";
    pub const ZONAL_ALLOCATION_FAILED: &str = "ZonalAllocationFailed";
    pub const OVERCONSTRAINED_ZONAL_ALLOCATION_REQUEST: &str =
        "OverconstrainedZonalAllocationRequest";
    pub const NIC_RESERVED_FOR_ANOTHER_VM: &str = "NicReservedForAnotherVm";
    pub const SKU_NOT_AVAILABLE: &str = "SkuNotAvailable";
}

/// Message fragments that distinguish the quota failures reported with
/// [codes::OPERATION_NOT_ALLOWED].
pub mod quota_terms {
    pub const LOW_PRIORITY: &str = "LowPriorityCores";
    pub const SKU_FAMILY: &str = "Family Cores quota";
    pub const SUBSCRIPTION: &str = "Submit a request for Quota increase";
    pub const REGIONAL: &str = "exceeding approved Total Regional Cores quota";
}

/// The code of an [ArmError].
///
/// The first variants are generated on the client side, they describe
/// failures where the service did not return a usable error. Service-declared
/// codes are kept verbatim in [ArmErrorCode::Service].
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ArmErrorCode {
    /// DNS, connect, TLS, or socket-level failure.
    TransportError,
    /// The request context was cancelled.
    ContextCanceled,
    /// The request deadline expired.
    ContextDeadlineExceeded,
    /// The transport returned neither a response nor an error.
    UnexpectedTransportBehavior,
    /// The error response body could not be parsed.
    CastToResponseErrorFailed,
    /// The error response body is valid JSON, but not an ARM error.
    NotAnArmError,
    /// A code declared by the service, e.g. `ResourceNotFound`.
    Service(String),
}

impl ArmErrorCode {
    pub fn as_str(&self) -> &str {
        match self {
            Self::TransportError => "TransportError",
            Self::ContextCanceled => "ContextCanceled",
            Self::ContextDeadlineExceeded => "ContextDeadlineExceeded",
            Self::UnexpectedTransportBehavior => "UnexpectedTransportBehavior",
            Self::CastToResponseErrorFailed => "CastToResponseErrorFailed",
            Self::NotAnArmError => "NotAnArmError",
            Self::Service(code) => code.as_str(),
        }
    }

    /// Returns true if the code was generated on the client side.
    pub fn is_client_side(&self) -> bool {
        !matches!(self, Self::Service(_))
    }
}

impl std::fmt::Display for ArmErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for ArmErrorCode {
    fn from(value: &str) -> Self {
        match value {
            "TransportError" => Self::TransportError,
            "ContextCanceled" => Self::ContextCanceled,
            "ContextDeadlineExceeded" => Self::ContextDeadlineExceeded,
            "UnexpectedTransportBehavior" => Self::UnexpectedTransportBehavior,
            "CastToResponseErrorFailed" => Self::CastToResponseErrorFailed,
            "NotAnArmError" => Self::NotAnArmError,
            code => Self::Service(code.to_string()),
        }
    }
}

impl From<String> for ArmErrorCode {
    fn from(value: String) -> Self {
        Self::from(value.as_str())
    }
}

impl From<ArmErrorCode> for String {
    fn from(value: ArmErrorCode) -> Self {
        match value {
            ArmErrorCode::Service(code) => code,
            code => code.as_str().to_string(),
        }
    }
}

/// The classified outcome of a failed request attempt.
///
/// # Example
/// ```
/// # use arm_middleware::arm_error::{ArmError, ArmErrorCode};
/// let e = ArmError::new(ArmErrorCode::Service("ResourceNotFound".into()), "not here");
/// assert_eq!(e.code.as_str(), "ResourceNotFound");
/// assert_eq!(serde_json::to_string(&e)?, r#"{"code":"ResourceNotFound","message":"not here"}"#);
/// # Ok::<(), serde_json::Error>(())
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArmError {
    pub code: ArmErrorCode,
    pub message: String,
}

impl ArmError {
    pub fn new<M: Into<String>>(code: ArmErrorCode, message: M) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ArmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ArmError {}

/// Predicates over the code and message of a service error.
///
/// ARM services report several recoverable conditions, such as allocation
/// failures and exhausted quotas, using well-known codes and message
/// fragments. The predicates are available on [ArmError], [ResponseError],
/// and [ErrorDetail].
pub trait ErrorDetails {
    /// The service error code, empty if the service did not provide one.
    fn error_code(&self) -> &str;

    /// The service error message.
    fn error_message(&self) -> &str;

    /// The HTTP status code, if known.
    fn http_status(&self) -> Option<StatusCode> {
        None
    }

    fn is_not_found(&self) -> bool {
        match self.http_status() {
            Some(status) => status == StatusCode::NOT_FOUND,
            None => self.error_code() == codes::RESOURCE_NOT_FOUND,
        }
    }

    fn is_zonal_allocation_failure(&self) -> bool {
        self.error_code() == codes::ZONAL_ALLOCATION_FAILED
    }

    fn is_allocation_failure(&self) -> bool {
        self.error_code() == codes::ALLOCATION_FAILED
    }

    fn is_overconstrained_allocation_failure(&self) -> bool {
        self.error_code() == codes::OVERCONSTRAINED_ALLOCATION_REQUEST
    }

    fn is_overconstrained_zonal_allocation_failure(&self) -> bool {
        self.error_code() == codes::OVERCONSTRAINED_ZONAL_ALLOCATION_REQUEST
    }

    fn is_sku_family_quota_reached(&self) -> bool {
        self.is_quota_failure(quota_terms::SKU_FAMILY)
    }

    fn is_subscription_quota_reached(&self) -> bool {
        self.is_quota_failure(quota_terms::SUBSCRIPTION)
    }

    fn is_regional_quota_reached(&self) -> bool {
        self.is_quota_failure(quota_terms::REGIONAL)
    }

    fn is_low_priority_quota_reached(&self) -> bool {
        self.is_quota_failure(quota_terms::LOW_PRIORITY)
    }

    fn is_nic_reserved_for_another_vm(&self) -> bool {
        self.error_code() == codes::NIC_RESERVED_FOR_ANOTHER_VM
    }

    fn is_sku_not_available(&self) -> bool {
        self.error_code() == codes::SKU_NOT_AVAILABLE
    }

    #[doc(hidden)]
    fn is_quota_failure(&self, term: &str) -> bool {
        self.error_code() == codes::OPERATION_NOT_ALLOWED && self.error_message().contains(term)
    }
}

impl ErrorDetails for ArmError {
    fn error_code(&self) -> &str {
        match &self.code {
            ArmErrorCode::Service(code) => code.as_str(),
            _ => "",
        }
    }

    fn error_message(&self) -> &str {
        &self.message
    }
}

/// The `error` object in an ARM error response.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorDetail {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(
        skip_serializing_if = "Vec::is_empty",
        deserialize_with = "null_as_empty"
    )]
    pub details: Vec<ErrorDetail>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<ErrorDetail>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Vec<ErrorDetail>>::deserialize(deserializer)?.unwrap_or_default())
}

impl ErrorDetails for ErrorDetail {
    fn error_code(&self) -> &str {
        self.code.as_deref().unwrap_or_default()
    }

    fn error_message(&self) -> &str {
        self.message.as_deref().unwrap_or_default()
    }
}

/// An error response from an ARM service.
///
/// Formats the error with the HTTP status, the service error code, the error
/// message, and the request that caused it. Extracting the message is best
/// effort, see [ErrorBody] for the formats supported.
///
/// # Example
/// ```
/// # use arm_middleware::arm_error::{ErrorDetails, ResponseError};
/// # use arm_middleware::pipeline::Response;
/// let response = Response::new(http::StatusCode::NOT_FOUND)
///     .with_body(r#"{"error":{"code":"ResourceNotFound","message":"gone"}}"#);
/// let error = ResponseError::from_response(&response).expect("404 is an error");
/// assert!(error.is_not_found());
/// assert_eq!(
///     error.to_string(),
///     "HTTP CODE: 404, ERROR CODE: ResourceNotFound, MESSAGE: gone, REQUEST: UNKNOWN UNAVAILABLE"
/// );
/// ```
#[derive(Clone, Debug)]
pub struct ResponseError {
    status: StatusCode,
    code: String,
    message: String,
    method: Option<http::Method>,
    url: Option<url::Url>,
}

impl ResponseError {
    /// Creates an error from a response with a status code of 400 or higher.
    ///
    /// Returns `None` for successful responses.
    pub fn from_response(response: &Response) -> Option<Self> {
        if response.status().as_u16() < 400 {
            return None;
        }
        let body = ErrorBody::parse(response.body());
        Some(Self {
            status: response.status(),
            code: body.code.unwrap_or_default(),
            message: body.message,
            method: response.request().map(|r| r.method.clone()),
            url: response.request().map(|r| r.url.clone()),
        })
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl ErrorDetails for ResponseError {
    fn error_code(&self) -> &str {
        &self.code
    }

    fn error_message(&self) -> &str {
        &self.message
    }

    fn http_status(&self) -> Option<StatusCode> {
        Some(self.status)
    }
}

impl std::fmt::Display for ResponseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let code = if self.code.is_empty() {
            UNAVAILABLE
        } else {
            self.code.as_str()
        };
        let method = self.method.as_ref().map(|m| m.as_str()).unwrap_or("UNKNOWN");
        let url = self.url.as_ref().map(|u| u.as_str()).unwrap_or(UNAVAILABLE);
        write!(
            f,
            "HTTP CODE: {}, ERROR CODE: {code}, MESSAGE: {}, REQUEST: {method} {url}",
            self.status.as_u16(),
            self.message
        )
    }
}

impl std::error::Error for ResponseError {}
