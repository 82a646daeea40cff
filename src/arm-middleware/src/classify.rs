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

//! Classifies the outcome of a request attempt.
//!
//! The classification is a pure function of the transport error and the
//! response of one attempt. It never looks at previous attempts.

use crate::arm_error::{ArmError, ArmErrorCode};
use crate::error::Error;
use crate::pipeline::Response;
use regex::Regex;
use serde::Deserialize;
use std::sync::LazyLock;

/// The placeholder used when a value cannot be extracted.
pub const UNAVAILABLE: &str = "UNAVAILABLE";

static MESSAGE_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r#""message"\s*:\s*("(?:[^"\\]|\\.)*")"#)
        .inspect_err(|e| tracing::warn!("cannot compile the error message pattern: {e}"))
        .ok()
});

/// Maps the outcome of a request attempt to an [ArmError].
///
/// Returns `None` for successful attempts. The decision order is:
///
/// 1. A response with status 400 or higher is classified by its body. The
///    body may contain a service-declared code, or it may be unparsable, in
///    which case the code is [NotAnArmError][ArmErrorCode::NotAnArmError] or
///    [CastToResponseErrorFailed][ArmErrorCode::CastToResponseErrorFailed].
/// 2. An error is classified by its cause: cancellation, deadline, or a
///    transport failure.
/// 3. The absence of both is a transport contract violation.
/// 4. Any other response is a success.
///
/// # Example
/// ```
/// # use arm_middleware::classify::classify;
/// # use arm_middleware::arm_error::ArmErrorCode;
/// # use arm_middleware::error::Error;
/// let got = classify(Some(&Error::deadline_exceeded()), None);
/// assert!(matches!(got, Some(e) if e.code == ArmErrorCode::ContextDeadlineExceeded));
/// ```
pub fn classify(error: Option<&Error>, response: Option<&Response>) -> Option<ArmError> {
    match (error, response) {
        (_, Some(r)) if r.status().as_u16() >= 400 => Some(from_response(r)),
        (Some(e), _) => Some(from_error(e)),
        (None, Some(_)) => None,
        (None, None) => Some(ArmError::new(
            ArmErrorCode::UnexpectedTransportBehavior,
            "the transport returned neither a response nor an error",
        )),
    }
}

fn from_error(error: &Error) -> ArmError {
    let code = if error.is_cancelled() {
        ArmErrorCode::ContextCanceled
    } else if error.is_deadline_exceeded() {
        ArmErrorCode::ContextDeadlineExceeded
    } else {
        ArmErrorCode::TransportError
    };
    ArmError::new(code, error.to_string())
}

fn from_response(response: &Response) -> ArmError {
    let body = ErrorBody::parse(response.body());
    match (body.code, body.json_error) {
        (Some(code), _) => ArmError::new(ArmErrorCode::Service(code), body.message),
        (None, None) => ArmError::new(
            ArmErrorCode::NotAnArmError,
            format!(
                "response body is not in ARM error form {{error:{{code, message}}}}, message: {}",
                body.message
            ),
        ),
        (None, Some(e)) => ArmError::new(
            ArmErrorCode::CastToResponseErrorFailed,
            format!(
                "cannot parse response body as an ARM error: {e}, message: {}",
                body.message
            ),
        ),
    }
}

/// The code and message extracted from an error response body.
///
/// ARM services use two JSON envelopes for errors:
///
/// ```text
/// {"error": {"code": "...", "message": "..."}}
/// {"code": "...", "message": "..."}
/// ```
///
/// The wrapped form is preferred. If neither form yields a message, the parser
/// scrapes a `"message": "..."` token from the raw bytes, as some proxies and
/// older services return bodies that are not valid JSON. Unknown fields are
/// ignored. Newlines, tabs, and carriage returns in the message are replaced
/// with spaces.
#[derive(Clone, Debug, Default)]
pub struct ErrorBody {
    /// The service-declared error code, if any.
    pub code: Option<String>,
    /// The error message, or [UNAVAILABLE].
    pub message: String,
    /// Set if the body is not valid JSON.
    pub json_error: Option<String>,
}

// Only the code and message matter, anything else in the envelope (`details`,
// `target`, extensions) is ignored and cannot void the code.
#[derive(Deserialize)]
struct Envelope {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Deserialize)]
struct Wrapped {
    #[serde(default)]
    error: Option<Envelope>,
}

impl ErrorBody {
    pub fn parse(body: &[u8]) -> Self {
        let (wrapped, unwrapped, json_error) =
            match serde_json::from_slice::<serde_json::Value>(body) {
                Ok(value) => (
                    Wrapped::deserialize(&value).ok().and_then(|w| w.error),
                    Envelope::deserialize(&value).ok(),
                    None,
                ),
                Err(e) => (None, None, Some(e.to_string())),
            };

        let code = [&wrapped, &unwrapped]
            .into_iter()
            .flatten()
            .filter_map(|d| d.code.as_deref())
            .find(|c| !c.is_empty())
            .map(str::to_string);

        let message = [&wrapped, &unwrapped]
            .into_iter()
            .flatten()
            .filter_map(|d| d.message.as_deref())
            .find(|m| !m.is_empty())
            .map(normalize)
            .or_else(|| scrape_message(body))
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| UNAVAILABLE.to_string());

        Self {
            code,
            message,
            json_error,
        }
    }
}

fn scrape_message(body: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(body);
    let re = MESSAGE_RE.as_ref()?;
    let quoted = re.captures(&text)?.get(1)?.as_str();
    match serde_json::from_str::<String>(quoted) {
        Ok(unquoted) => Some(normalize(&unquoted)),
        Err(e) => {
            tracing::debug!("cannot unquote error message {quoted}: {e}");
            Some(quoted.trim_matches('"').to_string())
        }
    }
}

fn normalize(message: &str) -> String {
    message.replace(['\n', '\t', '\r'], " ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::RequestHead;
    use http::StatusCode;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    fn response(status: u16, body: &'static str) -> Response {
        Response::new(StatusCode::from_u16(status).unwrap()).with_body(body)
    }

    #[test]
    fn wrapped_service_error() {
        let r = response(
            500,
            r#"{"error":{"code":"TestInternalError","message":"The is test internal error."}}"#,
        );
        let got = classify(None, Some(&r)).expect("500 is an error");
        assert_eq!(got.code, ArmErrorCode::Service("TestInternalError".into()));
        assert!(got.message.contains("test internal error"), "{got:?}");
    }

    #[test]
    fn unwrapped_service_error() {
        let r = response(400, r#"{"code":"InvalidParameter","message":"bad size"}"#);
        let got = classify(None, Some(&r)).expect("400 is an error");
        assert_eq!(
            got,
            ArmError::new(ArmErrorCode::Service("InvalidParameter".into()), "bad size")
        );
    }

    #[test]
    fn prefers_wrapped() {
        let r = response(
            409,
            r#"{"code":"Outer","message":"outer","error":{"code":"Inner","message":"inner"}}"#,
        );
        let got = classify(None, Some(&r)).unwrap();
        assert_eq!(got, ArmError::new(ArmErrorCode::Service("Inner".into()), "inner"));
    }

    #[test]
    fn wrapped_without_message_uses_unwrapped_message() {
        let r = response(409, r#"{"message":"outer","error":{"code":"Inner"}}"#);
        let got = classify(None, Some(&r)).unwrap();
        assert_eq!(got, ArmError::new(ArmErrorCode::Service("Inner".into()), "outer"));
    }

    #[test_case(r#"not json at all"#; "plain text")]
    #[test_case(r#"<html><body>Bad Gateway</body></html>"#; "html")]
    #[test_case(r#"{"error":{"code":"Broken","message":"trunc"#; "truncated json")]
    #[test_case(""; "empty")]
    fn unparsable(body: &'static str) {
        let r = response(502, body);
        let got = classify(None, Some(&r));
        let got = got.expect("errors are never classified as success");
        assert_eq!(got.code, ArmErrorCode::CastToResponseErrorFailed, "{got:?}");
        assert!(!got.message.is_empty(), "{got:?}");
    }

    #[test_case(r#"{"status":"Failed"}"#; "object without code")]
    #[test_case(r#"[1, 2, 3]"#; "array")]
    #[test_case(r#""just a string""#; "string")]
    #[test_case(r#"{"error":"oops"}"#; "error is a string")]
    fn not_an_arm_error(body: &'static str) {
        let r = response(500, body);
        let got = classify(None, Some(&r)).expect("errors are never classified as success");
        assert_eq!(got.code, ArmErrorCode::NotAnArmError, "{got:?}");
    }

    #[test]
    fn wrapped_with_null_details() {
        let r = response(
            404,
            r#"{"error":{"code":"ResourceNotFound","message":"The resource was not found.","details":null}}"#,
        );
        let got = classify(None, Some(&r)).unwrap();
        assert_eq!(
            got,
            ArmError::new(
                ArmErrorCode::Service("ResourceNotFound".into()),
                "The resource was not found."
            )
        );
    }

    #[test]
    fn regex_fallback() {
        let r = response(
            503,
            r#"{"error": {"code": "Overloaded", "message": "Line one\nline \"two\"\tend"} trailing garbage"#,
        );
        let got = classify(None, Some(&r)).unwrap();
        assert_eq!(got.code, ArmErrorCode::CastToResponseErrorFailed);
        assert!(
            got.message.contains(r#"Line one line "two" end"#),
            "{got:?}"
        );
    }

    #[test_case(br#"{"error":{"code":"C","message":"m"}}"#, Some("C"), "m", false; "wrapped")]
    #[test_case(br#"{"code":"C","message":"m"}"#, Some("C"), "m", false; "unwrapped")]
    #[test_case(br#"{"code":"","message":"m"}"#, None, "m", false; "empty code")]
    #[test_case(br#"{"other":1}"#, None, UNAVAILABLE, false; "no fields")]
    #[test_case(br#"oops "message" : "hi\\there" oops"#, None, r"hi\there", true; "regex with escape")]
    #[test_case(b"garbage", None, UNAVAILABLE, true; "garbage")]
    #[test_case(br#"{"error":{"code":"X","message":""}}"#, Some("X"), UNAVAILABLE, false; "empty message")]
    #[test_case(br#"{"error":{"code":"C","message":"m","details":null}}"#, Some("C"), "m", false; "null details")]
    #[test_case(br#"{"error":{"code":"C","message":"m","details":"oops","target":7}}"#, Some("C"), "m", false; "malformed details")]
    #[test_case(br#"{"code":"C","message":"m","details":[{"code":1}]}"#, Some("C"), "m", false; "unwrapped malformed details")]
    fn error_body(input: &[u8], code: Option<&str>, message: &str, json_error: bool) {
        let got = ErrorBody::parse(input);
        assert_eq!(got.code.as_deref(), code);
        assert_eq!(got.message, message);
        assert_eq!(got.json_error.is_some(), json_error, "{got:?}");
    }

    #[test]
    fn cancelled() {
        let got = classify(Some(&Error::cancelled()), None).unwrap();
        assert_eq!(got.code, ArmErrorCode::ContextCanceled);
    }

    #[test]
    fn deadline_exceeded() {
        let got = classify(Some(&Error::deadline_exceeded()), None).unwrap();
        assert_eq!(got.code, ArmErrorCode::ContextDeadlineExceeded);
    }

    #[test]
    fn transport_error() {
        let source = std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "dial tcp 127.0.0.1:1: connection refused",
        );
        let got = classify(Some(&Error::io(source)), None).unwrap();
        assert_eq!(got.code, ArmErrorCode::TransportError);
        assert!(got.message.contains("connection refused"), "{got:?}");
    }

    #[test]
    fn no_response_no_error() {
        let got = classify(None, None).unwrap();
        assert_eq!(got.code, ArmErrorCode::UnexpectedTransportBehavior);
    }

    #[test_case(200)]
    #[test_case(201)]
    #[test_case(204)]
    #[test_case(304)]
    #[test_case(399)]
    fn success(status: u16) {
        let r = response(status, "");
        assert_eq!(classify(None, Some(&r)), None);
    }

    #[test]
    fn status_wins_over_error() {
        let r = response(429, r#"{"error":{"code":"TooManyRequests","message":"slow down"}}"#);
        let got = classify(Some(&Error::cancelled()), Some(&r)).unwrap();
        assert_eq!(got.code.as_str(), "TooManyRequests");
    }

    #[test]
    fn classification_is_pure() {
        let url = url::Url::parse("https://management.azure.com/subscriptions/S").unwrap();
        let r = response(500, r#"{"error":{"code":"Boom","message":"boom"}}"#).with_request(
            RequestHead {
                method: http::Method::GET,
                url,
                headers: http::HeaderMap::new(),
            },
        );
        let first = classify(None, Some(&r));
        let second = classify(None, Some(&r));
        assert_eq!(first, second);
    }
}
