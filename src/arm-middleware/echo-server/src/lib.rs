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

//! A local HTTP server for the arm-middleware integration tests.
//!
//! The server answers every method and path. The query parameters control the
//! response:
//!
//! - `delay_ms`: wait this many milliseconds before responding.
//! - `status`: the HTTP status code, `200` by default.
//! - `body`: the shape of the response body, one of `arm` (a wrapped ARM
//!   error), `unwrapped` (an ARM error without the envelope), `no-code` (JSON
//!   that is not an ARM error), or `text` (not JSON). By default the body
//!   echoes the request.

use axum::{
    extract::Query,
    http::{HeaderMap, Method, StatusCode, Uri},
};
use serde_json::json;
use std::collections::HashMap;
use tokio::task::JoinHandle;

type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// The error code returned by `body=arm` and `body=unwrapped`.
pub const TEST_ERROR_CODE: &str = "TestInternalError";
/// The error message returned by `body=arm` and `body=unwrapped`.
pub const TEST_ERROR_MESSAGE: &str = "The is test internal error.";

/// Starts the server on an ephemeral port.
///
/// Returns the endpoint, e.g. `http://127.0.0.1:12345`, and the server task.
pub async fn start() -> Result<(String, JoinHandle<()>)> {
    let app = axum::Router::new().fallback(handler);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let server = tokio::spawn(async {
        if let Err(e) = axum::serve(listener, app).await {
            eprintln!("echo server stopped: {e}");
        }
    });

    Ok((format!("http://{}:{}", addr.ip(), addr.port()), server))
}

async fn handler(
    method: Method,
    uri: Uri,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> (StatusCode, String) {
    match handler_impl(method, uri, query, headers).await {
        Ok(r) => r,
        Err(e) => (StatusCode::BAD_REQUEST, format!("{e}")),
    }
}

async fn handler_impl(
    method: Method,
    uri: Uri,
    query: HashMap<String, String>,
    headers: HeaderMap,
) -> Result<(StatusCode, String)> {
    if let Some(delay) = query
        .get("delay_ms")
        .map(|s| s.parse::<u64>())
        .transpose()?
        .map(tokio::time::Duration::from_millis)
    {
        tokio::time::sleep(delay).await;
    }
    let status = query
        .get("status")
        .map(|s| s.parse::<u16>())
        .transpose()?
        .map(StatusCode::from_u16)
        .transpose()?
        .unwrap_or(StatusCode::OK);

    let body = match query.get("body").map(String::as_str) {
        Some("arm") => json!({"error": {
            "code": TEST_ERROR_CODE,
            "message": TEST_ERROR_MESSAGE,
        }})
        .to_string(),
        Some("unwrapped") => json!({
            "code": TEST_ERROR_CODE,
            "message": TEST_ERROR_MESSAGE,
        })
        .to_string(),
        Some("no-code") => json!({"status": "Failed"}).to_string(),
        Some("text") => "upstream connect error".to_string(),
        Some(other) => return Err(format!("unknown body kind {other}").into()),
        None => echo_body(method, uri, query, headers)?,
    };
    Ok((status, body))
}

fn echo_body(
    method: Method,
    uri: Uri,
    query: HashMap<String, String>,
    headers: HeaderMap,
) -> Result<String> {
    let headers = headers
        .iter()
        .map(|(k, v)| {
            v.to_str()
                .map(|s| (k.to_string(), serde_json::Value::String(s.to_string())))
        })
        .collect::<std::result::Result<serde_json::Map<_, _>, _>>()?;
    let object = json!({
        "method": method.as_str(),
        "path": uri.path(),
        "headers": headers,
        "query": query,
    });
    Ok(serde_json::to_string(&object)?)
}
