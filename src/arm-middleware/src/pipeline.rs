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

//! The request pipeline.
//!
//! A [Pipeline] is an ordered chain of [Policy] stages ending in a
//! [Transport]. Each policy receives the request and a [Next] handle to
//! forward it to the rest of the chain. Policies may inspect or modify the
//! request before forwarding it, and inspect or modify the response after.

use crate::Result;
use crate::connection::ClientTrace;
use crate::error::Error;
use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use url::Url;

/// The cancellation scope, deadline, and connection hooks of a request.
///
/// Cloning a context shares the cancellation scope: cancelling any clone
/// cancels all of them. Use [child][Context::child] to derive a context that
/// can be cancelled, or extended with more hooks, without affecting the
/// original.
///
/// # Example
/// ```
/// # use arm_middleware::pipeline::Context;
/// # use std::time::Duration;
/// let parent = Context::new().with_timeout(Duration::from_secs(30));
/// let child = parent.child();
/// child.cancel();
/// assert!(child.is_cancelled());
/// assert!(!parent.is_cancelled());
/// ```
#[derive(Clone, Debug, Default)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
    traces: Vec<Arc<dyn ClientTrace>>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a deadline `timeout` from now.
    ///
    /// A context never extends its deadline, if the existing deadline is
    /// earlier it is preserved.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Sets the deadline, unless the context already has an earlier one.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(d) if d < deadline => d,
            _ => deadline,
        });
        self
    }

    /// Attaches connection hooks.
    ///
    /// Transports invoke the hooks of every attached [ClientTrace].
    pub fn with_client_trace(mut self, trace: Arc<dyn ClientTrace>) -> Self {
        self.traces.push(trace);
        self
    }

    pub fn client_traces(&self) -> &[Arc<dyn ClientTrace>] {
        &self.traces
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Derives a context whose cancellation does not propagate to `self`.
    ///
    /// Cancelling `self` cancels the child. The child inherits the deadline
    /// and the connection hooks.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
            traces: self.traces.clone(),
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Returns why the context is done, if it is.
    ///
    /// Explicit cancellation takes precedence over an expired deadline.
    pub fn err(&self) -> Option<Error> {
        if self.token.is_cancelled() {
            return Some(Error::cancelled());
        }
        match self.deadline {
            Some(d) if d <= Instant::now() => Some(Error::deadline_exceeded()),
            _ => None,
        }
    }

    /// Waits until the context is cancelled or its deadline expires.
    pub async fn done(&self) -> Error {
        match self.deadline {
            None => {
                self.token.cancelled().await;
                Error::cancelled()
            }
            Some(deadline) => tokio::select! {
                biased;
                _ = self.token.cancelled() => Error::cancelled(),
                _ = tokio::time::sleep_until(deadline) => Error::deadline_exceeded(),
            },
        }
    }

    /// Runs `future` until it completes or the context is done.
    pub async fn run<F, T>(&self, future: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if let Some(e) = self.err() {
            return Err(e);
        }
        tokio::select! {
            biased;
            e = self.done() => Err(e),
            r = future => r,
        }
    }
}

/// The method, URL, and headers of a request.
///
/// Responses carry the head of the request actually sent, after every
/// pipeline stage had a chance to modify it.
#[derive(Clone, Debug)]
pub struct RequestHead {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
}

/// An outbound request.
#[derive(Clone, Debug)]
pub struct Request {
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: Bytes,
    context: Context,
}

impl Request {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            context: Context::new(),
        }
    }

    pub fn with_body<T: Into<Bytes>>(mut self, body: T) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Replaces the request context.
    pub fn with_context(mut self, context: Context) -> Self {
        self.context = context;
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn url_mut(&mut self) -> &mut Url {
        &mut self.url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn head(&self) -> RequestHead {
        RequestHead {
            method: self.method.clone(),
            url: self.url.clone(),
            headers: self.headers.clone(),
        }
    }
}

/// A response, with its body fully buffered.
#[derive(Clone, Debug)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    request: Option<RequestHead>,
}

impl Response {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            request: None,
        }
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_body<T: Into<Bytes>>(mut self, body: T) -> Self {
        self.body = body.into();
        self
    }

    /// Binds the response to the request that produced it.
    pub fn with_request(mut self, request: RequestHead) -> Self {
        self.request = Some(request);
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// The request that produced this response, as sent by the transport.
    pub fn request(&self) -> Option<&RequestHead> {
        self.request.as_ref()
    }

    pub fn into_body(self) -> Bytes {
        self.body
    }
}

/// A stage in the request pipeline.
#[async_trait::async_trait]
pub trait Policy: Send + Sync + std::fmt::Debug {
    /// Processes `request`, typically by forwarding it via `next`.
    async fn send(&self, request: Request, next: Next<'_>) -> Result<Response>;
}

/// Sends requests over the network.
///
/// Transports must honor the cancellation and deadline of the request
/// [Context], and should invoke its [ClientTrace] hooks.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    async fn send(&self, request: Request) -> Result<Response>;
}

/// The remainder of the pipeline after the current stage.
#[derive(Clone, Copy, Debug)]
pub struct Next<'a> {
    policies: &'a [Arc<dyn Policy>],
    transport: &'a dyn Transport,
}

impl<'a> Next<'a> {
    pub fn new(policies: &'a [Arc<dyn Policy>], transport: &'a dyn Transport) -> Self {
        Self {
            policies,
            transport,
        }
    }

    /// Forwards `request` to the next stage.
    pub async fn run(self, request: Request) -> Result<Response> {
        match self.policies.split_first() {
            Some((policy, policies)) => {
                let next = Next {
                    policies,
                    transport: self.transport,
                };
                policy.send(request, next).await
            }
            None => self.transport.send(request).await,
        }
    }
}

/// An ordered chain of policies ending in a transport.
#[derive(Clone, Debug)]
pub struct Pipeline {
    policies: Vec<Arc<dyn Policy>>,
    transport: Arc<dyn Transport>,
}

impl Pipeline {
    pub fn new(policies: Vec<Arc<dyn Policy>>, transport: Arc<dyn Transport>) -> Self {
        Self {
            policies,
            transport,
        }
    }

    pub async fn send(&self, request: Request) -> Result<Response> {
        Next::new(&self.policies, self.transport.as_ref())
            .run(request)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;
    use pretty_assertions::assert_eq;

    #[derive(Debug)]
    struct AppendHeader(&'static str);

    #[async_trait::async_trait]
    impl Policy for AppendHeader {
        async fn send(&self, mut request: Request, next: Next<'_>) -> Result<Response> {
            request
                .headers_mut()
                .append("x-stage", HeaderValue::from_static(self.0));
            next.run(request).await
        }
    }

    #[derive(Debug)]
    struct EchoTransport;

    #[async_trait::async_trait]
    impl Transport for EchoTransport {
        async fn send(&self, request: Request) -> Result<Response> {
            Ok(Response::new(StatusCode::OK)
                .with_body(request.body().clone())
                .with_request(request.head()))
        }
    }

    fn test_request() -> Request {
        let url = Url::parse("https://management.azure.com/subscriptions/S").unwrap();
        Request::new(Method::GET, url)
    }

    #[tokio::test]
    async fn runs_policies_in_order() -> anyhow::Result<()> {
        let pipeline = Pipeline::new(
            vec![Arc::new(AppendHeader("a")), Arc::new(AppendHeader("b"))],
            Arc::new(EchoTransport),
        );
        let response = pipeline.send(test_request().with_body("hello")).await?;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.body(), &Bytes::from_static(b"hello"));
        let sent = response.request().expect("response is bound to a request");
        let got: Vec<_> = sent.headers.get_all("x-stage").iter().collect();
        assert_eq!(got, vec!["a", "b"]);
        Ok(())
    }

    #[tokio::test]
    async fn empty_pipeline() -> anyhow::Result<()> {
        let pipeline = Pipeline::new(Vec::new(), Arc::new(EchoTransport));
        let response = pipeline.send(test_request()).await?;
        assert_eq!(response.status(), StatusCode::OK);
        Ok(())
    }

    #[test]
    fn child_cancellation() {
        let parent = Context::new();
        let child = parent.child();
        child.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());

        let child = parent.child();
        parent.cancel();
        assert!(child.is_cancelled());
        assert!(child.err().is_some_and(|e| e.is_cancelled()));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_never_extends() {
        let ctx = Context::new().with_timeout(Duration::from_secs(10));
        let want = ctx.deadline();
        let ctx = ctx.with_timeout(Duration::from_secs(20));
        assert_eq!(ctx.deadline(), want);
        let ctx = ctx.with_timeout(Duration::from_secs(5));
        assert!(ctx.deadline() < want, "{ctx:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn err_reports_deadline() {
        let ctx = Context::new().with_timeout(Duration::from_millis(10));
        assert!(ctx.err().is_none(), "{ctx:?}");
        tokio::time::advance(Duration::from_millis(10)).await;
        let err = ctx.err();
        assert!(err.as_ref().is_some_and(|e| e.is_deadline_exceeded()), "{err:?}");
        // Cancellation takes precedence.
        ctx.cancel();
        let err = ctx.err();
        assert!(err.as_ref().is_some_and(|e| e.is_cancelled()), "{err:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn done_on_deadline() {
        let ctx = Context::new().with_timeout(Duration::from_millis(10));
        let err = ctx.done().await;
        assert!(err.is_deadline_exceeded(), "{err:?}");
    }

    #[tokio::test]
    async fn done_on_cancel() {
        let ctx = Context::new();
        let child = ctx.child();
        let task = tokio::spawn(async move { child.done().await });
        ctx.cancel();
        let err = task.await.unwrap();
        assert!(err.is_cancelled(), "{err:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn run_races_future() {
        let ctx = Context::new().with_timeout(Duration::from_millis(10));
        let got = ctx
            .run(async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok(())
            })
            .await;
        assert!(matches!(&got, Err(e) if e.is_deadline_exceeded()), "{got:?}");

        let ctx = Context::new();
        let got = ctx.run(async { Ok(42) }).await;
        assert!(matches!(got, Ok(42)), "{got:?}");

        ctx.cancel();
        let got = ctx.run(async { Ok(42) }).await;
        assert!(matches!(&got, Err(e) if e.is_cancelled()), "{got:?}");
    }

    #[test]
    fn with_client_trace() {
        use crate::connection::ConnectionTracer;
        let ctx = Context::new().with_client_trace(Arc::new(ConnectionTracer::new()));
        let child = ctx.child();
        assert_eq!(child.client_traces().len(), 1);
        let child = child.with_client_trace(Arc::new(ConnectionTracer::new()));
        assert_eq!(child.client_traces().len(), 2);
        assert_eq!(ctx.client_traces().len(), 1);
    }
}
