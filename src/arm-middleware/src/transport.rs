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

//! An HTTP/1.1 transport that reports connection establishment phases.
//!
//! Each request opens a new connection. The transport resolves the host,
//! connects, performs the TLS handshake for `https` URLs, and invokes the
//! [ClientTrace] hooks attached to the request context as each phase starts
//! and finishes.

use crate::client_builder;
use crate::connection::{ClientTrace, ConnectionInfo, TlsInfo};
use crate::error::Error;
use crate::pipeline::{Request, Response, Transport};
use crate::Result;
use bytes::Bytes;
use http::header::HOST;
use http_body_util::{BodyExt, Full};
use hyper_util::rt::TokioIo;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use url::{Host, Url};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_TLS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const HTTP1_ALPN: &[u8] = b"http/1.1";

type Traces = [Arc<dyn ClientTrace>];

/// Configures a [HyperTransport].
///
/// # Example
/// ```
/// # use arm_middleware::transport::TransportOptions;
/// # use std::time::Duration;
/// let options = TransportOptions::default()
///     .with_connect_timeout(Duration::from_secs(5));
/// assert_eq!(options.connect_timeout(), Duration::from_secs(5));
/// ```
#[derive(Clone, Debug)]
pub struct TransportOptions {
    connect_timeout: Duration,
    tls_handshake_timeout: Duration,
    root_certificates: Option<RootCertStore>,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            tls_handshake_timeout: DEFAULT_TLS_HANDSHAKE_TIMEOUT,
            root_certificates: None,
        }
    }
}

impl TransportOptions {
    /// Limits the time to establish the TCP connection. The default is 30 seconds.
    pub fn with_connect_timeout(mut self, v: Duration) -> Self {
        self.connect_timeout = v;
        self
    }

    /// Limits the duration of the TLS handshake. The default is 10 seconds.
    pub fn with_tls_handshake_timeout(mut self, v: Duration) -> Self {
        self.tls_handshake_timeout = v;
        self
    }

    /// Replaces the default trust anchors, the Mozilla root program via
    /// `webpki-roots`.
    pub fn with_root_certificates(mut self, v: RootCertStore) -> Self {
        self.root_certificates = Some(v);
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    pub fn tls_handshake_timeout(&self) -> Duration {
        self.tls_handshake_timeout
    }
}

/// A [Transport] based on the `hyper` HTTP/1.1 client connection.
///
/// The transport does not pool connections, every connection reports
/// `reused: false`. The whole exchange, including reading the response body,
/// is raced against the cancellation and deadline of the request context.
#[derive(Clone, Debug)]
pub struct HyperTransport {
    options: TransportOptions,
    tls: Arc<ClientConfig>,
}

impl HyperTransport {
    /// Creates a transport, only TLS 1.2 and TLS 1.3 are enabled.
    pub fn new(options: TransportOptions) -> client_builder::Result<Self> {
        let roots = match &options.root_certificates {
            Some(r) => r.clone(),
            None => {
                let mut r = RootCertStore::empty();
                r.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
                r
            }
        };
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let mut tls = ClientConfig::builder_with_provider(provider)
            .with_protocol_versions(rustls::DEFAULT_VERSIONS)
            .map_err(client_builder::Error::transport)?
            .with_root_certificates(roots)
            .with_no_client_auth();
        tls.alpn_protocols = vec![HTTP1_ALPN.to_vec()];
        Ok(Self {
            options,
            tls: Arc::new(tls),
        })
    }

    async fn exchange(&self, request: Request) -> Result<Response> {
        let traces = request.context().client_traces().to_vec();
        let url = request.url();
        let https = match url.scheme() {
            "https" => true,
            "http" => false,
            scheme => {
                return Err(Error::binding(format!(
                    "unsupported URL scheme {scheme} in {url}"
                )));
            }
        };
        let host = url
            .host()
            .ok_or_else(|| Error::binding(format!("missing host in {url}")))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| Error::binding(format!("missing port in {url}")))?;
        let http_request = to_http(&request)?;

        let host_port = format!("{host}:{port}");
        traces.iter().for_each(|t| t.get_conn(&host_port));
        let addrs = resolve(&traces, &host, port).await?;
        let tcp = self.connect(&traces, &addrs).await?;
        let info = ConnectionInfo {
            reused: false,
            was_idle: false,
            idle_time: Duration::ZERO,
            local_addr: tcp.local_addr().ok(),
            remote_addr: tcp.peer_addr().ok(),
        };

        let (parts, body) = if https {
            let stream = self.handshake(&traces, &host, tcp).await?;
            traces.iter().for_each(|t| t.got_conn(&info));
            send_http1(TokioIo::new(stream), http_request).await?
        } else {
            traces.iter().for_each(|t| t.got_conn(&info));
            send_http1(TokioIo::new(tcp), http_request).await?
        };
        Ok(Response::new(parts.status)
            .with_headers(parts.headers)
            .with_body(body)
            .with_request(request.head()))
    }

    async fn connect(&self, traces: &Traces, addrs: &[SocketAddr]) -> Result<TcpStream> {
        traces.iter().for_each(|t| t.connect_start(addrs));
        let attempt = async {
            let stream = TcpStream::connect(addrs).await?;
            let peer = stream.peer_addr()?;
            Ok::<_, std::io::Error>((stream, peer))
        };
        let result = tokio::time::timeout(self.options.connect_timeout, attempt)
            .await
            .unwrap_or_else(|_| Err(timeout_error("connect")));
        match result {
            Ok((stream, peer)) => {
                traces.iter().for_each(|t| t.connect_done(Ok(peer)));
                Ok(stream)
            }
            Err(e) => {
                traces.iter().for_each(|t| t.connect_done(Err(&e)));
                Err(Error::io(e))
            }
        }
    }

    async fn handshake(
        &self,
        traces: &Traces,
        host: &Host<&str>,
        tcp: TcpStream,
    ) -> Result<TlsStream<TcpStream>> {
        let name = server_name(host)?;
        traces.iter().for_each(|t| t.tls_handshake_start());
        let connector = TlsConnector::from(self.tls.clone());
        let result = tokio::time::timeout(
            self.options.tls_handshake_timeout,
            connector.connect(name, tcp),
        )
        .await
        .unwrap_or_else(|_| Err(timeout_error("TLS handshake")));
        match result {
            Ok(stream) => {
                let (_, conn) = stream.get_ref();
                let info = TlsInfo {
                    protocol_version: conn.protocol_version().map(|v| format!("{v:?}")),
                    negotiated_protocol: conn
                        .alpn_protocol()
                        .map(|p| String::from_utf8_lossy(p).into_owned()),
                };
                traces.iter().for_each(|t| t.tls_handshake_done(Ok(&info)));
                Ok(stream)
            }
            Err(e) => {
                traces.iter().for_each(|t| t.tls_handshake_done(Err(&e)));
                Err(Error::io(e))
            }
        }
    }
}

#[async_trait::async_trait]
impl Transport for HyperTransport {
    async fn send(&self, request: Request) -> Result<Response> {
        let context = request.context().clone();
        context.run(self.exchange(request)).await
    }
}

async fn resolve(traces: &Traces, host: &Host<&str>, port: u16) -> Result<Vec<SocketAddr>> {
    let name = match host {
        Host::Ipv4(ip) => return Ok(vec![SocketAddr::new(IpAddr::V4(*ip), port)]),
        Host::Ipv6(ip) => return Ok(vec![SocketAddr::new(IpAddr::V6(*ip), port)]),
        Host::Domain(name) => *name,
    };
    traces.iter().for_each(|t| t.dns_start(name));
    let result = match tokio::net::lookup_host((name, port)).await {
        Ok(addrs) => {
            let addrs: Vec<SocketAddr> = addrs.collect();
            if addrs.is_empty() {
                Err(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("no addresses found for {name}"),
                ))
            } else {
                Ok(addrs)
            }
        }
        Err(e) => Err(e),
    };
    traces.iter().for_each(|t| t.dns_done(result.as_deref()));
    result.map_err(Error::io)
}

fn server_name(host: &Host<&str>) -> Result<ServerName<'static>> {
    match host {
        Host::Domain(d) => ServerName::try_from(d.to_string()).map_err(Error::binding),
        Host::Ipv4(ip) => Ok(ServerName::IpAddress(IpAddr::V4(*ip).into())),
        Host::Ipv6(ip) => Ok(ServerName::IpAddress(IpAddr::V6(*ip).into())),
    }
}

fn timeout_error(phase: &str) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::TimedOut, format!("{phase} timeout"))
}

fn to_http(request: &Request) -> Result<http::Request<Full<Bytes>>> {
    let url: &Url = request.url();
    let target = &url[url::Position::BeforePath..url::Position::AfterQuery];
    let mut builder = http::Request::builder()
        .method(request.method().clone())
        .uri(target);
    if !request.headers().contains_key(HOST) {
        let authority = &url[url::Position::BeforeHost..url::Position::AfterPort];
        builder = builder.header(HOST, authority);
    }
    let mut http_request = builder
        .body(Full::new(request.body().clone()))
        .map_err(Error::binding)?;
    http_request
        .headers_mut()
        .extend(request.headers().clone());
    Ok(http_request)
}

async fn send_http1<T>(
    io: T,
    request: http::Request<Full<Bytes>>,
) -> Result<(http::response::Parts, Bytes)>
where
    T: hyper::rt::Read + hyper::rt::Write + Unpin + Send + 'static,
{
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .map_err(Error::io)?;
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            tracing::debug!("connection closed with error: {e}");
        }
    });
    let response = sender.send_request(request).await.map_err(Error::io)?;
    let (parts, body) = response.into_parts();
    let body = body.collect().await.map_err(Error::io)?.to_bytes();
    Ok((parts, body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{HeaderValue, Method};
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    fn request(url: &str) -> Request {
        Request::new(Method::GET, Url::parse(url).unwrap())
    }

    #[test]
    fn default_options() {
        let options = TransportOptions::default();
        assert_eq!(options.connect_timeout(), Duration::from_secs(30));
        assert_eq!(options.tls_handshake_timeout(), Duration::from_secs(10));
        assert!(options.root_certificates.is_none());
    }

    #[test]
    fn options_setters() {
        let options = TransportOptions::default()
            .with_connect_timeout(Duration::from_secs(1))
            .with_tls_handshake_timeout(Duration::from_secs(2))
            .with_root_certificates(RootCertStore::empty());
        assert_eq!(options.connect_timeout(), Duration::from_secs(1));
        assert_eq!(options.tls_handshake_timeout(), Duration::from_secs(2));
        assert!(options.root_certificates.is_some());
    }

    #[test]
    fn new_configures_alpn() -> anyhow::Result<()> {
        let transport = HyperTransport::new(TransportOptions::default())?;
        assert_eq!(transport.tls.alpn_protocols, vec![b"http/1.1".to_vec()]);
        Ok(())
    }

    #[test_case("https://management.azure.com/subscriptions?api-version=1#frag", "/subscriptions?api-version=1", "management.azure.com")]
    #[test_case("http://127.0.0.1:8080/a/b", "/a/b", "127.0.0.1:8080")]
    #[test_case("http://[::1]:9000/", "/", "[::1]:9000")]
    fn http_request(url: &str, target: &str, host: &str) -> anyhow::Result<()> {
        let got = to_http(&request(url).with_body("body"))?;
        assert_eq!(got.uri().to_string(), target);
        assert_eq!(got.headers().get(HOST).map(|v| v.to_str()).transpose()?, Some(host));
        Ok(())
    }

    #[test]
    fn http_request_keeps_headers() -> anyhow::Result<()> {
        let mut request = request("https://management.azure.com/");
        request
            .headers_mut()
            .insert(HOST, HeaderValue::from_static("override.example.com"));
        request
            .headers_mut()
            .insert("x-test", HeaderValue::from_static("value"));
        let got = to_http(&request)?;
        assert_eq!(
            got.headers().get(HOST),
            Some(&HeaderValue::from_static("override.example.com"))
        );
        assert_eq!(
            got.headers().get("x-test"),
            Some(&HeaderValue::from_static("value"))
        );
        Ok(())
    }

    #[test]
    fn server_names() -> anyhow::Result<()> {
        let got = server_name(&Host::Domain("management.azure.com"))?;
        assert!(matches!(got, ServerName::DnsName(_)), "{got:?}");
        let got = server_name(&Host::Ipv4("127.0.0.1".parse()?))?;
        assert!(matches!(got, ServerName::IpAddress(_)), "{got:?}");
        Ok(())
    }

    #[tokio::test]
    async fn unsupported_scheme() -> anyhow::Result<()> {
        let transport = HyperTransport::new(TransportOptions::default())?;
        let err = transport
            .send(request("ftp://example.com/file"))
            .await
            .unwrap_err();
        assert!(err.is_binding(), "{err:?}");
        Ok(())
    }

    #[tokio::test]
    async fn resolve_ip_literal_skips_dns() -> anyhow::Result<()> {
        let addrs = resolve(&[], &Host::Ipv4("10.0.0.1".parse()?), 443).await?;
        assert_eq!(addrs, vec!["10.0.0.1:443".parse::<SocketAddr>()?]);
        Ok(())
    }
}
