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

//! Connection lifecycle hooks and the per-attempt connection tracer.
//!
//! Transports invoke the [ClientTrace] hooks attached to a request
//! [Context][crate::pipeline::Context] as each phase of connection
//! establishment starts and finishes. The [ConnectionTracer] implements these
//! hooks and records the latency of each phase.

use std::net::SocketAddr;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::time::Instant;

/// Hooks invoked by a transport during connection establishment.
///
/// All the methods have empty default implementations, implementations only
/// need to override the hooks they care about. Hooks may be called from any
/// thread, and may be called concurrently with each other.
///
/// A phase that does not happen, e.g. DNS resolution for an IP literal, or
/// the TLS handshake for a plain `http://` request, does not invoke its hooks.
pub trait ClientTrace: Send + Sync + std::fmt::Debug {
    /// The transport starts acquiring a connection to `host_port`.
    fn get_conn(&self, _host_port: &str) {}

    /// The transport acquired a connection.
    fn got_conn(&self, _info: &ConnectionInfo) {}

    /// The transport starts resolving `host`.
    fn dns_start(&self, _host: &str) {}

    /// The DNS resolution completed.
    fn dns_done(&self, _result: Result<&[SocketAddr], &std::io::Error>) {}

    /// The transport starts connecting to the resolved addresses.
    fn connect_start(&self, _addrs: &[SocketAddr]) {}

    /// The transport connected, or gave up connecting to all the addresses.
    fn connect_done(&self, _result: Result<SocketAddr, &std::io::Error>) {}

    /// The transport starts the TLS handshake.
    fn tls_handshake_start(&self) {}

    /// The TLS handshake completed.
    fn tls_handshake_done(&self, _result: Result<&TlsInfo, &std::io::Error>) {}
}

/// Describes the connection acquired by the transport.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConnectionInfo {
    /// The connection was previously used for another request.
    pub reused: bool,
    /// The connection was obtained from an idle pool.
    pub was_idle: bool,
    /// How long the connection was idle, if `was_idle` is set.
    pub idle_time: Duration,
    pub local_addr: Option<SocketAddr>,
    pub remote_addr: Option<SocketAddr>,
}

impl std::fmt::Display for ConnectionInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{{Reused:{} WasIdle:{} IdleTime:{}ms",
            self.reused,
            self.was_idle,
            self.idle_time.as_millis()
        )?;
        if let Some(a) = &self.local_addr {
            write!(f, " LocalAddr:{a}")?;
        }
        if let Some(a) = &self.remote_addr {
            write!(f, " RemoteAddr:{a}")?;
        }
        write!(f, "}}")
    }
}

/// The result of a successful TLS handshake.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TlsInfo {
    /// The negotiated TLS version, e.g. `TLSv1_3`.
    pub protocol_version: Option<String>,
    /// The application protocol negotiated via ALPN, e.g. `http/1.1`.
    pub negotiated_protocol: Option<String>,
}

/// The outcome of one connection establishment phase.
///
/// The [Display][std::fmt::Display] format matches the legacy text format
/// consumed by existing dashboards: an empty string if the phase did not run,
/// the latency in milliseconds (e.g. `12ms`) on success, and the error text on
/// failure.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum PhaseLatency {
    /// The phase never started, or never finished.
    #[default]
    NotRun,
    /// The phase completed successfully.
    Completed(Duration),
    /// The phase failed.
    Failed(String),
}

impl PhaseLatency {
    /// The latency, if the phase completed successfully.
    pub fn duration(&self) -> Option<Duration> {
        match self {
            Self::Completed(d) => Some(*d),
            _ => None,
        }
    }

    /// The error text, if the phase failed.
    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Failed(e) => Some(e.as_str()),
            _ => None,
        }
    }

    pub fn is_not_run(&self) -> bool {
        matches!(self, Self::NotRun)
    }
}

impl std::fmt::Display for PhaseLatency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotRun => Ok(()),
            Self::Completed(d) => write!(f, "{}ms", d.as_millis()),
            Self::Failed(e) => write!(f, "{e}"),
        }
    }
}

/// A snapshot of the connection establishment phases for one attempt.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConnectionTiming {
    /// From the start of connection acquisition until a connection is ready.
    pub total: PhaseLatency,
    pub dns: PhaseLatency,
    pub connect: PhaseLatency,
    pub tls: PhaseLatency,
    /// The ALPN protocol, empty if there was no TLS handshake or no ALPN.
    pub negotiated_protocol: String,
    /// A description of the acquired connection, see [ConnectionInfo].
    pub connection: String,
}

/// Records the connection establishment phases of one request attempt.
///
/// Each phase is recorded at most once. The first result wins, and any
/// repeated hook invocation is ignored. A single reader-writer lock guards all
/// the fields, including the start marks of the phases, so readers never
/// observe a partially written phase.
///
/// # Example
/// ```
/// use arm_middleware::connection::{ClientTrace, ConnectionTracer};
/// let tracer = ConnectionTracer::new();
/// tracer.dns_start("management.azure.com");
/// tracer.dns_done(Ok(&[]));
/// assert!(tracer.dns_latency().duration().is_some());
/// assert!(tracer.tls_latency().is_not_run());
/// ```
#[derive(Debug, Default)]
pub struct ConnectionTracer {
    state: RwLock<TracerState>,
}

#[derive(Debug, Default)]
struct TracerState {
    get_conn_start: Option<Instant>,
    dns_start: Option<Instant>,
    connect_start: Option<Instant>,
    tls_start: Option<Instant>,
    timing: ConnectionTiming,
}

impl ConnectionTracer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of all the phases recorded so far.
    pub fn snapshot(&self) -> ConnectionTiming {
        self.read().timing.clone()
    }

    pub fn total_latency(&self) -> PhaseLatency {
        self.read().timing.total.clone()
    }

    pub fn dns_latency(&self) -> PhaseLatency {
        self.read().timing.dns.clone()
    }

    pub fn connect_latency(&self) -> PhaseLatency {
        self.read().timing.connect.clone()
    }

    pub fn tls_latency(&self) -> PhaseLatency {
        self.read().timing.tls.clone()
    }

    pub fn negotiated_protocol(&self) -> String {
        self.read().timing.negotiated_protocol.clone()
    }

    pub fn connection(&self) -> String {
        self.read().timing.connection.clone()
    }

    // The lock is never held across a panic point, recover the data if some
    // other thread poisoned it anyway.
    fn read(&self) -> RwLockReadGuard<'_, TracerState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, TracerState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn mark_start(slot: &mut Option<Instant>, phase: &str) {
    if slot.is_some() {
        tracing::debug!("ignoring repeated start for connection phase {phase}");
        return;
    }
    *slot = Some(Instant::now());
}

fn finish<E: std::fmt::Display>(
    slot: &mut PhaseLatency,
    start: Option<Instant>,
    result: Result<(), E>,
    phase: &str,
) {
    if !slot.is_not_run() {
        tracing::debug!("ignoring repeated result for connection phase {phase}");
        return;
    }
    *slot = match (result, start) {
        (Err(e), _) => PhaseLatency::Failed(e.to_string()),
        (Ok(()), Some(start)) => PhaseLatency::Completed(start.elapsed()),
        (Ok(()), None) => {
            tracing::debug!("connection phase {phase} finished without starting");
            return;
        }
    };
}

impl ClientTrace for ConnectionTracer {
    fn get_conn(&self, _host_port: &str) {
        mark_start(&mut self.write().get_conn_start, "total");
    }

    fn got_conn(&self, info: &ConnectionInfo) {
        let mut state = self.write();
        let start = state.get_conn_start;
        if state.timing.connection.is_empty() {
            state.timing.connection = info.to_string();
        }
        finish(&mut state.timing.total, start, Ok::<(), String>(()), "total");
    }

    fn dns_start(&self, _host: &str) {
        mark_start(&mut self.write().dns_start, "dns");
    }

    fn dns_done(&self, result: Result<&[SocketAddr], &std::io::Error>) {
        let mut state = self.write();
        let start = state.dns_start;
        finish(&mut state.timing.dns, start, result.map(|_| ()), "dns");
    }

    fn connect_start(&self, _addrs: &[SocketAddr]) {
        mark_start(&mut self.write().connect_start, "connect");
    }

    fn connect_done(&self, result: Result<SocketAddr, &std::io::Error>) {
        let mut state = self.write();
        let start = state.connect_start;
        finish(&mut state.timing.connect, start, result.map(|_| ()), "connect");
    }

    fn tls_handshake_start(&self) {
        mark_start(&mut self.write().tls_start, "tls");
    }

    fn tls_handshake_done(&self, result: Result<&TlsInfo, &std::io::Error>) {
        let mut state = self.write();
        let start = state.tls_start;
        if let Ok(TlsInfo {
            negotiated_protocol: Some(p),
            ..
        }) = &result
        {
            if state.timing.tls.is_not_run() {
                state.timing.negotiated_protocol = p.clone();
            }
        }
        finish(&mut state.timing.tls, start, result.map(|_| ()), "tls");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn refused() -> std::io::Error {
        std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "connection refused")
    }

    #[test]
    fn phase_latency_display() {
        assert_eq!(PhaseLatency::NotRun.to_string(), "");
        assert_eq!(
            PhaseLatency::Completed(Duration::from_millis(12)).to_string(),
            "12ms"
        );
        assert_eq!(
            PhaseLatency::Failed("no such host".to_string()).to_string(),
            "no such host"
        );
    }

    #[test]
    fn phase_latency_accessors() {
        let p = PhaseLatency::Completed(Duration::from_millis(3));
        assert_eq!(p.duration(), Some(Duration::from_millis(3)));
        assert_eq!(p.error(), None);
        let p = PhaseLatency::Failed("bad".to_string());
        assert_eq!(p.duration(), None);
        assert_eq!(p.error(), Some("bad"));
        assert!(PhaseLatency::NotRun.is_not_run());
    }

    #[tokio::test(start_paused = true)]
    async fn records_all_phases() {
        let tracer = ConnectionTracer::new();
        let addr: SocketAddr = "127.0.0.1:443".parse().unwrap();
        tracer.get_conn("example.com:443");
        tracer.dns_start("example.com");
        tokio::time::advance(Duration::from_millis(5)).await;
        tracer.dns_done(Ok(&[addr]));
        tracer.connect_start(&[addr]);
        tokio::time::advance(Duration::from_millis(7)).await;
        tracer.connect_done(Ok(addr));
        tracer.tls_handshake_start();
        tokio::time::advance(Duration::from_millis(11)).await;
        tracer.tls_handshake_done(Ok(&TlsInfo {
            protocol_version: Some("TLSv1_3".to_string()),
            negotiated_protocol: Some("http/1.1".to_string()),
        }));
        tracer.got_conn(&ConnectionInfo {
            remote_addr: Some(addr),
            ..Default::default()
        });

        let got = tracer.snapshot();
        assert_eq!(got.dns, PhaseLatency::Completed(Duration::from_millis(5)));
        assert_eq!(got.connect, PhaseLatency::Completed(Duration::from_millis(7)));
        assert_eq!(got.tls, PhaseLatency::Completed(Duration::from_millis(11)));
        assert_eq!(got.total, PhaseLatency::Completed(Duration::from_millis(23)));
        assert_eq!(got.negotiated_protocol, "http/1.1");
        assert!(got.connection.contains("Reused:false"), "{got:?}");
        assert!(got.connection.contains("127.0.0.1:443"), "{got:?}");
        assert_eq!(tracer.total_latency().to_string(), "23ms");
    }

    #[test]
    fn phases_not_run() {
        let tracer = ConnectionTracer::new();
        assert_eq!(tracer.snapshot(), ConnectionTiming::default());
        assert_eq!(tracer.dns_latency().to_string(), "");
        assert_eq!(tracer.negotiated_protocol(), "");
        assert_eq!(tracer.connection(), "");
    }

    #[test]
    fn failure_stores_error_text() {
        let tracer = ConnectionTracer::new();
        tracer.connect_start(&[]);
        tracer.connect_done(Err(&refused()));
        assert_eq!(
            tracer.connect_latency(),
            PhaseLatency::Failed("connection refused".to_string())
        );
        assert!(tracer.total_latency().is_not_run());
    }

    #[tokio::test(start_paused = true)]
    async fn write_once() {
        let tracer = ConnectionTracer::new();
        tracer.dns_start("example.com");
        tokio::time::advance(Duration::from_millis(5)).await;
        tracer.dns_done(Ok(&[]));
        // Neither a repeated start nor a repeated result changes the phase.
        tracer.dns_start("example.com");
        tokio::time::advance(Duration::from_millis(5)).await;
        tracer.dns_done(Err(&refused()));
        assert_eq!(
            tracer.dns_latency(),
            PhaseLatency::Completed(Duration::from_millis(5))
        );
    }

    #[test]
    fn tls_failure_keeps_protocol_empty() {
        let tracer = ConnectionTracer::new();
        tracer.tls_handshake_start();
        let e = std::io::Error::new(std::io::ErrorKind::InvalidData, "bad certificate");
        tracer.tls_handshake_done(Err(&e));
        assert_eq!(tracer.tls_latency().error(), Some("bad certificate"));
        assert_eq!(tracer.negotiated_protocol(), "");
    }

    #[test]
    fn done_without_start() {
        let tracer = ConnectionTracer::new();
        tracer.got_conn(&ConnectionInfo::default());
        assert!(tracer.total_latency().is_not_run());
        assert!(!tracer.connection().is_empty());
    }

    #[test]
    fn concurrent_readers_and_writers() {
        let tracer = Arc::new(ConnectionTracer::new());
        let writers = [
            std::thread::spawn({
                let t = tracer.clone();
                move || {
                    t.dns_start("example.com");
                    t.dns_done(Ok(&[]));
                }
            }),
            std::thread::spawn({
                let t = tracer.clone();
                move || {
                    t.connect_start(&[]);
                    t.connect_done(Err(&refused()));
                }
            }),
            std::thread::spawn({
                let t = tracer.clone();
                move || {
                    t.tls_handshake_start();
                    t.tls_handshake_done(Ok(&TlsInfo {
                        negotiated_protocol: Some("h2".to_string()),
                        ..Default::default()
                    }));
                }
            }),
        ];
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let t = tracer.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        let s = t.snapshot();
                        // The protocol and the TLS latency are written together.
                        assert_eq!(s.negotiated_protocol.is_empty(), s.tls.is_not_run(), "{s:?}");
                    }
                })
            })
            .collect();
        for h in writers.into_iter().chain(readers) {
            h.join().unwrap();
        }
        let got = tracer.snapshot();
        assert!(got.dns.duration().is_some(), "{got:?}");
        assert_eq!(got.connect.error(), Some("connection refused"));
        assert_eq!(got.negotiated_protocol, "h2");
    }
}
