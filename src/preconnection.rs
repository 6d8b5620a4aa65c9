//! # Preconnection
//!
//! An immutable bundle of endpoints, a property set, and the ranked
//! candidates the Property Reducer produced, frozen at construction and
//! dispatched to either a Listener (`listen`) or a Connection (`initiate`)
//! (spec.md §4.7). Grounded on `taps_preconnection.c`'s
//! `tapsPreconnectionNew`/`tapsPreconnectionListen`/
//! `tapsPreconnectionInitiate`, including its IPv6-preferred sockaddr
//! resolution.

use crate::catalog::Catalog;
use crate::connection::{Connection, ConnectionCallbacks};
use crate::endpoint::Endpoint;
use crate::error::{TapsError, TapsResult};
use crate::event_loop::EventLoop;
use crate::listener::{Listener, ListenerCallbacks};
use crate::module::{module_event_channel, ModuleEvent, ModuleRegistry, ProtocolModule};
use crate::properties::TransportProperties;
use crate::reducer::{self, CandidateList};
use std::net::SocketAddr;
use std::sync::Arc;

/// Maximum local/remote endpoints a Preconnection may carry (spec.md §3).
pub const MAX_ENDPOINTS: usize = 8;

/// Placeholder for TLS/security configuration. TLS itself is out of scope
/// (spec.md §1 Non-goals); the slot exists so `Preconnection`'s shape
/// matches spec.md §3 and a later security layer has somewhere to attach.
#[derive(Debug, Clone, Default)]
pub struct SecurityParameters;

/// A frozen bundle of endpoints, properties, and ranked candidates
/// (spec.md §3 "Preconnection").
#[derive(Clone)]
pub struct Preconnection {
    local: Vec<Endpoint>,
    remote: Vec<Endpoint>,
    properties: TransportProperties,
    candidates: CandidateList,
    #[allow(dead_code)]
    security: Option<SecurityParameters>,
}

impl Preconnection {
    /// §4.7 "Construction": validates endpoint counts, reduces `properties`
    /// against `catalog`, and freezes the result.
    pub fn new(
        local: Vec<Endpoint>,
        remote: Vec<Endpoint>,
        properties: TransportProperties,
        catalog: &dyn Catalog,
        security: Option<SecurityParameters>,
    ) -> TapsResult<Preconnection> {
        if local.len() > MAX_ENDPOINTS || remote.len() > MAX_ENDPOINTS {
            return Err(TapsError::TooManyEndpoints);
        }
        let candidates = reducer::reduce(&properties, catalog)?;
        Ok(Preconnection { local, remote, properties, candidates, security })
    }

    pub fn candidates(&self) -> &CandidateList {
        &self.candidates
    }

    pub fn properties(&self) -> &TransportProperties {
        &self.properties
    }

    /// §4.7 "Listen": resolve the first local endpoint, load the top
    /// candidate's module, and bring up a Listener on it. Any failure along
    /// this path surfaces as `Unavailable` with the underlying reason, per
    /// spec.md §4.7 step 5.
    pub async fn listen(
        &self,
        registry: &ModuleRegistry,
        event_loop: &dyn EventLoop,
        connection_limit: Option<usize>,
        callbacks: ListenerCallbacks,
    ) -> TapsResult<Listener> {
        let local = self
            .local
            .first()
            .ok_or_else(|| TapsError::InvalidArgument("listen requires at least one local endpoint".to_string()))?;
        let addr = resolve_endpoint(local)?;
        let candidate = self.candidates.top().ok_or(TapsError::NoViableProtocol)?.clone();
        let module: Arc<dyn ProtocolModule> = Arc::from(registry.load(&candidate.module_path, true)?);

        Listener::start(module, addr, connection_limit, callbacks, event_loop)
            .await
            .map_err(|e| TapsError::Unavailable(e.to_string()))
    }

    /// §4.7 "Initiate": resolve the first remote endpoint, load the top
    /// candidate's module, and drive `connect` to completion (success or
    /// `EstablishmentError`).
    pub async fn initiate(
        &self,
        registry: &ModuleRegistry,
        event_loop: &dyn EventLoop,
        callbacks: ConnectionCallbacks,
    ) -> TapsResult<Connection> {
        let remote = self
            .remote
            .first()
            .ok_or_else(|| TapsError::InvalidArgument("initiate requires at least one remote endpoint".to_string()))?;
        let addr = resolve_endpoint(remote)?;
        let candidate = self.candidates.top().ok_or(TapsError::NoViableProtocol)?.clone();
        let module: Arc<dyn ProtocolModule> = Arc::from(registry.load(&candidate.module_path, false)?);

        let (events, mut rx) = module_event_channel();
        let ctx = module.connect(addr, events).await?;

        match rx.recv().await {
            Some(ModuleEvent::Ready { ctx: ready_ctx }) if ready_ctx == ctx => {
                let conn = Connection::new(Arc::clone(&module), ctx, None, callbacks);
                conn.spawn_event_pump(rx, event_loop);
                Ok(conn)
            }
            Some(ModuleEvent::EstablishmentError { reason, .. }) => {
                Err(TapsError::Unavailable(reason.to_string()))
            }
            _ => Err(TapsError::connection_died()),
        }
    }
}

/// Resolve an `Endpoint` to a concrete `SocketAddr`, preferring IPv6 over
/// IPv4 when both are set (`taps_preconnection.c`'s listen-address
/// resolution). The port is mandatory.
fn resolve_endpoint(endpoint: &Endpoint) -> TapsResult<SocketAddr> {
    let port = endpoint
        .port()
        .ok_or_else(|| TapsError::InvalidArgument("endpoint has no port".to_string()))?;
    if port == 0 {
        return Err(TapsError::InvalidArgument("endpoint port must be non-zero".to_string()));
    }
    if let Some(v6) = endpoint.ipv6() {
        return Ok(SocketAddr::new(v6.into(), port));
    }
    if let Some(v4) = endpoint.ipv4() {
        return Ok(SocketAddr::new(v4.into(), port));
    }
    Err(TapsError::InvalidArgument(
        "endpoint has neither an IPv4 nor an IPv6 address (hostname resolution is out of scope)".to_string(),
    ))
}
