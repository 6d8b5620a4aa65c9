//! # Endpoint
//!
//! One end of a communication: optional fields {hostname, service, IPv4,
//! IPv6, port, interface name, named protocol, STUN server+credentials}
//! plus bidirectional alias links forming an equivalence class (spec.md §3
//! "Endpoint"). Grounded on `taps_endpoint.c`'s bitfield-tracked set-once
//! fields (`has_port`, `has_ipv4`, ... each rejecting a second write with
//! `EBUSY`).
//!
//! Aliases: the original links endpoints with mutually-owning `prevAlias`/
//! `nextAlias` pointers, a cycle Design Notes §9 calls out for replacement.
//! Here an alias group is a plain `HashSet<EndpointId>` shared (`Rc<RefCell<_>>`)
//! between every endpoint in the group, so `alias_with` just unions two sets
//! instead of walking and re-linking a doubly-linked list.

use crate::error::TapsError;
use std::cell::RefCell;
use std::collections::HashSet;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_ENDPOINT_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque identifier for an `Endpoint`, stable for its lifetime. Used as the
/// alias-group member key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EndpointId(u64);

impl EndpointId {
    fn next() -> Self {
        EndpointId(NEXT_ENDPOINT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// STUN server reference plus opaque credentials, settable once.
#[derive(Debug, Clone)]
pub struct StunServer {
    pub address: String,
    pub port: u16,
    pub credentials: Vec<u8>,
}

/// One endpoint: a value object with set-once optional fields. Re-setting a
/// field that has already been set fails with `TapsError::Busy`, matching
/// `tapsEndpointWith*`'s `EBUSY` behavior.
#[derive(Debug, Clone)]
pub struct Endpoint {
    id: EndpointId,
    hostname: Option<String>,
    service: Option<String>,
    ipv4: Option<Ipv4Addr>,
    ipv6: Option<Ipv6Addr>,
    port: Option<u16>,
    interface: Option<String>,
    protocol: Option<String>,
    stun: Option<StunServer>,
    aliases: Rc<RefCell<HashSet<EndpointId>>>,
}

macro_rules! set_once {
    ($self:ident, $field:ident, $value:expr) => {{
        if $self.$field.is_some() {
            return Err(TapsError::Busy);
        }
        $self.$field = Some($value);
        Ok(())
    }};
}

impl Endpoint {
    pub fn new() -> Self {
        let id = EndpointId::next();
        let mut aliases = HashSet::new();
        aliases.insert(id);
        Endpoint {
            id,
            hostname: None,
            service: None,
            ipv4: None,
            ipv6: None,
            port: None,
            interface: None,
            protocol: None,
            stun: None,
            aliases: Rc::new(RefCell::new(aliases)),
        }
    }

    pub fn id(&self) -> EndpointId {
        self.id
    }

    pub fn with_hostname(&mut self, hostname: impl Into<String>) -> Result<(), TapsError> {
        set_once!(self, hostname, hostname.into())
    }

    pub fn with_service(&mut self, service: impl Into<String>) -> Result<(), TapsError> {
        set_once!(self, service, service.into())
    }

    pub fn with_port(&mut self, port: u16) -> Result<(), TapsError> {
        set_once!(self, port, port)
    }

    pub fn with_ipv4(&mut self, addr: Ipv4Addr) -> Result<(), TapsError> {
        set_once!(self, ipv4, addr)
    }

    pub fn with_ipv6(&mut self, addr: Ipv6Addr) -> Result<(), TapsError> {
        set_once!(self, ipv6, addr)
    }

    pub fn with_interface(&mut self, name: impl Into<String>) -> Result<(), TapsError> {
        set_once!(self, interface, name.into())
    }

    pub fn with_protocol(&mut self, name: impl Into<String>) -> Result<(), TapsError> {
        set_once!(self, protocol, name.into())
    }

    pub fn with_stun_server(&mut self, server: StunServer) -> Result<(), TapsError> {
        set_once!(self, stun, server)
    }

    pub fn hostname(&self) -> Option<&str> {
        self.hostname.as_deref()
    }

    pub fn service(&self) -> Option<&str> {
        self.service.as_deref()
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn ipv4(&self) -> Option<Ipv4Addr> {
        self.ipv4
    }

    pub fn ipv6(&self) -> Option<Ipv6Addr> {
        self.ipv6
    }

    pub fn interface(&self) -> Option<&str> {
        self.interface.as_deref()
    }

    pub fn protocol(&self) -> Option<&str> {
        self.protocol.as_deref()
    }

    /// Merge this endpoint's alias group with another's (`tapsAddAlias`).
    /// Both endpoints, and everything already aliased to either, end up in
    /// one shared group.
    pub fn alias_with(&mut self, other: &mut Endpoint) {
        if Rc::ptr_eq(&self.aliases, &other.aliases) {
            return;
        }
        let other_ids: Vec<EndpointId> = other.aliases.borrow().iter().copied().collect();
        self.aliases.borrow_mut().extend(other_ids);
        other.aliases = Rc::clone(&self.aliases);
    }

    /// Every endpoint id in this endpoint's alias equivalence class,
    /// including itself.
    pub fn alias_group(&self) -> Vec<EndpointId> {
        self.aliases.borrow().iter().copied().collect()
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self::new()
    }
}
