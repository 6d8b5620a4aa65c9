//! # taps
//!
//! A protocol-agnostic transport runtime: applications express what they
//! need (reliability, ordering, congestion control, ...) as preferences over
//! a catalog of available protocol implementations, and the runtime reduces
//! that into a ranked candidate list, then drives whichever protocol module
//! wins through a uniform Listener/Connection lifecycle.
//!
//! Distilled from the Transport Services (TAPS) architecture; the C-style
//! public API, hostname resolution, Happy Eyeballs racing, and TLS are out
//! of scope here — this crate is the reduction/listener/connection core a
//! higher-level API would sit on top of.

pub mod catalog;
pub mod connection;
pub mod endpoint;
pub mod error;
pub mod event_loop;
pub mod listener;
pub mod message;
pub mod module;
pub mod preconnection;
pub mod properties;
pub mod reducer;
pub mod tcp_module;

pub use catalog::{Catalog, ProtocolDescriptor, StaticCatalog, YamlCatalog};
pub use connection::{AppToken, Connection, ConnectionCallbacks, RecvCallbacks, SendCallbacks};
pub use endpoint::{Endpoint, EndpointId, StunServer};
pub use error::{TapsError, TapsResult};
pub use event_loop::{AmbientRuntime, EventLoop, TokioCurrentThread};
pub use listener::{Listener, ListenerCallbacks};
pub use message::Message;
pub use module::{ItemId, ModuleCapabilities, ModuleEvent, ModuleEvents, ModuleRegistry, ProtoCtxId, ProtocolModule};
pub use preconnection::{Preconnection, SecurityParameters};
pub use properties::{Ability, ConnectionType, Direction, MultipathPreference, Preference, TransportProperties};
pub use reducer::CandidateList;
pub use tcp_module::TcpModule;

/// The current version of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build a `ModuleRegistry` pre-populated with the bundled reference
/// modules. Applications that only need the TCP module can use this
/// directly; others build their own registry and `register` additional
/// modules alongside or instead of it.
pub fn default_registry() -> ModuleRegistry {
    let mut registry = ModuleRegistry::new();
    registry.register("taps_tcp", TcpModule::ctor);
    registry
}
