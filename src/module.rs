//! # Protocol Module Contract and Loader
//!
//! The five-entry-point ABI a protocol implementation must satisfy (spec.md
//! §6.1), and the loader that resolves a module by path and vets it for
//! completeness (spec.md §4.3). Grounded on `taps_listener.c`'s `dlsym`
//! vetting (`tapsListenerNew` fails fast if `listen`/`stop`/`send`/`receive`
//! don't all resolve) and on `ipc/mod.rs`'s `TransportFactory`, which already
//! maps a config value to a constructor for a boxed `dyn IpcTransport`.
//!
//! Design Notes §9 calls dynamic loading a detail, not the contract; Rust has
//! no safe idiomatic analogue to `dlopen` worth emulating; so modules here
//! are compiled in and resolved through a `ModuleRegistry` keyed by the same
//! `module_path` string the catalog already carries. `on_received`/
//! `on_received_partial` carry an owned `Bytes` rather than a raw iovec,
//! since a module reading from a tokio socket already owns the buffer it
//! filled.

use crate::error::TapsError;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

static NEXT_CTX_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque handle a module hands back from `listen`/`connect`, used on every
/// subsequent call against that listen/connection context
/// (`protocol_ctx` in §6.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProtoCtxId(u64);

impl ProtoCtxId {
    pub fn new() -> Self {
        ProtoCtxId(NEXT_CTX_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ProtoCtxId {
    fn default() -> Self {
        Self::new()
    }
}

static NEXT_ITEM_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque token identifying one outstanding SendItem or RecvItem
/// (`item_token` in §6.1). Allocated from a single process-wide counter
/// rather than per-Connection, since a Listener multiplexes the `Sent`/
/// `Received`/... events of every child it owns over one shared
/// `ModuleEvents` channel and has only the item id to route by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ItemId(pub u64);

impl ItemId {
    pub fn new() -> Self {
        ItemId(NEXT_ITEM_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ItemId {
    fn default() -> Self {
        Self::new()
    }
}

/// One module → core callback, per the table in spec.md §6.1.
#[derive(Debug, Clone)]
pub enum ModuleEvent {
    ConnectionReceived { listener_ctx: ProtoCtxId, child_ctx: ProtoCtxId },
    /// Outbound `connect` finished establishing; the connection is ready to
    /// send/receive. Named `on_ready` in the §6.1 `connect` signature, kept
    /// distinct from `ConnectionReceived` since it has no listener parent.
    Ready { ctx: ProtoCtxId },
    EstablishmentError { ctx: ProtoCtxId, reason: TapsError },
    Stopped { ctx: ProtoCtxId },
    Sent { item: ItemId },
    Expired { item: ItemId },
    SendError { item: ItemId, reason: TapsError },
    /// Peer half-closed; `data` is whatever arrived with the FIN, possibly empty.
    Received { item: ItemId, data: Bytes },
    ReceivedPartial { item: ItemId, data: Bytes },
    ReceiveError { item: ItemId, reason: TapsError },
    Closed { ctx: ProtoCtxId },
    ConnectionError { ctx: ProtoCtxId, reason: TapsError },
}

/// The channel a module uses to report events back to its owning
/// Listener/Connection. Cloneable so a module can hand a copy to each
/// spawned accept-loop or I/O task.
#[derive(Clone)]
pub struct ModuleEvents(mpsc::UnboundedSender<ModuleEvent>);

impl ModuleEvents {
    pub fn emit(&self, event: ModuleEvent) {
        let _ = self.0.send(event);
    }
}

/// Receiving half paired with a fresh `ModuleEvents` sender
/// (`module_event_channel()`).
pub type ModuleEventReceiver = mpsc::UnboundedReceiver<ModuleEvent>;

pub fn module_event_channel() -> (ModuleEvents, ModuleEventReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ModuleEvents(tx), rx)
}

/// A pluggable protocol implementation (spec.md §6.1). `listen` and
/// `connect` establish a context and return immediately; all further
/// progress — new inbound connections, send/receive completions, errors —
/// arrives through the `ModuleEvents` channel passed at establishment time.
#[async_trait]
pub trait ProtocolModule: Send + Sync {
    async fn listen(&self, addr: SocketAddr, events: ModuleEvents) -> Result<ProtoCtxId, TapsError>;

    async fn stop(&self, ctx: ProtoCtxId);

    async fn connect(&self, addr: SocketAddr, events: ModuleEvents) -> Result<ProtoCtxId, TapsError>;

    async fn send(&self, ctx: ProtoCtxId, item: ItemId, data: Bytes);

    /// Ask the module to deliver up to `max_len` more bytes for `item`,
    /// reporting progress as `ReceivedPartial`/`Received` events.
    async fn receive(&self, ctx: ProtoCtxId, item: ItemId, max_len: usize);
}

/// Which of the five entry points a module constructor actually wires up.
/// Stands in for the symbol table `dlsym` would probe in the source
/// implementation.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModuleCapabilities {
    pub listen: bool,
    pub stop: bool,
    pub connect: bool,
    pub send: bool,
    pub receive: bool,
}

type ModuleCtor = fn() -> (Box<dyn ProtocolModule>, ModuleCapabilities);

/// Maps a catalog descriptor's `module_path` to a constructor for the
/// compiled-in module it names (spec.md §4.3 "load(path, is_listener)").
#[derive(Default)]
pub struct ModuleRegistry {
    constructors: HashMap<String, ModuleCtor>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        ModuleRegistry { constructors: HashMap::new() }
    }

    pub fn register(&mut self, module_path: impl Into<String>, ctor: ModuleCtor) {
        self.constructors.insert(module_path.into(), ctor);
    }

    /// Resolve `module_path` and vet it for the entry points `is_listener`
    /// requires: listen+stop+send+receive for a listener, connect+send+receive
    /// for an initiator. Fails fast with `IncompleteModule(symbol)` exactly as
    /// `tapsListenerNew`'s `dlsym` loop does.
    pub fn load(&self, module_path: &str, is_listener: bool) -> Result<Box<dyn ProtocolModule>, TapsError> {
        let ctor = self
            .constructors
            .get(module_path)
            .ok_or_else(|| TapsError::LoadError(module_path.to_string()))?;
        let (module, caps) = ctor();

        if is_listener {
            if !caps.listen {
                return Err(TapsError::IncompleteModule("listen".to_string()));
            }
            if !caps.stop {
                return Err(TapsError::IncompleteModule("stop".to_string()));
            }
        } else if !caps.connect {
            return Err(TapsError::IncompleteModule("connect".to_string()));
        }
        if !caps.send {
            return Err(TapsError::IncompleteModule("send".to_string()));
        }
        if !caps.receive {
            return Err(TapsError::IncompleteModule("receive".to_string()));
        }
        Ok(module)
    }
}
