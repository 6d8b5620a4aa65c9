//! # Listener
//!
//! Owns one protocol listen context, mints a child `Connection` for every
//! inbound peer the module reports, reference-counts those children so a
//! graceful `stop()` waits for every one of them to finish, and tolerates
//! `free()` being called before `stop()` (spec.md §4.5). Grounded on
//! `taps_listener.c`'s `tapsListenerNew`/`tapsListenerStop`/
//! `tapsListenerDeref` state machine, reframed per Design Notes §9: instead
//! of a mutable `ref_count` field guarded by nothing but event-loop
//! serialization, children hold a strong `Arc<ListenerCore>` and the last
//! one dropped is what fires `stopped`.

use crate::connection::{Connection, ConnectionCallbacks, ParentListener};
use crate::error::TapsError;
use crate::module::{ModuleEvent, ModuleEventReceiver, ProtoCtxId, ProtocolModule, module_event_channel};
use crate::event_loop::EventLoop;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// The application-supplied hooks a Listener drives (spec.md §3 "Listener").
pub struct ListenerCallbacks {
    /// Called for each inbound peer; returns the per-connection callbacks to
    /// install, or `None` to reject the peer (spec.md §4.5 "If the
    /// application does not supply `closed` and `connectionError`
    /// callbacks... the inbound peer is rejected").
    pub connection_received: Box<dyn Fn(&Connection) -> Option<ConnectionCallbacks> + Send + Sync>,
    pub establishment_error: Box<dyn Fn(TapsError) + Send + Sync>,
    pub stopped: Box<dyn FnOnce() + Send>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Open,
    Stopping,
    StoppedPendingChildren,
    Stopped,
}

struct Shared {
    state: Mutex<State>,
    ref_count: AtomicUsize,
    stop_requested: AtomicBool,
    stopped_fired: AtomicBool,
    stopped_callback: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl ParentListener for Shared {
    fn child_closed(&self) {
        let previous = self.ref_count.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "child_closed called with no live children");
        if previous == 1 {
            let mut state = self.state.lock().unwrap();
            if *state == State::StoppedPendingChildren {
                *state = State::Stopped;
                drop(state);
                self.fire_stopped();
            }
        }
    }
}

impl Shared {
    fn fire_stopped(&self) {
        if self.stopped_fired.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(cb) = self.stopped_callback.lock().unwrap().take() {
            cb();
        }
    }
}

/// A running listener. Cloning shares the same underlying state; the
/// module context is released once `Stopped` is reached and every clone
/// has been dropped, matching "closing the handle... is therefore never
/// performed from within a module callback" (spec.md §4.3).
#[derive(Clone)]
pub struct Listener {
    shared: Arc<Shared>,
    module: Arc<dyn ProtocolModule>,
    ctx: ProtoCtxId,
    connection_limit: Option<usize>,
}

impl Listener {
    /// Bring up a listener on `addr` using `module`, then spawn a
    /// dispatcher task that turns the module's events into Connections and
    /// state transitions (spec.md §4.5).
    ///
    /// # Arguments
    ///
    /// * `connection_limit` - caps the number of simultaneously Open
    ///   children; `None` means unbounded.
    /// * `event_loop` - reactor the dispatcher task and every spawned
    ///   child's event pump run on.
    ///
    /// # Returns
    ///
    /// The running `Listener` handle, or whatever error the module's
    /// `listen` entry point reported.
    pub async fn start(
        module: Arc<dyn ProtocolModule>,
        addr: SocketAddr,
        connection_limit: Option<usize>,
        callbacks: ListenerCallbacks,
        event_loop: &dyn EventLoop,
    ) -> Result<Listener, TapsError> {
        let (events, rx) = module_event_channel();
        let ctx = module.listen(addr, events).await?;

        let shared = Arc::new(Shared {
            state: Mutex::new(State::Open),
            ref_count: AtomicUsize::new(0),
            stop_requested: AtomicBool::new(false),
            stopped_fired: AtomicBool::new(false),
            stopped_callback: Mutex::new(Some(callbacks.stopped)),
        });

        let listener = Listener { shared: Arc::clone(&shared), module: Arc::clone(&module), ctx, connection_limit };

        event_loop.spawn(dispatch_loop(
            Arc::clone(&shared),
            Arc::clone(&module),
            ctx,
            rx,
            connection_limit,
            callbacks.connection_received,
            callbacks.establishment_error,
        ));

        Ok(listener)
    }

    /// §4.5 "Open → Stopping": invoke the module's `stop`, remembering that
    /// `stopped` must wait for live children.
    pub async fn stop(&self) {
        if self.shared.stop_requested.swap(true, Ordering::AcqRel) {
            return;
        }
        {
            let mut state = self.shared.state.lock().unwrap();
            if *state == State::Open {
                *state = State::Stopping;
            }
        }
        self.module.stop(self.ctx).await;
    }

    /// §4.5 "Early-free tolerance": equivalent to stop-then-free. Since
    /// `stopped` only fires once every child's terminal callback has run
    /// (via `Shared::child_closed`), simply issuing `stop` here and letting
    /// the dispatcher finish is sufficient — there is nothing additional to
    /// release synchronously.
    pub async fn free(&self) {
        self.stop().await;
    }

    pub fn live_children(&self) -> usize {
        self.shared.ref_count.load(Ordering::Acquire)
    }

    pub fn connection_limit(&self) -> Option<usize> {
        self.connection_limit
    }
}

async fn dispatch_loop(
    shared: Arc<Shared>,
    module: Arc<dyn ProtocolModule>,
    listener_ctx: ProtoCtxId,
    mut rx: ModuleEventReceiver,
    connection_limit: Option<usize>,
    connection_received: Box<dyn Fn(&Connection) -> Option<ConnectionCallbacks> + Send + Sync>,
    establishment_error: Box<dyn Fn(TapsError) + Send + Sync>,
) {
    let children: Mutex<HashMap<ProtoCtxId, Connection>> = Mutex::new(HashMap::new());

    while let Some(event) = rx.recv().await {
        match event {
            ModuleEvent::ConnectionReceived { listener_ctx: lctx, child_ctx } => {
                if lctx != listener_ctx {
                    continue;
                }
                let current = shared.ref_count.load(Ordering::Acquire);
                let over_limit = connection_limit.map(|limit| current >= limit).unwrap_or(false);
                if over_limit {
                    // §4.5 "over-limit inbound accepts are dropped by returning no callback set".
                    module.stop(child_ctx).await;
                    continue;
                }
                let conn = Connection::new(
                    Arc::clone(&module),
                    child_ctx,
                    Some(Arc::clone(&shared) as Arc<dyn ParentListener>),
                    ConnectionCallbacks { closed: Box::new(|| {}), connection_error: Box::new(|_| {}) },
                );
                match connection_received(&conn) {
                    Some(real_callbacks) => {
                        conn.install_callbacks(real_callbacks);
                        shared.ref_count.fetch_add(1, Ordering::AcqRel);
                        children.lock().unwrap().insert(child_ctx, conn);
                    }
                    None => {
                        // Application supplied no closed/connectionError callbacks: reject.
                        module.stop(child_ctx).await;
                    }
                }
            }
            ModuleEvent::EstablishmentError { ctx, reason } => {
                if ctx == listener_ctx {
                    establishment_error(reason);
                }
            }
            ModuleEvent::Stopped { ctx } if ctx == listener_ctx => {
                let mut state = shared.state.lock().unwrap();
                if shared.ref_count.load(Ordering::Acquire) == 0 {
                    *state = State::Stopped;
                    drop(state);
                    shared.fire_stopped();
                } else {
                    *state = State::StoppedPendingChildren;
                }
            }
            other => {
                route_to_child(&children, &other);
            }
        }
    }
}

fn route_to_child(children: &Mutex<HashMap<ProtoCtxId, Connection>>, event: &ModuleEvent) {
    let ctx = match event {
        ModuleEvent::Closed { ctx } | ModuleEvent::ConnectionError { ctx, .. } => Some(*ctx),
        _ => None,
    };
    if let Some(ctx) = ctx {
        if let Some(conn) = children.lock().unwrap().get(&ctx) {
            conn.handle_event(event.clone());
        }
        children.lock().unwrap().remove(&ctx);
        return;
    }
    // Sent/Expired/SendError/Received/ReceivedPartial/ReceiveError carry only an
    // item id, not a connection ctx; broadcast is unnecessary because each
    // Connection ignores events for item ids it doesn't own (see
    // `Connection::handle_event`'s front-of-queue id check).
    for conn in children.lock().unwrap().values() {
        conn.handle_event(event.clone());
    }
}
