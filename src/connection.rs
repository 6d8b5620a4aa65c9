//! # Connection
//!
//! Multiplexes application `send`/`receive` requests onto a protocol module
//! under an at-most-one-outstanding-per-direction discipline, with FIFO
//! per-direction ordering and partial-read accumulation up to a minimum
//! length (spec.md §4.6). Grounded on `taps_connection.c`'s `_send_item`/
//! `_recv_item` doubly-linked queues and `_taps_received_partial`'s
//! re-dispatch-with-shrunk-iovec loop.
//!
//! The source keeps exactly one in-flight item per direction because it
//! assumes a single-threaded event loop with no locking (spec.md §5). The
//! Rust rewrite still needs its queues reachable from a tokio task spawned
//! to await a module call, so state lives behind a `Mutex` — held only for
//! the duration of a queue mutation, never across an `.await` — rather than
//! the raw pointer mutation the source performs directly on the event-loop
//! thread.

use crate::error::TapsError;
use crate::module::{ItemId, ModuleEvent, ModuleEventReceiver, ProtoCtxId, ProtocolModule};
use crate::event_loop::EventLoop;
use crate::message::Message;
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Opaque per-request token the application supplies and gets back in its
/// terminal callback, matching the C contract's untyped `app_token`.
pub type AppToken = u64;

/// Terminal callbacks for one `send()` call.
pub struct SendCallbacks {
    pub sent: Box<dyn FnOnce(AppToken) + Send>,
    pub expired: Box<dyn FnOnce(AppToken) + Send>,
    pub send_error: Box<dyn FnOnce(AppToken, TapsError) + Send>,
}

/// Terminal/progress callbacks for one `receive()` call. All three are
/// mandatory — the spec's runtime-checked "all three callbacks present or
/// *InvalidArgument*" becomes a compile-time guarantee here since the type
/// has no way to omit a field.
pub struct RecvCallbacks {
    pub received: Box<dyn FnOnce(AppToken, Bytes) + Send>,
    pub received_partial: Box<dyn FnOnce(AppToken, Bytes) + Send>,
    pub receive_error: Box<dyn FnOnce(AppToken, TapsError) + Send>,
}

/// Connection-level terminal callbacks, fired exactly once.
pub struct ConnectionCallbacks {
    pub closed: Box<dyn FnOnce() + Send>,
    pub connection_error: Box<dyn FnOnce(TapsError) + Send>,
}

struct SendItem {
    id: ItemId,
    message: Message,
    app_token: AppToken,
    callbacks: SendCallbacks,
}

struct RecvItem {
    id: ItemId,
    min_length: usize,
    max_length: usize,
    curr_length: usize,
    accumulated: Vec<u8>,
    app_token: AppToken,
    callbacks: RecvCallbacks,
}

/// Implemented by a Listener's internal core so a child Connection can
/// decrement its parent's live-child count on teardown without depending on
/// `listener.rs` directly (spec.md §4.6 "decrement the parent Listener's
/// ref").
pub trait ParentListener: Send + Sync {
    fn child_closed(&self);
}

struct ConnectionInner {
    ctx: Option<ProtoCtxId>,
    module: Arc<dyn ProtocolModule>,
    send_queue: VecDeque<SendItem>,
    recv_queue: VecDeque<RecvItem>,
    send_ready: bool,
    receive_ready: bool,
    callbacks: Option<ConnectionCallbacks>,
    parent: Option<Arc<dyn ParentListener>>,
}

/// A connection to a single remote peer, bound to one protocol module
/// context. Cheaply cloneable; clones share the same underlying queues.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Mutex<ConnectionInner>>,
}

impl Connection {
    /// Build a connection already bound to an established module context
    /// (either an inbound accept or a completed outbound `connect`).
    pub fn new(
        module: Arc<dyn ProtocolModule>,
        ctx: ProtoCtxId,
        parent: Option<Arc<dyn ParentListener>>,
        callbacks: ConnectionCallbacks,
    ) -> Self {
        Connection {
            inner: Arc::new(Mutex::new(ConnectionInner {
                ctx: Some(ctx),
                module,
                send_queue: VecDeque::new(),
                recv_queue: VecDeque::new(),
                send_ready: true,
                receive_ready: true,
                callbacks: Some(callbacks),
                parent,
            })),
        }
    }

    /// Replace the placeholder connection-level callbacks a Listener
    /// installs before the application has had a chance to supply its own
    /// (spec.md §4.5 "invoke the application's connectionReceived(...,
    /// out callback_set)").
    pub fn install_callbacks(&self, callbacks: ConnectionCallbacks) {
        self.inner.lock().unwrap().callbacks = Some(callbacks);
    }

    /// Spawn a background task that pumps `events` into this connection's
    /// `handle_event`, for a connection that owns its module channel
    /// outright (the `initiate` path — a Listener's children instead share
    /// the Listener's single event channel and are dispatched to by it).
    pub fn spawn_event_pump(&self, mut events: ModuleEventReceiver, event_loop: &dyn EventLoop) {
        let conn = self.clone();
        event_loop.spawn(async move {
            while let Some(event) = events.recv().await {
                conn.handle_event(event);
            }
        });
    }

    /// §4.6 "Send contract": enqueue, and dispatch immediately if the wire
    /// is idle. Returns the item id the eventual `Sent`/`Expired`/
    /// `SendError` event will carry.
    pub fn send(&self, message: Message, app_token: AppToken, callbacks: SendCallbacks) -> ItemId {
        let mut inner = self.inner.lock().unwrap();
        let id = ItemId::new();
        let item = SendItem { id, message, app_token, callbacks };
        inner.send_queue.push_back(item);
        if inner.send_ready {
            inner.send_ready = false;
            self.dispatch_send_head(&mut inner);
        }
        id
    }

    /// §4.6 "Receive contract": enqueue, and dispatch immediately if the
    /// wire is idle. Returns the item id the eventual `Received`/
    /// `ReceivedPartial`/`ReceiveError` event will carry.
    pub fn receive(&self, app_token: AppToken, min_length: usize, max_length: usize, callbacks: RecvCallbacks) -> ItemId {
        let mut inner = self.inner.lock().unwrap();
        let id = ItemId::new();
        let item = RecvItem {
            id,
            min_length,
            max_length,
            curr_length: 0,
            accumulated: Vec::new(),
            app_token,
            callbacks,
        };
        inner.recv_queue.push_back(item);
        if inner.receive_ready {
            inner.receive_ready = false;
            self.dispatch_recv_head(&mut inner);
        }
        id
    }

    fn dispatch_send_head(&self, inner: &mut ConnectionInner) {
        let Some(ctx) = inner.ctx else { return };
        let Some(item) = inner.send_queue.front() else { return };
        let module = Arc::clone(&inner.module);
        let data = item.message.to_contiguous();
        let item_id = item.id;
        tokio::spawn(async move {
            module.send(ctx, item_id, data).await;
        });
    }

    fn dispatch_recv_head(&self, inner: &mut ConnectionInner) {
        let Some(ctx) = inner.ctx else { return };
        let Some(item) = inner.recv_queue.front() else { return };
        let remaining = item.max_length.saturating_sub(item.curr_length).max(1);
        let module = Arc::clone(&inner.module);
        let item_id = item.id;
        tokio::spawn(async move {
            module.receive(ctx, item_id, remaining).await;
        });
    }

    /// Route one module callback to the right internal handler. Called
    /// directly by a Listener's dispatcher for child connections, or by
    /// this connection's own event pump for standalone connections.
    pub fn handle_event(&self, event: ModuleEvent) {
        match event {
            ModuleEvent::Sent { item } => self.complete_send(item, |cb, token| (cb.sent)(token)),
            ModuleEvent::Expired { item } => self.complete_send(item, |cb, token| (cb.expired)(token)),
            ModuleEvent::SendError { item, reason } => {
                self.complete_send(item, |cb, token| (cb.send_error)(token, reason))
            }
            ModuleEvent::ReceivedPartial { item, data } => self.on_received_partial(item, data),
            ModuleEvent::Received { item, data } => self.on_received(item, data),
            ModuleEvent::ReceiveError { item, reason } => self.on_receive_error(item, reason),
            ModuleEvent::Closed { .. } => self.on_terminal(|cb| (cb.closed)()),
            ModuleEvent::ConnectionError { reason, .. } => {
                self.on_terminal(|cb| (cb.connection_error)(reason))
            }
            ModuleEvent::ConnectionReceived { .. }
            | ModuleEvent::Ready { .. }
            | ModuleEvent::EstablishmentError { .. }
            | ModuleEvent::Stopped { .. } => {
                // Listener/connect-establishment events; already consumed before
                // a Connection value exists (see `Preconnection::initiate`).
            }
        }
    }

    fn complete_send(&self, item: ItemId, fire: impl FnOnce(SendCallbacks, AppToken)) {
        let mut inner = self.inner.lock().unwrap();
        let Some(front) = inner.send_queue.front() else { return };
        if front.id != item {
            return;
        }
        let completed = inner.send_queue.pop_front().unwrap();
        if inner.send_queue.front().is_some() {
            self.dispatch_send_head(&mut inner);
        } else {
            inner.send_ready = true;
        }
        drop(inner);
        fire(completed.callbacks, completed.app_token);
    }

    fn on_received_partial(&self, item: ItemId, data: Bytes) {
        let mut inner = self.inner.lock().unwrap();
        let Some(front) = inner.recv_queue.front_mut() else { return };
        if front.id != item {
            return;
        }
        front.curr_length += data.len();
        front.accumulated.extend_from_slice(&data);

        if front.curr_length < front.min_length {
            self.dispatch_recv_head(&mut inner);
            return;
        }

        let completed = inner.recv_queue.pop_front().unwrap();
        if inner.recv_queue.front().is_some() {
            self.dispatch_recv_head(&mut inner);
        } else {
            inner.receive_ready = true;
        }
        drop(inner);
        let bytes = Bytes::from(completed.accumulated);
        (completed.callbacks.received_partial)(completed.app_token, bytes);
    }

    fn on_received(&self, item: ItemId, data: Bytes) {
        let mut inner = self.inner.lock().unwrap();
        let Some(front) = inner.recv_queue.front_mut() else { return };
        if front.id != item {
            return;
        }
        front.curr_length += data.len();
        front.accumulated.extend_from_slice(&data);
        let below_min = front.curr_length < front.min_length;

        let completed = inner.recv_queue.pop_front().unwrap();
        if inner.recv_queue.front().is_some() {
            self.dispatch_recv_head(&mut inner);
        } else {
            inner.receive_ready = true;
        }
        drop(inner);

        if below_min {
            (completed.callbacks.receive_error)(completed.app_token, TapsError::MessageBelowMinLength);
        } else {
            let bytes = Bytes::from(completed.accumulated);
            (completed.callbacks.received)(completed.app_token, bytes);
        }
    }

    fn on_receive_error(&self, item: ItemId, reason: TapsError) {
        let mut inner = self.inner.lock().unwrap();
        let Some(front) = inner.recv_queue.front() else { return };
        if front.id != item {
            return;
        }
        let completed = inner.recv_queue.pop_front().unwrap();
        if inner.recv_queue.front().is_some() {
            self.dispatch_recv_head(&mut inner);
        } else {
            inner.receive_ready = true;
        }
        drop(inner);
        (completed.callbacks.receive_error)(completed.app_token, reason);
    }

    fn on_terminal(&self, fire: impl FnOnce(ConnectionCallbacks)) {
        let (callbacks, parent) = {
            let mut inner = self.inner.lock().unwrap();
            inner.ctx = None;
            (inner.callbacks.take(), inner.parent.clone())
        };
        // Fire this connection's own terminal callback before touching the
        // parent's ref count: `Shared::child_closed` can synchronously fire
        // the Listener's `stopped` callback the moment the count reaches
        // zero, and spec.md §5 requires every child's `closed`/
        // `connectionError` to have already fired before that happens.
        if let Some(callbacks) = callbacks {
            fire(callbacks);
        }
        if let Some(parent) = parent {
            parent.child_closed();
        }
    }

    /// `connection_free` (spec.md §4.6 "Teardown"): drain whatever is left
    /// in either queue, firing each item's error callback with
    /// `ConnectionDied`.
    pub fn free(&self) {
        let (sends, recvs) = {
            let mut inner = self.inner.lock().unwrap();
            (
                std::mem::take(&mut inner.send_queue),
                std::mem::take(&mut inner.recv_queue),
            )
        };
        for item in sends {
            (item.callbacks.send_error)(item.app_token, TapsError::connection_died());
        }
        for item in recvs {
            (item.callbacks.receive_error)(item.app_token, TapsError::connection_died());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex as AsyncMutex;

    struct LoopbackModule {
        pending_sends: AsyncMutex<VecDeque<(ProtoCtxId, ItemId, Bytes)>>,
    }

    #[async_trait]
    impl ProtocolModule for LoopbackModule {
        async fn listen(&self, _addr: SocketAddr, _events: crate::module::ModuleEvents) -> Result<ProtoCtxId, TapsError> {
            unreachable!("not used in these tests")
        }
        async fn stop(&self, _ctx: ProtoCtxId) {}
        async fn connect(&self, _addr: SocketAddr, _events: crate::module::ModuleEvents) -> Result<ProtoCtxId, TapsError> {
            unreachable!("not used in these tests")
        }
        async fn send(&self, ctx: ProtoCtxId, item: ItemId, data: Bytes) {
            self.pending_sends.lock().await.push_back((ctx, item, data));
        }
        async fn receive(&self, _ctx: ProtoCtxId, _item: ItemId, _max_len: usize) {}
    }

    fn test_connection() -> Connection {
        let module = Arc::new(LoopbackModule { pending_sends: AsyncMutex::new(VecDeque::new()) });
        Connection::new(
            module,
            ProtoCtxId::new(),
            None,
            ConnectionCallbacks {
                closed: Box::new(|| {}),
                connection_error: Box::new(|_| {}),
            },
        )
    }

    #[tokio::test]
    async fn send_then_sent_event_fires_callback_once() {
        let conn = test_connection();
        let fired = Arc::new(AtomicUsize::new(0));
        let fired2 = Arc::clone(&fired);
        let item_id = conn.send(
            Message::new(Bytes::from_static(b"hi")),
            7,
            SendCallbacks {
                sent: Box::new(move |token| {
                    assert_eq!(token, 7);
                    fired2.fetch_add(1, Ordering::SeqCst);
                }),
                expired: Box::new(|_| {}),
                send_error: Box::new(|_, _| {}),
            },
        );
        tokio::task::yield_now().await;
        conn.handle_event(ModuleEvent::Sent { item: item_id });
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn receive_below_min_length_then_fin_is_error() {
        let conn = test_connection();
        let got_error = Arc::new(AtomicUsize::new(0));
        let got_error2 = Arc::clone(&got_error);
        let item_id = conn.receive(
            1,
            10,
            16,
            RecvCallbacks {
                received: Box::new(|_, _| panic!("should not complete normally")),
                received_partial: Box::new(|_, _| {}),
                receive_error: Box::new(move |_, reason| {
                    assert_eq!(reason, TapsError::MessageBelowMinLength);
                    got_error2.fetch_add(1, Ordering::SeqCst);
                }),
            },
        );
        conn.handle_event(ModuleEvent::ReceivedPartial { item: item_id, data: Bytes::from_static(b"abcd") });
        conn.handle_event(ModuleEvent::Received { item: item_id, data: Bytes::new() });
        assert_eq!(got_error.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn receive_fifo_completes_in_enqueue_order() {
        let conn = test_connection();
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut item_ids = Vec::new();
        for token in [1u64, 2, 3] {
            let order = Arc::clone(&order);
            let id = conn.receive(
                token,
                1,
                1,
                RecvCallbacks {
                    received: Box::new(move |token, _| order.lock().unwrap().push(token)),
                    received_partial: Box::new(|_, _| {}),
                    receive_error: Box::new(|_, _| {}),
                },
            );
            item_ids.push(id);
        }
        conn.handle_event(ModuleEvent::Received { item: item_ids[0], data: Bytes::from_static(b"a") });
        conn.handle_event(ModuleEvent::Received { item: item_ids[1], data: Bytes::from_static(b"b") });
        conn.handle_event(ModuleEvent::Received { item: item_ids[2], data: Bytes::from_static(b"c") });
        assert_eq!(*order.lock().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn free_drains_queues_with_connection_died() {
        let conn = test_connection();
        let saw_error = Arc::new(AtomicUsize::new(0));
        let saw_error2 = Arc::clone(&saw_error);
        conn.receive(
            1,
            1,
            1,
            RecvCallbacks {
                received: Box::new(|_, _| {}),
                received_partial: Box::new(|_, _| {}),
                receive_error: Box::new(move |_, reason| {
                    assert_eq!(reason, TapsError::ConnectionDied);
                    saw_error2.fetch_add(1, Ordering::SeqCst);
                }),
            },
        );
        conn.free();
        assert_eq!(saw_error.load(Ordering::SeqCst), 1);
    }
}
