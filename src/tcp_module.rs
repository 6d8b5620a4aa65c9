//! # TCP Protocol Module
//!
//! A reference `ProtocolModule` backed by `tokio::net::TcpListener`/
//! `TcpStream`, registered under the catalog's `module_path` the way
//! `_kernel_TCP`'s `libpath` names a `dlopen`-able `.so` in the source
//! implementation. Concrete protocol modules beyond the contract are a
//! non-goal (spec.md §1); this one exists to give `Listener`/`Connection`/
//! `Preconnection` something real to drive end to end, and to anchor their
//! tests in actual socket I/O rather than a stub.
//!
//! Framing is length-prefixed (4-byte little-endian length + payload), the
//! same shape `ipc/tcp_socket.rs`'s `read_message`/`write_message` use; TAPS
//! itself has no wire format to reuse. A frame arriving over the wire is
//! *not* a peer FIN, so each successfully-read frame is reported as
//! `ReceivedPartial` and left to `Connection`'s own accumulation loop (§4.6)
//! to decide whether the caller's `minLength` has been satisfied yet — one
//! frame may need to span several `receive()` calls if it exceeds the
//! caller's requested `maxLength`, and one `receive()` call may need several
//! frames if the caller's `minLength` exceeds a single frame. `Received`
//! (spec.md §6.1: "peer half-closed") is reserved for a genuine socket EOF.

use crate::error::TapsError;
use crate::module::{ItemId, ModuleCapabilities, ModuleEvent, ModuleEvents, ProtoCtxId, ProtocolModule};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex, Notify};
use tracing::{debug, warn};

/// Matches `tcp_socket.rs::read_message`'s sanity cap.
const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

struct WriteRequest {
    item: ItemId,
    data: Bytes,
}

struct ReadRequest {
    item: ItemId,
    max_len: usize,
}

enum CtxEntry {
    Listener { stop: Arc<Notify> },
    Connection { write_tx: mpsc::UnboundedSender<WriteRequest>, read_tx: mpsc::UnboundedSender<ReadRequest> },
}

/// Reference TCP transport. One instance can back any number of listen and
/// connect contexts; `contexts` is the only shared state, kept behind an
/// `Arc` so the spawned accept loop can register inbound connections into
/// the same map `send`/`receive` look them up in.
#[derive(Default)]
pub struct TcpModule {
    contexts: Arc<Mutex<HashMap<ProtoCtxId, CtxEntry>>>,
}

impl TcpModule {
    pub fn new() -> Self {
        TcpModule { contexts: Arc::new(Mutex::new(HashMap::new())) }
    }

    /// Registry constructor/capabilities pair for `ModuleRegistry::register`.
    pub fn ctor() -> (Box<dyn ProtocolModule>, ModuleCapabilities) {
        (
            Box::new(TcpModule::new()),
            ModuleCapabilities { listen: true, stop: true, connect: true, send: true, receive: true },
        )
    }

    async fn spawn_connection(&self, ctx: ProtoCtxId, stream: TcpStream, events: ModuleEvents) {
        let (read_half, write_half) = stream.into_split();
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let (read_tx, read_rx) = mpsc::unbounded_channel();

        tokio::spawn(writer_task(ctx, write_half, write_rx, events.clone()));
        tokio::spawn(reader_task(ctx, read_half, read_rx, events));

        self.contexts
            .lock()
            .await
            .insert(ctx, CtxEntry::Connection { write_tx, read_tx });
    }
}

#[async_trait]
impl ProtocolModule for TcpModule {
    async fn listen(&self, addr: SocketAddr, events: ModuleEvents) -> Result<ProtoCtxId, TapsError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| TapsError::Unavailable(e.to_string()))?;
        let ctx = ProtoCtxId::new();
        let stop = Arc::new(Notify::new());

        self.contexts.lock().await.insert(ctx, CtxEntry::Listener { stop: Arc::clone(&stop) });

        tokio::spawn(accept_loop(listener, ctx, events, stop, Arc::clone(&self.contexts)));
        Ok(ctx)
    }

    async fn stop(&self, ctx: ProtoCtxId) {
        let entry = self.contexts.lock().await.remove(&ctx);
        match entry {
            Some(CtxEntry::Listener { stop }) => stop.notify_one(),
            Some(CtxEntry::Connection { .. }) => {
                // Dropping the entry drops both channel senders, which ends
                // the reader/writer tasks on their next recv().
            }
            None => {}
        }
    }

    async fn connect(&self, addr: SocketAddr, events: ModuleEvents) -> Result<ProtoCtxId, TapsError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| TapsError::Unavailable(e.to_string()))?;
        let _ = stream.set_nodelay(true);
        let ctx = ProtoCtxId::new();
        self.spawn_connection(ctx, stream, events.clone()).await;
        events.emit(ModuleEvent::Ready { ctx });
        Ok(ctx)
    }

    async fn send(&self, ctx: ProtoCtxId, item: ItemId, data: Bytes) {
        let tx = match self.contexts.lock().await.get(&ctx) {
            Some(CtxEntry::Connection { write_tx, .. }) => write_tx.clone(),
            _ => return,
        };
        let _ = tx.send(WriteRequest { item, data });
    }

    async fn receive(&self, ctx: ProtoCtxId, item: ItemId, max_len: usize) {
        let tx = match self.contexts.lock().await.get(&ctx) {
            Some(CtxEntry::Connection { read_tx, .. }) => read_tx.clone(),
            _ => return,
        };
        let _ = tx.send(ReadRequest { item, max_len });
    }
}

/// Accept loop for one listen context; runs until `stop` is notified.
async fn accept_loop(
    listener: TcpListener,
    listener_ctx: ProtoCtxId,
    events: ModuleEvents,
    stop: Arc<Notify>,
    contexts: Arc<Mutex<HashMap<ProtoCtxId, CtxEntry>>>,
) {
    loop {
        tokio::select! {
            _ = stop.notified() => {
                events.emit(ModuleEvent::Stopped { ctx: listener_ctx });
                return;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        debug!("accepted inbound TCP connection from {peer}");
                        let _ = stream.set_nodelay(true);
                        let child_ctx = ProtoCtxId::new();
                        let (read_half, write_half) = stream.into_split();
                        let (write_tx, write_rx) = mpsc::unbounded_channel();
                        let (read_tx, read_rx) = mpsc::unbounded_channel();
                        tokio::spawn(writer_task(child_ctx, write_half, write_rx, events.clone()));
                        tokio::spawn(reader_task(child_ctx, read_half, read_rx, events.clone()));
                        contexts.lock().await.insert(child_ctx, CtxEntry::Connection { write_tx, read_tx });
                        events.emit(ModuleEvent::ConnectionReceived { listener_ctx, child_ctx });
                    }
                    Err(e) => {
                        warn!("TCP accept failed: {e}");
                        events.emit(ModuleEvent::EstablishmentError {
                            ctx: listener_ctx,
                            reason: TapsError::Unavailable(e.to_string()),
                        });
                    }
                }
            }
        }
    }
}

async fn writer_task(
    ctx: ProtoCtxId,
    mut write_half: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<WriteRequest>,
    events: ModuleEvents,
) {
    while let Some(req) = rx.recv().await {
        let len = req.data.len() as u32;
        let result: std::io::Result<()> = async {
            write_half.write_all(&len.to_le_bytes()).await?;
            write_half.write_all(&req.data).await?;
            write_half.flush().await
        }
        .await;
        match result {
            Ok(()) => events.emit(ModuleEvent::Sent { item: req.item }),
            Err(e) => {
                events.emit(ModuleEvent::SendError { item: req.item, reason: TapsError::ProtocolFailure(e.to_string()) });
                events.emit(ModuleEvent::ConnectionError { ctx, reason: TapsError::connection_died() });
                return;
            }
        }
    }
}

/// Fill `buf` from `read_half`, stopping early on a clean EOF. Returns the
/// number of bytes actually filled; a return value short of `buf.len()`
/// means the peer closed partway through, and whatever was filled is real
/// data that arrived before the close — unlike `AsyncReadExt::read_exact`,
/// which discards that distinction in its `Err`.
async fn fill_or_eof(read_half: &mut OwnedReadHalf, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = read_half.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Split `data` at `cap` bytes, for a frame larger than the caller's current
/// `maxLength`: the first piece is delivered now, the rest is held in
/// `reader_task`'s `leftover` slot and delivered (without touching the
/// socket again) to whatever `receive()` call comes next.
fn split_at_cap(data: Bytes, cap: usize) -> (Bytes, Option<Bytes>) {
    if data.len() <= cap {
        (data, None)
    } else {
        (data.slice(0..cap), Some(data.slice(cap..)))
    }
}

async fn reader_task(
    ctx: ProtoCtxId,
    mut read_half: OwnedReadHalf,
    mut rx: mpsc::UnboundedReceiver<ReadRequest>,
    events: ModuleEvents,
) {
    let mut leftover: Option<Bytes> = None;

    while let Some(req) = rx.recv().await {
        if let Some(data) = leftover.take() {
            let (chunk, rest) = split_at_cap(data, req.max_len.max(1));
            leftover = rest;
            events.emit(ModuleEvent::ReceivedPartial { item: req.item, data: chunk });
            continue;
        }

        let mut len_bytes = [0u8; 4];
        let filled = match fill_or_eof(&mut read_half, &mut len_bytes).await {
            Ok(n) => n,
            Err(e) => {
                events.emit(ModuleEvent::ReceiveError { item: req.item, reason: TapsError::ProtocolFailure(e.to_string()) });
                events.emit(ModuleEvent::ConnectionError { ctx, reason: TapsError::connection_died() });
                return;
            }
        };
        if filled < len_bytes.len() {
            // Clean close at a frame boundary: nothing was in flight, so the
            // terminal read carries no bytes.
            events.emit(ModuleEvent::Received { item: req.item, data: Bytes::new() });
            events.emit(ModuleEvent::Closed { ctx });
            return;
        }

        let frame_len = u32::from_le_bytes(len_bytes) as usize;
        if frame_len > MAX_FRAME_LEN {
            events.emit(ModuleEvent::ReceiveError {
                item: req.item,
                reason: TapsError::ProtocolFailure(format!("frame too large: {frame_len} bytes")),
            });
            continue;
        }

        let mut buf = vec![0u8; frame_len];
        let filled = match fill_or_eof(&mut read_half, &mut buf).await {
            Ok(n) => n,
            Err(e) => {
                events.emit(ModuleEvent::ReceiveError { item: req.item, reason: TapsError::ProtocolFailure(e.to_string()) });
                events.emit(ModuleEvent::ConnectionError { ctx, reason: TapsError::connection_died() });
                return;
            }
        };
        if filled < buf.len() {
            // Closed mid-frame: whatever payload bytes did arrive are the
            // terminal read, same as a minLength-enforcement FIN.
            buf.truncate(filled);
            events.emit(ModuleEvent::Received { item: req.item, data: Bytes::from(buf) });
            events.emit(ModuleEvent::Closed { ctx });
            return;
        }

        let (chunk, rest) = split_at_cap(Bytes::from(buf), req.max_len.max(1));
        leftover = rest;
        events.emit(ModuleEvent::ReceivedPartial { item: req.item, data: chunk });
    }
}
