//! # Event Loop
//!
//! The injected reactor spec.md §5 describes: a single-threaded cooperative
//! scheduler that the core never creates threads or locks around — module
//! callbacks and application callbacks alike are assumed to run serialized on
//! it.
//!
//! ## Key Design Principles
//!
//! - **Injected, not owned**: modeled as a trait so a caller can supply an
//!   existing runtime handle instead of the bundled default, the same shape
//!   `IpcTransport` uses for swapping in a transport implementation
//! - **One thread, no locking**: every callback the core fires — module
//!   event or application callback alike — is assumed to run serialized on
//!   whatever `EventLoop` is in effect; the core itself never spawns a
//!   thread or takes a lock across an `.await`
//! - **A default that asks for nothing**: an application that supplies no
//!   `EventLoop` still gets one, via `TokioCurrentThread::new`
//!
//! ## Implementations
//!
//! - **`AmbientRuntime`**: shares whatever tokio runtime is already driving
//!   the embedding application (`tokio::spawn`)
//! - **`TokioCurrentThread`**: spawns a dedicated single-threaded runtime on
//!   its own OS thread, grounded on `utils::spawn_with_affinity`'s use of
//!   `tokio::runtime::Builder::new_current_thread()`, so the "no internal
//!   locking, one thread drives every callback" invariant holds even if the
//!   host process also runs a multi-threaded runtime elsewhere

use std::future::Future;
use tokio::task::JoinHandle;

/// Spawns futures onto whatever reactor is driving the TAPS core. Kept
/// deliberately small: the contract in spec.md §5 is "one thread, no
/// internal locking", not a general task-scheduling API.
pub trait EventLoop: Send + Sync {
    /// Schedule `future` to run to completion on this reactor.
    ///
    /// # Arguments
    ///
    /// * `future` - task to run; must not assume it runs on any particular
    ///   OS thread, only that it is serialized with every other future this
    ///   `EventLoop` is driving.
    ///
    /// # Returns
    ///
    /// A `JoinHandle` the caller may await to observe completion or panic.
    fn spawn<F>(&self, future: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static;
}

/// Runs every spawned future on the caller's ambient tokio runtime (i.e.
/// `tokio::spawn`). Appropriate when the embedding application already owns
/// a runtime and wants the core to share its executor rather than start a
/// second one.
#[derive(Debug, Default, Clone, Copy)]
pub struct AmbientRuntime;

impl EventLoop for AmbientRuntime {
    fn spawn<F>(&self, future: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(future)
    }
}

/// Runs every spawned future on a dedicated current-thread tokio runtime,
/// kept alive on its own OS thread for the lifetime of the process. The
/// default `EventLoop` when the application supplies none, matching the
/// "core creates one if none is given" clause in spec.md §5.
pub struct TokioCurrentThread {
    handle: tokio::runtime::Handle,
}

impl TokioCurrentThread {
    /// Spawn a dedicated single-threaded tokio runtime on a new OS thread
    /// and return a handle to it. Mirrors `spawn_with_affinity`'s
    /// `Builder::new_current_thread()` construction, minus CPU pinning
    /// (irrelevant to the core's single-thread-correctness contract).
    ///
    /// # Returns
    ///
    /// A handle that keeps accepting spawned tasks for the lifetime of the
    /// background thread, or an `io::Error` if the OS thread or runtime
    /// could not be created.
    pub fn new() -> std::io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
        let handle = runtime.handle().clone();
        // Park the runtime on a background thread so spawned tasks keep making
        // progress even though nothing here calls `block_on`.
        std::thread::Builder::new()
            .name("taps-event-loop".to_string())
            .spawn(move || runtime.block_on(std::future::pending::<()>()))?;
        Ok(TokioCurrentThread { handle })
    }
}

impl EventLoop for TokioCurrentThread {
    fn spawn<F>(&self, future: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handle.spawn(future)
    }
}
