//! Runtime abstraction layer for async operations
//!
//! Submit-style operations on the offline manager and the per-pack
//! observers run as spawned tasks. Spawning goes through [`AsyncSpawner`]
//! so a host embedding the bridge in its own executor can install a
//! different spawner with [`init_runtime`].

use crate::prelude::{Future, Pin};

/// A trait for spawning async tasks (object-safe version)
pub trait AsyncSpawner: Send + Sync + 'static {
    /// Spawn a future and return a handle to it
    fn spawn_boxed(
        &self,
        future: Pin<Box<dyn Future<Output = ()> + Send + 'static>>,
    ) -> Box<dyn AsyncHandle>;
}

/// Handle to a spawned async task
pub trait AsyncHandle: Send + Sync {
    /// Check if the task is finished
    fn is_finished(&self) -> bool;

    /// Cancel the task
    fn cancel(&self);
}

/// Convenience function for spawning with type safety
pub fn spawn<F>(future: F) -> Box<dyn AsyncHandle>
where
    F: Future<Output = ()> + Send + 'static,
{
    runtime().spawn_boxed(Box::pin(future))
}

/// Default spawner implementations
pub mod spawners {
    use super::*;

    pub mod tokio_impl {
        use super::*;
        use ::tokio::runtime::Handle;
        use ::tokio::task::JoinHandle;

        /// Tokio-based async spawner
        ///
        /// Uses the runtime of the calling context when there is one and
        /// falls back to the handle captured at construction otherwise, so
        /// engine callbacks running on foreign threads can still spawn.
        pub struct TokioSpawner {
            fallback: Option<Handle>,
        }

        impl TokioSpawner {
            pub fn new() -> Self {
                Self {
                    fallback: Handle::try_current().ok(),
                }
            }

            pub fn with_handle(handle: Handle) -> Self {
                Self {
                    fallback: Some(handle),
                }
            }
        }

        impl Default for TokioSpawner {
            fn default() -> Self {
                Self::new()
            }
        }

        impl AsyncSpawner for TokioSpawner {
            fn spawn_boxed(
                &self,
                future: Pin<Box<dyn Future<Output = ()> + Send + 'static>>,
            ) -> Box<dyn AsyncHandle> {
                let handle = match (Handle::try_current(), &self.fallback) {
                    (Ok(current), _) => current.spawn(future),
                    (Err(_), Some(fallback)) => fallback.spawn(future),
                    (Err(_), None) => ::tokio::spawn(future),
                };
                Box::new(TokioHandle(handle))
            }
        }

        struct TokioHandle(JoinHandle<()>);

        impl AsyncHandle for TokioHandle {
            fn is_finished(&self) -> bool {
                self.0.is_finished()
            }

            fn cancel(&self) {
                self.0.abort();
            }
        }
    }
}

/// Global runtime instance
static RUNTIME: std::sync::OnceLock<Box<dyn AsyncSpawner>> = std::sync::OnceLock::new();

/// Initialize the runtime with a specific spawner
///
/// Only the first call takes effect.
pub fn init_runtime(spawner: Box<dyn AsyncSpawner>) {
    if RUNTIME.set(spawner).is_err() {
        log::debug!("runtime already initialised; keeping the existing spawner");
    }
}

/// Get the global runtime spawner
pub fn runtime() -> &'static dyn AsyncSpawner {
    RUNTIME
        .get_or_init(|| Box::new(spawners::tokio_impl::TokioSpawner::new()))
        .as_ref()
}
