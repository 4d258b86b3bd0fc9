//! Provides a tiny container which keeps the central components of a node.
//!
//! Components like the [Config](crate::config::Config), the [Registry](crate::group::Registry),
//! the [PeerPool](crate::peers::PeerPool) and the [Server](crate::server::Server) are registered
//! by type and kept as **Arc<T>**. The platform also carries the central **is_running** flag,
//! which is cleared by [Platform::terminate](Platform::terminate).
//!
//! Note that once terminated, all components are released. Code which might run after the
//! shutdown has been initiated should therefore use [Platform::find](Platform::find) rather than
//! [Platform::require](Platform::require).
//!
//! # Example
//!
//! ```
//! # use dcache::group::Registry;
//! # use dcache::platform::Platform;
//! # use dcache::server::Server;
//! let platform = Platform::new();
//! platform.register::<Registry>(Registry::new());
//!
//! assert_eq!(platform.require::<Registry>().groups().is_empty(), true);
//! assert_eq!(platform.find::<Server>().is_none(), true);
//! assert_eq!(platform.is_running(), true);
//!
//! // Terminating releases all components...
//! platform.terminate();
//! assert_eq!(platform.find::<Registry>().is_none(), true);
//! assert_eq!(platform.is_running(), false);
//! ```
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Keeps all central components of a node in a single place.
pub struct Platform {
    components: Mutex<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
    is_running: AtomicBool,
}

impl Platform {
    /// Creates a new and running platform without any components.
    pub fn new() -> Arc<Self> {
        Arc::new(Platform {
            components: Mutex::new(HashMap::new()),
            is_running: AtomicBool::new(true),
        })
    }

    /// Registers a component, replacing any previously registered one of the same type.
    pub fn register<T>(&self, component: Arc<T>)
    where
        T: Any + Send + Sync,
    {
        let _ = self
            .components
            .lock()
            .unwrap()
            .insert(TypeId::of::<T>(), component);
    }

    /// Looks up a previously registered component.
    pub fn find<T>(&self) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        self.components
            .lock()
            .unwrap()
            .get(&TypeId::of::<T>())
            .and_then(|component| component.clone().downcast::<T>().ok())
    }

    /// Resolves a previously registered component.
    ///
    /// # Panics
    /// Panics if the component isn't available or if the platform has already been terminated.
    ///
    /// ```should_panic
    /// # use dcache::group::Registry;
    /// # use dcache::platform::Platform;
    /// let platform = Platform::new();
    /// platform.require::<Registry>();
    /// ```
    pub fn require<T>(&self) -> Arc<T>
    where
        T: Any + Send + Sync,
    {
        if !self.is_running() {
            panic!(
                "A required component ({}) has been requested but the system is already shutting down!",
                std::any::type_name::<T>()
            );
        }

        match self.find::<T>() {
            Some(component) => component,
            None => panic!(
                "A required component ({}) was not available in the platform registry!",
                std::any::type_name::<T>()
            ),
        }
    }

    /// Determines if [Platform::terminate](Platform::terminate) has not been called yet.
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Acquire)
    }

    /// Terminates the platform.
    ///
    /// This releases all components and clears the [is_running()](Platform::is_running) flag.
    pub fn terminate(&self) {
        self.components.lock().unwrap().clear();
        self.is_running.store(false, Ordering::Release);
    }
}
