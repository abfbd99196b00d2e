//! Boundary between the controller and a [`NetEngine`].

use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::engine::{
    EnabledTransition, EngineError, EngineInitError, EngineLoader, Firing, Marking, NetEngine,
};

/// Outcome of one load, published to every caller that joined it.
type Attempt = Option<Result<(), EngineInitError>>;

/// Owns the engine and its one-time initialization.
///
/// Concurrent [`ensure_initialized`](Self::ensure_initialized) calls share one
/// in-flight load and all see its outcome, failure included. A failed load
/// leaves the adapter uninitialized so a later call can retry.
pub struct NetEngineAdapter {
    loader: Arc<dyn EngineLoader>,
    engine: OnceLock<Mutex<Box<dyn NetEngine>>>,
    in_flight: Mutex<Option<watch::Receiver<Attempt>>>,
}

enum Role {
    Load(watch::Sender<Attempt>),
    Wait(watch::Receiver<Attempt>),
}

/// Clears the in-flight slot when the loading caller finishes or is dropped.
struct InFlight<'a>(&'a Mutex<Option<watch::Receiver<Attempt>>>);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.lock().take();
    }
}

impl NetEngineAdapter {
    pub fn new(loader: impl EngineLoader + 'static) -> Self {
        Self::from_shared(Arc::new(loader))
    }

    pub fn from_shared(loader: Arc<dyn EngineLoader>) -> Self {
        Self {
            loader,
            engine: OnceLock::new(),
            in_flight: Mutex::new(None),
        }
    }

    pub async fn ensure_initialized(&self) -> Result<(), EngineInitError> {
        self.initialize_with(|_| {}).await
    }

    /// [`ensure_initialized`](Self::ensure_initialized), calling `on_failure`
    /// only if this caller ran the load and it failed. It runs before any
    /// waiter sees the error.
    pub(crate) async fn initialize_with(
        &self,
        on_failure: impl FnOnce(&EngineInitError),
    ) -> Result<(), EngineInitError> {
        let mut on_failure = Some(on_failure);
        loop {
            let role = {
                let mut in_flight = self.in_flight.lock();
                if self.engine.get().is_some() {
                    return Ok(());
                }
                match in_flight.as_ref() {
                    Some(rx) => Role::Wait(rx.clone()),
                    None => {
                        let (tx, rx) = watch::channel(None);
                        *in_flight = Some(rx);
                        Role::Load(tx)
                    }
                }
            };

            match role {
                Role::Load(tx) => {
                    let slot = InFlight(&self.in_flight);
                    let result = self.load().await;
                    if let (Err(e), Some(report)) = (&result, on_failure.take()) {
                        report(e);
                    }
                    drop(slot);
                    tx.send_replace(Some(result.clone()));
                    return result;
                }
                Role::Wait(mut rx) => {
                    let outcome = rx.wait_for(Option::is_some).await.map(|a| a.clone());
                    match outcome {
                        Ok(Some(result)) => return result,
                        // The loading caller was dropped mid-load; start over.
                        _ => continue,
                    }
                }
            }
        }
    }

    async fn load(&self) -> Result<(), EngineInitError> {
        debug!("initializing net engine");
        match self.loader.load().await {
            Ok(engine) => {
                if self.engine.set(Mutex::new(engine)).is_err() {
                    warn!("net engine was already initialized");
                }
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "net engine failed to initialize");
                Err(e)
            }
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.engine.get().is_some()
    }

    fn with_engine<T>(
        &self,
        f: impl FnOnce(&mut Box<dyn NetEngine>) -> Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        let engine = self.engine.get().ok_or(EngineError::NotInitialized)?;
        let mut engine = engine.lock();
        f(&mut engine)
    }

    pub fn query_enabled_transitions(&self) -> Result<Vec<EnabledTransition>, EngineError> {
        self.with_engine(|engine| engine.enabled_transitions())
    }

    pub fn fire(&self, transition_id: &str) -> Result<Firing, EngineError> {
        self.with_engine(|engine| engine.fire(transition_id))
    }

    pub fn step_any(&self) -> Result<Firing, EngineError> {
        self.with_engine(|engine| engine.step_any())
    }

    pub fn reset(&self) -> Result<(), EngineError> {
        self.with_engine(|engine| {
            engine.reset();
            Ok(())
        })
    }

    pub fn marking(&self) -> Result<Marking, EngineError> {
        self.with_engine(|engine| Ok(engine.marking()))
    }
}
