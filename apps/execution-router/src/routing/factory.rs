//! Flag-driven adapter factory with graceful hot-swap.
//!
//! The factory owns the adapter instance cache and the current-adapter
//! pointer. Selection is resolved through the `EXECUTION_IMPL` flag on
//! every call; the pointer is updated only after the incoming adapter is
//! fully connected and registered, so concurrent callers observe either the
//! old or the new adapter, never a half-initialized one.
//!
//! The factory is constructed explicitly at the composition root and passed
//! by reference — there is no process-global instance.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::adapters::{AdapterHealth, ExecutionAdapter};
use crate::error::AdapterError;
use crate::flags::{EXECUTION_IMPL_FLAG, FeatureFlagManager, FlagValue};
use crate::observability;

use super::health::AdapterHealthMonitor;

/// Implementation selected when the flag is missing or malformed.
pub const DEFAULT_IMPL: &str = "paper";

/// Switch events retained for audit.
const SWITCH_LOG_LIMIT: usize = 100;

/// Constructor for one adapter implementation.
pub type AdapterBuilder =
    Box<dyn Fn() -> Result<Arc<dyn ExecutionAdapter>, AdapterError> + Send + Sync>;

/// Audit record emitted on every adapter switch.
#[derive(Debug, Clone, Serialize)]
pub struct SwitchEvent {
    /// When the switch happened.
    pub at: DateTime<Utc>,
    /// Previously active implementation.
    pub from: String,
    /// Newly active implementation.
    pub to: String,
    /// Open orders still resting on the old adapter at switch time.
    pub open_orders_on_old: usize,
    /// Health snapshot of the old adapter, if it answered.
    pub from_health: Option<AdapterHealth>,
    /// Health snapshot of the new adapter, if it answered.
    pub to_health: Option<AdapterHealth>,
}

#[derive(Default)]
struct FactoryState {
    current: Option<Arc<dyn ExecutionAdapter>>,
    cache: HashMap<String, Arc<dyn ExecutionAdapter>>,
}

/// Factory resolving, caching and hot-swapping execution adapters.
pub struct AdapterFactory {
    flags: Arc<FeatureFlagManager>,
    monitor: Arc<AdapterHealthMonitor>,
    builders: HashMap<String, AdapterBuilder>,
    // One async mutex guards the whole read-check-create-swap sequence.
    state: Mutex<FactoryState>,
    switches: StdMutex<Vec<SwitchEvent>>,
}

impl AdapterFactory {
    /// Create a factory with an empty builder registry.
    #[must_use]
    pub fn new(flags: Arc<FeatureFlagManager>, monitor: Arc<AdapterHealthMonitor>) -> Self {
        Self {
            flags,
            monitor,
            builders: HashMap::new(),
            state: Mutex::new(FactoryState::default()),
            switches: StdMutex::new(Vec::new()),
        }
    }

    /// Register a constructor for an implementation name.
    pub fn register_builder<F>(&mut self, name: impl Into<String>, builder: F)
    where
        F: Fn() -> Result<Arc<dyn ExecutionAdapter>, AdapterError> + Send + Sync + 'static,
    {
        self.builders.insert(name.into(), Box::new(builder));
    }

    /// Implementation names the factory can construct.
    #[must_use]
    pub fn registered_implementations(&self) -> Vec<String> {
        let mut names: Vec<String> = self.builders.keys().cloned().collect();
        names.sort();
        names
    }

    /// Resolve the desired implementation and return a ready adapter.
    ///
    /// Reuses the current adapter when it already matches the flag, then a
    /// cached still-connected instance, and only then constructs and
    /// connects a fresh one.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::Connection`] when the implementation is
    /// unknown or its `connect` fails.
    pub async fn get_adapter(
        &self,
        subject: Option<&str>,
    ) -> Result<Arc<dyn ExecutionAdapter>, AdapterError> {
        let desired = self.resolve_impl(subject);

        let mut state = self.state.lock().await;

        if let Some(current) = &state.current
            && current.adapter_name() == desired
        {
            return Ok(Arc::clone(current));
        }

        let adapter = match state.cache.get(&desired) {
            Some(cached) if cached.is_connected() => {
                tracing::debug!(implementation = %desired, "Reusing cached adapter");
                Arc::clone(cached)
            }
            _ => {
                let builder = self.builders.get(&desired).ok_or_else(|| {
                    AdapterError::Connection(format!(
                        "unknown execution implementation '{desired}'"
                    ))
                })?;
                let adapter = builder()?;
                adapter
                    .connect()
                    .await
                    .map_err(|e| AdapterError::Connection(format!("{desired}: {e}")))?;
                state.cache.insert(desired.clone(), Arc::clone(&adapter));
                adapter
            }
        };

        self.monitor
            .register(adapter.adapter_name(), Arc::downgrade(&adapter));

        if let Some(old) = state.current.take() {
            self.graceful_switch(old.as_ref(), adapter.as_ref()).await;
        }

        // Pointer update last: readers never see a half-initialized adapter.
        state.current = Some(Arc::clone(&adapter));
        drop(state);

        Ok(adapter)
    }

    /// The adapter currently serving traffic, if any.
    pub async fn current_adapter(&self) -> Option<Arc<dyn ExecutionAdapter>> {
        self.state.lock().await.current.clone()
    }

    /// Recorded switch events, oldest first.
    #[must_use]
    pub fn switch_events(&self) -> Vec<SwitchEvent> {
        self.switches
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Invalidate the current-adapter pointer whenever the implementation
    /// flag changes. Cached instances stay connected; the next
    /// [`Self::get_adapter`] call re-resolves.
    pub fn spawn_flag_listener(self: &Arc<Self>) -> JoinHandle<()> {
        let mut rx = self.flags.subscribe();
        let factory = Arc::downgrade(self);

        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(change) if change.name == EXECUTION_IMPL_FLAG => {
                        let Some(factory) = factory.upgrade() else { break };
                        let mut state = factory.state.lock().await;
                        if state.current.take().is_some() {
                            tracing::info!(
                                new_value = %change.new,
                                "Execution implementation flag changed, adapter selection invalidated"
                            );
                        }
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Flag listener lagged; invalidating selection");
                        if let Some(factory) = factory.upgrade() {
                            factory.state.lock().await.current = None;
                        } else {
                            break;
                        }
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    /// Disconnect and drop every cached adapter. Used at process shutdown.
    pub async fn cleanup(&self) {
        let mut state = self.state.lock().await;
        state.current = None;
        for (name, adapter) in state.cache.drain() {
            if let Err(error) = adapter.disconnect().await {
                tracing::warn!(implementation = %name, %error, "Adapter disconnect failed");
            }
        }
        drop(state);
        tracing::info!("Adapter factory cleaned up");
    }

    fn resolve_impl(&self, subject: Option<&str>) -> String {
        match self
            .flags
            .get(EXECUTION_IMPL_FLAG, FlagValue::from(DEFAULT_IMPL), subject)
        {
            FlagValue::Str(name) => name,
            other => {
                tracing::warn!(
                    value = %other,
                    "Execution implementation flag is not a string, using default"
                );
                DEFAULT_IMPL.to_string()
            }
        }
    }

    /// Audit the handover from `old` to `new`.
    ///
    /// Open orders on the old adapter are logged, not migrated — moving
    /// live orders between venues is an operator decision.
    async fn graceful_switch(&self, old: &dyn ExecutionAdapter, new: &dyn ExecutionAdapter) {
        let open_orders_on_old = match old.open_orders(None).await {
            Ok(orders) => {
                if !orders.is_empty() {
                    tracing::warn!(
                        from = old.adapter_name(),
                        open_orders = orders.len(),
                        "Open orders remain on the previous adapter and are not migrated"
                    );
                }
                orders.len()
            }
            Err(error) => {
                tracing::warn!(
                    from = old.adapter_name(),
                    %error,
                    "Could not query open orders on the previous adapter"
                );
                0
            }
        };

        let event = SwitchEvent {
            at: Utc::now(),
            from: old.adapter_name().to_string(),
            to: new.adapter_name().to_string(),
            open_orders_on_old,
            from_health: old.health().await.ok(),
            to_health: new.health().await.ok(),
        };

        tracing::info!(
            from = %event.from,
            to = %event.to,
            open_orders_on_old = event.open_orders_on_old,
            "Execution adapter switched"
        );
        observability::record_adapter_switch(&event.from, &event.to);

        let mut switches = self
            .switches
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        switches.push(event);
        while switches.len() > SWITCH_LOG_LIMIT {
            switches.remove(0);
        }
    }
}
