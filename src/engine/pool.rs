//! Identity-keyed engine cache.
//!
//! Engines are created lazily on first use and kept for the lifetime of
//! the pool. Each cached engine remembers the descriptor fingerprint it was
//! built from; an edited record therefore gets a fresh engine.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::target::{ConnectTarget, KindStrategy};
use super::{Engine, EngineFactory};
use crate::config::ExecutorConfig;
use crate::credentials::CredentialResolver;
use crate::descriptor::ConnectionDescriptor;
use crate::error::{ExecutionError, Result};

/// One cache entry. The engine is built at most once per slot.
struct Slot {
    fingerprint: [u8; 32],
    engine: OnceCell<Arc<dyn Engine>>,
}

impl Slot {
    fn new(fingerprint: [u8; 32]) -> Self {
        Self {
            fingerprint,
            engine: OnceCell::new(),
        }
    }
}

/// Maps descriptor identity to a shared engine.
pub struct EnginePool {
    factory: Arc<dyn EngineFactory>,
    resolver: Arc<dyn CredentialResolver>,
    config: ExecutorConfig,
    /// Held only to look up or insert a slot, never across an await
    slots: Mutex<HashMap<i64, Arc<Slot>>>,
}

impl EnginePool {
    pub fn new(
        factory: Arc<dyn EngineFactory>,
        resolver: Arc<dyn CredentialResolver>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            factory,
            resolver,
            config,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Return the engine for a descriptor, building it on first use.
    ///
    /// Concurrent callers for one identity share a single build. A failed
    /// build leaves nothing cached, so the next call tries again.
    pub async fn acquire(&self, descriptor: &ConnectionDescriptor) -> Result<Arc<dyn Engine>> {
        let strategy = KindStrategy::for_kind(descriptor.kind());
        if !strategy.supported {
            return Err(ExecutionError::UnsupportedConnectionKind {
                kind: descriptor.kind(),
            });
        }
        if !descriptor.is_active() {
            return Err(build_error(descriptor, "connection is not active"));
        }

        let slot = self.slot_for(descriptor);
        let engine = slot
            .engine
            .get_or_try_init(|| self.build(descriptor))
            .await?;
        Ok(Arc::clone(engine))
    }

    fn slot_for(&self, descriptor: &ConnectionDescriptor) -> Arc<Slot> {
        let fingerprint = descriptor.fingerprint();
        let mut slots = self.slots.lock();

        if let Some(slot) = slots.get(&descriptor.id()) {
            if slot.fingerprint == fingerprint {
                return Arc::clone(slot);
            }
            debug!(
                connection_id = descriptor.id(),
                "connection record changed, replacing engine"
            );
        }

        let slot = Arc::new(Slot::new(fingerprint));
        slots.insert(descriptor.id(), Arc::clone(&slot));
        slot
    }

    async fn build(&self, descriptor: &ConnectionDescriptor) -> Result<Arc<dyn Engine>> {
        let password = if descriptor.encrypted_password().is_empty() {
            SecretString::from(String::new())
        } else {
            self.resolver
                .resolve(descriptor.encrypted_password())
                .map_err(|e| build_error(descriptor, format!("credential resolution failed: {}", e)))?
        };
        let scrub_with = SecretString::from(password.expose_secret().to_string());

        let target = ConnectTarget::from_descriptor(descriptor, password)
            .map_err(|reason| build_error(descriptor, reason))?;

        info!(
            connection_id = descriptor.id(),
            kind = %descriptor.kind(),
            target = %target.redacted_url(),
            "building engine"
        );

        self.factory
            .build(target, &self.config)
            .await
            .map_err(|e| {
                let e = e.scrub(&scrub_with);
                warn!(connection_id = descriptor.id(), error = %e, "engine build failed");
                build_error(descriptor, e.message)
            })
    }

    /// Drop the cached engine for one identity.
    ///
    /// Executions already holding the engine keep it until they finish.
    pub fn evict(&self, connection_id: i64) -> bool {
        self.slots.lock().remove(&connection_id).is_some()
    }

    /// Drop every cached engine.
    pub fn clear(&self) {
        self.slots.lock().clear();
    }

    /// Number of identities with a cache slot.
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn build_error(descriptor: &ConnectionDescriptor, reason: impl Into<String>) -> ExecutionError {
    ExecutionError::ConnectionBuild {
        connection_id: descriptor.id(),
        kind: descriptor.kind(),
        reason: reason.into(),
    }
}
