//! Tracks which block handlers are backed by an active plugin.

use std::collections::BTreeSet;
use std::sync::{Arc, RwLock};

use tracing::{debug, warn};

use crate::blocks::cache::{self, ResultCache, LISTENERS_GROUP};

/// Handler that is always available, whatever the plugin state.
pub const CORE_HANDLER: &str = "core";

/// Event-listener keys for blocks look like `Block.<Handler>.<event>`.
pub const BLOCK_LISTENER_PREFIX: &str = "Block.";

const ACTIVE_HANDLERS_KEY: &str = "active_handlers";

/// Supplies the handler namespaces that active plugins currently serve.
pub trait ListenerSource: Send + Sync {
    fn active_namespaces(&self) -> BTreeSet<String>;
}

/// Extracts handler namespaces from event-listener keys.
///
/// `Block.Menu.display` yields `Menu`; keys outside the `Block.` namespace
/// are ignored.
pub fn namespaces_from_listeners<I, S>(listeners: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    listeners
        .into_iter()
        .filter_map(|listener| {
            let rest = listener.as_ref().strip_prefix(BLOCK_LISTENER_PREFIX)?;
            let namespace = rest.split('.').next()?;
            (!namespace.is_empty()).then(|| namespace.to_string())
        })
        .collect()
}

/// A listener source the host updates when plugins are switched on or off.
#[derive(Default)]
pub struct StaticListenerSource {
    namespaces: RwLock<BTreeSet<String>>,
}

impl StaticListenerSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_listeners<I, S>(listeners: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            namespaces: RwLock::new(namespaces_from_listeners(listeners)),
        }
    }

    /// Replaces the active set with the namespaces found in `listeners`.
    pub fn replace_listeners<I, S>(&self, listeners: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let namespaces = namespaces_from_listeners(listeners);
        match self.namespaces.write() {
            Ok(mut current) => *current = namespaces,
            Err(e) => {
                warn!("Listener set lock poisoned, recovering: {e}");
                *e.into_inner() = namespaces;
            }
        }
    }
}

impl ListenerSource for StaticListenerSource {
    fn active_namespaces(&self) -> BTreeSet<String> {
        match self.namespaces.read() {
            Ok(current) => current.clone(),
            Err(e) => e.into_inner().clone(),
        }
    }
}

/// Cached view over a [`ListenerSource`].
pub struct ListenerIndex {
    source: Arc<dyn ListenerSource>,
    cache: Arc<dyn ResultCache>,
}

impl ListenerIndex {
    pub fn new(source: Arc<dyn ListenerSource>, cache: Arc<dyn ResultCache>) -> Self {
        Self { source, cache }
    }

    /// Active handler namespaces, computed once per `listeners` cache generation.
    pub async fn active_handlers(&self) -> BTreeSet<String> {
        let cache = self.cache.as_ref();
        let generation = cache::generation(cache, LISTENERS_GROUP).await;
        if let Some(active) =
            cache::fetch::<BTreeSet<String>>(cache, LISTENERS_GROUP, generation, ACTIVE_HANDLERS_KEY)
                .await
        {
            return active;
        }

        let active = self.source.active_namespaces();
        debug!("Resolved {} active block handlers", active.len());
        cache::store(cache, LISTENERS_GROUP, generation, ACTIVE_HANDLERS_KEY, &active).await;
        active
    }

    pub async fn is_handler_active(&self, handler: &str) -> bool {
        handler == CORE_HANDLER || self.active_handlers().await.contains(handler)
    }
}
