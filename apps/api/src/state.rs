use std::sync::Arc;

use crate::blocks::composer::RegionComposer;
use crate::blocks::listeners::StaticListenerSource;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub composer: Arc<RegionComposer>,
    /// Listener set the plugin routes update; the composer reads it through
    /// its `ListenerIndex`.
    pub listeners: Arc<StaticListenerSource>,
    /// Locale used when a request doesn't name one.
    pub default_locale: String,
}
