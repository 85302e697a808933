// Block placement & visibility engine.
// Resolves which blocks render in a theme region, in what order, for one request.
// Catalog and rendering are seams (traits); everything derived is cached per group.

pub mod cache;
pub mod catalog;
pub mod composer;
pub mod handlers;
pub mod listeners;
pub mod pattern;
pub mod pg_catalog;
pub mod predicate;
pub mod render;
pub mod visibility;

pub use cache::{InMemoryCache, RedisCache, ResultCache, BLOCKS_GROUP, LISTENERS_GROUP};
pub use catalog::{BlockCatalog, CatalogError, CatalogEvent, InMemoryBlockCatalog};
pub use composer::RegionComposer;
pub use listeners::{ListenerIndex, ListenerSource, StaticListenerSource, CORE_HANDLER};
pub use pattern::{MatcherCache, PathMatcher, PatternSettings};
pub use pg_catalog::PgBlockCatalog;
pub use predicate::{PredicateError, PredicateRegistry};
pub use render::RenderDispatcher;
pub use visibility::VisibilityEvaluator;
