//! Region composer: resolves the ordered blocks of one theme region.
//!
//! Algorithm for a listing:
//! 1. Read the `blocks` cache generation; return the cached listing for
//!    (theme, region, context) at that generation if present
//! 2. Load enabled blocks assigned to the region from the catalog
//! 3. Drop blocks whose handler has no active plugin (`core` exempt)
//! 4. Drop blocks the visibility evaluator denies
//! 5. Stable sort by the region ordering rank; ties keep catalog order
//! 6. Cache the listing under the generation read in step 1
//!
//! Everything cached here lives in the `blocks` group, so [`RegionComposer::clear_cache`]
//! must run after every block create, update or delete.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::blocks::cache::{self, ResultCache, BLOCKS_GROUP, LISTENERS_GROUP};
use crate::blocks::catalog::{BlockCatalog, CatalogError, CatalogEvent};
use crate::blocks::listeners::{ListenerIndex, CORE_HANDLER};
use crate::blocks::render::RenderDispatcher;
use crate::blocks::visibility::VisibilityEvaluator;
use crate::models::block::Block;
use crate::models::request::RequestContext;
use crate::models::theme::ThemeSet;

pub struct RegionComposer {
    catalog: Arc<dyn BlockCatalog>,
    evaluator: VisibilityEvaluator,
    listeners: ListenerIndex,
    cache: Arc<dyn ResultCache>,
    themes: ThemeSet,
}

impl RegionComposer {
    pub fn new(
        catalog: Arc<dyn BlockCatalog>,
        evaluator: VisibilityEvaluator,
        listeners: ListenerIndex,
        cache: Arc<dyn ResultCache>,
        themes: ThemeSet,
    ) -> Self {
        Self {
            catalog,
            evaluator,
            listeners,
            cache,
            themes,
        }
    }

    pub fn themes(&self) -> &ThemeSet {
        &self.themes
    }

    /// Blocks that will render in `region` of `theme` for this request, in order.
    ///
    /// A catalog failure is logged and yields an empty, uncached listing.
    pub async fn list_for(&self, theme: &str, region: &str, ctx: &RequestContext) -> Vec<Block> {
        self.compose(theme, region, Some(ctx))
            .await
            .map(|(listing, _)| listing)
            .unwrap_or_else(|e| {
                error!("Listing {theme}/{region} failed, rendering nothing: {e}");
                Vec::new()
            })
    }

    /// Every enabled block of the region whose handler is active, ignoring
    /// locale, role and page visibility.
    pub async fn list_all_for(&self, theme: &str, region: &str) -> Vec<Block> {
        self.compose(theme, region, None)
            .await
            .map(|(listing, _)| listing)
            .unwrap_or_else(|e| {
                error!("Listing all of {theme}/{region} failed: {e}");
                Vec::new()
            })
    }

    /// Visibility of the catalog's current version of block `id`, or `None`
    /// when there is no such block.
    pub async fn is_block_allowed(
        &self,
        id: Uuid,
        ctx: &RequestContext,
    ) -> Result<Option<bool>, CatalogError> {
        let generation = cache::generation(self.cache.as_ref(), BLOCKS_GROUP).await;
        let Some(block) = self.find_block(id).await? else {
            return Ok(None);
        };
        Ok(Some(self.evaluator.is_allowed_at(&block, ctx, generation).await))
    }

    pub async fn find_block(&self, id: Uuid) -> Result<Option<Block>, CatalogError> {
        Ok(self.catalog.find_all().await?.into_iter().find(|b| b.id == id))
    }

    /// Builds a listing, returning it with the `blocks` generation it was
    /// computed at.
    ///
    /// The generation is read before the catalog, so a listing built from a
    /// snapshot that an invalidation has since overtaken is never cached.
    async fn compose(
        &self,
        theme: &str,
        region: &str,
        ctx: Option<&RequestContext>,
    ) -> Result<(Vec<Block>, Option<u64>), CatalogError> {
        let cache = self.cache.as_ref();
        let key = match ctx {
            Some(ctx) => format!("region:{theme}:{region}:{}", ctx.fingerprint()),
            None => format!("region_all:{theme}:{region}"),
        };
        let generation = cache::generation(cache, BLOCKS_GROUP).await;
        if let Some(listing) = cache::fetch::<Vec<Block>>(cache, BLOCKS_GROUP, generation, &key).await
        {
            return Ok((listing, generation));
        }

        let assigned = self.catalog.find_assigned(theme, region).await?;
        let active = self.listeners.active_handlers().await;

        let mut listing = Vec::with_capacity(assigned.len());
        for block in assigned {
            if !block.status {
                continue;
            }
            if block.handler != CORE_HANDLER && !active.contains(&block.handler) {
                debug!(
                    "Block {} skipped: handler {} is not active",
                    block.id, block.handler
                );
                continue;
            }
            if let Some(ctx) = ctx {
                if !self.evaluator.is_allowed_at(&block, ctx, generation).await {
                    continue;
                }
            }
            listing.push(block);
        }

        // `sort_by_key` is stable, so equal ranks keep catalog order.
        listing.sort_by_key(|b| b.ordering_in(theme, region));

        debug!("Composed {theme}/{region}: {} blocks", listing.len());
        cache::store(cache, BLOCKS_GROUP, generation, &key, &listing).await;
        Ok((listing, generation))
    }

    /// Blocks that render nowhere, in catalog order.
    ///
    /// A block is in use when it is enabled, assigned to a region of the
    /// front or back theme, backed by an active handler, and can pass the
    /// visibility gates for at least one request. The current request plays
    /// no part: a block shown only under `/blog/*` is in use wherever the
    /// scan is started from.
    pub async fn unused(&self) -> Vec<Block> {
        match self.collect_unused().await {
            Ok(blocks) => blocks,
            Err(e) => {
                error!("Unused block scan failed: {e}");
                Vec::new()
            }
        }
    }

    async fn collect_unused(&self) -> Result<Vec<Block>, CatalogError> {
        let mut used: HashSet<Uuid> = HashSet::new();
        for theme in self.themes.iter() {
            for region in &theme.regions {
                let (listing, _) = self.compose(&theme.id, region, None).await?;
                used.extend(
                    listing
                        .iter()
                        .filter(|b| !self.evaluator.never_renders(b))
                        .map(|b| b.id),
                );
            }
        }

        Ok(self
            .catalog
            .find_all()
            .await?
            .into_iter()
            .filter(|b| !used.contains(&b.id))
            .collect())
    }

    /// Renders every listed block through `dispatcher` and concatenates the
    /// output. A block that fails to render is logged and left out.
    pub async fn render_region(
        &self,
        theme: &str,
        region: &str,
        ctx: &RequestContext,
        dispatcher: &dyn RenderDispatcher,
    ) -> String {
        let (listing, generation) = match self.compose(theme, region, Some(ctx)).await {
            Ok(composed) => composed,
            Err(e) => {
                error!("Rendering {theme}/{region} failed, rendering nothing: {e}");
                return String::new();
            }
        };

        let mut html = String::new();
        for block in listing {
            if !self.evaluator.is_allowed_at(&block, ctx, generation).await {
                continue;
            }
            match dispatcher.render(&block, ctx).await {
                Ok(out) => html.push_str(&out),
                Err(e) => warn!("Block {} failed to render: {e:#}", block.id),
            }
        }
        html
    }

    /// Drops every cached decision and listing derived from block records.
    pub async fn clear_cache(&self) {
        match self.cache.invalidate_group(BLOCKS_GROUP).await {
            Ok(()) => info!("Block cache cleared"),
            Err(e) => error!("Block cache invalidation failed: {e}"),
        }
    }

    /// Reacts to a block create, update or delete.
    pub async fn handle_event(&self, event: &CatalogEvent) {
        debug!("Catalog event {event:?}");
        self.clear_cache().await;
    }

    /// Reacts to a plugin being enabled or disabled: the handler set is
    /// recomputed and, since listings depend on it, block results go too.
    pub async fn plugins_changed(&self) {
        if let Err(e) = self.cache.invalidate_group(LISTENERS_GROUP).await {
            error!("Listener cache invalidation failed: {e}");
        }
        self.clear_cache().await;
    }
}
