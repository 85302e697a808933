use std::sync::Arc;

use tracing::{debug, warn};

use crate::blocks::cache::{self, ResultCache, BLOCKS_GROUP};
use crate::blocks::pattern::MatcherCache;
use crate::blocks::predicate::PredicateRegistry;
use crate::models::block::{Block, Visibility};
use crate::models::request::RequestContext;

/// Decides whether a single block may render for a request.
///
/// Gates run in a fixed order and short-circuit on the first denial:
/// 1. locale: a non-empty locale list must contain the request locale
/// 2. roles: a non-empty role list must share a role with the user
/// 3. path or predicate, per the block's [`Visibility`]
pub struct VisibilityEvaluator {
    matchers: MatcherCache,
    predicates: Arc<PredicateRegistry>,
    cache: Arc<dyn ResultCache>,
}

impl VisibilityEvaluator {
    pub fn new(
        matchers: MatcherCache,
        predicates: Arc<PredicateRegistry>,
        cache: Arc<dyn ResultCache>,
    ) -> Self {
        Self {
            matchers,
            predicates,
            cache,
        }
    }

    pub fn matchers(&self) -> &MatcherCache {
        &self.matchers
    }

    /// Cached visibility decision for `block` under `ctx`.
    ///
    /// `block` must be at least as fresh as the moment of the call; callers
    /// holding an older snapshot use [`Self::is_allowed_at`].
    pub async fn is_allowed(&self, block: &Block, ctx: &RequestContext) -> bool {
        let generation = cache::generation(self.cache.as_ref(), BLOCKS_GROUP).await;
        self.is_allowed_at(block, ctx, generation).await
    }

    /// Cached decision for a block read from the catalog after the `blocks`
    /// group was at `generation`.
    pub async fn is_allowed_at(
        &self,
        block: &Block,
        ctx: &RequestContext,
        generation: Option<u64>,
    ) -> bool {
        let cache = self.cache.as_ref();
        let key = format!("allowed:{}:{}", block.id, ctx.fingerprint());
        if let Some(allowed) = cache::fetch::<bool>(cache, BLOCKS_GROUP, generation, &key).await {
            return allowed;
        }

        let allowed = self.evaluate(block, ctx);
        cache::store(cache, BLOCKS_GROUP, generation, &key, &allowed).await;
        allowed
    }

    /// True when no request can pass the gates: the block is limited to
    /// locales the site doesn't serve, lists no pages under `include`, or
    /// names a predicate that isn't registered.
    pub fn never_renders(&self, block: &Block) -> bool {
        let languages = &self.matchers.settings().languages;
        if !block.locale.is_empty()
            && !languages.is_empty()
            && !languages.iter().any(|code| block.locale.contains(code))
        {
            return true;
        }

        match block.visibility {
            Visibility::Exclude => false,
            Visibility::Include => {
                let locale = languages.first().map_or("", String::as_str);
                self.matchers.matcher_for(&block.pages, locale).is_never()
            }
            Visibility::Custom => !self.predicates.contains(&block.pages),
        }
    }

    /// Uncached evaluation of every gate.
    pub fn evaluate(&self, block: &Block, ctx: &RequestContext) -> bool {
        if !block.locale.is_empty() && !block.locale.contains(&ctx.locale) {
            debug!("Block {} denied: locale {} not allowed", block.id, ctx.locale);
            return false;
        }

        if !block.roles.is_empty() && block.roles.is_disjoint(&ctx.roles) {
            debug!("Block {} denied: no matching role", block.id);
            return false;
        }

        match block.visibility {
            Visibility::Exclude => !self.matchers.matches(&block.pages, &ctx.locale, &ctx.path),
            Visibility::Include => self.matchers.matches(&block.pages, &ctx.locale, &ctx.path),
            Visibility::Custom => match self.predicates.evaluate(&block.pages, ctx) {
                Ok(allowed) => allowed,
                Err(e) => {
                    warn!("Block {} denied: {e}", block.id);
                    false
                }
            },
        }
    }
}
