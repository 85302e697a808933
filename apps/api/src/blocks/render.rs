use async_trait::async_trait;

use crate::models::block::Block;
use crate::models::request::RequestContext;

/// Produces the markup for one block. Implemented by the host; the engine
/// only decides which blocks reach it and in what order.
#[async_trait]
pub trait RenderDispatcher: Send + Sync {
    async fn render(&self, block: &Block, ctx: &RequestContext) -> anyhow::Result<String>;
}
