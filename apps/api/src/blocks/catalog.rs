use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::models::block::Block;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Catalog unavailable: {0}")]
    Unavailable(String),
}

/// Source of block records and their placements.
///
/// Both queries return blocks in catalog order, which is the tie-break for
/// blocks sharing an ordering rank.
#[async_trait]
pub trait BlockCatalog: Send + Sync {
    /// Enabled blocks assigned to `region` of `theme`.
    async fn find_assigned(&self, theme: &str, region: &str) -> Result<Vec<Block>, CatalogError>;

    /// Every block, enabled or not.
    async fn find_all(&self) -> Result<Vec<Block>, CatalogError>;
}

/// Mutation notice sent by the persistence layer after a write commits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "block_id", rename_all = "snake_case")]
pub enum CatalogEvent {
    Created(Uuid),
    Updated(Uuid),
    Deleted(Uuid),
}

impl CatalogEvent {
    pub fn block_id(&self) -> Uuid {
        match self {
            CatalogEvent::Created(id) | CatalogEvent::Updated(id) | CatalogEvent::Deleted(id) => {
                *id
            }
        }
    }
}

/// Catalog held in memory, in insertion order.
///
/// Mutators return the [`CatalogEvent`] the caller must hand to the engine.
#[derive(Default)]
pub struct InMemoryBlockCatalog {
    blocks: RwLock<Vec<Block>>,
    queries: AtomicUsize,
}

fn poisoned() -> CatalogError {
    CatalogError::Unavailable("in-memory catalog lock poisoned".to_string())
}

impl InMemoryBlockCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_blocks(blocks: Vec<Block>) -> Self {
        Self {
            blocks: RwLock::new(blocks),
            queries: AtomicUsize::new(0),
        }
    }

    /// Number of queries served so far.
    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::Relaxed)
    }

    pub fn insert(&self, block: Block) -> Result<CatalogEvent, CatalogError> {
        let id = block.id;
        self.blocks.write().map_err(|_| poisoned())?.push(block);
        Ok(CatalogEvent::Created(id))
    }

    /// Replaces the block with the same id, keeping its catalog position.
    /// Returns `None` when no such block exists.
    pub fn update(&self, block: Block) -> Result<Option<CatalogEvent>, CatalogError> {
        let mut blocks = self.blocks.write().map_err(|_| poisoned())?;
        let Some(slot) = blocks.iter_mut().find(|b| b.id == block.id) else {
            return Ok(None);
        };
        let id = block.id;
        *slot = block;
        Ok(Some(CatalogEvent::Updated(id)))
    }

    pub fn delete(&self, id: Uuid) -> Result<Option<CatalogEvent>, CatalogError> {
        let mut blocks = self.blocks.write().map_err(|_| poisoned())?;
        let before = blocks.len();
        blocks.retain(|b| b.id != id);
        Ok((blocks.len() != before).then_some(CatalogEvent::Deleted(id)))
    }
}

#[async_trait]
impl BlockCatalog for InMemoryBlockCatalog {
    async fn find_assigned(&self, theme: &str, region: &str) -> Result<Vec<Block>, CatalogError> {
        self.queries.fetch_add(1, Ordering::Relaxed);
        let blocks = self.blocks.read().map_err(|_| poisoned())?;
        Ok(blocks
            .iter()
            .filter(|b| b.status && b.assignment(theme, region).is_some())
            .cloned()
            .collect())
    }

    async fn find_all(&self) -> Result<Vec<Block>, CatalogError> {
        self.queries.fetch_add(1, Ordering::Relaxed);
        Ok(self.blocks.read().map_err(|_| poisoned())?.clone())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::models::block::{RegionAssignment, Visibility};

    fn block(title: &str, status: bool, region: &str) -> Block {
        Block {
            id: Uuid::new_v4(),
            title: title.into(),
            handler: "core".into(),
            status,
            visibility: Visibility::Exclude,
            pages: String::new(),
            locale: BTreeSet::new(),
            roles: BTreeSet::new(),
            regions: vec![RegionAssignment {
                theme: "default".into(),
                region: region.into(),
                ordering: 0,
            }],
        }
    }

    #[tokio::test]
    async fn test_find_assigned_skips_disabled_and_other_regions() {
        let catalog = InMemoryBlockCatalog::with_blocks(vec![
            block("a", true, "sidebar"),
            block("b", false, "sidebar"),
            block("c", true, "footer"),
        ]);
        let found = catalog.find_assigned("default", "sidebar").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].title, "a");
        assert!(catalog.find_assigned("other", "sidebar").await.unwrap().is_empty());
        assert_eq!(catalog.queries(), 2);
    }

    #[tokio::test]
    async fn test_update_keeps_position() {
        let first = block("first", true, "sidebar");
        let second = block("second", true, "sidebar");
        let catalog = InMemoryBlockCatalog::with_blocks(vec![first.clone(), second]);

        let mut renamed = first.clone();
        renamed.title = "renamed".into();
        let event = catalog.update(renamed).unwrap();
        assert_eq!(event, Some(CatalogEvent::Updated(first.id)));

        let all = catalog.find_all().await.unwrap();
        assert_eq!(all[0].title, "renamed");
        assert_eq!(all[1].title, "second");
    }

    #[tokio::test]
    async fn test_delete_unknown_block() {
        let catalog = InMemoryBlockCatalog::new();
        assert_eq!(catalog.delete(Uuid::new_v4()).unwrap(), None);
    }

    #[test]
    fn test_event_wire_format() {
        let id = Uuid::nil();
        let json = serde_json::to_value(CatalogEvent::Deleted(id)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"event": "deleted", "block_id": id.to_string()})
        );
    }
}
