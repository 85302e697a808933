use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::warn;
use uuid::Uuid;

use crate::blocks::catalog::{BlockCatalog, CatalogError};
use crate::models::block::{
    Block, BlockRegionRow, BlockRoleRow, BlockRow, RegionAssignment, Visibility,
};

/// Postgres-backed catalog over `blocks`, `block_regions` and `blocks_roles`.
pub struct PgBlockCatalog {
    pool: PgPool,
}

impl PgBlockCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Attaches region assignments and roles to block rows.
    /// Rows with an unrecognised visibility are dropped.
    async fn hydrate(&self, rows: Vec<BlockRow>) -> Result<Vec<Block>, CatalogError> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();

        let regions: Vec<BlockRegionRow> = sqlx::query_as(
            "SELECT block_id, theme, region, ordering FROM block_regions WHERE block_id = ANY($1)",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let roles: Vec<BlockRoleRow> =
            sqlx::query_as("SELECT block_id, role FROM blocks_roles WHERE block_id = ANY($1)")
                .bind(&ids)
                .fetch_all(&self.pool)
                .await?;

        Ok(assemble_blocks(rows, regions, roles))
    }
}

/// Groups region and role rows under their block rows, keeping the order of
/// `rows`. Rows with an unrecognised visibility are dropped, so a block the
/// engine can't evaluate never renders.
fn assemble_blocks(
    rows: Vec<BlockRow>,
    regions: Vec<BlockRegionRow>,
    roles: Vec<BlockRoleRow>,
) -> Vec<Block> {
    let mut regions_by_block: HashMap<Uuid, Vec<RegionAssignment>> = HashMap::new();
    for r in regions {
        regions_by_block
            .entry(r.block_id)
            .or_default()
            .push(RegionAssignment {
                theme: r.theme,
                region: r.region,
                ordering: r.ordering,
            });
    }

    let mut roles_by_block: HashMap<Uuid, Vec<String>> = HashMap::new();
    for r in roles {
        roles_by_block.entry(r.block_id).or_default().push(r.role);
    }

    rows.into_iter()
        .filter_map(|row| {
            let visibility = match row.visibility.parse::<Visibility>() {
                Ok(v) => v,
                Err(e) => {
                    warn!("Skipping block {}: {e}", row.id);
                    return None;
                }
            };
            Some(Block {
                id: row.id,
                title: row.title,
                handler: row.handler,
                status: row.status,
                visibility,
                pages: row.pages.unwrap_or_default(),
                locale: row.locale.into_iter().collect(),
                roles: roles_by_block
                    .remove(&row.id)
                    .unwrap_or_default()
                    .into_iter()
                    .collect(),
                regions: regions_by_block.remove(&row.id).unwrap_or_default(),
            })
        })
        .collect()
}

#[async_trait]
impl BlockCatalog for PgBlockCatalog {
    async fn find_assigned(&self, theme: &str, region: &str) -> Result<Vec<Block>, CatalogError> {
        let rows: Vec<BlockRow> = sqlx::query_as(
            r#"
            SELECT b.id, b.title, b.handler, b.status, b.visibility, b.pages, b.locale,
                   b.created_at, b.updated_at
            FROM blocks b
            JOIN block_regions br ON br.block_id = b.id
            WHERE br.theme = $1 AND br.region = $2 AND b.status = TRUE
            ORDER BY b.created_at ASC, b.id ASC
            "#,
        )
        .bind(theme)
        .bind(region)
        .fetch_all(&self.pool)
        .await?;

        self.hydrate(rows).await
    }

    async fn find_all(&self) -> Result<Vec<Block>, CatalogError> {
        let rows: Vec<BlockRow> = sqlx::query_as(
            r#"
            SELECT id, title, handler, status, visibility, pages, locale, created_at, updated_at
            FROM blocks
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        self.hydrate(rows).await
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn row(title: &str, visibility: &str) -> BlockRow {
        BlockRow {
            id: Uuid::new_v4(),
            title: title.into(),
            handler: "core".into(),
            status: true,
            visibility: visibility.into(),
            pages: None,
            locale: vec!["en".into()],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn placement(block_id: Uuid, region: &str, ordering: i32) -> BlockRegionRow {
        BlockRegionRow {
            block_id,
            theme: "default".into(),
            region: region.into(),
            ordering,
        }
    }

    #[test]
    fn test_assemble_attaches_regions_and_roles() {
        let menu = row("Menu", "except");
        let blog = row("Blog", "include");
        let regions = vec![
            placement(blog.id, "sidebar", 2),
            placement(menu.id, "sidebar", 1),
            placement(menu.id, "footer", 0),
        ];
        let roles = vec![
            BlockRoleRow {
                block_id: menu.id,
                role: "editor".into(),
            },
            BlockRoleRow {
                block_id: menu.id,
                role: "admin".into(),
            },
        ];

        let blocks = assemble_blocks(vec![menu.clone(), blog.clone()], regions, roles);

        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].id, menu.id);
        assert_eq!(blocks[0].visibility, Visibility::Exclude);
        assert_eq!(blocks[0].ordering_in("default", "footer"), 0);
        assert_eq!(blocks[0].ordering_in("default", "sidebar"), 1);
        assert_eq!(
            blocks[0].roles.iter().map(String::as_str).collect::<Vec<_>>(),
            ["admin", "editor"]
        );
        assert_eq!(blocks[0].pages, "");
        assert!(blocks[0].locale.contains("en"));

        assert_eq!(blocks[1].id, blog.id);
        assert_eq!(blocks[1].visibility, Visibility::Include);
        assert!(blocks[1].roles.is_empty());
        assert_eq!(blocks[1].regions.len(), 1);
    }

    #[test]
    fn test_assemble_drops_unknown_visibility() {
        let good = row("Good", "php");
        let bad = row("Bad", "sometimes");
        let regions = vec![placement(bad.id, "sidebar", 0), placement(good.id, "sidebar", 1)];

        let blocks = assemble_blocks(vec![bad, good.clone()], regions, Vec::new());

        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].id, good.id);
        assert_eq!(blocks[0].visibility, Visibility::Custom);
    }

    #[test]
    fn test_assemble_empty() {
        assert!(assemble_blocks(Vec::new(), Vec::new(), Vec::new()).is_empty());
    }
}
