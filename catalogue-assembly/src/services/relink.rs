//! Restores attachments that point into a sector after its content changed
//!
//! Two kinds of attachment survive a sector rebuild only by fingerprint:
//! catalogue usages from elsewhere whose parent was a sector copy, and
//! other sectors targeting a node of this sector.

use tracing::{debug, info, warn};

use crate::error::Result;
use crate::models::{NameUsage, Sector, SimpleName};
use crate::store::Backend;

/// A catalogue usage outside the sector hanging below one of its copies
#[derive(Debug, Clone)]
pub struct ForeignChild {
    pub usage: NameUsage,
    /// Fingerprint of the parent copy before the rebuild
    pub parent: SimpleName,
}

/// Collect foreign children together with their parents' fingerprints
pub async fn collect_foreign_children(backend: &Backend, catalogue_key: i32, sector_key: i32) -> Result<Vec<ForeignChild>> {
    let children = backend.tree.foreign_children(catalogue_key, sector_key).await?;
    let mut collected = Vec::with_capacity(children.len());

    for usage in children {
        let Some(parent_id) = usage.parent_id.as_deref() else {
            continue;
        };
        if let Some(parent) = backend.tree.get_usage(catalogue_key, parent_id).await? {
            collected.push(ForeignChild {
                parent: parent.to_simple_name(),
                usage,
            });
        }
    }

    Ok(collected)
}

/// Reattach foreign children whose parent copy disappeared.
///
/// A child is moved to the unique sector copy matching its old parent's
/// fingerprint, otherwise to the sector target. Returns the number moved.
pub async fn relink_foreign_children(
    backend: &Backend,
    catalogue_key: i32,
    sector: &Sector,
    children: &[ForeignChild],
) -> Result<usize> {
    let mut moved = 0;

    for child in children {
        let parent_id = child.parent.id.as_deref();
        if let Some(parent_id) = parent_id {
            if backend.tree.get_usage(catalogue_key, parent_id).await?.is_some() {
                continue;
            }
        }

        let candidates = backend
            .matcher
            .find_in_sector(&child.parent, catalogue_key, sector.key)
            .await?;

        let new_parent = match candidates.as_slice() {
            [single] => Some(single.as_str()),
            _ => {
                warn!(
                    child = %child.usage.id,
                    parent = %child.parent,
                    candidates = candidates.len(),
                    "No unique match for foreign child parent, attaching to sector target"
                );
                sector.target.id.as_deref()
            }
        };

        backend.tree.set_parent(catalogue_key, &child.usage.id, new_parent).await?;
        moved += 1;
    }

    if moved > 0 {
        info!(moved, "Relinked foreign children");
    }
    Ok(moved)
}

/// Re-resolve targets of child sectors that point to vanished copies.
///
/// A target is kept if its node still exists, moved to the unique sector
/// copy matching its fingerprint, or cleared otherwise. Returns the number
/// of sectors updated.
pub async fn relink_child_sectors(
    backend: &Backend,
    catalogue_key: i32,
    sector: &Sector,
    child_sectors: Vec<Sector>,
) -> Result<usize> {
    let mut updated = 0;

    for mut child in child_sectors {
        if let Some(target_id) = child.target.id.as_deref() {
            if backend.tree.get_usage(catalogue_key, target_id).await?.is_some() {
                continue;
            }
        }

        let candidates = backend
            .matcher
            .find_in_sector(&child.target, catalogue_key, sector.key)
            .await?;

        child.target.id = match candidates.len() {
            1 => candidates.into_iter().next(),
            n => {
                warn!(
                    child_sector = child.key,
                    target = %child.target,
                    candidates = n,
                    "Child sector target cannot be resolved, clearing it"
                );
                None
            }
        };

        debug!(child_sector = child.key, target = ?child.target.id, "Updating child sector target");
        backend.sectors.update_sector(&child).await?;
        updated += 1;
    }

    Ok(updated)
}

/// Detach a deleted sector's surroundings: foreign children move to the
/// sector target and child sectors lose their target id
pub async fn detach_sector(backend: &Backend, catalogue_key: i32, sector: &Sector) -> Result<()> {
    let foreign = backend.tree.foreign_children(catalogue_key, sector.key).await?;
    for child in &foreign {
        backend
            .tree
            .set_parent(catalogue_key, &child.id, sector.target.id.as_deref())
            .await?;
    }

    let child_sectors = backend.sectors.child_sectors(catalogue_key, sector.key).await?;
    for mut child in child_sectors {
        warn!(child_sector = child.key, "Target removed with parent sector");
        child.target.id = None;
        backend.sectors.update_sector(&child).await?;
    }

    if !foreign.is_empty() {
        info!(moved = foreign.len(), "Moved foreign children to sector target");
    }
    Ok(())
}
