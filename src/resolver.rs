//! Effective layout resolution.
//!
//! The layout of a formation is an ordered overlay keyed by position index:
//! each formation in the lineage (root first) replaces whole entries for the
//! indices it declares, then the leaf's overrides patch coordinates and
//! direction. Resolution never writes.

use sqlx::SqliteConnection;
use std::collections::BTreeMap;
use tracing::{info, instrument};

use crate::db::{get_declared_positions, get_with_ancestry};
use crate::error::AppError;
use crate::models::{
    FormationPosition, FormationWithAncestry, PositionOverride, ResolvedLayout, ResolvedPosition,
};
use crate::overrides::list_position_overrides;

/// Every formation in a chain must share the leaf's squad size.
pub fn check_squad_size(lineage: &FormationWithAncestry) -> Result<i64, AppError> {
    let expected = lineage.formation.squad_size;

    match lineage.ancestors.iter().find(|f| f.squad_size != expected) {
        Some(offender) => Err(AppError::InconsistentSquadSize {
            formation_id: lineage.formation.id,
            offender_id: offender.id,
            expected,
            found: offender.squad_size,
        }),
        None => Ok(expected),
    }
}

/// Merges declared layers (root first) and the leaf's overrides.
///
/// A later layer's declaration for an index replaces the earlier one entirely.
/// Overrides only apply to indices present after merging and never touch the
/// position code.
pub fn overlay(
    formation_id: i64,
    squad_size: i64,
    layers: &[Vec<FormationPosition>],
    overrides: &[PositionOverride],
) -> ResolvedLayout {
    let mut merged: BTreeMap<i64, ResolvedPosition> = BTreeMap::new();

    for layer in layers {
        for declared in layer {
            merged.insert(
                declared.position_index,
                ResolvedPosition {
                    position_index: declared.position_index,
                    position: declared.position,
                    x_coord: declared.x_coord,
                    y_coord: declared.y_coord,
                    direction: declared.direction,
                    declared_by: declared.formation_id,
                    overridden: false,
                },
            );
        }
    }

    for patch in overrides.iter().filter(|o| o.formation_id == formation_id) {
        if let Some(resolved) = merged.get_mut(&patch.position_index) {
            if let Some(x) = patch.x_coord {
                resolved.x_coord = x;
            }
            if let Some(y) = patch.y_coord {
                resolved.y_coord = y;
            }
            if let Some(direction) = patch.direction {
                resolved.direction = Some(direction);
            }
            resolved.overridden = true;
        }
    }

    ResolvedLayout {
        formation_id,
        squad_size,
        positions: merged.into_values().collect(),
    }
}

#[instrument(skip(conn))]
pub async fn resolve_layout(
    conn: &mut SqliteConnection,
    formation_id: i64,
) -> Result<ResolvedLayout, AppError> {
    info!("Resolving formation layout");
    let lineage = get_with_ancestry(conn, formation_id).await?;
    let squad_size = check_squad_size(&lineage)?;

    let mut layers = Vec::with_capacity(lineage.ancestors.len() + 1);
    for formation in lineage.lineage() {
        layers.push(get_declared_positions(conn, formation.id).await?);
    }

    let overrides = list_position_overrides(conn, formation_id).await?;

    let layout = overlay(formation_id, squad_size, &layers, &overrides);
    info!(
        positions = layout.positions.len(),
        layers = layers.len(),
        "Resolved formation layout"
    );
    Ok(layout)
}
