use chrono::Utc;
use sqlx::{Connection, SqliteConnection};
use std::collections::{HashMap, HashSet};
use tracing::{info, instrument, warn};

use crate::catalog::{default_layout, presets};
use crate::error::AppError;
use crate::models::{
    DbFormation, DbFormationPosition, Formation, FormationPatch, FormationPosition,
    FormationWithAncestry, NewFormation, NewPosition, Scope,
};
use crate::validation::{FieldErrors, validate_input, validate_positions};

pub const DEFAULT_MAX_CHAIN_DEPTH: usize = 16;

#[instrument(skip(conn))]
pub async fn find_formation(
    conn: &mut SqliteConnection,
    id: i64,
) -> Result<Option<Formation>, AppError> {
    let row = sqlx::query_as::<_, DbFormation>("SELECT * FROM formations WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

    row.map(Formation::try_from).transpose()
}

#[instrument(skip(conn))]
pub async fn get_formation(conn: &mut SqliteConnection, id: i64) -> Result<Formation, AppError> {
    info!("Fetching formation by ID");
    match find_formation(conn, id).await? {
        Some(formation) => Ok(formation),
        _ => Err(AppError::NotFound(format!(
            "Formation with id {} not found in database",
            id
        ))),
    }
}

#[instrument(skip(conn))]
pub async fn list_formations(
    conn: &mut SqliteConnection,
    include_archived: bool,
) -> Result<Vec<Formation>, AppError> {
    info!(include_archived = %include_archived, "Listing formations");

    let query = if include_archived {
        "SELECT * FROM formations ORDER BY name, id"
    } else {
        "SELECT * FROM formations WHERE archived IS 0 ORDER BY name, id"
    };

    let rows = sqlx::query_as::<_, DbFormation>(query)
        .fetch_all(&mut *conn)
        .await?;

    rows.into_iter().map(Formation::try_from).collect()
}

/// Formations deriving directly from `id` through either parent reference.
#[instrument(skip(conn))]
pub async fn list_children(
    conn: &mut SqliteConnection,
    id: i64,
) -> Result<Vec<Formation>, AppError> {
    info!("Listing derived formations");
    let rows = sqlx::query_as::<_, DbFormation>(
        "SELECT * FROM formations
         WHERE parent_formation_id = ? OR parent_tactic_id = ?
         ORDER BY id",
    )
    .bind(id)
    .bind(id)
    .fetch_all(&mut *conn)
    .await?;

    rows.into_iter().map(Formation::try_from).collect()
}

#[instrument(skip(conn))]
pub async fn has_children(conn: &mut SqliteConnection, id: i64) -> Result<bool, AppError> {
    let count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM formations WHERE parent_formation_id = ? OR parent_tactic_id = ?",
    )
    .bind(id)
    .bind(id)
    .fetch_one(&mut *conn)
    .await?;

    Ok(count > 0)
}

#[instrument(skip(conn))]
pub async fn has_overrides(conn: &mut SqliteConnection, id: i64) -> Result<bool, AppError> {
    let count =
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM position_overrides WHERE formation_id = ?")
            .bind(id)
            .fetch_one(&mut *conn)
            .await?;

    Ok(count > 0)
}

/// Positions declared by the formation itself, ordered by index.
#[instrument(skip(conn))]
pub async fn get_declared_positions(
    conn: &mut SqliteConnection,
    formation_id: i64,
) -> Result<Vec<FormationPosition>, AppError> {
    let rows = sqlx::query_as::<_, DbFormationPosition>(
        "SELECT * FROM formation_positions
         WHERE formation_id = ?
         ORDER BY position_index",
    )
    .bind(formation_id)
    .fetch_all(&mut *conn)
    .await?;

    rows.into_iter().map(FormationPosition::try_from).collect()
}

/// Loads a formation and every formation reachable through its parent references.
#[instrument(skip(conn))]
pub async fn get_with_ancestry(
    conn: &mut SqliteConnection,
    formation_id: i64,
) -> Result<FormationWithAncestry, AppError> {
    info!("Loading formation ancestry");
    let leaf = get_formation(conn, formation_id).await?;

    let mut loaded: HashMap<i64, Formation> = HashMap::new();
    let mut pending: Vec<i64> = leaf.parents().collect();
    loaded.insert(leaf.id, leaf);

    while let Some(next) = pending.pop() {
        if loaded.contains_key(&next) {
            continue;
        }
        let ancestor = find_formation(conn, next).await?.ok_or_else(|| {
            AppError::NotFound(format!(
                "Ancestor formation {} of formation {} not found",
                next, formation_id
            ))
        })?;
        pending.extend(ancestor.parents());
        loaded.insert(next, ancestor);
    }

    let order = linearize(formation_id, &loaded)?;

    let mut lineage = Vec::with_capacity(order.len());
    for id in &order {
        if let Some(formation) = loaded.remove(id) {
            lineage.push(formation);
        }
    }

    let formation = lineage
        .pop()
        .ok_or_else(|| AppError::Internal(format!("Empty lineage for {}", formation_id)))?;
    lineage.reverse();

    Ok(FormationWithAncestry {
        formation,
        ancestors: lineage,
    })
}

/// Orders a derivation graph root-most first, ending with `leaf_id`.
///
/// For each formation its formation-parent lineage comes first, then its
/// tactic-parent lineage, then the formation itself. A formation reached again
/// after it was placed (a diamond) keeps its first position. Reaching a
/// formation that is still on the walk path is a cycle.
pub fn linearize(leaf_id: i64, formations: &HashMap<i64, Formation>) -> Result<Vec<i64>, AppError> {
    fn visit(
        id: i64,
        leaf_id: i64,
        formations: &HashMap<i64, Formation>,
        on_path: &mut HashSet<i64>,
        placed: &mut HashSet<i64>,
        order: &mut Vec<i64>,
    ) -> Result<(), AppError> {
        if placed.contains(&id) {
            return Ok(());
        }
        if !on_path.insert(id) {
            return Err(AppError::CycleDetected {
                formation_id: leaf_id,
                revisited_id: id,
            });
        }

        let formation = formations.get(&id).ok_or_else(|| {
            AppError::NotFound(format!("Formation with id {} not found in database", id))
        })?;
        for parent in formation.parents() {
            visit(parent, leaf_id, formations, on_path, placed, order)?;
        }

        on_path.remove(&id);
        placed.insert(id);
        order.push(id);
        Ok(())
    }

    let mut order = Vec::new();
    visit(
        leaf_id,
        leaf_id,
        formations,
        &mut HashSet::new(),
        &mut HashSet::new(),
        &mut order,
    )?;
    Ok(order)
}

async fn insert_positions(
    conn: &mut SqliteConnection,
    formation_id: i64,
    positions: &[NewPosition],
) -> Result<(), AppError> {
    for position in positions {
        sqlx::query(
            "INSERT INTO formation_positions
             (formation_id, position_index, position, x_coord, y_coord, direction)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(formation_id)
        .bind(position.position_index)
        .bind(position.position.as_str())
        .bind(position.x_coord)
        .bind(position.y_coord)
        .bind(position.direction.map(|d| d.as_str()))
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

/// Validates a prospective parent reference and returns the resulting chain depth.
async fn check_parent(
    conn: &mut SqliteConnection,
    errors: &mut FieldErrors,
    field: &str,
    parent_id: i64,
    child_id: Option<i64>,
    squad_size: i64,
) -> Result<usize, AppError> {
    if child_id == Some(parent_id) {
        errors.add(field, "A formation cannot derive from itself");
        return Ok(0);
    }

    let lineage = match get_with_ancestry(conn, parent_id).await {
        Ok(lineage) => lineage,
        Err(AppError::NotFound(_)) => {
            errors.add(field, format!("Parent formation {} does not exist", parent_id));
            return Ok(0);
        }
        Err(e) => return Err(e),
    };

    if let Some(child_id) = child_id {
        if lineage.contains(child_id) {
            errors.add(
                field,
                format!(
                    "Deriving from formation {} would make formation {} its own ancestor",
                    parent_id, child_id
                ),
            );
        }
    }
    if lineage.formation.archived {
        errors.add(field, format!("Parent formation {} is archived", parent_id));
    }
    if lineage.formation.squad_size != squad_size {
        errors.add(
            "squad_size",
            format!(
                "Squad size {} does not match parent formation {} with squad size {}",
                squad_size, parent_id, lineage.formation.squad_size
            ),
        );
    }

    Ok(lineage.ancestors.len() + 2)
}

#[instrument(skip(conn, new), fields(name = %new.name, squad_size = new.squad_size))]
pub async fn create_formation(
    conn: &mut SqliteConnection,
    new: &NewFormation,
    max_chain_depth: usize,
) -> Result<Formation, AppError> {
    info!("Creating formation");
    validate_input(new)?;

    let mut errors = FieldErrors::new();
    let mut chain_depth = 1;

    for (field, parent_id) in [
        ("parent_formation_id", new.parent_formation_id),
        ("parent_tactic_id", new.parent_tactic_id),
    ] {
        if let Some(parent_id) = parent_id {
            let depth =
                check_parent(conn, &mut errors, field, parent_id, None, new.squad_size).await?;
            chain_depth = chain_depth.max(depth);
        }
    }

    if chain_depth > max_chain_depth {
        errors.add(
            "parent_formation_id",
            format!(
                "Derivation chain of {} exceeds the maximum depth of {}",
                chain_depth, max_chain_depth
            ),
        );
    }

    let is_root = new.parent_formation_id.is_none() && new.parent_tactic_id.is_none();
    let defaulted;
    let positions: &[NewPosition] = if new.positions.is_empty() && is_root {
        match default_layout(new.squad_size) {
            Some(slots) => {
                defaulted = slots
                    .iter()
                    .enumerate()
                    .map(|(i, slot)| NewPosition::from_slot(i as i64, slot))
                    .collect::<Vec<_>>();
                &defaulted
            }
            None => {
                errors.add(
                    "positions",
                    format!(
                        "No default layout exists for a squad of {}; declare positions explicitly",
                        new.squad_size
                    ),
                );
                &new.positions
            }
        }
    } else {
        &new.positions
    };

    errors.into_result()?;
    validate_positions(positions, new.squad_size)?;

    let now = Utc::now().naive_utc();
    let tags = serde_json::to_string(&new.tags)?;

    let mut tx = conn.begin().await?;

    let res = sqlx::query(
        "INSERT INTO formations
         (name, system, squad_size, is_system_formation, parent_formation_id, parent_tactic_id,
          scope_type, scope_club_id, scope_age_group_id, scope_team_id, created_by, tags,
          archived, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, FALSE, ?, ?)",
    )
    .bind(&new.name)
    .bind(&new.system)
    .bind(new.squad_size)
    .bind(new.is_system_formation)
    .bind(new.parent_formation_id)
    .bind(new.parent_tactic_id)
    .bind(new.scope.scope_type())
    .bind(new.scope.club_id())
    .bind(new.scope.age_group_id())
    .bind(new.scope.team_id())
    .bind(new.created_by)
    .bind(tags)
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    let id = res.last_insert_rowid();
    insert_positions(&mut tx, id, positions).await?;

    tx.commit().await?;

    info!(formation_id = id, "Formation created");
    get_formation(conn, id).await
}

/// Applies a partial update.
///
/// A squad size change is refused while overrides or derived formations depend
/// on the current layout. Supplying `positions` replaces the declared layout.
#[instrument(skip(conn, patch))]
pub async fn update_formation(
    conn: &mut SqliteConnection,
    id: i64,
    patch: &FormationPatch,
    max_chain_depth: usize,
) -> Result<Formation, AppError> {
    info!("Updating formation");
    validate_input(patch)?;

    let current = get_formation(conn, id).await?;
    if current.is_system_formation {
        return Err(AppError::validation(
            "is_system_formation",
            "System formations are immutable",
        ));
    }
    if current.archived {
        return Err(AppError::validation(
            "archived",
            "Archived formations are read-only",
        ));
    }

    let squad_size = patch.squad_size.unwrap_or(current.squad_size);
    let parent_formation_id = patch
        .parent_formation_id
        .unwrap_or(current.parent_formation_id);
    let parent_tactic_id = patch.parent_tactic_id.unwrap_or(current.parent_tactic_id);
    let scope: Scope = patch.scope.unwrap_or(current.scope);

    let mut errors = FieldErrors::new();

    if squad_size != current.squad_size
        && (has_overrides(conn, id).await? || has_children(conn, id).await?)
    {
        errors.add(
            "squad_size",
            "Squad size cannot change while overrides or derived formations depend on this layout",
        );
    }

    // Only a changed parent link is re-validated. An unchanged parent that was
    // archived later, or a chain deeper than a since-lowered limit, stays valid.
    let mut chain_depth = 1;
    for (field, parent_id, previous) in [
        (
            "parent_formation_id",
            parent_formation_id,
            current.parent_formation_id,
        ),
        ("parent_tactic_id", parent_tactic_id, current.parent_tactic_id),
    ] {
        let Some(parent_id) = parent_id else {
            continue;
        };
        if Some(parent_id) != previous {
            let depth =
                check_parent(conn, &mut errors, field, parent_id, Some(id), squad_size).await?;
            chain_depth = chain_depth.max(depth);
        } else if squad_size != current.squad_size {
            let parent = get_formation(conn, parent_id).await?;
            if parent.squad_size != squad_size {
                errors.add(
                    "squad_size",
                    format!(
                        "Squad size {} does not match parent formation {} with squad size {}",
                        squad_size, parent_id, parent.squad_size
                    ),
                );
            }
        }
    }
    if chain_depth > max_chain_depth {
        errors.add(
            "parent_formation_id",
            format!(
                "Derivation chain of {} exceeds the maximum depth of {}",
                chain_depth, max_chain_depth
            ),
        );
    }

    let is_root = parent_formation_id.is_none() && parent_tactic_id.is_none();
    if let Some(positions) = &patch.positions {
        if positions.is_empty() && is_root {
            errors.add("positions", "A formation without a parent must declare positions");
        }
    }

    errors.into_result()?;

    match &patch.positions {
        Some(positions) => validate_positions(positions, squad_size)?,
        None if squad_size != current.squad_size => {
            let declared = get_declared_positions(conn, id).await?;
            if let Some(outside) = declared.iter().find(|p| p.position_index >= squad_size) {
                return Err(AppError::validation(
                    "squad_size",
                    format!(
                        "Declared position index {} does not fit a squad of {}",
                        outside.position_index, squad_size
                    ),
                ));
            }
        }
        None => {}
    }

    let name = patch.name.as_ref().unwrap_or(&current.name);
    let system = patch.system.as_ref().unwrap_or(&current.system);
    let tags = serde_json::to_string(patch.tags.as_ref().unwrap_or(&current.tags))?;
    let now = Utc::now().naive_utc();

    let mut tx = conn.begin().await?;

    sqlx::query(
        "UPDATE formations
         SET name = ?, system = ?, squad_size = ?, parent_formation_id = ?, parent_tactic_id = ?,
             scope_type = ?, scope_club_id = ?, scope_age_group_id = ?, scope_team_id = ?,
             tags = ?, updated_at = ?
         WHERE id = ?",
    )
    .bind(name)
    .bind(system)
    .bind(squad_size)
    .bind(parent_formation_id)
    .bind(parent_tactic_id)
    .bind(scope.scope_type())
    .bind(scope.club_id())
    .bind(scope.age_group_id())
    .bind(scope.team_id())
    .bind(tags)
    .bind(now)
    .bind(id)
    .execute(&mut *tx)
    .await?;

    if let Some(positions) = &patch.positions {
        sqlx::query("DELETE FROM formation_positions WHERE formation_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        insert_positions(&mut tx, id, positions).await?;
    }

    tx.commit().await?;

    get_formation(conn, id).await
}

/// Archived formations stay resolvable but drop out of pickers.
#[instrument(skip(conn))]
pub async fn set_formation_archived(
    conn: &mut SqliteConnection,
    id: i64,
    archive: bool,
) -> Result<bool, AppError> {
    info!("Toggling formation archived status");

    let formation = get_formation(conn, id).await?;
    if formation.is_system_formation {
        return Err(AppError::validation(
            "is_system_formation",
            "System formations cannot be archived",
        ));
    }

    sqlx::query("UPDATE formations SET archived = ?, updated_at = ? WHERE id = ?")
        .bind(archive)
        .bind(Utc::now().naive_utc())
        .bind(id)
        .execute(&mut *conn)
        .await?;

    Ok(archive)
}

/// Inserts any catalog preset that is not yet stored. Returns how many were added.
#[instrument(skip(conn))]
pub async fn seed_system_formations(conn: &mut SqliteConnection) -> Result<usize, AppError> {
    info!("Seeding system formations");
    let mut inserted = 0;

    for preset in presets() {
        let existing = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM formations WHERE is_system_formation IS 1 AND name = ?",
        )
        .bind(preset.name)
        .fetch_one(&mut *conn)
        .await?;

        if existing > 0 {
            continue;
        }

        let mut new = NewFormation::new(preset.name, preset.system, preset.squad_size, Scope::Global)
            .with_positions(
                preset
                    .slots
                    .iter()
                    .enumerate()
                    .map(|(i, slot)| NewPosition::from_slot(i as i64, slot))
                    .collect(),
            )
            .with_tags(&["preset"]);
        new.is_system_formation = true;

        let formation = create_formation(conn, &new, DEFAULT_MAX_CHAIN_DEPTH).await?;
        info!(formation_id = formation.id, name = preset.name, "Seeded system formation");
        inserted += 1;
    }

    if inserted == 0 {
        warn!("System formations already present, nothing seeded");
    }

    Ok(inserted)
}
