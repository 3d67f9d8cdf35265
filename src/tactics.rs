//! Tactics and their principles.
//!
//! A tactic is a formation with a `parent_tactic_id`; it resolves like any other
//! formation. Principles annotate groups of indices of the resolved layout.

use sqlx::{Connection, SqliteConnection};
use tracing::{info, instrument};

use crate::db::{create_formation, get_formation};
use crate::error::AppError;
use crate::models::{DbTacticPrinciple, Formation, NewFormation, NewPrinciple, TacticPrinciple};
use crate::resolver::resolve_layout;
use crate::validation::{FieldErrors, validate_input};

#[instrument(skip(conn))]
pub async fn list_principles(
    conn: &mut SqliteConnection,
    formation_id: i64,
) -> Result<Vec<TacticPrinciple>, AppError> {
    let rows = sqlx::query_as::<_, DbTacticPrinciple>(
        "SELECT * FROM tactic_principles WHERE formation_id = ? ORDER BY id",
    )
    .bind(formation_id)
    .fetch_all(&mut *conn)
    .await?;

    rows.into_iter().map(TacticPrinciple::try_from).collect()
}

/// Adds a principle whose indices must all exist in the formation's resolved layout.
#[instrument(skip(conn, principle), fields(title = %principle.title))]
pub async fn add_principle(
    conn: &mut SqliteConnection,
    formation_id: i64,
    principle: &NewPrinciple,
) -> Result<TacticPrinciple, AppError> {
    info!("Adding tactic principle");
    validate_input(principle)?;

    let formation = get_formation(conn, formation_id).await?;
    if formation.is_system_formation {
        return Err(AppError::validation(
            "is_system_formation",
            "System formations are immutable",
        ));
    }
    if formation.archived {
        return Err(AppError::validation(
            "archived",
            "Archived formations are read-only",
        ));
    }

    if principle.position_indices.is_empty() {
        return Err(AppError::validation(
            "position_indices",
            "A principle must reference at least one position",
        ));
    }

    let layout = resolve_layout(conn, formation_id).await?;
    let available = layout.indices();
    let missing: Vec<String> = principle
        .position_indices
        .difference(&available)
        .map(|i| i.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(AppError::validation(
            "position_indices",
            format!(
                "Indices {} are not part of the resolved layout of formation {}",
                missing.join(", "),
                formation_id
            ),
        ));
    }

    let indices = serde_json::to_string(&principle.position_indices)?;
    let res = sqlx::query(
        "INSERT INTO tactic_principles (formation_id, title, description, position_indices)
         VALUES (?, ?, ?, ?)",
    )
    .bind(formation_id)
    .bind(&principle.title)
    .bind(&principle.description)
    .bind(indices)
    .execute(&mut *conn)
    .await?;

    let row = sqlx::query_as::<_, DbTacticPrinciple>("SELECT * FROM tactic_principles WHERE id = ?")
        .bind(res.last_insert_rowid())
        .fetch_one(&mut *conn)
        .await?;

    TacticPrinciple::try_from(row)
}

#[instrument(skip(conn))]
pub async fn remove_principle(
    conn: &mut SqliteConnection,
    formation_id: i64,
    principle_id: i64,
) -> Result<(), AppError> {
    info!("Removing tactic principle");
    let result = sqlx::query("DELETE FROM tactic_principles WHERE id = ? AND formation_id = ?")
        .bind(principle_id)
        .bind(formation_id)
        .execute(&mut *conn)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(format!(
            "Principle {} not found on formation {}",
            principle_id, formation_id
        )));
    }

    Ok(())
}

/// Creates a tactic and its principles atomically. Any invalid principle
/// rolls back the whole tactic.
#[instrument(skip(conn, new, principles), fields(name = %new.name, principles = principles.len()))]
pub async fn create_tactic(
    conn: &mut SqliteConnection,
    new: &NewFormation,
    principles: &[NewPrinciple],
    max_chain_depth: usize,
) -> Result<(Formation, Vec<TacticPrinciple>), AppError> {
    info!("Creating tactic");
    if new.parent_tactic_id.is_none() {
        return Err(AppError::validation(
            "parent_tactic_id",
            "A tactic must reference the formation it is a tactic of",
        ));
    }

    let mut tx = conn.begin().await?;
    let tactic = create_formation(&mut tx, new, max_chain_depth).await?;

    let mut errors = FieldErrors::new();
    let mut created = Vec::with_capacity(principles.len());
    for (i, principle) in principles.iter().enumerate() {
        match add_principle(&mut tx, tactic.id, principle).await {
            Ok(p) => created.push(p),
            Err(AppError::Validation(e)) => errors.merge_prefixed(&format!("principles[{}]", i), e),
            Err(e) => return Err(e),
        }
    }
    errors.into_result()?;

    tx.commit().await?;
    info!(formation_id = tactic.id, "Tactic created");
    Ok((tactic, created))
}
