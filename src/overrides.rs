use sqlx::SqliteConnection;
use tracing::{info, instrument};

use crate::db::get_formation;
use crate::error::AppError;
use crate::models::{DbPositionOverride, NewPositionOverride, PositionOverride};
use crate::resolver::resolve_layout;
use crate::validation::validate_input;

#[instrument(skip(conn))]
pub async fn list_position_overrides(
    conn: &mut SqliteConnection,
    formation_id: i64,
) -> Result<Vec<PositionOverride>, AppError> {
    let rows = sqlx::query_as::<_, DbPositionOverride>(
        "SELECT * FROM position_overrides
         WHERE formation_id = ?
         ORDER BY position_index",
    )
    .bind(formation_id)
    .fetch_all(&mut *conn)
    .await?;

    rows.into_iter().map(PositionOverride::try_from).collect()
}

/// Creates or replaces the override for one index of a formation.
///
/// The index must exist in the formation's resolved layout at write time.
#[instrument(skip(conn, input), fields(position_index = input.position_index))]
pub async fn set_position_override(
    conn: &mut SqliteConnection,
    formation_id: i64,
    input: &NewPositionOverride,
) -> Result<PositionOverride, AppError> {
    info!("Setting position override");
    validate_input(input)?;

    if input.is_empty() {
        return Err(AppError::validation(
            "override",
            "An override must set at least one of x_coord, y_coord or direction",
        ));
    }

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

    let layout = resolve_layout(conn, formation_id).await?;
    if layout.get(input.position_index).is_none() {
        return Err(AppError::validation(
            "position_index",
            format!(
                "Index {} is not part of the resolved layout of formation {}",
                input.position_index, formation_id
            ),
        ));
    }

    sqlx::query(
        "INSERT INTO position_overrides (formation_id, position_index, x_coord, y_coord, direction)
         VALUES (?, ?, ?, ?, ?)
         ON CONFLICT (formation_id, position_index) DO UPDATE
         SET x_coord = excluded.x_coord,
             y_coord = excluded.y_coord,
             direction = excluded.direction",
    )
    .bind(formation_id)
    .bind(input.position_index)
    .bind(input.x_coord)
    .bind(input.y_coord)
    .bind(input.direction.map(|d| d.as_str()))
    .execute(&mut *conn)
    .await?;

    let row = sqlx::query_as::<_, DbPositionOverride>(
        "SELECT * FROM position_overrides WHERE formation_id = ? AND position_index = ?",
    )
    .bind(formation_id)
    .bind(input.position_index)
    .fetch_one(&mut *conn)
    .await?;

    PositionOverride::try_from(row)
}

#[instrument(skip(conn))]
pub async fn remove_position_override(
    conn: &mut SqliteConnection,
    formation_id: i64,
    position_index: i64,
) -> Result<(), AppError> {
    info!("Removing position override");
    let result = sqlx::query(
        "DELETE FROM position_overrides WHERE formation_id = ? AND position_index = ?",
    )
    .bind(formation_id)
    .bind(position_index)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(format!(
            "No override for index {} on formation {}",
            position_index, formation_id
        )));
    }

    Ok(())
}
