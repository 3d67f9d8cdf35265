//! Sharing registry
//!
//! Four independent grant tables (clubs, teams, age groups, users). Exactly one
//! user row per formation carries `is_owner` whenever any user row exists; every
//! write that touches ownership runs as a single read-modify-write transaction.

use chrono::Utc;
use sqlx::{Connection, SqliteConnection};
use tracing::{info, instrument, warn};

use crate::auth::Actor;
use crate::db::get_formation;
use crate::error::AppError;
use crate::models::{
    DbFormation, DbTargetShare, DbUserShare, Formation, FormationShares, ShareTarget,
    SharingStatus, TargetShare, UserShare,
};

/// `?1` club, `?2` team, `?3` age group, `?4` user.
const VISIBILITY_PREDICATE: &str = "(
    f.scope_type = 'global'
    OR f.scope_club_id = ?1
    OR f.scope_team_id = ?2
    OR f.scope_age_group_id = ?3
    OR f.created_by = ?4
    OR EXISTS (SELECT 1 FROM formation_clubs s WHERE s.formation_id = f.id AND s.club_id = ?1)
    OR EXISTS (SELECT 1 FROM formation_teams s WHERE s.formation_id = f.id AND s.team_id = ?2)
    OR EXISTS (SELECT 1 FROM formation_age_groups s WHERE s.formation_id = f.id AND s.age_group_id = ?3)
    OR EXISTS (SELECT 1 FROM formation_users s WHERE s.formation_id = f.id AND s.user_id = ?4)
)";

fn target_table(target: &ShareTarget) -> (&'static str, &'static str) {
    match target {
        ShareTarget::Club(_) => ("formation_clubs", "club_id"),
        ShareTarget::Team(_) => ("formation_teams", "team_id"),
        ShareTarget::AgeGroup(_) => ("formation_age_groups", "age_group_id"),
        ShareTarget::User(_) => ("formation_users", "user_id"),
    }
}

async fn find_user_share(
    conn: &mut SqliteConnection,
    formation_id: i64,
    user_id: i64,
) -> Result<Option<UserShare>, AppError> {
    let row = sqlx::query_as::<_, DbUserShare>(
        "SELECT * FROM formation_users WHERE formation_id = ? AND user_id = ?",
    )
    .bind(formation_id)
    .bind(user_id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(row.map(UserShare::from))
}

async fn clear_owner(conn: &mut SqliteConnection, formation_id: i64) -> Result<u64, AppError> {
    let result = sqlx::query(
        "UPDATE formation_users SET is_owner = FALSE WHERE formation_id = ? AND is_owner IS 1",
    )
    .bind(formation_id)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected())
}

#[instrument(skip(conn))]
pub async fn list_user_shares(
    conn: &mut SqliteConnection,
    formation_id: i64,
) -> Result<Vec<UserShare>, AppError> {
    let rows = sqlx::query_as::<_, DbUserShare>(
        "SELECT * FROM formation_users WHERE formation_id = ? ORDER BY user_id",
    )
    .bind(formation_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows.into_iter().map(UserShare::from).collect())
}

#[instrument(skip(conn))]
pub async fn owner_of(
    conn: &mut SqliteConnection,
    formation_id: i64,
) -> Result<Option<i64>, AppError> {
    let owners = sqlx::query_scalar::<_, i64>(
        "SELECT user_id FROM formation_users WHERE formation_id = ? AND is_owner IS 1",
    )
    .bind(formation_id)
    .fetch_all(&mut *conn)
    .await?;

    if owners.len() > 1 {
        return Err(AppError::Internal(format!(
            "Formation {} has {} owners",
            formation_id,
            owners.len()
        )));
    }

    Ok(owners.into_iter().next())
}

/// Grants a user access. With `is_owner` the previous owner is demoted in the
/// same transaction.
#[instrument(skip(conn))]
pub async fn share_with_user(
    conn: &mut SqliteConnection,
    formation_id: i64,
    user_id: i64,
    is_owner: bool,
) -> Result<UserShare, AppError> {
    info!("Sharing formation with user");
    let mut tx = conn.begin().await?;

    get_formation(&mut tx, formation_id).await?;

    if find_user_share(&mut tx, formation_id, user_id).await?.is_some() {
        return Err(AppError::Conflict(format!(
            "User {} already has a share on formation {}; transfer ownership instead",
            user_id, formation_id
        )));
    }

    if is_owner {
        let demoted = clear_owner(&mut tx, formation_id).await?;
        if demoted > 0 {
            info!(demoted, "Previous owner demoted");
        }
    } else if owner_of(&mut tx, formation_id).await?.is_none() {
        return Err(AppError::OwnerRequired(format!(
            "Formation {} has no owner yet; the first user share must be the owner",
            formation_id
        )));
    }

    sqlx::query(
        "INSERT INTO formation_users (formation_id, user_id, is_owner, shared_at) VALUES (?, ?, ?, ?)",
    )
    .bind(formation_id)
    .bind(user_id)
    .bind(is_owner)
    .bind(Utc::now().naive_utc())
    .execute(&mut *tx)
    .await?;

    let share = find_user_share(&mut tx, formation_id, user_id)
        .await?
        .ok_or_else(|| AppError::Internal("User share vanished after insert".to_string()))?;

    tx.commit().await?;
    Ok(share)
}

/// Makes `user_id` the single owner, adding a share row if the user has none.
/// The previous owner keeps a non-owner share.
#[instrument(skip(conn))]
pub async fn transfer_ownership(
    conn: &mut SqliteConnection,
    formation_id: i64,
    user_id: i64,
) -> Result<UserShare, AppError> {
    info!("Transferring formation ownership");
    let mut tx = conn.begin().await?;

    get_formation(&mut tx, formation_id).await?;
    clear_owner(&mut tx, formation_id).await?;

    match find_user_share(&mut tx, formation_id, user_id).await? {
        Some(_) => {
            sqlx::query(
                "UPDATE formation_users SET is_owner = TRUE WHERE formation_id = ? AND user_id = ?",
            )
            .bind(formation_id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        }
        None => {
            sqlx::query(
                "INSERT INTO formation_users (formation_id, user_id, is_owner, shared_at) VALUES (?, ?, TRUE, ?)",
            )
            .bind(formation_id)
            .bind(user_id)
            .bind(Utc::now().naive_utc())
            .execute(&mut *tx)
            .await?;
        }
    }

    let share = find_user_share(&mut tx, formation_id, user_id)
        .await?
        .ok_or_else(|| AppError::Internal("Owner share vanished after update".to_string()))?;

    tx.commit().await?;
    Ok(share)
}

/// Grants a club, team or age group access. Returns false when the grant
/// already existed; in strict mode that is a conflict instead.
#[instrument(skip(conn))]
pub async fn share_with_target(
    conn: &mut SqliteConnection,
    formation_id: i64,
    target: ShareTarget,
    strict: bool,
) -> Result<bool, AppError> {
    info!("Sharing formation with target");
    if let ShareTarget::User(_) = target {
        return Err(AppError::Internal(
            "User shares go through share_with_user".to_string(),
        ));
    }

    let mut tx = conn.begin().await?;
    get_formation(&mut tx, formation_id).await?;

    let (table, column) = target_table(&target);
    let sql = format!(
        "INSERT INTO {} (formation_id, {}, shared_at) VALUES (?, ?, ?) ON CONFLICT DO NOTHING",
        table, column
    );
    let result = sqlx::query(&sql)
        .bind(formation_id)
        .bind(target.target_id())
        .bind(Utc::now().naive_utc())
        .execute(&mut *tx)
        .await?;

    let inserted = result.rows_affected() > 0;
    if !inserted && strict {
        return Err(AppError::Conflict(format!(
            "Formation {} is already shared with {:?}",
            formation_id, target
        )));
    }

    tx.commit().await?;
    Ok(inserted)
}

pub async fn share_with_club(
    conn: &mut SqliteConnection,
    formation_id: i64,
    club_id: i64,
    strict: bool,
) -> Result<bool, AppError> {
    share_with_target(conn, formation_id, ShareTarget::Club(club_id), strict).await
}

pub async fn share_with_team(
    conn: &mut SqliteConnection,
    formation_id: i64,
    team_id: i64,
    strict: bool,
) -> Result<bool, AppError> {
    share_with_target(conn, formation_id, ShareTarget::Team(team_id), strict).await
}

pub async fn share_with_age_group(
    conn: &mut SqliteConnection,
    formation_id: i64,
    age_group_id: i64,
    strict: bool,
) -> Result<bool, AppError> {
    share_with_target(conn, formation_id, ShareTarget::AgeGroup(age_group_id), strict).await
}

/// Removes one grant. Removing the owner fails while other user shares remain.
#[instrument(skip(conn))]
pub async fn unshare(
    conn: &mut SqliteConnection,
    formation_id: i64,
    target: ShareTarget,
) -> Result<(), AppError> {
    info!("Removing formation share");
    let mut tx = conn.begin().await?;
    get_formation(&mut tx, formation_id).await?;

    if let ShareTarget::User(user_id) = target {
        let share = find_user_share(&mut tx, formation_id, user_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "Formation {} is not shared with user {}",
                    formation_id, user_id
                ))
            })?;

        if share.is_owner {
            let others = sqlx::query_scalar::<_, i64>(
                "SELECT COUNT(*) FROM formation_users WHERE formation_id = ? AND user_id != ?",
            )
            .bind(formation_id)
            .bind(user_id)
            .fetch_one(&mut *tx)
            .await?;

            if others > 0 {
                warn!(others, "Refusing to remove owner while user shares remain");
                return Err(AppError::OwnerRequired(format!(
                    "User {} owns formation {} and {} other user share(s) remain; transfer ownership first",
                    user_id, formation_id, others
                )));
            }
        }
    }

    let (table, column) = target_table(&target);
    let sql = format!("DELETE FROM {} WHERE formation_id = ? AND {} = ?", table, column);
    let result = sqlx::query(&sql)
        .bind(formation_id)
        .bind(target.target_id())
        .execute(&mut *tx)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(format!(
            "Formation {} is not shared with {:?}",
            formation_id, target
        )));
    }

    tx.commit().await?;
    Ok(())
}

async fn list_target_shares(
    conn: &mut SqliteConnection,
    formation_id: i64,
    target: ShareTarget,
) -> Result<Vec<TargetShare>, AppError> {
    let (table, column) = target_table(&target);
    let sql = format!(
        "SELECT formation_id, {column} AS target_id, shared_at FROM {table}
         WHERE formation_id = ? ORDER BY {column}"
    );
    let rows = sqlx::query_as::<_, DbTargetShare>(&sql)
        .bind(formation_id)
        .fetch_all(&mut *conn)
        .await?;

    Ok(rows.into_iter().map(TargetShare::from).collect())
}

#[instrument(skip(conn))]
pub async fn list_shares(
    conn: &mut SqliteConnection,
    formation_id: i64,
) -> Result<FormationShares, AppError> {
    Ok(FormationShares {
        clubs: list_target_shares(conn, formation_id, ShareTarget::Club(0)).await?,
        teams: list_target_shares(conn, formation_id, ShareTarget::Team(0)).await?,
        age_groups: list_target_shares(conn, formation_id, ShareTarget::AgeGroup(0)).await?,
        users: list_user_shares(conn, formation_id).await?,
    })
}

#[instrument(skip(conn))]
pub async fn sharing_status(
    conn: &mut SqliteConnection,
    formation_id: i64,
) -> Result<SharingStatus, AppError> {
    let shares = list_shares(conn, formation_id).await?;
    if shares.is_empty() {
        Ok(SharingStatus::Private)
    } else {
        Ok(SharingStatus::Shared)
    }
}

#[instrument(skip(conn, actor), fields(user_id = actor.user_id))]
pub async fn is_visible_to(
    conn: &mut SqliteConnection,
    formation_id: i64,
    actor: &Actor,
) -> Result<bool, AppError> {
    let sql = format!(
        "SELECT COUNT(*) FROM formations f WHERE f.id = ?5 AND {}",
        VISIBILITY_PREDICATE
    );
    let count = sqlx::query_scalar::<_, i64>(&sql)
        .bind(actor.club_id)
        .bind(actor.team_id)
        .bind(actor.age_group_id)
        .bind(actor.user_id)
        .bind(formation_id)
        .fetch_one(&mut *conn)
        .await?;

    Ok(count > 0)
}

/// Formations owned by the actor's scope, shared with it, global, or created by the actor.
#[instrument(skip(conn, actor), fields(user_id = actor.user_id))]
pub async fn list_visible_to(
    conn: &mut SqliteConnection,
    actor: &Actor,
    include_archived: bool,
) -> Result<Vec<Formation>, AppError> {
    info!("Listing formations visible to actor");
    let archived_clause = if include_archived {
        ""
    } else {
        " AND f.archived IS 0"
    };
    let sql = format!(
        "SELECT f.* FROM formations f WHERE {}{} ORDER BY f.name, f.id",
        VISIBILITY_PREDICATE, archived_clause
    );

    let rows = sqlx::query_as::<_, DbFormation>(&sql)
        .bind(actor.club_id)
        .bind(actor.team_id)
        .bind(actor.age_group_id)
        .bind(actor.user_id)
        .fetch_all(&mut *conn)
        .await?;

    rows.into_iter().map(Formation::try_from).collect()
}
