//! The narrow interface the surrounding application calls.
//!
//! Every mutation takes the formation's lock, runs in one transaction and
//! authorizes inside that transaction. Reads take no locks.

use std::future::Future;
use std::time::Duration;

use sqlx::{Pool, Sqlite, SqliteConnection};
use tracing::{info, instrument};

use crate::auth::{Action, Actor, Permission, authorize_mutation};
use crate::db;
use crate::env::ServiceConfig;
use crate::error::AppError;
use crate::locks::FormationLocks;
use crate::models::{
    Formation, FormationPatch, FormationShares, FormationWithAncestry, NewFormation,
    NewPositionOverride, NewPrinciple, PositionOverride, ResolvedLayout, ShareRequest,
    ShareTarget, TacticPrinciple, UserShare,
};
use crate::{overrides, resolver, sharing, tactics};

#[derive(Clone)]
pub struct FormationService {
    pool: Pool<Sqlite>,
    locks: FormationLocks,
    config: ServiceConfig,
}

impl FormationService {
    pub fn new(pool: Pool<Sqlite>, config: ServiceConfig) -> Self {
        Self {
            pool,
            locks: FormationLocks::new(),
            config,
        }
    }

    /// A handle sharing pool and locks whose mutations abort after `deadline`.
    pub fn with_deadline(&self, deadline: Duration) -> Self {
        let mut service = self.clone();
        service.config.write_deadline = Some(deadline);
        service
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub fn locks(&self) -> &FormationLocks {
        &self.locks
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Dropping the future on expiry drops its transaction uncommitted.
    async fn within_deadline<T, F>(&self, operation: F) -> Result<T, AppError>
    where
        F: Future<Output = Result<T, AppError>>,
    {
        match self.config.write_deadline {
            Some(deadline) => tokio::time::timeout(deadline, operation)
                .await
                .map_err(|_| AppError::DeadlineExceeded(deadline))?,
            None => operation.await,
        }
    }

    async fn require_visible(
        conn: &mut SqliteConnection,
        actor: &Actor,
        formation_id: i64,
    ) -> Result<Formation, AppError> {
        actor.require_permission(Permission::ViewFormations)?;
        let formation = db::get_formation(conn, formation_id).await?;

        if !sharing::is_visible_to(conn, formation_id, actor).await? {
            tracing::warn!(
                user_id = actor.user_id,
                formation_id,
                "Formation not visible to actor"
            );
            return Err(AppError::Authorization(format!(
                "Formation {} is not visible to user {}",
                formation_id, actor.user_id
            )));
        }

        Ok(formation)
    }

    #[instrument(skip(self, actor), fields(user_id = actor.user_id))]
    pub async fn get_formation(&self, actor: &Actor, id: i64) -> Result<Formation, AppError> {
        let mut conn = self.pool.acquire().await?;
        Self::require_visible(&mut conn, actor, id)
            .await
            .inspect_err(|e| e.log_and_record("get_formation"))
    }

    #[instrument(skip(self, actor), fields(user_id = actor.user_id))]
    pub async fn get_with_ancestry(
        &self,
        actor: &Actor,
        id: i64,
    ) -> Result<FormationWithAncestry, AppError> {
        let result = async {
            let mut tx = self.pool.begin().await?;
            Self::require_visible(&mut tx, actor, id).await?;
            let lineage = db::get_with_ancestry(&mut tx, id).await?;
            tx.commit().await?;
            Ok::<_, AppError>(lineage)
        }
        .await;

        result.inspect_err(|e| e.log_and_record("get_with_ancestry"))
    }

    /// Effective layout of a formation as seen by `actor`.
    ///
    /// All reads share one transaction so a concurrent commit cannot mix two
    /// stored states into one layout.
    #[instrument(skip(self, actor), fields(user_id = actor.user_id))]
    pub async fn resolve_layout(&self, actor: &Actor, id: i64) -> Result<ResolvedLayout, AppError> {
        info!("Resolving layout for actor");
        let result = async {
            let mut tx = self.pool.begin().await?;
            Self::require_visible(&mut tx, actor, id).await?;
            let layout = resolver::resolve_layout(&mut tx, id).await?;
            tx.commit().await?;
            Ok::<_, AppError>(layout)
        }
        .await;

        result.inspect_err(|e| e.log_and_record("resolve_layout"))
    }

    #[instrument(skip(self, actor), fields(user_id = actor.user_id))]
    pub async fn list_visible_formations(
        &self,
        actor: &Actor,
        include_archived: bool,
    ) -> Result<Vec<Formation>, AppError> {
        let result = async {
            actor.require_permission(Permission::ViewFormations)?;
            let mut conn = self.pool.acquire().await?;
            sharing::list_visible_to(&mut conn, actor, include_archived).await
        }
        .await;

        result.inspect_err(|e| e.log_and_record("list_visible_formations"))
    }

    #[instrument(skip(self, actor), fields(user_id = actor.user_id))]
    pub async fn list_shares(&self, actor: &Actor, id: i64) -> Result<FormationShares, AppError> {
        let result = async {
            let mut conn = self.pool.acquire().await?;
            Self::require_visible(&mut conn, actor, id).await?;
            sharing::list_shares(&mut conn, id).await
        }
        .await;

        result.inspect_err(|e| e.log_and_record("list_shares"))
    }

    #[instrument(skip(self, actor), fields(user_id = actor.user_id))]
    pub async fn list_principles(
        &self,
        actor: &Actor,
        id: i64,
    ) -> Result<Vec<TacticPrinciple>, AppError> {
        let result = async {
            let mut conn = self.pool.acquire().await?;
            Self::require_visible(&mut conn, actor, id).await?;
            tactics::list_principles(&mut conn, id).await
        }
        .await;

        result.inspect_err(|e| e.log_and_record("list_principles"))
    }

    async fn authorize_new(
        conn: &mut SqliteConnection,
        actor: &Actor,
        new: &NewFormation,
    ) -> Result<NewFormation, AppError> {
        actor.authorize_creation(&new.scope, new.is_system_formation)?;

        for parent_id in [new.parent_formation_id, new.parent_tactic_id]
            .into_iter()
            .flatten()
        {
            if db::find_formation(conn, parent_id).await?.is_some() {
                Self::require_visible(conn, actor, parent_id).await?;
            }
        }

        let mut owned = new.clone();
        owned.created_by = Some(actor.user_id);
        Ok(owned)
    }

    /// Creates a formation owned by `actor`.
    #[instrument(skip(self, actor, new), fields(user_id = actor.user_id, name = %new.name))]
    pub async fn create_formation(
        &self,
        actor: &Actor,
        new: NewFormation,
    ) -> Result<Formation, AppError> {
        self.within_deadline(async {
            let mut tx = self.pool.begin().await?;
            let new = Self::authorize_new(&mut tx, actor, &new).await?;
            let formation = db::create_formation(&mut tx, &new, self.config.max_chain_depth).await?;
            tx.commit().await?;
            Ok::<_, AppError>(formation)
        })
        .await
        .inspect_err(|e| e.log_and_record("create_formation"))
    }

    #[instrument(skip(self, actor, new, principles), fields(user_id = actor.user_id, name = %new.name))]
    pub async fn create_tactic(
        &self,
        actor: &Actor,
        new: NewFormation,
        principles: Vec<NewPrinciple>,
    ) -> Result<(Formation, Vec<TacticPrinciple>), AppError> {
        self.within_deadline(async {
            let mut tx = self.pool.begin().await?;
            let new = Self::authorize_new(&mut tx, actor, &new).await?;
            let created =
                tactics::create_tactic(&mut tx, &new, &principles, self.config.max_chain_depth)
                    .await?;
            tx.commit().await?;
            Ok::<_, AppError>(created)
        })
        .await
        .inspect_err(|e| e.log_and_record("create_tactic"))
    }

    #[instrument(skip(self, actor, patch), fields(user_id = actor.user_id))]
    pub async fn update_formation(
        &self,
        actor: &Actor,
        id: i64,
        patch: FormationPatch,
    ) -> Result<Formation, AppError> {
        // A new parent link is checked for cycles against the parent's lineage,
        // so the parent is locked too.
        let mut lock_ids = vec![id];
        lock_ids.extend(
            [patch.parent_formation_id, patch.parent_tactic_id]
                .into_iter()
                .flatten()
                .flatten(),
        );

        self.within_deadline(async {
            let _guards = self.locks.lock_all(lock_ids).await;
            let mut tx = self.pool.begin().await?;

            let formation = db::get_formation(&mut tx, id).await?;
            authorize_mutation(&mut tx, actor, &formation, Action::Edit).await?;
            if let Some(scope) = &patch.scope {
                if *scope != formation.scope {
                    actor.authorize_creation(scope, formation.is_system_formation)?;
                }
            }

            let updated =
                db::update_formation(&mut tx, id, &patch, self.config.max_chain_depth).await?;
            tx.commit().await?;
            Ok::<_, AppError>(updated)
        })
        .await
        .inspect_err(|e| e.log_and_record("update_formation"))
    }

    #[instrument(skip(self, actor), fields(user_id = actor.user_id))]
    async fn set_archived(&self, actor: &Actor, id: i64, archive: bool) -> Result<bool, AppError> {
        self.within_deadline(async {
            let _guard = self.locks.lock(id).await;
            let mut tx = self.pool.begin().await?;

            let formation = db::get_formation(&mut tx, id).await?;
            authorize_mutation(&mut tx, actor, &formation, Action::Edit).await?;

            let archived = db::set_formation_archived(&mut tx, id, archive).await?;
            tx.commit().await?;
            Ok::<_, AppError>(archived)
        })
        .await
    }

    #[instrument(skip(self, actor), fields(user_id = actor.user_id))]
    pub async fn archive_formation(&self, actor: &Actor, id: i64) -> Result<bool, AppError> {
        self.set_archived(actor, id, true)
            .await
            .inspect_err(|e| e.log_and_record("archive_formation"))
    }

    #[instrument(skip(self, actor), fields(user_id = actor.user_id))]
    pub async fn restore_formation(&self, actor: &Actor, id: i64) -> Result<bool, AppError> {
        self.set_archived(actor, id, false)
            .await
            .inspect_err(|e| e.log_and_record("restore_formation"))
    }

    #[instrument(skip(self, actor, input), fields(user_id = actor.user_id))]
    pub async fn set_override(
        &self,
        actor: &Actor,
        id: i64,
        input: NewPositionOverride,
    ) -> Result<PositionOverride, AppError> {
        self.within_deadline(async {
            let _guard = self.locks.lock(id).await;
            let mut tx = self.pool.begin().await?;

            let formation = db::get_formation(&mut tx, id).await?;
            authorize_mutation(&mut tx, actor, &formation, Action::Edit).await?;

            let saved = overrides::set_position_override(&mut tx, id, &input).await?;
            tx.commit().await?;
            Ok::<_, AppError>(saved)
        })
        .await
        .inspect_err(|e| e.log_and_record("set_override"))
    }

    #[instrument(skip(self, actor), fields(user_id = actor.user_id))]
    pub async fn remove_override(
        &self,
        actor: &Actor,
        id: i64,
        position_index: i64,
    ) -> Result<(), AppError> {
        self.within_deadline(async {
            let _guard = self.locks.lock(id).await;
            let mut tx = self.pool.begin().await?;

            let formation = db::get_formation(&mut tx, id).await?;
            authorize_mutation(&mut tx, actor, &formation, Action::Edit).await?;

            overrides::remove_position_override(&mut tx, id, position_index).await?;
            tx.commit().await?;
            Ok::<_, AppError>(())
        })
        .await
        .inspect_err(|e| e.log_and_record("remove_override"))
    }

    #[instrument(skip(self, actor, principle), fields(user_id = actor.user_id))]
    pub async fn add_principle(
        &self,
        actor: &Actor,
        id: i64,
        principle: NewPrinciple,
    ) -> Result<TacticPrinciple, AppError> {
        self.within_deadline(async {
            let _guard = self.locks.lock(id).await;
            let mut tx = self.pool.begin().await?;

            let formation = db::get_formation(&mut tx, id).await?;
            authorize_mutation(&mut tx, actor, &formation, Action::Edit).await?;

            let saved = tactics::add_principle(&mut tx, id, &principle).await?;
            tx.commit().await?;
            Ok::<_, AppError>(saved)
        })
        .await
        .inspect_err(|e| e.log_and_record("add_principle"))
    }

    #[instrument(skip(self, actor), fields(user_id = actor.user_id))]
    pub async fn remove_principle(
        &self,
        actor: &Actor,
        id: i64,
        principle_id: i64,
    ) -> Result<(), AppError> {
        self.within_deadline(async {
            let _guard = self.locks.lock(id).await;
            let mut tx = self.pool.begin().await?;

            let formation = db::get_formation(&mut tx, id).await?;
            authorize_mutation(&mut tx, actor, &formation, Action::Edit).await?;

            tactics::remove_principle(&mut tx, id, principle_id).await?;
            tx.commit().await?;
            Ok::<_, AppError>(())
        })
        .await
        .inspect_err(|e| e.log_and_record("remove_principle"))
    }

    /// Grants a share. Returns false when an existing club, team or age group
    /// grant made this a no-op.
    #[instrument(skip(self, actor), fields(user_id = actor.user_id))]
    pub async fn share_formation(
        &self,
        actor: &Actor,
        id: i64,
        request: ShareRequest,
    ) -> Result<bool, AppError> {
        self.within_deadline(async {
            let _guard = self.locks.lock(id).await;
            let mut tx = self.pool.begin().await?;

            let formation = db::get_formation(&mut tx, id).await?;
            authorize_mutation(&mut tx, actor, &formation, Action::Share).await?;

            let created = match request.target {
                ShareTarget::User(user_id) => {
                    sharing::share_with_user(&mut tx, id, user_id, request.is_owner).await?;
                    true
                }
                target => {
                    sharing::share_with_target(&mut tx, id, target, self.config.strict_sharing)
                        .await?
                }
            };

            tx.commit().await?;
            Ok::<_, AppError>(created)
        })
        .await
        .inspect_err(|e| e.log_and_record("share_formation"))
    }

    #[instrument(skip(self, actor), fields(user_id = actor.user_id))]
    pub async fn transfer_ownership(
        &self,
        actor: &Actor,
        id: i64,
        new_owner: i64,
    ) -> Result<UserShare, AppError> {
        self.within_deadline(async {
            let _guard = self.locks.lock(id).await;
            let mut tx = self.pool.begin().await?;

            let formation = db::get_formation(&mut tx, id).await?;
            authorize_mutation(&mut tx, actor, &formation, Action::Share).await?;

            let share = sharing::transfer_ownership(&mut tx, id, new_owner).await?;
            tx.commit().await?;
            Ok::<_, AppError>(share)
        })
        .await
        .inspect_err(|e| e.log_and_record("transfer_ownership"))
    }

    #[instrument(skip(self, actor), fields(user_id = actor.user_id))]
    pub async fn unshare_formation(
        &self,
        actor: &Actor,
        id: i64,
        target: ShareTarget,
    ) -> Result<(), AppError> {
        self.within_deadline(async {
            let _guard = self.locks.lock(id).await;
            let mut tx = self.pool.begin().await?;

            let formation = db::get_formation(&mut tx, id).await?;
            authorize_mutation(&mut tx, actor, &formation, Action::Share).await?;

            sharing::unshare(&mut tx, id, target).await?;
            tx.commit().await?;
            Ok::<_, AppError>(())
        })
        .await
        .inspect_err(|e| e.log_and_record("unshare_formation"))
    }
}
