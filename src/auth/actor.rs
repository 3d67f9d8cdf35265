use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;

use super::{Permission, Role};
use crate::error::AppError;
use crate::models::{Formation, Scope};
use crate::sharing::owner_of;

/// The caller of a service operation, with the organizational units they belong to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: i64,
    pub role: Role,
    pub club_id: Option<i64>,
    pub team_id: Option<i64>,
    pub age_group_id: Option<i64>,
}

/// What a mutation does to a formation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Edit,
    Share,
}

impl Action {
    fn own_permission(&self) -> Permission {
        match self {
            Action::Edit => Permission::EditOwnFormations,
            Action::Share => Permission::ShareOwnFormations,
        }
    }

    fn club_permission(&self) -> Permission {
        match self {
            Action::Edit => Permission::EditClubFormations,
            Action::Share => Permission::ShareClubFormations,
        }
    }
}

impl Actor {
    pub fn new(user_id: i64, role: Role) -> Self {
        Self {
            user_id,
            role,
            club_id: None,
            team_id: None,
            age_group_id: None,
        }
    }

    pub fn in_club(mut self, club_id: i64) -> Self {
        self.club_id = Some(club_id);
        self
    }

    pub fn in_team(mut self, team_id: i64) -> Self {
        self.team_id = Some(team_id);
        self
    }

    pub fn in_age_group(mut self, age_group_id: i64) -> Self {
        self.age_group_id = Some(age_group_id);
        self
    }

    pub fn has_permission(&self, permission: Permission) -> bool {
        self.role.has_permission(permission)
    }

    pub fn require_permission(&self, permission: Permission) -> Result<(), AppError> {
        if self.role.has_permission(permission) {
            Ok(())
        } else {
            tracing::warn!(
                user_id = self.user_id,
                role = %self.role.as_str(),
                permission = ?permission,
                "Permission denied"
            );
            Err(AppError::Authorization(format!(
                "User {} lacks permission {:?}",
                self.user_id, permission
            )))
        }
    }

    fn administers_club(&self, action: Action, scope: &Scope) -> bool {
        self.has_permission(action.club_permission())
            && scope.club_id().is_some()
            && scope.club_id() == self.club_id
    }

    /// Checks that the actor may create a formation in the requested scope.
    pub fn authorize_creation(&self, scope: &Scope, is_system_formation: bool) -> Result<(), AppError> {
        self.require_permission(Permission::CreateFormations)?;

        if is_system_formation || *scope == Scope::Global {
            return self.require_permission(Permission::ManageSystemFormations);
        }
        if self.has_permission(Permission::ManageSystemFormations) {
            return Ok(());
        }

        let allowed = match scope {
            Scope::Global => false,
            Scope::Club(id) => self.club_id == Some(*id),
            Scope::Team(id) => {
                self.team_id == Some(*id) || self.has_permission(Permission::EditClubFormations)
            }
            Scope::AgeGroup(id) => {
                self.age_group_id == Some(*id)
                    || self.has_permission(Permission::EditClubFormations)
            }
        };

        if allowed {
            Ok(())
        } else {
            tracing::warn!(user_id = self.user_id, scope = ?scope, "Scope denied");
            Err(AppError::Authorization(format!(
                "User {} cannot create formations in scope {:?}",
                self.user_id, scope
            )))
        }
    }
}

/// Owner (or creator while nobody owns it), a club admin of the formation's
/// club scope, or a system administrator.
pub async fn authorize_mutation(
    conn: &mut SqliteConnection,
    actor: &Actor,
    formation: &Formation,
    action: Action,
) -> Result<(), AppError> {
    if formation.is_system_formation || formation.scope == Scope::Global {
        return actor.require_permission(Permission::ManageSystemFormations);
    }
    if actor.has_permission(Permission::ManageSystemFormations) {
        return Ok(());
    }
    if actor.administers_club(action, &formation.scope) {
        return Ok(());
    }

    let owner = owner_of(conn, formation.id).await?.or(formation.created_by);
    if owner == Some(actor.user_id) {
        return actor.require_permission(action.own_permission());
    }

    tracing::warn!(
        user_id = actor.user_id,
        formation_id = formation.id,
        action = ?action,
        "Mutation denied"
    );
    Err(AppError::Authorization(format!(
        "User {} may not {:?} formation {}",
        actor.user_id, action, formation.id
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coach_cannot_create_global_formations() {
        let coach = Actor::new(1, Role::Coach).in_club(3);
        assert!(matches!(
            coach.authorize_creation(&Scope::Global, false),
            Err(AppError::Authorization(_))
        ));
        assert!(coach.authorize_creation(&Scope::Club(3), false).is_ok());
        assert!(coach.authorize_creation(&Scope::Club(4), false).is_err());
    }

    #[test]
    fn test_system_admin_creates_anywhere() {
        let admin = Actor::new(1, Role::SystemAdmin);
        assert!(admin.authorize_creation(&Scope::Global, true).is_ok());
        assert!(admin.authorize_creation(&Scope::Team(9), false).is_ok());
    }

    #[test]
    fn test_club_admin_creates_for_teams() {
        let admin = Actor::new(1, Role::ClubAdmin).in_club(2);
        assert!(admin.authorize_creation(&Scope::Team(9), false).is_ok());
        assert!(admin.authorize_creation(&Scope::Club(5), false).is_err());
    }
}
