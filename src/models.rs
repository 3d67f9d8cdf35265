use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use validator::Validate;

use crate::catalog::{CatalogSlot, Direction, PositionCode};
use crate::error::AppError;

/// Organizational owner of a formation. Exactly one scope id exists per variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum Scope {
    Global,
    Club(i64),
    AgeGroup(i64),
    Team(i64),
}

impl Scope {
    pub fn scope_type(&self) -> &'static str {
        match self {
            Scope::Global => "global",
            Scope::Club(_) => "club",
            Scope::AgeGroup(_) => "age_group",
            Scope::Team(_) => "team",
        }
    }

    pub fn club_id(&self) -> Option<i64> {
        match self {
            Scope::Club(id) => Some(*id),
            _ => None,
        }
    }

    pub fn age_group_id(&self) -> Option<i64> {
        match self {
            Scope::AgeGroup(id) => Some(*id),
            _ => None,
        }
    }

    pub fn team_id(&self) -> Option<i64> {
        match self {
            Scope::Team(id) => Some(*id),
            _ => None,
        }
    }

    pub fn from_columns(
        scope_type: &str,
        club_id: Option<i64>,
        age_group_id: Option<i64>,
        team_id: Option<i64>,
    ) -> Result<Self, AppError> {
        match (scope_type, club_id, age_group_id, team_id) {
            ("global", None, None, None) => Ok(Scope::Global),
            ("club", Some(id), None, None) => Ok(Scope::Club(id)),
            ("age_group", None, Some(id), None) => Ok(Scope::AgeGroup(id)),
            ("team", None, None, Some(id)) => Ok(Scope::Team(id)),
            _ => Err(AppError::Internal(format!(
                "Corrupt scope columns: type={} club={:?} age_group={:?} team={:?}",
                scope_type, club_id, age_group_id, team_id
            ))),
        }
    }
}

fn to_utc(dt: Option<NaiveDateTime>) -> DateTime<Utc> {
    dt.map(|dt| DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc))
        .unwrap_or_else(Utc::now)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Formation {
    pub id: i64,
    pub name: String,
    pub system: String,
    pub squad_size: i64,
    pub is_system_formation: bool,
    pub parent_formation_id: Option<i64>,
    pub parent_tactic_id: Option<i64>,
    pub scope: Scope,
    pub created_by: Option<i64>,
    pub tags: Vec<String>,
    pub archived: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Formation {
    pub fn is_tactic(&self) -> bool {
        self.parent_tactic_id.is_some()
    }

    /// Formation parent first, then tactic parent.
    pub fn parents(&self) -> impl Iterator<Item = i64> + '_ {
        self.parent_formation_id
            .into_iter()
            .chain(self.parent_tactic_id)
    }
}

#[derive(sqlx::FromRow, Clone, Debug)]
pub struct DbFormation {
    pub id: Option<i64>,
    pub name: Option<String>,
    pub system: Option<String>,
    pub squad_size: Option<i64>,
    pub is_system_formation: Option<bool>,
    pub parent_formation_id: Option<i64>,
    pub parent_tactic_id: Option<i64>,
    pub scope_type: Option<String>,
    pub scope_club_id: Option<i64>,
    pub scope_age_group_id: Option<i64>,
    pub scope_team_id: Option<i64>,
    pub created_by: Option<i64>,
    pub tags: Option<String>,
    pub archived: Option<bool>,
    pub created_at: Option<NaiveDateTime>,
    pub updated_at: Option<NaiveDateTime>,
}

impl TryFrom<DbFormation> for Formation {
    type Error = AppError;

    fn try_from(db: DbFormation) -> Result<Self, Self::Error> {
        let scope = Scope::from_columns(
            db.scope_type.as_deref().unwrap_or_default(),
            db.scope_club_id,
            db.scope_age_group_id,
            db.scope_team_id,
        )?;
        let tags = match db.tags.as_deref() {
            Some(raw) if !raw.is_empty() => serde_json::from_str(raw)?,
            _ => Vec::new(),
        };

        Ok(Self {
            id: db.id.unwrap_or_default(),
            name: db.name.unwrap_or_default(),
            system: db.system.unwrap_or_default(),
            squad_size: db.squad_size.unwrap_or_default(),
            is_system_formation: db.is_system_formation.unwrap_or_default(),
            parent_formation_id: db.parent_formation_id,
            parent_tactic_id: db.parent_tactic_id,
            scope,
            created_by: db.created_by,
            tags,
            archived: db.archived.unwrap_or_default(),
            created_at: to_utc(db.created_at),
            updated_at: to_utc(db.updated_at),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormationPosition {
    pub id: i64,
    pub formation_id: i64,
    pub position_index: i64,
    pub position: PositionCode,
    pub x_coord: f64,
    pub y_coord: f64,
    pub direction: Option<Direction>,
}

#[derive(sqlx::FromRow, Clone, Debug)]
pub struct DbFormationPosition {
    pub id: Option<i64>,
    pub formation_id: Option<i64>,
    pub position_index: Option<i64>,
    pub position: Option<String>,
    pub x_coord: Option<f64>,
    pub y_coord: Option<f64>,
    pub direction: Option<String>,
}

impl TryFrom<DbFormationPosition> for FormationPosition {
    type Error = AppError;

    fn try_from(db: DbFormationPosition) -> Result<Self, Self::Error> {
        let position = db
            .position
            .unwrap_or_default()
            .parse::<PositionCode>()
            .map_err(|_| {
            AppError::Internal(format!("Stored position {:?} has an unknown code", db.id))
        })?;
        let direction = db
            .direction
            .as_deref()
            .map(str::parse::<Direction>)
            .transpose()
            .map_err(|_| {
                AppError::Internal(format!("Stored position {:?} has an unknown direction", db.id))
            })?;

        Ok(Self {
            id: db.id.unwrap_or_default(),
            formation_id: db.formation_id.unwrap_or_default(),
            position_index: db.position_index.unwrap_or_default(),
            position,
            x_coord: db.x_coord.unwrap_or_default(),
            y_coord: db.y_coord.unwrap_or_default(),
            direction,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct NewPosition {
    #[validate(range(min = 0, message = "Position index must not be negative"))]
    pub position_index: i64,
    pub position: PositionCode,
    #[validate(range(min = 0.0, max = 100.0, message = "X coordinate must be within 0-100"))]
    pub x_coord: f64,
    #[validate(range(min = 0.0, max = 100.0, message = "Y coordinate must be within 0-100"))]
    pub y_coord: f64,
    pub direction: Option<Direction>,
}

impl NewPosition {
    pub fn from_slot(position_index: i64, slot: &CatalogSlot) -> Self {
        Self {
            position_index,
            position: slot.position,
            x_coord: slot.x,
            y_coord: slot.y,
            direction: Some(slot.direction),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionOverride {
    pub id: i64,
    pub formation_id: i64,
    pub position_index: i64,
    pub x_coord: Option<f64>,
    pub y_coord: Option<f64>,
    pub direction: Option<Direction>,
}

#[derive(sqlx::FromRow, Clone, Debug)]
pub struct DbPositionOverride {
    pub id: Option<i64>,
    pub formation_id: Option<i64>,
    pub position_index: Option<i64>,
    pub x_coord: Option<f64>,
    pub y_coord: Option<f64>,
    pub direction: Option<String>,
}

impl TryFrom<DbPositionOverride> for PositionOverride {
    type Error = AppError;

    fn try_from(db: DbPositionOverride) -> Result<Self, Self::Error> {
        let direction = db
            .direction
            .as_deref()
            .map(str::parse::<Direction>)
            .transpose()
            .map_err(|_| {
                AppError::Internal(format!("Stored override {:?} has an unknown direction", db.id))
            })?;

        Ok(Self {
            id: db.id.unwrap_or_default(),
            formation_id: db.formation_id.unwrap_or_default(),
            position_index: db.position_index.unwrap_or_default(),
            x_coord: db.x_coord,
            y_coord: db.y_coord,
            direction,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
pub struct NewPositionOverride {
    #[validate(range(min = 0, message = "Position index must not be negative"))]
    pub position_index: i64,
    #[validate(range(min = 0.0, max = 100.0, message = "X coordinate must be within 0-100"))]
    pub x_coord: Option<f64>,
    #[validate(range(min = 0.0, max = 100.0, message = "Y coordinate must be within 0-100"))]
    pub y_coord: Option<f64>,
    pub direction: Option<Direction>,
}

impl NewPositionOverride {
    pub fn is_empty(&self) -> bool {
        self.x_coord.is_none() && self.y_coord.is_none() && self.direction.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TacticPrinciple {
    pub id: i64,
    pub formation_id: i64,
    pub title: String,
    pub description: String,
    pub position_indices: BTreeSet<i64>,
}

#[derive(sqlx::FromRow, Clone, Debug)]
pub struct DbTacticPrinciple {
    pub id: Option<i64>,
    pub formation_id: Option<i64>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub position_indices: Option<String>,
}

impl TryFrom<DbTacticPrinciple> for TacticPrinciple {
    type Error = AppError;

    fn try_from(db: DbTacticPrinciple) -> Result<Self, Self::Error> {
        let position_indices = match db.position_indices.as_deref() {
            Some(raw) if !raw.is_empty() => serde_json::from_str(raw)?,
            _ => BTreeSet::new(),
        };

        Ok(Self {
            id: db.id.unwrap_or_default(),
            formation_id: db.formation_id.unwrap_or_default(),
            title: db.title.unwrap_or_default(),
            description: db.description.unwrap_or_default(),
            position_indices,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct NewPrinciple {
    #[validate(length(min = 1, max = 100, message = "Title must be 1-100 characters"))]
    pub title: String,
    #[validate(length(max = 2000, message = "Description is limited to 2000 characters"))]
    pub description: String,
    pub position_indices: BTreeSet<i64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Validate)]
pub struct NewFormation {
    #[validate(length(min = 1, max = 100, message = "Name must be 1-100 characters"))]
    pub name: String,
    #[validate(length(min = 1, max = 32, message = "System must be 1-32 characters"))]
    pub system: String,
    #[validate(range(min = 1, max = 11, message = "Squad size must be within 1-11"))]
    pub squad_size: i64,
    #[serde(default)]
    pub is_system_formation: bool,
    pub parent_formation_id: Option<i64>,
    pub parent_tactic_id: Option<i64>,
    pub scope: Scope,
    pub created_by: Option<i64>,
    #[serde(default)]
    #[validate(length(max = 20, message = "At most 20 tags"))]
    pub tags: Vec<String>,
    #[serde(default)]
    pub positions: Vec<NewPosition>,
}

impl NewFormation {
    pub fn new(name: &str, system: &str, squad_size: i64, scope: Scope) -> Self {
        Self {
            name: name.to_string(),
            system: system.to_string(),
            squad_size,
            is_system_formation: false,
            parent_formation_id: None,
            parent_tactic_id: None,
            scope,
            created_by: None,
            tags: Vec::new(),
            positions: Vec::new(),
        }
    }

    pub fn created_by(mut self, user_id: i64) -> Self {
        self.created_by = Some(user_id);
        self
    }

    pub fn derived_from(mut self, parent_formation_id: i64) -> Self {
        self.parent_formation_id = Some(parent_formation_id);
        self
    }

    pub fn tactic_of(mut self, parent_tactic_id: i64) -> Self {
        self.parent_tactic_id = Some(parent_tactic_id);
        self
    }

    pub fn with_positions(mut self, positions: Vec<NewPosition>) -> Self {
        self.positions = positions;
        self
    }

    pub fn with_tags(mut self, tags: &[&str]) -> Self {
        self.tags = tags.iter().map(|t| t.to_string()).collect();
        self
    }
}

/// Partial update. `Some(None)` on a parent id clears it.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Validate)]
pub struct FormationPatch {
    #[validate(length(min = 1, max = 100, message = "Name must be 1-100 characters"))]
    pub name: Option<String>,
    #[validate(length(min = 1, max = 32, message = "System must be 1-32 characters"))]
    pub system: Option<String>,
    #[validate(range(min = 1, max = 11, message = "Squad size must be within 1-11"))]
    pub squad_size: Option<i64>,
    pub parent_formation_id: Option<Option<i64>>,
    pub parent_tactic_id: Option<Option<i64>>,
    pub scope: Option<Scope>,
    #[validate(length(max = 20, message = "At most 20 tags"))]
    pub tags: Option<Vec<String>>,
    pub positions: Option<Vec<NewPosition>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormationWithAncestry {
    pub formation: Formation,
    /// Nearest parent first.
    pub ancestors: Vec<Formation>,
}

impl FormationWithAncestry {
    /// Root-most ancestor first, the formation itself last.
    pub fn lineage(&self) -> impl Iterator<Item = &Formation> {
        self.ancestors
            .iter()
            .rev()
            .chain(std::iter::once(&self.formation))
    }

    pub fn contains(&self, formation_id: i64) -> bool {
        self.lineage().any(|f| f.id == formation_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedPosition {
    pub position_index: i64,
    pub position: PositionCode,
    pub x_coord: f64,
    pub y_coord: f64,
    pub direction: Option<Direction>,
    /// Formation whose declaration won for this index.
    pub declared_by: i64,
    pub overridden: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedLayout {
    pub formation_id: i64,
    pub squad_size: i64,
    /// Sorted by position index.
    pub positions: Vec<ResolvedPosition>,
}

impl ResolvedLayout {
    pub fn indices(&self) -> BTreeSet<i64> {
        self.positions.iter().map(|p| p.position_index).collect()
    }

    pub fn get(&self, position_index: i64) -> Option<&ResolvedPosition> {
        self.positions
            .iter()
            .find(|p| p.position_index == position_index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum ShareTarget {
    Club(i64),
    Team(i64),
    AgeGroup(i64),
    User(i64),
}

impl ShareTarget {
    pub fn target_id(&self) -> i64 {
        match self {
            ShareTarget::Club(id)
            | ShareTarget::Team(id)
            | ShareTarget::AgeGroup(id)
            | ShareTarget::User(id) => *id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SharingStatus {
    Private,
    Shared,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetShare {
    pub formation_id: i64,
    pub target_id: i64,
    pub shared_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserShare {
    pub formation_id: i64,
    pub user_id: i64,
    pub is_owner: bool,
    pub shared_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Clone, Debug)]
pub struct DbTargetShare {
    pub formation_id: Option<i64>,
    pub target_id: Option<i64>,
    pub shared_at: Option<NaiveDateTime>,
}

impl From<DbTargetShare> for TargetShare {
    fn from(db: DbTargetShare) -> Self {
        Self {
            formation_id: db.formation_id.unwrap_or_default(),
            target_id: db.target_id.unwrap_or_default(),
            shared_at: to_utc(db.shared_at),
        }
    }
}

#[derive(sqlx::FromRow, Clone, Debug)]
pub struct DbUserShare {
    pub formation_id: Option<i64>,
    pub user_id: Option<i64>,
    pub is_owner: Option<bool>,
    pub shared_at: Option<NaiveDateTime>,
}

impl From<DbUserShare> for UserShare {
    fn from(db: DbUserShare) -> Self {
        Self {
            formation_id: db.formation_id.unwrap_or_default(),
            user_id: db.user_id.unwrap_or_default(),
            is_owner: db.is_owner.unwrap_or_default(),
            shared_at: to_utc(db.shared_at),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FormationShares {
    pub clubs: Vec<TargetShare>,
    pub teams: Vec<TargetShare>,
    pub age_groups: Vec<TargetShare>,
    pub users: Vec<UserShare>,
}

impl FormationShares {
    pub fn is_empty(&self) -> bool {
        self.clubs.is_empty()
            && self.teams.is_empty()
            && self.age_groups.is_empty()
            && self.users.is_empty()
    }

    pub fn owner(&self) -> Option<i64> {
        self.users.iter().find(|u| u.is_owner).map(|u| u.user_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareRequest {
    pub target: ShareTarget,
    /// Only meaningful for user targets.
    #[serde(default)]
    pub is_owner: bool,
}

impl ShareRequest {
    pub fn new(target: ShareTarget) -> Self {
        Self {
            target,
            is_owner: false,
        }
    }

    pub fn owner(user_id: i64) -> Self {
        Self {
            target: ShareTarget::User(user_id),
            is_owner: true,
        }
    }
}
