#[cfg(test)]
pub mod test_db {
    use crate::catalog::{Direction, PositionCode, default_layout};
    use crate::database::init_schema;
    use crate::db::{DEFAULT_MAX_CHAIN_DEPTH, create_formation};
    use crate::env::ServiceConfig;
    use crate::error::AppError;
    use crate::models::{NewFormation, NewPosition, Scope, ShareTarget};
    use crate::service::FormationService;
    use crate::sharing::{share_with_target, share_with_user};
    use sqlx::pool::PoolConnection;
    use sqlx::sqlite::SqlitePoolOptions;
    use sqlx::{Pool, Sqlite};
    use std::collections::HashMap;
    use std::sync::Once;
    use tracing::log::LevelFilter;

    static INIT: Once = Once::new();

    #[derive(Default)]
    pub struct TestDbBuilder {
        formations: Vec<TestFormation>,
        user_shares: Vec<TestUserShare>,
        target_shares: Vec<(String, ShareTarget)>,
    }

    pub struct TestFormation {
        pub name: String,
        pub squad_size: i64,
        pub scope: Scope,
        pub created_by: Option<i64>,
        pub parent_formation: Option<String>,
        pub parent_tactic: Option<String>,
        pub positions: Vec<NewPosition>,
    }

    pub struct TestUserShare {
        pub formation_name: String,
        pub user_id: i64,
        pub is_owner: bool,
    }

    pub fn position(index: i64, code: PositionCode, x: f64, y: f64) -> NewPosition {
        NewPosition {
            position_index: index,
            position: code,
            x_coord: x,
            y_coord: y,
            direction: Some(Direction::N),
        }
    }

    /// The catalog 4-3-3 as declared positions.
    pub fn four_three_three() -> Vec<NewPosition> {
        default_layout(11)
            .unwrap_or_default()
            .iter()
            .enumerate()
            .map(|(i, slot)| NewPosition::from_slot(i as i64, slot))
            .collect()
    }

    impl TestDbBuilder {
        pub fn new() -> Self {
            Self::default()
        }

        /// Root formation declaring `positions`; an empty list takes the catalog default.
        pub fn formation(
            mut self,
            name: &str,
            squad_size: i64,
            scope: Scope,
            created_by: Option<i64>,
            positions: Vec<NewPosition>,
        ) -> Self {
            self.formations.push(TestFormation {
                name: name.to_string(),
                squad_size,
                scope,
                created_by,
                parent_formation: None,
                parent_tactic: None,
                positions,
            });
            self
        }

        pub fn derived(mut self, name: &str, parent: &str, positions: Vec<NewPosition>) -> Self {
            let template = self.template_of(parent);
            self.formations.push(TestFormation {
                name: name.to_string(),
                parent_formation: Some(parent.to_string()),
                positions,
                ..template
            });
            self
        }

        pub fn tactic(mut self, name: &str, parent: &str, positions: Vec<NewPosition>) -> Self {
            let template = self.template_of(parent);
            self.formations.push(TestFormation {
                name: name.to_string(),
                parent_tactic: Some(parent.to_string()),
                positions,
                ..template
            });
            self
        }

        fn template_of(&self, parent: &str) -> TestFormation {
            let parent = self
                .formations
                .iter()
                .find(|f| f.name == parent)
                .unwrap_or_else(|| panic!("Parent {} must be declared first", parent));
            TestFormation {
                name: String::new(),
                squad_size: parent.squad_size,
                scope: parent.scope,
                created_by: parent.created_by,
                parent_formation: None,
                parent_tactic: None,
                positions: Vec::new(),
            }
        }

        pub fn owner(mut self, formation_name: &str, user_id: i64) -> Self {
            self.user_shares.push(TestUserShare {
                formation_name: formation_name.to_string(),
                user_id,
                is_owner: true,
            });
            self
        }

        pub fn user_share(mut self, formation_name: &str, user_id: i64) -> Self {
            self.user_shares.push(TestUserShare {
                formation_name: formation_name.to_string(),
                user_id,
                is_owner: false,
            });
            self
        }

        pub fn shared_with(mut self, formation_name: &str, target: ShareTarget) -> Self {
            self.target_shares
                .push((formation_name.to_string(), target));
            self
        }

        pub async fn build(self) -> Result<TestDb, AppError> {
            INIT.call_once(|| {
                let _ = env_logger::builder()
                    .filter_level(LevelFilter::Debug)
                    .is_test(true)
                    .try_init();
            });

            // One connection that never recycles keeps the in-memory database alive.
            let pool = SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect("sqlite::memory:")
                .await?;
            init_schema(&pool).await?;

            let mut conn = pool.acquire().await?;
            let mut formation_ids: HashMap<String, i64> = HashMap::new();

            for formation in &self.formations {
                let mut new = NewFormation::new(
                    &formation.name,
                    "test",
                    formation.squad_size,
                    formation.scope,
                )
                .with_positions(formation.positions.clone());
                new.created_by = formation.created_by;
                new.parent_formation_id = formation
                    .parent_formation
                    .as_ref()
                    .and_then(|p| formation_ids.get(p).copied());
                new.parent_tactic_id = formation
                    .parent_tactic
                    .as_ref()
                    .and_then(|p| formation_ids.get(p).copied());

                let created = create_formation(&mut conn, &new, DEFAULT_MAX_CHAIN_DEPTH).await?;
                formation_ids.insert(formation.name.clone(), created.id);
            }

            for share in &self.user_shares {
                let id = formation_ids[&share.formation_name];
                share_with_user(&mut conn, id, share.user_id, share.is_owner).await?;
            }

            for (name, target) in &self.target_shares {
                share_with_target(&mut conn, formation_ids[name], *target, false).await?;
            }

            drop(conn);

            Ok(TestDb {
                pool,
                formation_ids,
            })
        }
    }

    pub struct TestDb {
        pub pool: Pool<Sqlite>,
        pub formation_ids: HashMap<String, i64>,
    }

    impl TestDb {
        pub fn id(&self, name: &str) -> i64 {
            *self
                .formation_ids
                .get(name)
                .unwrap_or_else(|| panic!("No test formation named {}", name))
        }

        pub async fn conn(&self) -> PoolConnection<Sqlite> {
            self.pool
                .acquire()
                .await
                .expect("Failed to acquire test connection")
        }

        pub fn service(&self) -> FormationService {
            self.service_with(ServiceConfig::default())
        }

        pub fn service_with(&self, config: ServiceConfig) -> FormationService {
            FormationService::new(self.pool.clone(), config)
        }
    }
}
