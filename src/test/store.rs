#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use crate::catalog::PositionCode;
    use crate::db::{
        DEFAULT_MAX_CHAIN_DEPTH, create_formation, get_declared_positions, get_formation,
        get_with_ancestry, linearize, list_children, list_formations, seed_system_formations,
        set_formation_archived, update_formation,
    };
    use crate::error::AppError;
    use crate::models::{Formation, FormationPatch, NewFormation, NewPositionOverride, Scope};
    use crate::overrides::set_position_override;
    use crate::resolver::resolve_layout;
    use crate::test::utils::test_db::{TestDbBuilder, four_three_three, position};

    fn expect_validation(result: Result<Formation, AppError>, field: &str) {
        match result {
            Err(AppError::Validation(fields)) => {
                assert!(fields.contains(field), "expected {} in {}", field, fields)
            }
            other => panic!("Expected Validation on {}, got {:?}", field, other),
        }
    }

    #[tokio::test]
    async fn test_root_without_positions_takes_catalog_default() {
        let db = TestDbBuilder::new()
            .formation("Base", 11, Scope::Club(1), Some(10), vec![])
            .build()
            .await
            .unwrap();
        let mut conn = db.conn().await;

        let declared = get_declared_positions(&mut conn, db.id("Base")).await.unwrap();
        assert_eq!(declared.len(), 11);
        assert_eq!(declared[0].position, PositionCode::GK);
        assert_eq!(declared[9].position, PositionCode::ST);
        assert_eq!((declared[9].x_coord, declared[9].y_coord), (50.0, 82.0));
    }

    #[tokio::test]
    async fn test_root_without_default_layout_is_rejected() {
        let db = TestDbBuilder::new().build().await.unwrap();
        let mut conn = db.conn().await;

        let new = NewFormation::new("Six", "2-2-1", 6, Scope::Club(1));
        expect_validation(
            create_formation(&mut conn, &new, DEFAULT_MAX_CHAIN_DEPTH).await,
            "positions",
        );
    }

    #[tokio::test]
    async fn test_duplicate_indices_rejected_and_nothing_written() {
        let db = TestDbBuilder::new().build().await.unwrap();
        let mut conn = db.conn().await;

        let new = NewFormation::new("Dupes", "4-4-2", 11, Scope::Club(1)).with_positions(vec![
            position(0, PositionCode::GK, 50.0, 5.0),
            position(0, PositionCode::CB, 50.0, 25.0),
        ]);
        expect_validation(
            create_formation(&mut conn, &new, DEFAULT_MAX_CHAIN_DEPTH).await,
            "positions[1].position_index",
        );

        assert!(list_formations(&mut conn, true).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_child_squad_size_must_match_parent() {
        let db = TestDbBuilder::new()
            .formation("Base", 11, Scope::Club(1), Some(10), vec![])
            .build()
            .await
            .unwrap();
        let mut conn = db.conn().await;

        let child = NewFormation::new("Small", "2-3-1", 7, Scope::Club(1)).derived_from(db.id("Base"));
        expect_validation(
            create_formation(&mut conn, &child, DEFAULT_MAX_CHAIN_DEPTH).await,
            "squad_size",
        );
    }

    #[tokio::test]
    async fn test_unknown_parent_rejected() {
        let db = TestDbBuilder::new().build().await.unwrap();
        let mut conn = db.conn().await;

        let child = NewFormation::new("Orphan", "4-3-3", 11, Scope::Club(1)).derived_from(404);
        expect_validation(
            create_formation(&mut conn, &child, DEFAULT_MAX_CHAIN_DEPTH).await,
            "parent_formation_id",
        );
    }

    #[tokio::test]
    async fn test_chain_depth_limit() {
        let db = TestDbBuilder::new()
            .formation("A", 11, Scope::Club(1), Some(10), vec![])
            .derived("B", "A", vec![])
            .build()
            .await
            .unwrap();
        let mut conn = db.conn().await;

        let too_deep = NewFormation::new("C", "4-3-3", 11, Scope::Club(1)).derived_from(db.id("B"));
        expect_validation(create_formation(&mut conn, &too_deep, 2).await, "parent_formation_id");

        let fits = NewFormation::new("C", "4-3-3", 11, Scope::Club(1)).derived_from(db.id("B"));
        assert!(create_formation(&mut conn, &fits, 3).await.is_ok());
    }

    #[tokio::test]
    async fn test_ancestry_nearest_parent_first() {
        let db = TestDbBuilder::new()
            .formation("A", 11, Scope::Club(1), Some(10), vec![])
            .derived("B", "A", vec![])
            .derived("C", "B", vec![])
            .build()
            .await
            .unwrap();
        let mut conn = db.conn().await;

        let lineage = get_with_ancestry(&mut conn, db.id("C")).await.unwrap();
        let ancestors: Vec<i64> = lineage.ancestors.iter().map(|f| f.id).collect();
        assert_eq!(ancestors, vec![db.id("B"), db.id("A")]);
        assert_eq!(lineage.formation.id, db.id("C"));

        let children = list_children(&mut conn, db.id("A")).await.unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].id, db.id("B"));
    }

    #[tokio::test]
    async fn test_missing_formation_is_not_found() {
        let db = TestDbBuilder::new().build().await.unwrap();
        let mut conn = db.conn().await;

        assert!(matches!(
            get_with_ancestry(&mut conn, 999).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_diamond_placed_once_before_both_branches() {
        let db = TestDbBuilder::new()
            .formation("A", 11, Scope::Club(1), Some(10), vec![])
            .derived("B", "A", vec![])
            .tactic("C", "A", vec![])
            .build()
            .await
            .unwrap();
        let mut conn = db.conn().await;

        let both = NewFormation::new("D", "4-3-3", 11, Scope::Club(1))
            .derived_from(db.id("B"))
            .tactic_of(db.id("C"));
        let d = create_formation(&mut conn, &both, DEFAULT_MAX_CHAIN_DEPTH)
            .await
            .unwrap();

        let lineage = get_with_ancestry(&mut conn, d.id).await.unwrap();
        let order: Vec<i64> = lineage.lineage().map(|f| f.id).collect();
        assert_eq!(order, vec![db.id("A"), db.id("B"), db.id("C"), d.id]);
    }

    #[test]
    fn test_linearize_reports_cycle_on_walk_path() {
        let mut formations = HashMap::new();
        for (id, parent) in [(1, Some(3)), (2, Some(1)), (3, Some(2))] {
            formations.insert(
                id,
                Formation {
                    id,
                    name: format!("F{}", id),
                    system: "4-3-3".to_string(),
                    squad_size: 11,
                    is_system_formation: false,
                    parent_formation_id: parent,
                    parent_tactic_id: None,
                    scope: Scope::Global,
                    created_by: None,
                    tags: vec![],
                    archived: false,
                    created_at: chrono::Utc::now(),
                    updated_at: chrono::Utc::now(),
                },
            );
        }

        assert!(matches!(
            linearize(3, &formations),
            Err(AppError::CycleDetected { formation_id: 3, .. })
        ));
    }

    #[tokio::test]
    async fn test_stored_cycle_is_integrity_violation() {
        let db = TestDbBuilder::new()
            .formation("A", 11, Scope::Club(1), Some(10), vec![])
            .derived("B", "A", vec![])
            .build()
            .await
            .unwrap();
        let mut conn = db.conn().await;

        sqlx::query("UPDATE formations SET parent_formation_id = ? WHERE id = ?")
            .bind(db.id("B"))
            .bind(db.id("A"))
            .execute(&mut *conn)
            .await
            .unwrap();

        let err = get_with_ancestry(&mut conn, db.id("B")).await.unwrap_err();
        assert!(matches!(err, AppError::CycleDetected { .. }));
        assert!(err.is_integrity_violation());
    }

    #[tokio::test]
    async fn test_update_rejects_cycle_as_validation() {
        let db = TestDbBuilder::new()
            .formation("A", 11, Scope::Club(1), Some(10), vec![])
            .derived("B", "A", vec![])
            .derived("C", "B", vec![])
            .build()
            .await
            .unwrap();
        let mut conn = db.conn().await;

        let patch = FormationPatch {
            parent_formation_id: Some(Some(db.id("C"))),
            ..Default::default()
        };
        expect_validation(
            update_formation(&mut conn, db.id("A"), &patch, DEFAULT_MAX_CHAIN_DEPTH).await,
            "parent_formation_id",
        );

        let self_parent = FormationPatch {
            parent_tactic_id: Some(Some(db.id("A"))),
            ..Default::default()
        };
        expect_validation(
            update_formation(&mut conn, db.id("A"), &self_parent, DEFAULT_MAX_CHAIN_DEPTH).await,
            "parent_tactic_id",
        );

        let a = get_formation(&mut conn, db.id("A")).await.unwrap();
        assert_eq!(a.parent_formation_id, None);
    }

    #[tokio::test]
    async fn test_squad_size_change_blocked_by_children() {
        let db = TestDbBuilder::new()
            .formation("A", 11, Scope::Club(1), Some(10), vec![])
            .derived("B", "A", vec![])
            .build()
            .await
            .unwrap();
        let mut conn = db.conn().await;

        let patch = FormationPatch {
            squad_size: Some(7),
            ..Default::default()
        };
        expect_validation(
            update_formation(&mut conn, db.id("A"), &patch, DEFAULT_MAX_CHAIN_DEPTH).await,
            "squad_size",
        );
    }

    #[tokio::test]
    async fn test_squad_size_change_blocked_by_overrides() {
        let db = TestDbBuilder::new()
            .formation("A", 11, Scope::Club(1), Some(10), four_three_three())
            .build()
            .await
            .unwrap();
        let mut conn = db.conn().await;
        let a = db.id("A");

        set_position_override(
            &mut conn,
            a,
            &NewPositionOverride {
                position_index: 9,
                x_coord: Some(55.0),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let before = get_formation(&mut conn, a).await.unwrap();

        let patch = FormationPatch {
            squad_size: Some(7),
            ..Default::default()
        };
        expect_validation(
            update_formation(&mut conn, a, &patch, DEFAULT_MAX_CHAIN_DEPTH).await,
            "squad_size",
        );

        assert_eq!(get_formation(&mut conn, a).await.unwrap(), before);
        assert_eq!(get_declared_positions(&mut conn, a).await.unwrap().len(), 11);
    }

    #[tokio::test]
    async fn test_archived_parent_does_not_freeze_children() {
        let db = TestDbBuilder::new()
            .formation("P", 11, Scope::Club(1), Some(10), four_three_three())
            .formation("Other", 11, Scope::Club(1), Some(10), four_three_three())
            .derived("C", "P", vec![])
            .build()
            .await
            .unwrap();
        let mut conn = db.conn().await;
        set_formation_archived(&mut conn, db.id("P"), true)
            .await
            .unwrap();
        set_formation_archived(&mut conn, db.id("Other"), true)
            .await
            .unwrap();

        let rename = FormationPatch {
            name: Some("Renamed".to_string()),
            ..Default::default()
        };
        let renamed = update_formation(&mut conn, db.id("C"), &rename, DEFAULT_MAX_CHAIN_DEPTH)
            .await
            .unwrap();
        assert_eq!(renamed.name, "Renamed");
        assert_eq!(renamed.parent_formation_id, Some(db.id("P")));

        let same_parent = FormationPatch {
            parent_formation_id: Some(Some(db.id("P"))),
            ..Default::default()
        };
        assert!(
            update_formation(&mut conn, db.id("C"), &same_parent, DEFAULT_MAX_CHAIN_DEPTH)
                .await
                .is_ok()
        );

        let new_archived_parent = FormationPatch {
            parent_formation_id: Some(Some(db.id("Other"))),
            ..Default::default()
        };
        expect_validation(
            update_formation(&mut conn, db.id("C"), &new_archived_parent, DEFAULT_MAX_CHAIN_DEPTH)
                .await,
            "parent_formation_id",
        );
    }

    #[tokio::test]
    async fn test_lowered_depth_limit_keeps_existing_chain_editable() {
        let db = TestDbBuilder::new()
            .formation("A", 11, Scope::Club(1), Some(10), four_three_three())
            .derived("B", "A", vec![])
            .derived("C", "B", vec![])
            .build()
            .await
            .unwrap();
        let mut conn = db.conn().await;

        let rename = FormationPatch {
            name: Some("Still editable".to_string()),
            ..Default::default()
        };
        let renamed = update_formation(&mut conn, db.id("C"), &rename, 2).await.unwrap();
        assert_eq!(renamed.name, "Still editable");

        let reparent = FormationPatch {
            parent_formation_id: Some(Some(db.id("B"))),
            ..Default::default()
        };
        assert!(update_formation(&mut conn, db.id("C"), &reparent, 2).await.is_ok());
    }

    #[tokio::test]
    async fn test_child_squad_size_must_match_unchanged_parent() {
        let db = TestDbBuilder::new()
            .formation("A", 11, Scope::Club(1), Some(10), four_three_three())
            .derived("B", "A", vec![])
            .build()
            .await
            .unwrap();
        let mut conn = db.conn().await;

        let patch = FormationPatch {
            squad_size: Some(7),
            ..Default::default()
        };
        expect_validation(
            update_formation(&mut conn, db.id("B"), &patch, DEFAULT_MAX_CHAIN_DEPTH).await,
            "squad_size",
        );
        assert_eq!(get_formation(&mut conn, db.id("B")).await.unwrap().squad_size, 11);
    }

    #[tokio::test]
    async fn test_squad_size_change_with_new_layout() {
        let db = TestDbBuilder::new()
            .formation("A", 11, Scope::Club(1), Some(10), vec![])
            .build()
            .await
            .unwrap();
        let mut conn = db.conn().await;

        let without_layout = FormationPatch {
            squad_size: Some(5),
            ..Default::default()
        };
        expect_validation(
            update_formation(&mut conn, db.id("A"), &without_layout, DEFAULT_MAX_CHAIN_DEPTH).await,
            "squad_size",
        );

        let five = vec![
            position(0, PositionCode::GK, 50.0, 5.0),
            position(1, PositionCode::LCB, 35.0, 30.0),
            position(2, PositionCode::RCB, 65.0, 30.0),
            position(3, PositionCode::LF, 35.0, 70.0),
            position(4, PositionCode::RF, 65.0, 70.0),
        ];
        let patch = FormationPatch {
            squad_size: Some(5),
            system: Some("2-2".to_string()),
            positions: Some(five),
            ..Default::default()
        };
        let updated = update_formation(&mut conn, db.id("A"), &patch, DEFAULT_MAX_CHAIN_DEPTH)
            .await
            .unwrap();
        assert_eq!(updated.squad_size, 5);
        assert_eq!(updated.system, "2-2");
        assert!(updated.updated_at >= updated.created_at);

        let layout = resolve_layout(&mut conn, db.id("A")).await.unwrap();
        assert_eq!(layout.positions.len(), 5);
    }

    #[tokio::test]
    async fn test_archive_keeps_formation_resolvable() {
        let db = TestDbBuilder::new()
            .formation("A", 11, Scope::Club(1), Some(10), four_three_three())
            .build()
            .await
            .unwrap();
        let mut conn = db.conn().await;
        let id = db.id("A");

        assert!(set_formation_archived(&mut conn, id, true).await.unwrap());

        assert!(list_formations(&mut conn, false).await.unwrap().is_empty());
        assert_eq!(list_formations(&mut conn, true).await.unwrap().len(), 1);
        assert_eq!(resolve_layout(&mut conn, id).await.unwrap().positions.len(), 11);

        let rename = FormationPatch {
            name: Some("Renamed".to_string()),
            ..Default::default()
        };
        expect_validation(
            update_formation(&mut conn, id, &rename, DEFAULT_MAX_CHAIN_DEPTH).await,
            "archived",
        );

        let child = NewFormation::new("Child", "4-3-3", 11, Scope::Club(1)).derived_from(id);
        expect_validation(
            create_formation(&mut conn, &child, DEFAULT_MAX_CHAIN_DEPTH).await,
            "parent_formation_id",
        );

        assert!(!set_formation_archived(&mut conn, id, false).await.unwrap());
        assert_eq!(list_formations(&mut conn, false).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_seed_is_idempotent_and_immutable() {
        let db = TestDbBuilder::new().build().await.unwrap();
        let mut conn = db.conn().await;

        assert_eq!(seed_system_formations(&mut conn).await.unwrap(), 6);
        assert_eq!(seed_system_formations(&mut conn).await.unwrap(), 0);

        let presets = list_formations(&mut conn, false).await.unwrap();
        assert!(presets.iter().all(|f| f.is_system_formation && f.scope == Scope::Global));

        let preset = &presets[0];
        assert!(matches!(
            set_formation_archived(&mut conn, preset.id, true).await,
            Err(AppError::Validation(_))
        ));
        let patch = FormationPatch {
            name: Some("Mine now".to_string()),
            ..Default::default()
        };
        expect_validation(
            update_formation(&mut conn, preset.id, &patch, DEFAULT_MAX_CHAIN_DEPTH).await,
            "is_system_formation",
        );
    }

    #[tokio::test]
    async fn test_tags_round_trip() {
        let db = TestDbBuilder::new().build().await.unwrap();
        let mut conn = db.conn().await;

        let new = NewFormation::new("Press", "4-3-3", 11, Scope::Team(4))
            .with_tags(&["high-press", "u16"])
            .with_positions(four_three_three());
        let created = create_formation(&mut conn, &new, DEFAULT_MAX_CHAIN_DEPTH)
            .await
            .unwrap();

        assert_eq!(created.tags, vec!["high-press", "u16"]);
        assert_eq!(created.scope, Scope::Team(4));
    }
}
