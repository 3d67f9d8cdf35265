pub const CURRENT_SCHEMA: &str = r#"
PRAGMA foreign_keys = 1;

CREATE TABLE IF NOT EXISTS formations (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    system TEXT NOT NULL,
    squad_size INTEGER NOT NULL,
    is_system_formation BOOLEAN NOT NULL DEFAULT FALSE,
    parent_formation_id INTEGER,
    parent_tactic_id INTEGER,
    scope_type TEXT NOT NULL,
    scope_club_id INTEGER,
    scope_age_group_id INTEGER,
    scope_team_id INTEGER,
    created_by INTEGER,
    tags TEXT NOT NULL DEFAULT '[]',
    archived BOOLEAN NOT NULL DEFAULT FALSE,
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY (parent_formation_id) REFERENCES formations (id),
    FOREIGN KEY (parent_tactic_id) REFERENCES formations (id),
    CHECK (
        (scope_type = 'global' AND scope_club_id IS NULL AND scope_age_group_id IS NULL AND scope_team_id IS NULL)
        OR (scope_type = 'club' AND scope_club_id IS NOT NULL AND scope_age_group_id IS NULL AND scope_team_id IS NULL)
        OR (scope_type = 'age_group' AND scope_club_id IS NULL AND scope_age_group_id IS NOT NULL AND scope_team_id IS NULL)
        OR (scope_type = 'team' AND scope_club_id IS NULL AND scope_age_group_id IS NULL AND scope_team_id IS NOT NULL)
    )
);

CREATE INDEX IF NOT EXISTS idx_formations_parent_formation ON formations (parent_formation_id);
CREATE INDEX IF NOT EXISTS idx_formations_parent_tactic ON formations (parent_tactic_id);

CREATE TABLE IF NOT EXISTS formation_positions (
    id INTEGER PRIMARY KEY,
    formation_id INTEGER NOT NULL,
    position_index INTEGER NOT NULL,
    position TEXT NOT NULL,
    x_coord REAL NOT NULL,
    y_coord REAL NOT NULL,
    direction TEXT,
    UNIQUE (formation_id, position_index),
    FOREIGN KEY (formation_id) REFERENCES formations (id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS position_overrides (
    id INTEGER PRIMARY KEY,
    formation_id INTEGER NOT NULL,
    position_index INTEGER NOT NULL,
    x_coord REAL,
    y_coord REAL,
    direction TEXT,
    UNIQUE (formation_id, position_index),
    FOREIGN KEY (formation_id) REFERENCES formations (id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS tactic_principles (
    id INTEGER PRIMARY KEY,
    formation_id INTEGER NOT NULL,
    title TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    position_indices TEXT NOT NULL DEFAULT '[]',
    FOREIGN KEY (formation_id) REFERENCES formations (id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS formation_clubs (
    formation_id INTEGER NOT NULL,
    club_id INTEGER NOT NULL,
    shared_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    PRIMARY KEY (formation_id, club_id),
    FOREIGN KEY (formation_id) REFERENCES formations (id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS formation_teams (
    formation_id INTEGER NOT NULL,
    team_id INTEGER NOT NULL,
    shared_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    PRIMARY KEY (formation_id, team_id),
    FOREIGN KEY (formation_id) REFERENCES formations (id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS formation_age_groups (
    formation_id INTEGER NOT NULL,
    age_group_id INTEGER NOT NULL,
    shared_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    PRIMARY KEY (formation_id, age_group_id),
    FOREIGN KEY (formation_id) REFERENCES formations (id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS formation_users (
    formation_id INTEGER NOT NULL,
    user_id INTEGER NOT NULL,
    is_owner BOOLEAN NOT NULL DEFAULT FALSE,
    shared_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    PRIMARY KEY (formation_id, user_id),
    FOREIGN KEY (formation_id) REFERENCES formations (id) ON DELETE CASCADE
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_formation_users_single_owner
    ON formation_users (formation_id) WHERE is_owner = 1;
"#;
