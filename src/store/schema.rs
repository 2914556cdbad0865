pub const SCHEMA: &str = r#"
-- Users are never hard-deleted; rows referencing them use ON UPDATE CASCADE
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    username TEXT NOT NULL UNIQUE,
    fullname TEXT,
    default_email TEXT,
    created_at TEXT DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS user_emails (
    user_id INTEGER NOT NULL REFERENCES users(id) ON UPDATE CASCADE ON DELETE CASCADE,
    email TEXT NOT NULL UNIQUE,
    PRIMARY KEY (user_id, email)
);

-- Group types gate which groups can be created by whom
CREATE TABLE IF NOT EXISTS group_types (
    group_type TEXT PRIMARY KEY,
    description TEXT
);

INSERT OR IGNORE INTO group_types (group_type, description) VALUES
    ('user', 'User group'),
    ('admin', 'Admin groups, used by the instance administrators');

CREATE TABLE IF NOT EXISTS groups (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    group_name TEXT NOT NULL UNIQUE,
    display_name TEXT NOT NULL UNIQUE,
    description TEXT,
    group_type TEXT NOT NULL REFERENCES group_types(group_type) ON UPDATE CASCADE,
    creator_id INTEGER NOT NULL REFERENCES users(id) ON UPDATE CASCADE,
    created_at TEXT DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS group_members (
    group_id INTEGER NOT NULL REFERENCES groups(id) ON UPDATE CASCADE ON DELETE CASCADE,
    user_id INTEGER NOT NULL REFERENCES users(id) ON UPDATE CASCADE ON DELETE CASCADE,
    is_admin INTEGER NOT NULL DEFAULT 0,
    created_at TEXT DEFAULT (datetime('now')),
    PRIMARY KEY (group_id, user_id)
);

-- Projects. repo_path is the on-disk location relative to every repo
-- folder and is the uniqueness authority: `[ns/]name.git` for projects,
-- `forks/<user>/[ns/]name.git` for forks.
CREATE TABLE IF NOT EXISTS projects (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL REFERENCES users(id) ON UPDATE CASCADE,
    namespace TEXT,
    name TEXT NOT NULL,
    description TEXT,
    parent_id INTEGER REFERENCES projects(id) ON UPDATE CASCADE ON DELETE SET NULL,
    private INTEGER NOT NULL DEFAULT 0,
    hook_token TEXT NOT NULL UNIQUE,
    settings TEXT,
    repo_path TEXT NOT NULL UNIQUE,
    created_at TEXT DEFAULT (datetime('now')),
    updated_at TEXT DEFAULT (datetime('now'))
);

-- One fork per user per upstream
CREATE UNIQUE INDEX IF NOT EXISTS idx_projects_fork_key
    ON projects(parent_id, user_id, IFNULL(namespace, ''), name)
    WHERE parent_id IS NOT NULL;

CREATE TABLE IF NOT EXISTS project_user_acls (
    project_id INTEGER NOT NULL REFERENCES projects(id) ON UPDATE CASCADE ON DELETE CASCADE,
    user_id INTEGER NOT NULL REFERENCES users(id) ON UPDATE CASCADE ON DELETE CASCADE,
    access TEXT NOT NULL CHECK (access IN ('ticket', 'collaborator', 'commit', 'admin')),
    created_at TEXT DEFAULT (datetime('now')),
    updated_at TEXT DEFAULT (datetime('now')),
    PRIMARY KEY (project_id, user_id)
);

CREATE TABLE IF NOT EXISTS project_group_acls (
    project_id INTEGER NOT NULL REFERENCES projects(id) ON UPDATE CASCADE ON DELETE CASCADE,
    group_id INTEGER NOT NULL REFERENCES groups(id) ON UPDATE CASCADE ON DELETE CASCADE,
    access TEXT NOT NULL CHECK (access IN ('ticket', 'collaborator', 'commit', 'admin')),
    created_at TEXT DEFAULT (datetime('now')),
    updated_at TEXT DEFAULT (datetime('now')),
    PRIMARY KEY (project_id, group_id)
);

-- Deploy keys go with their project; the creator is only ever renumbered
CREATE TABLE IF NOT EXISTS deploykeys (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    project_id INTEGER NOT NULL REFERENCES projects(id) ON UPDATE CASCADE ON DELETE CASCADE,
    pushaccess INTEGER NOT NULL DEFAULT 0,
    public_ssh_key TEXT NOT NULL,
    ssh_short_key TEXT NOT NULL,
    ssh_search_key TEXT NOT NULL,
    creator_user_id INTEGER NOT NULL REFERENCES users(id) ON UPDATE CASCADE,
    date_created TEXT NOT NULL,
    UNIQUE(project_id, ssh_search_key)
);

CREATE TABLE IF NOT EXISTS tokens (
    id TEXT PRIMARY KEY,
    user_id INTEGER NOT NULL REFERENCES users(id) ON UPDATE CASCADE ON DELETE CASCADE,
    project_id INTEGER NOT NULL REFERENCES projects(id) ON UPDATE CASCADE ON DELETE CASCADE,
    description TEXT,
    created_at TEXT DEFAULT (datetime('now')),
    expires_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_projects_user ON projects(user_id);
CREATE INDEX IF NOT EXISTS idx_projects_parent ON projects(parent_id);
CREATE INDEX IF NOT EXISTS idx_projects_name ON projects(name);
CREATE INDEX IF NOT EXISTS idx_group_members_user ON group_members(user_id);
CREATE INDEX IF NOT EXISTS idx_project_user_acls_user ON project_user_acls(user_id);
CREATE INDEX IF NOT EXISTS idx_project_group_acls_group ON project_group_acls(group_id);
CREATE INDEX IF NOT EXISTS idx_deploykeys_search ON deploykeys(ssh_search_key);
CREATE INDEX IF NOT EXISTS idx_tokens_project ON tokens(project_id);
"#;
