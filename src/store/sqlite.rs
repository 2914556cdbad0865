use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};

use super::schema::SCHEMA;
use super::{Session, Store, Transactional};
use crate::error::{Error, Result};
use crate::types::*;

/// How long a writer waits for the database lock before failing.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(30);

const PROJECT_COLUMNS: &str = "p.id, p.user_id, p.namespace, p.name, p.description, p.parent_id, \
     p.private, p.hook_token, p.settings, p.repo_path, p.created_at, p.updated_at";

const USER_COLUMNS: &str = "id, username, fullname, default_email, created_at";

const GROUP_COLUMNS: &str =
    "id, group_name, display_name, description, group_type, creator_id, created_at";

pub struct SqliteStore {
    conn: Mutex<Connection>,
    path: PathBuf,
    busy_timeout: Duration,
}

impl SqliteStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path = db_path.as_ref().to_path_buf();
        let conn = Connection::open(&path)?;

        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)?;

        Ok(Self {
            conn: Mutex::new(conn),
            path,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        })
    }

    /// Sets how long this store and its sessions wait for the write lock.
    pub fn with_busy_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.conn().busy_timeout(timeout)?;
        self.busy_timeout = timeout;
        Ok(self)
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns a guard to the underlying database connection.
    pub fn connection(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            // Handle SQLite's default datetime format: "YYYY-MM-DD HH:MM:SS"
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            tracing::error!("Invalid datetime in database: '{}' - {}", s, e);
            Utc::now()
        })
}

// Fixed width, so text order is time order.
fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn project_from_row(row: &Row<'_>) -> rusqlite::Result<Project> {
    let raw_settings: Option<String> = row.get(8)?;
    let settings = ProjectSettings::from_column(raw_settings.as_deref()).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(8, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(Project {
        id: row.get(0)?,
        user_id: row.get(1)?,
        namespace: row.get(2)?,
        name: row.get(3)?,
        description: row.get(4)?,
        parent_id: row.get(5)?,
        private: row.get(6)?,
        hook_token: row.get(7)?,
        settings,
        repo_path: row.get(9)?,
        created_at: parse_datetime(&row.get::<_, String>(10)?),
        updated_at: parse_datetime(&row.get::<_, String>(11)?),
    })
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        fullname: row.get(2)?,
        default_email: row.get(3)?,
        created_at: parse_datetime(&row.get::<_, String>(4)?),
    })
}

fn group_from_row(row: &Row<'_>) -> rusqlite::Result<Group> {
    Ok(Group {
        id: row.get(0)?,
        group_name: row.get(1)?,
        display_name: row.get(2)?,
        description: row.get(3)?,
        group_type: row.get(4)?,
        creator_id: row.get(5)?,
        created_at: parse_datetime(&row.get::<_, String>(6)?),
    })
}

fn deploy_key_from_row(row: &Row<'_>) -> rusqlite::Result<DeployKey> {
    Ok(DeployKey {
        id: row.get(0)?,
        project_id: row.get(1)?,
        pushaccess: row.get(2)?,
        public_ssh_key: row.get(3)?,
        ssh_short_key: row.get(4)?,
        ssh_search_key: row.get(5)?,
        creator_user_id: row.get(6)?,
        date_created: parse_datetime(&row.get::<_, String>(7)?),
    })
}

fn membership_from_row(row: &Row<'_>) -> rusqlite::Result<GroupMembership> {
    Ok(GroupMembership {
        group_id: row.get(0)?,
        group_name: row.get(1)?,
        user_id: row.get(2)?,
        is_admin: row.get(3)?,
    })
}

fn select_user_by_name(conn: &Connection, username: &str) -> Result<Option<User>> {
    conn.query_row(
        &format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?1"),
        params![username],
        user_from_row,
    )
    .optional()
    .map_err(Error::from)
}

fn select_project(conn: &Connection, id: i64) -> Result<Option<Project>> {
    conn.query_row(
        &format!("SELECT {PROJECT_COLUMNS} FROM projects p WHERE p.id = ?1"),
        params![id],
        project_from_row,
    )
    .optional()
    .map_err(Error::from)
}

fn select_memberships(conn: &Connection, column: &str, id: i64) -> Result<Vec<GroupMembership>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT gm.group_id, g.group_name, gm.user_id, gm.is_admin
         FROM group_members gm JOIN groups g ON g.id = gm.group_id
         WHERE gm.{column} = ?1 ORDER BY g.group_name, gm.user_id"
    ))?;
    let rows = stmt.query_map(params![id], membership_from_row)?;
    rows.collect::<std::result::Result<Vec<_>, _>>()
        .map_err(Error::from)
}

/// Collects `WHERE` clauses and their positional parameters in order.
#[derive(Default)]
struct QueryBuilder {
    clauses: Vec<String>,
    params: Vec<Value>,
}

impl QueryBuilder {
    fn push(&mut self, clause: String, params: impl IntoIterator<Item = Value>) {
        self.clauses.push(clause);
        self.params.extend(params);
    }

    fn where_sql(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.clauses.join(" AND "))
        }
    }
}

fn placeholders(count: usize) -> String {
    if count == 0 {
        "(NULL)".to_string()
    } else {
        format!("({})", vec!["?"; count].join(", "))
    }
}

/// Owner, direct grant at one of `levels`, or group grant at one of `levels`
/// through a group outside `exclude_groups`.
fn grant_clause(
    user_id: i64,
    min_level: AccessLevel,
    exclude_groups: &std::collections::BTreeSet<String>,
) -> (String, Vec<Value>) {
    let levels = min_level.grantable_at_least();
    let level_values = || levels.iter().map(|l| Value::Text(l.as_str().to_string()));
    let mut params = vec![Value::Integer(user_id), Value::Integer(user_id)];
    params.extend(level_values());
    params.push(Value::Integer(user_id));
    params.extend(level_values());

    let exclude_sql = if exclude_groups.is_empty() {
        String::new()
    } else {
        params.extend(exclude_groups.iter().map(|g| Value::Text(g.clone())));
        format!(" AND g.group_name NOT IN {}", placeholders(exclude_groups.len()))
    };

    let sql = format!(
        "(p.user_id = ? \
         OR p.id IN (SELECT project_id FROM project_user_acls WHERE user_id = ? AND access IN {levels}) \
         OR p.id IN (SELECT pga.project_id FROM project_group_acls pga \
             JOIN group_members gm ON gm.group_id = pga.group_id \
             JOIN groups g ON g.id = pga.group_id \
             WHERE gm.user_id = ? AND pga.access IN {levels}{exclude_sql}))",
        levels = placeholders(levels.len()),
    );
    (sql, params)
}

fn build_project_query(filter: &ProjectFilter) -> QueryBuilder {
    let mut q = QueryBuilder::default();

    if let Some(member) = &filter.member {
        let (sql, params) = grant_clause(member.user_id, member.min_access, &member.exclude_groups);
        q.push(sql, params);
    }

    match &filter.owner {
        Some(OwnerFilter::Is(name)) => q.push(
            "p.user_id IN (SELECT id FROM users WHERE username = ?)".to_string(),
            [Value::Text(name.clone())],
        ),
        Some(OwnerFilter::IsNot(name)) => q.push(
            "p.user_id NOT IN (SELECT id FROM users WHERE username = ?)".to_string(),
            [Value::Text(name.clone())],
        ),
        None => {}
    }

    match filter.fork {
        Some(true) => q.push("p.parent_id IS NOT NULL".to_string(), []),
        Some(false) => q.push("p.parent_id IS NULL".to_string(), []),
        None => {}
    }

    if let Some(namespace) = &filter.namespace {
        q.push(
            "p.namespace = ?".to_string(),
            [Value::Text(namespace.clone())],
        );
    }

    match &filter.name {
        Some(NameMatch::Exact(name)) => {
            q.push("p.name = ?".to_string(), [Value::Text(name.clone())])
        }
        Some(NameMatch::Like(pattern)) => {
            q.push("p.name LIKE ?".to_string(), [Value::Text(pattern.clone())])
        }
        None => {}
    }

    match &filter.visibility {
        Visibility::All => {}
        Visibility::PublicOnly => q.push("p.private = 0".to_string(), []),
        Visibility::VisibleTo {
            user_id,
            min_level,
            exclude_groups,
        } => {
            let (sql, params) = grant_clause(*user_id, *min_level, exclude_groups);
            q.push(format!("(p.private = 0 OR {sql})"), params);
        }
    }

    q
}

fn limit_sql(filter: &ProjectFilter, params: &mut Vec<Value>) -> String {
    match (filter.limit, filter.offset) {
        (None, None) => String::new(),
        (limit, offset) => {
            params.push(Value::Integer(limit.map_or(-1, i64::from)));
            params.push(Value::Integer(offset.map_or(0, i64::from)));
            " LIMIT ? OFFSET ?".to_string()
        }
    }
}

impl Store for SqliteStore {
    fn initialize(&self) -> Result<()> {
        self.conn().execute_batch(SCHEMA)?;
        Ok(())
    }

    // User operations

    fn create_user(
        &self,
        username: &str,
        fullname: Option<&str>,
        default_email: Option<&str>,
    ) -> Result<User> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let now = Utc::now().trunc_subsecs(6);

        tx.execute(
            "INSERT INTO users (username, fullname, default_email, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![username, fullname, default_email, format_datetime(&now)],
        )?;
        let id = tx.last_insert_rowid();
        if let Some(email) = default_email {
            tx.execute(
                "INSERT INTO user_emails (user_id, email) VALUES (?1, ?2)",
                params![id, email],
            )?;
        }
        tx.commit()?;

        Ok(User {
            id,
            username: username.to_string(),
            fullname: fullname.map(str::to_string),
            default_email: default_email.map(str::to_string),
            created_at: now,
        })
    }

    fn get_user(&self, id: i64) -> Result<Option<User>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
            params![id],
            user_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn get_user_by_name(&self, username: &str) -> Result<Option<User>> {
        select_user_by_name(&self.conn(), username)
    }

    fn add_user_email(&self, user_id: i64, email: &str) -> Result<()> {
        self.conn().execute(
            "INSERT INTO user_emails (user_id, email) VALUES (?1, ?2)",
            params![user_id, email],
        )?;
        Ok(())
    }

    fn list_user_emails(&self, user_id: i64) -> Result<Vec<UserEmail>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT user_id, email FROM user_emails WHERE user_id = ?1 ORDER BY email")?;
        let rows = stmt.query_map(params![user_id], |row| {
            Ok(UserEmail {
                user_id: row.get(0)?,
                email: row.get(1)?,
            })
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn list_user_groups(&self, user_id: i64) -> Result<Vec<GroupMembership>> {
        select_memberships(&self.conn(), "user_id", user_id)
    }

    // Group operations

    fn group_type_exists(&self, group_type: &str) -> Result<bool> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM group_types WHERE group_type = ?1",
            params![group_type],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn create_group(
        &self,
        group_name: &str,
        display_name: &str,
        description: Option<&str>,
        group_type: &str,
        creator_id: i64,
    ) -> Result<Group> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let now = Utc::now().trunc_subsecs(6);

        tx.execute(
            "INSERT INTO groups (group_name, display_name, description, group_type, creator_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                group_name,
                display_name,
                description,
                group_type,
                creator_id,
                format_datetime(&now),
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.execute(
            "INSERT INTO group_members (group_id, user_id, is_admin, created_at)
             VALUES (?1, ?2, 1, ?3)",
            params![id, creator_id, format_datetime(&now)],
        )?;
        tx.commit()?;

        Ok(Group {
            id,
            group_name: group_name.to_string(),
            display_name: display_name.to_string(),
            description: description.map(str::to_string),
            group_type: group_type.to_string(),
            creator_id,
            created_at: now,
        })
    }

    fn get_group_by_name(&self, group_name: &str) -> Result<Option<Group>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {GROUP_COLUMNS} FROM groups WHERE group_name = ?1"),
            params![group_name],
            group_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn get_group_by_display_name(&self, display_name: &str) -> Result<Option<Group>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {GROUP_COLUMNS} FROM groups WHERE display_name = ?1"),
            params![display_name],
            group_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn add_group_member(&self, group_id: i64, user_id: i64, is_admin: bool) -> Result<bool> {
        let rows = self.conn().execute(
            "INSERT OR IGNORE INTO group_members (group_id, user_id, is_admin, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![group_id, user_id, is_admin, format_datetime(&Utc::now())],
        )?;
        Ok(rows > 0)
    }

    fn remove_group_member(&self, group_id: i64, user_id: i64) -> Result<bool> {
        let rows = self.conn().execute(
            "DELETE FROM group_members WHERE group_id = ?1 AND user_id = ?2",
            params![group_id, user_id],
        )?;
        Ok(rows > 0)
    }

    fn list_group_members(&self, group_id: i64) -> Result<Vec<GroupMembership>> {
        select_memberships(&self.conn(), "group_id", group_id)
    }

    // Project operations

    fn get_project(&self, id: i64) -> Result<Option<Project>> {
        select_project(&self.conn(), id)
    }

    fn get_project_by_path(&self, repo_path: &str) -> Result<Option<Project>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {PROJECT_COLUMNS} FROM projects p WHERE p.repo_path = ?1"),
            params![repo_path],
            project_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_forks(&self, parent_id: i64) -> Result<Vec<Project>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {PROJECT_COLUMNS} FROM projects p WHERE p.parent_id = ?1 ORDER BY p.id"
        ))?;
        let rows = stmt.query_map(params![parent_id], project_from_row)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn list_all_projects(&self) -> Result<Vec<Project>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {PROJECT_COLUMNS} FROM projects p ORDER BY p.id"
        ))?;
        let rows = stmt.query_map([], project_from_row)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn update_project(&self, project: &Project) -> Result<()> {
        let settings = project.settings.to_column()?;
        let rows = self.conn().execute(
            "UPDATE projects SET description = ?1, private = ?2, hook_token = ?3, settings = ?4,
             updated_at = ?5 WHERE id = ?6",
            params![
                project.description,
                project.private,
                project.hook_token,
                settings,
                format_datetime(&Utc::now()),
                project.id,
            ],
        )?;

        if rows == 0 {
            return Err(Error::NotFound(format!("project {}", project.id)));
        }
        Ok(())
    }

    fn set_project_owner(&self, project_id: i64, user_id: i64) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let rows = tx.execute(
            "UPDATE projects SET user_id = ?1, updated_at = ?2 WHERE id = ?3",
            params![user_id, format_datetime(&Utc::now()), project_id],
        )?;
        if rows == 0 {
            return Err(Error::NotFound(format!("project {project_id}")));
        }
        tx.execute(
            "DELETE FROM project_user_acls WHERE project_id = ?1 AND user_id = ?2",
            params![project_id, user_id],
        )?;

        tx.commit()?;
        Ok(())
    }

    fn query_projects(&self, filter: &ProjectFilter) -> Result<Vec<Project>> {
        let q = build_project_query(filter);
        let mut params = q.params.clone();
        let order = match filter.sort {
            SortOrder::Name => "p.namespace IS NOT NULL, p.namespace, p.name",
            SortOrder::Latest => "p.created_at DESC, p.id DESC",
            SortOrder::Oldest => "p.created_at ASC, p.id ASC",
        };
        let sql = format!(
            "SELECT {PROJECT_COLUMNS} FROM projects p{} ORDER BY {order}{}",
            q.where_sql(),
            limit_sql(filter, &mut params),
        );

        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(params), project_from_row)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn count_projects(&self, filter: &ProjectFilter) -> Result<u64> {
        let q = build_project_query(filter);
        let mut params = q.params.clone();
        let sql = format!(
            "SELECT COUNT(*) FROM (SELECT p.id FROM projects p{}{})",
            q.where_sql(),
            limit_sql(filter, &mut params),
        );

        let count: i64 = self
            .conn()
            .query_row(&sql, params_from_iter(params), |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }

    // ACL operations

    fn list_user_grants(&self, project_id: i64) -> Result<Vec<ProjectUserAcl>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT a.project_id, a.user_id, u.username, a.access
             FROM project_user_acls a JOIN users u ON u.id = a.user_id
             WHERE a.project_id = ?1 ORDER BY u.username",
        )?;
        let rows = stmt.query_map(params![project_id], |row| {
            Ok(ProjectUserAcl {
                project_id: row.get(0)?,
                user_id: row.get(1)?,
                username: row.get(2)?,
                access: row.get(3)?,
            })
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn list_group_grants(&self, project_id: i64) -> Result<Vec<ProjectGroupAcl>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT a.project_id, a.group_id, g.group_name, a.access
             FROM project_group_acls a JOIN groups g ON g.id = a.group_id
             WHERE a.project_id = ?1 ORDER BY g.group_name",
        )?;
        let rows = stmt.query_map(params![project_id], |row| {
            Ok(ProjectGroupAcl {
                project_id: row.get(0)?,
                group_id: row.get(1)?,
                group_name: row.get(2)?,
                access: row.get(3)?,
            })
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn upsert_user_grant(&self, project_id: i64, user_id: i64, access: AccessLevel) -> Result<()> {
        let now = format_datetime(&Utc::now());
        self.conn().execute(
            "INSERT INTO project_user_acls (project_id, user_id, access, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT(project_id, user_id) DO UPDATE SET access = excluded.access,
                 updated_at = excluded.updated_at",
            params![project_id, user_id, access, now],
        )?;
        Ok(())
    }

    fn delete_user_grant(&self, project_id: i64, user_id: i64) -> Result<bool> {
        let rows = self.conn().execute(
            "DELETE FROM project_user_acls WHERE project_id = ?1 AND user_id = ?2",
            params![project_id, user_id],
        )?;
        Ok(rows > 0)
    }

    fn upsert_group_grant(
        &self,
        project_id: i64,
        group_id: i64,
        access: AccessLevel,
    ) -> Result<()> {
        let now = format_datetime(&Utc::now());
        self.conn().execute(
            "INSERT INTO project_group_acls (project_id, group_id, access, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT(project_id, group_id) DO UPDATE SET access = excluded.access,
                 updated_at = excluded.updated_at",
            params![project_id, group_id, access, now],
        )?;
        Ok(())
    }

    fn delete_group_grant(&self, project_id: i64, group_id: i64) -> Result<bool> {
        let rows = self.conn().execute(
            "DELETE FROM project_group_acls WHERE project_id = ?1 AND group_id = ?2",
            params![project_id, group_id],
        )?;
        Ok(rows > 0)
    }

    // Deploy key operations

    fn create_deploy_key(&self, key: &DeployKey) -> Result<DeployKey> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO deploykeys (project_id, pushaccess, public_ssh_key, ssh_short_key,
             ssh_search_key, creator_user_id, date_created)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                key.project_id,
                key.pushaccess,
                key.public_ssh_key,
                key.ssh_short_key,
                key.ssh_search_key,
                key.creator_user_id,
                format_datetime(&key.date_created),
            ],
        )?;
        Ok(DeployKey {
            id: conn.last_insert_rowid(),
            ..key.clone()
        })
    }

    fn list_deploy_keys(&self, project_id: i64) -> Result<Vec<DeployKey>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, project_id, pushaccess, public_ssh_key, ssh_short_key, ssh_search_key,
             creator_user_id, date_created FROM deploykeys WHERE project_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![project_id], deploy_key_from_row)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn find_deploy_keys(&self, ssh_search_key: &str) -> Result<Vec<DeployKey>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, project_id, pushaccess, public_ssh_key, ssh_short_key, ssh_search_key,
             creator_user_id, date_created FROM deploykeys WHERE ssh_search_key = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![ssh_search_key], deploy_key_from_row)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn delete_deploy_key(&self, id: i64) -> Result<bool> {
        let rows = self
            .conn()
            .execute("DELETE FROM deploykeys WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    // API token operations

    fn create_token(&self, token: &ApiToken) -> Result<()> {
        self.conn().execute(
            "INSERT INTO tokens (id, user_id, project_id, description, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                token.id,
                token.user_id,
                token.project_id,
                token.description,
                format_datetime(&token.created_at),
                token.expires_at.as_ref().map(format_datetime),
            ],
        )?;
        Ok(())
    }

    fn list_project_tokens(&self, project_id: i64) -> Result<Vec<ApiToken>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, user_id, project_id, description, created_at, expires_at
             FROM tokens WHERE project_id = ?1 ORDER BY created_at",
        )?;
        let rows = stmt.query_map(params![project_id], |row| {
            Ok(ApiToken {
                id: row.get(0)?,
                user_id: row.get(1)?,
                project_id: row.get(2)?,
                description: row.get(3)?,
                created_at: parse_datetime(&row.get::<_, String>(4)?),
                expires_at: row
                    .get::<_, Option<String>>(5)?
                    .map(|s| parse_datetime(&s)),
            })
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }
}

impl Transactional for SqliteStore {
    fn begin(&self) -> Result<Box<dyn Session + '_>> {
        Ok(Box::new(SqliteSession::begin(&self.path, self.busy_timeout)?))
    }
}

/// A write transaction on its own connection. `BEGIN IMMEDIATE` takes the
/// database write lock up front, so concurrent sessions queue on the busy
/// timeout instead of failing at commit.
///
/// The lock is held until the session ends, including while a lifecycle
/// operation clones or initializes repositories. Lifecycle operations are
/// therefore serialized, and every other writer waits behind them for at
/// most the busy timeout. Forges hosting large repositories should raise
/// `database.busy_timeout_secs`.
pub struct SqliteSession {
    conn: Connection,
    finished: bool,
}

impl SqliteSession {
    pub fn begin(db_path: &Path, busy_timeout: Duration) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(busy_timeout)?;
        conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(Self {
            conn,
            finished: false,
        })
    }
}

impl Session for SqliteSession {
    fn get_user_by_name(&mut self, username: &str) -> Result<Option<User>> {
        select_user_by_name(&self.conn, username)
    }

    fn list_user_group_names(&mut self, user_id: i64) -> Result<Vec<String>> {
        Ok(select_memberships(&self.conn, "user_id", user_id)?
            .into_iter()
            .map(|m| m.group_name)
            .collect())
    }

    fn get_project(&mut self, id: i64) -> Result<Option<Project>> {
        select_project(&self.conn, id)
    }

    fn insert_project(&mut self, project: &NewProject) -> Result<Project> {
        let now = Utc::now().trunc_subsecs(6);
        let settings = project.settings.to_column()?;
        self.conn
            .execute(
                "INSERT INTO projects (user_id, namespace, name, description, parent_id, private,
                 hook_token, settings, repo_path, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
                params![
                    project.user_id,
                    project.namespace,
                    project.name,
                    project.description,
                    project.parent_id,
                    project.private,
                    project.hook_token,
                    settings,
                    project.repo_path,
                    format_datetime(&now),
                ],
            )
            .map_err(|e| {
                let err = Error::from(e);
                if err.is_unique_violation() {
                    Error::DuplicateProject(project.repo_path.clone())
                } else {
                    err
                }
            })?;

        Ok(Project {
            id: self.conn.last_insert_rowid(),
            user_id: project.user_id,
            namespace: project.namespace.clone(),
            name: project.name.clone(),
            description: project.description.clone(),
            parent_id: project.parent_id,
            private: project.private,
            hook_token: project.hook_token.clone(),
            settings: project.settings.clone(),
            repo_path: project.repo_path.clone(),
            created_at: now,
            updated_at: now,
        })
    }

    fn detach_forks(&mut self, parent_id: i64) -> Result<usize> {
        let rows = self.conn.execute(
            "UPDATE projects SET parent_id = NULL, updated_at = ?1 WHERE parent_id = ?2",
            params![format_datetime(&Utc::now()), parent_id],
        )?;
        Ok(rows)
    }

    fn delete_project(&mut self, id: i64) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM projects WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    fn commit(mut self: Box<Self>) -> Result<()> {
        self.conn.execute_batch("COMMIT")?;
        self.finished = true;
        Ok(())
    }
}

impl Drop for SqliteSession {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.conn.execute_batch("ROLLBACK") {
                tracing::error!("Failed to roll back session: {}", e);
            }
        }
    }
}
