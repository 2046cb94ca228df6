use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use rusqlite::config::DbConfig;
use rusqlite::{params, Connection, OptionalExtension};

use crate::config::VaultOptions;
use crate::error::StoreError;
use crate::model::{ItemId, ItemKind};
use crate::store::{schema, CredentialStore, StoreResult};
use crate::tree::{DatabaseTree, Record};

const DEFAULT_ROOT_ID: ItemId = 1;

/// Plaintext SQLite vault. Stands in for an encrypted container during
/// development; the record layout is the only thing it shares with one.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    options: Arc<VaultOptions>,
    location: Option<PathBuf>,
}

struct Row {
    record: Record,
    position: i64,
}

impl SqliteStore {
    pub fn new(options: &VaultOptions) -> Self {
        Self {
            options: Arc::new(options.clone()),
            location: None,
        }
    }

    /// Creates (or reuses) a vault at `path` holding at least a root group.
    pub fn create(path: &Path, options: &VaultOptions, root_title: &str) -> StoreResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        prepare_connection(&conn, options)?;
        schema::apply(&conn)?;
        let existing: Option<ItemId> = conn
            .query_row(
                "SELECT id FROM records WHERE parent_id IS NULL LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        if existing.is_none() {
            tracing::info!(path = %path.display(), "initialising new vault");
            conn.execute(
                "INSERT INTO records (id, parent_id, kind, title, subtitle, position)
                 VALUES (?1, NULL, ?2, ?3, '', 0)",
                params![DEFAULT_ROOT_ID, ItemKind::Group.as_ref(), root_title],
            )?;
        }
        Ok(Self {
            options: Arc::new(options.clone()),
            location: Some(path.to_path_buf()),
        })
    }

    pub fn location(&self) -> Option<&Path> {
        self.location.as_deref()
    }

    fn connect(&self) -> StoreResult<Connection> {
        let path = self
            .location
            .as_deref()
            .ok_or_else(|| StoreError::Corrupt("no vault has been opened".into()))?;
        let conn = Connection::open(path)?;
        prepare_connection(&conn, &self.options)?;
        Ok(conn)
    }

    fn with_connection<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Connection) -> StoreResult<T>,
    {
        let conn = self.connect()?;
        f(&conn)
    }
}

impl CredentialStore for SqliteStore {
    /// Loads `location` and switches to it. On failure the previous vault stays current.
    fn open(&mut self, location: &Path) -> StoreResult<DatabaseTree> {
        if !location.is_file() {
            return Err(StoreError::Missing(location.to_path_buf()));
        }
        let conn = Connection::open(location)?;
        prepare_connection(&conn, &self.options)?;
        if !schema::is_applied(&conn)? {
            return Err(StoreError::Corrupt(format!(
                "{} is not a vault",
                location.display()
            )));
        }
        let tree = load_tree(&conn)?;
        self.location = Some(location.to_path_buf());
        Ok(tree)
    }

    fn insert(&mut self, record: &Record) -> StoreResult<()> {
        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO records (id, parent_id, kind, title, subtitle, position)
                 VALUES (?1, ?2, ?3, ?4, ?5,
                         (SELECT COALESCE(MAX(position), -1) + 1 FROM records WHERE parent_id = ?2))",
                params![
                    record.id,
                    record.parent,
                    record.kind.as_ref(),
                    record.title,
                    record.subtitle
                ],
            )?;
            Ok(())
        })
    }

    fn rename(&mut self, id: ItemId, title: &str, subtitle: &str) -> StoreResult<()> {
        self.with_connection(|conn| {
            let updated = conn.execute(
                "UPDATE records SET title = ?1, subtitle = ?2 WHERE id = ?3",
                params![title, subtitle, id],
            )?;
            if updated == 0 {
                return Err(StoreError::Corrupt(format!("record {id} not found")));
            }
            Ok(())
        })
    }

    fn delete(&mut self, id: ItemId) -> StoreResult<()> {
        self.with_connection(|conn| {
            let deleted = conn.execute("DELETE FROM records WHERE id = ?1", [id])?;
            if deleted == 0 {
                return Err(StoreError::Corrupt(format!("record {id} not found")));
            }
            Ok(())
        })
    }
}

fn load_tree(conn: &Connection) -> StoreResult<DatabaseTree> {
    let mut stmt = conn.prepare(
        "SELECT id, parent_id, kind, title, subtitle, position
         FROM records
         ORDER BY position, id",
    )?;
    let rows = stmt
        .query_map([], |row| {
            let kind: String = row.get(2)?;
            Ok((
                kind,
                Row {
                    record: Record {
                        id: row.get(0)?,
                        parent: row.get(1)?,
                        kind: ItemKind::Entry,
                        title: row.get(3)?,
                        subtitle: row.get(4)?,
                    },
                    position: row.get(5)?,
                },
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut root = None;
    let mut by_parent: HashMap<ItemId, Vec<Row>> = HashMap::new();
    for (kind, mut row) in rows {
        row.record.kind = ItemKind::from_str(&kind)
            .map_err(|_| StoreError::Corrupt(format!("unknown record kind {kind:?}")))?;
        match row.record.parent {
            None if root.is_some() => {
                return Err(StoreError::Corrupt("vault has more than one root".into()))
            }
            None => root = Some(row.record),
            Some(parent) => by_parent.entry(parent).or_default().push(row),
        }
    }
    let root = root.ok_or_else(|| StoreError::Corrupt("vault has no root group".into()))?;

    let mut tree = DatabaseTree::new(root.id, root.title);
    let mut pending = vec![root.id];
    while let Some(parent) = pending.pop() {
        let Some(mut children) = by_parent.remove(&parent) else {
            continue;
        };
        children.sort_by_key(|row| (row.position, row.record.id));
        for row in children {
            let id = row.record.id;
            tree.attach(row.record)
                .map_err(|err| StoreError::Corrupt(err.to_string()))?;
            pending.push(id);
        }
    }
    if !by_parent.is_empty() {
        let orphans: usize = by_parent.values().map(Vec::len).sum();
        tracing::warn!(orphans, "skipping records whose parent is missing");
    }
    Ok(tree)
}

fn prepare_connection(conn: &Connection, options: &VaultOptions) -> StoreResult<()> {
    conn.set_db_config(DbConfig::SQLITE_DBCONFIG_ENABLE_FKEY, true)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(
        None,
        "wal_autocheckpoint",
        options.wal_autocheckpoint.to_string(),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use tempfile::TempDir;

    fn init_vault() -> anyhow::Result<(TempDir, PathBuf, SqliteStore)> {
        let temp = TempDir::new()?;
        let path = temp.path().join("data").join("vault.db");
        let store = SqliteStore::create(&path, &VaultOptions::default(), "Root")?;
        Ok((temp, path, store))
    }

    #[test]
    fn created_vault_opens_with_a_bare_root() -> anyhow::Result<()> {
        let (_temp, path, mut store) = init_vault()?;
        let tree = store.open(&path)?;
        assert_eq!(tree.root(), DEFAULT_ROOT_ID);
        assert!(tree.is_empty());
        Ok(())
    }

    #[test]
    fn persisted_mutations_survive_reopen() -> anyhow::Result<()> {
        let (_temp, path, mut store) = init_vault()?;
        let mut tree = store.open(&path)?;
        let email = tree.insert(tree.root(), ItemKind::Group, "Email", "")?;
        store.insert(&email)?;
        let login = tree.insert(email.id, ItemKind::Entry, "webmail", "alice")?;
        store.insert(&login)?;
        let bank = tree.insert(tree.root(), ItemKind::Group, "Bank", "")?;
        store.insert(&bank)?;
        store.rename(login.id, "Webmail", "bob")?;

        let reopened = SqliteStore::new(&VaultOptions::default()).open(&path)?;
        let titles: Vec<_> = reopened
            .master_groups()
            .iter()
            .map(|r| r.title.clone())
            .collect();
        assert_eq!(titles, vec!["Email", "Bank"]);
        let entry = reopened.get(login.id).expect("entry persisted");
        assert_eq!(entry.title, "Webmail");
        assert_eq!(entry.subtitle, "bob");
        Ok(())
    }

    #[test]
    fn deleting_a_group_cascades() -> anyhow::Result<()> {
        let (_temp, path, mut store) = init_vault()?;
        let mut tree = store.open(&path)?;
        let group = tree.insert(tree.root(), ItemKind::Group, "Old", "")?;
        store.insert(&group)?;
        let entry = tree.insert(group.id, ItemKind::Entry, "stale", "")?;
        store.insert(&entry)?;

        store.delete(group.id)?;
        let reopened = store.open(&path)?;
        assert!(!reopened.contains(group.id));
        assert!(!reopened.contains(entry.id));
        Ok(())
    }

    #[test]
    fn missing_file_is_reported() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let mut store = SqliteStore::new(&VaultOptions::default());
        let path = temp.path().join("nope.db");
        assert_matches!(store.open(&path), Err(StoreError::Missing(p)) if p == path);
        Ok(())
    }

    #[test]
    fn foreign_database_is_rejected() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let path = temp.path().join("other.db");
        Connection::open(&path)?.execute_batch("CREATE TABLE notes (id INTEGER);")?;
        let mut store = SqliteStore::new(&VaultOptions::default());
        assert_matches!(store.open(&path), Err(StoreError::Corrupt(_)));
        assert!(store.location().is_none());
        Ok(())
    }

    #[test]
    fn failed_reopen_keeps_the_current_vault() -> anyhow::Result<()> {
        let (temp, path, mut store) = init_vault()?;
        let mut tree = store.open(&path)?;
        let foreign = temp.path().join("other.db");
        Connection::open(&foreign)?.execute_batch("CREATE TABLE notes (id INTEGER);")?;

        assert_matches!(store.open(&foreign), Err(StoreError::Corrupt(_)));
        assert_matches!(store.open(&temp.path().join("gone.db")), Err(StoreError::Missing(_)));
        assert_eq!(store.location(), Some(path.as_path()));

        let group = tree.insert(tree.root(), ItemKind::Group, "Email", "")?;
        store.insert(&group)?;
        assert!(store.open(&path)?.contains(group.id));
        Ok(())
    }

    #[test]
    fn renaming_unknown_record_fails() -> anyhow::Result<()> {
        let (_temp, path, mut store) = init_vault()?;
        store.open(&path)?;
        assert_matches!(store.rename(999, "x", ""), Err(StoreError::Corrupt(_)));
        Ok(())
    }
}
