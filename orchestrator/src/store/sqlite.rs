use super::{ConfigStore, RunRecord, StoreError};
use chrono::{DateTime, SecondsFormat, Utc};
use common::model::configuration::{
    Configuration, RunStatus, SchemaField, SchemaMode, SourceReference, TargetReference,
};
use log::{debug, error, info};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::Mutex;

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS transfer_configs (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    sheet_url TEXT NOT NULL,
    sheet_tab_name TEXT,
    project_id TEXT NOT NULL,
    dataset_id TEXT NOT NULL,
    table_id TEXT NOT NULL,
    schema_mode TEXT NOT NULL DEFAULT 'auto_detect',
    schema_definition TEXT,
    is_active INTEGER NOT NULL DEFAULT 1,
    run_frequency_hours INTEGER NOT NULL DEFAULT 24,
    last_run TEXT,
    status TEXT,
    last_error TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
)";

const SELECT_COLUMNS: &str = "SELECT id, name, sheet_url, sheet_tab_name, project_id, dataset_id,
    table_id, schema_mode, schema_definition, is_active, run_frequency_hours, last_run, status,
    last_error, created_at, updated_at FROM transfer_configs";

/// Columns exactly as stored; converted to a `Configuration` outside the rusqlite callback.
struct RawRow {
    id: i64,
    name: String,
    sheet_url: String,
    sheet_tab_name: Option<String>,
    project_id: String,
    dataset_id: String,
    table_id: String,
    schema_mode: String,
    schema_definition: Option<String>,
    is_active: bool,
    run_frequency_hours: i64,
    last_run: Option<String>,
    status: Option<String>,
    last_error: Option<String>,
    created_at: String,
    updated_at: String,
}

impl RawRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            sheet_url: row.get(2)?,
            sheet_tab_name: row.get(3)?,
            project_id: row.get(4)?,
            dataset_id: row.get(5)?,
            table_id: row.get(6)?,
            schema_mode: row.get(7)?,
            schema_definition: row.get(8)?,
            is_active: row.get(9)?,
            run_frequency_hours: row.get(10)?,
            last_run: row.get(11)?,
            status: row.get(12)?,
            last_error: row.get(13)?,
            created_at: row.get(14)?,
            updated_at: row.get(15)?,
        })
    }

    fn into_configuration(self) -> Result<Configuration, StoreError> {
        let id = self.id;
        let corrupt = |what: &str| StoreError::Corrupt(format!("config {id}: {what}"));

        let schema_mode = SchemaMode::parse(&self.schema_mode)
            .ok_or_else(|| corrupt(&format!("unknown schema mode '{}'", self.schema_mode)))?;
        let schema_definition = match self.schema_definition.as_deref() {
            None | Some("") => None,
            Some(json) => Some(
                serde_json::from_str::<Vec<SchemaField>>(json)
                    .map_err(|e| corrupt(&format!("schema definition: {e}")))?,
            ),
        };
        let run_frequency_hours = u32::try_from(self.run_frequency_hours)
            .map_err(|_| corrupt("run frequency out of range"))?;
        let status = match self.status.as_deref() {
            None => None,
            Some(s) => Some(RunStatus::parse(s).ok_or_else(|| corrupt("unknown status"))?),
        };
        let last_run = match self.last_run.as_deref() {
            None => None,
            Some(text) => Some(parse_timestamp(text).ok_or_else(|| corrupt("last_run"))?),
        };

        Ok(Configuration {
            id,
            name: self.name,
            source_reference: SourceReference {
                sheet_url: self.sheet_url,
                tab_name: self.sheet_tab_name,
            },
            target_reference: TargetReference {
                project_id: self.project_id,
                dataset_id: self.dataset_id,
                table_id: self.table_id,
            },
            schema_mode,
            schema_definition,
            is_active: self.is_active,
            run_frequency_hours,
            last_run,
            status,
            last_error: self.last_error,
            created_at: parse_timestamp(&self.created_at).ok_or_else(|| corrupt("created_at"))?,
            updated_at: parse_timestamp(&self.updated_at).ok_or_else(|| corrupt("updated_at"))?,
        })
    }
}

/// Fixed-width RFC 3339 with nanoseconds, so stored values keep full precision
/// and compare correctly as text inside SQL.
fn format_timestamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Configuration store backed by a SQLite `transfer_configs` table.
pub struct SqliteConfigStore {
    conn: Mutex<Connection>,
}

impl SqliteConfigStore {
    /// Opens (or creates) the database file and ensures the table exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        info!("Opened configuration database at {}", path.display());
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute(CREATE_TABLE, [])?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn query(&self, sql: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Vec<Configuration>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(args, RawRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        // A row that cannot be decoded must not hide the healthy ones.
        let mut configs = Vec::with_capacity(rows.len());
        for row in rows {
            match row.into_configuration() {
                Ok(config) => configs.push(config),
                Err(e) => error!("Skipping unreadable configuration row: {}", e),
            }
        }
        Ok(configs)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Unavailable("database connection lock poisoned".to_string()))
    }
}

impl ConfigStore for SqliteConfigStore {
    fn list_active(&self) -> Result<Vec<Configuration>, StoreError> {
        self.query(&format!("{SELECT_COLUMNS} WHERE is_active = 1 ORDER BY id"), &[])
    }

    fn list_all(&self) -> Result<Vec<Configuration>, StoreError> {
        self.query(&format!("{SELECT_COLUMNS} ORDER BY id"), &[])
    }

    fn get(&self, id: i64) -> Result<Configuration, StoreError> {
        let raw = {
            let conn = self.lock()?;
            let mut stmt = conn.prepare(&format!("{SELECT_COLUMNS} WHERE id = ?1"))?;
            let raw = stmt.query_row(params![id], RawRow::from_row).optional()?;
            raw
        };
        raw.ok_or(StoreError::NotFound(id))?.into_configuration()
    }

    fn find_by_name(&self, name: &str) -> Result<Option<Configuration>, StoreError> {
        let mut found = self.query(
            &format!("{SELECT_COLUMNS} WHERE name = ?1 ORDER BY id LIMIT 1"),
            &[&name],
        )?;
        Ok(found.pop())
    }

    fn upsert(&self, config: &Configuration) -> Result<(), StoreError> {
        config.validate()?;
        let schema_definition = config
            .schema_definition
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;

        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO transfer_configs (id, name, sheet_url, sheet_tab_name,
                project_id, dataset_id, table_id, schema_mode, schema_definition, is_active,
                run_frequency_hours, last_run, status, last_error, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            params![
                config.id,
                config.name,
                config.source_reference.sheet_url,
                config.source_reference.tab_name,
                config.target_reference.project_id,
                config.target_reference.dataset_id,
                config.target_reference.table_id,
                config.schema_mode.as_str(),
                schema_definition,
                config.is_active,
                i64::from(config.run_frequency_hours),
                config.last_run.map(format_timestamp),
                config.status.map(|s| s.as_str()),
                config.last_error,
                format_timestamp(config.created_at),
                format_timestamp(config.updated_at),
            ],
        )?;
        Ok(())
    }

    fn mark_run(&self, id: i64, at: DateTime<Utc>, record: &RunRecord) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let at = format_timestamp(at);
        // One statement: the row is either fully updated or untouched, and an
        // older completion never overwrites a newer one.
        let changed = conn.execute(
            "UPDATE transfer_configs
             SET last_run = ?1, status = ?2, last_error = ?3
             WHERE id = ?4 AND (last_run IS NULL OR last_run <= ?1)",
            params![at, record.status.as_str(), record.error, id],
        )?;
        if changed == 0 {
            let exists = conn
                .query_row(
                    "SELECT 1 FROM transfer_configs WHERE id = ?1",
                    params![id],
                    |_| Ok(()),
                )
                .optional()?
                .is_some();
            if !exists {
                return Err(StoreError::NotFound(id));
            }
            debug!("Config {} already records a run newer than {}, outcome ignored", id, at);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn config(id: i64) -> Configuration {
        Configuration::new(
            id,
            format!("sheet-{id}"),
            SourceReference {
                sheet_url: format!("https://docs.google.com/spreadsheets/d/{id}/edit"),
                tab_name: Some("Data".to_string()),
            },
            TargetReference {
                project_id: "reporting".to_string(),
                dataset_id: "sheets".to_string(),
                table_id: format!("table_{id}"),
            },
            12,
            Utc.with_ymd_and_hms(2024, 3, 1, 8, 30, 0).unwrap(),
        )
    }

    #[test]
    fn upsert_then_get_preserves_fields() {
        let store = SqliteConfigStore::open_in_memory().unwrap();
        let mut c = config(4);
        c.schema_mode = SchemaMode::Custom;
        c.schema_definition = Some(vec![
            SchemaField::new("order_id", "INTEGER"),
            SchemaField::new("customer", "STRING"),
        ]);
        store.upsert(&c).unwrap();

        assert_eq!(store.get(4).unwrap(), c);
        assert_eq!(store.find_by_name("sheet-4").unwrap(), Some(c));
        assert_eq!(store.find_by_name("missing").unwrap(), None);
    }

    #[test]
    fn list_active_skips_inactive_rows() {
        let store = SqliteConfigStore::open_in_memory().unwrap();
        let mut inactive = config(2);
        inactive.is_active = false;
        store.upsert(&config(3)).unwrap();
        store.upsert(&inactive).unwrap();
        store.upsert(&config(1)).unwrap();

        let ids: Vec<i64> = store.list_active().unwrap().iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![1, 3]);
        assert_eq!(store.list_all().unwrap().len(), 3);
    }

    #[test]
    fn mark_run_latest_completion_wins() {
        let store = SqliteConfigStore::open_in_memory().unwrap();
        store.upsert(&config(1)).unwrap();
        let at = Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap();

        store.mark_run(1, at, &RunRecord::failed("sheet not shared")).unwrap();
        let stored = store.get(1).unwrap();
        assert_eq!(stored.last_run, Some(at));
        assert_eq!(stored.status, Some(RunStatus::Failed));
        assert_eq!(stored.last_error.as_deref(), Some("sheet not shared"));

        store
            .mark_run(1, at - Duration::minutes(30), &RunRecord::succeeded())
            .unwrap();
        let stored = store.get(1).unwrap();
        assert_eq!(stored.last_run, Some(at));
        assert_eq!(stored.status, Some(RunStatus::Failed));
        assert_eq!(stored.last_error.as_deref(), Some("sheet not shared"));

        store
            .mark_run(1, at + Duration::hours(12), &RunRecord::succeeded())
            .unwrap();
        let stored = store.get(1).unwrap();
        assert_eq!(stored.last_run, Some(at + Duration::hours(12)));
        assert_eq!(stored.status, Some(RunStatus::Succeeded));
        assert_eq!(stored.last_error, None);
    }

    #[test]
    fn mark_run_unknown_id_is_not_found() {
        let store = SqliteConfigStore::open_in_memory().unwrap();
        let err = store
            .mark_run(42, Utc::now(), &RunRecord::succeeded())
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(42)));
    }

    #[test]
    fn file_database_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("configs.sqlite");
        let at = Utc.with_ymd_and_hms(2024, 3, 5, 6, 0, 0).unwrap();
        {
            let store = SqliteConfigStore::open(&path).unwrap();
            store.upsert(&config(1)).unwrap();
            store.mark_run(1, at, &RunRecord::succeeded()).unwrap();
        }
        let reopened = SqliteConfigStore::open(&path).unwrap();
        assert_eq!(reopened.get(1).unwrap().last_run, Some(at));
    }

    #[test]
    fn unknown_schema_mode_is_corrupt() {
        let store = SqliteConfigStore::open_in_memory().unwrap();
        store.upsert(&config(1)).unwrap();
        store
            .lock()
            .unwrap()
            .execute("UPDATE transfer_configs SET schema_mode = 'guess' WHERE id = 1", [])
            .unwrap();
        assert!(matches!(store.get(1), Err(StoreError::Corrupt(_))));
    }

    #[test]
    fn unreadable_row_does_not_hide_healthy_rows() {
        let store = SqliteConfigStore::open_in_memory().unwrap();
        store.upsert(&config(1)).unwrap();
        store.upsert(&config(2)).unwrap();
        store.upsert(&config(3)).unwrap();
        store
            .lock()
            .unwrap()
            .execute(
                "UPDATE transfer_configs SET schema_definition = '{not json' WHERE id = 2",
                [],
            )
            .unwrap();

        let active: Vec<i64> = store.list_active().unwrap().iter().map(|c| c.id).collect();
        assert_eq!(active, vec![1, 3]);
        assert_eq!(store.list_all().unwrap().len(), 2);
    }

    #[test]
    fn timestamps_keep_full_precision() {
        let store = SqliteConfigStore::open_in_memory().unwrap();
        store.upsert(&config(1)).unwrap();
        let at = Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap()
            + Duration::nanoseconds(123_456_789);

        store.mark_run(1, at, &RunRecord::succeeded()).unwrap();
        assert_eq!(store.get(1).unwrap().last_run, Some(at));

        // Differs from `at` only below the millisecond.
        let slightly_earlier = at - Duration::nanoseconds(1_000);
        store
            .mark_run(1, slightly_earlier, &RunRecord::failed("older run"))
            .unwrap();
        assert_eq!(store.get(1).unwrap().status, Some(RunStatus::Succeeded));
    }

    #[test]
    fn get_unknown_id_is_not_found() {
        let store = SqliteConfigStore::open_in_memory().unwrap();
        assert!(matches!(store.get(5), Err(StoreError::NotFound(5))));
    }
}
