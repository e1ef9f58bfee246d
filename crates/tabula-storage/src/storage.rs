use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tabula_model::{
    Calculation, CalculationState, Dataset, DatasetId, DatasetState, GenerationId, Record, Schema,
};

use crate::error::{Result, StorageError};
use crate::schema;
use crate::store::{record_from_json, record_to_json, Store, StoredRow};

/// SQLite-backed [`Store`].
#[derive(Debug, Clone)]
pub struct Storage {
    conn: Arc<Mutex<Connection>>,
}

impl Storage {
    pub fn open_path(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    /// Open a SQLite URI, e.g. `file:shared?mode=memory&cache=shared` to share one in-memory
    /// database between handles.
    pub fn open_uri(uri: &str) -> Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_URI;
        let conn = Connection::open_with_flags(uri, flags)?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.busy_timeout(Duration::from_secs(5))?;
        schema::init(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

fn dataset_state_str(state: DatasetState) -> &'static str {
    match state {
        DatasetState::Pending => "pending",
        DatasetState::Ready => "ready",
    }
}

fn parse_dataset_state(raw: &str) -> Result<DatasetState> {
    match raw {
        "pending" => Ok(DatasetState::Pending),
        "ready" => Ok(DatasetState::Ready),
        other => Err(StorageError::Corrupt(format!("unknown dataset state {other:?}"))),
    }
}

fn parse_calculation_state(raw: &str) -> Result<CalculationState> {
    match raw {
        "pending" => Ok(CalculationState::Pending),
        "ready" => Ok(CalculationState::Ready),
        "failed" => Ok(CalculationState::Failed),
        other => Err(StorageError::Corrupt(format!(
            "unknown calculation state {other:?}"
        ))),
    }
}

fn count(n: i64) -> usize {
    usize::try_from(n).unwrap_or(0)
}

impl Store for Storage {
    fn put_dataset(&self, dataset: &Dataset) -> Result<()> {
        let schema = serde_json::to_value(&dataset.schema)?;
        let conn = self.conn.lock().expect("storage mutex poisoned");
        conn.execute(
            r#"
            INSERT INTO datasets (id, generation_id, state, row_count, column_count, schema)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(id) DO UPDATE SET
              generation_id = excluded.generation_id,
              state = excluded.state,
              row_count = excluded.row_count,
              column_count = excluded.column_count,
              schema = excluded.schema,
              modified_at = CURRENT_TIMESTAMP
            "#,
            params![
                dataset.id.as_str(),
                dataset.generation_id.as_str(),
                dataset_state_str(dataset.state),
                dataset.row_count as i64,
                dataset.column_count as i64,
                schema,
            ],
        )?;
        Ok(())
    }

    fn get_dataset(&self, id: &DatasetId) -> Result<Dataset> {
        let conn = self.conn.lock().expect("storage mutex poisoned");
        let row = conn
            .query_row(
                r#"
                SELECT generation_id, state, row_count, column_count, schema
                FROM datasets
                WHERE id = ?1
                "#,
                params![id.as_str()],
                |r| {
                    Ok((
                        r.get::<_, String>(0)?,
                        r.get::<_, String>(1)?,
                        r.get::<_, i64>(2)?,
                        r.get::<_, i64>(3)?,
                        r.get::<_, serde_json::Value>(4)?,
                    ))
                },
            )
            .optional()?;
        let Some((generation_id, state, row_count, column_count, schema)) = row else {
            return Err(StorageError::DatasetNotFound(id.clone()));
        };
        let schema: Schema = serde_json::from_value(schema)?;
        Ok(Dataset {
            id: id.clone(),
            schema,
            row_count: count(row_count),
            column_count: count(column_count),
            state: parse_dataset_state(&state)?,
            generation_id: GenerationId::from(generation_id),
        })
    }

    fn insert_rows(
        &self,
        dataset_id: &DatasetId,
        generation: &GenerationId,
        rows: &[Record],
    ) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.lock().expect("storage mutex poisoned");
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO observations (dataset_id, generation_id, data) VALUES (?1, ?2, ?3)",
            )?;
            for record in rows {
                stmt.execute(params![
                    dataset_id.as_str(),
                    generation.as_str(),
                    record_to_json(record)
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn load_rows(
        &self,
        dataset_id: &DatasetId,
        generation: &GenerationId,
    ) -> Result<Vec<StoredRow>> {
        let conn = self.conn.lock().expect("storage mutex poisoned");
        let mut stmt = conn.prepare_cached(
            r#"
            SELECT id, data
            FROM observations
            WHERE dataset_id = ?1 AND generation_id = ?2
            ORDER BY id
            "#,
        )?;
        let rows = stmt
            .query_map(params![dataset_id.as_str(), generation.as_str()], |r| {
                Ok((r.get::<_, i64>(0)?, r.get::<_, serde_json::Value>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(id, data)| {
                Ok(StoredRow {
                    id,
                    record: record_from_json(&data)?,
                })
            })
            .collect()
    }

    fn count_rows(&self, dataset_id: &DatasetId, generation: &GenerationId) -> Result<usize> {
        let conn = self.conn.lock().expect("storage mutex poisoned");
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM observations WHERE dataset_id = ?1 AND generation_id = ?2",
            params![dataset_id.as_str(), generation.as_str()],
            |r| r.get(0),
        )?;
        Ok(count(n))
    }

    fn update_rows(&self, dataset_id: &DatasetId, rows: &[StoredRow]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.lock().expect("storage mutex poisoned");
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "UPDATE observations SET data = ?1 WHERE id = ?2 AND dataset_id = ?3",
            )?;
            for row in rows {
                stmt.execute(params![
                    record_to_json(&row.record),
                    row.id,
                    dataset_id.as_str()
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn delete_rows(&self, dataset_id: &DatasetId, ids: &[i64]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.lock().expect("storage mutex poisoned");
        let tx = conn.transaction()?;
        let mut removed = 0;
        {
            let mut stmt =
                tx.prepare_cached("DELETE FROM observations WHERE id = ?1 AND dataset_id = ?2")?;
            for id in ids {
                removed += stmt.execute(params![id, dataset_id.as_str()])?;
            }
        }
        tx.commit()?;
        Ok(removed)
    }

    fn delete_generation(
        &self,
        dataset_id: &DatasetId,
        generation: &GenerationId,
    ) -> Result<usize> {
        let conn = self.conn.lock().expect("storage mutex poisoned");
        let removed = conn.execute(
            "DELETE FROM observations WHERE dataset_id = ?1 AND generation_id = ?2",
            params![dataset_id.as_str(), generation.as_str()],
        )?;
        Ok(removed)
    }

    fn delete_stale_rows(&self, dataset_id: &DatasetId, active: &GenerationId) -> Result<usize> {
        let conn = self.conn.lock().expect("storage mutex poisoned");
        let removed = conn.execute(
            "DELETE FROM observations WHERE dataset_id = ?1 AND generation_id != ?2",
            params![dataset_id.as_str(), active.as_str()],
        )?;
        Ok(removed)
    }

    fn delete_stale_summaries(&self, dataset_id: &DatasetId, active: &GenerationId) -> Result<usize> {
        let conn = self.conn.lock().expect("storage mutex poisoned");
        let removed = conn.execute(
            "DELETE FROM summaries WHERE dataset_id = ?1 AND generation_id != ?2",
            params![dataset_id.as_str(), active.as_str()],
        )?;
        Ok(removed)
    }

    fn insert_calculation(&self, calculation: &Calculation) -> Result<()> {
        let conn = self.conn.lock().expect("storage mutex poisoned");
        let inserted = conn.execute(
            r#"
            INSERT INTO calculations (dataset_id, name, group_name, formula, column_key, state)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                calculation.dataset_id.as_str(),
                &calculation.name,
                calculation.group.as_deref().unwrap_or(""),
                &calculation.formula,
                &calculation.column,
                calculation.state.as_str(),
            ],
        );
        match inserted {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
            {
                Err(StorageError::DuplicateCalculation {
                    dataset_id: calculation.dataset_id.clone(),
                    name: calculation.name.clone(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    fn update_calculation(&self, calculation: &Calculation) -> Result<()> {
        let conn = self.conn.lock().expect("storage mutex poisoned");
        let updated = conn.execute(
            r#"
            UPDATE calculations
            SET formula = ?4, column_key = ?5, state = ?6
            WHERE dataset_id = ?1 AND name = ?2 AND group_name = ?3
            "#,
            params![
                calculation.dataset_id.as_str(),
                &calculation.name,
                calculation.group.as_deref().unwrap_or(""),
                &calculation.formula,
                &calculation.column,
                calculation.state.as_str(),
            ],
        )?;
        if updated == 0 {
            return Err(StorageError::CalculationNotFound {
                dataset_id: calculation.dataset_id.clone(),
                name: calculation.name.clone(),
            });
        }
        Ok(())
    }

    fn delete_calculation(
        &self,
        dataset_id: &DatasetId,
        name: &str,
        group: Option<&str>,
    ) -> Result<()> {
        let conn = self.conn.lock().expect("storage mutex poisoned");
        let deleted = conn.execute(
            "DELETE FROM calculations WHERE dataset_id = ?1 AND name = ?2 AND group_name = ?3",
            params![dataset_id.as_str(), name, group.unwrap_or("")],
        )?;
        if deleted == 0 {
            return Err(StorageError::CalculationNotFound {
                dataset_id: dataset_id.clone(),
                name: name.to_string(),
            });
        }
        Ok(())
    }

    fn list_calculations(&self, dataset_id: &DatasetId) -> Result<Vec<Calculation>> {
        let conn = self.conn.lock().expect("storage mutex poisoned");
        let mut stmt = conn.prepare_cached(
            r#"
            SELECT name, group_name, formula, column_key, state
            FROM calculations
            WHERE dataset_id = ?1
            ORDER BY id
            "#,
        )?;
        let rows = stmt
            .query_map(params![dataset_id.as_str()], |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                    r.get::<_, String>(4)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(name, group, formula, column, state)| {
                Ok(Calculation {
                    dataset_id: dataset_id.clone(),
                    name,
                    formula,
                    group: (!group.is_empty()).then_some(group),
                    column,
                    state: parse_calculation_state(&state)?,
                })
            })
            .collect()
    }

    fn put_summary(
        &self,
        dataset_id: &DatasetId,
        generation: &GenerationId,
        summary: &serde_json::Value,
    ) -> Result<()> {
        let conn = self.conn.lock().expect("storage mutex poisoned");
        conn.execute(
            r#"
            INSERT INTO summaries (dataset_id, generation_id, data)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(dataset_id, generation_id) DO UPDATE SET data = excluded.data
            "#,
            params![dataset_id.as_str(), generation.as_str(), summary],
        )?;
        Ok(())
    }

    fn get_summary(
        &self,
        dataset_id: &DatasetId,
        generation: &GenerationId,
    ) -> Result<Option<serde_json::Value>> {
        let conn = self.conn.lock().expect("storage mutex poisoned");
        let summary = conn
            .query_row(
                "SELECT data FROM summaries WHERE dataset_id = ?1 AND generation_id = ?2",
                params![dataset_id.as_str(), generation.as_str()],
                |r| r.get::<_, serde_json::Value>(0),
            )
            .optional()?;
        Ok(summary)
    }
}
