use rusqlite::Connection;

pub(crate) fn init(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "foreign_keys", "ON")?;

    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS datasets (
          id TEXT PRIMARY KEY,
          generation_id TEXT NOT NULL,
          state TEXT NOT NULL CHECK (state IN ('pending','ready')),
          row_count INTEGER NOT NULL DEFAULT 0,
          column_count INTEGER NOT NULL DEFAULT 0,
          schema JSON NOT NULL,
          created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
          modified_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        );

        -- Rows are logically deleted once their generation is no longer the
        -- dataset's active one; `purge` removes them physically.
        CREATE TABLE IF NOT EXISTS observations (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          dataset_id TEXT NOT NULL REFERENCES datasets(id) ON DELETE CASCADE,
          generation_id TEXT NOT NULL,
          data JSON NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_observations_generation
          ON observations(dataset_id, generation_id);

        -- `group_name` is '' for ungrouped calculations so the UNIQUE
        -- constraint also covers them.
        CREATE TABLE IF NOT EXISTS calculations (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          dataset_id TEXT NOT NULL REFERENCES datasets(id) ON DELETE CASCADE,
          name TEXT NOT NULL,
          group_name TEXT NOT NULL DEFAULT '',
          formula TEXT NOT NULL,
          column_key TEXT NOT NULL,
          state TEXT NOT NULL CHECK (state IN ('pending','ready','failed')),
          UNIQUE (dataset_id, name, group_name)
        );

        CREATE TABLE IF NOT EXISTS summaries (
          dataset_id TEXT NOT NULL REFERENCES datasets(id) ON DELETE CASCADE,
          generation_id TEXT NOT NULL,
          data JSON NOT NULL,
          PRIMARY KEY (dataset_id, generation_id)
        );
        "#,
    )?;

    Ok(())
}
