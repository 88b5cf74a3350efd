/// Idempotent schema for the entity store.
///
/// Main storage is `object` + `causal` (+ `causal_parent` edges); everything
/// else is the temp staging area for partially received sub-DAGs. A hash is
/// never present in both main and temp.
pub(crate) const SCHEMA: &str = r#"
  CREATE TABLE IF NOT EXISTS object (
    hash            BLOB PRIMARY KEY,
    kind            INTEGER NOT NULL,
    data            BLOB NOT NULL
  );

  CREATE TABLE IF NOT EXISTS causal (
    hash            BLOB PRIMARY KEY,
    namespace_hash  BLOB NOT NULL
  );

  CREATE TABLE IF NOT EXISTS causal_parent (
    causal_hash     BLOB NOT NULL,
    parent_hash     BLOB NOT NULL,

    PRIMARY KEY (causal_hash, parent_hash)
  );

  -- Entities whose dependencies have not all reached main storage yet. The
  -- payload keeps its wire form, dependency JWTs included, so a row can be
  -- re-elaborated after a crash.
  CREATE TABLE IF NOT EXISTS temp_entity (
    hash            BLOB PRIMARY KEY,
    data            BLOB NOT NULL
  );

  CREATE TABLE IF NOT EXISTS temp_entity_missing_dependency (
    dependent       BLOB NOT NULL,
    dependency      BLOB NOT NULL,
    dependency_jwt  TEXT NOT NULL,

    PRIMARY KEY (dependent, dependency)
  );

  CREATE INDEX IF NOT EXISTS temp_entity_missing_dependency_by_dependency
    ON temp_entity_missing_dependency (dependency);
"#;
