//! The content-addressed entity store.
//!
//! Entities live in exactly one of two places: **main** storage (`object` and
//! `causal` tables), which is closed under dependencies (every dependency of
//! a main entity is itself in main), or the **temp** staging area, which holds
//! entities downloaded before all of their dependencies. Promotion from temp
//! to main happens automatically as the last missing dependency lands.

use rusqlite::OptionalExtension;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use skein_client::{CausalEntity, CausalHash, Entity, Hash32, HashJwt};

mod connection;
mod schema;

use connection::Db;

#[derive(Debug, Error)]
pub enum Error {
  #[error("Connection closed error")]
  ConnectionClosed,

  #[error("Rusqlite error: {0}")]
  Rusqlite(#[from] rusqlite::Error),

  #[error("Serialization error: {0}")]
  Serialization(#[from] serde_json::Error),

  /// A dependency reference whose embedded hash cannot be extracted.
  #[error("Token error: {0}")]
  Token(skein_client::Error),

  #[error("Stored hash is not 32 bytes")]
  CorruptHash,

  #[error("Entity not found: {0}")]
  EntityNotFound(Hash32),
}

/// Where a hash currently lives. Absence is `None` at the query layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Location {
  Main,
  Temp,
}

/// One exclusive connection to the store. Not cloneable: workers that need
/// their own connection open another `Store` on the same database file.
pub struct Store {
  db: Db,
}

impl Store {
  pub fn open(path: impl AsRef<Path>) -> Result<Store, Error> {
    let conn = rusqlite::Connection::open(path)?;
    conn.busy_timeout(Duration::from_secs(5))?;
    let _: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.execute_batch(schema::SCHEMA)?;
    return Ok(Store {
      db: Db::spawn(conn),
    });
  }

  pub fn open_in_memory() -> Result<Store, Error> {
    let conn = rusqlite::Connection::open_in_memory()?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.execute_batch(schema::SCHEMA)?;
    return Ok(Store {
      db: Db::spawn(conn),
    });
  }

  /// Run `f` inside a single transaction. Related mutations must share one
  /// transaction so observers never see a partial batch.
  pub async fn transaction<F, R>(&self, f: F) -> Result<R, Error>
  where
    F: FnOnce(&StoreTx<'_>) -> Result<R, Error> + Send + 'static,
    R: Send + 'static,
  {
    return self
      .db
      .call(move |conn| {
        let tx = StoreTx {
          tx: conn.transaction()?,
        };
        let result = f(&tx)?;
        tx.tx.commit()?;
        return Ok(result);
      })
      .await;
  }
}

/// Entity operations scoped to one open transaction.
pub struct StoreTx<'conn> {
  tx: rusqlite::Transaction<'conn>,
}

impl StoreTx<'_> {
  pub fn entity_location(&self, hash: Hash32) -> Result<Option<Location>, Error> {
    if self.entity_exists(hash)? {
      return Ok(Some(Location::Main));
    }
    let temp = self
      .tx
      .prepare_cached("SELECT 1 FROM temp_entity WHERE hash = ?1")?
      .query_row([hash.as_bytes()], |_| Ok(()))
      .optional()?;
    return Ok(temp.map(|_| Location::Temp));
  }

  /// Whether `hash` is in main storage. Temp rows do not count: an entity
  /// may not lean on a dependency that has not itself been promoted.
  pub fn entity_exists(&self, hash: Hash32) -> Result<bool, Error> {
    let object = self
      .tx
      .prepare_cached("SELECT 1 FROM object WHERE hash = ?1")?
      .query_row([hash.as_bytes()], |_| Ok(()))
      .optional()?;
    if object.is_some() {
      return Ok(true);
    }
    let causal = self
      .tx
      .prepare_cached("SELECT 1 FROM causal WHERE hash = ?1")?
      .query_row([hash.as_bytes()], |_| Ok(()))
      .optional()?;
    return Ok(causal.is_some());
  }

  /// Load an entity from main or temp storage, with dependency references
  /// reduced to bare hashes.
  pub fn expect_entity(&self, hash: Hash32) -> Result<Entity<Hash32>, Error> {
    let object: Option<Vec<u8>> = self
      .tx
      .prepare_cached("SELECT data FROM object WHERE hash = ?1")?
      .query_row([hash.as_bytes()], |row| row.get(0))
      .optional()?;
    if let Some(data) = object {
      return Ok(serde_json::from_slice(&data)?);
    }

    let namespace: Option<Vec<u8>> = self
      .tx
      .prepare_cached("SELECT namespace_hash FROM causal WHERE hash = ?1")?
      .query_row([hash.as_bytes()], |row| row.get(0))
      .optional()?;
    if let Some(namespace) = namespace {
      return Ok(Entity::Causal(CausalEntity {
        namespace: Hash32::from_slice(&namespace).map_err(|_| Error::CorruptHash)?,
        parents: self
          .causal_parents(CausalHash(hash))?
          .into_iter()
          .map(|parent| parent.0)
          .collect(),
      }));
    }

    let temp: Option<Vec<u8>> = self
      .tx
      .prepare_cached("SELECT data FROM temp_entity WHERE hash = ?1")?
      .query_row([hash.as_bytes()], |row| row.get(0))
      .optional()?;
    if let Some(data) = temp {
      let entity: Entity<HashJwt> = serde_json::from_slice(&data)?;
      return entity.map_refs(|jwt| jwt.hash()).map_err(Error::Token);
    }

    return Err(Error::EntityNotFound(hash));
  }

  /// Parents of a locally stored causal; empty for roots and unknown hashes.
  pub fn causal_parents(&self, causal: CausalHash) -> Result<Vec<CausalHash>, Error> {
    let mut stmt = self.tx.prepare_cached(
      "SELECT parent_hash FROM causal_parent WHERE causal_hash = ?1 ORDER BY parent_hash",
    )?;
    let mut rows = stmt.query([causal.0.as_bytes()])?;

    let mut parents = vec![];
    while let Some(row) = rows.next()? {
      let bytes: Vec<u8> = row.get(0)?;
      parents.push(CausalHash(
        Hash32::from_slice(&bytes).map_err(|_| Error::CorruptHash)?,
      ));
    }
    return Ok(parents);
  }

  /// The promotion rule. Entities already present anywhere are left alone;
  /// otherwise the entity goes to main when every dependency is already in
  /// main, and to temp (with its missing dependencies recorded) when not.
  pub fn upsert_entity(&self, hash: Hash32, entity: Entity<HashJwt>) -> Result<Location, Error> {
    if let Some(location) = self.entity_location(hash)? {
      return Ok(location);
    }

    let mut missing: BTreeMap<Hash32, HashJwt> = BTreeMap::new();
    for jwt in entity.dependencies() {
      let dep = jwt.hash().map_err(Error::Token)?;
      if !self.entity_exists(dep)? {
        missing.insert(dep, jwt.clone());
      }
    }

    if missing.is_empty() {
      let entity = entity.map_refs(|jwt| jwt.hash()).map_err(Error::Token)?;
      self.save_entity_in_main(hash, &entity)?;
      return Ok(Location::Main);
    }

    self.insert_temp_entity(hash, &entity, &missing)?;
    return Ok(Location::Temp);
  }

  /// Write an entity whose dependencies are all in main, then promote any
  /// temp entities that were only waiting on it.
  pub fn save_entity_in_main(&self, hash: Hash32, entity: &Entity<Hash32>) -> Result<(), Error> {
    match entity {
      Entity::Causal(causal) => {
        self
          .tx
          .prepare_cached("INSERT OR IGNORE INTO causal (hash, namespace_hash) VALUES (?1, ?2)")?
          .execute((hash.as_bytes(), causal.namespace.as_bytes()))?;
        for parent in &causal.parents {
          self
            .tx
            .prepare_cached(
              "INSERT OR IGNORE INTO causal_parent (causal_hash, parent_hash) VALUES (?1, ?2)",
            )?
            .execute((hash.as_bytes(), parent.as_bytes()))?;
        }
      }
      Entity::Object(object) => {
        self
          .tx
          .prepare_cached("INSERT OR IGNORE INTO object (hash, kind, data) VALUES (?1, ?2, ?3)")?
          .execute((
            hash.as_bytes(),
            kind_code(object.kind),
            serde_json::to_vec(entity)?,
          ))?;
      }
    }

    return self.flush_temp_dependents(hash);
  }

  /// Stage an entity whose dependency set is not fully in main.
  pub fn insert_temp_entity(
    &self,
    hash: Hash32,
    entity: &Entity<HashJwt>,
    missing: &BTreeMap<Hash32, HashJwt>,
  ) -> Result<(), Error> {
    self
      .tx
      .prepare_cached("INSERT OR IGNORE INTO temp_entity (hash, data) VALUES (?1, ?2)")?
      .execute((hash.as_bytes(), serde_json::to_vec(entity)?))?;

    for (dep, jwt) in missing {
      self
        .tx
        .prepare_cached(
          "INSERT OR IGNORE INTO temp_entity_missing_dependency \
           (dependent, dependency, dependency_jwt) VALUES (?1, ?2, ?3)",
        )?
        .execute((hash.as_bytes(), dep.as_bytes(), jwt.as_str()))?;
    }
    return Ok(());
  }

  /// Given hashes that just landed in temp, return the dependency JWTs that
  /// are still absent everywhere. Dependencies that are themselves in temp
  /// need no download; their own missing dependencies are walked instead, so
  /// a pull can resume from temp rows left by an earlier interrupted run.
  pub fn elaborate_hashes(&self, hashes: &[Hash32]) -> Result<Vec<HashJwt>, Error> {
    let mut absent: BTreeSet<HashJwt> = BTreeSet::new();
    let mut seen: HashSet<Hash32> = hashes.iter().copied().collect();
    let mut worklist: Vec<Hash32> = hashes.to_vec();

    while let Some(hash) = worklist.pop() {
      for (dep, jwt) in self.missing_dependencies(hash)? {
        match self.entity_location(dep)? {
          Some(Location::Main) => {}
          Some(Location::Temp) => {
            if seen.insert(dep) {
              worklist.push(dep);
            }
          }
          None => {
            absent.insert(jwt);
          }
        }
      }
    }

    return Ok(absent.into_iter().collect());
  }

  fn missing_dependencies(&self, dependent: Hash32) -> Result<Vec<(Hash32, HashJwt)>, Error> {
    let mut stmt = self.tx.prepare_cached(
      "SELECT dependency, dependency_jwt FROM temp_entity_missing_dependency WHERE dependent = ?1",
    )?;
    let mut rows = stmt.query([dependent.as_bytes()])?;

    let mut missing = vec![];
    while let Some(row) = rows.next()? {
      let bytes: Vec<u8> = row.get(0)?;
      let jwt: String = row.get(1)?;
      missing.push((
        Hash32::from_slice(&bytes).map_err(|_| Error::CorruptHash)?,
        HashJwt::new(jwt),
      ));
    }
    return Ok(missing);
  }

  fn flush_temp_dependents(&self, dependency: Hash32) -> Result<(), Error> {
    let dependents: Vec<Hash32> = {
      let mut stmt = self.tx.prepare_cached(
        "SELECT dependent FROM temp_entity_missing_dependency WHERE dependency = ?1",
      )?;
      let mut rows = stmt.query([dependency.as_bytes()])?;

      let mut dependents = vec![];
      while let Some(row) = rows.next()? {
        let bytes: Vec<u8> = row.get(0)?;
        dependents.push(Hash32::from_slice(&bytes).map_err(|_| Error::CorruptHash)?);
      }
      dependents
    };

    if dependents.is_empty() {
      return Ok(());
    }

    self
      .tx
      .prepare_cached("DELETE FROM temp_entity_missing_dependency WHERE dependency = ?1")?
      .execute([dependency.as_bytes()])?;

    for dependent in dependents {
      let remaining: i64 = self
        .tx
        .prepare_cached(
          "SELECT COUNT(*) FROM temp_entity_missing_dependency WHERE dependent = ?1",
        )?
        .query_row([dependent.as_bytes()], |row| row.get(0))?;
      if remaining > 0 {
        continue;
      }

      let data: Vec<u8> = self
        .tx
        .prepare_cached("SELECT data FROM temp_entity WHERE hash = ?1")?
        .query_row([dependent.as_bytes()], |row| row.get(0))?;
      self
        .tx
        .prepare_cached("DELETE FROM temp_entity WHERE hash = ?1")?
        .execute([dependent.as_bytes()])?;

      let entity: Entity<HashJwt> = serde_json::from_slice(&data)?;
      let entity = entity.map_refs(|jwt| jwt.hash()).map_err(Error::Token)?;
      self.save_entity_in_main(dependent, &entity)?;
    }

    return Ok(());
  }
}

fn kind_code(kind: skein_client::ObjectKind) -> i64 {
  use skein_client::ObjectKind;
  return match kind {
    ObjectKind::Namespace => 0,
    ObjectKind::Term => 1,
    ObjectKind::Type => 2,
    ObjectKind::Patch => 3,
    ObjectKind::Bytes => 4,
  };
}

#[cfg(test)]
#[path = "tests.rs"]
mod tests;
