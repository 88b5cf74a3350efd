use std::collections::BTreeMap;

use super::{Error, Location, Store};
use skein_client::{CausalEntity, CausalHash, Entity, Hash32, HashJwt, ObjectEntity, ObjectKind};

fn hash(fill: u8) -> Hash32 {
  return Hash32::from_bytes([fill; 32]);
}

fn jwt(hash: Hash32) -> HashJwt {
  #[derive(serde::Serialize)]
  struct Claims {
    hash: Hash32,
  }

  let token = jsonwebtoken::encode(
    &jsonwebtoken::Header::new(jsonwebtoken::Algorithm::HS256),
    &Claims { hash },
    &jsonwebtoken::EncodingKey::from_secret(b"test-only"),
  )
  .expect("encode");
  return HashJwt::new(token);
}

fn causal(namespace: Hash32, parents: &[Hash32]) -> Entity<HashJwt> {
  return Entity::Causal(CausalEntity {
    namespace: jwt(namespace),
    parents: parents.iter().copied().map(jwt).collect(),
  });
}

fn object(deps: &[Hash32], body: &[u8]) -> Entity<HashJwt> {
  return Entity::Object(ObjectEntity {
    kind: ObjectKind::Term,
    dependencies: deps.iter().copied().map(jwt).collect(),
    body: body.to_vec(),
  });
}

async fn location(store: &Store, hash: Hash32) -> Option<Location> {
  return store
    .transaction(move |tx| tx.entity_location(hash))
    .await
    .expect("transaction");
}

#[tokio::test]
async fn entity_without_dependencies_goes_straight_to_main() {
  let store = Store::open_in_memory().expect("open");

  let leaf = hash(1);
  let landed = store
    .transaction(move |tx| tx.upsert_entity(leaf, object(&[], b"leaf")))
    .await
    .expect("upsert");

  assert_eq!(landed, Location::Main);
  assert_eq!(location(&store, leaf).await, Some(Location::Main));
  assert_eq!(location(&store, hash(9)).await, None);
}

#[tokio::test]
async fn entity_with_absent_dependency_is_staged_in_temp() {
  let store = Store::open_in_memory().expect("open");

  let dependent = hash(1);
  let landed = store
    .transaction(move |tx| tx.upsert_entity(dependent, object(&[hash(2)], b"dependent")))
    .await
    .expect("upsert");

  assert_eq!(landed, Location::Temp);
  assert_eq!(location(&store, dependent).await, Some(Location::Temp));
}

#[tokio::test]
async fn promoting_a_dependency_flushes_the_whole_chain() {
  let store = Store::open_in_memory().expect("open");

  // a depends on b depends on c; downloaded newest-first.
  let (a, b, c) = (hash(1), hash(2), hash(3));
  let staged = store
    .transaction(move |tx| {
      return Ok((
        tx.upsert_entity(a, object(&[b], b"a"))?,
        tx.upsert_entity(b, object(&[c], b"b"))?,
      ));
    })
    .await
    .expect("stage");
  assert_eq!(staged, (Location::Temp, Location::Temp));

  // c arrives with nothing missing: b promotes, which promotes a.
  let landed = store
    .transaction(move |tx| tx.upsert_entity(c, object(&[], b"c")))
    .await
    .expect("flush");
  assert_eq!(landed, Location::Main);

  for h in [a, b, c] {
    assert_eq!(location(&store, h).await, Some(Location::Main));
  }
}

#[tokio::test]
async fn upsert_is_idempotent_for_resident_entities() {
  let store = Store::open_in_memory().expect("open");

  let leaf = hash(1);
  let staged = hash(2);
  let locations = store
    .transaction(move |tx| {
      let first = (
        tx.upsert_entity(leaf, object(&[], b"leaf"))?,
        tx.upsert_entity(staged, object(&[hash(9)], b"staged"))?,
      );
      // Replays report where the entity already is and change nothing.
      let replayed = (
        tx.upsert_entity(leaf, object(&[], b"leaf"))?,
        tx.upsert_entity(staged, object(&[hash(9)], b"staged"))?,
      );
      return Ok((first, replayed));
    })
    .await
    .expect("upsert");

  assert_eq!(
    locations,
    (
      (Location::Main, Location::Temp),
      (Location::Main, Location::Temp),
    )
  );
}

#[tokio::test]
async fn elaborate_walks_temp_dependencies_transitively() {
  let store = Store::open_in_memory().expect("open");

  // a (temp) misses b (temp), which misses c (absent). Elaborating a must
  // surface c's JWT and must not re-request b.
  let (a, b, c) = (hash(1), hash(2), hash(3));
  let absent = store
    .transaction(move |tx| {
      tx.upsert_entity(b, object(&[c], b"b"))?;
      tx.upsert_entity(a, object(&[b], b"a"))?;
      return tx.elaborate_hashes(&[a]);
    })
    .await
    .expect("elaborate");

  assert_eq!(absent, vec![jwt(c)]);
}

#[tokio::test]
async fn elaborate_only_reports_absent_dependencies() {
  let store = Store::open_in_memory().expect("open");

  let (resident, missing, dependent) = (hash(1), hash(2), hash(3));
  let absent = store
    .transaction(move |tx| {
      tx.upsert_entity(resident, object(&[], b"resident"))?;
      tx.upsert_entity(dependent, object(&[resident, missing], b"dependent"))?;
      return tx.elaborate_hashes(&[dependent]);
    })
    .await
    .expect("elaborate");

  assert_eq!(absent, vec![jwt(missing)]);
}

#[tokio::test]
async fn expect_entity_reads_back_main_temp_and_errors_on_absent() {
  let store = Store::open_in_memory().expect("open");

  let (ns, parent, head, staged) = (hash(1), hash(2), hash(3), hash(4));
  store
    .transaction(move |tx| {
      tx.upsert_entity(ns, object(&[], b"ns"))?;
      tx.upsert_entity(parent, causal(ns, &[]))?;
      tx.upsert_entity(head, causal(ns, &[parent]))?;
      tx.upsert_entity(staged, object(&[hash(9)], b"staged"))?;
      return Ok(());
    })
    .await
    .expect("populate");

  let (head_entity, staged_entity, absent) = store
    .transaction(move |tx| {
      let head_entity = tx.expect_entity(head)?;
      let staged_entity = tx.expect_entity(staged)?;
      let absent = tx.expect_entity(hash(9));
      return Ok((head_entity, staged_entity, absent));
    })
    .await
    .expect("read");

  assert_eq!(
    head_entity,
    Entity::Causal(CausalEntity {
      namespace: ns,
      parents: vec![parent],
    })
  );
  assert_eq!(
    staged_entity,
    Entity::Object(ObjectEntity {
      kind: ObjectKind::Term,
      dependencies: vec![hash(9)],
      body: b"staged".to_vec(),
    })
  );
  assert!(matches!(absent, Err(Error::EntityNotFound(_))));
}

#[tokio::test]
async fn causal_parents_of_roots_and_unknowns_are_empty() {
  let store = Store::open_in_memory().expect("open");

  let (ns, root, child) = (hash(1), hash(2), hash(3));
  let (root_parents, child_parents, unknown_parents) = store
    .transaction(move |tx| {
      tx.upsert_entity(ns, object(&[], b"ns"))?;
      tx.upsert_entity(root, causal(ns, &[]))?;
      tx.upsert_entity(child, causal(ns, &[root]))?;
      return Ok((
        tx.causal_parents(CausalHash(root))?,
        tx.causal_parents(CausalHash(child))?,
        tx.causal_parents(CausalHash(hash(9)))?,
      ));
    })
    .await
    .expect("parents");

  assert!(root_parents.is_empty());
  assert_eq!(child_parents, vec![CausalHash(root)]);
  assert!(unknown_parents.is_empty());
}

#[tokio::test]
async fn insert_temp_entity_records_missing_dependency_jwts() {
  let store = Store::open_in_memory().expect("open");

  let (dependent, dependency) = (hash(1), hash(2));
  let entity = object(&[dependency], b"dependent");
  let absent = store
    .transaction(move |tx| {
      let missing = BTreeMap::from([(dependency, jwt(dependency))]);
      tx.insert_temp_entity(dependent, &entity, &missing)?;
      return tx.elaborate_hashes(&[dependent]);
    })
    .await
    .expect("insert");

  assert_eq!(absent, vec![jwt(dependency)]);
}
