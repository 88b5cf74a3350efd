//! Breadth-first search over the local causal parent DAG.

use std::collections::{HashSet, VecDeque};

use skein_client::CausalHash;

use crate::store::{self, Store, StoreTx};

/// Find the chain of causals strictly between `earlier` and `later`.
///
/// Returns `Some(chain)`, oldest first and excluding both endpoints, when
/// `earlier` is reachable from `later` along parent edges; `Some([])` when
/// the endpoints are equal or directly related; `None` when `earlier` is not
/// an ancestor of `later`.
///
/// The whole search runs in one read transaction so it sees a consistent
/// parent relation.
pub async fn causal_spine_between(
  store: &Store,
  earlier: CausalHash,
  later: CausalHash,
) -> Result<Option<Vec<CausalHash>>, store::Error> {
  return store
    .transaction(move |tx| spine_between(tx, earlier, later))
    .await;
}

/// BFS rather than DFS: causal graphs can be wide with merges, and a FIFO
/// frontier bounds the search depth to the true spine length, so the first
/// hit is a shortest chain.
pub(crate) fn spine_between(
  tx: &StoreTx<'_>,
  earlier: CausalHash,
  later: CausalHash,
) -> Result<Option<Vec<CausalHash>>, store::Error> {
  if earlier == later {
    return Ok(Some(vec![]));
  }

  let mut seen: HashSet<CausalHash> = HashSet::from([later]);
  // Paths of interior causals, newest first; the empty path stands for
  // `later` itself.
  let mut frontier: VecDeque<Vec<CausalHash>> = VecDeque::from([vec![]]);

  while let Some(path) = frontier.pop_front() {
    let node = path.last().copied().unwrap_or(later);
    for parent in tx.causal_parents(node)? {
      if parent == earlier {
        let mut interior = path;
        interior.reverse();
        return Ok(Some(interior));
      }
      if seen.insert(parent) {
        let mut next = path.clone();
        next.push(parent);
        frontier.push_back(next);
      }
    }
  }

  return Ok(None);
}
