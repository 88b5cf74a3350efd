//! The concurrent pull pipeline.
//!
//! Four cooperating roles move entities from the server into main storage:
//!
//! - a **dispatcher** that peels batches off the discovered set and spawns
//!   downloaders, or exits once the whole system is quiescent;
//! - up to [`MAX_SIMULTANEOUS_PULL_DOWNLOADERS`] **downloaders**, each
//!   fetching one batch;
//! - an **inserter** feeding downloaded batches through the promotion rule,
//!   one transaction per batch;
//! - an **elaborator** turning freshly staged temp entities into the next
//!   round of hashes to download.
//!
//! All shared state sits behind a single mutex, so dispatching a worker and
//! deciding to terminate are mutually exclusive atomic steps; wakeups go
//! through one [`Notify`]. The inserter and elaborator count as workers only
//! while they hold a unit of work, which is what makes `workers == 0` (plus
//! empty queues) a faithful quiescence test.

use log::*;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::pin::pin;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::task::JoinSet;

use skein_client::{
  CausalHash, DownloadEntitiesRequest, Entity, GetCausalHashByPathRequest,
  GetCausalHashByPathResponse, Hash32, HashJwt, MAX_ENTITY_BATCH, RepoName, SharePath,
};

use crate::progress::PullProgress;
use crate::store::{self, Location, Store};
use crate::transport::SyncServer;
use crate::{ConnectFn, MAX_SIMULTANEOUS_PULL_DOWNLOADERS, client};

/// Cap on dependent workers: the downloaders plus the inserter and the
/// elaborator while they are busy. The dispatcher itself is not counted.
const MAX_PULL_WORKERS: usize = MAX_SIMULTANEOUS_PULL_DOWNLOADERS + 2;

#[derive(Debug, Error)]
pub enum PullError {
  #[error("No history at {0}")]
  NoHistoryAtPath(SharePath),

  #[error("No read permission for {0}")]
  NoReadPermission(SharePath),

  #[error("Transport error: {0}")]
  Transport(#[from] client::Error),

  #[error("Store error: {0}")]
  Store(#[from] store::Error),
}

/// Download the causal at `path` and every transitively required entity,
/// returning the head hash once it (and its whole dependency DAG) is in main
/// storage.
///
/// Entities committed before a failure stay put, in main or temp, so a
/// subsequent pull resumes instead of starting over.
pub async fn pull(
  server: Arc<dyn SyncServer>,
  connect: &ConnectFn,
  path: &SharePath,
  progress: &PullProgress,
) -> Result<CausalHash, PullError> {
  let request = GetCausalHashByPathRequest { path: path.clone() };
  let head_jwt = match server.get_causal_hash_by_path(request).await? {
    GetCausalHashByPathResponse::NoReadPermission(path) => {
      return Err(PullError::NoReadPermission(path));
    }
    GetCausalHashByPathResponse::Success(None) => {
      return Err(PullError::NoHistoryAtPath(path.clone()));
    }
    GetCausalHashByPathResponse::Success(Some(jwt)) => jwt,
  };
  let head = CausalHash(head_jwt.hash()?);

  let store = connect()?;
  let location = store
    .transaction(move |tx| tx.entity_location(head.0))
    .await?;

  let seed: Vec<Hash32> = match location {
    Some(Location::Main) => return Ok(head),
    // A previous interrupted pull left the head staged; elaborating it will
    // rediscover everything still missing underneath.
    Some(Location::Temp) => vec![head.0],
    None => {
      (progress.on_queued_for_download)(1);
      let request = DownloadEntitiesRequest {
        repo: path.repo.clone(),
        hashes: BTreeSet::from([head_jwt]),
      };
      let response = server.download_entities(request).await?;
      (progress.on_downloaded)(1);

      store
        .transaction(move |tx| {
          let mut staged = vec![];
          for (hash, entity) in response.entities {
            if tx.upsert_entity(hash, entity)? == Location::Temp {
              staged.push(hash);
            }
          }
          return Ok(staged);
        })
        .await?
    }
  };
  drop(store);

  if !seed.is_empty() {
    run_pipeline(server, connect, path.repo.clone(), seed, progress).await?;
  }
  return Ok(head);
}

struct PipelineState {
  /// Discovered, not yet committed to a downloader.
  to_download: BTreeSet<HashJwt>,
  /// Committed to a downloader or sitting in `downloaded` awaiting insert.
  /// Keeps the elaborator from re-queuing entities already being processed.
  in_flight: HashSet<HashJwt>,
  downloaded: VecDeque<(Vec<HashJwt>, BTreeMap<Hash32, Entity<HashJwt>>)>,
  /// Hashes that just landed in temp, awaiting elaboration.
  new_temp: VecDeque<Vec<Hash32>>,
  /// Live downloaders, plus the inserter/elaborator while they hold work.
  workers: usize,
  done: bool,
  failed: Option<PullError>,
}

struct Pipeline {
  state: Mutex<PipelineState>,
  notify: Notify,
}

impl Pipeline {
  fn fail(&self, err: PullError) {
    let mut state = self.state.lock();
    state.failed.get_or_insert(err);
    state.workers -= 1;
    self.notify.notify_waiters();
  }
}

enum DispatchStep {
  Spawn(Vec<HashJwt>),
  Exit,
  Wait,
}

async fn run_pipeline(
  server: Arc<dyn SyncServer>,
  connect: &ConnectFn,
  repo: RepoName,
  seed: Vec<Hash32>,
  progress: &PullProgress,
) -> Result<(), PullError> {
  let pipeline = Arc::new(Pipeline {
    state: Mutex::new(PipelineState {
      to_download: BTreeSet::new(),
      in_flight: HashSet::new(),
      downloaded: VecDeque::new(),
      new_temp: VecDeque::from([seed]),
      workers: 0,
      done: false,
      failed: None,
    }),
    notify: Notify::new(),
  });

  // Long-lived stages get their own connections; SQLite connections must not
  // be shared across threads.
  let inserter_store = connect()?;
  let elaborator_store = connect()?;

  let mut tasks: JoinSet<()> = JoinSet::new();
  tasks.spawn(inserter(pipeline.clone(), inserter_store));
  tasks.spawn(elaborator(
    pipeline.clone(),
    elaborator_store,
    progress.on_queued_for_download.clone(),
  ));

  // Dispatcher. Dispatching a batch and deciding to exit happen under the
  // same lock as the state they inspect, so the pipeline cannot both launch
  // a worker and terminate in one step.
  loop {
    let mut notified = pin!(pipeline.notify.notified());
    let step = {
      let mut state = pipeline.state.lock();
      if state.failed.is_some() {
        state.done = true;
        DispatchStep::Exit
      } else if !state.to_download.is_empty() && state.workers < MAX_PULL_WORKERS {
        let batch: Vec<HashJwt> = state
          .to_download
          .iter()
          .take(MAX_ENTITY_BATCH)
          .cloned()
          .collect();
        for jwt in &batch {
          state.to_download.remove(jwt);
          state.in_flight.insert(jwt.clone());
        }
        state.workers += 1;
        DispatchStep::Spawn(batch)
      } else if state.workers == 0
        && state.downloaded.is_empty()
        && state.new_temp.is_empty()
        && state.to_download.is_empty()
      {
        state.done = true;
        DispatchStep::Exit
      } else {
        notified.as_mut().enable();
        DispatchStep::Wait
      }
    };

    match step {
      DispatchStep::Spawn(batch) => {
        tasks.spawn(downloader(
          pipeline.clone(),
          server.clone(),
          repo.clone(),
          batch,
          progress.on_downloaded.clone(),
        ));
      }
      DispatchStep::Exit => {
        pipeline.notify.notify_waiters();
        break;
      }
      DispatchStep::Wait => notified.await,
    }
  }

  // Scope boundary: every spawned role is joined before we report anything.
  while let Some(joined) = tasks.join_next().await {
    if let Err(err) = joined
      && err.is_panic()
    {
      std::panic::resume_unwind(err.into_panic());
    }
  }

  return match pipeline.state.lock().failed.take() {
    Some(err) => Err(err),
    None => Ok(()),
  };
}

async fn downloader(
  pipeline: Arc<Pipeline>,
  server: Arc<dyn SyncServer>,
  repo: RepoName,
  batch: Vec<HashJwt>,
  on_downloaded: Arc<dyn Fn(usize) + Send + Sync>,
) {
  let request = DownloadEntitiesRequest {
    repo,
    hashes: batch.iter().cloned().collect(),
  };

  match server.download_entities(request).await {
    Ok(response) => {
      on_downloaded(batch.len());
      let mut state = pipeline.state.lock();
      state.downloaded.push_back((batch, response.entities));
      state.workers -= 1;
      pipeline.notify.notify_waiters();
    }
    Err(err) => pipeline.fail(PullError::Transport(err)),
  }
}

async fn inserter(pipeline: Arc<Pipeline>, store: Store) {
  loop {
    let mut notified = pin!(pipeline.notify.notified());
    let work = {
      let mut state = pipeline.state.lock();
      if state.failed.is_some() || state.done {
        return;
      }
      match state.downloaded.pop_front() {
        Some(batch) => {
          state.workers += 1;
          Some(batch)
        }
        None => {
          notified.as_mut().enable();
          None
        }
      }
    };

    let Some((jwts, entities)) = work else {
      notified.await;
      continue;
    };

    let result = store
      .transaction(move |tx| {
        let mut staged = vec![];
        for (hash, entity) in entities {
          if tx.upsert_entity(hash, entity)? == Location::Temp {
            staged.push(hash);
          }
        }
        return Ok(staged);
      })
      .await;

    match result {
      Ok(staged) => {
        let mut state = pipeline.state.lock();
        // Only now, after the commit, may these leave the in-flight set;
        // earlier and the elaborator could schedule a duplicate download.
        for jwt in &jwts {
          state.in_flight.remove(jwt);
        }
        if !staged.is_empty() {
          state.new_temp.push_back(staged);
        }
        state.workers -= 1;
        pipeline.notify.notify_waiters();
      }
      Err(err) => pipeline.fail(PullError::Store(err)),
    }
  }
}

async fn elaborator(
  pipeline: Arc<Pipeline>,
  store: Store,
  on_queued_for_download: Arc<dyn Fn(usize) + Send + Sync>,
) {
  loop {
    let mut notified = pin!(pipeline.notify.notified());
    let work = {
      let mut state = pipeline.state.lock();
      if state.failed.is_some() || state.done {
        return;
      }
      match state.new_temp.pop_front() {
        Some(hashes) => {
          state.workers += 1;
          Some(hashes)
        }
        None => {
          notified.as_mut().enable();
          None
        }
      }
    };

    let Some(hashes) = work else {
      notified.await;
      continue;
    };

    let result = store
      .transaction(move |tx| tx.elaborate_hashes(&hashes))
      .await;

    match result {
      Ok(jwts) => {
        let growth = {
          let mut state = pipeline.state.lock();
          let before = state.to_download.len();
          for jwt in jwts {
            if !state.in_flight.contains(&jwt) {
              state.to_download.insert(jwt);
            }
          }
          let growth = state.to_download.len() - before;
          state.workers -= 1;
          pipeline.notify.notify_waiters();
          growth
        };
        if growth > 0 {
          trace!("elaboration queued {growth} new downloads");
          on_queued_for_download(growth);
        }
      }
      Err(err) => pipeline.fail(PullError::Store(err)),
    }
  }
}
