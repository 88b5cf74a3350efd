use kanal::{Receiver, Sender};
use log::*;
use tokio::sync::oneshot;

use crate::store::Error;

type Job = Box<dyn FnOnce(&mut rusqlite::Connection) + Send + 'static>;

/// A handle calling functions on a rusqlite connection owned by a dedicated
/// background thread.
///
/// Every handle is one exclusive SQLite connection. Workers that need
/// isolation from each other open their own handle rather than sharing one;
/// closures sent through a single handle execute strictly in order.
///
/// The background thread exits (closing the connection) once every clone of
/// the handle has been dropped.
#[derive(Clone)]
pub(crate) struct Db {
  sender: Sender<Job>,
}

impl Db {
  pub(crate) fn spawn(conn: rusqlite::Connection) -> Db {
    let (sender, receiver) = kanal::unbounded::<Job>();

    std::thread::Builder::new()
      .name("skein-store".to_string())
      .spawn(move || event_loop(conn, receiver))
      .expect("startup");

    return Db { sender };
  }

  /// Run `function` on the background thread and return its result.
  ///
  /// # Failure
  ///
  /// Will return `Err` if the connection has been closed.
  pub(crate) async fn call<F, R>(&self, function: F) -> Result<R, Error>
  where
    F: FnOnce(&mut rusqlite::Connection) -> Result<R, Error> + Send + 'static,
    R: Send + 'static,
  {
    let (sender, receiver) = oneshot::channel::<Result<R, Error>>();

    self
      .sender
      .send(Box::new(move |conn| {
        if !sender.is_closed() {
          let _ = sender.send(function(conn));
        }
      }))
      .map_err(|_| Error::ConnectionClosed)?;

    receiver.await.map_err(|_| Error::ConnectionClosed)?
  }
}

fn event_loop(mut conn: rusqlite::Connection, receiver: Receiver<Job>) {
  while let Ok(job) = receiver.recv() {
    job(&mut conn);
  }

  if let Err((_, err)) = conn.close() {
    debug!("Closing connection: {err}");
  }
}
