use std::sync::Arc;

/// Download progress callbacks for a pull.
///
/// Callbacks fire from worker tasks and must not block for long; anything
/// expensive belongs on the far side of a channel.
#[derive(Clone)]
pub struct PullProgress {
  /// `n` entities were handed to a downloader and arrived.
  pub on_downloaded: Arc<dyn Fn(usize) + Send + Sync>,
  /// `n` newly discovered entities were queued for download.
  pub on_queued_for_download: Arc<dyn Fn(usize) + Send + Sync>,
}

impl PullProgress {
  /// Discard all progress reports.
  pub fn sink() -> Self {
    return Self {
      on_downloaded: Arc::new(|_| {}),
      on_queued_for_download: Arc::new(|_| {}),
    };
  }
}

/// Upload progress callback for a push: `(uploaded so far, remaining known
/// to need upload)`.
#[derive(Clone)]
pub struct PushProgress {
  pub on_progress: Arc<dyn Fn(usize, usize) + Send + Sync>,
}

impl PushProgress {
  pub fn sink() -> Self {
    return Self {
      on_progress: Arc::new(|_, _| {}),
    };
  }
}
