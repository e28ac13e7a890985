//! Serialized embedding service
//!
//! The embedder lives on one dedicated worker thread and serves requests from
//! a single FIFO queue. Callers on any thread block on their own reply
//! channel, so the embedder itself is never entered concurrently.

use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use tracing::{debug, info, warn};

use super::{normalize_text, Embedder, HashedEmbedder};
use crate::config::EmbeddingConfig;
use crate::error::EmbedError;

struct EmbedRequest {
    text: String,
    reply: mpsc::SyncSender<Result<Vec<f64>, EmbedError>>,
}

pub struct EmbeddingService {
    sender: Option<mpsc::Sender<EmbedRequest>>,
    worker: Option<JoinHandle<()>>,
    unavailable: Option<String>,
    dimensions: usize,
    max_chars: usize,
}

impl EmbeddingService {
    /// Start the worker and build the embedder on it.
    ///
    /// The factory runs on the worker thread, so embedders that must stay on
    /// the thread that created them are supported. A failing factory yields
    /// an unavailable service rather than an error.
    pub fn spawn<E, F>(config: &EmbeddingConfig, factory: F) -> Self
    where
        E: Embedder + 'static,
        F: FnOnce() -> Result<E, EmbedError> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<EmbedRequest>();
        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<usize, EmbedError>>(1);

        let spawned = thread::Builder::new()
            .name("embedding-worker".to_string())
            .spawn(move || {
                let mut embedder = match factory() {
                    Ok(embedder) => {
                        let _ = ready_tx.send(Ok(embedder.dimensions()));
                        embedder
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                for request in rx {
                    let result = embedder.embed(&request.text);
                    // Caller may have given up; nothing to do then.
                    let _ = request.reply.send(result);
                }
                debug!("embedding worker stopped");
            });

        let worker = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                return Self::unavailable(config, format!("failed to start worker: {}", e));
            }
        };

        match ready_rx.recv() {
            Ok(Ok(dimensions)) => {
                if dimensions != config.dimensions {
                    warn!(
                        configured = config.dimensions,
                        actual = dimensions,
                        "embedder width differs from configuration, using embedder width"
                    );
                }
                info!(dimensions, "embedding provider ready");
                Self {
                    sender: Some(tx),
                    worker: Some(worker),
                    unavailable: None,
                    dimensions,
                    max_chars: config.max_chars,
                }
            }
            Ok(Err(e)) => {
                let _ = worker.join();
                Self::unavailable(config, e.to_string())
            }
            Err(_) => {
                let _ = worker.join();
                Self::unavailable(config, "embedding worker exited during startup".to_string())
            }
        }
    }

    /// Service backed by the built-in [`HashedEmbedder`].
    pub fn hashed(config: &EmbeddingConfig) -> Self {
        let dimensions = config.dimensions;
        Self::spawn(config, move || HashedEmbedder::new(dimensions))
    }

    /// A service that reports itself unavailable on every call.
    pub fn unavailable(config: &EmbeddingConfig, reason: String) -> Self {
        warn!(reason = %reason, "embedding provider unavailable");
        Self {
            sender: None,
            worker: None,
            unavailable: Some(reason),
            dimensions: config.dimensions,
            max_chars: config.max_chars,
        }
    }

    pub fn is_available(&self) -> bool {
        self.sender.is_some()
    }

    /// Why the provider is unavailable, if it is.
    pub fn unavailable_reason(&self) -> Option<&str> {
        self.unavailable.as_deref()
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Embed one text.
    ///
    /// `Ok(None)` means "skip this text": it normalized to nothing or the
    /// embedder could not vectorize it. `Err` is only returned when the
    /// provider itself is unavailable.
    pub fn embed(&self, text: &str) -> Result<Option<Vec<f64>>, EmbedError> {
        let sender = self.sender.as_ref().ok_or_else(|| {
            EmbedError::Unavailable(
                self.unavailable
                    .clone()
                    .unwrap_or_else(|| "embedding provider not started".to_string()),
            )
        })?;

        let normalized = normalize_text(text, self.max_chars);
        if normalized.is_empty() {
            return Ok(None);
        }

        let (reply_tx, reply_rx) = mpsc::sync_channel(1);
        sender
            .send(EmbedRequest {
                text: normalized,
                reply: reply_tx,
            })
            .map_err(|_| EmbedError::Unavailable("embedding worker stopped".to_string()))?;

        match reply_rx.recv() {
            Ok(Ok(vector)) if vector.len() == self.dimensions => Ok(Some(vector)),
            Ok(Ok(vector)) => {
                warn!(
                    expected = self.dimensions,
                    actual = vector.len(),
                    "embedder returned a vector of unexpected width, skipping"
                );
                Ok(None)
            }
            Ok(Err(EmbedError::Failed(reason))) => {
                debug!(reason = %reason, "text could not be embedded, skipping");
                Ok(None)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(EmbedError::Unavailable(
                "embedding worker stopped".to_string(),
            )),
        }
    }
}

impl Drop for EmbeddingService {
    fn drop(&mut self) {
        // Closing the queue ends the worker loop.
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn config() -> EmbeddingConfig {
        EmbeddingConfig {
            max_chars: 1000,
            dimensions: 8,
        }
    }

    /// Fails the test if entered concurrently.
    struct ExclusiveEmbedder {
        busy: Arc<AtomicBool>,
        calls: Arc<AtomicUsize>,
        overlaps: Arc<AtomicUsize>,
    }

    impl Embedder for ExclusiveEmbedder {
        fn dimensions(&self) -> usize {
            8
        }

        fn embed(&mut self, text: &str) -> Result<Vec<f64>, EmbedError> {
            if self.busy.swap(true, Ordering::SeqCst) {
                self.overlaps.fetch_add(1, Ordering::SeqCst);
            }
            std::thread::sleep(Duration::from_millis(1));
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.busy.store(false, Ordering::SeqCst);
            let mut v = vec![0.0; 8];
            v[text.len() % 8] = 1.0;
            Ok(v)
        }
    }

    #[test]
    fn test_concurrent_callers_are_serialized() {
        let busy = Arc::new(AtomicBool::new(false));
        let calls = Arc::new(AtomicUsize::new(0));
        let overlaps = Arc::new(AtomicUsize::new(0));

        let embedder = ExclusiveEmbedder {
            busy: busy.clone(),
            calls: calls.clone(),
            overlaps: overlaps.clone(),
        };
        let service = Arc::new(EmbeddingService::spawn(&config(), move || Ok(embedder)));
        assert!(service.is_available());

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let service = service.clone();
                std::thread::spawn(move || {
                    for j in 0..5 {
                        let v = service.embed(&format!("text {} {}", i, j)).unwrap();
                        assert!(v.is_some());
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 40);
        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_empty_text_is_skipped() {
        let service = EmbeddingService::hashed(&config());
        assert_eq!(service.embed("   \n\t ").unwrap(), None);
    }

    #[test]
    fn test_unembeddable_text_is_skipped() {
        let service = EmbeddingService::hashed(&config());
        assert_eq!(service.embed("!!! ???").unwrap(), None);
    }

    #[test]
    fn test_failing_factory_is_unavailable() {
        let service = EmbeddingService::spawn(&config(), || {
            Err::<HashedEmbedder, _>(EmbedError::Unavailable("model missing".to_string()))
        });
        assert!(!service.is_available());
        assert!(service.unavailable_reason().unwrap().contains("model missing"));
        assert!(matches!(
            service.embed("hello world"),
            Err(EmbedError::Unavailable(_))
        ));
    }

    #[test]
    fn test_hashed_service_produces_configured_width() {
        let service = EmbeddingService::hashed(&config());
        let v = service.embed("Refactor The Parser").unwrap().unwrap();
        assert_eq!(v.len(), 8);
        // case normalization happens before embedding
        assert_eq!(v, service.embed("refactor the parser").unwrap().unwrap());
    }
}
