use std::{sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use tokio::{sync::Semaphore, task::JoinHandle};
use tracing::{Instrument, error, info, info_span, warn};

use crate::{
    ai_utils::{AnalogyGenerator, ImageGenerator},
    book::{book::BookStatus, chapter::ChapterStatus, library::Library},
    config::Config,
    error::{Error, Result},
    processor::{ChapterProcessor, ProcessChapter, ProcessedChapter},
};

/// Exponential backoff between attempts of one chapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 2_000,
            max_delay_ms: 60_000,
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1`, `attempt` starting at 1.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(
            self.base_delay_ms
                .saturating_mul(factor)
                .min(self.max_delay_ms),
        )
    }

    pub fn should_retry(&self, error: &Error, attempt: u32) -> bool {
        error.is_retryable() && attempt < self.max_attempts
    }
}

/// Something that accepts chapter units of work.
pub trait ChapterQueue: Send + Sync {
    fn enqueue(&self, task: ProcessChapter);
}

/// Moves a book to `processing` and enqueues all of its chapters.
pub async fn start_book(library: &Library, queue: &dyn ChapterQueue, book_id: i64) -> Result<usize> {
    library.set_book_status(book_id, BookStatus::Processing).await?;
    let ids = library.chapter_ids(book_id).await?;
    for &chapter_id in &ids {
        queue.enqueue(ProcessChapter {
            chapter_id,
            book_id,
        });
    }
    info!(book_id, chapters = ids.len(), "book dispatched");
    Ok(ids.len())
}

/// Runs chapter units of work on the tokio runtime.
///
/// Each attempt is bounded by `max_duration`, at most `max_concurrency`
/// attempts run at once, and failed attempts are retried per [`RetryPolicy`].
pub struct TaskRunner<A, I> {
    processor: Arc<ChapterProcessor<A, I>>,
    permits: Arc<Semaphore>,
    policy: RetryPolicy,
    max_duration: Duration,
}

impl<A, I> Clone for TaskRunner<A, I> {
    fn clone(&self) -> Self {
        Self {
            processor: self.processor.clone(),
            permits: self.permits.clone(),
            policy: self.policy,
            max_duration: self.max_duration,
        }
    }
}

impl<A, I> TaskRunner<A, I>
where
    A: AnalogyGenerator + 'static,
    I: ImageGenerator + 'static,
{
    pub fn new(processor: ChapterProcessor<A, I>, config: &Config) -> Self {
        Self {
            processor: Arc::new(processor),
            permits: Arc::new(Semaphore::new(config.max_concurrency.max(1))),
            policy: config.retry,
            max_duration: config.max_duration(),
        }
    }

    fn library(&self) -> &Library {
        self.processor.library()
    }

    pub fn dispatch(&self, task: ProcessChapter) -> JoinHandle<Result<ProcessedChapter>> {
        let runner = self.clone();
        tokio::spawn(async move { runner.run_with_retry(task).await })
    }

    /// Runs every chapter of a book and waits for all of them.
    pub async fn run_book(&self, book_id: i64) -> Result<Vec<Result<ProcessedChapter>>> {
        self.library()
            .set_book_status(book_id, BookStatus::Processing)
            .await?;
        let handles: Vec<_> = self
            .library()
            .chapter_ids(book_id)
            .await?
            .into_iter()
            .map(|chapter_id| {
                self.dispatch(ProcessChapter {
                    chapter_id,
                    book_id,
                })
            })
            .collect();
        let mut results = Vec::with_capacity(handles.len());
        for joined in futures::future::join_all(handles).await {
            results.push(
                joined.map_err(|e| Error::InvalidState(format!("chapter task panicked: {e}")))?,
            );
        }
        Ok(results)
    }

    pub async fn run_with_retry(&self, task: ProcessChapter) -> Result<ProcessedChapter> {
        let mut attempt = 1;
        loop {
            let result = {
                let _permit = self
                    .permits
                    .acquire()
                    .await
                    .map_err(|e| Error::InvalidState(e.to_string()))?;
                self.run_once(task, attempt).await
            };
            let err = match result {
                Ok(done) => return Ok(done),
                Err(e) => e,
            };
            if self.policy.should_retry(&err, attempt) {
                let delay = self.policy.delay_after(attempt);
                warn!(
                    chapter_id = task.chapter_id,
                    book_id = task.book_id,
                    attempt,
                    "attempt failed, retrying in {:?}: {}",
                    delay,
                    err
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
                if !self.still_failed(task).await? {
                    info!(
                        chapter_id = task.chapter_id,
                        book_id = task.book_id,
                        attempt,
                        "chapter restarted by another run, dropping retry"
                    );
                    return Err(Error::InvalidState(format!(
                        "chapter {} was restarted by another run",
                        task.chapter_id
                    )));
                }
                continue;
            }
            error!(
                chapter_id = task.chapter_id,
                book_id = task.book_id,
                attempt,
                "giving up on chapter: {}",
                err
            );
            // errors about the chapter itself do not say anything about the book
            if err.is_retryable() {
                match self.library().fail_book(task.book_id).await {
                    Ok(true) => warn!(book_id = task.book_id, "book marked failed"),
                    Ok(false) => {}
                    Err(e) => error!(book_id = task.book_id, "mark book failed: {}", e),
                }
            }
            return Err(err);
        }
    }

    /// A manual retry or another dispatch moves the chapter out of `failed`
    /// while this chain is backing off.
    async fn still_failed(&self, task: ProcessChapter) -> Result<bool> {
        let chapter = self.library().get_chapter(task.chapter_id).await?;
        Ok(matches!(chapter, Some(c) if c.status == ChapterStatus::Failed))
    }

    async fn run_once(&self, task: ProcessChapter, attempt: u32) -> Result<ProcessedChapter> {
        let span = info_span!(
            "process_chapter",
            chapter_id = task.chapter_id,
            book_id = task.book_id,
            attempt
        );
        let run = tokio::time::timeout(self.max_duration, self.processor.run(task));
        match run.instrument(span).await {
            Ok(result) => result,
            Err(_) => {
                // the run was dropped mid-way, so it could not mark itself
                self.library().fail_chapter(task.chapter_id).await?;
                Err(Error::Timeout {
                    secs: self.max_duration.as_secs(),
                })
            }
        }
    }
}

impl<A, I> ChapterQueue for TaskRunner<A, I>
where
    A: AnalogyGenerator + 'static,
    I: ImageGenerator + 'static,
{
    fn enqueue(&self, task: ProcessChapter) {
        // the handle is dropped, the task keeps running detached
        let _ = self.dispatch(task);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeAnalogies, FakeImages, RecordingQueue, sample_book};

    fn config(max_attempts: u32) -> Config {
        Config {
            max_concurrency: 2,
            retry: RetryPolicy {
                max_attempts,
                base_delay_ms: 1,
                max_delay_ms: 5,
            },
            ..Config::default()
        }
    }

    #[test]
    fn test_retry_delays() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(1), Duration::from_secs(2));
        assert_eq!(policy.delay_after(2), Duration::from_secs(4));
        assert_eq!(policy.delay_after(3), Duration::from_secs(8));
        assert_eq!(policy.delay_after(10), Duration::from_secs(60));
        assert_eq!(policy.delay_after(200), Duration::from_secs(60));
    }

    #[test]
    fn test_should_retry() {
        let policy = RetryPolicy::default();
        let transient = Error::Generation("timeout".to_string());
        assert!(policy.should_retry(&transient, 1));
        assert!(policy.should_retry(&transient, 2));
        assert!(!policy.should_retry(&transient, 3));
        assert!(!policy.should_retry(&Error::ChapterNotFound(1), 1));
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let library = Library::in_memory().await.unwrap();
        let (book, ids) = sample_book(&library, 1).await;
        let analogies = FakeAnalogies::failing(2);
        let processor = ChapterProcessor::new(library.clone(), analogies.clone(), FakeImages::default());
        let runner = TaskRunner::new(processor, &config(3));

        runner
            .run_with_retry(ProcessChapter {
                chapter_id: ids[0],
                book_id: book.id,
            })
            .await
            .unwrap();
        assert_eq!(analogies.calls(), 3);
        let chapter = library.get_chapter(ids[0]).await.unwrap().unwrap();
        assert_eq!(chapter.status, ChapterStatus::Completed);
        assert_eq!(chapter.attempts, 3);
        assert_eq!(
            library.get_book(book.id).await.unwrap().status,
            BookStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_exhausted_retries_fail_book() {
        let library = Library::in_memory().await.unwrap();
        let (book, ids) = sample_book(&library, 2).await;
        let processor =
            ChapterProcessor::new(library.clone(), FakeAnalogies::failing(10), FakeImages::default());
        let runner = TaskRunner::new(processor, &config(2));

        let result = runner
            .run_with_retry(ProcessChapter {
                chapter_id: ids[0],
                book_id: book.id,
            })
            .await;
        assert!(matches!(result, Err(Error::Generation(_))));
        let chapter = library.get_chapter(ids[0]).await.unwrap().unwrap();
        assert_eq!(chapter.status, ChapterStatus::Failed);
        assert_eq!(chapter.attempts, 2);
        assert_eq!(
            library.get_book(book.id).await.unwrap().status,
            BookStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_missing_chapter_is_not_retried() {
        let library = Library::in_memory().await.unwrap();
        let (book, _) = sample_book(&library, 1).await;
        let analogies = FakeAnalogies::default();
        let processor = ChapterProcessor::new(library.clone(), analogies.clone(), FakeImages::default());
        let runner = TaskRunner::new(processor, &config(5));

        let result = runner
            .run_with_retry(ProcessChapter {
                chapter_id: 31337,
                book_id: book.id,
            })
            .await;
        assert!(matches!(result, Err(Error::ChapterNotFound(31337))));
        assert_eq!(analogies.calls(), 0);
        assert_eq!(
            library.get_book(book.id).await.unwrap().status,
            BookStatus::Processing
        );
    }

    #[tokio::test]
    async fn test_attempt_timeout_marks_chapter_failed() {
        let library = Library::in_memory().await.unwrap();
        let (book, ids) = sample_book(&library, 1).await;
        let processor = ChapterProcessor::new(
            library.clone(),
            FakeAnalogies::default(),
            FakeImages::slow(Duration::from_secs(5)),
        );
        let mut runner = TaskRunner::new(processor, &config(1));
        runner.max_duration = Duration::from_millis(50);

        let result = runner
            .run_with_retry(ProcessChapter {
                chapter_id: ids[0],
                book_id: book.id,
            })
            .await;
        assert!(matches!(result, Err(Error::Timeout { .. })));
        let chapter = library.get_chapter(ids[0]).await.unwrap().unwrap();
        assert_eq!(chapter.status, ChapterStatus::Failed);
        assert!(chapter.analogy.is_some());
    }

    #[tokio::test]
    async fn test_manual_retry_during_backoff_stops_old_chain() {
        let library = Library::in_memory().await.unwrap();
        let (book, ids) = sample_book(&library, 1).await;
        let analogies = FakeAnalogies::failing(1);
        let processor = ChapterProcessor::new(library.clone(), analogies.clone(), FakeImages::default());
        let mut slow_backoff = config(3);
        slow_backoff.retry.base_delay_ms = 300;
        slow_backoff.retry.max_delay_ms = 300;
        let runner = TaskRunner::new(processor, &slow_backoff);
        let task = ProcessChapter {
            chapter_id: ids[0],
            book_id: book.id,
        };

        let first = runner.dispatch(task);
        // wait for the first attempt to fail
        loop {
            let chapter = library.get_chapter(ids[0]).await.unwrap().unwrap();
            if chapter.status == ChapterStatus::Failed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        library.reset_chapter(ids[0]).await.unwrap();
        runner.run_with_retry(task).await.unwrap();

        let first = first.await.unwrap();
        assert!(matches!(first, Err(Error::InvalidState(_))));
        assert_eq!(analogies.calls(), 2);
        let chapter = library.get_chapter(ids[0]).await.unwrap().unwrap();
        assert_eq!(chapter.status, ChapterStatus::Completed);
        assert_eq!(chapter.attempts, 2);
        let book = library.get_book(book.id).await.unwrap();
        assert_eq!(book.processed_chapters, 1);
        assert_eq!(book.status, BookStatus::Completed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_completions_on_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let library = Library::connect(dir.path().join("library.db")).await.unwrap();
        let book = library
            .create_book("Física", &crate::testing::chapters(12))
            .await
            .unwrap();
        let processor =
            ChapterProcessor::new(library.clone(), FakeAnalogies::default(), FakeImages::default());
        let settings = Config {
            max_concurrency: 12,
            ..config(1)
        };
        let runner = TaskRunner::new(processor, &settings);

        let results = runner.run_book(book.id).await.unwrap();
        assert!(results.iter().all(|r| r.is_ok()));
        let book = library.get_book(book.id).await.unwrap();
        assert_eq!(book.processed_chapters, 12);
        assert_eq!(book.total_chapters, 12);
        assert_eq!(book.status, BookStatus::Completed);
        let chapters = library.get_chapters(book.id).await.unwrap();
        assert!(chapters.iter().all(|c| c.status == ChapterStatus::Completed));
    }

    #[tokio::test]
    async fn test_run_book() {
        let library = Library::in_memory().await.unwrap();
        let book = library
            .create_book("Química", &crate::testing::chapters(5))
            .await
            .unwrap();
        let processor =
            ChapterProcessor::new(library.clone(), FakeAnalogies::default(), FakeImages::default());
        let runner = TaskRunner::new(processor, &config(1));

        let results = runner.run_book(book.id).await.unwrap();
        assert_eq!(results.len(), 5);
        assert!(results.iter().all(|r| r.is_ok()));
        let book = library.get_book(book.id).await.unwrap();
        assert_eq!(book.processed_chapters, 5);
        assert_eq!(book.status, BookStatus::Completed);
        assert_eq!(book.progress, 100);
    }

    #[tokio::test]
    async fn test_start_book_enqueues_every_chapter() {
        let library = Library::in_memory().await.unwrap();
        let book = library
            .create_book("Historia", &crate::testing::chapters(3))
            .await
            .unwrap();
        let queue = RecordingQueue::default();

        let count = start_book(&library, &queue, book.id).await.unwrap();
        assert_eq!(count, 3);
        let ids = library.chapter_ids(book.id).await.unwrap();
        let queued: Vec<i64> = queue.tasks().iter().map(|t| t.chapter_id).collect();
        assert_eq!(queued, ids);
        assert!(queue.tasks().iter().all(|t| t.book_id == book.id));
        assert_eq!(
            library.get_book(book.id).await.unwrap().status,
            BookStatus::Processing
        );
    }
}
