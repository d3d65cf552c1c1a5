//! Fakes and fixtures shared by the unit tests.

use std::{
    future::Future,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use crate::{
    ai_utils::{AnalogyGenerator, ChapterAnalogy, ImageGenerator, ImageRequest},
    book::{
        book::{Book, BookStatus},
        chapter::NewChapter,
        library::Library,
    },
    error::{Error, Result},
    processor::ProcessChapter,
    runtime::ChapterQueue,
};

pub fn chapters(n: usize) -> Vec<NewChapter> {
    (1..=n)
        .map(|i| NewChapter {
            title: format!("Chapter {i}"),
            text: format!("Contents of chapter {i}."),
        })
        .collect()
}

/// A `processing` book with `n` chapters, and the chapter ids in reading order.
pub async fn sample_book(library: &Library, n: usize) -> (Book, Vec<i64>) {
    let book = library.create_book("Biología", &chapters(n)).await.unwrap();
    library
        .set_book_status(book.id, BookStatus::Processing)
        .await
        .unwrap();
    let ids = library.chapter_ids(book.id).await.unwrap();
    (library.get_book(book.id).await.unwrap(), ids)
}

/// Answers `Es como <title>` and records the text it was given.
#[derive(Clone, Default)]
pub struct FakeAnalogies {
    texts: Arc<Mutex<Vec<String>>>,
    malformed: bool,
    failures_left: Arc<AtomicUsize>,
}

impl FakeAnalogies {
    pub fn malformed() -> Self {
        Self {
            malformed: true,
            ..Default::default()
        }
    }

    /// Fails with a provider error on the first `n` calls.
    pub fn failing(n: usize) -> Self {
        Self {
            failures_left: Arc::new(AtomicUsize::new(n)),
            ..Default::default()
        }
    }

    pub fn texts(&self) -> Vec<String> {
        self.texts.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.texts.lock().unwrap().len()
    }
}

impl AnalogyGenerator for FakeAnalogies {
    fn generate_analogy(
        &self,
        title: &str,
        text: &str,
    ) -> impl Future<Output = Result<ChapterAnalogy>> + Send {
        self.texts.lock().unwrap().push(text.to_string());
        let title = title.to_string();
        let malformed = self.malformed;
        let fail = take_failure(&self.failures_left);
        async move {
            tokio::task::yield_now().await;
            if fail {
                return Err(Error::Generation("rate limited".to_string()));
            }
            if malformed {
                return Err(Error::MalformedOutput("missing field `imagePrompt`".to_string()));
            }
            Ok(ChapterAnalogy {
                analogy: format!("Es como {title}"),
                image_prompt: format!("An illustration of {title}"),
            })
        }
    }
}

/// Returns `https://images.test/<chapter_id>.png` and records every request.
#[derive(Clone, Default)]
pub struct FakeImages {
    requests: Arc<Mutex<Vec<ImageRequest>>>,
    failures_left: Arc<AtomicUsize>,
    fail_chapter: Option<i64>,
    delay: Option<Duration>,
}

impl FakeImages {
    /// Fails on the first `n` calls.
    pub fn failing(n: usize) -> Self {
        Self {
            failures_left: Arc::new(AtomicUsize::new(n)),
            ..Default::default()
        }
    }

    /// Always fails for one chapter.
    pub fn failing_for(chapter_id: i64) -> Self {
        Self {
            fail_chapter: Some(chapter_id),
            ..Default::default()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Default::default()
        }
    }

    pub fn requests(&self) -> Vec<ImageRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl ImageGenerator for FakeImages {
    fn generate_image(&self, request: &ImageRequest) -> impl Future<Output = Result<String>> + Send {
        self.requests.lock().unwrap().push(request.clone());
        let fail =
            take_failure(&self.failures_left) || self.fail_chapter == Some(request.chapter_id);
        let delay = self.delay;
        let chapter_id = request.chapter_id;
        async move {
            match delay {
                Some(delay) => tokio::time::sleep(delay).await,
                None => tokio::task::yield_now().await,
            }
            if fail {
                return Err(Error::ImageGeneration("provider unavailable".to_string()));
            }
            Ok(format!("https://images.test/{chapter_id}.png"))
        }
    }
}

fn take_failure(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// Queue that only remembers what was enqueued.
#[derive(Default)]
pub struct RecordingQueue {
    pub tasks: Mutex<Vec<ProcessChapter>>,
}

impl RecordingQueue {
    pub fn tasks(&self) -> Vec<ProcessChapter> {
        self.tasks.lock().unwrap().clone()
    }
}

impl ChapterQueue for RecordingQueue {
    fn enqueue(&self, task: ProcessChapter) {
        self.tasks.lock().unwrap().push(task);
    }
}
