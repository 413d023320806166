//! Staged resize pipeline.
//!
//! Producing derivatives is split into three stages, each running on its own
//! worker thread and connected by bounded queues:
//!
//! ```text
//! submit ──▶ [open: 18] ──▶ decode ──▶ [resize: 7] ──▶ resize ──▶ [save: 7] ──▶ encode + write
//!                                                        │                           │
//!                                              one item per target          callback on the
//!                                                                          last target or on
//!                                                                             any failure
//! ```
//!
//! A request ([`ResizeJob`]) names a source image and an ordered list of
//! [`ResizeTarget`]s. The image is decoded once; each target is resized from
//! the previous target's output (largest first keeps quality and makes each
//! step cheap). Only the first target applies the EXIF orientation
//! correction: everything after it is already upright.
//!
//! ## Completion
//!
//! Every submitted request gets exactly one callback:
//!
//! - `Ok(ResizeOutcome)` once the last target is written, carrying that
//!   target's dimensions,
//! - `Err` as soon as decoding or any save fails; remaining targets of that
//!   request are skipped,
//! - `Err(Aborted)` if the pipeline shuts down under the request.
//!
//! The callback runs on the save worker (or the open worker, for decode
//! failures). It must not block on the pipeline itself.
//!
//! ## Backpressure
//!
//! Queues are bounded; [`ResizePipeline::submit`] blocks while the open queue
//! is full. Dropping the pipeline closes the intake, lets the workers drain
//! what was already queued, and joins them.

use crate::imaging::operations::{orient_and_resize, resize};
use crate::imaging::{BackendError, ImageBackend, Quality, ResizeTarget};
use crossbeam::channel::{Receiver, Sender, bounded};
use image::DynamicImage;
use log::{debug, warn};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use thiserror::Error;

/// Capacities of the three stage queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineCapacity {
    pub open: usize,
    pub resize: usize,
    pub save: usize,
}

impl Default for PipelineCapacity {
    fn default() -> Self {
        Self {
            open: 18,
            resize: 7,
            save: 7,
        }
    }
}

/// A request to produce every target of one source image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResizeJob {
    pub source: PathBuf,
    /// EXIF orientation of the source (0 when unknown).
    pub orientation: u32,
    pub targets: Vec<ResizeTarget>,
}

/// Dimensions and orientation of the last derivative written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResizeOutcome {
    pub width: u32,
    pub height: u32,
    pub orientation: u32,
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("no resize targets for {0}")]
    NoTargets(PathBuf),
    #[error(transparent)]
    Decode(BackendError),
    #[error("failed to save {path}: {source}")]
    Save { path: PathBuf, source: BackendError },
    #[error("resize pipeline stopped before {0} completed")]
    Aborted(PathBuf),
}

pub type ResizeResult = Result<ResizeOutcome, PipelineError>;

type Callback = Box<dyn FnOnce(ResizeResult) + Send>;

/// The single completion slot of a request, shared by all its work items.
///
/// Whoever takes the callback first delivers the result. If every work item
/// is dropped without completing, the request is reported as aborted.
struct Completion {
    source: PathBuf,
    callback: Mutex<Option<Callback>>,
}

impl Completion {
    fn new(source: PathBuf, callback: Callback) -> Self {
        Self {
            source,
            callback: Mutex::new(Some(callback)),
        }
    }

    fn complete(&self, result: ResizeResult) -> bool {
        let callback = self
            .callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match callback {
            Some(callback) => {
                callback(result);
                true
            }
            None => false,
        }
    }

    fn is_done(&self) -> bool {
        self.callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        let callback = self
            .callback
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(callback) = callback {
            warn!("resize of {} aborted", self.source.display());
            callback(Err(PipelineError::Aborted(self.source.clone())));
        }
    }
}

struct OpenWork {
    job: ResizeJob,
    completion: Arc<Completion>,
}

struct ResizeWork {
    image: Arc<DynamicImage>,
    job: ResizeJob,
    completion: Arc<Completion>,
}

struct SaveWork {
    image: Arc<DynamicImage>,
    output: PathBuf,
    orientation: u32,
    last: bool,
    completion: Arc<Completion>,
}

/// Handle to the running stage workers.
pub struct ResizePipeline {
    sender: Option<Sender<OpenWork>>,
    workers: Vec<JoinHandle<()>>,
}

impl ResizePipeline {
    /// Start the three stage workers.
    pub fn new(
        backend: Arc<dyn ImageBackend>,
        capacity: PipelineCapacity,
        quality: Quality,
    ) -> std::io::Result<Self> {
        let (open_tx, open_rx) = bounded::<OpenWork>(capacity.open.max(1));
        let (resize_tx, resize_rx) = bounded::<ResizeWork>(capacity.resize.max(1));
        let (save_tx, save_rx) = bounded::<SaveWork>(capacity.save.max(1));

        let mut workers = Vec::with_capacity(3);
        let open_backend = Arc::clone(&backend);
        workers.push(
            thread::Builder::new()
                .name("resize-open".into())
                .spawn(move || open_stage(open_backend.as_ref(), open_rx, resize_tx))?,
        );
        workers.push(
            thread::Builder::new()
                .name("resize-scale".into())
                .spawn(move || resize_stage(resize_rx, save_tx))?,
        );
        workers.push(
            thread::Builder::new()
                .name("resize-save".into())
                .spawn(move || save_stage(backend.as_ref(), quality, save_rx))?,
        );

        Ok(Self {
            sender: Some(open_tx),
            workers,
        })
    }

    /// Queue a request. Blocks while the open queue is full.
    ///
    /// `on_complete` is called exactly once, from a worker thread.
    pub fn submit<F>(&self, job: ResizeJob, on_complete: F)
    where
        F: FnOnce(ResizeResult) + Send + 'static,
    {
        let completion = Arc::new(Completion::new(job.source.clone(), Box::new(on_complete)));
        if let Some(sender) = &self.sender {
            // A closed queue hands the work back; dropping it reports the abort.
            let _ = sender.send(OpenWork { job, completion });
        }
    }

    /// Queue a request and wait for its result.
    pub fn resize(&self, job: ResizeJob) -> ResizeResult {
        let source = job.source.clone();
        let (tx, rx) = bounded(1);
        self.submit(job, move |result| {
            let _ = tx.send(result);
        });
        rx.recv()
            .unwrap_or_else(|_| Err(PipelineError::Aborted(source)))
    }
}

impl Drop for ResizePipeline {
    fn drop(&mut self) {
        drop(self.sender.take());
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

fn open_stage(backend: &dyn ImageBackend, rx: Receiver<OpenWork>, tx: Sender<ResizeWork>) {
    for OpenWork { job, completion } in rx.iter() {
        if job.targets.is_empty() {
            completion.complete(Err(PipelineError::NoTargets(job.source.clone())));
            continue;
        }
        match backend.decode(&job.source) {
            Ok(image) => {
                debug!("decoded {}", job.source.display());
                let work = ResizeWork {
                    image: Arc::new(image),
                    job,
                    completion,
                };
                if tx.send(work).is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!("cannot open {}: {e}", job.source.display());
                completion.complete(Err(PipelineError::Decode(e)));
            }
        }
    }
}

fn resize_stage(rx: Receiver<ResizeWork>, tx: Sender<SaveWork>) {
    for ResizeWork {
        mut image,
        job,
        completion,
    } in rx.iter()
    {
        let mut orientation = job.orientation;
        let count = job.targets.len();
        for (i, target) in job.targets.into_iter().enumerate() {
            if completion.is_done() {
                break;
            }
            if i == 0 && orientation != 1 {
                (image, orientation) =
                    orient_and_resize(image, orientation, target.width, target.height);
            } else {
                image = resize(image, target.width, target.height);
            }
            let work = SaveWork {
                image: Arc::clone(&image),
                output: target.output,
                orientation,
                last: i + 1 == count,
                completion: Arc::clone(&completion),
            };
            if tx.send(work).is_err() {
                return;
            }
        }
    }
}

fn save_stage(backend: &dyn ImageBackend, quality: Quality, rx: Receiver<SaveWork>) {
    for work in rx.iter() {
        if work.completion.is_done() {
            continue;
        }
        match backend.save_jpeg(&work.image, &work.output, quality) {
            Ok(()) => {
                debug!("wrote {}", work.output.display());
                if work.last {
                    work.completion.complete(Ok(ResizeOutcome {
                        width: work.image.width(),
                        height: work.image.height(),
                        orientation: work.orientation,
                    }));
                }
            }
            Err(source) => {
                warn!("cannot save {}: {source}", work.output.display());
                work.completion.complete(Err(PipelineError::Save {
                    path: work.output,
                    source,
                }));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::backend::tests::MockBackend;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn pipeline(backend: &Arc<MockBackend>) -> ResizePipeline {
        let backend: Arc<dyn ImageBackend> = backend.clone();
        ResizePipeline::new(backend, PipelineCapacity::default(), Quality::default()).unwrap()
    }

    fn job(source: &str, heights: &[u32], orientation: u32) -> ResizeJob {
        let stem = source.trim_end_matches(".jpg");
        ResizeJob {
            source: PathBuf::from(source),
            orientation,
            targets: heights
                .iter()
                .map(|&h| ResizeTarget::with_height(format!("{stem}-{h}.jpg"), h))
                .collect(),
        }
    }

    // =========================================================================
    // Completion semantics
    // =========================================================================

    #[test]
    fn targets_are_chained_and_last_size_reported() {
        let backend = Arc::new(MockBackend::decoding_to(400, 300));
        let pipeline = pipeline(&backend);

        let outcome = pipeline.resize(job("/p/a.jpg", &[200, 100], 1)).unwrap();
        // 400x300 → 267x200, then 267x200 → 134x100
        assert_eq!(
            outcome,
            ResizeOutcome {
                width: 134,
                height: 100,
                orientation: 1
            }
        );
        assert_eq!(
            backend.saves(),
            vec![
                ("/p/a-200.jpg".to_string(), 267, 200),
                ("/p/a-100.jpg".to_string(), 134, 100),
            ]
        );
        assert_eq!(backend.decode_count(), 1);
    }

    #[test]
    fn first_target_applies_orientation() {
        let backend = Arc::new(MockBackend::decoding_to(400, 300));
        let pipeline = pipeline(&backend);

        let outcome = pipeline.resize(job("/p/r.jpg", &[200, 100], 6)).unwrap();
        assert_eq!(outcome.orientation, 1);
        // rotated to 300x400 first
        assert_eq!(backend.saves()[0], ("/p/r-200.jpg".to_string(), 150, 200));
        assert_eq!((outcome.width, outcome.height), (75, 100));
    }

    #[test]
    fn small_sources_are_not_upscaled() {
        let backend = Arc::new(MockBackend::decoding_to(100, 80));
        let pipeline = pipeline(&backend);

        let outcome = pipeline.resize(job("/p/s.jpg", &[1080, 250], 1)).unwrap();
        assert_eq!((outcome.width, outcome.height), (100, 80));
        assert_eq!(backend.saves().len(), 2);
    }

    #[test]
    fn decode_failure_reports_once_and_saves_nothing() {
        let backend = Arc::new(MockBackend::new());
        backend.fail_decode("/p/bad.jpg");
        let pipeline = pipeline(&backend);

        let result = pipeline.resize(job("/p/bad.jpg", &[200, 100], 1));
        assert!(matches!(result, Err(PipelineError::Decode(_))));
        assert!(backend.saves().is_empty());
    }

    #[test]
    fn save_failure_skips_remaining_targets() {
        let backend = Arc::new(MockBackend::new());
        backend.fail_save("/p/a-200.jpg");
        let pipeline = pipeline(&backend);

        let calls = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = bounded(4);
        let counter = Arc::clone(&calls);
        pipeline.submit(job("/p/a.jpg", &[200, 100], 1), move |result| {
            counter.fetch_add(1, Ordering::SeqCst);
            tx.send(result).unwrap();
        });
        let result = rx.recv().unwrap();
        drop(pipeline);

        assert!(matches!(
            result,
            Err(PipelineError::Save { ref path, .. }) if path == &PathBuf::from("/p/a-200.jpg")
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(backend.saves().len(), 1);
    }

    #[test]
    fn empty_target_list_is_an_error() {
        let backend = Arc::new(MockBackend::new());
        let pipeline = pipeline(&backend);
        let result = pipeline.resize(job("/p/a.jpg", &[], 1));
        assert!(matches!(result, Err(PipelineError::NoTargets(_))));
        assert_eq!(backend.decode_count(), 0);
    }

    // =========================================================================
    // Throughput and shutdown
    // =========================================================================

    #[test]
    fn every_request_completes_exactly_once_under_backpressure() {
        let backend: Arc<dyn ImageBackend> = Arc::new(MockBackend::decoding_to(64, 48));
        let capacity = PipelineCapacity {
            open: 1,
            resize: 1,
            save: 1,
        };
        let pipeline = ResizePipeline::new(backend, capacity, Quality::default()).unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        for i in 0..50 {
            let counter = Arc::clone(&calls);
            pipeline.submit(job(&format!("/p/{i}.jpg"), &[32, 16], 1), move |result| {
                assert!(result.is_ok());
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        drop(pipeline);
        assert_eq!(calls.load(Ordering::SeqCst), 50);
    }

    #[test]
    fn dropped_completion_reports_abort() {
        let (tx, rx) = bounded(1);
        let completion = Completion::new(
            PathBuf::from("/p/a.jpg"),
            Box::new(move |result| tx.send(result).unwrap()),
        );
        drop(completion);
        assert!(matches!(rx.recv().unwrap(), Err(PipelineError::Aborted(_))));
    }

    #[test]
    fn completed_request_ignores_later_results() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let completion = Completion::new(
            PathBuf::from("/p/a.jpg"),
            Box::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        assert!(completion.complete(Err(PipelineError::NoTargets("/p/a.jpg".into()))));
        assert!(!completion.complete(Err(PipelineError::NoTargets("/p/a.jpg".into()))));
        assert!(completion.is_done());
        drop(completion);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
