//! Intake in front of the resize pipeline.
//!
//! [`Reducer::resize_async`] is how the rest of the crate asks for an
//! image's derivatives. Requests go onto a bounded intake queue (100 by
//! default) drained by a single worker, which for each image:
//!
//! 1. creates the cache folder mirroring the image's folder,
//! 2. reads capture date and orientation ([`metadata`](crate::metadata)),
//! 3. probes the pre-scanned cache set for every derivative,
//! 4. if all exist, answers immediately with the dimensions of the smallest
//!    one (optionally rotating the cached files in place first),
//! 5. otherwise submits a [`ResizeJob`] to the [`ResizePipeline`].
//!
//! The callback fires exactly once per request, from the intake worker or a
//! pipeline worker.

use crate::cache::{ExistingDerivatives, check_existing, derivative_folder, derivative_paths};
use crate::imaging::operations::rotate;
use crate::imaging::{
    BackendError, ImageBackend, Quality, ResizeTarget, rotation_angle, swaps_dimensions,
};
use crate::metadata::{CaptureInfo, read_capture_info};
use crate::pipeline::{PipelineCapacity, PipelineError, ResizeJob, ResizePipeline};
use chrono::{DateTime, Utc};
use crossbeam::channel::{Sender, bounded};
use log::{debug, info, warn};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReduceError {
    #[error("cannot create cache folder {path}: {source}")]
    CacheFolder {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error("cannot reuse cached derivative: {0}")]
    Cached(#[from] BackendError),
    #[error("reducer stopped before {0} was handled")]
    Stopped(String),
}

/// Where derivatives go and which sizes to produce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReducerSettings {
    pub cache_root: PathBuf,
    /// Derivative heights. Sorted largest first on construction.
    pub sizes: Vec<u32>,
    pub queue: usize,
    pub quality: Quality,
    pub pipeline: PipelineCapacity,
}

/// One image to reduce.
#[derive(Debug, Clone)]
pub struct ReduceRequest {
    /// Absolute path of the original.
    pub source: PathBuf,
    /// Library path (`source/dir/name.jpg`).
    pub relative_path: String,
    /// Rotate already-cached derivatives according to EXIF.
    pub force_rotate: bool,
    pub existing: Arc<ExistingDerivatives>,
}

/// What a reduction reports back for the tree.
#[derive(Debug, Clone, PartialEq)]
pub struct ReducedImage {
    pub relative_path: String,
    pub width: u32,
    pub height: u32,
    pub orientation: u32,
    pub date: Option<DateTime<Utc>>,
    /// Answered from existing derivatives, nothing decoded.
    pub from_cache: bool,
}

pub type ReduceResult = Result<ReducedImage, ReduceError>;

type ReduceCallback = Box<dyn FnOnce(ReduceResult) + Send>;

struct Pending {
    request: ReduceRequest,
    callback: ReduceCallback,
}

/// Queue depth and lifetime count of handled requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReducerStats {
    pub waiting: usize,
    pub handled: usize,
}

pub struct Reducer {
    sender: Option<Sender<Pending>>,
    worker: Option<JoinHandle<()>>,
    handled: Arc<AtomicUsize>,
    settings: Arc<ReducerSettings>,
}

impl Reducer {
    pub fn new(
        backend: Arc<dyn ImageBackend>,
        mut settings: ReducerSettings,
    ) -> std::io::Result<Self> {
        settings.sizes.sort_unstable_by(|a, b| b.cmp(a));
        settings.sizes.dedup();
        let settings = Arc::new(settings);

        let pipeline =
            ResizePipeline::new(Arc::clone(&backend), settings.pipeline, settings.quality)?;
        let (tx, rx) = bounded::<Pending>(settings.queue.max(1));
        let handled = Arc::new(AtomicUsize::new(0));

        let worker_settings = Arc::clone(&settings);
        let worker_handled = Arc::clone(&handled);
        let worker = thread::Builder::new()
            .name("reducer".into())
            .spawn(move || {
                for pending in rx.iter() {
                    worker_handled.fetch_add(1, Ordering::Relaxed);
                    handle(backend.as_ref(), &pipeline, &worker_settings, pending);
                }
                // pipeline drops here, draining in-flight resizes
            })?;

        Ok(Self {
            sender: Some(tx),
            worker: Some(worker),
            handled,
            settings,
        })
    }

    /// Queue an image. Blocks while the intake queue is full.
    pub fn resize_async<F>(&self, request: ReduceRequest, on_done: F)
    where
        F: FnOnce(ReduceResult) + Send + 'static,
    {
        let pending = Pending {
            request,
            callback: Box::new(on_done),
        };
        let rejected = match &self.sender {
            Some(sender) => match sender.send(pending) {
                Ok(()) => return,
                Err(err) => err.into_inner(),
            },
            None => pending,
        };
        (rejected.callback)(Err(ReduceError::Stopped(rejected.request.relative_path)));
    }

    pub fn stats(&self) -> ReducerStats {
        ReducerStats {
            waiting: self.sender.as_ref().map_or(0, Sender::len),
            handled: self.handled.load(Ordering::Relaxed),
        }
    }

    pub fn sizes(&self) -> &[u32] {
        &self.settings.sizes
    }

    pub fn cache_root(&self) -> &Path {
        &self.settings.cache_root
    }

    /// Every derivative path of an image.
    pub fn derivative_paths(&self, relative_path: &str) -> Vec<PathBuf> {
        derivative_paths(&self.settings.cache_root, relative_path, &self.settings.sizes)
    }
}

impl Drop for Reducer {
    fn drop(&mut self) {
        drop(self.sender.take());
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn handle(
    backend: &dyn ImageBackend,
    pipeline: &ResizePipeline,
    settings: &ReducerSettings,
    Pending { request, callback }: Pending,
) {
    let folder = derivative_folder(&settings.cache_root, &request.relative_path);
    if let Err(source) = std::fs::create_dir_all(&folder) {
        warn!("cannot create {}: {source}", folder.display());
        callback(Err(ReduceError::CacheFolder {
            path: folder,
            source,
        }));
        return;
    }

    let info = read_capture_info(&request.source);
    let file_name = request
        .relative_path
        .rsplit('/')
        .next()
        .unwrap_or(&request.relative_path);
    let (targets, all_exist) =
        check_existing(&folder, file_name, &settings.sizes, &request.existing);

    if all_exist {
        debug!("derivatives of {} already exist", request.relative_path);
        let result = reuse_existing(backend, settings.quality, &targets, info, request.force_rotate)
            .map(|(width, height, orientation)| ReducedImage {
                relative_path: request.relative_path.clone(),
                width,
                height,
                orientation,
                date: info.date,
                from_cache: true,
            })
            .map_err(ReduceError::from);
        callback(result);
        return;
    }

    let relative_path = request.relative_path;
    let job = ResizeJob {
        source: request.source,
        orientation: info.orientation,
        targets,
    };
    pipeline.submit(job, move |result| {
        let result = match result {
            Ok(outcome) => {
                info!("resized {relative_path} ({}x{})", outcome.width, outcome.height);
                Ok(ReducedImage {
                    relative_path,
                    width: outcome.width,
                    height: outcome.height,
                    orientation: outcome.orientation,
                    date: info.date,
                    from_cache: false,
                })
            }
            Err(e) => Err(ReduceError::from(e)),
        };
        callback(result);
    });
}

/// Dimensions of the smallest existing derivative, after an optional
/// in-place rotation of every derivative.
///
/// Every derivative is decoded and rotated before the first one is written
/// back, so a derivative that cannot be read leaves all of them untouched.
fn reuse_existing(
    backend: &dyn ImageBackend,
    quality: Quality,
    targets: &[ResizeTarget],
    info: CaptureInfo,
    force_rotate: bool,
) -> Result<(u32, u32, u32), BackendError> {
    let Some(smallest) = targets.last() else {
        return Ok((0, 0, info.orientation));
    };
    let dims = backend.identify(&smallest.output)?;
    let (mut width, mut height) = (dims.width, dims.height);
    let mut orientation = info.orientation;

    let angle = rotation_angle(orientation);
    if force_rotate && angle != 0 {
        if swaps_dimensions(angle) {
            std::mem::swap(&mut width, &mut height);
        }
        let rotated = targets
            .par_iter()
            .map(|target| -> Result<_, BackendError> {
                Ok((target, rotate(&backend.decode(&target.output)?, angle)))
            })
            .collect::<Result<Vec<_>, BackendError>>()?;
        for (target, image) in rotated {
            if let Some(image) = image {
                backend.save_jpeg(&image, &target.output, quality)?;
            }
        }
        orientation = 1;
    }
    Ok((width, height, orientation))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::Dimensions;
    use crate::imaging::backend::tests::{MockBackend, RecordedOp};
    use crate::test_helpers::create_test_jpeg_with_exif;
    use crossbeam::channel::Receiver;
    use tempfile::TempDir;

    fn settings(cache_root: &Path) -> ReducerSettings {
        ReducerSettings {
            cache_root: cache_root.to_path_buf(),
            sizes: vec![250, 1080],
            queue: 100,
            quality: Quality::default(),
            pipeline: PipelineCapacity::default(),
        }
    }

    fn request(source: &Path, relative_path: &str, existing: ExistingDerivatives) -> ReduceRequest {
        ReduceRequest {
            source: source.to_path_buf(),
            relative_path: relative_path.to_string(),
            force_rotate: false,
            existing: Arc::new(existing),
        }
    }

    fn submit(reducer: &Reducer, request: ReduceRequest) -> Receiver<ReduceResult> {
        let (tx, rx) = bounded(1);
        reducer.resize_async(request, move |result| {
            tx.send(result).unwrap();
        });
        rx
    }

    fn cached(cache: &Path, folder: &str, stem: &str) -> ExistingDerivatives {
        [1080, 250]
            .iter()
            .map(|size| cache.join(folder).join(format!("{stem}-{size}.jpg")))
            .collect()
    }

    #[test]
    fn sizes_are_processed_largest_first() {
        let tmp = TempDir::new().unwrap();
        let reducer = Reducer::new(Arc::new(MockBackend::new()), settings(tmp.path())).unwrap();
        assert_eq!(reducer.sizes(), &[1080, 250]);
        assert_eq!(
            reducer.derivative_paths("photos/a.jpg"),
            vec![
                tmp.path().join("photos/a-1080.jpg"),
                tmp.path().join("photos/a-250.jpg")
            ]
        );
    }

    #[test]
    fn fully_cached_image_is_not_decoded() {
        let tmp = TempDir::new().unwrap();
        let backend = Arc::new(MockBackend::with_dimensions(vec![Dimensions {
            width: 333,
            height: 250,
        }]));
        let reducer = Reducer::new(backend.clone(), settings(tmp.path())).unwrap();

        let existing = cached(tmp.path(), "photos", "a");
        let rx = submit(&reducer, request(&tmp.path().join("src/a.jpg"), "photos/a.jpg", existing));
        let reduced = rx.recv().unwrap().unwrap();

        assert!(reduced.from_cache);
        assert_eq!((reduced.width, reduced.height), (333, 250));
        assert_eq!(backend.decode_count(), 0);
        let identified = tmp.path().join("photos/a-250.jpg");
        assert_eq!(
            backend.get_operations(),
            vec![RecordedOp::Identify(identified.to_string_lossy().to_string())]
        );
    }

    #[test]
    fn missing_derivative_goes_through_pipeline() {
        let tmp = TempDir::new().unwrap();
        let backend = Arc::new(MockBackend::decoding_to(2000, 1500));
        let reducer = Reducer::new(backend.clone(), settings(tmp.path())).unwrap();

        // only the small derivative exists
        let existing: ExistingDerivatives =
            [tmp.path().join("photos/a-250.jpg")].into_iter().collect();
        let rx = submit(&reducer, request(&tmp.path().join("src/a.jpg"), "photos/a.jpg", existing));
        let reduced = rx.recv().unwrap().unwrap();

        assert!(!reduced.from_cache);
        assert_eq!((reduced.width, reduced.height), (333, 250));
        assert_eq!(backend.decode_count(), 1);
        assert_eq!(backend.saves().len(), 2);
        assert!(tmp.path().join("photos").is_dir());
    }

    #[test]
    fn force_rotate_rewrites_cached_derivatives() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("src/r.jpg");
        create_test_jpeg_with_exif(&source, 40, 30, 6, None);

        let backend = Arc::new(MockBackend::with_dimensions(vec![Dimensions {
            width: 333,
            height: 250,
        }]));
        let reducer = Reducer::new(backend.clone(), settings(tmp.path())).unwrap();

        let mut req = request(&source, "photos/r.jpg", cached(tmp.path(), "photos", "r"));
        req.force_rotate = true;
        let reduced = submit(&reducer, req).recv().unwrap().unwrap();

        assert_eq!((reduced.width, reduced.height), (250, 333));
        assert_eq!(reduced.orientation, 1);
        assert_eq!(backend.decode_count(), 2);
        assert_eq!(backend.saves().len(), 2);
    }

    #[test]
    fn force_rotate_writes_nothing_when_a_derivative_is_unreadable() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("src/r.jpg");
        create_test_jpeg_with_exif(&source, 40, 30, 6, None);

        let backend = Arc::new(MockBackend::with_dimensions(vec![Dimensions {
            width: 333,
            height: 250,
        }]));
        backend.fail_decode(tmp.path().join("photos/r-250.jpg"));
        let reducer = Reducer::new(backend.clone(), settings(tmp.path())).unwrap();

        let mut req = request(&source, "photos/r.jpg", cached(tmp.path(), "photos", "r"));
        req.force_rotate = true;
        let result = submit(&reducer, req).recv().unwrap();

        assert!(matches!(result, Err(ReduceError::Cached(_))));
        assert!(backend.saves().is_empty());
    }

    #[test]
    fn force_rotate_of_upright_image_does_nothing() {
        let tmp = TempDir::new().unwrap();
        let backend = Arc::new(MockBackend::with_dimensions(vec![Dimensions {
            width: 333,
            height: 250,
        }]));
        let reducer = Reducer::new(backend.clone(), settings(tmp.path())).unwrap();

        // no EXIF → orientation 0 → no rotation and no swap
        let existing = cached(tmp.path(), "photos", "a");
        let mut req = request(&tmp.path().join("src/a.jpg"), "photos/a.jpg", existing);
        req.force_rotate = true;
        let reduced = submit(&reducer, req).recv().unwrap().unwrap();

        assert_eq!((reduced.width, reduced.height), (333, 250));
        assert_eq!(backend.decode_count(), 0);
    }

    #[test]
    fn unwritable_cache_folder_is_reported() {
        let tmp = TempDir::new().unwrap();
        let blocker = tmp.path().join("cache");
        std::fs::write(&blocker, b"not a folder").unwrap();
        let reducer = Reducer::new(Arc::new(MockBackend::new()), settings(&blocker)).unwrap();

        let rx = submit(
            &reducer,
            request(&tmp.path().join("a.jpg"), "photos/a.jpg", ExistingDerivatives::empty()),
        );
        assert!(matches!(rx.recv().unwrap(), Err(ReduceError::CacheFolder { .. })));
    }

    #[test]
    fn pipeline_failure_is_forwarded() {
        let tmp = TempDir::new().unwrap();
        let backend = Arc::new(MockBackend::new());
        let source = tmp.path().join("src/bad.jpg");
        backend.fail_decode(source.clone());
        let reducer = Reducer::new(backend, settings(tmp.path())).unwrap();

        let rx = submit(&reducer, request(&source, "photos/bad.jpg", ExistingDerivatives::empty()));
        assert!(matches!(
            rx.recv().unwrap(),
            Err(ReduceError::Pipeline(PipelineError::Decode(_)))
        ));
    }

    #[test]
    fn dropping_the_reducer_answers_every_request() {
        let tmp = TempDir::new().unwrap();
        let reducer = Reducer::new(Arc::new(MockBackend::new()), settings(tmp.path())).unwrap();

        let (tx, rx) = bounded(20);
        for i in 0..20 {
            let tx = tx.clone();
            reducer.resize_async(
                request(
                    &tmp.path().join(format!("src/{i}.jpg")),
                    &format!("photos/{i}.jpg"),
                    ExistingDerivatives::empty(),
                ),
                move |result| tx.send(result.is_ok()).unwrap(),
            );
        }
        drop(tx);
        drop(reducer);
        assert_eq!(rx.iter().filter(|ok| *ok).count(), 20);
    }

    #[test]
    fn stats_count_handled_requests() {
        let tmp = TempDir::new().unwrap();
        let reducer = Reducer::new(Arc::new(MockBackend::new()), settings(tmp.path())).unwrap();
        for i in 0..3 {
            let rx = submit(
                &reducer,
                request(
                    &tmp.path().join(format!("{i}.jpg")),
                    &format!("photos/{i}.jpg"),
                    ExistingDerivatives::empty(),
                ),
            );
            rx.recv().unwrap().unwrap();
        }
        assert_eq!(reducer.stats().handled, 3);
        assert_eq!(reducer.stats().waiting, 0);
    }
}
