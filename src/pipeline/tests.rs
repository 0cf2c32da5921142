use super::*;
use crate::config::ServiceConfig;
use crate::error::Error;
use crate::types::{House, PageRequest};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Two houses per page; pages listed in `failing` error out after `fail_delay`
#[derive(Default)]
struct StubSource {
    failing: Vec<u32>,
    fail_delay: Duration,
}

#[async_trait::async_trait]
impl RecordSource for StubSource {
    async fn fetch_page(
        &self,
        request: &PageRequest,
        batches: &mpsc::Sender<Vec<House>>,
    ) -> crate::error::Result<()> {
        if self.failing.contains(&request.page) {
            tokio::time::sleep(self.fail_delay).await;
            return Err(Error::RemoteStatus { code: 500 });
        }
        let base = request.page as i64 * 10;
        let houses = (0..2)
            .map(|i| House {
                id: base + i,
                address: format!("{} Page Street", base + i),
                photo_url: format!("https://photos.test/{}.jpg", base + i),
                ..Default::default()
            })
            .collect();
        batches.send(houses).await.map_err(|_| Error::ChannelClosed)
    }
}

#[derive(Default)]
struct StubStore {
    calls: AtomicUsize,
    delay: Duration,
}

#[async_trait::async_trait]
impl AssetStore for StubStore {
    async fn save_photo(
        &self,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
        _photo_url: &str,
    ) -> crate::error::Result<u64> {
        tokio::time::sleep(self.delay).await;
        sink.write_all(b"photo").await?;
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(5)
    }
}

fn config(output_dir: &std::path::Path, num_pages: u32) -> Config {
    let mut config = Config {
        service: ServiceConfig {
            house_service_url: "http://localhost/houses".to_string(),
            num_pages,
            num_per_page: 2,
            ..Default::default()
        },
        ..Default::default()
    };
    config.download.output_dir = output_dir.to_path_buf();
    config
}

fn photo_count(dir: &std::path::Path) -> usize {
    std::fs::read_dir(dir).unwrap().count()
}

#[tokio::test]
async fn completes_when_every_download_finishes() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(StubStore::default());
    let pipeline = Pipeline::new(
        config(dir.path(), 3),
        Arc::new(StubSource::default()),
        store.clone(),
    );
    let states = pipeline.subscribe();

    let outcome = pipeline.run().await;

    assert!(outcome.is_completed(), "unexpected outcome: {outcome:?}");
    assert_eq!(outcome.exit_code(), 0);
    assert_eq!(store.calls.load(Ordering::SeqCst), 6);
    assert_eq!(photo_count(dir.path()), 6);
    assert_eq!(*states.borrow(), RunState::Completed);
    assert_eq!(pipeline.state(), RunState::Completed);
}

#[tokio::test]
async fn first_failure_ends_the_run_without_waiting_for_downloads() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(StubStore {
        delay: Duration::from_millis(500),
        ..Default::default()
    });
    let source = Arc::new(StubSource {
        failing: vec![1],
        fail_delay: Duration::from_millis(20),
    });
    let pipeline = Pipeline::new(config(dir.path(), 2), source, store.clone());

    let started = std::time::Instant::now();
    let outcome = pipeline.run().await;

    match outcome {
        RunOutcome::Failed(ref failure) => {
            assert_eq!(failure.stage, Stage::Fetch);
            assert!(matches!(failure.error, Error::RemoteStatus { code: 500 }));
        }
        ref other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(outcome.exit_code(), 1);
    assert!(
        started.elapsed() < Duration::from_millis(450),
        "coordinator should stop waiting on the first failure"
    );
    assert_eq!(pipeline.state(), RunState::Failed);

    // Page 2's downloads were not cancelled and still land on disk
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while store.calls.load(Ordering::SeqCst) < 2 && std::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(store.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn zero_pages_completes_immediately() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = Pipeline::new(
        config(dir.path(), 0),
        Arc::new(StubSource::default()),
        Arc::new(StubStore::default()),
    );

    assert!(pipeline.run().await.is_completed());
    assert_eq!(photo_count(dir.path()), 0);
}

#[tokio::test]
async fn output_directory_is_created() {
    let dir = tempfile::tempdir().unwrap();
    let nested = dir.path().join("photos").join("2024");
    let pipeline = Pipeline::new(
        config(&nested, 1),
        Arc::new(StubSource::default()),
        Arc::new(StubStore::default()),
    );

    assert!(pipeline.run().await.is_completed());
    assert_eq!(photo_count(&nested), 2);
}

#[tokio::test]
async fn output_directory_failure_fails_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, b"file").unwrap();

    let pipeline = Pipeline::new(
        config(&blocker.join("photos"), 1),
        Arc::new(StubSource::default()),
        Arc::new(StubStore::default()),
    );

    match pipeline.run().await {
        RunOutcome::Failed(failure) => assert!(matches!(failure.error, Error::Io(_))),
        other => panic!("expected failure, got {other:?}"),
    }
}

#[test]
fn from_config_rejects_invalid_configuration() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path(), 1);
    config.service.house_service_url = "::not a url::".to_string();

    assert!(matches!(
        Pipeline::from_config(config),
        Err(Error::Config { .. })
    ));
}

#[test]
fn exit_codes() {
    assert_eq!(RunOutcome::Completed.exit_code(), 0);
    assert_eq!(
        RunOutcome::Failed(Failure::fetch(1, Error::ChannelClosed)).exit_code(),
        1
    );
    assert_eq!(RunOutcome::Interrupted.exit_code(), 130);
}

/// Counts events logged at error level
struct ErrorCounter(Arc<AtomicUsize>);

impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for ErrorCounter {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        if *event.metadata().level() == tracing::Level::ERROR {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[test]
fn failure_is_logged_at_error_level_once() {
    use tracing_subscriber::layer::SubscriberExt;

    let errors_logged = Arc::new(AtomicUsize::new(0));
    let subscriber = tracing_subscriber::registry().with(ErrorCounter(errors_logged.clone()));

    tracing::subscriber::with_default(subscriber, || {
        let sink = ErrorSink::new();
        sink.report(Failure::fetch(1, Error::RemoteStatus { code: 500 }));
        sink.report(Failure::download(2, Error::ChannelClosed));

        let outcome = RunOutcome::Failed(sink.take_failure().unwrap());
        outcome.log_summary();
    });

    assert_eq!(errors_logged.load(Ordering::SeqCst), 1);
}
