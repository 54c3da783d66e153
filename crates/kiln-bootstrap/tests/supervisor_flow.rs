use async_trait::async_trait;
use kiln_bootstrap::{
    AfterReady, BootstrapError, DatabaseInstance, DatabaseLauncher, InstanceState, Outcome,
    ProcessControl, RetryPolicy, SchemaSync, Supervisor, SupervisorSettings, SyncError,
    UrlPublisher, INTERRUPT_EXIT_CODE,
};
use kiln_db::DatabaseUrl;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;

#[derive(Clone, Default)]
struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

struct FakeLauncher {
    journal: Journal,
    delay: Duration,
    reports: InstanceState,
    stops: Arc<AtomicU32>,
    stop_delay: Duration,
}

struct FakeInstance {
    journal: Journal,
    state: InstanceState,
    stops: Arc<AtomicU32>,
    stop_delay: Duration,
}

#[async_trait]
impl DatabaseLauncher for FakeLauncher {
    type Instance = FakeInstance;

    async fn launch(&self) -> Result<FakeInstance, BootstrapError> {
        self.journal.push("launch");
        sleep(self.delay).await;
        self.journal.push(format!("state:{}", self.reports));
        Ok(FakeInstance {
            journal: self.journal.clone(),
            state: self.reports,
            stops: self.stops.clone(),
            stop_delay: self.stop_delay,
        })
    }
}

#[async_trait]
impl DatabaseInstance for FakeInstance {
    fn state(&self) -> InstanceState {
        self.state
    }

    fn endpoint(&self) -> String {
        "sqlite:///fake/".to_string()
    }

    fn url_for(&self, db_name: &str) -> DatabaseUrl {
        DatabaseUrl::file(format!("/fake/{db_name}.db"))
    }

    async fn stop(&mut self) -> Result<(), BootstrapError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.journal.push("stop");
        sleep(self.stop_delay).await;
        self.state = InstanceState::Stopped;
        Ok(())
    }
}

struct FlakySync {
    journal: Journal,
    attempts: Arc<AtomicU32>,
    fail_first: u32,
}

#[async_trait]
impl SchemaSync for FlakySync {
    async fn push(&self, _url: &DatabaseUrl) -> Result<usize, SyncError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        self.journal.push(format!("sync:{attempt}"));
        if attempt <= self.fail_first {
            Err(SyncError::Unavailable("not accepting connections".to_string()))
        } else {
            Ok(2)
        }
    }
}

struct RecordingPublisher {
    journal: Journal,
    urls: Arc<Mutex<Vec<DatabaseUrl>>>,
}

impl UrlPublisher for RecordingPublisher {
    fn publish(&self, url: &DatabaseUrl) {
        self.journal.push("publish");
        self.urls.lock().unwrap().push(url.clone());
    }
}

struct RecordingProcess {
    exits: Arc<Mutex<Vec<i32>>>,
}

impl ProcessControl for RecordingProcess {
    fn exit(&self, code: i32) {
        self.exits.lock().unwrap().push(code);
    }
}

struct Harness {
    journal: Journal,
    stops: Arc<AtomicU32>,
    attempts: Arc<AtomicU32>,
    urls: Arc<Mutex<Vec<DatabaseUrl>>>,
    exits: Arc<Mutex<Vec<i32>>>,
    supervisor: Supervisor<FakeLauncher, FlakySync>,
}

struct Scenario {
    launch_delay: Duration,
    reports: InstanceState,
    fail_first: u32,
    max_attempts: u32,
    launch_timeout: Duration,
    stop_delay: Duration,
    shutdown_timeout: Duration,
}

impl Default for Scenario {
    fn default() -> Self {
        Self {
            launch_delay: Duration::from_secs(2),
            reports: InstanceState::Primary,
            fail_first: 0,
            max_attempts: 10,
            launch_timeout: Duration::from_secs(30),
            stop_delay: Duration::ZERO,
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

fn harness(scenario: Scenario) -> Harness {
    let journal = Journal::default();
    let stops = Arc::new(AtomicU32::new(0));
    let attempts = Arc::new(AtomicU32::new(0));
    let urls = Arc::new(Mutex::new(Vec::new()));
    let exits = Arc::new(Mutex::new(Vec::new()));

    let supervisor = Supervisor::new(
        FakeLauncher {
            journal: journal.clone(),
            delay: scenario.launch_delay,
            reports: scenario.reports,
            stops: stops.clone(),
            stop_delay: scenario.stop_delay,
        },
        FlakySync {
            journal: journal.clone(),
            attempts: attempts.clone(),
            fail_first: scenario.fail_first,
        },
        Box::new(RecordingPublisher {
            journal: journal.clone(),
            urls: urls.clone(),
        }),
        Box::new(RecordingProcess {
            exits: exits.clone(),
        }),
        SupervisorSettings {
            db_name: "modernmern".to_string(),
            retry: RetryPolicy {
                max_attempts: scenario.max_attempts,
                initial_delay: Duration::from_secs(1),
                multiplier: 2.0,
                max_delay: Duration::from_secs(30),
                jitter: false,
            },
            launch_timeout: scenario.launch_timeout,
            shutdown_timeout: scenario.shutdown_timeout,
        },
    );

    Harness {
        journal,
        stops,
        attempts,
        urls,
        exits,
        supervisor,
    }
}

#[tokio::test(start_paused = true)]
async fn slow_start_with_two_sync_failures_completes_on_third_attempt() {
    let h = harness(Scenario {
        fail_first: 2,
        ..Scenario::default()
    });

    let outcome = h
        .supervisor
        .run(sleep(Duration::from_secs(3600)), AfterReady::WaitForInterrupt)
        .await
        .expect("bootstrap should succeed");

    assert_eq!(outcome, Outcome::Interrupted);
    assert_eq!(h.attempts.load(Ordering::SeqCst), 3);
    assert_eq!(
        h.journal.entries(),
        vec![
            "launch",
            "state:primary",
            "publish",
            "sync:1",
            "sync:2",
            "sync:3",
            "stop",
        ]
    );
    assert_eq!(
        h.urls.lock().unwrap().as_slice(),
        &[DatabaseUrl::file("/fake/modernmern.db")]
    );
}

#[tokio::test(start_paused = true)]
async fn url_is_not_published_before_primary() {
    let h = harness(Scenario {
        reports: InstanceState::Starting,
        ..Scenario::default()
    });

    let err = h
        .supervisor
        .run(std::future::pending(), AfterReady::WaitForInterrupt)
        .await
        .expect_err("an instance that never reports primary is fatal");

    assert!(
        matches!(err, BootstrapError::NotReady(InstanceState::Starting)),
        "got {err:?}"
    );
    assert!(h.urls.lock().unwrap().is_empty(), "url must not be published");
    assert_eq!(h.attempts.load(Ordering::SeqCst), 0, "no sync before primary");
    assert_eq!(h.stops.load(Ordering::SeqCst), 1, "instance is cleaned up");
    assert_eq!(h.journal.entries(), vec!["launch", "state:starting", "stop"]);
}

#[tokio::test(start_paused = true)]
async fn sync_exhaustion_is_fatal_after_budget() {
    let h = harness(Scenario {
        fail_first: u32::MAX,
        max_attempts: 4,
        ..Scenario::default()
    });

    let err = h
        .supervisor
        .run(std::future::pending(), AfterReady::WaitForInterrupt)
        .await
        .expect_err("sync never succeeds");

    match err {
        BootstrapError::SchemaSync { attempts, source } => {
            assert_eq!(attempts, 4);
            assert!(matches!(source, SyncError::Unavailable(_)));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(h.attempts.load(Ordering::SeqCst), 4);
    assert_eq!(h.stops.load(Ordering::SeqCst), 1);
    assert!(h.exits.lock().unwrap().is_empty(), "exit is left to the caller");
}

#[tokio::test(start_paused = true)]
async fn interrupt_during_sync_stops_once_exits_once_and_cancels_retries() {
    let h = harness(Scenario {
        fail_first: u32::MAX,
        ..Scenario::default()
    });

    // Launch finishes at t=2s; attempts at t=2s and t=3s; the third would
    // run at t=5s.
    let outcome = h
        .supervisor
        .run(sleep(Duration::from_secs(4)), AfterReady::WaitForInterrupt)
        .await
        .expect("interrupt is not an error");

    assert_eq!(outcome, Outcome::Interrupted);
    assert_eq!(h.attempts.load(Ordering::SeqCst), 2);
    assert_eq!(h.stops.load(Ordering::SeqCst), 1);
    assert_eq!(*h.exits.lock().unwrap(), vec![INTERRUPT_EXIT_CODE]);

    sleep(Duration::from_secs(120)).await;
    assert_eq!(
        h.attempts.load(Ordering::SeqCst),
        2,
        "no attempts after interrupt"
    );
}

#[tokio::test(start_paused = true)]
async fn interrupt_during_launch_exits_without_publishing() {
    let h = harness(Scenario {
        launch_delay: Duration::from_secs(10),
        ..Scenario::default()
    });

    let outcome = h
        .supervisor
        .run(sleep(Duration::from_secs(1)), AfterReady::WaitForInterrupt)
        .await
        .expect("interrupt is not an error");

    assert_eq!(outcome, Outcome::Interrupted);
    assert_eq!(h.stops.load(Ordering::SeqCst), 0, "nothing was started");
    assert_eq!(*h.exits.lock().unwrap(), vec![INTERRUPT_EXIT_CODE]);
    assert!(h.urls.lock().unwrap().is_empty());
    assert_eq!(h.journal.entries(), vec!["launch"]);
}

#[tokio::test(start_paused = true)]
async fn launch_that_never_settles_times_out() {
    let h = harness(Scenario {
        launch_delay: Duration::from_secs(60),
        launch_timeout: Duration::from_secs(5),
        ..Scenario::default()
    });

    let err = h
        .supervisor
        .run(std::future::pending(), AfterReady::WaitForInterrupt)
        .await
        .expect_err("launch exceeds its bound");

    assert!(
        matches!(err, BootstrapError::LaunchTimeout(d) if d == Duration::from_secs(5)),
        "got {err:?}"
    );
    assert!(h.urls.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn slow_stop_is_bounded_and_exit_still_happens() {
    let h = harness(Scenario {
        stop_delay: Duration::from_secs(600),
        shutdown_timeout: Duration::from_secs(1),
        ..Scenario::default()
    });

    let outcome = h
        .supervisor
        .run(sleep(Duration::from_secs(100)), AfterReady::WaitForInterrupt)
        .await
        .expect("interrupt is not an error");

    assert_eq!(outcome, Outcome::Interrupted);
    assert_eq!(h.stops.load(Ordering::SeqCst), 1);
    assert_eq!(*h.exits.lock().unwrap(), vec![INTERRUPT_EXIT_CODE]);
}
