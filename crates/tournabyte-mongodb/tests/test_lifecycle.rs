//! Connection and session lifecycle tests.
//!
//! These tests run against in-process stand-in drivers, so no MongoDB
//! server is needed.
//!
//! Run with: cargo test -p tournabyte-mongodb --test test_lifecycle

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use mongodb::options::{ClientOptions, ReadPreference, SelectionCriteria};
use tournabyte_mongodb::options::{
    app_name, connect_timeout, direct_connection, hosts, read_preference,
};
use tournabyte_mongodb::{
    operation, BoxedOperation, CancellationToken, Connection, DriverClient, Result, StoreError,
};

// =============================================================================
// Stand-in driver
// =============================================================================

#[derive(Debug, Default)]
struct Counters {
    pings: AtomicUsize,
    teardowns: AtomicUsize,
    acquired: AtomicUsize,
    released: AtomicUsize,
}

impl Counters {
    fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Default)]
enum PingReply {
    #[default]
    Healthy,
    Fails(StoreError),
    Hangs,
}

#[derive(Clone, Default)]
struct Behaviour {
    ping: PingReply,
    session_error: Option<StoreError>,
    teardown_hangs: bool,
}

struct MockClient {
    counters: Arc<Counters>,
    behaviour: Behaviour,
    seen_criteria: Arc<Mutex<Option<SelectionCriteria>>>,
}

#[derive(Debug, Default)]
struct MockSession {
    steps: Vec<&'static str>,
}

#[async_trait]
impl DriverClient for MockClient {
    type Session = MockSession;

    async fn ping(&self, criteria: Option<SelectionCriteria>) -> Result<()> {
        self.counters.pings.fetch_add(1, Ordering::SeqCst);
        *self.seen_criteria.lock().unwrap() = criteria;
        match &self.behaviour.ping {
            PingReply::Healthy => Ok(()),
            PingReply::Fails(err) => Err(err.clone()),
            PingReply::Hangs => {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            }
        }
    }

    async fn acquire_session(&self) -> Result<MockSession> {
        self.counters.acquired.fetch_add(1, Ordering::SeqCst);
        match &self.behaviour.session_error {
            Some(err) => Err(err.clone()),
            None => Ok(MockSession::default()),
        }
    }

    fn release_session(&self, _session: MockSession) {
        self.counters.released.fetch_add(1, Ordering::SeqCst);
    }

    async fn teardown(self) -> Result<()> {
        self.counters.teardowns.fetch_add(1, Ordering::SeqCst);
        if self.behaviour.teardown_hangs {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
        Ok(())
    }
}

struct Harness {
    counters: Arc<Counters>,
    seen_criteria: Arc<Mutex<Option<SelectionCriteria>>>,
    behaviour: Behaviour,
}

impl Harness {
    fn new(behaviour: Behaviour) -> Self {
        Self {
            counters: Arc::new(Counters::default()),
            seen_criteria: Arc::new(Mutex::new(None)),
            behaviour,
        }
    }

    fn factory(&self) -> impl Fn(ClientOptions) -> Result<MockClient> + '_ {
        move |_options| {
            Ok(MockClient {
                counters: self.counters.clone(),
                behaviour: self.behaviour.clone(),
                seen_criteria: self.seen_criteria.clone(),
            })
        }
    }

    async fn connect(&self) -> Result<Connection<MockClient>> {
        Connection::connect_with(
            &self.factory(),
            &CancellationToken::new(),
            vec![app_name("dbxtestcase"), hosts(["127.0.0.1"]), direct_connection(true)],
        )
        .await
    }
}

type Log = Arc<Mutex<Vec<&'static str>>>;

fn ok_op(name: &'static str, log: &Log) -> BoxedOperation<MockSession> {
    let log = log.clone();
    operation(move |session: &mut MockSession| {
        let log = log.clone();
        async move {
            session.steps.push(name);
            log.lock().unwrap().push(name);
            Ok(())
        }
        .boxed()
    })
}

fn failing_op(name: &'static str, log: &Log) -> BoxedOperation<MockSession> {
    let log = log.clone();
    operation(move |_session: &mut MockSession| {
        let log = log.clone();
        async move {
            log.lock().unwrap().push(name);
            Err(StoreError::MongoDB(format!("{} failed", name)))
        }
        .boxed()
    })
}

// =============================================================================
// Connect / health check
// =============================================================================

#[tokio::test]
async fn test_connect_with_healthy_ping() {
    let _ = tracing_subscriber::fmt::try_init();
    let harness = Harness::new(Behaviour::default());

    let conn = harness.connect().await.unwrap();

    assert_eq!(Counters::get(&harness.counters.pings), 1);
    assert_eq!(Counters::get(&harness.counters.teardowns), 0);
    assert_eq!(conn.options().app_name.as_deref(), Some("dbxtestcase"));
    assert_eq!(conn.options().direct_connection, Some(true));

    conn.disconnect(&CancellationToken::new()).await.unwrap();
    assert_eq!(Counters::get(&harness.counters.teardowns), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_disconnect_stops_waiting_for_teardown() {
    let harness = Harness::new(Behaviour {
        teardown_hangs: true,
        ..Behaviour::default()
    });
    let conn = harness.connect().await.unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        trigger.cancel();
    });

    let err = conn.disconnect(&cancel).await.unwrap_err();

    assert_eq!(err, StoreError::Cancelled("disconnect".to_string()));
    assert_eq!(Counters::get(&harness.counters.teardowns), 1);
}

#[tokio::test]
async fn test_connect_passes_read_preference_to_ping() {
    let harness = Harness::new(Behaviour::default());

    let conn = Connection::connect_with(
        &harness.factory(),
        &CancellationToken::new(),
        vec![read_preference(ReadPreference::Primary)],
    )
    .await
    .unwrap();

    let seen = harness.seen_criteria.lock().unwrap().clone();
    assert!(matches!(
        seen,
        Some(SelectionCriteria::ReadPreference(ReadPreference::Primary))
    ));
    conn.disconnect(&CancellationToken::new()).await.unwrap();
}

#[tokio::test]
async fn test_invalid_configuration_never_builds_client() {
    let harness = Harness::new(Behaviour::default());
    let built = AtomicUsize::new(0);
    let factory = |options: ClientOptions| {
        built.fetch_add(1, Ordering::SeqCst);
        harness.factory()(options)
    };

    let result = Connection::connect_with(
        &factory,
        &CancellationToken::new(),
        vec![
            app_name("dbxtestcase"),
            hosts(["127.0.0.1:27017", "127.0.0.1:27000"]),
            direct_connection(true),
        ],
    )
    .await;

    assert!(matches!(result, Err(StoreError::ConfigValidation(_))));
    assert_eq!(built.load(Ordering::SeqCst), 0);
    assert_eq!(Counters::get(&harness.counters.pings), 0);
}

#[tokio::test]
async fn test_factory_failure_returned_without_ping() {
    let harness = Harness::new(Behaviour::default());
    let factory = |_options: ClientOptions| -> Result<MockClient> {
        Err(StoreError::ConnectionEstablishment("client creation failure".to_string()))
    };

    let err = Connection::connect_with(
        &factory,
        &CancellationToken::new(),
        vec![app_name("dbxtestcase"), hosts(["127.0.0.1"]), direct_connection(true)],
    )
    .await
    .unwrap_err();

    assert_eq!(
        err,
        StoreError::ConnectionEstablishment("client creation failure".to_string())
    );
    assert_eq!(Counters::get(&harness.counters.pings), 0);
    assert_eq!(Counters::get(&harness.counters.teardowns), 0);
}

#[tokio::test]
async fn test_slow_ping_tears_down_once() {
    let harness = Harness::new(Behaviour {
        ping: PingReply::Hangs,
        ..Default::default()
    });

    let err = Connection::connect_with(
        &harness.factory(),
        &CancellationToken::new(),
        vec![connect_timeout(Duration::from_millis(1))],
    )
    .await
    .unwrap_err();

    assert!(matches!(err, StoreError::HealthCheck(_)));
    assert_eq!(Counters::get(&harness.counters.pings), 1);
    assert_eq!(Counters::get(&harness.counters.teardowns), 1);
}

#[tokio::test(start_paused = true)]
async fn test_health_check_defaults_to_five_second_deadline() {
    let harness = Harness::new(Behaviour {
        ping: PingReply::Hangs,
        ..Default::default()
    });

    let started = tokio::time::Instant::now();
    let err = harness.connect().await.unwrap_err();

    assert!(matches!(err, StoreError::HealthCheck(_)));
    assert!(started.elapsed() >= Duration::from_secs(5));
    assert!(started.elapsed() < Duration::from_secs(6));
    assert_eq!(Counters::get(&harness.counters.teardowns), 1);
}

#[tokio::test]
async fn test_ping_failure_becomes_health_check_error() {
    let harness = Harness::new(Behaviour {
        ping: PingReply::Fails(StoreError::MongoDB("server selection error".to_string())),
        ..Default::default()
    });

    let err = harness.connect().await.unwrap_err();

    assert_eq!(
        err,
        StoreError::HealthCheck("MongoDB error: server selection error".to_string())
    );
    assert_eq!(Counters::get(&harness.counters.teardowns), 1);
}

#[tokio::test]
async fn test_cancelled_health_check_tears_down() {
    let harness = Harness::new(Behaviour {
        ping: PingReply::Hangs,
        ..Default::default()
    });
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        trigger.cancel();
    });

    let err = Connection::connect_with(&harness.factory(), &cancel, Vec::new())
        .await
        .unwrap_err();

    assert!(matches!(err, StoreError::Cancelled(_)));
    assert_eq!(Counters::get(&harness.counters.teardowns), 1);
}

// =============================================================================
// Sessions
// =============================================================================

#[tokio::test]
async fn test_session_runs_operations_in_order() {
    let harness = Harness::new(Behaviour::default());
    let conn = harness.connect().await.unwrap();
    let log: Log = Arc::default();

    conn.with_session(
        &CancellationToken::new(),
        vec![ok_op("first", &log), ok_op("second", &log), ok_op("third", &log)],
    )
    .await
    .unwrap();

    assert_eq!(*log.lock().unwrap(), ["first", "second", "third"]);
    assert_eq!(Counters::get(&harness.counters.acquired), 1);
    assert_eq!(Counters::get(&harness.counters.released), 1);
}

#[tokio::test]
async fn test_session_stops_at_first_failure() {
    let harness = Harness::new(Behaviour::default());
    let conn = harness.connect().await.unwrap();
    let log: Log = Arc::default();

    let err = conn
        .with_session(
            &CancellationToken::new(),
            vec![ok_op("ok-1", &log), failing_op("fail", &log), ok_op("ok-2", &log)],
        )
        .await
        .unwrap_err();

    assert_eq!(err, StoreError::MongoDB("fail failed".to_string()));
    assert_eq!(*log.lock().unwrap(), ["ok-1", "fail"]);
    assert_eq!(Counters::get(&harness.counters.released), 1);
}

#[tokio::test]
async fn test_session_start_failure_runs_nothing() {
    let harness = Harness::new(Behaviour {
        session_error: Some(StoreError::MongoDB("no sessions".to_string())),
        ..Default::default()
    });
    let conn = harness.connect().await.unwrap();
    let log: Log = Arc::default();

    let err = conn
        .with_session(&CancellationToken::new(), vec![ok_op("never", &log)])
        .await
        .unwrap_err();

    assert!(matches!(err, StoreError::SessionStart(_)));
    assert!(log.lock().unwrap().is_empty());
    assert_eq!(Counters::get(&harness.counters.released), 0);
}

#[tokio::test]
async fn test_empty_session_still_released() {
    let harness = Harness::new(Behaviour::default());
    let conn = harness.connect().await.unwrap();

    conn.with_session(&CancellationToken::new(), Vec::new())
        .await
        .unwrap();

    assert_eq!(Counters::get(&harness.counters.acquired), 1);
    assert_eq!(Counters::get(&harness.counters.released), 1);
}

#[tokio::test]
async fn test_panicking_operation_releases_session_once() {
    let harness = Harness::new(Behaviour::default());
    let conn = harness.connect().await.unwrap();
    let log: Log = Arc::default();

    let panicking = operation(|session: &mut MockSession| {
        async move {
            if !session.steps.is_empty() {
                panic!("operation blew up after {:?}", session.steps);
            }
            Ok(())
        }
        .boxed()
    });

    let outcome = AssertUnwindSafe(conn.with_session(
        &CancellationToken::new(),
        vec![ok_op("before", &log), panicking, ok_op("after", &log)],
    ))
    .catch_unwind()
    .await;

    assert!(outcome.is_err());
    assert_eq!(*log.lock().unwrap(), ["before"]);
    assert_eq!(Counters::get(&harness.counters.released), 1);
}

#[tokio::test]
async fn test_cancelled_before_start_acquires_nothing() {
    let harness = Harness::new(Behaviour::default());
    let conn = harness.connect().await.unwrap();
    let log: Log = Arc::default();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = conn
        .with_session(&cancel, vec![ok_op("never", &log)])
        .await
        .unwrap_err();

    assert!(matches!(err, StoreError::Cancelled(_)));
    assert_eq!(Counters::get(&harness.counters.acquired), 0);
    assert_eq!(Counters::get(&harness.counters.released), 0);
    assert!(log.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_cancelled_mid_operation_releases_session() {
    let harness = Harness::new(Behaviour::default());
    let conn = harness.connect().await.unwrap();
    let log: Log = Arc::default();

    let slow = operation(|_session: &mut MockSession| {
        async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }
        .boxed()
    });

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        trigger.cancel();
    });

    let err = conn
        .with_session(&cancel, vec![ok_op("first", &log), slow, ok_op("never", &log)])
        .await
        .unwrap_err();

    assert_eq!(err, StoreError::Cancelled("session operation 1".to_string()));
    assert_eq!(*log.lock().unwrap(), ["first"]);
    assert_eq!(Counters::get(&harness.counters.released), 1);
}

#[tokio::test]
async fn test_sessions_are_not_shared_between_calls() {
    let harness = Harness::new(Behaviour::default());
    let conn = harness.connect().await.unwrap();
    let log: Log = Arc::default();

    conn.with_session(&CancellationToken::new(), vec![ok_op("a", &log)])
        .await
        .unwrap();
    conn.with_session(&CancellationToken::new(), vec![ok_op("b", &log)])
        .await
        .unwrap();

    assert_eq!(Counters::get(&harness.counters.acquired), 2);
    assert_eq!(Counters::get(&harness.counters.released), 2);
}
