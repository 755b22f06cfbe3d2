//! In-tree end-to-end tests for the worker runtime

use std::{path::PathBuf, sync::Arc, time::Duration};

use futures::future::BoxFuture;
use pgtemp::PgTempDB;
use pool_db::{JobStatus, NewJob, PoolConfig, PoolDb};
use tokio_util::sync::CancellationToken;

use crate::{
    config::Config,
    handler::{EchoHandler, Handler, HandlerError, HandlerRegistry, JobOutput},
    service::{InitError, Outcome, Worker},
    updater::Updater,
    worker_id::WorkerId,
};

async fn connect(temp_db: &PgTempDB) -> PoolDb {
    PoolDb::connect(temp_db.connection_uri(), &PoolConfig::default())
        .await
        .expect("Failed to connect to pool db")
}

fn test_config() -> Config {
    Config {
        job_types: None,
        max_concurrent: 4,
        batch_size: 4,
        poll_interval: Duration::from_millis(100),
        stale_sweep_interval: Duration::from_secs(600),
        stale_timeout: Duration::from_secs(3600),
        max_attempts: 3,
        update_check_interval: None,
        code_root: PathBuf::from("."),
        managed_files: Vec::new(),
    }
}

/// Polls the job until it reaches a terminal status, with a deadline.
async fn wait_terminal(db: &PoolDb, job_id: pool_db::JobId) -> pool_db::Job {
    for _ in 0..300 {
        let job = db
            .job_by_id(job_id)
            .await
            .expect("Failed to get job")
            .expect("Job not found");
        if job.status.is_terminal() {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("job {job_id} did not reach a terminal status in time");
}

struct PanicHandler;

impl Handler for PanicHandler {
    fn run(&self, _job: pool_db::Job) -> BoxFuture<'static, Result<JobOutput, HandlerError>> {
        Box::pin(async { panic!("boom") })
    }
}

/// Closes the worker's connection pool before returning, so every database
/// call after the handler finishes fails.
struct PoolCloser {
    db: PoolDb,
}

impl Handler for PoolCloser {
    fn run(&self, _job: pool_db::Job) -> BoxFuture<'static, Result<JobOutput, HandlerError>> {
        let db = self.db.clone();
        Box::pin(async move {
            db.pool().close().await;
            Ok(JobOutput {
                data: serde_json::json!({}),
                output: String::new(),
            })
        })
    }
}

#[tokio::test]
async fn worker_executes_jobs_end_to_end() {
    //* Given
    let temp_db = PgTempDB::new();
    let db = connect(&temp_db).await;

    let mut registry = HandlerRegistry::new();
    registry.register("echo", Arc::new(EchoHandler));

    let worker = Worker::new(
        WorkerId::generate(0),
        db.clone(),
        test_config(),
        registry,
        None,
    )
    .expect("Failed to build worker");
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(worker.run(shutdown.clone()));

    //* When
    let mut job_ids = Vec::new();
    for i in 0..3 {
        let id = db
            .insert_job(&NewJob::new(
                "echo",
                serde_json::json!({ "text": format!("msg-{i}") }),
            ))
            .await
            .expect("Failed to insert job");
        job_ids.push(id);
    }

    //* Then
    for (i, job_id) in job_ids.iter().enumerate() {
        let job = wait_terminal(&db, *job_id).await;
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.output.as_deref(), Some(format!("msg-{i}").as_str()));
        assert_eq!(job.exit_code, Some(0));
        assert!(job.claimed_by.is_some());
    }

    shutdown.cancel();
    let outcome = handle.await.expect("Worker task panicked");
    assert_eq!(outcome, Outcome::Shutdown);
}

#[tokio::test]
async fn worker_rejects_an_empty_handler_registry() {
    //* Given
    let temp_db = PgTempDB::new();
    let db = connect(&temp_db).await;

    //* When
    let result = Worker::new(
        WorkerId::generate(0),
        db,
        test_config(),
        HandlerRegistry::new(),
        None,
    );

    //* Then
    assert!(matches!(result, Err(InitError::NoHandlers)));
}

#[tokio::test]
async fn worker_fails_jobs_with_no_registered_handler() {
    //* Given
    let temp_db = PgTempDB::new();
    let db = connect(&temp_db).await;

    let mut registry = HandlerRegistry::new();
    registry.register("echo", Arc::new(EchoHandler));

    let worker = Worker::new(
        WorkerId::generate(0),
        db.clone(),
        test_config(),
        registry,
        None,
    )
    .expect("Failed to build worker");
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(worker.run(shutdown.clone()));

    //* When
    let job_id = db
        .insert_job(&NewJob::new("mystery", serde_json::json!({})))
        .await
        .expect("Failed to insert job");

    //* Then
    let job = wait_terminal(&db, job_id).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.exit_code, Some(127));
    assert!(
        job.error
            .as_deref()
            .is_some_and(|err| err.contains("mystery"))
    );

    shutdown.cancel();
    handle.await.expect("Worker task panicked");
}

#[tokio::test]
async fn worker_records_handler_panics_as_failures() {
    //* Given
    let temp_db = PgTempDB::new();
    let db = connect(&temp_db).await;

    let mut registry = HandlerRegistry::new();
    registry.register("panic", Arc::new(PanicHandler));

    let worker = Worker::new(
        WorkerId::generate(0),
        db.clone(),
        test_config(),
        registry,
        None,
    )
    .expect("Failed to build worker");
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(worker.run(shutdown.clone()));

    //* When
    let job_id = db
        .insert_job(&NewJob::new("panic", serde_json::json!({})))
        .await
        .expect("Failed to insert job");

    //* Then
    let job = wait_terminal(&db, job_id).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.exit_code, Some(101));
    assert_eq!(job.error.as_deref(), Some("job handler panicked"));

    shutdown.cancel();
    handle.await.expect("Worker task panicked");
}

#[tokio::test]
async fn worker_survives_result_recording_failures() {
    //* Given a handler that severs the database before its result lands
    let temp_db = PgTempDB::new();
    let db = connect(&temp_db).await;
    let observer = connect(&temp_db).await;

    let mut registry = HandlerRegistry::new();
    registry.register("sever", Arc::new(PoolCloser { db: db.clone() }));

    let worker = Worker::new(
        WorkerId::generate(0),
        db.clone(),
        test_config(),
        registry,
        None,
    )
    .expect("Failed to build worker");
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(worker.run(shutdown.clone()));

    //* When
    let job_id = observer
        .insert_job(&NewJob::new("sever", serde_json::json!({})))
        .await
        .expect("Failed to insert job");
    for _ in 0..100 {
        let job = observer
            .job_by_id(job_id)
            .await
            .expect("Failed to get job")
            .expect("Job not found");
        if job.status == JobStatus::Running {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    tokio::time::sleep(Duration::from_millis(500)).await;
    shutdown.cancel();

    //* Then the recording failure does not kill the worker
    let outcome = tokio::time::timeout(Duration::from_secs(60), handle)
        .await
        .expect("Worker did not shut down after the recording failure")
        .expect("Worker task panicked");
    assert_eq!(outcome, Outcome::Shutdown);

    // The unreported job stays RUNNING until the stale sweep requeues it.
    let job = observer
        .job_by_id(job_id)
        .await
        .expect("Failed to get job")
        .expect("Job not found");
    assert_eq!(job.status, JobStatus::Running);
}

#[tokio::test]
async fn backlog_is_drained_without_waiting_for_the_poll_interval() {
    //* Given more pending jobs than one claim batch can return
    let temp_db = PgTempDB::new();
    let db = connect(&temp_db).await;

    let mut job_ids = Vec::new();
    for i in 0..3 {
        let id = db
            .insert_job(&NewJob::new(
                "echo",
                serde_json::json!({ "text": format!("msg-{i}") }),
            ))
            .await
            .expect("Failed to insert job");
        job_ids.push(id);
    }

    let mut registry = HandlerRegistry::new();
    registry.register("echo", Arc::new(EchoHandler));
    let config = Config {
        poll_interval: Duration::from_secs(30),
        batch_size: 1,
        ..test_config()
    };

    let worker = Worker::new(WorkerId::generate(0), db.clone(), config, registry, None)
        .expect("Failed to build worker");
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(worker.run(shutdown.clone()));

    //* Then the whole backlog completes long before a second poll tick
    let drained = tokio::time::timeout(Duration::from_secs(5), async {
        for job_id in &job_ids {
            let job = wait_terminal(&db, *job_id).await;
            assert_eq!(job.status, JobStatus::Completed);
        }
    })
    .await;
    assert!(drained.is_ok(), "backlog waited for the poll interval");

    shutdown.cancel();
    handle.await.expect("Worker task panicked");
}

#[tokio::test]
async fn worker_restarts_after_applying_a_code_update() {
    //* Given
    let temp_db = PgTempDB::new();
    let db = connect(&temp_db).await;
    let managed = vec!["worker.py".to_string()];

    // Publisher side: v2 is the published version.
    let server_dir = tempfile::tempdir().expect("Failed to create temp dir");
    std::fs::write(server_dir.path().join("worker.py"), "print('v2')")
        .expect("write failed");
    Updater::new(
        db.clone(),
        server_dir.path().to_path_buf(),
        managed.clone(),
        "server-host".to_string(),
    )
    .publish()
    .await
    .expect("Publish failed");

    // Worker side: still on v1.
    let client_dir = tempfile::tempdir().expect("Failed to create temp dir");
    std::fs::write(client_dir.path().join("worker.py"), "print('v1')")
        .expect("write failed");
    let worker_id = WorkerId::generate(0);
    let updater = Updater::new(
        db.clone(),
        client_dir.path().to_path_buf(),
        managed,
        worker_id.to_string(),
    );

    let config = Config {
        update_check_interval: Some(Duration::from_millis(100)),
        code_root: client_dir.path().to_path_buf(),
        managed_files: vec!["worker.py".to_string()],
        ..test_config()
    };
    let mut registry = HandlerRegistry::new();
    registry.register("echo", Arc::new(EchoHandler));
    let worker =
        Worker::new(worker_id, db, config, registry, Some(updater)).expect("Failed to build worker");

    //* When
    let shutdown = CancellationToken::new();
    let outcome = tokio::time::timeout(Duration::from_secs(30), worker.run(shutdown))
        .await
        .expect("Worker did not restart in time");

    //* Then
    assert_eq!(outcome, Outcome::RestartRequested);
    let updated =
        std::fs::read_to_string(client_dir.path().join("worker.py")).expect("read failed");
    assert_eq!(updated, "print('v2')");
    let backup =
        std::fs::read_to_string(client_dir.path().join("worker.py.bak")).expect("read failed");
    assert_eq!(backup, "print('v1')");
}
