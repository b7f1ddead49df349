use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::StatusCode;
use tokio::time::Instant;

use credential_provisioner::backoff::{BackoffPolicy, ConstantJitter, OsJitter};
use credential_provisioner::error::StoreError;
use credential_provisioner::store::{Generation, UploadOptions, VersionedStore};
use credential_provisioner::{IndexUpdater, UpdateOutcome};

struct Document {
    content: Vec<u8>,
    generation: i64,
}

/// In-memory versioned store. Rival writes are applied just before one of our uploads lands,
/// which is exactly when a real concurrent writer would cause a generation mismatch.
struct ScriptedStore {
    doc: Mutex<Document>,
    rival_lines: Mutex<VecDeque<String>>,
    upload_errors: Mutex<VecDeque<StoreError>>,
    missing: bool,
    fail_grant: bool,
    log: Mutex<Vec<String>>,
    attempt_started: Mutex<Vec<Instant>>,
}

impl ScriptedStore {
    fn new(content: &str) -> Self {
        Self::with_bytes(content.as_bytes())
    }

    fn with_bytes(content: &[u8]) -> Self {
        Self {
            doc: Mutex::new(Document {
                content: content.to_vec(),
                generation: 100,
            }),
            rival_lines: Mutex::new(VecDeque::new()),
            upload_errors: Mutex::new(VecDeque::new()),
            missing: false,
            fail_grant: false,
            log: Mutex::new(Vec::new()),
            attempt_started: Mutex::new(Vec::new()),
        }
    }

    fn with_rivals(self, lines: &[&str]) -> Self {
        *self.rival_lines.lock().unwrap() = lines.iter().map(|l| l.to_string()).collect();
        self
    }

    fn content(&self) -> String {
        String::from_utf8(self.bytes()).unwrap()
    }

    fn bytes(&self) -> Vec<u8> {
        self.doc.lock().unwrap().content.clone()
    }

    /// Gaps between consecutive attempts, i.e. the backoff sleeps.
    fn pauses(&self) -> Vec<Duration> {
        let started = self.attempt_started.lock().unwrap();
        started.windows(2).map(|pair| pair[1] - pair[0]).collect()
    }

    fn generation_now(&self) -> i64 {
        self.doc.lock().unwrap().generation
    }

    fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    fn record(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }
}

#[async_trait]
impl VersionedStore for ScriptedStore {
    async fn generation(&self, key: &str) -> Result<Generation, StoreError> {
        self.record("generation".into());
        self.attempt_started.lock().unwrap().push(Instant::now());
        if self.missing {
            return Err(StoreError::NotFound { key: key.into() });
        }
        Ok(Generation(self.generation_now()))
    }

    async fn download(&self, _key: &str) -> Result<Bytes, StoreError> {
        self.record("download".into());
        Ok(Bytes::from(self.bytes()))
    }

    async fn upload(
        &self,
        key: &str,
        content: Bytes,
        options: &UploadOptions,
    ) -> Result<Generation, StoreError> {
        let expected = options.if_generation_match.map(|g| g.0);
        self.record(format!("upload@{}", expected.unwrap_or(-1)));
        if let Some(err) = self.upload_errors.lock().unwrap().pop_front() {
            return Err(err);
        }

        let mut doc = self.doc.lock().unwrap();
        if let Some(line) = self.rival_lines.lock().unwrap().pop_front() {
            doc.content.extend_from_slice(line.as_bytes());
            doc.content.push(b'\n');
            doc.generation += 1;
        }
        if let Some(expected) = expected {
            if expected != doc.generation {
                return Err(StoreError::Conflict { key: key.into() });
            }
        }
        doc.content = content.to_vec();
        doc.generation += 1;
        Ok(Generation(doc.generation))
    }

    async fn grant_reader(&self, key: &str, user: &str) -> Result<(), StoreError> {
        self.record(format!("grant:{key}:{user}"));
        if self.fail_grant {
            return Err(StoreError::Status {
                key: key.into(),
                status: StatusCode::FORBIDDEN,
                body: "acl denied".into(),
            });
        }
        Ok(())
    }

    async fn delete(&self, _key: &str) -> Result<(), StoreError> {
        unreachable!("the updater never deletes")
    }
}

fn updater(store: &Arc<ScriptedStore>) -> IndexUpdater {
    IndexUpdater::new(
        store.clone(),
        BackoffPolicy::exponential(Duration::from_millis(1), 32),
    )
    .with_jitter(Arc::new(ConstantJitter(0.5)))
}

fn lines(content: &str) -> Vec<&str> {
    content.split('\n').collect()
}

#[tokio::test]
async fn replaces_marked_line_and_appends_replacement() {
    let store = Arc::new(ScriptedStore::new("keyA:x\nkeyB:y\n"));

    let outcome = updater(&store)
        .update("alice@example.com/vpn.index", "keyA", "keyA:z")
        .await
        .unwrap();

    assert_eq!(lines(&store.content()), vec!["keyB:y", "keyA:z"]);
    assert_eq!(
        outcome,
        UpdateOutcome::Updated {
            generation: Generation(101),
            conflicts: 0,
            waited: Duration::ZERO,
        }
    );
    assert_eq!(store.log(), vec!["generation", "download", "upload@100"]);
}

#[tokio::test]
async fn conflicts_are_retried_with_fresh_reads() {
    let store = Arc::new(ScriptedStore::new("keyA:x\nkeyB:y\n").with_rivals(&["rival-1", "rival-2"]));

    let outcome = updater(&store)
        .update("shared.index", "keyA", "keyA:z")
        .await
        .unwrap();

    // Each attempt re-reads both generation and content before writing.
    assert_eq!(
        store.log(),
        vec![
            "generation",
            "download",
            "upload@100",
            "generation",
            "download",
            "upload@101",
            "generation",
            "download",
            "upload@102",
        ]
    );
    // Neither rival line was lost.
    assert_eq!(
        lines(&store.content()),
        vec!["keyB:y", "rival-1", "rival-2", "keyA:z"]
    );
    match outcome {
        UpdateOutcome::Updated {
            generation,
            conflicts,
            waited,
        } => {
            assert_eq!(generation, Generation(103));
            assert_eq!(conflicts, 2);
            // (1 + 0.5) + (2 + 0.5) units: each wait is at least 2^i units.
            assert_eq!(waited, Duration::from_micros(4000));
        }
        other => panic!("expected update, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn each_retry_waits_longer_than_the_last() {
    let store = Arc::new(ScriptedStore::new("keyA:x\n").with_rivals(&["r-1", "r-2", "r-3"]));
    let unit = Duration::from_secs(1);
    let updater = IndexUpdater::new(store.clone(), BackoffPolicy::exponential(unit, 32))
        .with_jitter(Arc::new(OsJitter));

    let outcome = updater.update("k", "keyA", "keyA:z").await.unwrap();

    assert!(outcome.is_updated());
    let pauses = store.pauses();
    assert_eq!(pauses.len(), 3);
    for (attempt, pause) in pauses.iter().enumerate() {
        let floor = unit * 2u32.pow(attempt as u32);
        assert!(*pause >= floor, "attempt {attempt} waited {pause:?}");
        assert!(*pause < floor + unit, "attempt {attempt} waited {pause:?}");
    }
    assert!(pauses.windows(2).all(|pair| pair[1] > pair[0]));
}

#[tokio::test]
async fn foreign_bytes_in_surviving_lines_are_written_back_verbatim() {
    let store = Arc::new(ScriptedStore::with_bytes(b"keep:\xff\xfe\nkeyA:x\n"));

    updater(&store).update("k", "keyA", "keyA:z").await.unwrap();

    assert_eq!(store.bytes(), b"keep:\xff\xfe\nkeyA:z".to_vec());
}

#[tokio::test]
async fn fatal_write_errors_abort_without_retrying() {
    let store = Arc::new(ScriptedStore::new("a\n"));
    store
        .upload_errors
        .lock()
        .unwrap()
        .push_back(StoreError::Status {
            key: "k".into(),
            status: StatusCode::FORBIDDEN,
            body: "wrong credentials".into(),
        });

    let err = updater(&store).update("k", "a", "b").await.unwrap_err();

    assert!(matches!(err, StoreError::Status { status, .. } if status == StatusCode::FORBIDDEN));
    assert_eq!(store.log(), vec!["generation", "download", "upload@100"]);
    assert_eq!(store.content(), "a\n");
}

#[tokio::test]
async fn missing_document_is_fatal() {
    let store = Arc::new(ScriptedStore {
        missing: true,
        ..ScriptedStore::new("")
    });

    let err = updater(&store).update("nobody/index", "x", "y").await.unwrap_err();

    assert!(matches!(err, StoreError::NotFound { .. }));
    assert_eq!(store.log(), vec!["generation"]);
}

#[tokio::test]
async fn gives_up_after_the_backoff_ceiling() {
    let rivals: Vec<String> = (0..10).map(|i| format!("rival-{i}")).collect();
    let rival_refs: Vec<&str> = rivals.iter().map(String::as_str).collect();
    let store = Arc::new(ScriptedStore::new("keep\n").with_rivals(&rival_refs));
    let updater = IndexUpdater::new(
        store.clone(),
        BackoffPolicy::exponential(Duration::from_millis(1), 8),
    )
    .with_jitter(Arc::new(ConstantJitter(0.0)));

    let outcome = updater.update("k", "keep", "mine").await.unwrap();

    // Waits of 1, 2, 4 and 8 units reach the 8-unit ceiling after the fourth conflict.
    assert_eq!(
        outcome,
        UpdateOutcome::Exhausted {
            attempts: 4,
            waited: Duration::from_millis(15),
        }
    );
    assert!(!store.content().contains("mine"));
}

#[tokio::test]
async fn repeated_removal_is_a_fixed_point() {
    let store = Arc::new(ScriptedStore::new("dev-1 key\ndev-2 key\n\ndev-3 key\n"));
    let updater = updater(&store);

    updater.update("k", "dev-2", "").await.unwrap();
    let after_first = store.content();
    let generation_after_first = store.generation_now();
    updater.update("k", "dev-2", "").await.unwrap();

    assert_eq!(after_first, "dev-1 key\ndev-3 key\n");
    assert_eq!(store.content(), after_first);
    // The second call still writes, so the generation moves on.
    assert_eq!(store.generation_now(), generation_after_first + 1);
}

#[tokio::test]
async fn user_index_is_shared_with_its_owner_after_writing() {
    let store = Arc::new(ScriptedStore::new("laptop old\n"));

    let outcome = updater(&store)
        .update_user_index("alice@example.com", "vpn.index", "laptop", "laptop new")
        .await
        .unwrap();

    assert!(outcome.is_updated());
    assert_eq!(store.content(), "laptop new");
    assert_eq!(
        store.log().last().map(String::as_str),
        Some("grant:alice@example.com/vpn.index:alice@example.com")
    );
}

#[tokio::test]
async fn grant_failure_is_reported_after_the_write() {
    let store = Arc::new(ScriptedStore {
        fail_grant: true,
        ..ScriptedStore::new("x\n")
    });

    let err = updater(&store)
        .update_user_index("bob@example.com", "web.index", "x", "y")
        .await
        .unwrap_err();

    assert!(matches!(err, StoreError::Status { .. }));
    assert_eq!(store.content(), "y");
}

#[tokio::test]
async fn exhausted_user_index_is_not_shared() {
    let rivals: Vec<String> = (0..10).map(|i| format!("rival-{i}")).collect();
    let rival_refs: Vec<&str> = rivals.iter().map(String::as_str).collect();
    let store = Arc::new(ScriptedStore::new("").with_rivals(&rival_refs));
    let updater = IndexUpdater::new(
        store.clone(),
        BackoffPolicy::exponential(Duration::from_millis(1), 2),
    );

    let outcome = updater
        .update_user_index("carol@example.com", "vpn.index", "x", "y")
        .await
        .unwrap();

    assert!(!outcome.is_updated());
    assert!(store.log().iter().all(|entry| !entry.starts_with("grant:")));
}
