use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use nimbus_storage::{
    AccessLevel, BackendCompletion, BackendError, DownloadJob, ListedObject, Progress,
    StorageError, StorageGetRequest, StorageGetResult, StorageListRequest, StoragePutRequest,
    StoragePutResult, StorageRemoveRequest, TransferBackend, TransferDestination, TransferEvent,
    TransferError, TransferHandlers, TransferOrchestrator, TransferTask, UploadJob, UploadSize,
    UploadSource, ValidationError,
};
use url::Url;
use uuid::Uuid;

const IDENTITY: &str = "us-east-1:me";

#[derive(Debug)]
struct FakeTask;

impl TransferTask for FakeTask {
    fn id(&self) -> Uuid {
        Uuid::nil()
    }

    fn cancel(&self) {}

    fn is_cancelled(&self) -> bool {
        false
    }
}

/// How the fake backend answers a transfer
#[derive(Clone)]
enum Script {
    Complete {
        progress: Vec<Progress>,
        completion: BackendCompletion,
    },
    CreationFails(&'static str),
    NoTask,
}

struct FakeBackend {
    script: Script,
    downloads: Mutex<Vec<DownloadJob>>,
    uploads: Mutex<Vec<UploadJob>>,
    removed: Mutex<Vec<String>>,
    listed_prefix: Mutex<Option<String>>,
    objects: Vec<ListedObject>,
}

impl FakeBackend {
    fn build(script: Script, objects: Vec<ListedObject>) -> Arc<Self> {
        Arc::new(Self {
            script,
            downloads: Mutex::new(Vec::new()),
            uploads: Mutex::new(Vec::new()),
            removed: Mutex::new(Vec::new()),
            listed_prefix: Mutex::new(None),
            objects,
        })
    }

    fn new(script: Script) -> Arc<Self> {
        Self::build(script, Vec::new())
    }

    fn completing(completion: BackendCompletion) -> Arc<Self> {
        Self::new(Script::Complete {
            progress: Vec::new(),
            completion,
        })
    }

    fn with_objects(objects: Vec<ListedObject>) -> Arc<Self> {
        Self::build(Script::NoTask, objects)
    }

    fn run<R: Send + 'static>(&self, handlers: TransferHandlers<R>) {
        let TransferHandlers {
            created,
            progress,
            completion,
        } = handlers;

        match self.script.clone() {
            Script::CreationFails(reason) => {
                let io = std::io::Error::new(std::io::ErrorKind::Other, reason);
                created.handle(Err(BackendError::with_source("could not create task", io)));
            }
            Script::NoTask => created.handle(Ok(None)),
            Script::Complete {
                progress: updates,
                completion: signal,
            } => {
                created.handle(Ok(Some(Arc::new(FakeTask))));
                tokio::spawn(async move {
                    for update in updates {
                        progress.handle(update);
                    }
                    completion.handle(signal);
                });
            }
        }
    }
}

#[async_trait]
impl TransferBackend for FakeBackend {
    fn start_download(&self, job: DownloadJob, handlers: TransferHandlers<StorageGetResult>) {
        self.downloads.lock().unwrap().push(job);
        self.run(handlers);
    }

    fn start_upload(&self, job: UploadJob, handlers: TransferHandlers<StoragePutResult>) {
        self.uploads.lock().unwrap().push(job);
        self.run(handlers);
    }

    fn presigned_url(&self, service_key: &str, expires_secs: u64) -> Result<Url, BackendError> {
        Url::parse(&format!(
            "https://store.example.com/{}?expires={}",
            service_key, expires_secs
        ))
        .map_err(|e| BackendError::with_source("bad url", e))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ListedObject>, BackendError> {
        *self.listed_prefix.lock().unwrap() = Some(prefix.to_string());
        Ok(self
            .objects
            .iter()
            .filter(|o| o.service_key.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn remove(&self, service_key: &str) -> Result<(), BackendError> {
        self.removed.lock().unwrap().push(service_key.to_string());
        Ok(())
    }
}

fn orchestrator(backend: Arc<FakeBackend>) -> anyhow::Result<TransferOrchestrator> {
    Ok(TransferOrchestrator::new(backend, IDENTITY)?)
}

fn listed(service_key: &str) -> ListedObject {
    ListedObject {
        service_key: service_key.to_string(),
        size: 1,
        etag: None,
        last_modified: None,
    }
}

#[test]
fn test_empty_identity_rejected() {
    let result = TransferOrchestrator::new(FakeBackend::new(Script::NoTask), "");
    assert!(matches!(result, Err(StorageError::Config(_))));
}

#[tokio::test]
async fn test_get_completes_with_payload() -> anyhow::Result<()> {
    let backend = FakeBackend::new(Script::Complete {
        progress: vec![Progress::new(1, Some(2)), Progress::new(2, Some(2))],
        completion: BackendCompletion::ok(Some(Bytes::from_static(b"hi"))),
    });
    let events = orchestrator(backend.clone())?
        .get(StorageGetRequest::new("notes.txt"))
        .collect()
        .await;

    assert_eq!(events.len(), 4);
    assert!(matches!(events[0], TransferEvent::Initiated(_)));
    assert!(matches!(events[1], TransferEvent::Progress(p) if p.completed_bytes == 1));
    assert!(matches!(events[2], TransferEvent::Progress(p) if p.completed_bytes == 2));
    match &events[3] {
        TransferEvent::Completed(StorageGetResult::Data(data)) => assert_eq!(data, "hi"),
        other => panic!("expected data, got {:?}", other),
    }

    let downloads = backend.downloads.lock().unwrap();
    assert_eq!(downloads[0].service_key, "public/notes.txt");
    assert_eq!(downloads[0].file, None);
    Ok(())
}

#[tokio::test]
async fn test_get_not_found() -> anyhow::Result<()> {
    let backend = FakeBackend::completing(BackendCompletion::status(404));
    let err = orchestrator(backend)?
        .get(StorageGetRequest::new("missing.txt"))
        .result()
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(err.description(), "The key was not found");
    Ok(())
}

#[tokio::test]
async fn test_get_http_status_error() -> anyhow::Result<()> {
    let backend = FakeBackend::completing(BackendCompletion::status(403));
    let err = orchestrator(backend)?
        .get(StorageGetRequest::new("secret.txt"))
        .result()
        .await
        .unwrap_err();
    assert!(matches!(err, TransferError::HttpStatusError { status: 403, .. }));
    assert_eq!(err.description(), "status code 403");
    assert_eq!(err.recovery_suggestion(), "Check the status code");
    Ok(())
}

#[tokio::test]
async fn test_get_missing_status() -> anyhow::Result<()> {
    let backend = FakeBackend::completing(BackendCompletion::no_response(None));
    let err = orchestrator(backend)?
        .get(StorageGetRequest::new("a.txt"))
        .result()
        .await
        .unwrap_err();
    assert_eq!(err.description(), "Missing HTTP Status");
    Ok(())
}

#[tokio::test]
async fn test_get_to_file_yields_path() -> anyhow::Result<()> {
    let backend = FakeBackend::completing(BackendCompletion::ok(None));
    let path = std::env::temp_dir().join("nimbus-orchestrator-test.bin");
    let result = orchestrator(backend.clone())?
        .get(
            StorageGetRequest::new("a.bin")
                .with_destination(TransferDestination::File(path.clone())),
        )
        .result()
        .await?;
    assert_eq!(result, StorageGetResult::File(path.clone()));
    assert_eq!(backend.downloads.lock().unwrap()[0].file, Some(path));
    Ok(())
}

#[tokio::test]
async fn test_creation_failure_is_the_only_event() -> anyhow::Result<()> {
    let backend = FakeBackend::new(Script::CreationFails("disk full"));
    let events = orchestrator(backend)?
        .get(StorageGetRequest::new("a.txt"))
        .collect()
        .await;
    assert_eq!(events.len(), 1);
    match &events[0] {
        TransferEvent::Failed(err) => assert_eq!(err.description(), "Error: disk full"),
        other => panic!("expected failure, got {:?}", other),
    }
    Ok(())
}

#[tokio::test]
async fn test_no_task_is_the_only_event() -> anyhow::Result<()> {
    let backend = FakeBackend::new(Script::NoTask);
    let events = orchestrator(backend)?
        .put(StoragePutRequest::new(
            "a.txt",
            UploadSource::Data(Bytes::from_static(b"x")),
        ))
        .collect()
        .await;
    assert_eq!(events.len(), 1);
    match &events[0] {
        TransferEvent::Failed(err) => assert_eq!(err.description(), "No ContinuationBlock data"),
        other => panic!("expected failure, got {:?}", other),
    }
    Ok(())
}

#[tokio::test]
async fn test_validation_fails_before_backend() -> anyhow::Result<()> {
    let backend = FakeBackend::completing(BackendCompletion::ok(None));
    let orchestrator = orchestrator(backend.clone())?;

    let events = orchestrator.get(StorageGetRequest::new("")).collect().await;
    assert_eq!(events.len(), 1);
    assert!(matches!(
        events[0],
        TransferEvent::Failed(TransferError::Validation(ValidationError::KeyIsEmpty))
    ));

    let err = orchestrator
        .get(
            StorageGetRequest::new("a.txt")
                .with_access_level(AccessLevel::Private)
                .with_target_identity("someone-else"),
        )
        .result()
        .await
        .unwrap_err();
    assert_eq!(err, TransferError::Validation(ValidationError::PrivateWithTarget));
    assert_eq!(
        err.description(),
        "A target identity id cannot be used with the private access level"
    );

    let err = orchestrator
        .put(
            StoragePutRequest::new("a.txt", UploadSource::Data(Bytes::new()))
                .with_metadata("Owner", "me"),
        )
        .result()
        .await
        .unwrap_err();
    assert_eq!(err.validation(), Some(ValidationError::MetadataKeysInvalid));

    let err = orchestrator
        .put(
            StoragePutRequest::new("a.txt", UploadSource::Data(Bytes::new()))
                .with_content_type(""),
        )
        .result()
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        TransferError::Validation(ValidationError::ContentTypeIsEmpty)
    ));

    assert!(backend.downloads.lock().unwrap().is_empty());
    assert!(backend.uploads.lock().unwrap().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_target_identity_overrides_own() -> anyhow::Result<()> {
    let backend = FakeBackend::completing(BackendCompletion::ok(None));
    orchestrator(backend.clone())?
        .get(
            StorageGetRequest::new("shared.jpg")
                .with_access_level(AccessLevel::Protected)
                .with_target_identity("friend"),
        )
        .result()
        .await?;
    assert_eq!(
        backend.downloads.lock().unwrap()[0].service_key,
        "protected/friend/shared.jpg"
    );
    Ok(())
}

#[tokio::test]
async fn test_url_destination_has_no_initiated_event() -> anyhow::Result<()> {
    let backend = FakeBackend::new(Script::NoTask);
    let orchestrator = orchestrator(backend)?.with_default_url_expiry(60);

    let events = orchestrator
        .get(
            StorageGetRequest::new("a.txt")
                .with_access_level(AccessLevel::Private)
                .with_destination(TransferDestination::Url { expires: None }),
        )
        .collect()
        .await;
    assert_eq!(events.len(), 1);
    match &events[0] {
        TransferEvent::Completed(StorageGetResult::Url(url)) => {
            assert_eq!(url.path(), "/private/us-east-1:me/a.txt");
            assert_eq!(url.query(), Some("expires=60"));
        }
        other => panic!("expected url, got {:?}", other),
    }

    let err = orchestrator
        .get(StorageGetRequest::new("a.txt").with_destination(TransferDestination::Url {
            expires: Some(0),
        }))
        .result()
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        TransferError::Validation(ValidationError::ExpiresIsInvalid)
    ));
    Ok(())
}

#[tokio::test]
async fn test_put_prefixes_metadata_and_returns_key() -> anyhow::Result<()> {
    let backend = FakeBackend::completing(BackendCompletion::ok(None));
    let result = orchestrator(backend.clone())?
        .put(
            StoragePutRequest::new("docs/a.json", UploadSource::Data(Bytes::from_static(b"{}")))
                .with_access_level(AccessLevel::Protected)
                .with_content_type("application/json")
                .with_metadata("owner", "me"),
        )
        .result()
        .await?;
    assert_eq!(result.key, "docs/a.json");

    let job = backend.uploads.lock().unwrap()[0].clone();
    assert_eq!(job.service_key, "protected/us-east-1:me/docs/a.json");
    assert_eq!(job.content_type.as_deref(), Some("application/json"));
    assert_eq!(job.size().await, UploadSize::Normal);
    let metadata = job.metadata.as_ref().unwrap();
    assert_eq!(metadata.get("x-amz-meta-owner").map(String::as_str), Some("me"));
    Ok(())
}

#[tokio::test]
async fn test_put_missing_file_is_normal_upload() -> anyhow::Result<()> {
    let backend = FakeBackend::completing(BackendCompletion::ok(None));
    orchestrator(backend.clone())?
        .put(StoragePutRequest::new(
            "a.txt",
            UploadSource::File("/nonexistent/nimbus/a.txt".into()),
        ))
        .result()
        .await?;
    let job = backend.uploads.lock().unwrap()[0].clone();
    assert_eq!(job.size().await, UploadSize::Normal);
    assert_eq!(job.content_type.as_deref(), Some("text/plain"));
    Ok(())
}

#[tokio::test]
async fn test_put_file_size_read_by_backend() -> anyhow::Result<()> {
    let file = tempfile::NamedTempFile::new()?;
    file.as_file().set_len(10_000_001)?;

    let backend = FakeBackend::completing(BackendCompletion::ok(None));
    orchestrator(backend.clone())?
        .put(StoragePutRequest::new(
            "big.bin",
            UploadSource::File(file.path().to_path_buf()),
        ))
        .result()
        .await?;

    let job = backend.uploads.lock().unwrap()[0].clone();
    assert_eq!(job.size().await, UploadSize::Large);
    Ok(())
}

#[tokio::test]
async fn test_list_strips_prefix() -> anyhow::Result<()> {
    let backend = FakeBackend::with_objects(vec![
        listed("protected/us-east-1:me/photos/a.jpg"),
        listed("protected/us-east-1:me/photos/b.jpg"),
        listed("protected/someone/photos/c.jpg"),
    ]);
    let result = orchestrator(backend.clone())?
        .list(
            StorageListRequest::new()
                .with_access_level(AccessLevel::Protected)
                .with_path("photos/"),
        )
        .await?;

    let keys: Vec<_> = result.items.iter().map(|i| i.key.as_str()).collect();
    assert_eq!(keys, vec!["photos/a.jpg", "photos/b.jpg"]);
    assert_eq!(
        backend.listed_prefix.lock().unwrap().as_deref(),
        Some("protected/us-east-1:me/photos/")
    );
    Ok(())
}

#[tokio::test]
async fn test_list_rejects_empty_path() -> anyhow::Result<()> {
    let backend = FakeBackend::with_objects(Vec::new());
    let err = orchestrator(backend)?
        .list(StorageListRequest::new().with_path(""))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StorageError::Validation(ValidationError::PathIsEmpty)
    ));
    Ok(())
}

#[tokio::test]
async fn test_remove_derives_key() -> anyhow::Result<()> {
    let backend = FakeBackend::new(Script::NoTask);
    let result = orchestrator(backend.clone())?
        .remove(StorageRemoveRequest::new("old.txt").with_access_level(AccessLevel::Private))
        .await?;
    assert_eq!(result.key, "old.txt");
    assert_eq!(
        backend.removed.lock().unwrap().as_slice(),
        ["private/us-east-1:me/old.txt".to_string()]
    );
    Ok(())
}
