//! In-memory collaborators shared by unit tests.

use crate::download::{DownloadError, DownloadStrategy, DownloadedObject};
use crate::grant_client::{AccessScope, GrantAuthority, GrantError};
use crate::strategy::TransferStrategy;
use crate::types::{ObjectDescriptor, ProgressEvent, ProgressSink, ReadGrant, WriteGrant};
use crate::uploader::{ObjectUploader, TransferError};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Grant authority numbering its grants 1, 2, 3...
pub(crate) struct FakeGrants {
    calls: AtomicUsize,
    expires_in: Duration,
    script: Mutex<VecDeque<GrantError>>,
}

impl FakeGrants {
    pub(crate) fn new(expires_in: Duration) -> Arc<Self> {
        Self::failing(expires_in, Vec::new())
    }

    /// Fail the first requests with `errors`, in order
    pub(crate) fn failing(expires_in: Duration, errors: Vec<GrantError>) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            expires_in,
            script: Mutex::new(errors.into()),
        })
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GrantAuthority for FakeGrants {
    async fn request_write_grant(
        &self,
        file_name: &str,
        owner_prefix: &str,
        _content_type: &str,
        caller_identity: &str,
    ) -> Result<WriteGrant, GrantError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(err) = self.script.lock().pop_front() {
            return Err(err);
        }
        Ok(WriteGrant {
            url: format!("https://store.example.com/put/{}", n),
            object_key: format!("{}/{}/{}-{}", owner_prefix, caller_identity, n, file_name),
            bucket: "media".to_string(),
            expires_in: self.expires_in,
            issued_at: Instant::now(),
        })
    }

    async fn request_read_grant(
        &self,
        object_key: &str,
        _scope: &AccessScope,
        expiry: Duration,
    ) -> Result<ReadGrant, GrantError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.script.lock().pop_front() {
            return Err(err);
        }
        Ok(ReadGrant {
            url: format!("https://store.example.com/get/{}", object_key),
            expires_in: expiry,
            issued_at: Instant::now(),
        })
    }
}

/// Uploader that fails named files a set number of times, each call taking
/// `latency` of virtual time
pub(crate) struct FlakyUploader {
    failures: Mutex<HashMap<String, u32>>,
    latency: Duration,
    started: Mutex<Vec<(String, Instant)>>,
    finished: Mutex<Vec<(String, Instant)>>,
}

impl FlakyUploader {
    pub(crate) fn new(failures: &[(&str, u32)], latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            failures: Mutex::new(
                failures
                    .iter()
                    .map(|(name, count)| (name.to_string(), *count))
                    .collect(),
            ),
            latency,
            started: Mutex::new(Vec::new()),
            finished: Mutex::new(Vec::new()),
        })
    }

    /// Instants at which uploads of `file_name` completed, successful or not
    pub(crate) fn finished(&self, file_name: &str) -> Vec<Instant> {
        self.finished
            .lock()
            .iter()
            .filter(|(name, _)| name == file_name)
            .map(|(_, at)| *at)
            .collect()
    }

    pub(crate) fn started_count(&self) -> usize {
        self.started.lock().len()
    }
}

#[async_trait]
impl ObjectUploader for FlakyUploader {
    async fn upload(
        &self,
        body: Bytes,
        grant: &WriteGrant,
        _content_type: &str,
        _strategy: TransferStrategy,
        progress: Option<ProgressSink>,
    ) -> Result<u64, TransferError> {
        let file_name = grant
            .object_key
            .rsplit('/')
            .next()
            .and_then(|segment| segment.split_once('-'))
            .map(|(_, name)| name.to_string())
            .unwrap_or_default();

        self.started.lock().push((file_name.clone(), Instant::now()));
        tokio::time::sleep(self.latency).await;
        self.finished.lock().push((file_name.clone(), Instant::now()));

        let fail = {
            let mut failures = self.failures.lock();
            match failures.get_mut(&file_name) {
                Some(remaining) if *remaining > 0 => {
                    *remaining -= 1;
                    true
                }
                _ => false,
            }
        };
        if fail {
            return Err(TransferError::NetworkOrServer {
                status: Some(500),
                message: "Internal Server Error".to_string(),
            });
        }

        if let Some(sink) = progress {
            sink(ProgressEvent::new(1.0));
        }
        Ok(body.len() as u64)
    }
}

/// Download strategy serving `content:{key}` except for the listed keys
pub(crate) struct FakeStrategy {
    name: &'static str,
    failing: HashSet<String>,
    calls: Mutex<Vec<String>>,
}

impl FakeStrategy {
    pub(crate) fn new(name: &'static str, failing: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            name,
            failing: failing.iter().map(|k| k.to_string()).collect(),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl DownloadStrategy for FakeStrategy {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn fetch(
        &self,
        object: &ObjectDescriptor,
        _scope: &AccessScope,
    ) -> Result<DownloadedObject, DownloadError> {
        self.calls.lock().push(object.key.clone());
        tokio::task::yield_now().await;
        if self.failing.contains(&object.key) {
            return Err(DownloadError::AccessDenied(object.key.clone()));
        }
        Ok(DownloadedObject {
            bytes: Bytes::from(format!("content:{}", object.key)),
            content_type: "image/jpeg".to_string(),
        })
    }
}

pub(crate) fn descriptor(key: &str) -> ObjectDescriptor {
    ObjectDescriptor {
        key: key.to_string(),
        display_url: format!("https://store.example.com/get/{}", key),
        expires_at: chrono::Utc::now(),
    }
}
