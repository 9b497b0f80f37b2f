//! An in-process [`ObjectStoreClient`] used by the test suites.
//!
//! Behaves like a tiny single-node object store: buckets, keys, storage
//! classes, ranged reads, and the multipart session lifecycle. Failures can
//! be scripted per operation to exercise the resilience envelope.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::SystemTime;

use async_trait::async_trait;
use bytes::Bytes;
use tierstore_core::{ByteRange, ObjectMetadata};

use crate::error::ClientError;
use crate::{CompletedPart, ObjectStoreClient};

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    content_type: String,
    storage_class: String,
    last_modified: SystemTime,
    etag: String,
    metadata: HashMap<String, String>,
}

#[derive(Debug)]
struct MultipartSession {
    bucket: String,
    key: String,
    content_type: String,
    storage_class: String,
    parts: BTreeMap<i32, Bytes>,
}

#[derive(Default)]
struct Inner {
    buckets: HashSet<String>,
    objects: HashMap<(String, String), StoredObject>,
    sessions: HashMap<String, MultipartSession>,
    // Scripted failures, keyed by operation name, consumed FIFO.
    failures: HashMap<&'static str, VecDeque<ClientError>>,
    calls: HashMap<&'static str, u64>,
}

/// In-memory object store for tests.
pub struct InMemoryClient {
    inner: Mutex<Inner>,
    upload_seq: AtomicU64,
}

impl Default for InMemoryClient {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryClient {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            upload_seq: AtomicU64::new(1),
        }
    }

    /// Creates a client with one pre-existing bucket.
    pub fn with_bucket(bucket: impl Into<String>) -> Self {
        let client = Self::new();
        client.create_bucket(bucket);
        client
    }

    pub fn create_bucket(&self, bucket: impl Into<String>) {
        self.inner.lock().unwrap().buckets.insert(bucket.into());
    }

    /// Scripts the next call to `operation` to fail with `err`. Multiple
    /// scripted failures for the same operation are consumed in order.
    pub fn fail_next(&self, operation: &'static str, err: ClientError) {
        self.inner
            .lock()
            .unwrap()
            .failures
            .entry(operation)
            .or_default()
            .push_back(err);
    }

    /// Number of completed calls (including failed ones) per operation.
    pub fn call_count(&self, operation: &'static str) -> u64 {
        *self
            .inner
            .lock()
            .unwrap()
            .calls
            .get(operation)
            .unwrap_or(&0)
    }

    /// Storage class the object was stored with, if present.
    pub fn storage_class_of(&self, bucket: &str, key: &str) -> Option<String> {
        self.inner
            .lock()
            .unwrap()
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|o| o.storage_class.clone())
    }

    /// Raw object bytes, if present.
    pub fn object_bytes(&self, bucket: &str, key: &str) -> Option<Bytes> {
        self.inner
            .lock()
            .unwrap()
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|o| o.data.clone())
    }

    /// Overrides the stored last-modified timestamp; used by deletion-embargo
    /// tests to age an object.
    pub fn set_last_modified(&self, bucket: &str, key: &str, when: SystemTime) {
        if let Some(obj) = self
            .inner
            .lock()
            .unwrap()
            .objects
            .get_mut(&(bucket.to_string(), key.to_string()))
        {
            obj.last_modified = when;
        }
    }

    /// Open multipart session count; completed and aborted sessions are gone.
    pub fn open_multipart_sessions(&self) -> usize {
        self.inner.lock().unwrap().sessions.len()
    }

    fn begin(&self, inner: &mut Inner, operation: &'static str) -> Result<(), ClientError> {
        *inner.calls.entry(operation).or_insert(0) += 1;
        if let Some(queue) = inner.failures.get_mut(operation) {
            if let Some(err) = queue.pop_front() {
                return Err(err);
            }
        }
        Ok(())
    }

    fn check_bucket(inner: &Inner, bucket: &str) -> Result<(), ClientError> {
        if inner.buckets.contains(bucket) {
            Ok(())
        } else {
            Err(ClientError::NoSuchBucket {
                bucket: bucket.to_string(),
            })
        }
    }
}

fn compute_etag(data: &[u8]) -> String {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    data.hash(&mut hasher);
    format!("\"{:016x}\"", hasher.finish())
}

fn metadata_of(key: &str, obj: &StoredObject) -> ObjectMetadata {
    ObjectMetadata {
        key: key.to_string(),
        size: obj.data.len() as u64,
        last_modified: obj.last_modified,
        etag: obj.etag.clone(),
        content_type: obj.content_type.clone(),
        metadata: obj.metadata.clone(),
    }
}

#[async_trait]
impl ObjectStoreClient for InMemoryClient {
    async fn head_bucket(&self, bucket: &str) -> Result<(), ClientError> {
        let mut inner = self.inner.lock().unwrap();
        self.begin(&mut inner, "head_bucket")?;
        Self::check_bucket(&inner, bucket)
    }

    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        range: Option<ByteRange>,
    ) -> Result<Bytes, ClientError> {
        let mut inner = self.inner.lock().unwrap();
        self.begin(&mut inner, "get_object")?;
        Self::check_bucket(&inner, bucket)?;
        let obj = inner
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .ok_or_else(|| ClientError::NoSuchKey {
                key: key.to_string(),
            })?;
        match range {
            None => Ok(obj.data.clone()),
            Some(range) => {
                let len = obj.data.len() as u64;
                if range.start >= len {
                    return Err(ClientError::Other(format!(
                        "InvalidRange: start {} beyond object of {} bytes",
                        range.start, len
                    )));
                }
                let end = range.end.map(|e| (e + 1).min(len)).unwrap_or(len);
                Ok(obj.data.slice(range.start as usize..end as usize))
            }
        }
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: &str,
        storage_class: &str,
    ) -> Result<(), ClientError> {
        let mut inner = self.inner.lock().unwrap();
        self.begin(&mut inner, "put_object")?;
        Self::check_bucket(&inner, bucket)?;
        let etag = compute_etag(&body);
        inner.objects.insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                data: body,
                content_type: content_type.to_string(),
                storage_class: storage_class.to_string(),
                last_modified: SystemTime::now(),
                etag,
                metadata: HashMap::new(),
            },
        );
        Ok(())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), ClientError> {
        let mut inner = self.inner.lock().unwrap();
        self.begin(&mut inner, "delete_object")?;
        Self::check_bucket(&inner, bucket)?;
        inner.objects.remove(&(bucket.to_string(), key.to_string()));
        Ok(())
    }

    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectMetadata, ClientError> {
        let mut inner = self.inner.lock().unwrap();
        self.begin(&mut inner, "head_object")?;
        Self::check_bucket(&inner, bucket)?;
        inner
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|obj| metadata_of(key, obj))
            .ok_or_else(|| ClientError::NoSuchKey {
                key: key.to_string(),
            })
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        max_keys: Option<i32>,
    ) -> Result<Vec<ObjectMetadata>, ClientError> {
        let mut inner = self.inner.lock().unwrap();
        self.begin(&mut inner, "list_objects")?;
        Self::check_bucket(&inner, bucket)?;
        let mut keys: Vec<&(String, String)> = inner
            .objects
            .keys()
            .filter(|(b, k)| b == bucket && k.starts_with(prefix))
            .collect();
        keys.sort();
        let limit = max_keys.map(|n| n.max(0) as usize).unwrap_or(usize::MAX);
        Ok(keys
            .into_iter()
            .take(limit)
            .map(|id| metadata_of(&id.1, &inner.objects[id]))
            .collect())
    }

    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
        storage_class: &str,
    ) -> Result<String, ClientError> {
        let mut inner = self.inner.lock().unwrap();
        self.begin(&mut inner, "create_multipart_upload")?;
        Self::check_bucket(&inner, bucket)?;
        let upload_id = format!("upload-{}", self.upload_seq.fetch_add(1, Ordering::Relaxed));
        inner.sessions.insert(
            upload_id.clone(),
            MultipartSession {
                bucket: bucket.to_string(),
                key: key.to_string(),
                content_type: content_type.to_string(),
                storage_class: storage_class.to_string(),
                parts: BTreeMap::new(),
            },
        );
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        _bucket: &str,
        _key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> Result<String, ClientError> {
        let mut inner = self.inner.lock().unwrap();
        self.begin(&mut inner, "upload_part")?;
        let etag = compute_etag(&body);
        let session = inner
            .sessions
            .get_mut(upload_id)
            .ok_or_else(|| ClientError::NotFound(format!("upload {upload_id}")))?;
        session.parts.insert(part_number, body);
        Ok(etag)
    }

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<(), ClientError> {
        let mut inner = self.inner.lock().unwrap();
        self.begin(&mut inner, "complete_multipart_upload")?;
        let session = inner
            .sessions
            .remove(upload_id)
            .ok_or_else(|| ClientError::NotFound(format!("upload {upload_id}")))?;
        debug_assert_eq!(session.bucket, bucket);
        debug_assert_eq!(session.key, key);

        let mut assembled = Vec::new();
        for part in parts {
            let data = session.parts.get(&part.part_number).ok_or_else(|| {
                ClientError::Other(format!("InvalidPart: part {} missing", part.part_number))
            })?;
            assembled.extend_from_slice(data);
        }
        let body = Bytes::from(assembled);
        let etag = compute_etag(&body);
        inner.objects.insert(
            (session.bucket.clone(), session.key.clone()),
            StoredObject {
                data: body,
                content_type: session.content_type.clone(),
                storage_class: session.storage_class.clone(),
                last_modified: SystemTime::now(),
                etag,
                metadata: HashMap::new(),
            },
        );
        Ok(())
    }

    async fn abort_multipart_upload(
        &self,
        _bucket: &str,
        _key: &str,
        upload_id: &str,
    ) -> Result<(), ClientError> {
        let mut inner = self.inner.lock().unwrap();
        self.begin(&mut inner, "abort_multipart_upload")?;
        inner.sessions.remove(upload_id);
        Ok(())
    }
}
