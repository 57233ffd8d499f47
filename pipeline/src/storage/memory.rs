use super::s3::ObjectStorage;
use async_trait::async_trait;
use common::{Error, Result};
use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

/// In-memory bucket for tests.
pub struct MemoryStorage {
    bucket: String,
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
    failing_downloads: Mutex<HashSet<String>>,
    failing_listing: Mutex<bool>,
}

impl MemoryStorage {
    pub fn new(bucket: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
            objects: Mutex::new(BTreeMap::new()),
            failing_downloads: Mutex::new(HashSet::new()),
            failing_listing: Mutex::new(false),
        }
    }

    pub fn insert(&self, key: &str, data: Vec<u8>) {
        self.objects.lock().unwrap().insert(key.to_string(), data);
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    pub fn fail_download(&self, key: &str) {
        self.failing_downloads.lock().unwrap().insert(key.to_string());
    }

    pub fn fail_listing(&self, fail: bool) {
        *self.failing_listing.lock().unwrap() = fail;
    }
}

#[async_trait]
impl ObjectStorage for MemoryStorage {
    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>> {
        if *self.failing_listing.lock().unwrap() {
            return Err(Error::Listing {
                prefix: prefix.to_string(),
                message: "access denied".to_string(),
            });
        }
        Ok(self
            .objects
            .lock()
            .unwrap()
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>> {
        if self.failing_downloads.lock().unwrap().contains(key) {
            return Err(Error::Download {
                key: key.to_string(),
                message: "connection reset".to_string(),
            });
        }
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| Error::Download {
                key: key.to_string(),
                message: "not found".to_string(),
            })
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }

    fn bucket(&self) -> &str {
        &self.bucket
    }
}
