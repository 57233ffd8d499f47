pub mod s3;
#[cfg(test)]
pub mod memory;

use common::Result;
use s3::ObjectStorage;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub prefix: String,
    pub extension: Option<String>,
}

impl ListOptions {
    pub fn new(prefix: &str, extension: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            extension: Some(extension.to_string()),
        }
    }
}

/// A source object that now also exists on local disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedObject {
    pub key: String,
    pub local_path: PathBuf,
}

/// Lists and fetches raw files from one bucket.
#[derive(Clone)]
pub struct ObjectStoreClient {
    storage: Arc<dyn ObjectStorage>,
}

impl ObjectStoreClient {
    pub fn new(storage: Arc<dyn ObjectStorage>) -> Self {
        Self { storage }
    }

    pub fn bucket(&self) -> &str {
        self.storage.bucket()
    }

    /// Keys under the prefix whose suffix matches the extension, in key order.
    ///
    /// A listing failure is logged and reported as "no files".
    pub async fn list_matching(&self, options: &ListOptions) -> Vec<String> {
        let keys = match self.storage.list_objects(&options.prefix).await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(bucket = %self.bucket(), prefix = %options.prefix, error = %e, "Listing failed, treating as empty");
                return Vec::new();
            }
        };

        let mut files: Vec<String> = keys
            .into_iter()
            .filter(|key| key.starts_with(&options.prefix))
            .filter(|key| match &options.extension {
                Some(ext) => key.ends_with(ext.as_str()),
                None => true,
            })
            .collect();
        files.sort();

        if files.is_empty() {
            info!(
                bucket = %self.bucket(),
                prefix = %options.prefix,
                "No files found"
            );
        } else {
            info!(bucket = %self.bucket(), prefix = %options.prefix, count = files.len(), "Found files");
        }

        files
    }

    /// Downloads each key into `local_dir`, keeping the part of the key below
    /// `prefix` as the relative path so keys that share a file name under
    /// different sub-prefixes do not overwrite each other.
    ///
    /// A key that cannot be fetched or written is logged and skipped; the
    /// remaining keys are still attempted.
    pub async fn download(
        &self,
        keys: &[String],
        prefix: &str,
        local_dir: &Path,
    ) -> Result<Vec<DownloadedObject>> {
        tokio::fs::create_dir_all(local_dir).await?;

        let mut downloaded = Vec::with_capacity(keys.len());
        for key in keys {
            let Some(local_path) = local_path_for(local_dir, prefix, key) else {
                warn!(key = %key, "Skipping key without a file name");
                continue;
            };
            if let Some(parent) = local_path.parent() {
                if let Err(e) = tokio::fs::create_dir_all(parent).await {
                    error!(key = %key, path = %parent.display(), error = %e, "Error creating local directory");
                    continue;
                }
            }

            let data = match self.storage.get_object(key).await {
                Ok(data) => data,
                Err(e) => {
                    error!(key = %key, error = %e, "Error downloading file");
                    continue;
                }
            };

            if let Err(e) = tokio::fs::write(&local_path, &data).await {
                error!(key = %key, path = %local_path.display(), error = %e, "Error writing downloaded file");
                continue;
            }

            info!(key = %key, "Downloaded file");
            downloaded.push(DownloadedObject {
                key: key.clone(),
                local_path,
            });
        }

        Ok(downloaded)
    }

    /// Removes consumed objects from the bucket. Failures are logged only;
    /// an object left behind is picked up again by a later run.
    pub async fn purge(&self, keys: &[String]) -> usize {
        let mut purged = 0;
        for key in keys {
            match self.storage.delete_object(key).await {
                Ok(()) => purged += 1,
                Err(e) => warn!(key = %key, error = %e, "Could not delete source object"),
            }
        }
        purged
    }
}

/// Local path of `key` under `local_dir`. Empty, `.` and `..` segments are
/// dropped so a key can never land outside the directory.
fn local_path_for(local_dir: &Path, prefix: &str, key: &str) -> Option<PathBuf> {
    let relative = key.strip_prefix(prefix).unwrap_or(key);
    let segments: Vec<&str> = relative
        .split('/')
        .filter(|s| !s.is_empty() && *s != "." && *s != "..")
        .collect();
    if segments.is_empty() || key.ends_with('/') {
        return None;
    }

    let mut path = local_dir.to_path_buf();
    path.extend(segments);
    Some(path)
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryStorage;
    use super::*;

    fn client_with(keys: &[&str]) -> (ObjectStoreClient, Arc<MemoryStorage>) {
        let storage = Arc::new(MemoryStorage::new("trucks-bucket"));
        for key in keys {
            storage.insert(key, b"total,type,timestamp\n".to_vec());
        }
        (ObjectStoreClient::new(storage.clone()), storage)
    }

    #[tokio::test]
    async fn test_list_matching_scopes_to_one_hour() {
        let (client, _) = client_with(&[
            "trucks/2024-1/5/10/T3_T1_a.csv",
            "trucks/2024-1/5/11/T3_T1_b.csv",
        ]);

        let files = client
            .list_matching(&ListOptions::new("trucks/2024-1/5/10/", ".csv"))
            .await;
        assert_eq!(files, vec!["trucks/2024-1/5/10/T3_T1_a.csv".to_string()]);
    }

    #[tokio::test]
    async fn test_list_matching_filters_extension_and_returns_empty() {
        let (client, _) = client_with(&[
            "historical/T3_T1_a.parquet",
            "historical/readme.txt",
            "metadata/details.xlsx",
        ]);

        let files = client
            .list_matching(&ListOptions::new("historical/", ".parquet"))
            .await;
        assert_eq!(files, vec!["historical/T3_T1_a.parquet".to_string()]);

        let none = client
            .list_matching(&ListOptions::new("trucks/2030-1/1/1/", ".csv"))
            .await;
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_listing_failure_is_treated_as_no_files() {
        let (client, storage) = client_with(&["trucks/2024-1/5/10/T3_T1_a.csv"]);
        storage.fail_listing(true);

        let files = client
            .list_matching(&ListOptions::new("trucks/2024-1/5/10/", ".csv"))
            .await;
        assert!(files.is_empty());
    }

    #[tokio::test]
    async fn test_download_skips_failed_keys() {
        let (client, storage) = client_with(&[
            "trucks/2024-1/5/10/T3_T1_a.csv",
            "trucks/2024-1/5/10/T3_T2_a.csv",
        ]);
        storage.fail_download("trucks/2024-1/5/10/T3_T1_a.csv");
        let dir = tempfile::tempdir().unwrap();
        let local_dir = dir.path().join("nested");

        let keys = vec![
            "trucks/2024-1/5/10/T3_T1_a.csv".to_string(),
            "trucks/2024-1/5/10/T3_T2_a.csv".to_string(),
        ];
        let downloaded = client
            .download(&keys, "trucks/2024-1/5/10/", &local_dir)
            .await
            .unwrap();

        assert_eq!(downloaded.len(), 1);
        assert_eq!(downloaded[0].key, "trucks/2024-1/5/10/T3_T2_a.csv");
        assert_eq!(downloaded[0].local_path, local_dir.join("T3_T2_a.csv"));
        assert!(downloaded[0].local_path.exists());
    }

    #[tokio::test]
    async fn test_download_keeps_same_named_keys_apart() {
        let storage = Arc::new(MemoryStorage::new("trucks-bucket"));
        storage.insert("trucks/2024-1/5/10/a/T3_T1_x.csv", b"first".to_vec());
        storage.insert("trucks/2024-1/5/10/b/T3_T1_x.csv", b"second".to_vec());
        let client = ObjectStoreClient::new(storage.clone());
        let dir = tempfile::tempdir().unwrap();

        let keys = storage.keys();
        let downloaded = client
            .download(&keys, "trucks/2024-1/5/10/", dir.path())
            .await
            .unwrap();

        assert_eq!(downloaded.len(), 2);
        assert_eq!(downloaded[0].local_path, dir.path().join("a").join("T3_T1_x.csv"));
        assert_eq!(downloaded[1].local_path, dir.path().join("b").join("T3_T1_x.csv"));
        assert_eq!(std::fs::read(&downloaded[0].local_path).unwrap(), b"first");
        assert_eq!(std::fs::read(&downloaded[1].local_path).unwrap(), b"second");
    }

    #[test]
    fn test_local_path_stays_inside_work_dir() {
        let dir = Path::new("/work");
        assert_eq!(
            local_path_for(dir, "trucks/", "trucks/../../etc/T3_T1_x.csv"),
            Some(PathBuf::from("/work/etc/T3_T1_x.csv"))
        );
        assert_eq!(local_path_for(dir, "trucks/", "trucks/sub/"), None);
        assert_eq!(
            local_path_for(dir, "other/", "trucks/T3_T1_x.csv"),
            Some(PathBuf::from("/work/trucks/T3_T1_x.csv"))
        );
    }

    #[tokio::test]
    async fn test_purge_deletes_objects() {
        let (client, storage) = client_with(&["trucks/2024-1/5/10/T3_T1_a.csv"]);

        let purged = client
            .purge(&["trucks/2024-1/5/10/T3_T1_a.csv".to_string()])
            .await;

        assert_eq!(purged, 1);
        assert!(storage.keys().is_empty());
    }
}
