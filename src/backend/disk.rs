//! Local disk backend
//!
//! Owns one export directory and persists buckets and shard objects in it.
//!
//! ```text
//! <EXPORT_DIR>/
//! ├── buckets/
//! │   └── <BUCKET>/
//! │       └── objects/
//! │           └── <OBJECT>/
//! │               ├── meta.json
//! │               └── meta.json.<VERSION_ID>
//! ├── data/
//! │   └── <ID[0:4]>/
//! │       └── <ID>/
//! │           ├── part.0
//! │           ├── part.0.checksum
//! │           └── part.0.meta.json
//! ├── tmp/
//! │   └── <ID>/
//! └── trans/
//!     └── <ID>/
//! ```
//!
//! All mutations are two-phase: stage under `tmp/<request-id>/`, then rename
//! into place; displaced prior state moves to `trans/<request-id>/` until the
//! close method either discards it or restores it. Renames stay within the
//! export directory, which must be a single filesystem.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::blockio::{write_data_file, DEFAULT_BLOCK_SIZE, METADATA_FILE_EXT};
use crate::datastore::{DataStore, DATA_FILENAME};
use crate::error::{Error, Result};
use crate::hash::Checksummer;

use super::{Backend, BucketInfo, BucketListing, ObjectInfo, ShardStream};

const META_FILENAME: &str = "meta.json";

fn meta_filename(version_id: &str) -> String {
    if version_id.is_empty() {
        META_FILENAME.to_string()
    } else {
        format!("{}.{}", META_FILENAME, version_id)
    }
}

fn is_not_found(err: &std::io::Error) -> bool {
    err.kind() == std::io::ErrorKind::NotFound
}

/// One peer's local export.
pub struct Disk {
    buckets_dir: PathBuf,
    temp_base_dir: PathBuf,
    trans_base_dir: PathBuf,
    data_store: Arc<DataStore>,
}

impl Disk {
    /// Open an export directory, creating the four top-level subdirectories.
    pub async fn create(export_dir: impl AsRef<Path>) -> Result<Arc<Self>> {
        let export_dir = export_dir.as_ref();
        let buckets_dir = export_dir.join("buckets");
        let data_dir = export_dir.join("data");
        let temp_base_dir = export_dir.join("tmp");
        let trans_base_dir = export_dir.join("trans");

        for dir in [&buckets_dir, &data_dir, &temp_base_dir, &trans_base_dir] {
            tokio::fs::create_dir_all(dir).await?;
        }

        Ok(Arc::new(Self {
            buckets_dir,
            temp_base_dir,
            trans_base_dir,
            data_store: DataStore::new(data_dir),
        }))
    }

    pub fn data_store(&self) -> &Arc<DataStore> {
        &self.data_store
    }

    fn temp_dir(&self, request_id: &str) -> PathBuf {
        self.temp_base_dir.join(request_id)
    }

    fn trans_dir(&self, request_id: &str) -> PathBuf {
        self.trans_base_dir.join(request_id)
    }

    fn bucket_dir(&self, bucket: &str) -> PathBuf {
        self.buckets_dir.join(bucket)
    }

    fn objects_dir(&self, bucket: &str) -> PathBuf {
        self.bucket_dir(bucket).join("objects")
    }

    fn object_dir(&self, bucket: &str, object: &str) -> PathBuf {
        self.objects_dir(bucket).join(object)
    }

    fn object_meta_file(&self, bucket: &str, object: &str, version_id: &str) -> PathBuf {
        self.object_dir(bucket, object).join(meta_filename(version_id))
    }

    async fn head_bucket_dir(&self, bucket: &str) -> Result<std::fs::Metadata> {
        match tokio::fs::symlink_metadata(self.bucket_dir(bucket)).await {
            Ok(meta) => Ok(meta),
            Err(err) if is_not_found(&err) => Err(Error::BucketNotFound),
            Err(err) => Err(err.into()),
        }
    }

    async fn read_object_info(&self, meta_file: &Path) -> Result<ObjectInfo> {
        let raw = match tokio::fs::read(meta_file).await {
            Ok(raw) => raw,
            Err(err) if is_not_found(&err) => return Err(Error::ObjectNotFound),
            Err(err) => return Err(err.into()),
        };
        Ok(serde_json::from_slice(&raw)?)
    }

    /// Remove the leaf directory of an object name if it is empty. The
    /// intermediate tree is left alone: a racing commit on a parent prefix
    /// may have just created it, and the namespace lock covers single keys
    /// only.
    async fn remove_object_leaf(&self, bucket: &str, object: &str) {
        if let Err(err) = tokio::fs::remove_dir(self.object_dir(bucket, object)).await {
            if !is_not_found(&err) && !err.to_string().to_lowercase().contains("not empty") {
                debug!(bucket, object, "leaf directory removal failed: {}", err);
            }
        }
    }
}

// =============================================================================
// Backend Implementation
// =============================================================================

#[async_trait]
impl Backend for Disk {
    async fn put_bucket(&self, request_id: &str, bucket: &str) -> Result<()> {
        let temp_dir = self.temp_dir(request_id);
        let result = async {
            tokio::fs::create_dir(&temp_dir).await?;
            tokio::fs::create_dir(temp_dir.join("objects")).await?;

            let bucket_dir = self.bucket_dir(bucket);
            if let Err(err) = tokio::fs::rename(&temp_dir, &bucket_dir).await {
                if tokio::fs::try_exists(&bucket_dir).await.unwrap_or(false) {
                    return Err(Error::BucketAlreadyExists);
                }
                return Err(err.into());
            }
            Ok(())
        }
        .await;

        let _ = tokio::fs::remove_dir_all(&temp_dir).await;
        result
    }

    async fn close_put_bucket(&self, _request_id: &str, bucket: &str, undo: bool) -> Result<()> {
        if undo {
            if let Err(err) = tokio::fs::remove_dir_all(self.bucket_dir(bucket)).await {
                if !is_not_found(&err) {
                    return Err(err.into());
                }
            }
        }
        Ok(())
    }

    async fn delete_bucket(&self, request_id: &str, bucket: &str) -> Result<()> {
        let mut entries = match tokio::fs::read_dir(self.objects_dir(bucket)).await {
            Ok(entries) => entries,
            Err(err) if is_not_found(&err) => return Err(Error::BucketNotFound),
            Err(err) => return Err(err.into()),
        };
        if entries.next_entry().await?.is_some() {
            return Err(Error::BucketNotEmpty);
        }

        tokio::fs::rename(self.bucket_dir(bucket), self.trans_dir(request_id)).await?;
        Ok(())
    }

    async fn close_delete_bucket(&self, request_id: &str, bucket: &str, undo: bool) -> Result<()> {
        let trans_dir = self.trans_dir(request_id);
        if undo {
            tokio::fs::rename(&trans_dir, self.bucket_dir(bucket)).await?;
        }
        let _ = tokio::fs::remove_dir_all(&trans_dir).await;
        Ok(())
    }

    async fn head_bucket(&self, bucket: &str) -> Result<BucketInfo> {
        let meta = self.head_bucket_dir(bucket).await?;
        let mod_time: DateTime<Utc> = meta
            .modified()
            .map(DateTime::from)
            .unwrap_or_else(|_| Utc::now());

        Ok(BucketInfo {
            name: bucket.to_string(),
            mod_time,
        })
    }

    async fn get_bucket(
        &self,
        bucket: &str,
        prefix: &str,
        start_after: &str,
        max_keys: usize,
    ) -> Result<BucketListing> {
        if !prefix.is_empty() && !start_after.is_empty() && !start_after.starts_with(prefix) {
            return Err(Error::InvalidArgument(
                "start-after must start with prefix".to_string(),
            ));
        }

        let objects_dir = self.objects_dir(bucket);

        // Collect every object key (a directory holding meta.json), walking
        // only subtrees that can still match the prefix.
        let mut keys = Vec::new();
        let mut stack: Vec<String> = vec![String::new()];
        let mut root_seen = false;

        while let Some(rel) = stack.pop() {
            let dir = if rel.is_empty() {
                objects_dir.clone()
            } else {
                objects_dir.join(&rel)
            };

            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(err) if is_not_found(&err) => {
                    if rel.is_empty() && !root_seen {
                        return Err(Error::BucketNotFound);
                    }
                    continue;
                }
                Err(err) => return Err(err.into()),
            };
            root_seen = true;

            while let Some(entry) = entries.next_entry().await? {
                if !entry.file_type().await?.is_dir() {
                    continue;
                }
                let name = entry.file_name().to_string_lossy().into_owned();
                let child = if rel.is_empty() {
                    name
                } else {
                    format!("{}/{}", rel, name)
                };

                let subtree = format!("{}/", child);
                if !subtree.starts_with(prefix) && !prefix.starts_with(&subtree) {
                    continue;
                }

                if child.starts_with(prefix)
                    && tokio::fs::try_exists(entry.path().join(META_FILENAME))
                        .await
                        .unwrap_or(false)
                {
                    keys.push(child.clone());
                }
                stack.push(child);
            }
        }

        // Collapse keys below the first "/" past the prefix into common
        // prefixes, then page lexicographically.
        let mut entries = BTreeSet::new();
        for key in keys {
            let rest = &key[prefix.len()..];
            match rest.find('/') {
                Some(i) => {
                    entries.insert(format!("{}{}", prefix, &rest[..=i]));
                }
                None => {
                    entries.insert(key);
                }
            }
        }

        let mut window: Vec<String> = entries
            .into_iter()
            .filter(|entry| entry.as_str() > start_after)
            .collect();

        let mut next_marker = None;
        if window.len() > max_keys {
            window.truncate(max_keys);
            next_marker = window.last().cloned();
        }

        let mut listing = BucketListing::default();
        for entry in window {
            if entry.ends_with('/') {
                listing.common_prefixes.push(entry);
            } else {
                listing.keys.push(entry);
            }
        }
        listing.next_marker = next_marker;
        Ok(listing)
    }

    async fn put_object(
        &self,
        request_id: &str,
        bucket: &str,
        object: &str,
        version_id: &str,
        mut reader: ShardStream,
        reader_size: u64,
        mut metadata: ObjectInfo,
    ) -> Result<()> {
        self.head_bucket_dir(bucket).await?;

        let temp_dir = self.temp_dir(request_id);
        tokio::fs::create_dir_all(&temp_dir).await?;

        let result = async {
            let data_file = temp_dir.join(DATA_FILENAME);
            write_data_file(
                &data_file,
                &mut reader,
                reader_size,
                Checksummer::highway256(None),
                DEFAULT_BLOCK_SIZE,
            )
            .await?;

            metadata.bucket_name = bucket.to_string();
            metadata.object_name = object.to_string();
            metadata.object_version_id = version_id.to_string();
            metadata.object_data_id = request_id.to_string();

            let encoded = serde_json::to_vec(&metadata)?;
            // One copy travels with the data, one is staged for the commit
            // phase to move into the bucket namespace.
            let mut shard_meta = data_file.as_os_str().to_os_string();
            shard_meta.push(METADATA_FILE_EXT);
            tokio::fs::write(PathBuf::from(shard_meta), &encoded).await?;
            tokio::fs::write(temp_dir.join(META_FILENAME), &encoded).await?;

            self.data_store.put(request_id, &temp_dir).await
        }
        .await;

        let _ = tokio::fs::remove_dir_all(&temp_dir).await;
        if result.is_err() {
            let _ = tokio::fs::remove_dir_all(self.data_store.data_dir(request_id)).await;
        }
        result
    }

    async fn commit_put_object(
        &self,
        request_id: &str,
        bucket: &str,
        object: &str,
        version_id: &str,
    ) -> Result<()> {
        let result = async {
            let object_dir = self.object_dir(bucket, object);
            let meta_file = self.object_meta_file(bucket, object, version_id);
            let staged_meta = self.data_store.data_dir(request_id).join(META_FILENAME);

            if !version_id.is_empty() {
                if !tokio::fs::try_exists(&object_dir).await.unwrap_or(false) {
                    tokio::fs::create_dir_all(&object_dir).await?;
                }
                tokio::fs::rename(&staged_meta, &meta_file).await?;
                return Ok(());
            }

            if tokio::fs::try_exists(&meta_file).await.unwrap_or(false) {
                let trans_dir = self.trans_dir(request_id);
                tokio::fs::create_dir(&trans_dir).await?;
                tokio::fs::rename(&meta_file, trans_dir.join(META_FILENAME)).await?;
            } else {
                tokio::fs::create_dir_all(&object_dir).await?;
            }

            tokio::fs::rename(&staged_meta, &meta_file).await?;
            Ok(())
        }
        .await;

        if result.is_err() {
            let _ = tokio::fs::remove_dir_all(self.data_store.data_dir(request_id)).await;
        }
        result
    }

    async fn close_put_object(
        &self,
        request_id: &str,
        bucket: &str,
        object: &str,
        version_id: &str,
        undo: bool,
    ) -> Result<()> {
        if !undo {
            if version_id.is_empty() {
                let _ = tokio::fs::remove_dir_all(self.trans_dir(request_id)).await;
            }
            return Ok(());
        }

        let _ = tokio::fs::remove_dir_all(self.data_store.data_dir(request_id)).await;

        let meta_file = self.object_meta_file(bucket, object, version_id);

        if version_id.is_empty() {
            let trans_dir = self.trans_dir(request_id);
            let backed_meta = trans_dir.join(META_FILENAME);
            if tokio::fs::try_exists(&backed_meta).await.unwrap_or(false) {
                tokio::fs::rename(&backed_meta, &meta_file).await?;
                let _ = tokio::fs::remove_dir_all(&trans_dir).await;
                return Ok(());
            }
        }

        if let Err(err) = tokio::fs::remove_file(&meta_file).await {
            if !is_not_found(&err) {
                return Err(err.into());
            }
        }

        self.remove_object_leaf(bucket, object).await;
        Ok(())
    }

    async fn delete_object(
        &self,
        request_id: &str,
        bucket: &str,
        object: &str,
        version_id: &str,
    ) -> Result<()> {
        self.head_bucket_dir(bucket).await?;

        let meta_file = self.object_meta_file(bucket, object, version_id);
        if !tokio::fs::try_exists(&meta_file).await.unwrap_or(false) {
            return Err(Error::ObjectNotFound);
        }

        let trans_dir = self.trans_dir(request_id);
        tokio::fs::create_dir_all(&trans_dir).await?;
        tokio::fs::rename(&meta_file, trans_dir.join(meta_filename(version_id))).await?;
        Ok(())
    }

    async fn close_delete_object(
        &self,
        request_id: &str,
        bucket: &str,
        object: &str,
        version_id: &str,
        undo: bool,
    ) -> Result<()> {
        let trans_dir = self.trans_dir(request_id);
        let backed_meta = trans_dir.join(meta_filename(version_id));

        if undo {
            let meta_file = self.object_meta_file(bucket, object, version_id);
            tokio::fs::rename(&backed_meta, &meta_file).await?;
            let _ = tokio::fs::remove_dir_all(&trans_dir).await;
            return Ok(());
        }

        self.remove_object_leaf(bucket, object).await;

        match self.read_object_info(&backed_meta).await {
            Ok(info) => {
                let store = self.data_store.clone();
                tokio::task::spawn_blocking(move || store.drop_entry(&info.object_data_id));
            }
            Err(err) => warn!(bucket, object, "displaced meta unreadable: {}", err),
        }

        let _ = tokio::fs::remove_dir_all(&trans_dir).await;
        Ok(())
    }

    async fn get_object(
        &self,
        bucket: &str,
        object: &str,
        version_id: &str,
        offset: u64,
        length: u64,
    ) -> Result<ShardStream> {
        self.head_bucket_dir(bucket).await?;
        let info = self.head_object(bucket, object, version_id).await?;
        self.data_store.get(&info.object_data_id, offset, length).await
    }

    async fn head_object(
        &self,
        bucket: &str,
        object: &str,
        version_id: &str,
    ) -> Result<ObjectInfo> {
        self.head_bucket_dir(bucket).await?;
        self.read_object_info(&self.object_meta_file(bucket, object, version_id))
            .await
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    async fn new_disk() -> (tempfile::TempDir, Arc<Disk>) {
        let dir = tempfile::tempdir().unwrap();
        let disk = Disk::create(dir.path()).await.unwrap();
        (dir, disk)
    }

    fn shard_metadata(size: u64) -> ObjectInfo {
        ObjectInfo {
            object_size: size,
            data_count: 2,
            parity_count: 2,
            shard_size: 512,
            last_shard_size: 512,
            shard_count: 1,
            shard_order: vec![0, 1, 2, 3],
            shard_index: 0,
            ..ObjectInfo::default()
        }
    }

    async fn put_and_commit(disk: &Disk, request_id: &str, bucket: &str, object: &str, body: &[u8]) {
        let reader: ShardStream = Box::new(std::io::Cursor::new(body.to_vec()));
        disk.put_object(
            request_id,
            bucket,
            object,
            "",
            reader,
            body.len() as u64,
            shard_metadata(body.len() as u64),
        )
        .await
        .unwrap();
        disk.commit_put_object(request_id, bucket, object, "")
            .await
            .unwrap();
        disk.close_put_object(request_id, bucket, object, "", false)
            .await
            .unwrap();
    }

    // =========================================================================
    // Bucket Tests
    // =========================================================================

    #[tokio::test]
    async fn test_bucket_lifecycle() {
        let (_dir, disk) = new_disk().await;

        disk.put_bucket("rid-1", "photos").await.unwrap();
        assert!(disk.head_bucket("photos").await.is_ok());

        assert!(matches!(
            disk.put_bucket("rid-2", "photos").await,
            Err(Error::BucketAlreadyExists)
        ));

        disk.delete_bucket("rid-3", "photos").await.unwrap();
        disk.close_delete_bucket("rid-3", "photos", false)
            .await
            .unwrap();
        assert!(matches!(
            disk.head_bucket("photos").await,
            Err(Error::BucketNotFound)
        ));
    }

    #[tokio::test]
    async fn test_delete_bucket_undo_restores() {
        let (_dir, disk) = new_disk().await;

        disk.put_bucket("rid-1", "docs").await.unwrap();
        disk.delete_bucket("rid-2", "docs").await.unwrap();
        disk.close_delete_bucket("rid-2", "docs", true).await.unwrap();
        assert!(disk.head_bucket("docs").await.is_ok());
    }

    #[tokio::test]
    async fn test_delete_nonempty_bucket() {
        let (_dir, disk) = new_disk().await;

        disk.put_bucket("rid-1", "media").await.unwrap();
        put_and_commit(&disk, "rid-2", "media", "clip.mp4", b"data").await;

        assert!(matches!(
            disk.delete_bucket("rid-3", "media").await,
            Err(Error::BucketNotEmpty)
        ));
    }

    #[tokio::test]
    async fn test_put_bucket_undo() {
        let (_dir, disk) = new_disk().await;

        disk.put_bucket("rid-1", "tmp-bucket").await.unwrap();
        disk.close_put_bucket("rid-1", "tmp-bucket", true)
            .await
            .unwrap();
        assert!(matches!(
            disk.head_bucket("tmp-bucket").await,
            Err(Error::BucketNotFound)
        ));
    }

    // =========================================================================
    // Object Tests
    // =========================================================================

    #[tokio::test]
    async fn test_object_round_trip() {
        let (_dir, disk) = new_disk().await;
        let body: Vec<u8> = (0..5000).map(|i| (i % 256) as u8).collect();

        disk.put_bucket("rid-1", "b").await.unwrap();
        put_and_commit(&disk, "rid-2", "b", "key", &body).await;

        let info = disk.head_object("b", "key", "").await.unwrap();
        assert_eq!(info.object_size, body.len() as u64);
        assert_eq!(info.object_data_id, "rid-2");

        let mut reader = disk.get_object("b", "key", "", 0, body.len() as u64).await.unwrap();
        let mut got = Vec::new();
        reader.read_to_end(&mut got).await.unwrap();
        assert_eq!(got, body);

        let mut reader = disk.get_object("b", "key", "", 100, 50).await.unwrap();
        let mut got = Vec::new();
        reader.read_to_end(&mut got).await.unwrap();
        assert_eq!(got, &body[100..150]);
    }

    #[tokio::test]
    async fn test_put_object_missing_bucket() {
        let (_dir, disk) = new_disk().await;
        let reader: ShardStream = Box::new(std::io::Cursor::new(b"body".to_vec()));

        assert!(matches!(
            disk.put_object("rid-1", "nope", "k", "", reader, 4, shard_metadata(4))
                .await,
            Err(Error::BucketNotFound)
        ));
    }

    #[tokio::test]
    async fn test_overwrite_displaces_then_undo_restores() {
        let (_dir, disk) = new_disk().await;

        disk.put_bucket("rid-1", "b").await.unwrap();
        put_and_commit(&disk, "rid-2", "b", "k", b"version one").await;

        // Second put commits, then rolls back; the first version must
        // reappear.
        let reader: ShardStream = Box::new(std::io::Cursor::new(b"version two".to_vec()));
        disk.put_object("rid-3", "b", "k", "", reader, 11, shard_metadata(11))
            .await
            .unwrap();
        disk.commit_put_object("rid-3", "b", "k", "").await.unwrap();
        disk.close_put_object("rid-3", "b", "k", "", true).await.unwrap();

        let info = disk.head_object("b", "k", "").await.unwrap();
        assert_eq!(info.object_data_id, "rid-2");
    }

    #[tokio::test]
    async fn test_delete_object_undo() {
        let (_dir, disk) = new_disk().await;

        disk.put_bucket("rid-1", "b").await.unwrap();
        put_and_commit(&disk, "rid-2", "b", "k", b"body").await;

        disk.delete_object("rid-3", "b", "k", "").await.unwrap();
        assert!(matches!(
            disk.head_object("b", "k", "").await,
            Err(Error::ObjectNotFound)
        ));

        disk.close_delete_object("rid-3", "b", "k", "", true)
            .await
            .unwrap();
        assert!(disk.head_object("b", "k", "").await.is_ok());
    }

    #[tokio::test]
    async fn test_delete_object_commit_drops_data() {
        let (_dir, disk) = new_disk().await;

        disk.put_bucket("rid-1", "b").await.unwrap();
        put_and_commit(&disk, "rid-2", "b", "k", b"body").await;
        let data_dir = disk.data_store().data_dir("rid-2");
        assert!(data_dir.exists());

        disk.delete_object("rid-3", "b", "k", "").await.unwrap();
        disk.close_delete_object("rid-3", "b", "k", "", false)
            .await
            .unwrap();

        for _ in 0..50 {
            if !data_dir.exists() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(!data_dir.exists());
        assert!(matches!(
            disk.head_object("b", "k", "").await,
            Err(Error::ObjectNotFound)
        ));
    }

    #[tokio::test]
    async fn test_delete_missing_object() {
        let (_dir, disk) = new_disk().await;
        disk.put_bucket("rid-1", "b").await.unwrap();
        assert!(matches!(
            disk.delete_object("rid-2", "b", "ghost", "").await,
            Err(Error::ObjectNotFound)
        ));
    }

    // =========================================================================
    // Listing Tests
    // =========================================================================

    #[tokio::test]
    async fn test_listing_with_delimiter() {
        let (_dir, disk) = new_disk().await;
        disk.put_bucket("rid-0", "b").await.unwrap();

        for (i, key) in ["a.txt", "dir/one", "dir/two", "zebra"].iter().enumerate() {
            put_and_commit(&disk, &format!("rid-{}", i + 1), "b", key, b"x").await;
        }

        let listing = disk.get_bucket("b", "", "", 1000).await.unwrap();
        assert_eq!(listing.keys, vec!["a.txt", "zebra"]);
        assert_eq!(listing.common_prefixes, vec!["dir/"]);
        assert!(listing.next_marker.is_none());
    }

    #[tokio::test]
    async fn test_listing_with_prefix() {
        let (_dir, disk) = new_disk().await;
        disk.put_bucket("rid-0", "b").await.unwrap();

        for (i, key) in ["dir/one", "dir/sub/deep", "dir/two", "other"].iter().enumerate() {
            put_and_commit(&disk, &format!("rid-{}", i + 1), "b", key, b"x").await;
        }

        let listing = disk.get_bucket("b", "dir/", "", 1000).await.unwrap();
        assert_eq!(listing.keys, vec!["dir/one", "dir/two"]);
        assert_eq!(listing.common_prefixes, vec!["dir/sub/"]);
    }

    #[tokio::test]
    async fn test_listing_pagination() {
        let (_dir, disk) = new_disk().await;
        disk.put_bucket("rid-0", "b").await.unwrap();

        for i in 0..5 {
            put_and_commit(&disk, &format!("rid-{}", i + 1), "b", &format!("k{}", i), b"x").await;
        }

        let page = disk.get_bucket("b", "", "", 2).await.unwrap();
        assert_eq!(page.keys, vec!["k0", "k1"]);
        assert_eq!(page.next_marker.as_deref(), Some("k1"));

        let page = disk.get_bucket("b", "", "k1", 2).await.unwrap();
        assert_eq!(page.keys, vec!["k2", "k3"]);

        let page = disk.get_bucket("b", "", "k3", 2).await.unwrap();
        assert_eq!(page.keys, vec!["k4"]);
        assert!(page.next_marker.is_none());
    }

    #[tokio::test]
    async fn test_listing_missing_bucket() {
        let (_dir, disk) = new_disk().await;
        assert!(matches!(
            disk.get_bucket("ghost", "", "", 10).await,
            Err(Error::BucketNotFound)
        ));
    }
}
