use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::info;

const SCRIPT_FILE: &str = "system.js";
const VERSION_FILE: &str = "version.json";
const BACKUPS_DIR: &str = "backups";
const BACKUP_PREFIX: &str = "system-backup-";
const BACKUP_SUFFIX: &str = ".js";

const DEFAULT_SCRIPT: &str = "// system.js placeholder written at first start\nconsole.log('system.js loaded');\n";

const DEFAULT_INDEX: &str = r#"<!doctype html>
<html>
  <head>
    <meta charset="utf-8" />
    <title>scriptkeeper</title>
  </head>
  <body>
    <h1>scriptkeeper</h1>
    <p>The managed script is served at <a href="/system.js">/system.js</a>.</p>
    <script src="/system.js"></script>
  </body>
</html>
"#;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no backup available")]
    NoBackupAvailable,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("malformed store record: {0}")]
    Record(#[from] serde_json::Error),
}

/// On-disk shape of `version.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionRecord {
    pub version: String,
}

/// Audit record written alongside every script replacement, one file per
/// version (`meta-<version>.json`). Never read back by the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateMetadata {
    pub time: String,
    pub note: String,
    pub backup: Option<String>,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupEntry {
    pub file: String,
    pub time: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct History {
    pub backups: Vec<BackupEntry>,
    pub version: String,
}

/// Filesystem-backed store for the single managed script.
///
/// Holds the current script blob under `public_dir`, the version record and
/// timestamped backups under `data_root`. Mutating operations serialize
/// behind one lock; concurrent replace/rollback calls otherwise race on the
/// underlying files.
pub struct ScriptStore {
    public_dir: PathBuf,
    script_path: PathBuf,
    version_path: PathBuf,
    backups_dir: PathBuf,
    write_lock: Mutex<()>,
}

impl ScriptStore {
    /// Open a store rooted at the given directories, creating them if needed.
    /// Does not seed any content; see [`ScriptStore::seed`].
    pub async fn open(public_dir: PathBuf, data_root: PathBuf) -> Result<Self, StoreError> {
        let store = Self {
            script_path: public_dir.join(SCRIPT_FILE),
            version_path: data_root.join(VERSION_FILE),
            backups_dir: data_root.join(BACKUPS_DIR),
            public_dir,
            write_lock: Mutex::new(()),
        };
        fs::create_dir_all(&store.public_dir).await?;
        fs::create_dir_all(&store.backups_dir).await?;
        Ok(store)
    }

    /// Write the default script (bumping the version) and a minimal index
    /// page, each only if absent. Called once at server start.
    pub async fn seed(&self) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        if !fs::try_exists(&self.script_path).await? {
            fs::write(&self.script_path, DEFAULT_SCRIPT).await?;
            let version = self.bump_version().await?;
            info!(%version, "seeded default script");
        }
        let index_path = self.public_dir.join("index.html");
        if !fs::try_exists(&index_path).await? {
            fs::write(&index_path, DEFAULT_INDEX).await?;
        }
        Ok(())
    }

    /// Current version token, minting and persisting a fresh one if no
    /// record exists yet.
    pub async fn current_version(&self) -> Result<String, StoreError> {
        if let Some(version) = self.read_version().await {
            return Ok(version);
        }
        let _guard = self.write_lock.lock().await;
        // Re-check: another task may have minted the record while we waited.
        if let Some(version) = self.read_version().await {
            return Ok(version);
        }
        self.bump_version().await
    }

    /// Replace the script with `code`, snapshotting the previous blob into a
    /// timestamped backup (when one exists), bumping the version and writing
    /// an audit record keyed by the new version.
    pub async fn replace_script(
        &self,
        code: &str,
        note: &str,
    ) -> Result<(String, UpdateMetadata), StoreError> {
        let _guard = self.write_lock.lock().await;
        let now = Utc::now();
        let backup = if fs::try_exists(&self.script_path).await? {
            let name = backup_name(now);
            fs::copy(&self.script_path, self.backups_dir.join(&name)).await?;
            Some(name)
        } else {
            None
        };
        fs::write(&self.script_path, code).await?;
        let version = self.bump_version().await?;
        let meta = UpdateMetadata {
            time: now.to_rfc3339_opts(SecondsFormat::Millis, true),
            note: note.to_string(),
            backup,
            version: version.clone(),
        };
        let meta_path = self.backups_dir.join(format!("meta-{version}.json"));
        fs::write(&meta_path, serde_json::to_string_pretty(&meta)?).await?;
        info!(%version, backup = ?meta.backup, "script replaced");
        Ok((version, meta))
    }

    /// Copy the most recent backup over the current script and bump the
    /// version. The backup itself is left in place, and the version that was
    /// active when it was taken is not restored.
    pub async fn rollback(&self) -> Result<(String, String), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut names = self.backup_names().await?;
        let Some(last) = names.pop() else {
            return Err(StoreError::NoBackupAvailable);
        };
        fs::copy(self.backups_dir.join(&last), &self.script_path).await?;
        let version = self.bump_version().await?;
        info!(restored = %last, %version, "rolled back to previous script");
        Ok((last, version))
    }

    /// All backups, most recent first, with the display time derived from
    /// each file name, plus the current version.
    pub async fn history(&self) -> Result<History, StoreError> {
        let mut names = self.backup_names().await?;
        names.reverse();
        let backups = names
            .into_iter()
            .map(|file| BackupEntry {
                time: display_time(&file),
                file,
            })
            .collect();
        let version = self.current_version().await?;
        Ok(History { backups, version })
    }

    async fn read_version(&self) -> Option<String> {
        let raw = fs::read(&self.version_path).await.ok()?;
        let record: VersionRecord = serde_json::from_slice(&raw).ok()?;
        Some(record.version)
    }

    /// Persist a fresh token. Tokens are wall-clock milliseconds, nudged past
    /// the previous token when two bumps land in the same millisecond.
    /// Callers must hold `write_lock`.
    async fn bump_version(&self) -> Result<String, StoreError> {
        let now = Utc::now().timestamp_millis().max(0) as u64;
        let next = match self.read_version().await.and_then(|v| v.parse::<u64>().ok()) {
            Some(prev) if prev >= now => prev + 1,
            _ => now,
        };
        let record = VersionRecord {
            version: next.to_string(),
        };
        fs::write(&self.version_path, serde_json::to_string_pretty(&record)?).await?;
        Ok(record.version)
    }

    /// Backup file names in ascending lexicographic order, which matches
    /// chronological order for the fixed timestamp format.
    async fn backup_names(&self) -> Result<Vec<String>, StoreError> {
        let mut names = Vec::new();
        let mut entries = fs::read_dir(&self.backups_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            if name.starts_with(BACKUP_PREFIX) && name.ends_with(BACKUP_SUFFIX) {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}

fn backup_name(now: DateTime<Utc>) -> String {
    let stamp = now
        .to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace([':', '.'], "-");
    format!("{BACKUP_PREFIX}{stamp}{BACKUP_SUFFIX}")
}

fn display_time(file: &str) -> String {
    file.strip_prefix(BACKUP_PREFIX)
        .unwrap_or(file)
        .replace('-', ":")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::time::Duration;

    async fn open_store(root: &Path) -> ScriptStore {
        ScriptStore::open(root.join("public"), root.to_path_buf())
            .await
            .expect("open store")
    }

    // Millisecond-named backups: keep successive snapshots on distinct names.
    async fn tick() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    #[test]
    fn backup_names_sort_chronologically() {
        let earlier = DateTime::from_timestamp_millis(1_700_000_000_123).unwrap();
        let later = DateTime::from_timestamp_millis(1_700_000_001_045).unwrap();
        let a = backup_name(earlier);
        let b = backup_name(later);
        assert_eq!(a, "system-backup-2023-11-14T22-13-20-123Z.js");
        assert!(a < b);
    }

    #[test]
    fn display_time_restores_separators() {
        assert_eq!(
            display_time("system-backup-2023-11-14T22-13-20-123Z.js"),
            "2023:11:14T22:13:20:123Z.js"
        );
    }

    #[tokio::test]
    async fn seed_writes_script_index_and_version() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path()).await;
        store.seed().await.unwrap();

        let script = fs::read_to_string(dir.path().join("public").join("system.js"))
            .await
            .unwrap();
        assert!(script.contains("system.js"));
        assert!(
            fs::try_exists(dir.path().join("public").join("index.html"))
                .await
                .unwrap()
        );
        let version = store.current_version().await.unwrap();
        assert!(version.parse::<u64>().is_ok());

        // Seeding again must not clobber existing content.
        store.seed().await.unwrap();
        assert_eq!(store.current_version().await.unwrap(), version);
    }

    #[tokio::test]
    async fn current_version_is_idempotent_without_mutation() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path()).await;
        let first = store.current_version().await.unwrap();
        let second = store.current_version().await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn replace_overwrites_script_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path()).await;
        let code = "export const answer = 42;\n";
        store.replace_script(code, "").await.unwrap();
        let on_disk = fs::read_to_string(dir.path().join("public").join("system.js"))
            .await
            .unwrap();
        assert_eq!(on_disk, code);
    }

    #[tokio::test]
    async fn replace_writes_metadata_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path()).await;
        let (version, meta) = store.replace_script("1;", "initial push").await.unwrap();
        assert_eq!(meta.version, version);
        assert_eq!(meta.note, "initial push");

        let raw = fs::read(dir.path().join("backups").join(format!("meta-{version}.json")))
            .await
            .unwrap();
        let on_disk: UpdateMetadata = serde_json::from_slice(&raw).unwrap();
        assert_eq!(on_disk.version, version);
        assert_eq!(on_disk.note, "initial push");
        assert!(on_disk.backup.is_none());
    }

    #[tokio::test]
    async fn rollback_without_backups_leaves_state_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path()).await;
        let version = store.current_version().await.unwrap();

        let err = store.rollback().await.unwrap_err();
        assert!(matches!(err, StoreError::NoBackupAvailable));
        assert_eq!(store.current_version().await.unwrap(), version);
        assert!(
            !fs::try_exists(dir.path().join("public").join("system.js"))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn history_lists_backups_most_recent_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path()).await;
        store.replace_script("1;", "").await.unwrap();
        tick().await;
        store.replace_script("2;", "").await.unwrap();
        tick().await;
        store.replace_script("3;", "").await.unwrap();

        let history = store.history().await.unwrap();
        // First replace had nothing to snapshot.
        assert_eq!(history.backups.len(), 2);
        assert!(history.backups[0].file > history.backups[1].file);
        for entry in &history.backups {
            assert_eq!(entry.time, display_time(&entry.file));
            assert!(entry.file.starts_with(BACKUP_PREFIX));
        }
        assert_eq!(history.version, store.current_version().await.unwrap());
    }

    #[tokio::test]
    async fn fresh_store_update_then_rollback_flow() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path()).await;

        let v0 = store.current_version().await.unwrap();
        let (v1, meta1) = store.replace_script("console.log(1)", "first").await.unwrap();
        assert!(meta1.backup.is_none());
        tick().await;
        let (v2, meta2) = store
            .replace_script("console.log(2)", "second")
            .await
            .unwrap();
        let snapshot = meta2.backup.clone().expect("second replace snapshots the first");

        let (restored, v3) = store.rollback().await.unwrap();
        assert_eq!(restored, snapshot);
        // The restored backup stays in place.
        assert!(
            fs::try_exists(dir.path().join("backups").join(&restored))
                .await
                .unwrap()
        );

        let script = fs::read_to_string(dir.path().join("public").join("system.js"))
            .await
            .unwrap();
        assert_eq!(script, "console.log(1)");

        let tokens: Vec<u64> = [&v0, &v1, &v2, &v3]
            .iter()
            .map(|v| v.parse().unwrap())
            .collect();
        assert!(tokens.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn version_advances_even_within_one_millisecond() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path()).await;
        let (v1, _) = store.replace_script("1;", "").await.unwrap();
        let (v2, _) = store.replace_script("2;", "").await.unwrap();
        let (v3, _) = store.replace_script("3;", "").await.unwrap();
        assert!(v1.parse::<u64>().unwrap() < v2.parse::<u64>().unwrap());
        assert!(v2.parse::<u64>().unwrap() < v3.parse::<u64>().unwrap());
    }
}
