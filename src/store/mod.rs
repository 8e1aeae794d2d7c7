use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::SellError;

#[cfg(unix)]
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

/// Owner-only: every record carries an encrypted private key.
const USERS_FILE_MODE: u32 = 0o600;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub wallet_address: String,
    /// Opaque blob produced by the wallet vault.
    pub encrypted_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_user(&self, user_id: &str) -> crate::error::Result<Option<User>>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct UsersFile {
    #[serde(default)]
    users: Vec<User>,
}

/// `users.yml` on disk, re-read on every lookup so imports show up without a restart.
pub struct FileUserStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileUserStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }

    /// Inserts or replaces the record with the same id.
    pub fn upsert(&self, user: User) -> Result<()> {
        let _guard = self.write_lock.lock();
        let mut file = read_users_file(&self.path)?;
        match file.users.iter_mut().find(|existing| existing.id == user.id) {
            Some(existing) => *existing = user,
            None => file.users.push(user),
        }
        let raw = serde_yaml::to_string(&file).context("serialize users file")?;
        write_users_file(&self.path, raw.as_bytes())
    }
}

#[async_trait]
impl UserStore for FileUserStore {
    async fn find_user(&self, user_id: &str) -> crate::error::Result<Option<User>> {
        let path = self.path.clone();
        let user_id = user_id.to_string();
        let lookup = tokio::task::spawn_blocking(move || -> Result<Option<User>> {
            let file = read_users_file(&path)?;
            Ok(file.users.into_iter().find(|user| user.id == user_id))
        })
        .await
        .map_err(|err| SellError::StoreUnavailable(format!("user lookup task: {err}")))?;
        lookup.map_err(|err| SellError::StoreUnavailable(format!("{err:#}")))
    }
}

fn read_users_file(path: &Path) -> Result<UsersFile> {
    if !path.exists() {
        return Ok(UsersFile::default());
    }
    let raw = fs::read_to_string(path)
        .with_context(|| format!("read users file {}", path.display()))?;
    if raw.trim().is_empty() {
        return Ok(UsersFile::default());
    }
    serde_yaml::from_str(&raw).with_context(|| format!("parse users file {}", path.display()))
}

/// Writes a sibling temp file with owner-only permissions, then renames it over `path`.
fn write_users_file(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).with_context(|| format!("create dir {}", parent.display()))?;
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("users.yml");
    let tmp_path = parent.join(format!(
        ".{file_name}.tmp-{}",
        rand::thread_rng().gen::<u64>()
    ));

    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(USERS_FILE_MODE);
    let mut file = options
        .open(&tmp_path)
        .with_context(|| format!("open temp file {}", tmp_path.display()))?;
    file.write_all(contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    file.sync_all()
        .with_context(|| format!("sync temp file {}", tmp_path.display()))?;
    drop(file);

    // The create mode is filtered through umask; set it outright before the rename.
    #[cfg(unix)]
    if let Err(err) = fs::set_permissions(&tmp_path, fs::Permissions::from_mode(USERS_FILE_MODE))
    {
        let _ = fs::remove_file(&tmp_path);
        return Err(anyhow::Error::new(err)
            .context(format!("restrict permissions on {}", tmp_path.display())));
    }

    fs::rename(&tmp_path, path).with_context(|| format!("replace users file {}", path.display()))
}
