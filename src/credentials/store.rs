use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::types::{mask_secret, ApiKeyRecord, CredentialFile, LegacyKeyMap, MaskedKey};
use crate::constants::DEFAULT_KEY_COOLDOWN_SECS;
use crate::utils::{PaiError, PaiResult};

const LOCK_TIMEOUT: Duration = Duration::from_secs(5);
const LOCK_STALE_AFTER: Duration = Duration::from_secs(30);
const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(25);

/// Id given to a key migrated from the single-key plain-text file
pub const LEGACY_KEY_ID: &str = "primary";

/// Sidecar lock file held for the duration of a read-modify-write cycle
struct FileLock {
    path: PathBuf,
}

impl FileLock {
    fn acquire(target: &Path) -> PaiResult<Self> {
        let mut name = target.as_os_str().to_owned();
        name.push(".lock");
        let path = PathBuf::from(name);
        let started = Instant::now();

        loop {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    let _ = writeln!(file, "{}", std::process::id());
                    return Ok(Self { path });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if is_stale(&path) {
                        warn!(lock = %path.display(), "removing stale credential lock");
                        let _ = fs::remove_file(&path);
                        continue;
                    }
                    if started.elapsed() > LOCK_TIMEOUT {
                        return Err(PaiError::Config(format!(
                            "Credential store is locked by another process ({})",
                            path.display()
                        )));
                    }
                    std::thread::sleep(LOCK_RETRY_INTERVAL);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

fn is_stale(path: &Path) -> bool {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| modified.elapsed().ok())
        .is_some_and(|age| age > LOCK_STALE_AFTER)
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

#[derive(Debug, Default)]
struct State {
    keys: Vec<ApiKeyRecord>,
    rr_index: usize,
    default: Option<String>,
}

impl State {
    fn from_file(file: CredentialFile) -> Self {
        let mut keys = file.keys;
        for key in &mut keys {
            key.blacklisted_until = file.blacklist.get(&key.id).copied();
        }
        let rr_index = if keys.is_empty() { 0 } else { file.rr_index % keys.len() };
        Self {
            keys,
            rr_index,
            default: file.default,
        }
    }

    fn to_file(&self) -> CredentialFile {
        CredentialFile {
            version: 2,
            default: self.default.clone(),
            keys: self.keys.clone(),
            rr_index: self.rr_index,
            blacklist: self
                .keys
                .iter()
                .filter_map(|k| k.blacklisted_until.map(|until| (k.id.clone(), until)))
                .collect(),
        }
    }

    fn purge_expired(&mut self, now: DateTime<Utc>) -> bool {
        let mut changed = false;
        for key in &mut self.keys {
            if key.blacklisted_until.is_some_and(|until| until <= now) {
                key.blacklisted_until = None;
                changed = true;
            }
        }
        changed
    }

    fn find_mut(&mut self, id: &str) -> PaiResult<&mut ApiKeyRecord> {
        self.keys
            .iter_mut()
            .find(|k| k.id == id)
            .ok_or_else(|| PaiError::NotFound(format!("API key id '{}'", id)))
    }
}

/// Persisted, rotatable set of provider credentials
#[derive(Debug)]
pub struct CredentialStore {
    path: Option<PathBuf>,
    state: Mutex<State>,
}

impl CredentialStore {
    /// Open the store at `path`, migrating older formats. A missing file is an
    /// empty store; it is created on first write.
    pub fn open(path: impl Into<PathBuf>) -> PaiResult<Self> {
        let path = path.into();
        let store = Self {
            path: Some(path),
            state: Mutex::new(State::default()),
        };
        store.update(|_| Ok(()))?;
        Ok(store)
    }

    /// Store that never touches disk
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: Mutex::new(State::default()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn load(path: &Path) -> PaiResult<State> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(State::default()),
            Err(e) => return Err(e.into()),
        };
        let raw = raw.trim();
        if raw.is_empty() {
            return Ok(State::default());
        }

        if let Ok(file) = serde_json::from_str::<CredentialFile>(raw) {
            return Ok(State::from_file(file));
        }

        let now = Utc::now();
        if let Ok(legacy) = serde_json::from_str::<LegacyKeyMap>(raw) {
            info!("migrating keyed credential map to the current format");
            let mut order = legacy.order;
            let mut extra: Vec<String> = legacy
                .keys
                .keys()
                .filter(|id| !order.contains(id))
                .cloned()
                .collect();
            extra.sort();
            order.extend(extra);
            let keys: Vec<ApiKeyRecord> = order
                .iter()
                .filter_map(|id| {
                    legacy
                        .keys
                        .get(id)
                        .map(|secret| ApiKeyRecord::new(id, secret, None, now))
                })
                .collect();
            let rr_index = if keys.is_empty() { 0 } else { legacy.rr_index % keys.len() };
            return Ok(State {
                keys,
                rr_index,
                default: legacy.default,
            });
        }

        if raw.starts_with('{') || raw.starts_with('[') {
            return Err(PaiError::Config(format!(
                "Credential file {} is not valid",
                path.display()
            )));
        }

        info!("migrating legacy single API key to id '{}'", LEGACY_KEY_ID);
        Ok(State {
            keys: vec![ApiKeyRecord::new(LEGACY_KEY_ID, raw, None, now)],
            rr_index: 0,
            default: Some(LEGACY_KEY_ID.to_string()),
        })
    }

    fn save(path: &Path, state: &State) -> PaiResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&state.to_file())?;

        let mut tmp_name = path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp = PathBuf::from(tmp_name);
        fs::write(&tmp, json)?;
        restrict_permissions(&tmp)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Locked read-modify-write; the file on disk is the source of truth
    fn update<T>(&self, mutate: impl FnOnce(&mut State) -> PaiResult<T>) -> PaiResult<T> {
        let mut state = self.state.lock();
        let Some(path) = &self.path else {
            return mutate(&mut state);
        };

        let _lock = FileLock::acquire(path)?;
        let before = fs::read_to_string(path).ok();
        *state = Self::load(path)?;
        let result = mutate(&mut state)?;
        let after = serde_json::to_string_pretty(&state.to_file())?;
        if before.as_deref().map(str::trim) != Some(after.trim()) && !(before.is_none() && state.keys.is_empty()) {
            Self::save(path, &state)?;
        }
        Ok(result)
    }

    /// Add a key, or replace the secret of an existing id
    pub fn add_key(&self, id: &str, secret: &str, label: Option<&str>) -> PaiResult<bool> {
        if id.is_empty() || id.chars().any(char::is_whitespace) {
            return Err(PaiError::Config(
                "Key id must be a simple identifier without spaces".to_string(),
            ));
        }
        if secret.trim().is_empty() {
            return Err(PaiError::Config("API key must not be empty".to_string()));
        }

        let now = Utc::now();
        self.update(|state| {
            let created = match state.keys.iter_mut().find(|k| k.id == id) {
                Some(existing) => {
                    existing.secret = secret.trim().to_string();
                    if label.is_some() {
                        existing.label = label.map(str::to_string);
                    }
                    false
                }
                None => {
                    state.keys.push(ApiKeyRecord::new(id, secret.trim(), label, now));
                    true
                }
            };
            if state.default.is_none() {
                state.default = Some(id.to_string());
            }
            Ok(created)
        })
    }

    pub fn remove_key(&self, id: &str) -> PaiResult<()> {
        self.update(|state| {
            let before = state.keys.len();
            state.keys.retain(|k| k.id != id);
            if state.keys.len() == before {
                return Err(PaiError::NotFound(format!("API key id '{}'", id)));
            }
            if state.default.as_deref() == Some(id) {
                state.default = state.keys.first().map(|k| k.id.clone());
            }
            if state.rr_index >= state.keys.len() {
                state.rr_index = 0;
            }
            Ok(())
        })
    }

    pub fn set_enabled(&self, id: &str, enabled: bool) -> PaiResult<()> {
        self.update(|state| {
            state.find_mut(id)?.enabled = enabled;
            Ok(())
        })
    }

    pub fn set_default(&self, id: &str) -> PaiResult<()> {
        self.update(|state| {
            state.find_mut(id)?;
            state.default = Some(id.to_string());
            Ok(())
        })
    }

    pub fn default_key_id(&self) -> Option<String> {
        self.state.lock().default.clone()
    }

    pub fn len(&self) -> usize {
        self.state.lock().keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of enabled keys, blacklisted or not
    pub fn enabled_count(&self) -> usize {
        self.state.lock().keys.iter().filter(|k| k.enabled).count()
    }

    pub fn list(&self) -> Vec<MaskedKey> {
        self.list_at(Utc::now())
    }

    pub fn list_at(&self, now: DateTime<Utc>) -> Vec<MaskedKey> {
        let state = self.state.lock();
        state
            .keys
            .iter()
            .map(|key| MaskedKey {
                id: key.id.clone(),
                label: key.label.clone(),
                masked: mask_secret(&key.secret),
                enabled: key.enabled,
                is_default: state.default.as_deref() == Some(key.id.as_str()),
                cooldown_secs: key
                    .blacklisted_until
                    .filter(|until| *until > now)
                    .map(|until| (until - now).num_seconds().max(1)),
            })
            .collect()
    }

    /// Next usable key in round-robin order, as `(id, secret)`
    pub fn get_next_available_key(&self) -> PaiResult<Option<(String, String)>> {
        self.get_next_available_key_at(Utc::now())
    }

    pub fn get_next_available_key_at(&self, now: DateTime<Utc>) -> PaiResult<Option<(String, String)>> {
        self.update(|state| {
            state.purge_expired(now);
            let count = state.keys.len();
            if count == 0 {
                return Ok(None);
            }
            let start = state.rr_index % count;
            for offset in 0..count {
                let idx = (start + offset) % count;
                let key = &state.keys[idx];
                if key.is_usable(now) {
                    let picked = (key.id.clone(), key.secret.clone());
                    state.rr_index = (idx + 1) % count;
                    debug!(key = %picked.0, "selected credential");
                    return Ok(Some(picked));
                }
            }
            Ok(None)
        })
    }

    /// Put a key on cooldown for `duration` (default ten minutes)
    pub fn blacklist(&self, id: &str, duration: Option<ChronoDuration>) -> PaiResult<()> {
        self.blacklist_at(id, duration, Utc::now())
    }

    pub fn blacklist_at(&self, id: &str, duration: Option<ChronoDuration>, now: DateTime<Utc>) -> PaiResult<()> {
        let duration = duration.unwrap_or_else(|| ChronoDuration::seconds(DEFAULT_KEY_COOLDOWN_SECS));
        self.update(|state| {
            let key = state.find_mut(id)?;
            key.blacklisted_until = Some(now + duration);
            warn!(key = id, secs = duration.num_seconds(), "credential placed on cooldown");
            Ok(())
        })
    }

    /// Shortest wait until an enabled key comes off cooldown
    pub fn min_remaining_cooldown(&self) -> Option<ChronoDuration> {
        self.min_remaining_cooldown_at(Utc::now())
    }

    pub fn min_remaining_cooldown_at(&self, now: DateTime<Utc>) -> Option<ChronoDuration> {
        self.state
            .lock()
            .keys
            .iter()
            .filter(|k| k.enabled)
            .filter_map(|k| k.blacklisted_until)
            .filter(|until| *until > now)
            .map(|until| until - now)
            .min()
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
