// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Defaults store management and manipulation.
//!
//! Proxforge remembers settings an operator chose to keep in the __defaults
//! store__. The store houses one global defaults file, plus one optional
//! defaults file per application.
//!
//! # Defaults Store Layout
//!
//! The store can be placed anywhere on the file system, but the default
//! location is `$XDG_CONFIG_HOME/proxforge`:
//!
//! ```text
//! proxforge/
//! ├── default.vars        global defaults
//! └── apps/
//!     ├── jellyfin.vars   defaults for "jellyfin"
//!     └── vaultwarden.vars
//! ```
//!
//! # Defaults File Format
//!
//! Defaults files are flat `key=value` text so they can be read by humans and
//! by shells alike. Blank lines and `#` comments are ignored, except for the
//! `# revision: N` header which counts how many times the file was saved.
//! Values that contain whitespace or quoting characters are double-quoted.
//!
//! Files are never patched in place. Every save replaces the whole file by
//! writing a temporary sibling and renaming it over the original.

use crate::config::{InvalidValue, SettingKey};

use std::{
    collections::BTreeMap,
    fmt::{Display, Formatter, Result as FmtResult},
    fs::{read_to_string, remove_file, rename, write},
    io::ErrorKind,
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument, warn};

const GLOBAL_FILE: &str = "default.vars";
const APPS_DIR: &str = "apps";
const EXTENSION: &str = "vars";
const REVISION_HEADER: &str = "# revision:";

/// Scope of a defaults file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Defaults shared by every application.
    Global,

    /// Defaults for one named application.
    App(String),
}

impl Display for Scope {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Global => fmt.write_str("global"),
            Self::App(name) => write!(fmt, "app {name:?}"),
        }
    }
}

/// Parsed content of a defaults file.
///
/// # Invariant
///
/// - Only persistable keys with valid values are held.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Defaults {
    revision: u64,
    entries: BTreeMap<SettingKey, String>,
}

impl Defaults {
    /// Construct empty set of defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of times the backing file has been saved.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Get value for key, if present.
    pub fn get(&self, key: SettingKey) -> Option<&str> {
        self.entries.get(&key).map(String::as_str)
    }

    /// Set value for key.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::NotPersistable`] if key cannot be saved.
    /// - Return [`StoreError::InvalidValue`] if value is rejected by key.
    pub fn set(&mut self, key: SettingKey, value: impl Into<String>) -> Result<()> {
        if !key.is_persistable() {
            return Err(StoreError::NotPersistable(key));
        }

        let value = value.into();
        key.validate(&value)?;
        self.entries.insert(key, value);

        Ok(())
    }

    /// Remove value for key.
    pub fn remove(&mut self, key: SettingKey) -> Option<String> {
        self.entries.remove(&key)
    }

    /// Iterate over entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (SettingKey, &str)> {
        self.entries.iter().map(|(key, value)| (*key, value.as_str()))
    }

    /// Check if no entries are held.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn insert_line(&mut self, number: usize, line: &str) {
        let line = line.strip_prefix("export ").unwrap_or(line);
        let Some((name, value)) = line.split_once('=') else {
            warn!("skip line {number}: expected key=value");
            return;
        };

        let key = match name.trim().parse::<SettingKey>() {
            Ok(key) => key,
            Err(error) => {
                warn!("skip line {number}: {error}");
                return;
            }
        };

        let value = unquote(value.trim());
        if let Err(error) = self.set(key, value) {
            warn!("skip line {number}: {error}");
        }
    }
}

impl Display for Defaults {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        writeln!(fmt, "# proxforge defaults")?;
        writeln!(fmt, "{REVISION_HEADER} {}", self.revision)?;
        for (key, value) in &self.entries {
            writeln!(fmt, "{key}={}", quote(value))?;
        }

        Ok(())
    }
}

impl From<&str> for Defaults {
    fn from(content: &str) -> Self {
        let mut defaults = Defaults::new();
        for (index, line) in content.lines().enumerate() {
            let line = line.trim();
            if let Some(revision) = line.strip_prefix(REVISION_HEADER) {
                defaults.revision = revision.trim().parse().unwrap_or_default();
                continue;
            }

            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            defaults.insert_line(index + 1, line);
        }

        defaults
    }
}

impl From<String> for Defaults {
    fn from(content: String) -> Self {
        Self::from(content.as_str())
    }
}

fn needs_quotes(value: &str) -> bool {
    value.is_empty()
        || value
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '"' | '\'' | '#' | '\\' | '$' | '`'))
}

fn quote(value: &str) -> String {
    if !needs_quotes(value) {
        return value.into();
    }

    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        if matches!(c, '"' | '\\' | '$' | '`') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');

    out
}

fn unquote(value: &str) -> String {
    if value.len() >= 2 && value.starts_with('\'') && value.ends_with('\'') {
        return value[1..value.len() - 1].into();
    }

    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        let mut out = String::with_capacity(value.len());
        let mut chars = value[1..value.len() - 1].chars();
        while let Some(c) = chars.next() {
            match c {
                '\\' => out.extend(chars.next()),
                c => out.push(c),
            }
        }
        return out;
    }

    value.into()
}

/// Defaults file bound to its scope and location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefaultsFile {
    pub scope: Scope,
    pub path: PathBuf,
    pub defaults: Defaults,
}

impl DefaultsFile {
    /// Check if the file existed when it was loaded, or has been saved since.
    pub fn exists(&self) -> bool {
        self.path.exists()
    }
}

/// Store of defaults files.
#[derive(Debug, Clone)]
pub struct DefaultsStore {
    root: PathBuf,
}

impl DefaultsStore {
    /// Open defaults store at target directory.
    ///
    /// Creates the directory layout if it does not exist yet.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::CreateDir`] if layout cannot be created.
    #[instrument(skip(root), level = "debug")]
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let apps = root.join(APPS_DIR);
        debug!("open defaults store: {:?}", root.display());

        // INVARIANT: Always have both the root and the per-app directory.
        mkdirp::mkdirp(&apps).map_err(|err| StoreError::CreateDir {
            source: err,
            path: apps.clone(),
        })?;

        Ok(Self { root })
    }

    /// Root directory of defaults store.
    pub fn root(&self) -> &Path {
        self.root.as_path()
    }

    /// Determine path of defaults file for scope.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::InvalidAppName`] if app name is not usable as
    ///   a file name.
    pub fn path_of(&self, scope: &Scope) -> Result<PathBuf> {
        match scope {
            Scope::Global => Ok(self.root.join(GLOBAL_FILE)),
            Scope::App(name) => {
                if !is_app_name(name) {
                    return Err(StoreError::InvalidAppName(name.clone()));
                }
                Ok(self
                    .root
                    .join(APPS_DIR)
                    .join(format!("{name}.{EXTENSION}")))
            }
        }
    }

    /// Load defaults file for scope.
    ///
    /// A missing file loads as an empty set of defaults at revision zero.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::Read`] if file exists but cannot be read.
    /// - Return [`StoreError::InvalidAppName`] for unusable app names.
    #[instrument(skip(self), level = "debug")]
    pub fn load(&self, scope: &Scope) -> Result<DefaultsFile> {
        let path = self.path_of(scope)?;
        let defaults = match read_to_string(&path) {
            Ok(content) => Defaults::from(content),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("no {scope} defaults at {:?}", path.display());
                Defaults::new()
            }
            Err(err) => {
                return Err(StoreError::Read {
                    source: err,
                    path,
                })
            }
        };

        Ok(DefaultsFile {
            scope: scope.clone(),
            path,
            defaults,
        })
    }

    /// Save defaults file, replacing whatever was on disk.
    ///
    /// Bumps the revision before writing.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::Write`] if temporary file cannot be written.
    /// - Return [`StoreError::Rename`] if temporary file cannot replace the
    ///   original.
    #[instrument(skip(self, file), level = "debug")]
    pub fn save(&self, file: &mut DefaultsFile) -> Result<()> {
        file.defaults.revision += 1;
        let tmp = file.path.with_extension(format!("{EXTENSION}.tmp"));

        write(&tmp, file.defaults.to_string().as_bytes()).map_err(|err| StoreError::Write {
            source: err,
            path: tmp.clone(),
        })?;
        rename(&tmp, &file.path).map_err(|err| StoreError::Rename {
            source: err,
            path: file.path.clone(),
        })?;

        info!(
            "saved {} defaults to {:?} (revision {})",
            file.scope,
            file.path.display(),
            file.defaults.revision
        );

        Ok(())
    }

    /// Replace every entry of a scope with new defaults.
    ///
    /// Revision numbering continues from whatever is on disk.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError`] if loading or saving fails.
    pub fn replace(&self, scope: &Scope, defaults: Defaults) -> Result<DefaultsFile> {
        let mut file = self.load(scope)?;
        file.defaults = Defaults {
            revision: file.defaults.revision,
            entries: defaults.entries,
        };
        self.save(&mut file)?;

        Ok(file)
    }

    /// Delete defaults file of scope.
    ///
    /// Only ever called on explicit operator request. Returns false if there
    /// was nothing to delete.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::Remove`] if file exists but cannot be removed.
    #[instrument(skip(self), level = "debug")]
    pub fn remove(&self, scope: &Scope) -> Result<bool> {
        let path = self.path_of(scope)?;
        match remove_file(&path) {
            Ok(()) => {
                info!("removed {scope} defaults at {:?}", path.display());
                Ok(true)
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(StoreError::Remove { source: err, path }),
        }
    }

    /// List names of applications that have a defaults file.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::Pattern`] if the store path cannot be globbed.
    pub fn list_apps(&self) -> Result<Vec<String>> {
        let dir = self.root.join(APPS_DIR);
        let pattern = format!(
            "{}/*.{EXTENSION}",
            glob::Pattern::escape(dir.to_string_lossy().as_ref())
        );

        let mut names = glob::glob(&pattern)?
            .filter_map(|entry| entry.ok())
            .filter_map(|path| {
                path.file_stem()
                    .map(|stem| stem.to_string_lossy().into_owned())
            })
            .filter(|name| is_app_name(name))
            .collect::<Vec<_>>();
        names.sort();

        Ok(names)
    }
}

fn is_app_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphanumeric())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// Defaults store error types.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Store directory cannot be created.
    #[error("failed to create defaults directory at {:?}", path.display())]
    CreateDir {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Defaults file cannot be read from.
    #[error("failed to read defaults file at {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Temporary defaults file cannot be written to.
    #[error("failed to write defaults file at {:?}", path.display())]
    Write {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Temporary defaults file cannot replace the original.
    #[error("failed to replace defaults file at {:?}", path.display())]
    Rename {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Defaults file cannot be removed.
    #[error("failed to remove defaults file at {:?}", path.display())]
    Remove {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// App name cannot be used as a file name.
    #[error("invalid application name {0:?}")]
    InvalidAppName(String),

    /// Key is unique to one guest and never saved.
    #[error("setting {0} cannot be saved as a default")]
    NotPersistable(SettingKey),

    /// Value rejected by its key.
    #[error(transparent)]
    InvalidValue(#[from] InvalidValue),

    /// Glob pattern for store listing is malformed.
    #[error(transparent)]
    Pattern(#[from] glob::PatternError),
}

/// Friendly result alias :3
pub type Result<T, E = StoreError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;

    #[test]
    fn parse_defaults_file() {
        let content = indoc! {r#"
            # proxforge defaults
            # revision: 4
            var_cpu=2
            export var_ram="4096"
            var_brg='vmbr1'

            var_ssh_authorized_key="ssh-ed25519 AAAAC3Nza user@host"
        "#};

        let result = Defaults::from(content);

        assert_eq!(result.revision(), 4);
        assert_eq!(result.get(SettingKey::Cpu), Some("2"));
        assert_eq!(result.get(SettingKey::Ram), Some("4096"));
        assert_eq!(result.get(SettingKey::Bridge), Some("vmbr1"));
        assert_eq!(
            result.get(SettingKey::SshAuthorizedKey),
            Some("ssh-ed25519 AAAAC3Nza user@host")
        );
    }

    #[test]
    fn parse_skips_bad_lines() {
        let content = indoc! {r#"
            var_cpu=two
            var_gpu=1
            var_hostname=web01
            just some words
            var_disk=8
        "#};

        let result = Defaults::from(content);
        let keys = result.iter().map(|(key, _)| key).collect::<Vec<_>>();

        assert_eq!(keys, vec![SettingKey::Disk]);
    }

    #[test]
    fn serialize_defaults_file() -> anyhow::Result<()> {
        let mut defaults = Defaults::new();
        defaults.set(SettingKey::Ram, "2048")?;
        defaults.set(SettingKey::Cpu, "2")?;
        defaults.set(SettingKey::Vlan, "")?;
        defaults.set(SettingKey::SshAuthorizedKey, "ssh-rsa AAAA \"me\"")?;

        let expect = indoc! {r#"
            # proxforge defaults
            # revision: 0
            var_cpu=2
            var_ram=2048
            var_vlan=""
            var_ssh_authorized_key="ssh-rsa AAAA \"me\""
        "#};

        assert_eq!(defaults.to_string(), expect);
        assert_eq!(Defaults::from(expect), defaults);

        Ok(())
    }

    #[test]
    fn refuse_per_guest_keys() {
        let mut defaults = Defaults::new();
        let result = defaults.set(SettingKey::Ctid, "120");
        assert!(matches!(
            result,
            Err(StoreError::NotPersistable(SettingKey::Ctid))
        ));
    }

    #[sealed_test]
    fn save_bumps_revision_and_replaces_file() -> anyhow::Result<()> {
        let store = DefaultsStore::open(std::env::current_dir()?.join("store"))?;
        let scope = Scope::App("jellyfin".into());

        let mut file = store.load(&scope)?;
        assert!(!file.exists());
        file.defaults.set(SettingKey::Cpu, "4")?;
        file.defaults.set(SettingKey::Disk, "16")?;
        store.save(&mut file)?;

        let mut next = Defaults::new();
        next.set(SettingKey::Ram, "8192")?;
        let file = store.replace(&scope, next)?;

        let reloaded = store.load(&scope)?;
        assert_eq!(reloaded, file);
        assert_eq!(reloaded.defaults.revision(), 2);
        assert_eq!(reloaded.defaults.get(SettingKey::Cpu), None);
        assert_eq!(reloaded.defaults.get(SettingKey::Ram), Some("8192"));

        Ok(())
    }

    #[sealed_test]
    fn list_and_remove_app_defaults() -> anyhow::Result<()> {
        let store = DefaultsStore::open(std::env::current_dir()?.join("store"))?;
        for name in ["vaultwarden", "adguard"] {
            store.replace(&Scope::App(name.into()), Defaults::new())?;
        }
        store.replace(&Scope::Global, Defaults::new())?;

        assert_eq!(store.list_apps()?, vec!["adguard", "vaultwarden"]);
        assert!(store.remove(&Scope::App("adguard".into()))?);
        assert!(!store.remove(&Scope::App("adguard".into()))?);
        assert_eq!(store.list_apps()?, vec!["vaultwarden"]);

        Ok(())
    }

    #[test]
    fn reject_path_like_app_names() {
        let store = DefaultsStore {
            root: PathBuf::from("/nonexistent"),
        };
        assert!(store.path_of(&Scope::App("../etc/passwd".into())).is_err());
    }
}
