// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path resolution utilities.
//!
//! Determine well-known locations of the files proxforge persists between
//! runs. Nothing here touches the file system.

use std::path::PathBuf;

/// Environment variable that relocates the defaults directory.
pub const DEFAULTS_DIR_VAR: &str = "PROXFORGE_DEFAULTS_DIR";

/// Determine default absolute path to the defaults directory.
///
/// Honors [`DEFAULTS_DIR_VAR`] when it is set to a non-empty value. Otherwise
/// uses XDG Base Directory path `$XDG_CONFIG_HOME/proxforge`. Does not check
/// if the path returned actually exists.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
///
/// # See Also
///
/// - [XDG Base Directory](https://wiki.archlinux.org/title/XDG_Base_Directory)
pub fn default_defaults_dir() -> Result<PathBuf> {
    if let Some(dir) = std::env::var_os(DEFAULTS_DIR_VAR).filter(|dir| !dir.is_empty()) {
        return Ok(PathBuf::from(dir));
    }

    dirs::config_dir()
        .map(|path| path.join("proxforge"))
        .ok_or(NoWayHome)
}

/// No way to determine user's home directory.
///
/// # See Also
///
/// - [`dirs::home_dir`](https://docs.rs/dirs/latest/dirs/fn.home_dir.html)
#[derive(Clone, Debug, thiserror::Error)]
#[error("cannot determine absolute path to user's home directory")]
pub struct NoWayHome;

/// Friendly result alias :3
pub type Result<T, E = NoWayHome> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;

    #[sealed_test(env = [("PROXFORGE_DEFAULTS_DIR", "/srv/proxforge")])]
    fn defaults_dir_honors_override() -> anyhow::Result<()> {
        assert_eq!(default_defaults_dir()?, PathBuf::from("/srv/proxforge"));
        Ok(())
    }

    #[sealed_test(env = [("PROXFORGE_DEFAULTS_DIR", ""), ("XDG_CONFIG_HOME", "/tmp/xdg")])]
    fn empty_override_falls_back_to_xdg() -> anyhow::Result<()> {
        assert_eq!(default_defaults_dir()?, PathBuf::from("/tmp/xdg/proxforge"));
        Ok(())
    }
}
