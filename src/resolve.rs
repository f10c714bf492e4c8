// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Setting resolution.
//!
//! Every setting proxforge uses is resolved through four __precedence
//! tiers__, consulted in a fixed order:
//!
//! 1. Environment variable named after the key, e.g., `var_ram=8192`.
//! 2. Per-app defaults file of the application being provisioned.
//! 3. Global defaults file.
//! 4. Built-in defaults, possibly overlaid by an app manifest.
//!
//! The first tier that holds a key wins. A key missing from a tier is not an
//! error, resolution simply falls through to the next tier. Built-in defaults
//! always hold every required key, so resolution of a required key can only
//! fail on a bad environment override.
//!
//! Defaults files are handed to the [`Resolver`] by reference. The resolver
//! never reaches into the defaults store on its own.

use crate::{
    config::{BuiltinDefaults, InvalidValue, SettingKey},
    store::Defaults,
};

use std::{
    collections::{BTreeMap, HashMap},
    fmt::{Display, Formatter, Result as FmtResult},
};
use tracing::{debug, instrument};

/// Source of environment overrides.
pub trait EnvSource {
    /// Look up raw value of variable.
    fn var(&self, name: &str) -> Option<String>;
}

/// Environment of the current process.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

impl EnvSource for HashMap<String, String> {
    fn var(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

impl EnvSource for BTreeMap<String, String> {
    fn var(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

/// Precedence tier a value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    /// Entered by the operator in the settings wizard.
    Wizard,

    /// Environment variable override.
    Environment,

    /// Per-app defaults file.
    App,

    /// Global defaults file.
    Global,

    /// Built-in defaults.
    BuiltIn,
}

impl Display for Tier {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Wizard => fmt.write_str("wizard"),
            Self::Environment => fmt.write_str("environment"),
            Self::App => fmt.write_str("app defaults"),
            Self::Global => fmt.write_str("global defaults"),
            Self::BuiltIn => fmt.write_str("built-in"),
        }
    }
}

/// Resolved value of one setting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingValue {
    pub key: SettingKey,
    pub value: String,
    pub tier: Tier,
}

impl SettingValue {
    /// Value fit for display, with secrets masked.
    pub fn display_value(&self) -> &str {
        if self.key.is_secret() && !self.value.is_empty() {
            "********"
        } else {
            self.value.as_str()
        }
    }
}

/// Full set of resolved settings.
///
/// # Invariant
///
/// - Holds exactly one value for every [`SettingKey`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSettings {
    values: BTreeMap<SettingKey, SettingValue>,
}

impl ResolvedSettings {
    /// Get resolved value of key.
    pub fn get(&self, key: SettingKey) -> &SettingValue {
        // INVARIANT: Resolution fills in every key, so lookup cannot miss.
        &self.values[&key]
    }

    /// Get resolved raw string of key.
    pub fn value(&self, key: SettingKey) -> &str {
        self.get(key).value.as_str()
    }

    /// Get resolved value of key, treating empty as absent.
    pub fn optional(&self, key: SettingKey) -> Option<&str> {
        Some(self.value(key)).filter(|value| !value.is_empty())
    }

    /// Parse resolved value of key.
    ///
    /// # Errors
    ///
    /// - Return [`ResolveError::Parse`] if value does not parse as `T`.
    pub fn parse<T: std::str::FromStr>(&self, key: SettingKey) -> Result<T> {
        let value = self.value(key);
        value.parse().map_err(|_| ResolveError::Parse {
            key,
            value: value.into(),
        })
    }

    /// Check if operator asked for debug output through `var_verbose`.
    pub fn is_verbose(&self) -> bool {
        self.value(SettingKey::Verbose) == "yes"
    }

    /// Override one setting with an operator supplied value.
    ///
    /// # Errors
    ///
    /// - Return [`ResolveError::InvalidValue`] if value is rejected by key.
    pub fn set_from_wizard(&mut self, key: SettingKey, value: impl Into<String>) -> Result<()> {
        let value = value.into();
        key.validate(&value)?;
        self.values.insert(
            key,
            SettingValue {
                key,
                value,
                tier: Tier::Wizard,
            },
        );

        Ok(())
    }

    /// Iterate over resolved values in key order.
    pub fn iter(&self) -> impl Iterator<Item = &SettingValue> {
        self.values.values()
    }

    /// Extract persistable settings as a set of defaults.
    ///
    /// Keys are taken from every tier, so saving then resolving again yields
    /// the same values.
    ///
    /// # Errors
    ///
    /// - Return [`ResolveError::Store`] if a value is rejected by the store.
    pub fn to_defaults(&self) -> Result<Defaults> {
        let mut defaults = Defaults::new();
        for setting in self.iter().filter(|setting| setting.key.is_persistable()) {
            defaults.set(setting.key, setting.value.clone())?;
        }

        Ok(defaults)
    }
}

impl Display for ResolvedSettings {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        for setting in self.iter() {
            writeln!(
                fmt,
                "{:<24} {:<40} ({})",
                setting.key.name(),
                setting.display_value(),
                setting.tier
            )?;
        }

        Ok(())
    }
}

/// Resolve settings through the precedence tiers.
#[derive(Debug, Clone)]
pub struct Resolver<'a, E = ProcessEnv>
where
    E: EnvSource,
{
    env: E,
    app: Option<&'a Defaults>,
    global: Option<&'a Defaults>,
    builtins: &'a BuiltinDefaults,
}

impl<'a, E> Resolver<'a, E>
where
    E: EnvSource,
{
    /// Construct new resolver with built-in defaults as its only file tier.
    pub fn new(env: E, builtins: &'a BuiltinDefaults) -> Self {
        Self {
            env,
            app: None,
            global: None,
            builtins,
        }
    }

    /// Consult per-app defaults.
    pub fn with_app(mut self, app: &'a Defaults) -> Self {
        self.app = Some(app);
        self
    }

    /// Consult global defaults.
    pub fn with_global(mut self, global: &'a Defaults) -> Self {
        self.global = Some(global);
        self
    }

    /// Stop consulting per-app defaults.
    pub fn without_app(mut self) -> Self {
        self.app = None;
        self
    }

    /// Per-app defaults consulted, if any.
    pub fn app(&self) -> Option<&'a Defaults> {
        self.app
    }

    /// Global defaults consulted, if any.
    pub fn global(&self) -> Option<&'a Defaults> {
        self.global
    }

    /// Check whether key is pinned by the environment.
    pub fn is_overridden(&self, key: SettingKey) -> bool {
        self.env_value(key).is_some()
    }

    fn env_value(&self, key: SettingKey) -> Option<String> {
        // INVARIANT: A variable set to nothing counts as not set at all.
        self.env.var(key.name()).filter(|value| !value.is_empty())
    }

    /// Resolve single key.
    ///
    /// # Errors
    ///
    /// - Return [`ResolveError::InvalidOverride`] if environment holds a value
    ///   the key rejects.
    pub fn resolve(&self, key: SettingKey) -> Result<SettingValue> {
        if let Some(value) = self.env_value(key) {
            key.validate(&value)
                .map_err(|source| ResolveError::InvalidOverride { source })?;
            return Ok(SettingValue {
                key,
                value,
                tier: Tier::Environment,
            });
        }

        let files = [(Tier::App, self.app), (Tier::Global, self.global)];
        for (tier, defaults) in files {
            if let Some(value) = defaults.and_then(|defaults| defaults.get(key)) {
                return Ok(SettingValue {
                    key,
                    value: value.into(),
                    tier,
                });
            }
        }

        Ok(SettingValue {
            key,
            value: self.builtins.get(key).unwrap_or_default().into(),
            tier: Tier::BuiltIn,
        })
    }

    /// Resolve every key.
    ///
    /// # Errors
    ///
    /// - Return [`ResolveError::InvalidOverride`] on the first bad environment
    ///   override.
    #[instrument(skip(self), level = "debug")]
    pub fn resolve_all(&self) -> Result<ResolvedSettings> {
        let mut values = BTreeMap::new();
        for key in SettingKey::ALL {
            let setting = self.resolve(key)?;
            debug!("{key} resolved from {}", setting.tier);
            values.insert(key, setting);
        }

        Ok(ResolvedSettings { values })
    }
}

/// Resolution error types.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// Environment override rejected by its key.
    #[error("environment override rejected: {source}")]
    InvalidOverride {
        #[source]
        source: InvalidValue,
    },

    /// Operator supplied value rejected by its key.
    #[error(transparent)]
    InvalidValue(#[from] InvalidValue),

    /// Resolved value does not parse as requested type.
    #[error("setting {key} holds {value:?}, which cannot be used here")]
    Parse { key: SettingKey, value: String },

    /// Settings cannot be turned into defaults.
    #[error(transparent)]
    Store(#[from] crate::store::StoreError),
}

impl ResolveError {
    /// Key whose value caused this error, if any.
    pub fn key(&self) -> Option<SettingKey> {
        match self {
            Self::InvalidOverride { source } | Self::InvalidValue(source) => Some(source.key),
            Self::Parse { key, .. } => Some(*key),
            Self::Store(_) => None,
        }
    }
}

/// Friendly result alias :3
pub type Result<T, E = ResolveError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use sealed_test::prelude::*;
    use simple_test_case::test_case;

    fn builtins() -> BuiltinDefaults {
        let standard = BuiltinDefaults::standard();
        BuiltinDefaults::try_from_pairs(SettingKey::ALL.into_iter().filter_map(|key| {
            let value = match key {
                SettingKey::Ram => "1024",
                SettingKey::Disk => "10",
                _ => standard.get(key)?,
            };
            Some((key, value.to_string()))
        }))
        .unwrap()
    }

    fn defaults(pairs: &[(SettingKey, &str)]) -> Defaults {
        let mut defaults = Defaults::new();
        for (key, value) in pairs {
            defaults.set(*key, *value).unwrap();
        }
        defaults
    }

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect()
    }

    #[test]
    fn environment_beats_every_file() -> anyhow::Result<()> {
        let builtins = builtins();
        let app = defaults(&[(SettingKey::Ram, "2048")]);
        let global = defaults(&[(SettingKey::Ram, "4096")]);
        let resolver = Resolver::new(env(&[("var_ram", "8192")]), &builtins)
            .with_app(&app)
            .with_global(&global);

        let result = resolver.resolve(SettingKey::Ram)?;
        let expect = SettingValue {
            key: SettingKey::Ram,
            value: "8192".into(),
            tier: Tier::Environment,
        };
        assert_eq!(result, expect);

        Ok(())
    }

    #[test]
    fn global_file_beats_builtin() -> anyhow::Result<()> {
        let builtins = builtins();
        let global = defaults(&[(SettingKey::Disk, "50")]);
        let resolver = Resolver::new(env(&[]), &builtins).with_global(&global);

        let result = resolver.resolve(SettingKey::Disk)?;
        assert_eq!(result.value, "50");
        assert_eq!(result.tier, Tier::Global);

        Ok(())
    }

    #[test_case(&[], &[], &[], "1024", Tier::BuiltIn; "nothing set")]
    #[test_case(&[], &[], &[(SettingKey::Ram, "4096")], "4096", Tier::Global; "global only")]
    #[test_case(&[], &[(SettingKey::Ram, "2048")], &[(SettingKey::Ram, "4096")], "2048", Tier::App; "app beats global")]
    #[test_case(&[("var_ram", "")], &[(SettingKey::Ram, "2048")], &[], "2048", Tier::App; "empty env is unset")]
    #[test_case(&[("var_ram", "8192")], &[], &[], "8192", Tier::Environment; "env alone")]
    #[test]
    fn precedence_order(
        vars: &[(&str, &str)],
        app: &[(SettingKey, &str)],
        global: &[(SettingKey, &str)],
        value: &str,
        tier: Tier,
    ) {
        let builtins = builtins();
        let app = defaults(app);
        let global = defaults(global);
        let resolver = Resolver::new(env(vars), &builtins)
            .with_app(&app)
            .with_global(&global);

        let result = resolver.resolve(SettingKey::Ram).unwrap();
        assert_eq!(result.value, value);
        assert_eq!(result.tier, tier);
    }

    #[test]
    fn optional_key_without_builtin_resolves_empty() -> anyhow::Result<()> {
        let builtins = builtins();
        let resolved = Resolver::new(env(&[]), &builtins).resolve_all()?;
        assert_eq!(resolved.optional(SettingKey::Vlan), None);
        assert_eq!(resolved.get(SettingKey::Vlan).tier, Tier::BuiltIn);
        Ok(())
    }

    #[test]
    fn bad_override_is_an_error() {
        let builtins = builtins();
        let resolver = Resolver::new(env(&[("var_cpu", "many")]), &builtins);
        let result = resolver.resolve_all();
        assert!(matches!(result, Err(ResolveError::InvalidOverride { .. })));
    }

    #[test]
    fn saved_settings_resolve_back() -> anyhow::Result<()> {
        let builtins = builtins();
        let global = defaults(&[(SettingKey::Bridge, "vmbr2")]);
        let first = Resolver::new(env(&[("var_cpu", "6")]), &builtins)
            .with_global(&global)
            .resolve_all()?;

        let saved = first.to_defaults()?;
        let second = Resolver::new(env(&[]), &builtins)
            .with_app(&saved)
            .resolve_all()?;

        for setting in first.iter().filter(|setting| setting.key.is_persistable()) {
            assert_eq!(second.value(setting.key), setting.value);
        }

        Ok(())
    }

    #[test]
    fn wizard_values_are_marked() -> anyhow::Result<()> {
        let builtins = builtins();
        let mut resolved = Resolver::new(env(&[]), &builtins).resolve_all()?;
        resolved.set_from_wizard(SettingKey::Cpu, "3")?;
        assert_eq!(resolved.get(SettingKey::Cpu).tier, Tier::Wizard);
        assert!(resolved.set_from_wizard(SettingKey::Cpu, "x").is_err());
        Ok(())
    }

    #[test]
    fn verbose_from_saved_defaults() -> anyhow::Result<()> {
        let builtins = builtins();
        let quiet = Resolver::new(env(&[]), &builtins).resolve_all()?;
        assert!(!quiet.is_verbose());

        let global = defaults(&[(SettingKey::Verbose, "yes")]);
        let loud = Resolver::new(env(&[]), &builtins)
            .with_global(&global)
            .resolve_all()?;
        assert!(loud.is_verbose());

        Ok(())
    }

    #[sealed_test(env = [("var_brg", "vmbr9")])]
    fn process_environment_is_consulted() -> anyhow::Result<()> {
        let builtins = BuiltinDefaults::standard();
        let resolver = Resolver::new(ProcessEnv, &builtins);
        assert!(resolver.is_overridden(SettingKey::Bridge));
        assert_eq!(resolver.resolve(SettingKey::Bridge)?.value, "vmbr9");
        Ok(())
    }
}
