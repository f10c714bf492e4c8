// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! Specify the closed set of setting keys proxforge understands, the kind of
//! value each key accepts, and the built-in defaults every resolution falls
//! back to. Built-in defaults can be overlaid by an __app manifest__, a small
//! TOML file that names an application and the defaults it prefers.
//!
//! # Setting Keys
//!
//! Every key has one canonical name, e.g., `var_cpu`. That name is used as
//! the environment variable that overrides the key, and as the key written
//! into defaults files. Keeping one name for both places means an operator
//! can copy a line out of a defaults file and export it as-is.
//!
//! # App Manifest Layout
//!
//! ```toml
//! [app]
//! name = "vaultwarden"
//! kind = "lxc"
//! description = "Bitwarden compatible password manager"
//!
//! [defaults]
//! var_cpu = 1
//! var_ram = 1024
//! var_tags = "password;security"
//! ```
//!
//! File I/O is left to the caller to figure out.

use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    net::Ipv4Addr,
    str::FromStr,
};

/// Configuration key understood by proxforge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SettingKey {
    Ctid,
    Hostname,
    Password,
    Cpu,
    Ram,
    Disk,
    Os,
    Version,
    Unprivileged,
    Bridge,
    Net,
    Gateway,
    Vlan,
    Mtu,
    Mac,
    ContainerStorage,
    TemplateStorage,
    Ssh,
    SshAuthorizedKey,
    Tags,
    Verbose,
}

impl SettingKey {
    /// Every key, in resolution and serialization order.
    pub const ALL: [SettingKey; 21] = [
        Self::Ctid,
        Self::Hostname,
        Self::Password,
        Self::Cpu,
        Self::Ram,
        Self::Disk,
        Self::Os,
        Self::Version,
        Self::Unprivileged,
        Self::Bridge,
        Self::Net,
        Self::Gateway,
        Self::Vlan,
        Self::Mtu,
        Self::Mac,
        Self::ContainerStorage,
        Self::TemplateStorage,
        Self::Ssh,
        Self::SshAuthorizedKey,
        Self::Tags,
        Self::Verbose,
    ];

    /// Canonical name used for environment variables and defaults files.
    pub fn name(self) -> &'static str {
        match self {
            Self::Ctid => "var_ctid",
            Self::Hostname => "var_hostname",
            Self::Password => "var_pw",
            Self::Cpu => "var_cpu",
            Self::Ram => "var_ram",
            Self::Disk => "var_disk",
            Self::Os => "var_os",
            Self::Version => "var_version",
            Self::Unprivileged => "var_unprivileged",
            Self::Bridge => "var_brg",
            Self::Net => "var_net",
            Self::Gateway => "var_gateway",
            Self::Vlan => "var_vlan",
            Self::Mtu => "var_mtu",
            Self::Mac => "var_mac",
            Self::ContainerStorage => "var_container_storage",
            Self::TemplateStorage => "var_template_storage",
            Self::Ssh => "var_ssh",
            Self::SshAuthorizedKey => "var_ssh_authorized_key",
            Self::Tags => "var_tags",
            Self::Verbose => "var_verbose",
        }
    }

    /// Short human readable label for prompts and summaries.
    pub fn label(self) -> &'static str {
        match self {
            Self::Ctid => "Container/VM ID",
            Self::Hostname => "Hostname",
            Self::Password => "Root password",
            Self::Cpu => "CPU cores",
            Self::Ram => "RAM (MiB)",
            Self::Disk => "Disk size (GiB)",
            Self::Os => "Operating system",
            Self::Version => "OS version",
            Self::Unprivileged => "Unprivileged container (1/0)",
            Self::Bridge => "Network bridge",
            Self::Net => "IPv4 address (dhcp or CIDR)",
            Self::Gateway => "IPv4 gateway",
            Self::Vlan => "VLAN tag",
            Self::Mtu => "Interface MTU",
            Self::Mac => "MAC address",
            Self::ContainerStorage => "Container storage",
            Self::TemplateStorage => "Template storage",
            Self::Ssh => "Enable root SSH access (yes/no)",
            Self::SshAuthorizedKey => "SSH authorized key",
            Self::Tags => "Tags",
            Self::Verbose => "Verbose output (yes/no)",
        }
    }

    /// Kind of value this key accepts.
    pub fn kind(self) -> ValueKind {
        match self {
            Self::Ctid => ValueKind::Integer { min: 1, max: 999_999_999 },
            Self::Hostname => ValueKind::Hostname,
            Self::Password => ValueKind::Password,
            Self::Cpu => ValueKind::Integer { min: 1, max: 512 },
            Self::Ram => ValueKind::Integer { min: 128, max: 4_194_304 },
            Self::Disk => ValueKind::Integer { min: 1, max: 131_072 },
            Self::Os => ValueKind::Choice(&[
                "almalinux",
                "alpine",
                "archlinux",
                "centos",
                "debian",
                "devuan",
                "fedora",
                "opensuse",
                "rockylinux",
                "ubuntu",
            ]),
            Self::Version => ValueKind::Text,
            Self::Unprivileged => ValueKind::Choice(&["0", "1"]),
            Self::Bridge | Self::ContainerStorage | Self::TemplateStorage => ValueKind::Identifier,
            Self::Net => ValueKind::Network,
            Self::Gateway => ValueKind::Ipv4,
            Self::Vlan => ValueKind::Integer { min: 1, max: 4094 },
            Self::Mtu => ValueKind::Integer { min: 576, max: 65_520 },
            Self::Mac => ValueKind::Mac,
            Self::Ssh | Self::Verbose => ValueKind::Choice(&["yes", "no"]),
            Self::SshAuthorizedKey => ValueKind::Text,
            Self::Tags => ValueKind::Tags,
        }
    }

    /// Key must resolve to a non-empty value.
    pub fn is_required(self) -> bool {
        !matches!(
            self,
            Self::Ctid
                | Self::Hostname
                | Self::Password
                | Self::Gateway
                | Self::Vlan
                | Self::Mtu
                | Self::Mac
                | Self::SshAuthorizedKey
                | Self::Tags
        )
    }

    /// Key may be written into a defaults file.
    ///
    /// Identifiers and secrets are unique to one guest, so they never become
    /// anybody's default.
    pub fn is_persistable(self) -> bool {
        !matches!(self, Self::Ctid | Self::Hostname | Self::Password)
    }

    /// Key holds secret material that must never be echoed back.
    pub fn is_secret(self) -> bool {
        matches!(self, Self::Password)
    }

    /// Check that a value is acceptable for this key.
    ///
    /// Empty values are accepted for optional keys only.
    ///
    /// # Errors
    ///
    /// - Return [`InvalidValue`] if value does not fit key's kind.
    pub fn validate(self, value: &str) -> Result<(), InvalidValue> {
        if value.is_empty() {
            if self.is_required() {
                return Err(InvalidValue::new(self, value, "value cannot be empty"));
            }
            return Ok(());
        }

        self.kind()
            .check(value)
            .map_err(|reason| InvalidValue::new(self, value, reason))
    }
}

impl Display for SettingKey {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(self.name())
    }
}

impl FromStr for SettingKey {
    type Err = ConfigError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|key| key.name() == name)
            .ok_or_else(|| ConfigError::UnknownKey(name.into()))
    }
}

/// Kind of value a setting key accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    /// Decimal integer in inclusive range.
    Integer { min: u64, max: u64 },

    /// One of a fixed set of words.
    Choice(&'static [&'static str]),

    /// Free text on a single line.
    Text,

    /// Storage or bridge name.
    Identifier,

    /// RFC 1123 host name.
    Hostname,

    /// Either "dhcp" or an IPv4 address in CIDR notation.
    Network,

    /// Plain IPv4 address.
    Ipv4,

    /// Colon separated MAC address.
    Mac,

    /// Semicolon or comma separated list of tags.
    Tags,

    /// Root password handed to the Proxmox CLI.
    Password,
}

impl ValueKind {
    fn check(self, value: &str) -> Result<(), String> {
        match self {
            Self::Integer { min, max } => {
                let number: u64 = value
                    .parse()
                    .map_err(|_| "expected a whole number".to_string())?;
                if !(min..=max).contains(&number) {
                    return Err(format!("expected a number between {min} and {max}"));
                }
                Ok(())
            }
            Self::Choice(choices) => {
                if choices.contains(&value) {
                    Ok(())
                } else {
                    Err(format!("expected one of {}", choices.join(", ")))
                }
            }
            Self::Text => {
                if value.contains(['\n', '\r']) {
                    Err("value must fit on one line".into())
                } else {
                    Ok(())
                }
            }
            Self::Identifier => {
                if is_identifier(value) {
                    Ok(())
                } else {
                    Err("expected letters, digits, '.', '_' or '-'".into())
                }
            }
            Self::Hostname => {
                if is_hostname(value) {
                    Ok(())
                } else {
                    Err("expected RFC 1123 host name".into())
                }
            }
            Self::Network => {
                if value == "dhcp" || is_ipv4_cidr(value) {
                    Ok(())
                } else {
                    Err("expected \"dhcp\" or IPv4 address in CIDR notation".into())
                }
            }
            Self::Ipv4 => value
                .parse::<Ipv4Addr>()
                .map(|_| ())
                .map_err(|_| "expected IPv4 address".into()),
            Self::Mac => {
                if is_mac(value) {
                    Ok(())
                } else {
                    Err("expected MAC address like 02:00:00:aa:bb:cc".into())
                }
            }
            Self::Tags => {
                if value
                    .split([';', ','])
                    .filter(|tag| !tag.is_empty())
                    .all(is_identifier)
                {
                    Ok(())
                } else {
                    Err("expected tags separated by ';'".into())
                }
            }
            Self::Password => {
                if value.len() < 5 {
                    Err("password needs at least 5 characters".into())
                } else if value.starts_with('-') {
                    Err("password cannot start with '-'".into())
                } else if value.chars().any(char::is_whitespace) {
                    Err("password cannot contain whitespace".into())
                } else {
                    Ok(())
                }
            }
        }
    }
}

fn is_identifier(value: &str) -> bool {
    let mut chars = value.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphanumeric())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

fn is_hostname(value: &str) -> bool {
    value.len() <= 253
        && value.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
}

fn is_ipv4_cidr(value: &str) -> bool {
    let Some((addr, prefix)) = value.split_once('/') else {
        return false;
    };

    addr.parse::<Ipv4Addr>().is_ok()
        && prefix
            .parse::<u8>()
            .is_ok_and(|prefix| (1..=32).contains(&prefix))
}

fn is_mac(value: &str) -> bool {
    let octets = value.split(':').collect::<Vec<_>>();
    octets.len() == 6
        && octets
            .iter()
            .all(|octet| octet.len() == 2 && octet.chars().all(|c| c.is_ascii_hexdigit()))
}

/// Value rejected by a setting key.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("invalid value {value:?} for {key}: {reason}")]
pub struct InvalidValue {
    pub key: SettingKey,
    pub value: String,
    pub reason: String,
}

impl InvalidValue {
    fn new(key: SettingKey, value: &str, reason: impl Into<String>) -> Self {
        // INVARIANT: Never echo secrets back to the terminal or the logs.
        let value = if key.is_secret() {
            "********".into()
        } else {
            value.into()
        };

        Self {
            key,
            value,
            reason: reason.into(),
        }
    }
}

/// Built-in defaults, the last precedence tier.
///
/// # Invariant
///
/// - Every required key has a valid, non-empty value.
/// - Every present optional key has a valid value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltinDefaults {
    values: BTreeMap<SettingKey, String>,
}

impl BuiltinDefaults {
    /// Compiled-in defaults suitable for a small Debian container.
    pub fn standard() -> Self {
        let values = [
            (SettingKey::Cpu, "1"),
            (SettingKey::Ram, "512"),
            (SettingKey::Disk, "2"),
            (SettingKey::Os, "debian"),
            (SettingKey::Version, "12"),
            (SettingKey::Unprivileged, "1"),
            (SettingKey::Bridge, "vmbr0"),
            (SettingKey::Net, "dhcp"),
            (SettingKey::ContainerStorage, "local-lvm"),
            (SettingKey::TemplateStorage, "local"),
            (SettingKey::Ssh, "no"),
            (SettingKey::Tags, "proxforge"),
            (SettingKey::Verbose, "no"),
        ]
        .into_iter()
        .map(|(key, value)| (key, value.to_string()))
        .collect();

        Self { values }
    }

    /// Construct built-in defaults from explicit pairs.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::InvalidValue`] if any value is rejected.
    /// - Return [`ConfigError::MissingBuiltin`] if a required key is absent.
    pub fn try_from_pairs(
        pairs: impl IntoIterator<Item = (SettingKey, impl Into<String>)>,
    ) -> Result<Self> {
        let values = pairs
            .into_iter()
            .map(|(key, value)| (key, value.into()))
            .collect();
        let defaults = Self { values };
        defaults.validate()?;

        Ok(defaults)
    }

    /// Load built-in defaults, overlaid by an optional app manifest.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError`] if the merged table breaks its invariant.
    pub fn load(manifest: Option<&AppManifest>) -> Result<Self> {
        let mut defaults = Self::standard();
        if let Some(manifest) = manifest {
            for (key, value) in manifest.defaults()? {
                defaults.values.insert(key, value);
            }
        }
        defaults.validate()?;

        Ok(defaults)
    }

    /// Get built-in value for key, if any.
    pub fn get(&self, key: SettingKey) -> Option<&str> {
        self.values.get(&key).map(String::as_str)
    }

    /// Check table invariant.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::InvalidValue`] if any value is rejected.
    /// - Return [`ConfigError::MissingBuiltin`] if a required key is absent.
    pub fn validate(&self) -> Result<()> {
        for key in SettingKey::ALL {
            match self.values.get(&key) {
                Some(value) => key.validate(value)?,
                None if key.is_required() => return Err(ConfigError::MissingBuiltin(key)),
                None => {}
            }
        }

        Ok(())
    }
}

/// Per-application manifest.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct AppManifest {
    /// Identity of the application.
    pub app: AppSection,

    /// Built-in defaults preferred by the application.
    #[serde(default)]
    pub defaults: BTreeMap<String, ManifestValue>,
}

impl AppManifest {
    /// Minimal manifest for an application without its own file.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            app: AppSection {
                name: name.into(),
                kind: GuestKind::default(),
                description: None,
            },
            defaults: BTreeMap::new(),
        }
    }

    /// Typed view of manifest defaults.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::UnknownKey`] for keys proxforge does not know.
    /// - Return [`ConfigError::InvalidValue`] for rejected values.
    pub fn defaults(&self) -> Result<Vec<(SettingKey, String)>> {
        self.defaults
            .iter()
            .map(|(name, value)| -> Result<(SettingKey, String)> {
                let key: SettingKey = name.parse()?;
                let value = value.to_string();
                key.validate(&value)?;
                Ok((key, value))
            })
            .collect()
    }
}

impl FromStr for AppManifest {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut manifest: AppManifest =
            toml::de::from_str(data).map_err(ConfigError::Deserialize)?;

        // INVARIANT: Perform shell expansion on textual default values.
        for value in manifest.defaults.values_mut() {
            if let ManifestValue::Text(text) = value {
                *text = shellexpand::full(text.as_str())
                    .map_err(ConfigError::ShellExpansion)?
                    .into_owned();
            }
        }

        // INVARIANT: Reject bad defaults at load time, not mid-provisioning.
        let _ = manifest.defaults()?;

        Ok(manifest)
    }
}

impl Display for AppManifest {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

/// Identity section of an app manifest.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct AppSection {
    /// Name of the application, also the name of its defaults file.
    pub name: String,

    /// Kind of guest to provision.
    #[serde(default)]
    pub kind: GuestKind,

    /// Brief description of the application.
    pub description: Option<String>,
}

/// Manifest default value.
///
/// TOML lets authors write `var_cpu = 2` instead of `var_cpu = "2"`.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ManifestValue {
    Number(i64),
    Text(String),
}

impl Display for ManifestValue {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Number(number) => write!(fmt, "{number}"),
            Self::Text(text) => fmt.write_str(text),
        }
    }
}

/// Kind of guest to provision.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum GuestKind {
    /// LXC container managed through `pct`.
    #[default]
    #[serde(rename = "lxc")]
    Container,

    /// QEMU/KVM virtual machine managed through `qm`.
    #[serde(rename = "vm")]
    VirtualMachine,
}

impl Display for GuestKind {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Container => fmt.write_str("lxc"),
            Self::VirtualMachine => fmt.write_str("vm"),
        }
    }
}

impl FromStr for GuestKind {
    type Err = ConfigError;

    fn from_str(kind: &str) -> Result<Self, Self::Err> {
        match kind {
            "lxc" | "ct" | "container" => Ok(Self::Container),
            "vm" | "qemu" => Ok(Self::VirtualMachine),
            other => Err(ConfigError::UnknownGuestKind(other.into())),
        }
    }
}

/// Configuration error types.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to deserialize configuration.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to serialize configuration.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Failed to perform shell expansion on configuration.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),

    /// Key is not a known setting.
    #[error("unknown setting key {0:?}")]
    UnknownKey(String),

    /// Guest kind is neither container nor virtual machine.
    #[error("unknown guest kind {0:?}, expected \"lxc\" or \"vm\"")]
    UnknownGuestKind(String),

    /// Value rejected by its key.
    #[error(transparent)]
    InvalidValue(#[from] InvalidValue),

    /// Required key has no built-in default.
    #[error("required setting {0} has no built-in default")]
    MissingBuiltin(SettingKey),
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use sealed_test::prelude::*;
    use simple_test_case::test_case;

    #[test_case(SettingKey::Cpu, "4"; "cpu count")]
    #[test_case(SettingKey::Net, "dhcp"; "dhcp network")]
    #[test_case(SettingKey::Net, "10.0.0.5/24"; "static network")]
    #[test_case(SettingKey::Gateway, ""; "empty optional gateway")]
    #[test_case(SettingKey::Mac, "02:00:00:AA:bb:01"; "mixed case mac")]
    #[test_case(SettingKey::Hostname, "home-assistant.lan"; "dotted hostname")]
    #[test_case(SettingKey::Tags, "media;arr"; "tag list")]
    #[test]
    fn accepts_valid_value(key: SettingKey, value: &str) {
        assert_eq!(key.validate(value), Ok(()));
    }

    #[test_case(SettingKey::Cpu, ""; "empty required cpu")]
    #[test_case(SettingKey::Cpu, "0"; "zero cpu")]
    #[test_case(SettingKey::Ram, "lots"; "non numeric ram")]
    #[test_case(SettingKey::Net, "10.0.0.5"; "address without prefix")]
    #[test_case(SettingKey::Net, "10.0.0.5/33"; "prefix too long")]
    #[test_case(SettingKey::Vlan, "4095"; "vlan out of range")]
    #[test_case(SettingKey::Hostname, "-bad"; "leading hyphen")]
    #[test_case(SettingKey::Os, "windows"; "unsupported os")]
    #[test_case(SettingKey::Mac, "02:00:00:aa:bb"; "short mac")]
    #[test]
    fn rejects_invalid_value(key: SettingKey, value: &str) {
        assert!(key.validate(value).is_err());
    }

    #[test]
    fn invalid_password_is_masked() {
        let error = SettingKey::Password.validate("-secret").unwrap_err();
        assert_eq!(error.value, "********");
    }

    #[test]
    fn setting_key_names_round_trip() -> anyhow::Result<()> {
        for key in SettingKey::ALL {
            assert_eq!(key.name().parse::<SettingKey>()?, key);
        }
        assert!("var_nope".parse::<SettingKey>().is_err());
        Ok(())
    }

    #[test]
    fn standard_builtins_hold_invariant() -> anyhow::Result<()> {
        BuiltinDefaults::standard().validate()?;
        Ok(())
    }

    #[test]
    fn missing_required_builtin_is_load_error() {
        let result = BuiltinDefaults::try_from_pairs([(SettingKey::Cpu, "2")]);
        assert!(matches!(result, Err(ConfigError::MissingBuiltin(_))));
    }

    #[sealed_test(env = [("APP_TAGS", "media;arr")])]
    fn deserialize_app_manifest() -> anyhow::Result<()> {
        let result: AppManifest = r#"
            [app]
            name = "jellyfin"
            kind = "lxc"
            description = "media server"

            [defaults]
            var_cpu = 2
            var_ram = 2048
            var_tags = "$APP_TAGS"
        "#
        .parse()?;

        let expect = AppManifest {
            app: AppSection {
                name: "jellyfin".into(),
                kind: GuestKind::Container,
                description: Some("media server".into()),
            },
            defaults: BTreeMap::from([
                ("var_cpu".into(), ManifestValue::Number(2)),
                ("var_ram".into(), ManifestValue::Number(2048)),
                ("var_tags".into(), ManifestValue::Text("media;arr".into())),
            ]),
        };

        assert_eq!(result, expect);

        Ok(())
    }

    #[test]
    fn manifest_rejects_unknown_key() {
        let result = indoc! {r#"
            [app]
            name = "jellyfin"

            [defaults]
            var_gpu = 1
        "#}
        .parse::<AppManifest>();

        assert!(matches!(result, Err(ConfigError::UnknownKey(_))));
    }

    #[test]
    fn serialize_app_manifest() {
        let mut manifest = AppManifest::named("haos");
        manifest.app.kind = GuestKind::VirtualMachine;
        manifest
            .defaults
            .insert("var_disk".into(), ManifestValue::Number(32));

        let expect = indoc! {r#"
            [app]
            name = "haos"
            kind = "vm"

            [defaults]
            var_disk = 32
        "#};

        assert_eq!(manifest.to_string(), expect);
    }

    #[test]
    fn manifest_overlays_standard_builtins() -> anyhow::Result<()> {
        let manifest: AppManifest = indoc! {r#"
            [app]
            name = "jellyfin"

            [defaults]
            var_ram = 4096
        "#}
        .parse()?;

        let defaults = BuiltinDefaults::load(Some(&manifest))?;
        assert_eq!(defaults.get(SettingKey::Ram), Some("4096"));
        assert_eq!(defaults.get(SettingKey::Cpu), Some("1"));

        Ok(())
    }
}
