// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use proxforge::{
    config::{AppManifest, BuiltinDefaults, SettingKey},
    exit::{ExitCategory, EXIT_CODES},
    path::default_defaults_dir,
    provision::ProvisionError,
    resolve::{Resolver, Tier},
    store::{Defaults, DefaultsStore, Scope},
    trap::{ErrorTrap, Failure},
};

use anyhow::Result;
use indoc::indoc;
use pretty_assertions::assert_eq;
use sealed_test::prelude::*;
use std::collections::HashMap;

fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect()
}

fn manifest() -> Result<AppManifest> {
    let manifest = indoc! {r#"
        [app]
        name = "jellyfin"
        kind = "lxc"

        [defaults]
        var_ram = 1024
        var_disk = 10
    "#}
    .parse()?;

    Ok(manifest)
}

#[sealed_test(env = [("PROXFORGE_DEFAULTS_DIR", "defaults")])]
fn ram_from_environment_beats_saved_files() -> Result<()> {
    let store = DefaultsStore::open(default_defaults_dir()?)?;
    let mut app = Defaults::new();
    app.set(SettingKey::Ram, "2048")?;
    store.replace(&Scope::App("jellyfin".into()), app)?;
    let mut global = Defaults::new();
    global.set(SettingKey::Ram, "4096")?;
    store.replace(&Scope::Global, global)?;

    let builtins = BuiltinDefaults::load(Some(&manifest()?))?;
    let app = store.load(&Scope::App("jellyfin".into()))?;
    let global = store.load(&Scope::Global)?;
    let resolver = Resolver::new(env(&[("var_ram", "8192")]), &builtins)
        .with_app(&app.defaults)
        .with_global(&global.defaults);

    let result = resolver.resolve(SettingKey::Ram)?;
    assert_eq!(result.value, "8192");
    assert_eq!(result.tier, Tier::Environment);

    Ok(())
}

#[sealed_test(env = [("PROXFORGE_DEFAULTS_DIR", "defaults")])]
fn disk_from_global_file_without_app_file() -> Result<()> {
    let store = DefaultsStore::open(default_defaults_dir()?)?;
    let mut global = Defaults::new();
    global.set(SettingKey::Disk, "50")?;
    store.replace(&Scope::Global, global)?;

    let builtins = BuiltinDefaults::load(Some(&manifest()?))?;
    let app = store.load(&Scope::App("jellyfin".into()))?;
    let global = store.load(&Scope::Global)?;
    assert!(!app.exists());

    let resolved = Resolver::new(env(&[]), &builtins)
        .with_app(&app.defaults)
        .with_global(&global.defaults)
        .resolve_all()?;
    assert_eq!(resolved.value(SettingKey::Disk), "50");
    assert_eq!(resolved.get(SettingKey::Disk).tier, Tier::Global);
    assert_eq!(resolved.value(SettingKey::Ram), "1024");
    assert_eq!(resolved.get(SettingKey::Ram).tier, Tier::BuiltIn);

    Ok(())
}

#[sealed_test(env = [("PROXFORGE_DEFAULTS_DIR", "defaults")])]
fn saved_settings_come_back() -> Result<()> {
    let store = DefaultsStore::open(default_defaults_dir()?)?;
    let builtins = BuiltinDefaults::standard();
    let mut resolved = Resolver::new(env(&[("var_cpu", "4")]), &builtins).resolve_all()?;
    resolved.set_from_wizard(SettingKey::Tags, "media;arr")?;
    resolved.set_from_wizard(SettingKey::SshAuthorizedKey, "ssh-ed25519 AAAAC3Nza ops@example")?;
    resolved.set_from_wizard(SettingKey::Password, "hunter2")?;

    let scope = Scope::App("jellyfin".into());
    let saved = store.replace(&scope, resolved.to_defaults()?)?;
    assert_eq!(saved.defaults.revision(), 1);
    assert_eq!(saved.defaults.get(SettingKey::Password), None);

    let app = store.load(&scope)?;
    let again = Resolver::new(env(&[]), &builtins)
        .with_app(&app.defaults)
        .resolve_all()?;
    for setting in resolved.iter().filter(|setting| setting.key.is_persistable()) {
        assert_eq!(again.value(setting.key), setting.value);
    }
    assert_eq!(again.value(SettingKey::Password), "");

    Ok(())
}

#[sealed_test(env = [("PROXFORGE_DEFAULTS_DIR", "defaults")])]
fn hand_edited_file_keeps_valid_lines() -> Result<()> {
    let store = DefaultsStore::open(default_defaults_dir()?)?;
    let path = store.path_of(&Scope::Global)?;
    std::fs::write(
        &path,
        indoc! {r#"
            # revision: 7
            var_cpu=2
            var_cpu_count=9
            var_ram=lots
            not a setting
            var_brg="vmbr1"
        "#},
    )?;

    let mut file = store.load(&Scope::Global)?;
    let entries = file.defaults.iter().collect::<Vec<_>>();
    assert_eq!(
        entries,
        vec![(SettingKey::Cpu, "2"), (SettingKey::Bridge, "vmbr1")]
    );

    store.save(&mut file)?;
    let content = std::fs::read_to_string(&path)?;
    assert!(content.contains("# revision: 8"));
    assert!(!content.contains("lots"));

    Ok(())
}

#[sealed_test(env = [("PROXFORGE_DEFAULTS_DIR", "defaults")])]
fn list_and_remove_app_defaults() -> Result<()> {
    let store = DefaultsStore::open(default_defaults_dir()?)?;
    let mut defaults = Defaults::new();
    defaults.set(SettingKey::Cpu, "2")?;
    store.replace(&Scope::App("sonarr".into()), defaults.clone())?;
    store.replace(&Scope::App("jellyfin".into()), defaults)?;

    assert_eq!(store.list_apps()?, vec!["jellyfin", "sonarr"]);
    assert!(store.remove(&Scope::App("sonarr".into()))?);
    assert!(!store.remove(&Scope::App("sonarr".into()))?);
    assert_eq!(store.list_apps()?, vec!["jellyfin"]);

    Ok(())
}

#[test]
fn failed_command_with_206_is_reported() {
    let trap = ErrorTrap::arm();
    trap.command_log().record("pct create 100 local:vztmpl/debian-12.tar.zst");
    let failure = Failure::from(ProvisionError::Command {
        command: "pct create 100 local:vztmpl/debian-12.tar.zst".into(),
        code: 206,
        stderr: "unable to create CT 100 - CT 100 already exists on node 'pve'".into(),
    });

    let diagnosis = trap.fire(&failure);
    assert_eq!(diagnosis.code, 206);
    assert_eq!(diagnosis.description, "CTID already in use");
    assert!(diagnosis.to_string().contains("hint:"));
}

#[test]
fn table_entries_match_their_range() {
    for entry in EXIT_CODES {
        let expect = match entry.code {
            1..=99 => ExitCategory::Generic,
            100..=199 => ExitCategory::Package,
            _ => ExitCategory::Proxmox,
        };
        assert_eq!(ExitCategory::of(entry.code), expect, "code {}", entry.code);
    }
}
