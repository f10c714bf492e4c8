// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Host prechecks run before any guest is created.
//!
//! Each check fails with the exit code of the exit code table that names the
//! problem, so an operator or calling automation knows what to fix without
//! reading `pct` output.

use crate::{
    config::SettingKey,
    provision::{ProvisionError, Provisioner, Result},
};

use tracing::{debug, info, instrument};

/// Lowest guest id Proxmox VE accepts.
pub const MIN_GUEST_ID: u32 = 100;

/// Check guest id is valid and free, and that the cluster is quorate.
///
/// # Errors
///
/// - Return exit code 205 if id is below [`MIN_GUEST_ID`].
/// - Return exit code 210 if cluster is not quorate.
/// - Return exit code 206 if id is already in use.
#[instrument(skip(provisioner), level = "debug")]
pub fn check_id(provisioner: &impl Provisioner, id: u32) -> Result<()> {
    if id < MIN_GUEST_ID {
        return Err(ProvisionError::failed(
            205,
            format!("guest id {id} is below {MIN_GUEST_ID}"),
        ));
    }

    if !provisioner.is_quorate()? {
        return Err(ProvisionError::failed(210, "cluster is not quorate"));
    }

    if provisioner.id_in_use(id)? {
        return Err(ProvisionError::failed(206, format!("guest id {id} is already in use")));
    }

    Ok(())
}

/// Check hostname is a valid RFC 1123 host name.
///
/// Hostnames that fall back to the application name never went through
/// setting validation, so they are checked again here.
///
/// # Errors
///
/// - Return exit code 208 if hostname is not a valid label.
pub fn check_hostname(hostname: &str) -> Result<()> {
    SettingKey::Hostname
        .validate(hostname)
        .map_err(|err| ProvisionError::failed(208, err.to_string()))?;
    if hostname.is_empty() {
        return Err(ProvisionError::failed(208, "hostname cannot be empty"));
    }

    Ok(())
}

/// Check storage accepts content and has room for disk.
///
/// # Errors
///
/// - Return exit code 217 if storage does not list content type or is
///   inactive.
/// - Return exit code 214 if storage has less than `disk_gib` available.
#[instrument(skip(provisioner), level = "debug")]
pub fn check_storage(
    provisioner: &impl Provisioner,
    storage: &str,
    content: &str,
    disk_gib: u32,
) -> Result<()> {
    let status = provisioner
        .storage_status(storage, content)?
        .filter(|status| status.active)
        .ok_or_else(|| {
            ProvisionError::failed(
                217,
                format!("storage {storage:?} is not an active storage for {content}"),
            )
        })?;

    let needed_kib = u64::from(disk_gib) * 1024 * 1024;
    debug!(
        "storage {storage:?} has {} KiB available, need {needed_kib} KiB",
        status.available_kib
    );
    if status.available_kib < needed_kib {
        return Err(ProvisionError::failed(
            214,
            format!(
                "storage {storage:?} has {} GiB free, need {disk_gib} GiB",
                status.available_kib / 1024 / 1024
            ),
        ));
    }

    Ok(())
}

/// Find container template for OS and version, downloading it if needed.
///
/// Templates are matched by their `<os>-<version>` prefix. When several
/// match, the one that sorts last is taken, which is the newest build.
///
/// # Errors
///
/// - Return exit code 220 if no template matches.
/// - Return exit code 222 if download fails.
/// - Return exit code 223 if template is still missing after download.
#[instrument(skip(provisioner), level = "debug")]
pub fn resolve_template(
    provisioner: &impl Provisioner,
    storage: &str,
    os: &str,
    version: &str,
) -> Result<String> {
    let prefix = format!("{os}-{version}");
    if let Some(template) = newest(provisioner.local_templates(storage)?, &prefix) {
        debug!("use local template {template}");
        return Ok(template);
    }

    let template = newest(provisioner.available_templates()?, &prefix).ok_or_else(|| {
        ProvisionError::failed(220, format!("no template available for {os} {version}"))
    })?;

    info!("download template {template} to {storage}");
    provisioner.download_template(storage, &template)?;

    if !provisioner
        .local_templates(storage)?
        .iter()
        .any(|local| local == &template)
    {
        return Err(ProvisionError::failed(
            223,
            format!("template {template} missing from {storage} after download"),
        ));
    }

    Ok(template)
}

fn newest(templates: Vec<String>, prefix: &str) -> Option<String> {
    let mut matching = templates
        .into_iter()
        .filter(|template| {
            template
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.starts_with(['-', '.', '_']))
        })
        .collect::<Vec<_>>();
    matching.sort();
    matching.pop()
}
