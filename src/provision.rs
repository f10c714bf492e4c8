// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Guest provisioning.
//!
//! Proxforge does not manage containers or virtual machines by itself. It
//! drives the Proxmox VE command line tools, which are treated as an opaque
//! external service addressed by numeric guest id:
//!
//! - `pct` creates, starts and executes commands in LXC containers.
//! - `qm` creates and starts virtual machines, and talks to the QEMU guest
//!   agent, the __guest command channel__ used to learn a VM's addresses
//!   without going through the network.
//! - `pveam` lists and downloads container templates.
//! - `pvesm` and `pvesh` report storage and cluster state.
//!
//! The [`Provisioner`] trait is the seam between proxforge and those tools.
//! [`pve::PveCli`] is the production implementation. Every call it makes runs
//! through a [`CommandRunner`], which records the command line so that a
//! failure report can name the last command executed.
//!
//! # Provisioning Flow
//!
//! 1. Prechecks: hostname, guest id, storage, template (see [`checks`]).
//! 2. Create the guest.
//! 3. Start the guest.
//! 4. Ask the guest for its IPv4 addresses, once, without retrying.

pub mod checks;
pub mod guest;
pub mod pve;

use crate::{
    config::{GuestKind, SettingKey},
    resolve::{ResolveError, ResolvedSettings},
};

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    io::ErrorKind,
    net::Ipv4Addr,
    process::Command,
    sync::{Arc, Mutex},
};
use tracing::{debug, info, instrument, warn};

/// Captured result of an external command.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, or 128 + signal number if the command was killed.
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Check if command exited successfully.
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// Layer of indirection for running external commands.
pub trait CommandRunner {
    /// Run program with arguments to completion, capturing its output.
    ///
    /// # Errors
    ///
    /// - Return [`std::io::Error`] if the program cannot be spawned.
    fn run(&self, program: &str, args: &[String]) -> std::io::Result<CommandOutput>;
}

/// Shared record of the last command handed to a runner.
#[derive(Debug, Default, Clone)]
pub struct CommandLog {
    last: Arc<Mutex<Option<String>>>,
}

impl CommandLog {
    /// Construct new empty command log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record command line as the last one executed.
    pub fn record(&self, command: impl Into<String>) {
        if let Ok(mut last) = self.last.lock() {
            *last = Some(command.into());
        }
    }

    /// Last command line recorded, if any.
    pub fn last(&self) -> Option<String> {
        self.last.lock().ok().and_then(|last| last.clone())
    }
}

/// Run commands as child processes of proxforge.
#[derive(Debug, Default, Clone)]
pub struct SystemRunner {
    log: CommandLog,
}

impl SystemRunner {
    /// Construct new runner that records into command log.
    pub fn new(log: CommandLog) -> Self {
        Self { log }
    }
}

impl CommandRunner for SystemRunner {
    #[instrument(skip(self, args), level = "debug")]
    fn run(&self, program: &str, args: &[String]) -> std::io::Result<CommandOutput> {
        let line = render_command(program, args);
        debug!("run {line}");
        self.log.record(line);

        let output = Command::new(program).args(args).output()?;
        let code = match output.status.code() {
            Some(code) => code,
            None => signal_code(&output.status),
        };

        Ok(CommandOutput {
            code,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[cfg(unix)]
fn signal_code(status: &std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;

    status.signal().map(|signal| 128 + signal).unwrap_or(1)
}

#[cfg(not(unix))]
fn signal_code(_status: &std::process::ExitStatus) -> i32 {
    1
}

/// Render command line for logs and reports, with secrets masked.
pub fn render_command(program: &str, args: &[String]) -> String {
    let mut out = String::from(program);
    let mut mask_next = false;
    for arg in args {
        out.push(' ');
        if mask_next {
            out.push_str("********");
        } else if arg.contains(char::is_whitespace) {
            out.push_str(&format!("{arg:?}"));
        } else {
            out.push_str(arg);
        }
        mask_next = matches!(arg.as_str(), "--password" | "--cipassword");
    }

    out
}

/// Address assignment of the first network interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    Dhcp,
    Static(String),
}

impl Display for Address {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Dhcp => fmt.write_str("dhcp"),
            Self::Static(cidr) => fmt.write_str(cidr),
        }
    }
}

/// Network interface of a guest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkSpec {
    pub bridge: String,
    pub address: Address,
    pub gateway: Option<Ipv4Addr>,
    pub vlan: Option<u16>,
    pub mtu: Option<u16>,
    pub mac: Option<String>,
}

/// Everything needed to create one guest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuestSpec {
    pub id: u32,
    pub kind: GuestKind,
    pub hostname: String,
    pub cores: u32,
    pub memory: u32,
    pub disk: u32,
    pub os: String,
    pub version: String,
    pub unprivileged: bool,
    pub network: NetworkSpec,
    pub storage: String,
    pub template_storage: String,
    pub password: Option<String>,
    pub ssh: bool,
    pub ssh_key: Option<String>,
    pub tags: Vec<String>,
}

impl GuestSpec {
    /// Build guest specification from resolved settings.
    ///
    /// Hostname defaults to the application name when unset.
    ///
    /// # Errors
    ///
    /// - Return [`ProvisionError::Settings`] if a value cannot be used.
    pub fn from_settings(
        app: &str,
        id: u32,
        kind: GuestKind,
        settings: &ResolvedSettings,
    ) -> Result<Self> {
        let hostname = settings.optional(SettingKey::Hostname).unwrap_or(app);
        let address = match settings.value(SettingKey::Net) {
            "dhcp" => Address::Dhcp,
            cidr => Address::Static(cidr.into()),
        };
        let gateway: Option<Ipv4Addr> = match settings.optional(SettingKey::Gateway) {
            Some(_) => Some(settings.parse(SettingKey::Gateway)?),
            None => None,
        };
        let vlan: Option<u16> = match settings.optional(SettingKey::Vlan) {
            Some(_) => Some(settings.parse(SettingKey::Vlan)?),
            None => None,
        };
        let mtu: Option<u16> = match settings.optional(SettingKey::Mtu) {
            Some(_) => Some(settings.parse(SettingKey::Mtu)?),
            None => None,
        };
        let tags = settings
            .value(SettingKey::Tags)
            .split([';', ','])
            .filter(|tag| !tag.is_empty())
            .map(str::to_owned)
            .collect();

        Ok(Self {
            id,
            kind,
            hostname: hostname.into(),
            cores: settings.parse(SettingKey::Cpu)?,
            memory: settings.parse(SettingKey::Ram)?,
            disk: settings.parse(SettingKey::Disk)?,
            os: settings.value(SettingKey::Os).into(),
            version: settings.value(SettingKey::Version).into(),
            unprivileged: settings.value(SettingKey::Unprivileged) == "1",
            network: NetworkSpec {
                bridge: settings.value(SettingKey::Bridge).into(),
                address,
                gateway,
                vlan,
                mtu,
                mac: settings.optional(SettingKey::Mac).map(str::to_owned),
            },
            storage: settings.value(SettingKey::ContainerStorage).into(),
            template_storage: settings.value(SettingKey::TemplateStorage).into(),
            password: settings.optional(SettingKey::Password).map(str::to_owned),
            ssh: settings.value(SettingKey::Ssh) == "yes",
            ssh_key: settings
                .optional(SettingKey::SshAuthorizedKey)
                .map(str::to_owned),
            tags,
        })
    }
}

/// Free space report of one storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageStatus {
    pub name: String,
    pub active: bool,
    /// Available space in KiB.
    pub available_kib: u64,
}

/// Layer of indirection for the virtualization control surface.
pub trait Provisioner {
    /// Check that the cluster can accept new guests.
    fn is_quorate(&self) -> Result<bool>;

    /// Ask cluster for the next free guest id.
    fn next_id(&self) -> Result<u32>;

    /// Check if guest id is taken by any container or VM in the cluster.
    fn id_in_use(&self, id: u32) -> Result<bool>;

    /// Status of storage if it can hold content of given type.
    fn storage_status(&self, storage: &str, content: &str) -> Result<Option<StorageStatus>>;

    /// Container templates already present on storage.
    fn local_templates(&self, storage: &str) -> Result<Vec<String>>;

    /// Container templates offered by the Proxmox template mirror.
    fn available_templates(&self) -> Result<Vec<String>>;

    /// Download container template onto storage.
    fn download_template(&self, storage: &str, template: &str) -> Result<()>;

    /// Create LXC container from template.
    fn create_container(&self, spec: &GuestSpec, template: &str) -> Result<()>;

    /// Create QEMU/KVM virtual machine.
    fn create_vm(&self, spec: &GuestSpec) -> Result<()>;

    /// Start guest.
    fn start(&self, kind: GuestKind, id: u32) -> Result<()>;

    /// Query running guest for its IPv4 addresses.
    fn guest_addresses(&self, kind: GuestKind, id: u32) -> Result<Vec<Ipv4Addr>>;
}

/// Result of a successful provisioning run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provisioned {
    pub id: u32,
    pub kind: GuestKind,
    pub hostname: String,
    pub addresses: Vec<Ipv4Addr>,
}

/// Provision guest from specification.
///
/// Runs prechecks, creates the guest, starts it, and asks it once for its
/// addresses. An unanswered address query is logged, not fatal.
///
/// # Errors
///
/// - Return [`ProvisionError`] from the first step that fails.
#[instrument(skip(provisioner, spec), fields(id = spec.id, kind = %spec.kind), level = "debug")]
pub fn provision(provisioner: &impl Provisioner, spec: &GuestSpec) -> Result<Provisioned> {
    checks::check_hostname(&spec.hostname)?;
    checks::check_id(provisioner, spec.id)?;
    match spec.kind {
        GuestKind::Container => {
            checks::check_storage(provisioner, &spec.storage, "rootdir", spec.disk)?;
            let template = checks::resolve_template(
                provisioner,
                &spec.template_storage,
                &spec.os,
                &spec.version,
            )?;
            info!("create container {} from {template}", spec.id);
            provisioner.create_container(spec, &template)?;
        }
        GuestKind::VirtualMachine => {
            checks::check_storage(provisioner, &spec.storage, "images", spec.disk)?;
            info!("create virtual machine {}", spec.id);
            provisioner.create_vm(spec)?;
        }
    }

    info!("start {} {}", spec.kind, spec.id);
    provisioner.start(spec.kind, spec.id)?;

    let addresses = match provisioner.guest_addresses(spec.kind, spec.id) {
        Ok(addresses) => addresses,
        Err(error) => {
            warn!("cannot determine guest address yet: {error}");
            Vec::new()
        }
    };

    Ok(Provisioned {
        id: spec.id,
        kind: spec.kind,
        hostname: spec.hostname.clone(),
        addresses,
    })
}

/// Placeholder shown in a plan for an id the cluster has not handed out.
pub const UNASSIGNED_ID: &str = "<next free id>";

/// Choose guest id for run.
///
/// Takes `var_ctid` when set. Otherwise the cluster is asked for its next
/// free id, except on a dry run, which leaves the id unassigned.
///
/// # Errors
///
/// - Return [`ProvisionError`] if `var_ctid` is not a number, or the cluster
///   cannot hand out an id.
pub fn guest_id(
    provisioner: &impl Provisioner,
    settings: &ResolvedSettings,
    dry_run: bool,
) -> Result<Option<u32>> {
    if settings.optional(SettingKey::Ctid).is_some() {
        return Ok(Some(settings.parse(SettingKey::Ctid)?));
    }

    if dry_run {
        return Ok(None);
    }

    provisioner.next_id().map(Some)
}

/// Render command that would create guest, without running anything.
///
/// The id is shown as [`UNASSIGNED_ID`] unless `assigned` is set.
pub fn plan_command(spec: &GuestSpec, assigned: bool) -> String {
    let (program, args) = match spec.kind {
        GuestKind::Container => (
            "pct",
            pve::PveCli::<SystemRunner>::container_args(
                spec,
                &format!("{}-{}-<newest>", spec.os, spec.version),
                None,
            ),
        ),
        GuestKind::VirtualMachine => ("qm", pve::PveCli::<SystemRunner>::vm_args(spec, None)),
    };

    if assigned {
        return render_command(program, &args);
    }

    // INVARIANT: Both argument vectors start with "create <id>".
    let rest = render_command("", &args[2..]);
    format!("{program} {} {UNASSIGNED_ID}{rest}", args[0])
}

/// Provisioning error types.
#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    /// External command could not be spawned.
    #[error("failed to run {program:?}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// External command exited with non-zero code.
    #[error("`{command}` exited with code {code}: {}", stderr.trim())]
    Command {
        command: String,
        code: i32,
        stderr: String,
    },

    /// Step failed with a known exit code.
    #[error("{message}")]
    Failed { code: i32, message: String },

    /// External command printed something proxforge cannot understand.
    #[error("unexpected output from {program:?}: {message}")]
    Output { program: String, message: String },

    /// Resolved settings cannot be used to build a guest.
    #[error(transparent)]
    Settings(#[from] ResolveError),
}

impl ProvisionError {
    /// Construct failure with a known exit code.
    pub fn failed(code: i32, message: impl Into<String>) -> Self {
        Self::Failed {
            code,
            message: message.into(),
        }
    }

    /// Exit code to terminate with.
    ///
    /// Codes of external commands are preserved as-is.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Spawn { source, .. } if source.kind() == ErrorKind::NotFound => 127,
            Self::Spawn { .. } => 126,
            Self::Command { code, .. } | Self::Failed { code, .. } => *code,
            Self::Output { .. } => 1,
            Self::Settings(error) => settings_exit_code(error),
        }
    }
}

/// Exit code of a settings problem, based on the offending key.
pub fn settings_exit_code(error: &ResolveError) -> i32 {
    match error.key() {
        Some(SettingKey::Password) => 207,
        Some(
            SettingKey::Hostname
            | SettingKey::Bridge
            | SettingKey::Net
            | SettingKey::Gateway
            | SettingKey::Vlan
            | SettingKey::Mtu
            | SettingKey::Mac,
        ) => 208,
        Some(SettingKey::Os) => 204,
        Some(SettingKey::Ctid) => 205,
        _ => 2,
    }
}

/// Friendly result alias :3
pub type Result<T, E = ProvisionError> = std::result::Result<T, E>;
