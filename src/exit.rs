// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Exit code taxonomy.
//!
//! Proxforge preserves the exit code of whatever failed so that calling
//! automation can branch on it. Codes are partitioned into three disjoint
//! ranges:
//!
//! | Range   | Category                          |
//! |---------|-----------------------------------|
//! | 1-99    | generic Unix and network failures |
//! | 100-199 | package manager and database      |
//! | 200-299 | Proxmox VE                        |
//!
//! Every known code carries a description and a remediation hint. Codes that
//! are not listed still get a category from their range.

use std::fmt::{Display, Formatter, Result as FmtResult};

/// Category of an exit code, derived from its range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExitCategory {
    /// Codes 1 through 99.
    Generic,

    /// Codes 100 through 199.
    Package,

    /// Codes 200 through 299.
    Proxmox,

    /// Anything outside the partitioned ranges.
    Unknown,
}

impl ExitCategory {
    /// Determine category of exit code by range.
    pub fn of(code: i32) -> Self {
        match code {
            1..=99 => Self::Generic,
            100..=199 => Self::Package,
            200..=299 => Self::Proxmox,
            _ => Self::Unknown,
        }
    }

    fn fallback(self) -> &'static str {
        match self {
            Self::Generic => "unknown error",
            Self::Package => "unknown package/database-layer error",
            Self::Proxmox => "unknown Proxmox-layer error",
            Self::Unknown => "unknown error",
        }
    }
}

impl Display for ExitCategory {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Generic => fmt.write_str("generic"),
            Self::Package => fmt.write_str("package/database"),
            Self::Proxmox => fmt.write_str("proxmox"),
            Self::Unknown => fmt.write_str("unknown"),
        }
    }
}

/// Known exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCodeEntry {
    pub code: i32,
    pub description: &'static str,
    pub hint: &'static str,
}

const fn entry(code: i32, description: &'static str, hint: &'static str) -> ExitCodeEntry {
    ExitCodeEntry {
        code,
        description,
        hint,
    }
}

/// Every exit code proxforge knows about, in ascending order.
pub const EXIT_CODES: &[ExitCodeEntry] = &[
    entry(1, "general error", "re-run with --verbose and read the last command's output"),
    entry(2, "invalid arguments or configuration", "check the command line and the var_* settings"),
    entry(6, "DNS resolution failed", "check /etc/resolv.conf and the upstream DNS server"),
    entry(7, "failed to connect to host", "check network reachability and firewall rules"),
    entry(22, "HTTP request returned an error status", "the download URL may have moved, retry later"),
    entry(28, "operation timed out", "check network latency or retry when the mirror is less busy"),
    entry(35, "TLS handshake failed", "check the system clock and CA certificates"),
    entry(100, "APT package manager error", "run 'apt --fix-broken install' inside the guest"),
    entry(101, "APT configuration error", "check /etc/apt/sources.list inside the guest"),
    entry(102, "APT lock held by another process", "wait for unattended-upgrades to finish and retry"),
    entry(150, "systemd service failed to start", "inspect 'journalctl -u <service>' inside the guest"),
    entry(151, "systemd unit not found", "check that the install step created the unit file"),
    entry(160, "Python environment error", "recreate the virtual environment inside the guest"),
    entry(161, "pip install failed", "check the package index and Python version"),
    entry(170, "PostgreSQL connection failed", "check that postgresql is running and listening"),
    entry(171, "PostgreSQL authentication failed", "check the role password and pg_hba.conf"),
    entry(172, "PostgreSQL database does not exist", "create the database before starting the app"),
    entry(173, "PostgreSQL fatal error", "inspect the PostgreSQL log inside the guest"),
    entry(180, "MySQL/MariaDB connection failed", "check that the database server is running"),
    entry(181, "MySQL/MariaDB authentication failed", "check the user grants and password"),
    entry(182, "MySQL/MariaDB database does not exist", "create the database before starting the app"),
    entry(183, "MySQL/MariaDB fatal error", "inspect the MariaDB error log inside the guest"),
    entry(190, "MongoDB connection failed", "check that mongod is running"),
    entry(191, "MongoDB authentication failed", "check the MongoDB user credentials"),
    entry(192, "MongoDB database not found", "create the database before starting the app"),
    entry(193, "MongoDB fatal error", "inspect the mongod log inside the guest"),
    entry(200, "failed to create lock file", "check permissions and free space in /tmp"),
    entry(203, "missing CTID", "set var_ctid or let proxforge pick the next free id"),
    entry(204, "missing OS type", "set var_os to a supported distribution"),
    entry(205, "invalid CTID, must be 100 or greater", "pick an id of 100 or above"),
    entry(206, "CTID already in use", "choose another id or remove the existing guest"),
    entry(207, "password contains unescaped special characters", "avoid leading '-' and whitespace in var_pw"),
    entry(208, "invalid network configuration", "check var_net, var_gateway, var_vlan, var_mtu and var_mac"),
    entry(209, "container creation failed", "read the pct output above and check storage and template"),
    entry(210, "cluster not quorate", "restore quorum before creating guests"),
    entry(211, "timeout waiting for template lock", "another download is running, retry when it completes"),
    entry(214, "not enough storage space", "free space or pick a larger storage pool"),
    entry(215, "container created but not listed", "check 'pct list' and remove the ghost config"),
    entry(216, "root filesystem entry missing in config", "check /etc/pve/lxc/<id>.conf"),
    entry(217, "storage does not support container root filesystems", "pick a storage with 'rootdir' content"),
    entry(218, "template file corrupted or incomplete", "delete the template and download it again"),
    entry(220, "unable to resolve template", "run 'pveam update' and check var_os and var_version"),
    entry(221, "template file not readable", "check permissions of the template storage"),
    entry(222, "template download failed", "check network access to the Proxmox template mirror"),
    entry(223, "template not available after download", "check the template storage configuration"),
    entry(230, "virtual machine creation failed", "read the qm output above and check storage"),
    entry(231, "guest agent not responding", "install and start qemu-guest-agent inside the VM"),
];

/// Look up known exit code.
pub fn lookup(code: i32) -> Option<&'static ExitCodeEntry> {
    EXIT_CODES
        .binary_search_by_key(&code, |entry| entry.code)
        .ok()
        .map(|index| &EXIT_CODES[index])
}

/// Diagnosis of an exit code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnosis {
    pub code: i32,
    pub category: ExitCategory,
    pub description: String,
    pub hint: Option<String>,
}

impl Diagnosis {
    /// Diagnose exit code through the table.
    ///
    /// Unlisted codes fall back to the unknown entry of their range.
    pub fn of(code: i32) -> Self {
        let category = ExitCategory::of(code);
        match lookup(code) {
            Some(entry) => Self {
                code,
                category,
                description: entry.description.into(),
                hint: Some(entry.hint.into()),
            },
            None => Self {
                code,
                category,
                description: category.fallback().into(),
                hint: None,
            },
        }
    }

    /// Diagnosis that bypasses the table.
    ///
    /// Used for shell conventions like 127 or 128 + signal that do not belong
    /// to any category.
    pub fn custom(code: i32, description: impl Into<String>, hint: Option<String>) -> Self {
        Self {
            code,
            category: ExitCategory::Unknown,
            description: description.into(),
            hint,
        }
    }
}

impl Display for Diagnosis {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        write!(
            fmt,
            "exit code {} ({}): {}",
            self.code, self.category, self.description
        )?;
        if let Some(hint) = &self.hint {
            write!(fmt, "\n  hint: {hint}")?;
        }

        Ok(())
    }
}
