// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Top-level error trap.
//!
//! Every failure proxforge can run into is folded into one [`Failure`] and
//! propagated up to the binary's single handler, which fires the
//! [`ErrorTrap`]. Firing reports the failure together with the last external
//! command executed, diagnoses the exit code through the exit code table,
//! and hands back the code to terminate with.
//!
//! The trap is armed once and fired at most once. [`ErrorTrap::fire`] takes
//! the trap by value, so a fired trap cannot be fired again.

use crate::{
    config::ConfigError,
    exit::Diagnosis,
    path::NoWayHome,
    provision::{settings_exit_code, CommandLog, ProvisionError},
    resolve::ResolveError,
    store::StoreError,
    wizard::WizardError,
};

use std::{error::Error as StdError, path::PathBuf};
use tracing::{error, info, instrument, warn};

/// Exit code of a command that could not be found.
pub const COMMAND_NOT_FOUND: i32 = 127;

/// Exit code of a command that was found but could not be executed.
pub const COMMAND_NOT_EXECUTABLE: i32 = 126;

/// Offset added to a signal number to form the exit code it causes.
pub const SIGNAL_OFFSET: i32 = 128;

/// Signal number of SIGINT.
pub const SIGINT: i32 = 2;

/// Signal number of SIGTERM.
pub const SIGTERM: i32 = 15;

/// Any failure that ends a proxforge run.
#[derive(Debug, thiserror::Error)]
pub enum Failure {
    /// Built-in defaults or app manifest are broken.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Defaults store cannot be read or written.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Settings cannot be resolved.
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// Provisioning step failed.
    #[error(transparent)]
    Provision(#[from] ProvisionError),

    /// Settings wizard failed or was cancelled.
    #[error(transparent)]
    Wizard(#[from] WizardError),

    /// Defaults directory cannot be located.
    #[error(transparent)]
    Path(#[from] NoWayHome),

    /// App manifest cannot be read.
    #[error("failed to read app manifest at {:?}", path.display())]
    ManifestRead {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Run was stopped by a termination signal.
    #[error("terminated by signal {signal}")]
    Interrupted { signal: i32 },

    /// Blocking worker died before it could report.
    #[error("worker failed: {0}")]
    Worker(String),
}

impl Failure {
    /// Exit code to terminate with.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => 2,
            Self::Store(StoreError::InvalidAppName(_))
            | Self::Store(StoreError::NotPersistable(_))
            | Self::Store(StoreError::InvalidValue(_)) => 2,
            Self::Store(_) => 1,
            Self::Resolve(error) => settings_exit_code(error),
            Self::Provision(error) => error.exit_code(),
            Self::Wizard(WizardError::Interrupted | WizardError::Declined) => {
                SIGNAL_OFFSET + SIGINT
            }
            Self::Wizard(WizardError::Resolve(error)) => settings_exit_code(error),
            Self::Wizard(WizardError::Prompt(_)) => 1,
            Self::Path(_) => 1,
            Self::ManifestRead { .. } => 2,
            Self::Interrupted { signal } => SIGNAL_OFFSET + signal,
            Self::Worker(_) => 1,
        }
    }

    /// Diagnose exit code of failure.
    ///
    /// Shell conventions for missing commands and signals are reported
    /// outside the exit code table.
    pub fn diagnosis(&self) -> Diagnosis {
        let code = self.exit_code();
        match self {
            Self::Provision(ProvisionError::Spawn { program, .. }) => {
                let description = match code {
                    COMMAND_NOT_FOUND => "command not found",
                    _ => "command not executable",
                };
                Diagnosis::custom(
                    code,
                    description,
                    Some(format!("check that {program:?} is installed and on PATH")),
                )
            }
            Self::Interrupted { signal } => Diagnosis::custom(
                code,
                format!("terminated by {}", signal_name(*signal)),
                Some("the guest may be half-created, check 'pct list' and 'qm list'".into()),
            ),
            Self::Wizard(WizardError::Interrupted | WizardError::Declined) => {
                Diagnosis::custom(code, "cancelled by operator", None)
            }
            _ => Diagnosis::of(code),
        }
    }
}

fn signal_name(signal: i32) -> String {
    match signal {
        SIGINT => "SIGINT".into(),
        SIGTERM => "SIGTERM".into(),
        other => format!("signal {other}"),
    }
}

/// Armed error trap.
#[derive(Debug, Default)]
pub struct ErrorTrap {
    log: CommandLog,
}

impl ErrorTrap {
    /// Arm new error trap with an empty command log.
    pub fn arm() -> Self {
        Self::default()
    }

    /// Command log to record external commands into.
    ///
    /// Hand a clone of this to every command runner so that a report can
    /// name the last command executed.
    pub fn command_log(&self) -> CommandLog {
        self.log.clone()
    }

    /// Fire trap on failure, reporting it.
    ///
    /// Returns diagnosis whose code the process should exit with.
    #[instrument(skip(self, failure), level = "debug")]
    pub fn fire(self, failure: &Failure) -> Diagnosis {
        let diagnosis = failure.diagnosis();

        error!("{failure}");
        let mut source = failure.source();
        while let Some(cause) = source {
            error!("  caused by: {cause}");
            source = cause.source();
        }

        match self.log.last() {
            Some(command) => warn!("last command: {command}"),
            None => info!("no external command was executed"),
        }

        error!(
            "exit code {} ({}): {}",
            diagnosis.code, diagnosis.category, diagnosis.description
        );
        if let Some(hint) = &diagnosis.hint {
            info!("hint: {hint}");
        }

        diagnosis
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::SettingKey, exit::ExitCategory, store::StoreError};
    use simple_test_case::test_case;

    #[test]
    fn preserve_code_of_failed_command() {
        let trap = ErrorTrap::arm();
        trap.command_log().record("pct create 120 local:vztmpl/debian-12.tar.zst");
        let failure = Failure::from(ProvisionError::Command {
            command: "pct create 120 local:vztmpl/debian-12.tar.zst".into(),
            code: 206,
            stderr: "CT 120 already exists\n".into(),
        });

        let diagnosis = trap.fire(&failure);
        assert_eq!(diagnosis.code, 206);
        assert_eq!(diagnosis.category, ExitCategory::Proxmox);
        assert_eq!(diagnosis.description, "CTID already in use");
    }

    #[test]
    fn unlisted_proxmox_code_falls_back() {
        let failure = Failure::from(ProvisionError::failed(299, "mystery"));
        let diagnosis = failure.diagnosis();
        assert_eq!(diagnosis.description, "unknown Proxmox-layer error");
        assert_eq!(diagnosis.hint, None);
    }

    #[test]
    fn missing_tool_is_command_not_found() {
        let failure = Failure::from(ProvisionError::Spawn {
            program: "pct".into(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        });

        let diagnosis = failure.diagnosis();
        assert_eq!(diagnosis.code, COMMAND_NOT_FOUND);
        assert_eq!(diagnosis.category, ExitCategory::Unknown);
        assert_eq!(diagnosis.description, "command not found");
    }

    #[test_case(SIGINT, 130; "sigint")]
    #[test_case(SIGTERM, 143; "sigterm")]
    #[test]
    fn signals_add_offset(signal: i32, code: i32) {
        let diagnosis = Failure::Interrupted { signal }.diagnosis();
        assert_eq!(diagnosis.code, code);
        assert_eq!(diagnosis.category, ExitCategory::Unknown);
    }

    #[test]
    fn settings_failures_map_to_their_key() {
        let failure = Failure::from(StoreError::NotPersistable(SettingKey::Ctid));
        assert_eq!(failure.exit_code(), 2);

        let error = SettingKey::Mtu.validate("huge").unwrap_err();
        let failure = Failure::from(ResolveError::InvalidOverride { source: error });
        assert_eq!(failure.exit_code(), 208);
    }

    #[test]
    fn cancelled_wizard_reports_interrupt() {
        let failure = Failure::from(WizardError::Interrupted);
        assert_eq!(failure.exit_code(), 130);
        assert_eq!(failure.diagnosis().description, "cancelled by operator");
    }
}
