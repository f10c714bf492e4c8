// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Interactive settings wizard.
//!
//! Before anything is created the operator gets to pick how settings are
//! chosen:
//!
//! - __Default settings__: take whatever the precedence tiers resolve to.
//! - __Advanced settings__: walk through every key with its resolved value
//!   filled in, and edit what needs changing. Keys pinned by the environment
//!   are shown, never prompted, because the environment always wins.
//! - __App defaults__ or __global defaults__: only offered when such a
//!   defaults file holds something. Global defaults mode ignores the per-app
//!   file for this run.
//!
//! After an advanced run the operator can save the result as defaults for
//! the app, or as global defaults. Nothing is ever saved without that
//! explicit choice.
//!
//! All prompting goes through the [`Prompter`] trait. [`InquirePrompter`]
//! prompts on the terminal.

use crate::{
    config::SettingKey,
    provision::{provision, GuestSpec, Provisioned, Provisioner},
    resolve::{EnvSource, ResolveError, ResolvedSettings, Resolver},
    store::{DefaultsStore, Scope},
    trap::Failure,
};

use inquire::{
    validator::Validation, Confirm, InquireError, Password, PasswordDisplayMode, Select, Text,
};
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    io::IsTerminal,
};
use tracing::{info, instrument, warn};

/// Environment variable that disables every prompt.
pub const NONINTERACTIVE_VAR: &str = "PROXFORGE_NONINTERACTIVE";

/// Check if proxforge may prompt the operator.
///
/// Not interactive when `CI` or [`NONINTERACTIVE_VAR`] is set to anything
/// other than empty or `0`, or when standard input or output is not a
/// terminal.
pub fn is_interactive() -> bool {
    if is_flag_set("CI") || is_flag_set(NONINTERACTIVE_VAR) {
        return false;
    }

    std::io::stdin().is_terminal() && std::io::stdout().is_terminal()
}

// INVARIANT: Empty and "0" both mean the flag is off.
fn is_flag_set(name: &str) -> bool {
    std::env::var_os(name).is_some_and(|value| !value.is_empty() && value != "0")
}

/// Layer of indirection for operator prompts.
pub trait Prompter {
    /// Pick one option, returning its index.
    fn select(&mut self, message: &str, options: &[String], start: usize) -> Result<usize>;

    /// Edit value of setting key, starting from its current value.
    ///
    /// Implementations only return values the key accepts.
    fn input(&mut self, key: SettingKey, current: &str) -> Result<String>;

    /// Ask yes or no question.
    fn confirm(&mut self, message: &str, default: bool) -> Result<bool>;
}

/// Terminal prompts through inquire.
#[derive(Debug, Default, Clone, Copy)]
pub struct InquirePrompter;

impl Prompter for InquirePrompter {
    fn select(&mut self, message: &str, options: &[String], start: usize) -> Result<usize> {
        Select::new(message, options.to_vec())
            .with_starting_cursor(start)
            .raw_prompt()
            .map(|choice| choice.index)
            .map_err(WizardError::from)
    }

    fn input(&mut self, key: SettingKey, current: &str) -> Result<String> {
        if key.is_secret() {
            // INVARIANT: Secrets are never prefilled. Empty answer keeps current.
            let answer = Password::new(key.label())
                .without_confirmation()
                .with_display_mode(PasswordDisplayMode::Masked)
                .with_help_message("leave empty to keep the current value")
                .with_validator(move |input: &str| {
                    if input.is_empty() {
                        return Ok(Validation::Valid);
                    }
                    Ok(match key.validate(input) {
                        Ok(()) => Validation::Valid,
                        Err(err) => Validation::Invalid(err.reason.into()),
                    })
                })
                .prompt()?;

            return Ok(if answer.is_empty() {
                current.into()
            } else {
                answer
            });
        }

        let help = format!("{key}, clear to unset");
        let mut prompt = Text::new(key.label())
            .with_initial_value(current)
            .with_validator(move |input: &str| {
                Ok(match key.validate(input) {
                    Ok(()) => Validation::Valid,
                    Err(err) => Validation::Invalid(err.reason.into()),
                })
            });
        if !key.is_required() {
            prompt = prompt.with_help_message(&help);
        }

        Ok(prompt.prompt()?)
    }

    fn confirm(&mut self, message: &str, default: bool) -> Result<bool> {
        Ok(Confirm::new(message).with_default(default).prompt()?)
    }
}

/// How settings are chosen for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Default,
    Advanced,
    AppDefaults,
    GlobalDefaults,
}

impl Display for Mode {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Default => fmt.write_str("Default settings"),
            Self::Advanced => fmt.write_str("Advanced settings"),
            Self::AppDefaults => fmt.write_str("App defaults"),
            Self::GlobalDefaults => fmt.write_str("Global defaults"),
        }
    }
}

/// Settings chosen by the operator, and where to save them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WizardOutcome {
    pub settings: ResolvedSettings,
    pub save: Option<Scope>,
}

impl WizardOutcome {
    /// Outcome of a run that skipped the wizard.
    pub fn unattended(settings: ResolvedSettings) -> Self {
        Self {
            settings,
            save: None,
        }
    }

    /// Provision guest, then save chosen settings if operator asked to.
    ///
    /// # Errors
    ///
    /// - Return provisioning failure with its exit code intact. A save
    ///   error after failed provisioning is only logged.
    /// - Return save failure if provisioning succeeded.
    #[instrument(skip(self, provisioner, spec, store), level = "debug")]
    pub fn provision_and_save(
        &self,
        provisioner: &impl Provisioner,
        spec: &GuestSpec,
        store: &DefaultsStore,
    ) -> Result<Provisioned, Failure> {
        let result = provision(provisioner, spec);

        // INVARIANT: Defaults are written once, after everything else is done.
        if let Some(scope) = &self.save {
            let saved = self
                .settings
                .to_defaults()
                .map_err(Failure::from)
                .and_then(|defaults| store.replace(scope, defaults).map_err(Failure::from));
            match (&result, saved) {
                (_, Ok(file)) => info!("saved {} defaults to {:?}", file.scope, file.path.display()),
                (Ok(_), Err(error)) => return Err(error),
                (Err(_), Err(error)) => warn!("settings were not saved: {error}"),
            }
        }

        Ok(result?)
    }
}

/// Interactive settings wizard for one application.
#[derive(Debug)]
pub struct Wizard<P>
where
    P: Prompter,
{
    prompter: P,
    app: String,
}

impl<P> Wizard<P>
where
    P: Prompter,
{
    /// Construct new wizard for application.
    pub fn new(prompter: P, app: impl Into<String>) -> Self {
        Self {
            prompter,
            app: app.into(),
        }
    }

    /// Run wizard over resolver.
    ///
    /// # Errors
    ///
    /// - Return [`WizardError::Interrupted`] if operator cancels a prompt.
    /// - Return [`WizardError::Declined`] if operator rejects the summary.
    /// - Return [`WizardError::Resolve`] if resolution fails.
    #[instrument(skip(self, resolver), fields(app = %self.app), level = "debug")]
    pub fn run<E>(&mut self, resolver: &Resolver<'_, E>) -> Result<WizardOutcome>
    where
        E: EnvSource + Clone,
    {
        let modes = available_modes(resolver);
        let labels = modes.iter().map(Mode::to_string).collect::<Vec<_>>();
        let choice = self.prompter.select(
            &format!("Settings for {}", self.app),
            &labels,
            0,
        )?;
        let mode = modes.get(choice).copied().unwrap_or(Mode::Default);

        let settings = match mode {
            Mode::Default | Mode::AppDefaults => resolver.resolve_all()?,
            Mode::GlobalDefaults => resolver.clone().without_app().resolve_all()?,
            Mode::Advanced => self.advanced(resolver)?,
        };

        info!("{mode} for {}:\n{settings}", self.app);
        if !self
            .prompter
            .confirm(&format!("Create {} with these settings?", self.app), true)?
        {
            return Err(WizardError::Declined);
        }

        let save = match mode {
            Mode::Advanced => self.ask_save()?,
            _ => None,
        };

        Ok(WizardOutcome { settings, save })
    }

    fn advanced<E>(&mut self, resolver: &Resolver<'_, E>) -> Result<ResolvedSettings>
    where
        E: EnvSource,
    {
        let mut settings = resolver.resolve_all()?;
        for key in SettingKey::ALL {
            if resolver.is_overridden(key) {
                info!(
                    "{} is pinned by the environment: {}",
                    key.label(),
                    settings.get(key).display_value()
                );
                continue;
            }

            let current = settings.value(key).to_string();
            let answer = self.prompter.input(key, &current)?;
            if answer != current {
                settings.set_from_wizard(key, answer)?;
            }
        }

        Ok(settings)
    }

    fn ask_save(&mut self) -> Result<Option<Scope>> {
        let options = [
            "Do not save".to_string(),
            format!("Save as defaults for {}", self.app),
            "Save as global defaults".to_string(),
        ];

        match self.prompter.select("Save these settings?", &options, 0)? {
            1 => Ok(Some(Scope::App(self.app.clone()))),
            2 => Ok(Some(Scope::Global)),
            _ => Ok(None),
        }
    }
}

fn available_modes<E>(resolver: &Resolver<'_, E>) -> Vec<Mode>
where
    E: EnvSource,
{
    let mut modes = vec![Mode::Default, Mode::Advanced];
    if resolver.app().is_some_and(|app| !app.is_empty()) {
        modes.push(Mode::AppDefaults);
    }
    if resolver.global().is_some_and(|global| !global.is_empty()) {
        modes.push(Mode::GlobalDefaults);
    }

    modes
}

/// Settings wizard error types.
#[derive(Debug, thiserror::Error)]
pub enum WizardError {
    /// Operator cancelled a prompt.
    #[error("cancelled by operator")]
    Interrupted,

    /// Operator rejected the settings summary.
    #[error("settings declined by operator")]
    Declined,

    /// Prompt failed for reasons other than cancellation.
    #[error(transparent)]
    Prompt(InquireError),

    /// Settings cannot be resolved.
    #[error(transparent)]
    Resolve(#[from] ResolveError),
}

impl From<InquireError> for WizardError {
    fn from(error: InquireError) -> Self {
        match error {
            InquireError::OperationCanceled | InquireError::OperationInterrupted => {
                Self::Interrupted
            }
            other => Self::Prompt(other),
        }
    }
}

/// Friendly result alias :3
pub type Result<T, E = WizardError> = std::result::Result<T, E>;
