// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use proxforge::{
    config::{AppManifest, BuiltinDefaults, GuestKind, SettingKey},
    exit::Diagnosis,
    path::default_defaults_dir,
    provision::{
        guest_id, plan_command, pve::PveCli, CommandLog, GuestSpec, Provisioned, Provisioner,
        SystemRunner,
    },
    resolve::{ProcessEnv, ResolvedSettings, Resolver},
    store::{DefaultsFile, DefaultsStore, Scope},
    trap::{ErrorTrap, Failure, SIGINT, SIGTERM},
    wizard::{is_interactive, InquirePrompter, Wizard, WizardOutcome},
};

use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::{fs::read_to_string, path::PathBuf, process::exit, time::Duration};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, reload, EnvFilter, Registry};

/// Handle to raise log level once saved `var_verbose` is known.
type LogLevel = reload::Handle<EnvFilter, Registry>;

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "\n  proxforge [options] <proxforge-command>",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    /// Show debug output, same as var_verbose=yes.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    fn run(self, log: CommandLog, level: LogLevel) -> Result<(), Failure> {
        match self.command {
            Command::Create(opts) => run_create(opts, log, &level),
            Command::Settings(opts) => run_settings(opts, &level),
            Command::Defaults(command) => run_defaults(command),
            Command::Explain(opts) => run_explain(opts),
            Command::GuestIp(opts) => run_guest_ip(opts, log),
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Create and start guest for application.
    #[command(override_usage = "proxforge create [options] <app>")]
    Create(CreateOptions),

    /// Choose settings for application without creating anything.
    #[command(override_usage = "proxforge settings [options] <app>")]
    Settings(SettingsOptions),

    /// Inspect or edit saved defaults.
    #[command(subcommand)]
    Defaults(DefaultsCommand),

    /// Explain what an exit code means.
    #[command(override_usage = "proxforge explain <code>")]
    Explain(ExplainOptions),

    /// Ask running guest for its IPv4 addresses.
    #[command(override_usage = "proxforge guest-ip [options] <id>")]
    GuestIp(GuestIpOptions),
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct CreateOptions {
    /// Name of application to provision.
    #[arg(required = true, value_name = "app")]
    pub app: String,

    /// Path to app manifest overlaying built-in defaults.
    #[arg(short, long, value_name = "path")]
    pub manifest: Option<PathBuf>,

    /// Kind of guest to create, "lxc" or "vm".
    #[arg(short, long, value_name = "kind")]
    pub kind: Option<String>,

    /// Use resolved settings without asking.
    #[arg(short, long)]
    pub defaults: bool,

    /// Show what would be created, but create nothing.
    #[arg(short = 'n', long)]
    pub dry_run: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct SettingsOptions {
    /// Name of application to choose settings for.
    #[arg(required = true, value_name = "app")]
    pub app: String,

    /// Path to app manifest overlaying built-in defaults.
    #[arg(short, long, value_name = "path")]
    pub manifest: Option<PathBuf>,
}

#[derive(Debug, Clone, Subcommand)]
enum DefaultsCommand {
    /// Show saved defaults of a scope.
    #[command(override_usage = "proxforge defaults show [--app <app> | --global]")]
    Show(ScopeOptions),

    /// Save one default.
    #[command(override_usage = "proxforge defaults set [--app <app> | --global] <key> <value>")]
    Set(SetOptions),

    /// Remove keys from defaults, or the whole file if no key is given.
    #[command(override_usage = "proxforge defaults remove [--app <app> | --global] [<key>]...")]
    Remove(RemoveOptions),

    /// List applications with saved defaults.
    #[command(override_usage = "proxforge defaults list")]
    List,
}

#[derive(Args, Clone, Debug)]
#[group(required = true, multiple = false)]
struct ScopeOptions {
    /// Per-app defaults of application.
    #[arg(short, long, value_name = "app")]
    pub app: Option<String>,

    /// Global defaults.
    #[arg(short, long)]
    pub global: bool,
}

impl ScopeOptions {
    fn scope(&self) -> Scope {
        match &self.app {
            Some(app) => Scope::App(app.clone()),
            None => Scope::Global,
        }
    }
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct SetOptions {
    #[command(flatten)]
    pub scope: ScopeOptions,

    /// Setting key, e.g., var_ram.
    #[arg(required = true, value_name = "key")]
    pub key: String,

    /// Value to save.
    #[arg(required = true, value_name = "value")]
    pub value: String,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct RemoveOptions {
    #[command(flatten)]
    pub scope: ScopeOptions,

    /// Setting keys to remove.
    #[arg(value_name = "key")]
    pub keys: Vec<String>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct ExplainOptions {
    /// Exit code to explain.
    #[arg(required = true, value_name = "code")]
    pub code: i32,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct GuestIpOptions {
    /// Guest id to query.
    #[arg(required = true, value_name = "id")]
    pub id: u32,

    /// Kind of guest, "lxc" or "vm".
    #[arg(short, long, value_name = "kind", default_value = "lxc")]
    pub kind: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let verbose = cli.verbose
        || std::env::var(SettingKey::Verbose.name()).is_ok_and(|value| value == "yes");

    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .without_time();
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(if verbose { "debug" } else { "info" }))
        .unwrap();
    let (filter, level) = reload::Layer::new(filter);
    tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .init();

    let trap = ErrorTrap::arm();
    if let Err(failure) = run(cli, trap.command_log(), level).await {
        let diagnosis = trap.fire(&failure);
        exit(diagnosis.code);
    }

    exit(0)
}

async fn run(cli: Cli, log: CommandLog, level: LogLevel) -> Result<(), Failure> {
    let mut terminate =
        signal(SignalKind::terminate()).map_err(|err| Failure::Worker(err.to_string()))?;
    let worker = tokio::task::spawn_blocking(move || cli.run(log, level));

    tokio::select! {
        result = worker => result.map_err(|err| Failure::Worker(err.to_string()))?,
        result = tokio::signal::ctrl_c() => {
            result.map_err(|err| Failure::Worker(err.to_string()))?;
            Err(Failure::Interrupted { signal: SIGINT })
        }
        _ = terminate.recv() => Err(Failure::Interrupted { signal: SIGTERM }),
    }
}

fn run_create(opts: CreateOptions, log: CommandLog, level: &LogLevel) -> Result<(), Failure> {
    let manifest = load_manifest(&opts.app, opts.manifest)?;
    let kind: GuestKind = match opts.kind {
        Some(kind) => kind.parse()?,
        None => manifest.app.kind,
    };

    let builtins = BuiltinDefaults::load(Some(&manifest))?;
    let store = DefaultsStore::open(default_defaults_dir()?)?;
    let (app_file, global_file) = load_defaults(&store, &opts.app)?;
    let resolver = Resolver::new(ProcessEnv, &builtins)
        .with_app(&app_file.defaults)
        .with_global(&global_file.defaults);

    let outcome = if opts.defaults || !is_interactive() {
        WizardOutcome::unattended(resolver.resolve_all()?)
    } else {
        Wizard::new(InquirePrompter, opts.app.as_str()).run(&resolver)?
    };
    apply_verbose(level, &outcome.settings);

    let pve = PveCli::new(SystemRunner::new(log));
    let id = guest_id(&pve, &outcome.settings, opts.dry_run)?;
    let spec = GuestSpec::from_settings(&opts.app, id.unwrap_or_default(), kind, &outcome.settings)?;

    if opts.dry_run {
        print!("{}", outcome.settings);
        println!("would run: {}", plan_command(&spec, id.is_some()));
        return Ok(());
    }

    let bar = spinner(format!("provisioning {} {} for {}", spec.kind, spec.id, opts.app));
    let result = outcome.provision_and_save(&pve, &spec, &store);
    bar.finish_and_clear();
    report(&result?);

    Ok(())
}

fn run_settings(opts: SettingsOptions, level: &LogLevel) -> Result<(), Failure> {
    let manifest = load_manifest(&opts.app, opts.manifest)?;
    let builtins = BuiltinDefaults::load(Some(&manifest))?;
    let store = DefaultsStore::open(default_defaults_dir()?)?;
    let (app_file, global_file) = load_defaults(&store, &opts.app)?;
    let resolver = Resolver::new(ProcessEnv, &builtins)
        .with_app(&app_file.defaults)
        .with_global(&global_file.defaults);

    if !is_interactive() {
        let settings = resolver.resolve_all()?;
        apply_verbose(level, &settings);
        print!("{settings}");
        return Ok(());
    }

    let outcome = Wizard::new(InquirePrompter, opts.app.as_str()).run(&resolver)?;
    apply_verbose(level, &outcome.settings);
    match &outcome.save {
        Some(scope) => {
            store.replace(scope, outcome.settings.to_defaults()?)?;
        }
        None => info!("settings not saved"),
    }

    Ok(())
}

fn run_defaults(command: DefaultsCommand) -> Result<(), Failure> {
    let store = DefaultsStore::open(default_defaults_dir()?)?;
    match command {
        DefaultsCommand::Show(opts) => {
            let file = store.load(&opts.scope())?;
            if !file.exists() {
                info!("no {} defaults at {:?}", file.scope, file.path.display());
                return Ok(());
            }
            print!("{}", file.defaults);
        }
        DefaultsCommand::Set(opts) => {
            let key: SettingKey = opts.key.parse()?;
            let mut file = store.load(&opts.scope.scope())?;
            file.defaults.set(key, opts.value)?;
            store.save(&mut file)?;
        }
        DefaultsCommand::Remove(opts) => {
            let scope = opts.scope.scope();
            if opts.keys.is_empty() {
                if !store.remove(&scope)? {
                    info!("no {scope} defaults to remove");
                }
                return Ok(());
            }

            let mut file = store.load(&scope)?;
            for name in &opts.keys {
                let key: SettingKey = name.parse()?;
                if file.defaults.remove(key).is_none() {
                    warn!("{key} is not set in {scope} defaults");
                }
            }
            store.save(&mut file)?;
        }
        DefaultsCommand::List => {
            let global = store.load(&Scope::Global)?;
            if global.exists() {
                println!("(global)");
            }
            for app in store.list_apps()? {
                println!("{app}");
            }
        }
    }

    Ok(())
}

fn run_explain(opts: ExplainOptions) -> Result<(), Failure> {
    println!("{}", Diagnosis::of(opts.code));
    Ok(())
}

fn run_guest_ip(opts: GuestIpOptions, log: CommandLog) -> Result<(), Failure> {
    let kind: GuestKind = opts.kind.parse()?;
    let pve = PveCli::new(SystemRunner::new(log));
    for address in pve.guest_addresses(kind, opts.id)? {
        println!("{address}");
    }

    Ok(())
}

fn load_manifest(app: &str, path: Option<PathBuf>) -> Result<AppManifest, Failure> {
    let Some(path) = path else {
        return Ok(AppManifest::named(app));
    };

    let data = read_to_string(&path).map_err(|err| Failure::ManifestRead {
        source: err,
        path: path.clone(),
    })?;
    let manifest: AppManifest = data.parse()?;
    if manifest.app.name != app {
        warn!(
            "manifest {:?} describes {:?}, not {app:?}",
            path.display(),
            manifest.app.name
        );
    }

    Ok(manifest)
}

fn load_defaults(
    store: &DefaultsStore,
    app: &str,
) -> Result<(DefaultsFile, DefaultsFile), Failure> {
    let app_file = store.load(&Scope::App(app.into()))?;
    let global_file = store.load(&Scope::Global)?;

    Ok((app_file, global_file))
}

// INVARIANT: An explicit RUST_LOG always wins over var_verbose.
fn apply_verbose(level: &LogLevel, settings: &ResolvedSettings) {
    if !settings.is_verbose() || std::env::var_os(EnvFilter::DEFAULT_ENV).is_some() {
        return;
    }

    if let Err(err) = level.reload(EnvFilter::new("debug")) {
        warn!("cannot raise log level: {err}");
    }
}

fn spinner(message: String) -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    let style = ProgressStyle::with_template("{elapsed_precise:.green}  {spinner:.yellow}  {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    bar.set_style(style);
    bar.set_message(message);
    bar.enable_steady_tick(Duration::from_millis(100));
    bar
}

fn report(provisioned: &Provisioned) {
    info!(
        "{} {} ({}) is running",
        provisioned.kind, provisioned.id, provisioned.hostname
    );
    match provisioned.addresses.as_slice() {
        [] => info!(
            "no address reported yet, try 'proxforge guest-ip --kind {} {}'",
            provisioned.kind, provisioned.id
        ),
        addresses => {
            for address in addresses {
                info!("reachable at {address}");
            }
        }
    }
}
