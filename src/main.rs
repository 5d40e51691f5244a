mod cmd;
mod config;
mod error;
mod host;
mod model;
mod probe;
mod steps;
mod ui;

use std::{
    path::PathBuf,
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use clap::{ArgAction, Parser};
use dialoguer::Confirm;

use config::{Settings, DEFAULT_CONFIG_DIR, DEFAULT_STATE_VERSION, DEFAULT_SWAP_DIR, DEFAULT_TIMEOUT_SECS};
use error::InstallerError;
use host::{Host, LiveHost};
use model::Provider;
use steps::render::CONFIGURATION_FILE;

// ── Interrupt flag ────────────────────────────────────────────────────────────

/// Set from the Ctrl-C handler; checked between steps so an interrupt
/// unwinds through the same cleanup as any other failure.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

fn check_interrupted(flag: &AtomicBool) -> Result<(), InstallerError> {
    if flag.load(Ordering::SeqCst) {
        return Err(InstallerError::Cancelled);
    }
    Ok(())
}

// ── Command line ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(version, about = "Turn this running Linux host into NixOS")]
struct Cli {
    /// Inspect the host and print the generated files; change nothing
    #[arg(long)]
    dry_run: bool,

    /// Do not ask for confirmation
    #[arg(short, long)]
    yes: bool,

    /// Hosting provider (autodetected when omitted)
    #[arg(long, value_enum, env = "PROVIDER")]
    provider: Option<Provider>,

    /// Never create a temporary swap file; the new system uses zram
    #[arg(long)]
    no_swap: bool,

    /// Directory for the temporary swap file
    #[arg(long, default_value = DEFAULT_SWAP_DIR)]
    swap_dir: PathBuf,

    /// Where the NixOS configuration is written
    #[arg(long, default_value = DEFAULT_CONFIG_DIR)]
    config_dir: PathBuf,

    /// Replace an existing configuration.nix
    #[arg(long)]
    overwrite: bool,

    /// system.stateVersion of the new system
    #[arg(long, default_value = DEFAULT_STATE_VERSION)]
    state_version: String,

    /// Seconds an inspection command may run before it is killed
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS)]
    timeout: u64,

    /// More log output (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Command to run once the configuration is written, while the
    /// temporary swap is still active
    #[arg(last = true, value_name = "CMD")]
    exec: Vec<String>,
}

impl Cli {
    fn into_settings(self) -> Settings {
        Settings {
            dry_run: self.dry_run,
            assume_yes: self.yes,
            provider: self.provider,
            no_swap: self.no_swap,
            swap_dir: self.swap_dir,
            config_dir: self.config_dir,
            overwrite: self.overwrite,
            state_version: self.state_version,
            timeout: Duration::from_secs(self.timeout),
            exec: self.exec,
        }
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter))
        .format_timestamp_millis()
        .init();
    log::debug!("Parsed CLI arguments: {cli:?}");

    if let Err(e) = ctrlc::set_handler(|| INTERRUPTED.store(true, Ordering::SeqCst)) {
        log::warn!("Cannot install Ctrl-C handler: {}", e);
    }

    if let Err(e) = run(&cli.into_settings()) {
        println!();
        ui::print_error(&format!("{}", e));
        std::process::exit(1);
    }
}

fn run(settings: &Settings) -> Result<(), InstallerError> {
    // ── Guard ─────────────────────────────────────────────────────────────────
    if !settings.dry_run {
        check_root()?;
    }

    ui::print_banner();
    if settings.dry_run {
        ui::print_warning("DRY-RUN MODE — the host is inspected but nothing is changed.");
    }

    let host = LiveHost::new(settings.timeout);
    run_steps(&host, settings, &INTERRUPTED)
}

/// The installation proper, against whatever `host` is. `interrupted` is
/// polled between steps.
fn run_steps(host: &dyn Host, settings: &Settings, interrupted: &AtomicBool) -> Result<(), InstallerError> {
    const TOTAL: u8 = 7;

    // ── Step 1: Host profile ──────────────────────────────────────────────────
    ui::print_step(1, TOTAL, "Host Detection");
    let profile = steps::profile::detect(host, settings.provider)?;
    check_interrupted(interrupted)?;

    // ── Step 2: Boot loader target ────────────────────────────────────────────
    ui::print_step(2, TOTAL, "Boot Loader");
    let boot = steps::boot::detect(host, &profile)?;
    check_interrupted(interrupted)?;

    // ── Step 3: Root filesystem ───────────────────────────────────────────────
    ui::print_step(3, TOTAL, "Root Filesystem");
    let rootfs = steps::rootfs::detect(host)?;
    ui::print_success(&format!("/ is {} on {}.", rootfs.fs_type, rootfs.source_device));
    check_interrupted(interrupted)?;

    // ── Step 4: Swap ──────────────────────────────────────────────────────────
    ui::print_step(4, TOTAL, "Swap");
    let swap = steps::swap::resolve(host, settings)?;
    check_interrupted(interrupted)?;

    // ── Step 5: Network ───────────────────────────────────────────────────────
    ui::print_step(5, TOTAL, "Network");
    let network = steps::network::capture(host)?;
    let identity = steps::identity::capture(host)?;
    check_interrupted(interrupted)?;

    // ── Step 6: Render ────────────────────────────────────────────────────────
    ui::print_step(6, TOTAL, "Configuration");
    let mut files = steps::render::render(&profile, &boot, &rootfs, &swap, &network)?.files;
    if writes_configuration(host, settings) {
        files.push(steps::render::render_configuration(&identity, &settings.state_version));
    } else {
        ui::print_info(&format!(
            "Keeping the existing {} (use --overwrite to replace it).",
            CONFIGURATION_FILE
        ));
    }
    ui::print_success(&format!("Rendered {} file(s).", files.len()));

    if settings.dry_run {
        for file in &files {
            ui::print_file(file.name, &file.contents);
        }
        return Ok(());
    }

    // ── Step 7: Apply ─────────────────────────────────────────────────────────
    ui::print_step(7, TOTAL, "Apply");
    ui::print_warning(&format!(
        "Files in {} will be replaced.",
        settings.config_dir.display()
    ));
    if !settings.assume_yes
        && !Confirm::new()
            .with_prompt("Write the NixOS configuration now?")
            .default(false)
            .interact()?
    {
        return Err(InstallerError::Cancelled);
    }

    // Lives until the end of this function; dropping it removes the file.
    let swap_file = steps::swap::activate(host, &swap)?;
    if let Some(ref guard) = swap_file {
        log::debug!("Temporary swap at {} until exit", guard.path().display());
    }
    check_interrupted(interrupted)?;

    steps::write::install(&files, &settings.config_dir)?;
    check_interrupted(interrupted)?;

    if let Some((program, args)) = settings.exec.split_first() {
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        cmd::run_interactive(program, &args)?;
    }

    ui::print_success("Done.");
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// `configuration.nix` is only generated when absent, or when asked to
/// replace it.
fn writes_configuration(host: &dyn Host, settings: &Settings) -> bool {
    settings.overwrite || !host.exists(&settings.config_dir.join(CONFIGURATION_FILE))
}

/// Checks that the process is running as root (UID 0).
fn check_root() -> Result<(), InstallerError> {
    let uid = std::fs::read_to_string("/proc/self/status")
        .ok()
        .and_then(|s| {
            s.lines()
                .find(|l| l.starts_with("Uid:"))
                .and_then(|l| l.split_whitespace().nth(1))
                .and_then(|v| v.parse::<u32>().ok())
        })
        .unwrap_or(1); // default to non-root if unreadable

    if uid != 0 {
        return Err(InstallerError::NotRoot);
    }

    Ok(())
}
