mod cli;
mod error;
mod logging;
mod presenter;
mod settings;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use log::{info, warn};

use lexicon_core::{
    GitHubReleaseSource, HttpTransport, InstallLayout, ReleaseSource, StdFileSystem,
    UpdateCoordinator, UpdateHandle, VersionIdentifier, cleanup_stale_artifacts, spawn_worker,
};
use lexicon_platform::AppPaths;

use crate::cli::{Cli, Command};
use crate::error::AppError;
use crate::presenter::{FlowMode, FlowOutcome, StdinPrompt, run_flow};
use crate::settings::{AppSettings, CheckTrigger, PRODUCT};

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(error) => {
            log::error!("{error}");
            eprintln!("lexicon: {error}");
            ExitCode::FAILURE
        }
    }
}

struct Context {
    paths: AppPaths,
    settings: AppSettings,
    install_path: PathBuf,
    current: VersionIdentifier,
}

fn run(cli: Cli) -> Result<ExitCode, AppError> {
    let paths = match &cli.root_dir {
        Some(root) => AppPaths::under(root),
        None => AppPaths::new().map_err(|error| AppError::startup("paths", error))?,
    };
    paths
        .ensure_dirs()
        .map_err(|error| AppError::startup("directories", error))?;

    let settings_path = cli.config.clone().unwrap_or_else(|| paths.settings_file());
    let settings = AppSettings::load_from(&settings_path);
    if !settings_path.exists()
        && let Err(error) = settings.save_to(&settings_path)
    {
        eprintln!("lexicon: could not write default settings: {error}");
    }

    logging::init_logging(
        &paths.log_file(),
        settings.debug_logging || cli.debug,
        settings.max_log_size_bytes,
    );

    let current = VersionIdentifier::parse(env!("CARGO_PKG_VERSION"))
        .map_err(|error| AppError::startup("version", error.to_string()))?;
    let install_path = match cli.install_path.clone().or(settings.update.install_path.clone()) {
        Some(path) => path,
        None => lexicon_platform::current_executable()
            .map_err(|error| AppError::startup("install path", error))?,
    };
    info!(
        "Lexicon {current} starting, install path {}",
        install_path.display()
    );

    let context = Context {
        paths,
        settings,
        install_path,
        current,
    };

    match cli.command {
        Some(Command::Cleanup) => {
            run_cleanup(&context, true);
            Ok(ExitCode::SUCCESS)
        }
        Some(Command::ReleasePage) => open_release_page(&context),
        Some(Command::Check) => {
            run_update(&context, FlowMode::CheckOnly).map(|_| ExitCode::SUCCESS)
        }
        Some(Command::Update { yes }) => {
            run_cleanup(&context, false);
            let mode = if yes {
                FlowMode::AutoConfirm
            } else {
                FlowMode::Interactive
            };
            run_update(&context, mode).map(|_| ExitCode::SUCCESS)
        }
        None => launch(&context),
    }
}

fn launch(context: &Context) -> Result<ExitCode, AppError> {
    run_cleanup(context, false);

    if context.settings.update.check_trigger == CheckTrigger::OnLaunch {
        match run_update(context, FlowMode::Interactive) {
            // The new build takes over from here.
            Ok(FlowOutcome::Restarting { .. }) => return Ok(ExitCode::SUCCESS),
            Ok(_) => {}
            Err(error @ (AppError::UpdateDeclined | AppError::WorkerStopped)) => {
                return Err(error);
            }
            Err(error) => warn!("Continuing without update: {error}"),
        }
    }

    println!("Lexicon {} is ready.", context.current);
    Ok(ExitCode::SUCCESS)
}

fn run_cleanup(context: &Context, verbose: bool) {
    let layout = InstallLayout::for_executable(&context.install_path);
    match cleanup_stale_artifacts(
        &StdFileSystem,
        &layout,
        &context.paths.update_staging_dir(),
    ) {
        Ok(report) => {
            if verbose {
                if report.restored_backup {
                    println!("Restored {} from its backup.", layout.install_path.display());
                }
                for path in &report.removed {
                    println!("Removed {}", path.display());
                }
                if report.staging_in_use {
                    println!("Another update is in progress; staging files were left alone.");
                }
                if report == lexicon_core::CleanupReport::default() {
                    println!("Nothing to clean up.");
                }
            }
        }
        Err(error) => {
            warn!("Startup cleanup failed: {error}");
            if verbose {
                eprintln!("lexicon: cleanup failed: {error}");
            }
        }
    }
}

fn build_runtime() -> Result<tokio::runtime::Runtime, AppError> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|error| AppError::startup("runtime", error))
}

fn http_client(settings: &AppSettings) -> reqwest::Client {
    // No overall timeout: long downloads are bounded per chunk instead.
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(settings.connect_timeout_secs))
        .user_agent(format!("{PRODUCT}/{}", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_default()
}

fn release_source(settings: &AppSettings, client: reqwest::Client) -> GitHubReleaseSource {
    GitHubReleaseSource::new(client, PRODUCT, settings.update.repo.clone())
        .include_prereleases(settings.update.include_prereleases)
}

fn start_updater(context: &Context, runtime: &tokio::runtime::Runtime) -> UpdateHandle {
    let client = http_client(&context.settings);
    let config = context.settings.update.updater_config(
        context.install_path.clone(),
        context.paths.update_staging_dir(),
    );
    let (sender, receiver) = crossbeam_channel::unbounded();
    let coordinator = UpdateCoordinator::new(
        config,
        Arc::new(release_source(&context.settings, client.clone())),
        Arc::new(HttpTransport::new(client)),
        Arc::new(StdFileSystem),
        sender,
    );
    spawn_worker(coordinator, receiver, runtime.handle())
}

fn run_update(context: &Context, mode: FlowMode) -> Result<FlowOutcome, AppError> {
    let runtime = build_runtime()?;
    let handle = start_updater(context, &runtime);

    let mut stdout = std::io::stdout();
    let result = run_flow(
        &handle,
        &context.current,
        mode,
        &mut StdinPrompt,
        &mut stdout,
    );
    runtime.block_on(handle.shutdown());

    let outcome = result?;
    match &outcome {
        FlowOutcome::UpToDate => {
            println!("Lexicon {} is up to date.", context.current);
        }
        FlowOutcome::Available { release, mandatory } => {
            println!(
                "Lexicon {} is available (you have {}).",
                release.version, context.current
            );
            if *mandatory {
                println!("This version is no longer supported; run `lexicon update`.");
            }
        }
        FlowOutcome::Declined => println!("Update skipped."),
        FlowOutcome::Cancelled => println!("Update cancelled."),
        FlowOutcome::Restarting { pid } => {
            info!("Updated build running as process {pid}, exiting");
            println!("Restarting into the new version...");
        }
        FlowOutcome::InstalledRestartManually { version } => {
            println!("Lexicon {version} was installed. Restart Lexicon to use it.");
        }
    }
    Ok(outcome)
}

fn open_release_page(context: &Context) -> Result<ExitCode, AppError> {
    let runtime = build_runtime()?;
    let source = release_source(&context.settings, http_client(&context.settings));

    let url = match runtime.block_on(source.latest_release()) {
        Ok(Some(release)) => release
            .release_page
            .unwrap_or_else(|| context.settings.update.releases_page()),
        Ok(None) => context.settings.update.releases_page(),
        Err(error) => {
            warn!("Could not look up the latest release: {error}");
            context.settings.update.releases_page()
        }
    };

    info!("Opening {url}");
    open::that(&url).map_err(|error| AppError::open_failed(url.clone(), error))?;
    Ok(ExitCode::SUCCESS)
}
