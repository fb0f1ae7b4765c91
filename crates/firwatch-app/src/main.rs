use std::{env, path::PathBuf, process, sync::Arc, time::Duration};

use firwatch_app::cli::{Cli, Commands, DistrictsArgs, FetchArgs};
use firwatch_app::config::{self, AppConfig};
use firwatch_app::districts::DistrictDirectory;
use firwatch_app::error::AppError;
use firwatch_app::paths::AppPaths;
use firwatch_app::pipeline::{Extraction, NoopObserver, RunEvent, RunObserver, RunState};
use firwatch_app::portal::{ChromiumLauncher, PortalLauncher};
use firwatch_app::server;
use firwatch_app::services::{
    SubmissionValidator, archive_download_name, extraction_settings, launch_options,
    remove_job_artifacts,
};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use tracing_subscriber::{EnvFilter, filter::LevelFilter, fmt};
use uuid::Uuid;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let log_level = determine_log_level(&cli);
    init_tracing(log_level);

    if let Err(err) = run(cli).await {
        eprintln!("{err}");
        process::exit(1);
    }
}

fn init_tracing(level: LevelFilter) {
    let subscriber = fmt()
        .with_env_filter(build_env_filter(level))
        .with_target(false)
        .finish();

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        tracing::warn!("Tracing subscriber already set; skipping re-initialization.");
    }
}

async fn run(cli: Cli) -> Result<(), AppError> {
    let verbosity = cli.verbose;

    match cli.command {
        Some(Commands::Serve(_)) => {
            let config = config::load()?;
            server::serve(config).await?;
        }
        Some(Commands::Fetch(args)) => {
            run_fetch(args, verbosity).await?;
        }
        Some(Commands::Districts(args)) => {
            run_districts(args)?;
        }
        None => {
            Cli::print_help();
        }
    }

    Ok(())
}

fn run_districts(args: DistrictsArgs) -> Result<(), AppError> {
    let cfg = config::load()?;
    let directory = DistrictDirectory::load(cfg.portal.district_file.as_deref())?;
    for district in directory.iter() {
        if args.codes {
            println!("{}\t{}", district.name, district.code);
        } else {
            println!("{}", district.name);
        }
    }
    Ok(())
}

async fn run_fetch(args: FetchArgs, verbosity: u8) -> Result<(), AppError> {
    let mut cfg: AppConfig = config::load()?;
    if args.headed {
        cfg.portal.headless = false;
    }

    let paths = AppPaths::new(&cfg.storage.path)?;
    let districts = DistrictDirectory::load(cfg.portal.district_file.as_deref())?;
    let params = SubmissionValidator::new(&districts, cfg.jobs.max_range_days).validate(
        &args.from,
        &args.to,
        &args.district,
    )?;
    let output_dir = resolve_output_dir(args.output)?;

    let progress = (verbosity == 0).then(make_progress_bar);
    let observer: Arc<dyn RunObserver> = match &progress {
        Some(pb) => Arc::new(SpinnerObserver { pb: pb.clone() }),
        None => Arc::new(NoopObserver),
    };
    let launcher: Arc<dyn PortalLauncher> = Arc::new(ChromiumLauncher::new(launch_options(&cfg)));
    let extraction = Extraction::new(launcher, extraction_settings(&cfg), paths.clone(), observer)?;

    let job_id = Uuid::new_v4().to_string();
    tracing::info!(
        job_id = %job_id,
        district = %params.district.name,
        from = %args.from,
        to = %args.to,
        "starting one-shot extraction"
    );

    let summary = match extraction.run(&job_id, &params).await {
        Ok(summary) => summary,
        Err(err) => {
            if let Some(pb) = &progress {
                pb.abandon_with_message(format!("failed: {err}"));
            }
            return Err(err.into());
        }
    };

    let destination = output_dir.join(archive_download_name(&params));
    tokio::fs::create_dir_all(&output_dir)
        .await
        .map_err(|source| AppError::Output {
            path: output_dir.clone(),
            source,
        })?;
    tokio::fs::copy(&summary.archive.path, &destination)
        .await
        .map_err(|source| AppError::Output {
            path: destination.clone(),
            source,
        })?;
    remove_job_artifacts(&paths, &job_id).await?;

    if let Some(pb) = progress {
        pb.finish_with_message(format!(
            "Completed: {} file(s), {} page(s), {} skipped ({:?})",
            summary.files_downloaded, summary.pages_visited, summary.rows_skipped, summary.end_reason
        ));
    } else {
        tracing::info!(
            files = summary.files_downloaded,
            pages = summary.pages_visited,
            skipped = summary.rows_skipped,
            end_reason = ?summary.end_reason,
            download_setup = ?summary.download_setup,
            "extraction completed successfully"
        );
    }
    println!("{}", destination.display());
    Ok(())
}

struct SpinnerObserver {
    pb: ProgressBar,
}

impl RunObserver for SpinnerObserver {
    fn on_event(&self, _job_id: &str, event: RunEvent) {
        match event {
            RunEvent::State(RunState::Done | RunState::Failed) => {}
            RunEvent::State(state) => self.pb.set_message(state.to_string()),
            RunEvent::TotalRecords(total) => self.pb.set_length(total),
            RunEvent::RowScanned { .. } => self.pb.inc(1),
            RunEvent::FileSaved { file_name, .. } => {
                self.pb.println(format!("saved {file_name}"));
            }
            RunEvent::RowSkipped { page, reason } => {
                self.pb.println(format!("skipped a row on page {page}: {reason}"));
            }
            RunEvent::Ended(_) => {}
        }
    }
}

fn make_progress_bar() -> ProgressBar {
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::with_template(
            "{spinner:.cyan} [{elapsed_precise}] {pos}/{len} rows ({eta}) {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_draw_target(ProgressDrawTarget::stderr_with_hz(12));
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

fn resolve_output_dir(path: Option<PathBuf>) -> Result<PathBuf, AppError> {
    let cwd = env::current_dir().map_err(AppError::WorkingDir)?;
    Ok(match path {
        Some(path) if path.is_absolute() => path,
        Some(path) => cwd.join(path),
        None => cwd,
    })
}

/// `RUST_LOG` wins when set. Otherwise the verbosity level applies, with the
/// browser protocol handler held at `warn`.
fn build_env_filter(level: LevelFilter) -> EnvFilter {
    if env::var_os(EnvFilter::DEFAULT_ENV).is_some() {
        return EnvFilter::builder()
            .with_default_directive(level.into())
            .from_env_lossy();
    }
    EnvFilter::builder()
        .with_default_directive(level.into())
        .parse_lossy(default_directives(level))
}

fn default_directives(level: LevelFilter) -> String {
    if level == LevelFilter::OFF {
        "off".to_string()
    } else {
        format!("{level},chromiumoxide=warn")
    }
}

fn determine_log_level(cli: &Cli) -> LevelFilter {
    match cli.command.as_ref() {
        Some(Commands::Fetch(_)) | Some(Commands::Districts(_)) => match cli.verbose {
            0 => LevelFilter::OFF,
            1 => LevelFilter::INFO,
            2 => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        },
        Some(Commands::Serve(_)) | None => match cli.verbose {
            0 => LevelFilter::INFO,
            1 => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        },
    }
}
