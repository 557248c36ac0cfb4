use clap::Parser;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use tracker_indexer::config::CoordinatorConfig;
use tracker_indexer::error::ConfigError;
use tracker_indexer::logging::{LogConfig, init_logging};
use tracker_indexer::source::json_file::DEFAULT_PAGE_SIZE;
use tracker_indexer::{Coordinator, DirectoryIndexSink, FileWatermarkStore, JsonFileSource};

const INSTANCE_NAME: &str = "tracker";

const MAX_JOBS_ENV: &str = "TRACKER_INDEXER_MAX_JOBS";
const INCREMENTAL_SECS_ENV: &str = "TRACKER_INDEXER_INCREMENTAL_SECS";
const FULL_SECS_ENV: &str = "TRACKER_INDEXER_FULL_SECS";
const PAGE_SIZE_ENV: &str = "TRACKER_INDEXER_PAGE_SIZE";
const PROJECTS_ENV: &str = "TRACKER_INDEXER_PROJECTS";
const EXCLUDE_ENV: &str = "TRACKER_INDEXER_EXCLUDE";

/// CLI arguments for the tracker indexer
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON file with the tracker's projects and items
    #[arg(long, value_name = "FILE")]
    source: PathBuf,

    /// JSON file holding per-project watermarks
    #[arg(long, value_name = "FILE", default_value = "watermarks.json")]
    watermarks: PathBuf,

    /// Directory receiving one JSON document per indexed item
    #[arg(long, value_name = "DIR", default_value = "index")]
    index_dir: PathBuf,

    /// Maximum number of concurrently running project jobs (overrides TRACKER_INDEXER_MAX_JOBS)
    #[arg(long, value_name = "N")]
    max_jobs: Option<usize>,

    /// Seconds between incremental runs of a project (overrides TRACKER_INDEXER_INCREMENTAL_SECS)
    #[arg(long, value_name = "SECS")]
    incremental_secs: Option<u64>,

    /// Seconds between scheduled full runs, 0 disables them (overrides TRACKER_INDEXER_FULL_SECS)
    #[arg(long, value_name = "SECS")]
    full_secs: Option<u64>,

    /// Items requested per page (overrides TRACKER_INDEXER_PAGE_SIZE)
    #[arg(long, value_name = "N")]
    page_size: Option<usize>,

    /// Index only these projects instead of every project of the source (overrides TRACKER_INDEXER_PROJECTS)
    #[arg(long, value_name = "KEYS", value_delimiter = ',')]
    projects: Vec<String>,

    /// Never index these projects (overrides TRACKER_INDEXER_EXCLUDE)
    #[arg(long, value_name = "KEYS", value_delimiter = ',')]
    exclude: Vec<String>,

    /// Request a full reindex of one project, or of all projects when no key is given
    #[arg(long, value_name = "PROJECT", num_args = 0..=1)]
    force_full: Option<Option<String>>,

    /// Run a single scheduling tick, wait for its jobs and print the status as JSON
    #[arg(long)]
    once: bool,

    /// Log level (overrides RUST_LOG env var)
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Log file path (overrides TRACKER_INDEXER_LOG_FILE env var)
    #[arg(long, value_name = "FILE")]
    log_file: Option<PathBuf>,
}

/// Settings resolved from CLI arguments, environment and defaults
#[derive(Debug)]
struct Settings {
    config: CoordinatorConfig,
    page_size: usize,
}

/// Parse an environment value, reporting the variable name on failure
fn env_value<T>(lookup: &dyn Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    lookup(name)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|e| ConfigError::invalid_value(name, format!("'{raw}': {e}")))
        })
        .transpose()
}

/// Comma separated keys from the environment
fn env_list(lookup: &dyn Fn(&str) -> Option<String>, name: &str) -> Vec<String> {
    lookup(name)
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|key| !key.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// CLI value first, then the environment variable
fn resolve<T>(
    cli: Option<T>,
    lookup: &dyn Fn(&str) -> Option<String>,
    name: &str,
) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match cli {
        Some(value) => Ok(Some(value)),
        None => env_value(lookup, name),
    }
}

fn resolve_list(cli: &[String], lookup: &dyn Fn(&str) -> Option<String>, name: &str) -> Vec<String> {
    if cli.is_empty() {
        env_list(lookup, name)
    } else {
        cli.to_vec()
    }
}

/// Resolve settings with priority CLI > env > default
fn resolve_settings(
    args: &Args,
    lookup: &dyn Fn(&str) -> Option<String>,
) -> Result<Settings, ConfigError> {
    let page_size = resolve(args.page_size, lookup, PAGE_SIZE_ENV)?.unwrap_or(DEFAULT_PAGE_SIZE);
    if page_size == 0 {
        return Err(ConfigError::invalid_value(
            "page_size",
            "at least one item per page is required",
        ));
    }

    let mut builder = CoordinatorConfig::builder()
        .exclude_projects(resolve_list(&args.exclude, lookup, EXCLUDE_ENV));

    if let Some(max_jobs) = resolve(args.max_jobs, lookup, MAX_JOBS_ENV)? {
        builder = builder.max_concurrent_jobs(max_jobs);
    }
    if let Some(secs) = resolve(args.incremental_secs, lookup, INCREMENTAL_SECS_ENV)? {
        builder = builder.incremental_period(Duration::from_secs(secs));
    }
    if let Some(secs) = resolve(args.full_secs, lookup, FULL_SECS_ENV)? {
        builder = builder.full_update_period(Duration::from_secs(secs));
    }
    let projects = resolve_list(&args.projects, lookup, PROJECTS_ENV);
    if !projects.is_empty() {
        builder = builder.project_keys(projects);
    }

    Ok(Settings {
        config: builder.build()?,
        page_size,
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let log_config = LogConfig::from_env().with_overrides(args.log_level.clone(), args.log_file.clone());
    if let Err(e) = init_logging(log_config) {
        eprintln!("Failed to initialize logging: {e}");
        std::process::exit(1);
    }

    let settings = match resolve_settings(&args, &|name: &str| std::env::var(name).ok()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Invalid configuration: {e}");
            std::process::exit(1);
        }
    };

    info!(
        "Starting tracker indexer: source {}, watermarks {}, index {}",
        args.source.display(),
        args.watermarks.display(),
        args.index_dir.display()
    );

    let coordinator = Arc::new(Coordinator::new(
        INSTANCE_NAME,
        settings.config,
        Arc::new(JsonFileSource::new(&args.source, settings.page_size)),
        Arc::new(DirectoryIndexSink::new(&args.index_dir)),
        Arc::new(FileWatermarkStore::new(&args.watermarks)),
    ));

    if let Some(project) = &args.force_full {
        let forced = coordinator.force_full_reindex(project.as_deref()).await?;
        if forced.is_empty() {
            eprintln!("No tracked project matches {:?}", project.as_deref().unwrap_or(""));
        }
    }

    if args.once {
        if let Err(e) = coordinator.tick().await {
            error!("Scheduling tick failed: {}", e);
            std::process::exit(1);
        }
        coordinator
            .wait_for_running_jobs(Duration::from_millis(100))
            .await;

        let status = coordinator.status().await;
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    let coordination = coordinator.spawn();

    tokio::signal::ctrl_c().await?;
    info!("Interrupt received, shutting down");

    for handle in coordinator.shutdown().await {
        handle.join().await;
    }
    coordination.await?;

    info!("Tracker indexer stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn parse(args: &[&str]) -> Args {
        let mut argv = vec!["tracker-indexer", "--source", "tracker.json"];
        argv.extend_from_slice(args);
        Args::try_parse_from(argv).unwrap()
    }

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let args = parse(&[]);
        assert_eq!(args.watermarks, PathBuf::from("watermarks.json"));
        assert!(args.force_full.is_none());

        let settings = resolve_settings(&args, &env(&[])).unwrap();
        assert_eq!(settings.config, CoordinatorConfig::default());
        assert_eq!(settings.page_size, DEFAULT_PAGE_SIZE);
    }

    #[test]
    fn test_cli_values_reach_config() {
        let args = parse(&[
            "--max-jobs",
            "4",
            "--full-secs",
            "0",
            "--page-size",
            "20",
            "--projects",
            "ORG,OPS",
            "--exclude",
            "OPS",
        ]);
        let settings = resolve_settings(&args, &env(&[])).unwrap();

        assert_eq!(settings.config.max_concurrent_jobs, 4);
        assert!(!settings.config.full_updates_enabled());
        assert_eq!(settings.page_size, 20);
        assert_eq!(
            settings.config.project_keys,
            Some(vec!["ORG".to_string(), "OPS".to_string()])
        );
        assert_eq!(settings.config.excluded_project_keys, vec!["OPS".to_string()]);
    }

    #[test]
    fn test_environment_fills_missing_cli_values() {
        let lookup = env(&[
            (MAX_JOBS_ENV, "3"),
            (INCREMENTAL_SECS_ENV, "60"),
            (FULL_SECS_ENV, "0"),
            (PAGE_SIZE_ENV, "25"),
            (PROJECTS_ENV, "ORG, DEV,"),
            (EXCLUDE_ENV, "DEV"),
        ]);
        let settings = resolve_settings(&parse(&[]), &lookup).unwrap();

        assert_eq!(settings.config.max_concurrent_jobs, 3);
        assert_eq!(settings.config.incremental_period, Duration::from_secs(60));
        assert!(!settings.config.full_updates_enabled());
        assert_eq!(settings.page_size, 25);
        assert_eq!(
            settings.config.project_keys,
            Some(vec!["ORG".to_string(), "DEV".to_string()])
        );
        assert_eq!(settings.config.excluded_project_keys, vec!["DEV".to_string()]);
    }

    #[test]
    fn test_cli_wins_over_environment() {
        let lookup = env(&[(MAX_JOBS_ENV, "3"), (PROJECTS_ENV, "DEV")]);
        let settings =
            resolve_settings(&parse(&["--max-jobs", "2", "--projects", "ORG"]), &lookup).unwrap();

        assert_eq!(settings.config.max_concurrent_jobs, 2);
        assert_eq!(settings.config.project_keys, Some(vec!["ORG".to_string()]));
    }

    #[test]
    fn test_force_full_with_and_without_project() {
        assert_eq!(parse(&["--force-full"]).force_full, Some(None));
        assert_eq!(
            parse(&["--force-full", "ORG"]).force_full,
            Some(Some("ORG".to_string()))
        );
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let none = env(&[]);
        assert!(resolve_settings(&parse(&["--max-jobs", "0"]), &none).is_err());
        assert!(resolve_settings(&parse(&["--page-size", "0"]), &none).is_err());

        let result = resolve_settings(&parse(&[]), &env(&[(MAX_JOBS_ENV, "many")]));
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { ref field, .. }) if field == MAX_JOBS_ENV
        ));
    }
}
