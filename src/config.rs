use crate::{
    models::{Label, Partition},
    services::{
        analyzer::AnalyzerTools, enumerator::ListingFilter, persister::DedupMode,
        pipeline::DEFAULT_CONCURRENCY, tools::ToolCommand,
    },
};
use anyhow::{Context, Result, anyhow};
use clap::Parser;
use std::{env, path::PathBuf, str::FromStr, time::Duration};

const ENV_PREFIX: &str = "META_HARVESTER_";
const MAX_PAGE_SIZE: usize = 1000;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub total: usize,
    pub source_url: String,
    pub database_url: String,
    pub scratch_dir: PathBuf,
    pub malicious_prefix: String,
    pub clean_prefix: String,
    pub delimiter: String,
    pub listing_markers: Vec<String>,
    pub page_size: usize,
    pub concurrency: usize,
    pub dedup: DedupMode,
    pub fetch_timeout: Duration,
    pub tool_timeout: Duration,
    pub db_acquire_timeout: Duration,
    pub db_max_connections: u32,
    pub arch_tool: ToolCommand,
    pub imports_tool: Option<ToolCommand>,
    pub exports_tool: Option<ToolCommand>,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Collect fingerprints and static attributes of stored samples"
)]
pub struct Args {
    /// Total number of objects to process, split evenly across partitions
    #[arg(required_unless_present = "migrate")]
    pub total: Option<usize>,

    /// Bucket URL or local directory (overrides META_HARVESTER_SOURCE_URL)
    #[arg(long)]
    pub source_url: Option<String>,

    /// Database URL (overrides META_HARVESTER_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Scratch directory for downloads (overrides META_HARVESTER_SCRATCH_DIR)
    #[arg(long)]
    pub scratch_dir: Option<PathBuf>,

    /// Maximum concurrently processed objects (overrides META_HARVESTER_CONCURRENCY)
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Listing page size (overrides META_HARVESTER_PAGE_SIZE)
    #[arg(long)]
    pub page_size: Option<usize>,

    /// Dedup strategy: `check` or `atomic` (overrides META_HARVESTER_DEDUP)
    #[arg(long)]
    pub dedup: Option<String>,

    /// Apply the schema and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        Ok((Self::from_args(args)?, migrate))
    }

    /// Merge parsed CLI args over the environment and built-in defaults.
    pub fn from_args(args: Args) -> Result<Self> {
        let source_url = match args.source_url {
            Some(url) => url,
            None if args.migrate => env_or("SOURCE_URL", ""),
            None => env::var(format!("{ENV_PREFIX}SOURCE_URL"))
                .context("no source configured: pass --source-url or set META_HARVESTER_SOURCE_URL")?,
        };
        let dedup = match args.dedup {
            Some(value) => DedupMode::from_str(&value).map_err(|e| anyhow!(e))?,
            None => env_parsed("DEDUP", DedupMode::CheckThenInsert)?,
        };
        let defaults = AnalyzerTools::default();

        Ok(Self {
            total: args.total.unwrap_or(0),
            source_url,
            database_url: args
                .database_url
                .unwrap_or_else(|| env_or("DATABASE_URL", "sqlite://./data/meta/meta.db")),
            scratch_dir: args.scratch_dir.unwrap_or_else(|| {
                env::var(format!("{ENV_PREFIX}SCRATCH_DIR"))
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| env::temp_dir().join("meta-harvester"))
            }),
            malicious_prefix: env_or("MALICIOUS_PREFIX", "0/"),
            clean_prefix: env_or("CLEAN_PREFIX", "1/"),
            delimiter: env_or("DELIMITER", "/"),
            listing_markers: env_or("LISTING_MARKERS", "")
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            page_size: args
                .page_size
                .map(Ok)
                .unwrap_or_else(|| env_parsed("PAGE_SIZE", MAX_PAGE_SIZE))?
                .clamp(1, MAX_PAGE_SIZE),
            concurrency: args
                .concurrency
                .map(Ok)
                .unwrap_or_else(|| env_parsed("CONCURRENCY", DEFAULT_CONCURRENCY))?
                .max(1),
            dedup,
            fetch_timeout: Duration::from_secs(env_parsed("FETCH_TIMEOUT_SECS", 300)?),
            tool_timeout: Duration::from_secs(env_parsed("TOOL_TIMEOUT_SECS", 60)?),
            db_acquire_timeout: Duration::from_secs(env_parsed("DB_ACQUIRE_TIMEOUT_SECS", 30)?),
            db_max_connections: env_parsed("DB_MAX_CONNECTIONS", 20)?,
            arch_tool: match env::var(format!("{ENV_PREFIX}ARCH_TOOL")) {
                Ok(line) => ToolCommand::parse(&line)
                    .context("META_HARVESTER_ARCH_TOOL must name a program")?,
                Err(_) => defaults.architecture,
            },
            imports_tool: env_tool("IMPORTS_TOOL", defaults.imports),
            exports_tool: env_tool("EXPORTS_TOOL", defaults.exports),
        })
    }

    pub fn malicious_partition(&self) -> Partition {
        Partition::new(Label::Malicious, self.malicious_prefix.clone())
    }

    pub fn clean_partition(&self) -> Partition {
        Partition::new(Label::Clean, self.clean_prefix.clone())
    }

    pub fn listing_filter(&self) -> ListingFilter {
        ListingFilter {
            delimiter: self.delimiter.clone(),
            marker_names: self.listing_markers.clone(),
        }
    }

    pub fn analyzer_tools(&self) -> AnalyzerTools {
        AnalyzerTools {
            architecture: self.arch_tool.clone(),
            imports: self.imports_tool.clone(),
            exports: self.exports_tool.clone(),
        }
    }
}

fn env_or(name: &str, default: &str) -> String {
    env::var(format!("{ENV_PREFIX}{name}")).unwrap_or_else(|_| default.into())
}

fn env_parsed<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let key = format!("{ENV_PREFIX}{name}");
    match env::var(&key) {
        Ok(value) => value
            .parse::<T>()
            .map_err(|err| anyhow!("parsing {} value `{}`: {}", key, value, err)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", key)),
    }
}

/// An empty value disables the tool; an unset one keeps the default.
fn env_tool(name: &str, default: Option<ToolCommand>) -> Option<ToolCommand> {
    match env::var(format!("{ENV_PREFIX}{name}")) {
        Ok(line) => ToolCommand::parse(&line),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_overrides_and_defaults() {
        let args = Args::try_parse_from([
            "meta-harvester",
            "7",
            "--source-url",
            "http://127.0.0.1:3000/samples",
            "--concurrency",
            "2",
            "--page-size",
            "5000",
            "--dedup",
            "atomic",
        ])
        .unwrap();
        let cfg = AppConfig::from_args(args).unwrap();
        assert_eq!(cfg.total, 7);
        assert_eq!(cfg.concurrency, 2);
        assert_eq!(cfg.page_size, MAX_PAGE_SIZE);
        assert_eq!(cfg.dedup, DedupMode::Atomic);
        assert_eq!(cfg.malicious_partition().label, Label::Malicious);
    }

    #[test]
    fn total_is_required_unless_migrating() {
        assert!(Args::try_parse_from(["meta-harvester"]).is_err());
        let args = Args::try_parse_from(["meta-harvester", "--migrate"]).unwrap();
        assert!(args.migrate);
        assert!(args.total.is_none());
    }
}
