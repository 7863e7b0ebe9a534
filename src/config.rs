//! Validated run configuration.
//!
//! [`AppConfig::from_cli`] is the only place that inspects raw arguments. It
//! runs before any network activity so that a misconfigured deployment fails
//! fast with a [`ConfigError`].

use crate::cli::Cli;
use crate::digest::TRUNCATION_MARKER;
use crate::sources::{FeedRegistry, SourcesError, default_force_render_domains};
use crate::utils::mask_secret;
use itertools::Itertools;
use std::error::Error;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

#[derive(Debug)]
pub enum ConfigError {
    MissingApiKey,
    MissingDestinations,
    Sources(SourcesError),
    Invalid { setting: &'static str, reason: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::MissingApiKey => write!(f, "OPENAI_API_KEY is not set"),
            ConfigError::MissingDestinations => {
                write!(f, "SERVER_CHAN_KEYS is not set (use --dry-run to skip delivery)")
            }
            ConfigError::Sources(e) => write!(f, "{e}"),
            ConfigError::Invalid { setting, reason } => write!(f, "invalid {setting}: {reason}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ConfigError::Sources(e) => Some(e),
            _ => None,
        }
    }
}

impl From<SourcesError> for ConfigError {
    fn from(e: SourcesError) -> Self {
        ConfigError::Sources(e)
    }
}

/// Whether and how the render tier is available.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderMode {
    Disabled,
    /// Probe `PATH` for a known browser.
    Detect,
    Binary(PathBuf),
}

/// Immutable settings for one run.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub registry: FeedRegistry,
    pub force_render_domains: Vec<String>,
    pub api_key: String,
    pub api_base: String,
    pub model: String,
    pub server_chan_keys: Vec<String>,
    pub max_per_source: usize,
    pub max_concurrency: usize,
    pub per_host_concurrency: usize,
    pub render: RenderMode,
    pub render_fallback: bool,
    pub run_timeout: Duration,
    pub max_digest_length: usize,
    pub max_links: usize,
    pub max_corpus_chars: usize,
    pub utc_offset_hours: i32,
    pub dry_run: bool,
}

fn at_least(setting: &'static str, value: usize, min: usize) -> Result<usize, ConfigError> {
    if value < min {
        return Err(ConfigError::Invalid {
            setting,
            reason: format!("{value} is below the minimum of {min}"),
        });
    }
    Ok(value)
}

impl AppConfig {
    pub fn from_cli(cli: &Cli) -> Result<Self, ConfigError> {
        let api_key = cli
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or(ConfigError::MissingApiKey)?
            .to_string();

        let server_chan_keys: Vec<String> = cli
            .server_chan_keys
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(String::from)
            .unique()
            .collect();
        if server_chan_keys.is_empty() && !cli.dry_run {
            return Err(ConfigError::MissingDestinations);
        }

        match url::Url::parse(&cli.api_base) {
            Ok(u) if matches!(u.scheme(), "http" | "https") => {}
            _ => {
                return Err(ConfigError::Invalid {
                    setting: "api base url",
                    reason: format!("{:?} is not an http(s) url", cli.api_base),
                });
            }
        }
        if cli.model.trim().is_empty() {
            return Err(ConfigError::Invalid {
                setting: "model",
                reason: "must not be empty".to_string(),
            });
        }
        if !(-12..=14).contains(&cli.utc_offset_hours) {
            return Err(ConfigError::Invalid {
                setting: "utc offset",
                reason: format!("{} is outside -12..=14", cli.utc_offset_hours),
            });
        }

        let (registry, mut force_render_domains) = match &cli.sources {
            Some(path) => FeedRegistry::load(path)?,
            None => (FeedRegistry::default(), Vec::new()),
        };
        force_render_domains.extend(default_force_render_domains());
        force_render_domains.extend(cli.force_render_domains.iter().cloned());
        let force_render_domains = force_render_domains
            .into_iter()
            .map(|d| d.trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|d| !d.is_empty())
            .unique()
            .collect();

        let render = if cli.no_render {
            RenderMode::Disabled
        } else {
            match &cli.browser {
                Some(path) => RenderMode::Binary(path.clone()),
                None => RenderMode::Detect,
            }
        };

        let config = Self {
            registry,
            force_render_domains,
            api_key,
            api_base: cli.api_base.trim_end_matches('/').to_string(),
            model: cli.model.trim().to_string(),
            server_chan_keys,
            max_per_source: at_least("max per source", cli.max_per_source, 1)?,
            max_concurrency: at_least("max concurrency", cli.max_concurrency, 1)?,
            per_host_concurrency: at_least("per-host concurrency", cli.per_host_concurrency, 1)?,
            render,
            render_fallback: cli.render_fallback,
            run_timeout: Duration::from_secs(at_least("run timeout", cli.run_timeout_secs as usize, 1)? as u64),
            max_digest_length: at_least(
                "max digest length",
                cli.max_digest_length,
                TRUNCATION_MARKER.chars().count(),
            )?,
            max_links: cli.max_links,
            max_corpus_chars: at_least("max corpus chars", cli.max_corpus_chars, 1)?,
            utc_offset_hours: cli.utc_offset_hours,
            dry_run: cli.dry_run,
        };
        config.log_summary();
        Ok(config)
    }

    fn log_summary(&self) {
        info!(
            categories = self.registry.categories().count(),
            feeds = self.registry.len(),
            api_base = %self.api_base,
            model = %self.model,
            api_key = %mask_secret(&self.api_key),
            destinations = %self.server_chan_keys.iter().map(|k| mask_secret(k)).join(","),
            render = ?self.render,
            render_fallback = self.render_fallback,
            dry_run = self.dry_run,
            "Configuration loaded"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::io::Write;

    fn cli(args: &[&str]) -> Cli {
        let mut full = vec!["finance_digest"];
        full.extend_from_slice(args);
        let mut cli = Cli::parse_from(full);
        if !args.contains(&"--api-key") {
            cli.api_key = Some("sk-test".to_string());
        }
        if !args.contains(&"--server-chan-keys") {
            cli.server_chan_keys = Some("SCT1abcd, SCT2efgh ,SCT1abcd".to_string());
        }
        cli.api_base = crate::api::DEFAULT_API_BASE.to_string();
        cli.model = crate::api::DEFAULT_MODEL.to_string();
        cli
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_cli(&cli(&[])).unwrap();
        assert_eq!(config.registry, FeedRegistry::default());
        assert_eq!(config.server_chan_keys, vec!["SCT1abcd", "SCT2efgh"]);
        assert_eq!(config.render, RenderMode::Detect);
        assert!(config.force_render_domains.contains(&"36kr.com".to_string()));
        assert_eq!(config.run_timeout, Duration::from_secs(600));
    }

    #[test]
    fn test_missing_api_key() {
        let mut args = cli(&[]);
        args.api_key = Some("   ".to_string());
        assert!(matches!(AppConfig::from_cli(&args), Err(ConfigError::MissingApiKey)));
        args.api_key = None;
        assert!(matches!(AppConfig::from_cli(&args), Err(ConfigError::MissingApiKey)));
    }

    #[test]
    fn test_destinations_required_unless_dry_run() {
        let mut args = cli(&[]);
        args.server_chan_keys = Some(" , ".to_string());
        assert!(matches!(AppConfig::from_cli(&args), Err(ConfigError::MissingDestinations)));

        args.dry_run = true;
        let config = AppConfig::from_cli(&args).unwrap();
        assert!(config.server_chan_keys.is_empty());
    }

    #[test]
    fn test_nonsensical_limits() {
        for flags in [
            vec!["--max-per-source", "0"],
            vec!["--max-concurrency", "0"],
            vec!["--max-digest-length", "10"],
            vec!["--utc-offset-hours", "30"],
        ] {
            let err = AppConfig::from_cli(&cli(&flags)).unwrap_err();
            assert!(matches!(err, ConfigError::Invalid { .. }), "{flags:?}");
        }
    }

    #[test]
    fn test_bad_api_base() {
        let mut args = cli(&[]);
        args.api_base = "ftp://example.com".to_string();
        assert!(matches!(AppConfig::from_cli(&args), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_sources_file_and_render_flags() {
        let mut file = tempfile_path("sources_ok.yaml");
        writeln!(
            file.1,
            "categories:\n  - name: Markets\n    sources:\n      - name: Wire\n        url: https://wire.example/rss\nforce_render_domains: [\"Wire.Example\"]"
        )
        .unwrap();

        let mut args = cli(&["--no-render", "--force-render-domain", ".extra.example"]);
        args.sources = Some(file.0.clone());
        let config = AppConfig::from_cli(&args).unwrap();

        assert_eq!(config.registry.len(), 1);
        assert_eq!(config.render, RenderMode::Disabled);
        assert!(config.force_render_domains.contains(&"wire.example".to_string()));
        assert!(config.force_render_domains.contains(&"extra.example".to_string()));
        std::fs::remove_file(&file.0).ok();
    }

    #[test]
    fn test_unreadable_sources_file() {
        let mut args = cli(&[]);
        args.sources = Some(PathBuf::from("/nonexistent/feeds.yaml"));
        assert!(matches!(
            AppConfig::from_cli(&args),
            Err(ConfigError::Sources(SourcesError::Io(_)))
        ));
    }

    fn tempfile_path(name: &str) -> (PathBuf, std::fs::File) {
        let path = std::env::temp_dir().join(format!("finance_digest_{}_{name}", std::process::id()));
        let file = std::fs::File::create(&path).unwrap();
        (path, file)
    }
}
