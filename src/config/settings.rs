//! Connection settings and CLI arguments for sisense-kit
//!
//! A connection is either read from a YAML file or built from an explicit
//! domain and token. The CLI carries one connection for the source
//! environment and an optional second one for migration targets.

use crate::error::{IoResultExt, Result, SdkError};
use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Port used by Sisense on Linux when TLS is not terminated in front of it
pub const NON_SSL_PORT: u16 = 30845;

/// Default request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

fn default_true() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT.as_secs()
}

/// Connection parameters for one Sisense environment
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Host name, cleaned of scheme, trailing slash and port
    pub domain: String,
    /// Static API bearer token
    pub token: String,
    /// Use HTTPS on the default port, otherwise HTTP on port 30845
    #[serde(default = "default_true")]
    pub is_ssl: bool,
    /// Verify the server certificate
    #[serde(default)]
    pub verify_ssl: bool,
    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

// Tokens never reach the logs.
impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("domain", &self.domain)
            .field("token", &"***")
            .field("is_ssl", &self.is_ssl)
            .field("verify_ssl", &self.verify_ssl)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl ConnectionConfig {
    /// Build a config from an explicit domain and token
    pub fn new(domain: impl AsRef<str>, token: impl Into<String>) -> Self {
        Self {
            domain: clean_domain(domain.as_ref()),
            token: token.into(),
            is_ssl: true,
            verify_ssl: false,
            timeout_secs: default_timeout_secs(),
        }
    }

    /// Set whether HTTPS is used
    pub fn with_ssl(mut self, is_ssl: bool) -> Self {
        self.is_ssl = is_ssl;
        self
    }

    /// Set whether certificates are verified
    pub fn with_verify_ssl(mut self, verify: bool) -> Self {
        self.verify_ssl = verify;
        self
    }

    /// Set the request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = timeout.as_secs();
        self
    }

    /// Load a config from a YAML file with `domain`, `token` and optional `is_ssl`
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).with_path(path)?;
        Self::from_yaml_str(&raw)
            .map_err(|e| e.with_context(format!("loading {}", path.display())))
    }

    /// Parse a YAML document into a config
    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        let mut config: ConnectionConfig = serde_yml::from_str(raw)?;
        config.domain = clean_domain(&config.domain);
        config.validate()?;
        Ok(config)
    }

    /// Pick a config from a YAML path or a domain/token pair.
    ///
    /// A YAML path wins when present. Supplying only one of `domain` and
    /// `token` is rejected.
    pub fn resolve(
        yaml: Option<&Path>,
        domain: Option<&str>,
        token: Option<&str>,
    ) -> Result<Self> {
        if let Some(path) = yaml {
            return Self::from_yaml_file(path);
        }
        match (domain, token) {
            (Some(domain), Some(token)) => {
                let config = Self::new(domain, token);
                config.validate()?;
                Ok(config)
            }
            (Some(_), None) | (None, Some(_)) => Err(SdkError::invalid(
                "both domain and token must be provided together",
            )),
            (None, None) => Err(SdkError::config(
                "either a YAML config file or a domain and token is required",
            )),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.domain.is_empty() {
            return Err(SdkError::config("domain is required"));
        }
        if self.token.trim().is_empty() {
            return Err(SdkError::config("token is required"));
        }
        Ok(())
    }

    /// Base URL for API calls
    pub fn base_url(&self) -> String {
        if self.is_ssl {
            format!("https://{}", self.domain)
        } else {
            format!("http://{}:{}", self.domain, NON_SSL_PORT)
        }
    }

    /// Request timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Strip scheme, trailing slash and port from a domain
pub fn clean_domain(domain: &str) -> String {
    let trimmed = domain.trim();
    let without_scheme = trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"))
        .unwrap_or(trimmed);
    let host = without_scheme.trim_end_matches('/');
    let host = host.split('/').next().unwrap_or(host);
    match host.rsplit_once(':') {
        Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name.to_string(),
        _ => host.to_string(),
    }
}

/// Conflict policy for dashboard bulk import
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ImportAction {
    /// Leave dashboards that already exist on the target untouched
    Skip,
    /// Replace existing dashboards
    Overwrite,
    /// Import as a new copy
    Duplicate,
}

impl ImportAction {
    /// Query-string value
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Skip => "skip",
            Self::Overwrite => "overwrite",
            Self::Duplicate => "duplicate",
        }
    }
}

/// Conflict policy for data model import
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DatamodelAction {
    /// Import over the model with the same OID
    Overwrite,
    /// Import as a new model with a new title
    Duplicate,
}

/// Optional parts of a data model export
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "camelCase")]
pub enum Dependency {
    /// Row-level security and its scope
    #[value(name = "dataSecurity")]
    DataSecurity,
    /// Saved formulas
    #[value(name = "formulas")]
    Formulas,
    /// Drill hierarchies
    #[value(name = "hierarchies")]
    Hierarchies,
    /// Perspectives
    #[value(name = "perspectives")]
    Perspectives,
}

impl Dependency {
    /// All dependencies, used when none are requested explicitly
    pub const ALL: [Dependency; 4] = [
        Self::DataSecurity,
        Self::Formulas,
        Self::Hierarchies,
        Self::Perspectives,
    ];

    /// Identifiers the export endpoint expects for this dependency
    pub fn api_ids(&self) -> &'static [&'static str] {
        match self {
            Self::DataSecurity => &["dataContext", "scopeConfiguration"],
            Self::Formulas => &["formulaManagement"],
            Self::Hierarchies => &["drillHierarchies"],
            Self::Perspectives => &["perspectives"],
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per event
    Json,
}

/// Health check selected by `wellcheck --check`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum WellcheckKind {
    /// Pivot, tabber, accordion and jump-target counts per dashboard
    Structure,
    /// Widgets per dashboard
    Widgets,
    /// Pivot widgets over the field threshold
    PivotFields,
    /// Custom tables and their use of union
    CustomTables,
    /// Tables outside every relationship
    IslandTables,
    /// Datatypes of columns used by data security
    RlsDatatypes,
    /// Tables with an import query
    ImportQueries,
    /// Many-to-many relationships
    M2m,
    /// Every check above
    #[default]
    Full,
}

impl WellcheckKind {
    /// True for checks that take data model references
    pub fn on_datamodels(&self) -> bool {
        matches!(
            self,
            Self::CustomTables | Self::IslandTables | Self::RlsDatatypes | Self::ImportQueries | Self::M2m
        )
    }
}

/// sisense-kit - Sisense REST API toolkit
#[derive(Parser, Debug, Clone)]
#[command(name = "sisense-kit")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Administer and migrate Sisense environments over the REST API")]
#[command(long_about = r#"
sisense-kit wraps the Sisense REST API for user, group, dashboard and data
model administration and migrates them between environments.

Examples:
  sisense-kit --config source.yaml users
  sisense-kit --config source.yaml dashboards --name "Sales" --shares
  sisense-kit --config source.yaml --target-config target.yaml migrate-groups --all
  sisense-kit --config src.yaml --target-config dst.yaml migrate-dashboards --all --action skip
  sisense-kit --config source.yaml wellcheck --dashboard "Sales" --datamodel "Commerce"
  sisense-kit --config source.yaml wellcheck --check pivot-fields --max-fields 15 --dashboard "Sales"
"#)]
pub struct CliArgs {
    /// YAML connection file for the source environment
    #[arg(long, env = "SISENSE_CONFIG", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Source domain (with --token)
    #[arg(long, env = "SISENSE_DOMAIN")]
    pub domain: Option<String>,

    /// Source API token (with --domain)
    #[arg(long, env = "SISENSE_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// YAML connection file for the migration target
    #[arg(long, env = "SISENSE_TARGET_CONFIG", value_name = "PATH")]
    pub target_config: Option<PathBuf>,

    /// Target domain (with --target-token)
    #[arg(long, env = "SISENSE_TARGET_DOMAIN")]
    pub target_domain: Option<String>,

    /// Target API token (with --target-domain)
    #[arg(long, env = "SISENSE_TARGET_TOKEN", hide_env_values = true)]
    pub target_token: Option<String>,

    /// Request timeout (e.g. 30s, 5m)
    #[arg(long, default_value = "5m", value_name = "DURATION")]
    pub timeout: String,

    /// Verify TLS certificates
    #[arg(long)]
    pub verify_ssl: bool,

    /// Verbose output (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Log output format
    #[arg(long, value_enum, default_value = "text")]
    pub log_format: LogFormat,

    /// Log file path
    #[arg(long, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Write row output to a CSV file
    #[arg(long, value_name = "PATH", global = true)]
    pub csv: Option<PathBuf>,

    /// Print row output as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Subcommand
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// List users, or show one user by email
    #[command(name = "users")]
    Users {
        /// User email
        #[arg(long)]
        email: Option<String>,
    },

    /// Show a group, or list members of every group
    #[command(name = "groups")]
    Groups {
        /// Group name
        #[arg(long)]
        name: Option<String>,
        /// List member user names
        #[arg(long)]
        members: bool,
    },

    /// Inspect dashboards
    #[command(name = "dashboards")]
    Dashboards {
        /// Dashboard OID
        #[arg(long, conflicts_with = "name")]
        id: Option<String>,
        /// Dashboard title
        #[arg(long)]
        name: Option<String>,
        /// Show shares instead of metadata
        #[arg(long)]
        shares: bool,
        /// Show the columns referenced by the dashboard
        #[arg(long, requires = "name")]
        columns: bool,
    },

    /// Inspect data models
    #[command(name = "datamodels")]
    Datamodels {
        /// Data model title
        #[arg(long)]
        name: Option<String>,
        /// Flatten datasets, tables and columns
        #[arg(long, requires = "name")]
        describe: bool,
        /// Show data security rules
        #[arg(long, requires = "name")]
        security: bool,
        /// Report which columns dashboards use
        #[arg(long, requires = "name")]
        unused_columns: bool,
    },

    /// Migrate groups to the target environment
    #[command(name = "migrate-groups")]
    MigrateGroups {
        /// Group names
        #[arg(required_unless_present = "all")]
        names: Vec<String>,
        /// Migrate every group except built-in ones
        #[arg(long)]
        all: bool,
    },

    /// Migrate users to the target environment
    #[command(name = "migrate-users")]
    MigrateUsers {
        /// User emails
        #[arg(required_unless_present = "all")]
        emails: Vec<String>,
        /// Migrate every user except super admins
        #[arg(long)]
        all: bool,
    },

    /// Migrate dashboards to the target environment
    #[command(name = "migrate-dashboards")]
    MigrateDashboards {
        /// Dashboard OIDs
        #[arg(long, num_args = 1.., conflicts_with = "names")]
        ids: Vec<String>,
        /// Dashboard titles
        #[arg(long, num_args = 1..)]
        names: Vec<String>,
        /// Migrate every dashboard in batches
        #[arg(long, conflicts_with_all = ["ids", "names"])]
        all: bool,
        /// Conflict policy for dashboards that already exist
        #[arg(long, value_enum)]
        action: Option<ImportAction>,
        /// Republish dashboards after import
        #[arg(long)]
        republish: bool,
        /// Copy shares to the imported dashboards
        #[arg(long)]
        migrate_share: bool,
        /// Hand ownership to the source owner (requires --migrate-share)
        #[arg(long, requires = "migrate_share")]
        change_ownership: bool,
        /// Dashboards per bulk request
        #[arg(long, default_value = "10")]
        batch_size: usize,
        /// Pause between batches (e.g. 10s)
        #[arg(long, default_value = "10s", value_name = "DURATION")]
        pause: String,
    },

    /// Migrate data models to the target environment
    #[command(name = "migrate-datamodels")]
    MigrateDatamodels {
        /// Data model OIDs
        #[arg(long, num_args = 1.., conflicts_with = "names")]
        ids: Vec<String>,
        /// Data model titles
        #[arg(long, num_args = 1..)]
        names: Vec<String>,
        /// Migrate every data model in batches
        #[arg(long, conflicts_with_all = ["ids", "names"])]
        all: bool,
        /// Conflict policy
        #[arg(long, value_enum)]
        action: Option<DatamodelAction>,
        /// Title for a duplicated model
        #[arg(long)]
        new_title: Option<String>,
        /// Export dependencies to include (default: all)
        #[arg(long, value_enum, num_args = 1..)]
        dependencies: Vec<Dependency>,
        /// Copy data model shares
        #[arg(long)]
        shares: bool,
        /// Provider to target connection OID (e.g. Snowflake=64f0...)
        #[arg(long = "connection", value_name = "PROVIDER=OID")]
        connections: Vec<String>,
        /// Data models per batch
        #[arg(long, default_value = "10")]
        batch_size: usize,
        /// Pause between batches (e.g. 5s)
        #[arg(long, default_value = "5s", value_name = "DURATION")]
        pause: String,
    },

    /// Run dashboard and data model health checks
    #[command(name = "wellcheck")]
    Wellcheck {
        /// Dashboard OIDs or titles
        #[arg(long = "dashboard", value_name = "REF", num_args = 1..)]
        dashboards: Vec<String>,
        /// Data model OIDs or titles
        #[arg(long = "datamodel", value_name = "REF", num_args = 1..)]
        datamodels: Vec<String>,
        /// Check to run
        #[arg(long, value_enum, default_value = "full")]
        check: WellcheckKind,
        /// Pivot widgets with more fields than this are reported
        #[arg(long, default_value = "20")]
        max_fields: usize,
    },
}

impl CliArgs {
    /// Source connection from the CLI
    pub fn source_config(&self) -> Result<ConnectionConfig> {
        let config = ConnectionConfig::resolve(
            self.config.as_deref(),
            self.domain.as_deref(),
            self.token.as_deref(),
        )?;
        self.apply_overrides(config)
    }

    /// Target connection from the CLI
    pub fn target_config(&self) -> Result<ConnectionConfig> {
        let config = ConnectionConfig::resolve(
            self.target_config.as_deref(),
            self.target_domain.as_deref(),
            self.target_token.as_deref(),
        )
        .map_err(|e| e.with_context("target environment"))?;
        self.apply_overrides(config)
    }

    fn apply_overrides(&self, config: ConnectionConfig) -> Result<ConnectionConfig> {
        let timeout = parse_duration(&self.timeout)?;
        let verify = self.verify_ssl || config.verify_ssl;
        Ok(config.with_timeout(timeout).with_verify_ssl(verify))
    }
}

/// Parse a human-readable duration such as `10s` or `2m`
pub fn parse_duration(value: &str) -> Result<Duration> {
    humantime::parse_duration(value.trim())
        .map_err(|e| SdkError::invalid(format!("invalid duration '{}': {}", value, e)))
}

/// Parse `PROVIDER=OID` pairs into a map
pub fn parse_connection_map(
    pairs: &[String],
) -> Result<std::collections::HashMap<String, String>> {
    pairs
        .iter()
        .map(|pair| match pair.split_once('=') {
            Some((provider, oid)) if !provider.is_empty() && !oid.is_empty() => {
                Ok((provider.trim().to_string(), oid.trim().to_string()))
            }
            _ => Err(SdkError::invalid(format!(
                "connection mapping '{}' must look like PROVIDER=OID",
                pair
            ))),
        })
        .collect()
}
