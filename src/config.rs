//! Configuration loading: a flat TOML file via `serde`, with CLI flags
//! layered on top as overrides after the file is parsed.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::access::{AccessControl, AccessRule};
use crate::checks::CheckList;

/// `[identity]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Simulator name advertised in welcomes and FRDP IDENT.
    pub simulator: String,
    /// Router name advertised in FRDP IDENT and ROUTERINFO.
    pub router: String,
    /// If true, an invariant violation exits the process non-zero instead
    /// of logging and continuing.
    #[serde(default)]
    pub stop_minded: bool,
}

/// `[listen]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenConfig {
    /// TCP port downstream clients and peer routers connect to.
    pub port: u16,
    /// REST API port; defaults to 8747 when unset.
    #[serde(default = "default_rest_api_port")]
    pub rest_api_port: u16,
}

fn default_rest_api_port() -> u16 {
    8747
}

/// One `[[upstream]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Whether this is the upstream used at startup.
    #[serde(default)]
    pub default: bool,
    /// Human-readable label.
    pub name: String,
    /// Upstream hostname.
    pub host: String,
    /// Upstream TCP port.
    pub port: u16,
    /// FRDP AUTH password sent to this upstream, if it's a peer router.
    #[serde(default)]
    pub password: String,
}

/// `[log]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Whether to write the traffic log at all.
    #[serde(default)]
    pub traffic: bool,
    /// Directory the traffic/output logs live in.
    #[serde(default = "default_log_dir")]
    pub directory: PathBuf,
    /// Traffic log rotation size in bytes (0/absent disables rotation).
    #[serde(default)]
    pub traffic_max_size: u64,
    /// Number of rotated traffic log files to keep.
    #[serde(default)]
    pub traffic_keep_versions: u32,
    /// Output (stdout/status) log rotation size in bytes.
    #[serde(default)]
    pub output_max_size: u64,
    /// Number of rotated output log files to keep.
    #[serde(default)]
    pub output_keep_versions: u32,
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("./logs")
}

impl Default for LogConfig {
    fn default() -> LogConfig {
        LogConfig {
            traffic: false,
            directory: default_log_dir(),
            traffic_max_size: 0,
            traffic_keep_versions: 0,
            output_max_size: 0,
            output_keep_versions: 0,
        }
    }
}

/// `[psx]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PsxConfig {
    /// Path to the variable catalogue file.
    pub variables: PathBuf,
    /// Suppress elevation-injection keywords.
    #[serde(default)]
    pub filter_elevation: bool,
    /// Suppress traffic/TCAS keywords.
    #[serde(default)]
    pub filter_traffic: bool,
    /// Suppress flight-control axis keywords; defaults to on.
    #[serde(default = "default_true")]
    pub filter_flight_controls: bool,
    /// Optional path for the periodic cache snapshot. Absent disables the
    /// feature.
    pub cache_snapshot_path: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

/// One `[[access]]` entry, before CIDR/level parsing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessConfigEntry {
    /// Human-readable label.
    pub display_name: String,
    /// `"ANY"` or a list of CIDR strings.
    pub match_ipv4: Vec<String>,
    /// Required FRDP AUTH password, if any.
    pub match_password: Option<String>,
    /// `blocked` | `full` | `observer`.
    pub level: String,
}

/// One `[[check]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckConfigEntry {
    /// `is_frankenrouter` | `name_regexp`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Regexp source, required when `kind == "name_regexp"`.
    pub regexp: Option<String>,
    /// Minimum allowed value (for version-range checks).
    pub limit_min: Option<String>,
    /// Maximum allowed value.
    pub limit_max: Option<String>,
    /// Free-text note shown in diagnostics.
    pub comment: Option<String>,
}

/// `[performance]` section: warning thresholds, all informational.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerformanceConfig {
    /// Write-buffer depth warning, in bytes.
    #[serde(default)]
    pub write_buffer_warn_bytes: Option<u64>,
    /// Queue-time warning, in milliseconds.
    #[serde(default)]
    pub queue_time_warn_ms: Option<u64>,
    /// Total end-to-end delay warning, in milliseconds.
    #[serde(default)]
    pub total_delay_warn_ms: Option<u64>,
    /// Status-monitor loop delay warning, in milliseconds.
    #[serde(default)]
    pub monitor_delay_warn_ms: Option<u64>,
    /// FRDP round-trip-time warning, in milliseconds.
    #[serde(default)]
    pub frdp_rtt_warn_ms: Option<u64>,
}

/// The full, parsed configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// `[identity]`.
    pub identity: IdentityConfig,
    /// `[listen]`.
    pub listen: ListenConfig,
    /// `[[upstream]]`.
    #[serde(rename = "upstream", default)]
    pub upstreams: Vec<UpstreamConfig>,
    /// `[log]`.
    #[serde(default)]
    pub log: LogConfig,
    /// `[psx]`.
    pub psx: PsxConfig,
    /// `[[access]]`, order-significant.
    #[serde(rename = "access", default)]
    pub access: Vec<AccessConfigEntry>,
    /// `[[check]]`.
    #[serde(rename = "check", default)]
    pub checks: Vec<CheckConfigEntry>,
    /// `[performance]`.
    #[serde(default)]
    pub performance: PerformanceConfig,
}

/// CLI overrides applied after the config file is parsed; every CLI option
/// takes precedence over the matching config-file value.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    /// `--variables-file`.
    pub variables_file: Option<PathBuf>,
    /// `--log-traffic`.
    pub log_traffic: bool,
}

impl Config {
    /// Load and validate a config file, then apply CLI overrides.
    ///
    /// Fails fast on an unparseable TOML document, an invalid CIDR in
    /// `[[access]]`, or an unknown access level — never starts routing in a
    /// half-valid state.
    pub fn load(path: &Path, overrides: &CliOverrides) -> Result<Config> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let mut config: Config =
            toml::from_str(&text).with_context(|| format!("parsing config file {}", path.display()))?;

        if let Some(vars) = &overrides.variables_file {
            config.psx.variables = vars.clone();
        }
        if overrides.log_traffic {
            config.log.traffic = true;
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        // Build (and discard) the access control list and check list purely
        // to surface CIDR/level/regexp errors at load time instead of at
        // first connection.
        self.build_access_control()?;
        self.build_checks()?;
        if self.upstreams.is_empty() {
            anyhow::bail!("config must declare at least one [[upstream]]");
        }
        if self.upstreams.iter().filter(|u| u.default).count() > 1 {
            anyhow::bail!("at most one [[upstream]] may be marked default");
        }
        Ok(())
    }

    /// Build the ordered [`AccessControl`] evaluator from `[[access]]`.
    pub fn build_access_control(&self) -> Result<AccessControl> {
        let mut rules = Vec::with_capacity(self.access.len());
        for entry in &self.access {
            rules.push(AccessRule::new(
                entry.display_name.clone(),
                &entry.match_ipv4,
                entry.match_password.clone(),
                &entry.level,
            )?);
        }
        Ok(AccessControl::new(rules))
    }

    /// Compile the `[[check]]` list into a [`CheckList`].
    pub fn build_checks(&self) -> Result<CheckList> {
        CheckList::load(&self.checks)
    }

    /// The upstream marked `default`, or the first declared upstream.
    pub fn default_upstream(&self) -> &UpstreamConfig {
        self.upstreams
            .iter()
            .find(|u| u.default)
            .unwrap_or(&self.upstreams[0])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f
    }

    const MINIMAL: &str = r#"
[identity]
simulator = "PSX"
router = "R1"

[listen]
port = 6111

[[upstream]]
default = true
name = "main"
host = "localhost"
port = 10747
password = ""

[psx]
variables = "vars.txt"
"#;

    #[test]
    fn loads_minimal_config_with_defaults() {
        let f = write_config(MINIMAL);
        let cfg = Config::load(f.path(), &CliOverrides::default()).unwrap();
        assert_eq!(cfg.listen.rest_api_port, 8747);
        assert!(cfg.psx.filter_flight_controls);
        assert!(!cfg.identity.stop_minded);
    }

    #[test]
    fn cli_override_forces_log_traffic() {
        let f = write_config(MINIMAL);
        let overrides = CliOverrides {
            variables_file: None,
            log_traffic: true,
        };
        let cfg = Config::load(f.path(), &overrides).unwrap();
        assert!(cfg.log.traffic);
    }

    #[test]
    fn invalid_cidr_fails_at_load() {
        let bad = format!(
            "{MINIMAL}\n[[access]]\ndisplay_name = \"x\"\nmatch_ipv4 = [\"not-a-cidr\"]\nlevel = \"full\"\n"
        );
        let f = write_config(&bad);
        assert!(Config::load(f.path(), &CliOverrides::default()).is_err());
    }

    #[test]
    fn invalid_check_regexp_fails_at_load() {
        let bad = format!(
            "{MINIMAL}\n[[check]]\ntype = \"name_regexp\"\nregexp = \"(unterminated\"\n"
        );
        let f = write_config(&bad);
        assert!(Config::load(f.path(), &CliOverrides::default()).is_err());
    }

    #[test]
    fn no_upstream_fails_at_load() {
        let bad = r#"
[identity]
simulator = "PSX"
router = "R1"
[listen]
port = 6111
[psx]
variables = "vars.txt"
"#;
        let f = write_config(bad);
        assert!(Config::load(f.path(), &CliOverrides::default()).is_err());
    }
}
