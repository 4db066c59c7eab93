//! Configuration loading.
//!
//! Files are loaded in order (later wins, table by table):
//! 1. `~/.config/bandmate/config.toml` (user)
//! 2. `./bandmate.toml` (local override, or an explicit path)
//! 3. Environment variables (`BANDMATE_*`)
//!
//! ```toml
//! [session]
//! tick_rate_hz = 30.0
//!
//! [context]
//! tempo_bpm = 120.0
//! key = "C"
//!
//! [[agents]]
//! id = "drummer"
//! kind = "drums"
//! ```

use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    time::Duration,
};

use bandmate_core::{MusicalContext, TimeSignature, output::DEFAULT_HISTORY_LIMIT};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

const ENV_TEMPO: &str = "BANDMATE_TEMPO";
const ENV_TICK_RATE: &str = "BANDMATE_TICK_RATE";
const ENV_LOG_LEVEL: &str = "BANDMATE_LOG_LEVEL";

/// Accepted `tick_rate_hz` range: one tick per 1000 s up to one per ms.
pub const TICK_RATE_RANGE: std::ops::RangeInclusive<f64> = 0.001..=1000.0;
const MIN_PERIOD: Duration = Duration::from_millis(1);
const MAX_PERIOD: Duration = Duration::from_secs(1000);

/// Tick loop settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Ticks per second when driven by the built-in clock.
    pub tick_rate_hz: f64,
    /// Maximum deliveries per settle pass.
    pub settle_limit: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            tick_rate_hz: 30.0,
            settle_limit: 10_000,
        }
    }
}

impl SessionSettings {
    /// Nominal wall time between ticks, clamped to `[1 ms, 1000 s]`.
    ///
    /// Rates that produce no representable period fall back to the slowest one.
    #[must_use]
    pub fn period(&self) -> Duration {
        Duration::try_from_secs_f64(1.0 / self.tick_rate_hz)
            .unwrap_or(MAX_PERIOD)
            .clamp(MIN_PERIOD, MAX_PERIOD)
    }
}

/// Initial musical context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextSettings {
    pub tempo_bpm: f64,
    pub key: String,
    pub section: String,
    pub beats_per_bar: u32,
    pub beat_unit: u32,
    pub dynamics: f64,
    /// Start with the transport playing.
    pub autoplay: bool,
}

impl Default for ContextSettings {
    fn default() -> Self {
        Self {
            tempo_bpm: 120.0,
            key: "C".to_string(),
            section: "verse".to_string(),
            beats_per_bar: 4,
            beat_unit: 4,
            dynamics: 0.5,
            autoplay: true,
        }
    }
}

impl ContextSettings {
    /// Build the initial context.
    #[must_use]
    pub fn to_context(&self) -> MusicalContext {
        let mut context = MusicalContext::new(
            self.tempo_bpm,
            self.key.clone(),
            TimeSignature {
                beats_per_bar: self.beats_per_bar,
                beat_unit: self.beat_unit,
            },
        );
        context.section.clone_from(&self.section);
        context.set_dynamics(self.dynamics);
        context.is_playing = self.autoplay;
        context
    }
}

/// Pending-intent expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpectationSettings {
    /// Bars an unfulfilled expectation survives past its target bar.
    pub expiry_bars: u64,
}

impl Default for ExpectationSettings {
    fn default() -> Self {
        Self { expiry_bars: 2 }
    }
}

/// Output history retention.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    pub history_limit: usize,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Instrument an agent plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Drums,
    Bass,
}

/// One `[[agents]]` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSpec {
    pub id: String,
    pub kind: AgentKind,
    #[serde(default = "default_responsiveness")]
    pub responsiveness: f64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Agents that receive fill events directly (drums). Empty means broadcast.
    #[serde(default)]
    pub listeners: Vec<String>,
    /// Agent to query for its groove on section changes (bass).
    #[serde(default)]
    pub groove_partner: Option<String>,
}

const fn default_responsiveness() -> f64 {
    0.7
}

const fn default_enabled() -> bool {
    true
}

/// Complete configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BandConfig {
    pub session: SessionSettings,
    pub context: ContextSettings,
    pub expectations: ExpectationSettings,
    pub outputs: OutputSettings,
    pub logging: LoggingSettings,
    pub agents: Vec<AgentSpec>,
}

/// Where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    pub files: Vec<PathBuf>,
    pub env_overrides: Vec<String>,
}

impl BandConfig {
    /// Load from the standard locations and the environment.
    ///
    /// # Errors
    /// Returns error if a discovered file cannot be read or parsed, or the
    /// result is invalid.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None).map(|(config, _)| config)
    }

    /// Load, with `path` replacing the local `./bandmate.toml` override.
    ///
    /// # Errors
    /// Returns error if a file cannot be read or parsed, or the result is invalid.
    pub fn load_from(path: Option<&Path>) -> Result<(Self, ConfigSources), ConfigError> {
        let files = discover_config_files(path);
        let mut merged = toml::Table::new();
        for file in &files {
            merge_tables(&mut merged, read_table(file)?);
        }

        let mut config = Self::from_table(merged, files.last().map_or(Path::new("<defaults>"), PathBuf::as_path))?;
        let env_overrides = config.apply_env_overrides(|var| std::env::var(var).ok())?;
        config.validate()?;

        tracing::debug!(?files, ?env_overrides, "Loaded configuration");
        Ok((config, ConfigSources { files, env_overrides }))
    }

    /// Parse a single TOML document.
    ///
    /// # Errors
    /// Returns error if the document is malformed or invalid.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let path = Path::new("<string>");
        let config = Self::from_table(parse_table(contents, path)?, path)?;
        config.validate()?;
        Ok(config)
    }

    fn from_table(table: toml::Table, path: &Path) -> Result<Self, ConfigError> {
        toml::Value::Table(table)
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })
    }

    /// Apply `BANDMATE_*` overrides read through `lookup`.
    ///
    /// Returns the names of the variables that were applied.
    ///
    /// # Errors
    /// Returns [`ConfigError::Env`] for unparseable values.
    pub fn apply_env_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Vec<String>, ConfigError> {
        let mut applied = Vec::new();

        if let Some(value) = lookup(ENV_TEMPO) {
            self.context.tempo_bpm = parse_env(ENV_TEMPO, &value)?;
            applied.push(ENV_TEMPO.to_string());
        }
        if let Some(value) = lookup(ENV_TICK_RATE) {
            self.session.tick_rate_hz = parse_env(ENV_TICK_RATE, &value)?;
            applied.push(ENV_TICK_RATE.to_string());
        }
        if let Some(value) = lookup(ENV_LOG_LEVEL) {
            self.logging.level = value;
            applied.push(ENV_LOG_LEVEL.to_string());
        }

        Ok(applied)
    }

    /// Check ranges and agent id uniqueness.
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.context.tempo_bpm.is_finite() && self.context.tempo_bpm > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "context.tempo_bpm must be positive, got {}",
                self.context.tempo_bpm
            )));
        }
        if !TICK_RATE_RANGE.contains(&self.session.tick_rate_hz) {
            return Err(ConfigError::Invalid(format!(
                "session.tick_rate_hz must be within [{}, {}], got {}",
                TICK_RATE_RANGE.start(),
                TICK_RATE_RANGE.end(),
                self.session.tick_rate_hz
            )));
        }
        if self.context.beats_per_bar == 0 {
            return Err(ConfigError::Invalid("context.beats_per_bar must be at least 1".into()));
        }

        let mut seen = HashSet::new();
        for agent in &self.agents {
            if !seen.insert(agent.id.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate agent id {:?}", agent.id)));
            }
            if !(0.0..=1.0).contains(&agent.responsiveness) {
                return Err(ConfigError::Invalid(format!(
                    "agent {:?} responsiveness must be within [0, 1], got {}",
                    agent.id, agent.responsiveness
                )));
            }
        }
        Ok(())
    }

    /// Enabled agent entries, in file order.
    pub fn enabled_agents(&self) -> impl Iterator<Item = &AgentSpec> {
        self.agents.iter().filter(|a| a.enabled)
    }
}

/// Discover config files in load order. Only existing files are returned.
#[must_use]
pub fn discover_config_files(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    if let Some(config_dir) = dirs::config_dir() {
        let user = config_dir.join("bandmate/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
        tracing::warn!(path = %path.display(), "Config path does not exist, ignoring");
    }

    let local = PathBuf::from("bandmate.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

fn read_table(path: &Path) -> Result<toml::Table, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;
    parse_table(&contents, path)
}

fn parse_table(contents: &str, path: &Path) -> Result<toml::Table, ConfigError> {
    contents.parse().map_err(|e: toml::de::Error| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Merge `overlay` into `base`; nested tables merge, everything else replaces.
fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match value {
            toml::Value::Table(incoming) => {
                if let Some(toml::Value::Table(existing)) = base.get_mut(&key) {
                    merge_tables(existing, incoming);
                } else {
                    base.insert(key, toml::Value::Table(incoming));
                }
            }
            other => {
                base.insert(key, other);
            }
        }
    }
}

fn parse_env<T: std::str::FromStr>(var: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Env {
        var: var.to_string(),
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    const BAND: &str = r#"
        [session]
        tick_rate_hz = 0.5

        [context]
        tempo_bpm = 120.0
        key = "E"

        [[agents]]
        id = "drummer"
        kind = "drums"
        listeners = ["bassist"]

        [[agents]]
        id = "bassist"
        kind = "bass"
        responsiveness = 0.8
        groove_partner = "drummer"

        [[agents]]
        id = "spare"
        kind = "bass"
        enabled = false
    "#;

    #[test]
    fn test_parse_with_defaults() {
        let config = BandConfig::from_toml_str(BAND).unwrap();
        assert_eq!(config.session.tick_rate_hz, 0.5);
        assert_eq!(config.session.settle_limit, 10_000);
        assert_eq!(config.context.key, "E");
        assert_eq!(config.context.section, "verse");
        assert_eq!(config.expectations.expiry_bars, 2);
        assert_eq!(config.agents[0].responsiveness, 0.7);
        assert_eq!(config.agents[1].groove_partner.as_deref(), Some("drummer"));

        let enabled: Vec<&str> = config.enabled_agents().map(|a| a.id.as_str()).collect();
        assert_eq!(enabled, ["drummer", "bassist"]);
    }

    #[test]
    fn test_empty_document_is_default() {
        assert_eq!(BandConfig::from_toml_str("").unwrap(), BandConfig::default());
    }

    #[test]
    fn test_rejects_duplicate_agents() {
        let toml = r#"
            [[agents]]
            id = "drummer"
            kind = "drums"
            [[agents]]
            id = "drummer"
            kind = "bass"
        "#;
        assert!(matches!(
            BandConfig::from_toml_str(toml),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_rejects_bad_responsiveness() {
        let toml = r#"
            [[agents]]
            id = "drummer"
            kind = "drums"
            responsiveness = 1.5
        "#;
        assert!(BandConfig::from_toml_str(toml).is_err());
    }

    #[test]
    fn test_tick_rate_bounds() {
        for rate in ["1e-30", "0.0", "1e12", "-2.0"] {
            let toml = format!("[session]\ntick_rate_hz = {rate}");
            assert!(
                matches!(BandConfig::from_toml_str(&toml), Err(ConfigError::Invalid(_))),
                "rate {rate} accepted"
            );
        }
        assert!(BandConfig::from_toml_str("[session]\ntick_rate_hz = 1000.0").is_ok());
    }

    #[test]
    fn test_period_never_panics() {
        let period = |tick_rate_hz| {
            SessionSettings {
                tick_rate_hz,
                ..SessionSettings::default()
            }
            .period()
        };
        assert_eq!(period(0.5), Duration::from_secs(2));
        assert_eq!(period(1e12), Duration::from_millis(1));
        assert_eq!(period(1e-30), Duration::from_secs(1000));
        assert_eq!(period(0.0), Duration::from_secs(1000));
        assert_eq!(period(f64::NAN), Duration::from_secs(1000));
    }

    #[test]
    fn test_parse_error_reports_path() {
        let err = BandConfig::from_toml_str("[session\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [("BANDMATE_TEMPO", "96"), ("BANDMATE_LOG_LEVEL", "debug")]
            .into_iter()
            .collect();
        let mut config = BandConfig::default();
        let applied = config
            .apply_env_overrides(|var| env.get(var).map(ToString::to_string))
            .unwrap();

        assert_eq!(config.context.tempo_bpm, 96.0);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(applied, ["BANDMATE_TEMPO", "BANDMATE_LOG_LEVEL"]);
    }

    #[test]
    fn test_env_override_parse_error() {
        let mut config = BandConfig::default();
        let err = config
            .apply_env_overrides(|var| (var == "BANDMATE_TICK_RATE").then(|| "fast".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Env { .. }));
    }

    #[test]
    fn test_explicit_file_overrides_tables() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("band.toml");
        std::fs::write(&path, "[context]\ntempo_bpm = 90.0\n").unwrap();

        let (config, sources) = BandConfig::load_from(Some(&path)).unwrap();
        assert_eq!(sources.files.last(), Some(&path));
        assert_eq!(config.context.key, "C");
        if sources.env_overrides.is_empty() {
            assert_eq!(config.context.tempo_bpm, 90.0);
        }
    }

    #[test]
    fn test_merge_tables_is_deep() {
        let mut base: toml::Table = "[context]\nkey = \"C\"\ntempo_bpm = 100.0".parse().unwrap();
        let overlay: toml::Table = "[context]\nkey = \"G\"".parse().unwrap();
        merge_tables(&mut base, overlay);

        let config = BandConfig::from_table(base, Path::new("test")).unwrap();
        assert_eq!(config.context.key, "G");
        assert_eq!(config.context.tempo_bpm, 100.0);
    }

    #[test]
    fn test_context_from_settings() {
        let settings = ContextSettings {
            section: "intro".to_string(),
            autoplay: false,
            ..ContextSettings::default()
        };
        let ctx = settings.to_context();
        assert_eq!(ctx.section, "intro");
        assert!(!ctx.is_playing);
        assert_eq!(ctx.time_signature.beats_per_bar, 4);
    }
}
