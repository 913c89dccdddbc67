use std::{collections::BTreeMap, fs, path::Path};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use vigil_common::crypto;

use crate::core::alerts::Severity;

// Default paths for the command surface
pub const DEFAULT_CONFIG_FILE: &str = "config.yml";
pub const DEFAULT_STATE_FILE: &str = ".vigil-state.json";

// bind addresses
pub const DEFAULT_LISTEN_PORT: u16 = 8888;
pub const DEFAULT_PROMETHEUS_PORT: u16 = 28686;

// Millis per second, to prevent having random 1000 values anywhere
pub const MILLIS_PER_SECOND: u64 = 1000;

// Monitoring cadences
// time in seconds between alert rule evaluations per chain
pub const RULE_EVAL_DELAY: u64 = 2;
// time in seconds between validator state refreshes
pub const VALIDATOR_REFRESH_DELAY: u64 = 60;
// time in seconds between endpoint health probes
pub const ENDPOINT_PROBE_DELAY: u64 = 15;
// time in seconds between public fallback registry refreshes
pub const PUBLIC_FALLBACK_REFRESH_DELAY: u64 = 12 * 3600;
// time in seconds between best-effort state snapshots
pub const STATE_SAVE_DELAY: u64 = 300;

// Websocket reconnect backoff bounds in seconds
pub const WS_BACKOFF_MIN: u64 = 1;
pub const WS_BACKOFF_MAX: u64 = 30;

// Channel capacities
// subscriber frames, blocking send applies backpressure to reads
pub const FRAME_CHANNEL_SIZE: usize = 64;
// outbound alerts to the notifier worker
pub const NOTIFY_CHANNEL_SIZE: usize = 128;
// dashboard broadcast fan-out
pub const DASHBOARD_CHANNEL_SIZE: usize = 256;
// recent log lines kept for the dashboard
pub const LOG_RING_SIZE: usize = 256;

// Timeouts
// per-request HTTP deadline
pub const HTTP_TIMEOUT: u64 = 10;
// notification send deadline
pub const NOTIFY_TIMEOUT: u64 = 30;
// graceful shutdown drain window
pub const SHUTDOWN_DRAIN: u64 = 10;

// Alarm cache rules
// a paging alert that re-fires within this window is flapping
pub const FLAP_SUPPRESS_SECONDS: u64 = 5 * 60;
// persisted alarm entries older than this are discarded on load
pub const STALE_ALARM_MAX_AGE_SECONDS: u64 = 24 * 3600;

// Alert rule defaults, used when neither the chain nor the
// default_alert_config sets a value
pub const DEFAULT_STALLED_MINUTES: u32 = 10;
pub const DEFAULT_CONSECUTIVE_MISSED: u32 = 5;
pub const DEFAULT_WINDOW_PCT: f64 = 10.0;
pub const DEFAULT_CONSECUTIVE_EMPTY: u32 = 5;
pub const DEFAULT_EMPTY_PCT: f64 = 25.0;
pub const DEFAULT_NODE_DOWN_MINUTES: u32 = 3;
pub const DEFAULT_STAKE_CHANGE_DROP_PCT: f64 = 5.0;
pub const DEFAULT_STAKE_CHANGE_INCREASE_PCT: f64 = 10.0;
pub const DEFAULT_UNCLAIMED_REWARDS_THRESHOLD: f64 = 1000.0;
pub const DEFAULT_GOV_REMINDER_HOURS: u64 = 6;
pub const DEFAULT_FIAT_CURRENCY: &str = "USD";
pub const DEFAULT_FIAT_CACHE_EXPIRATION: &str = "1h";
pub const DEFAULT_HEALTHCHECK_PING_RATE: u64 = 60;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("configuration is invalid:\n{}", _0.join("\n"))]
    Invalid(Vec<String>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub enable_dashboard: bool,
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    pub hide_logs: bool,
    pub node_down_alert_minutes: Option<u32>,
    pub node_down_alert_severity: Option<Severity>,
    pub tls_skip_verify: bool,
    pub prometheus_enabled: bool,
    #[serde(default = "default_prometheus_port")]
    pub prometheus_listen_port: u16,
    pub coin_market_cap_api_token: Option<String>,
    pub convert_to_fiat: FiatConfig,
    pub healthcheck: HealthcheckConfig,
    // hours between reminders for open governance alerts
    pub governance_alerts_reminder_interval: Option<u64>,
    pub default_alert_config: AlertConfig,
    pub chains: IndexMap<String, ChainConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enable_dashboard: false,
            listen_port: default_listen_port(),
            hide_logs: false,
            node_down_alert_minutes: None,
            node_down_alert_severity: None,
            tls_skip_verify: false,
            prometheus_enabled: false,
            prometheus_listen_port: default_prometheus_port(),
            coin_market_cap_api_token: None,
            convert_to_fiat: FiatConfig::default(),
            healthcheck: HealthcheckConfig::default(),
            governance_alerts_reminder_interval: None,
            default_alert_config: AlertConfig::default(),
            chains: IndexMap::new(),
        }
    }
}

fn default_listen_port() -> u16 {
    DEFAULT_LISTEN_PORT
}

fn default_prometheus_port() -> u16 {
    DEFAULT_PROMETHEUS_PORT
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FiatConfig {
    pub enabled: bool,
    pub currency: String,
    // humantime duration string, e.g. "1h"
    pub cache_expiration: String,
}

impl Default for FiatConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            currency: DEFAULT_FIAT_CURRENCY.to_string(),
            cache_expiration: DEFAULT_FIAT_CACHE_EXPIRATION.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthcheckConfig {
    pub enabled: bool,
    pub ping_url: String,
    // seconds between pings
    pub ping_rate: u64,
}

impl Default for HealthcheckConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ping_url: String::new(),
            ping_rate: DEFAULT_HEALTHCHECK_PING_RATE,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    pub chain_id: String,
    pub valoper_address: String,
    pub valcons_override: Option<String>,
    pub public_fallback: bool,
    // chain-registry / CoinMarketCap slug
    pub slug: Option<String>,
    #[serde(rename = "inflationRate")]
    pub inflation_rate: Option<f64>,
    pub provider: Option<ProviderConfig>,
    pub nodes: Vec<NodeConfig>,
    pub alerts: AlertConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub url: String,
    #[serde(default)]
    pub alert_if_down: bool,
}

// Provider selection with a typed-erased config blob.
// The provider validates the shape it expects at construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    #[serde(default)]
    pub configs: serde_yaml::Value,
}

// Every field is optional: unset inherits the default_alert_config
// value, explicitly-set values (including zero) override it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    pub stalled_enabled: Option<bool>,
    pub stalled_minutes: Option<u32>,

    pub consecutive_enabled: Option<bool>,
    pub consecutive_missed: Option<u32>,
    pub consecutive_priority: Option<Severity>,

    pub percentage_enabled: Option<bool>,
    pub window_pct: Option<f64>,
    pub percentage_priority: Option<Severity>,

    pub consecutive_empty_enabled: Option<bool>,
    pub consecutive_empty: Option<u32>,
    pub consecutive_empty_priority: Option<Severity>,

    pub empty_percentage_enabled: Option<bool>,
    pub empty_pct: Option<f64>,
    pub empty_percentage_priority: Option<Severity>,

    pub alert_if_inactive: Option<bool>,
    pub alert_if_no_servers: Option<bool>,

    pub stake_change_enabled: Option<bool>,
    pub stake_change_drop_pct: Option<f64>,
    pub stake_change_increase_pct: Option<f64>,

    pub unclaimed_rewards_enabled: Option<bool>,
    // fiat-converted threshold
    pub unclaimed_rewards_threshold: Option<f64>,

    pub governance_alerts: Option<bool>,

    pub pagerduty: Option<PagerDutyConfig>,
    pub telegram: Option<TelegramConfig>,
    pub discord: Option<DiscordConfig>,
    pub slack: Option<SlackConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PagerDutyConfig {
    pub enabled: bool,
    pub api_key: String,
    pub default_severity_threshold: Severity,
}

impl Default for PagerDutyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: String::new(),
            default_severity_threshold: Severity::Critical,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    pub enabled: bool,
    pub api_key: String,
    pub channel: String,
    pub severity_threshold: Severity,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: String::new(),
            channel: String::new(),
            severity_threshold: Severity::Warning,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscordConfig {
    pub enabled: bool,
    pub webhook: String,
    pub severity_threshold: Severity,
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            webhook: String::new(),
            severity_threshold: Severity::Warning,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SlackConfig {
    pub enabled: bool,
    pub webhook: String,
    pub severity_threshold: Severity,
}

impl Default for SlackConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            webhook: String::new(),
            severity_threshold: Severity::Warning,
        }
    }
}

// Fully resolved per-chain alert settings after merging the chain
// overrides onto default_alert_config and the built-in defaults
#[derive(Debug, Clone)]
pub struct ResolvedAlerts {
    pub stalled_enabled: bool,
    pub stalled_minutes: u32,
    pub consecutive_enabled: bool,
    pub consecutive_missed: u32,
    pub consecutive_priority: Severity,
    pub percentage_enabled: bool,
    pub window_pct: f64,
    pub percentage_priority: Severity,
    pub consecutive_empty_enabled: bool,
    pub consecutive_empty: u32,
    pub consecutive_empty_priority: Severity,
    pub empty_percentage_enabled: bool,
    pub empty_pct: f64,
    pub empty_percentage_priority: Severity,
    pub alert_if_inactive: bool,
    pub alert_if_no_servers: bool,
    pub stake_change_enabled: bool,
    pub stake_change_drop_pct: f64,
    pub stake_change_increase_pct: f64,
    pub unclaimed_rewards_enabled: bool,
    pub unclaimed_rewards_threshold: f64,
    pub governance_alerts: bool,
    pub node_down_minutes: u32,
    pub node_down_severity: Severity,
    pub pagerduty: PagerDutyConfig,
    pub telegram: TelegramConfig,
    pub discord: DiscordConfig,
    pub slack: SlackConfig,
}

impl AlertConfig {
    // Merge: chain value if set, else default_alert_config value,
    // else the built-in default
    pub fn resolve(&self, base: &AlertConfig, config: &Config) -> ResolvedAlerts {
        ResolvedAlerts {
            stalled_enabled: self.stalled_enabled.or(base.stalled_enabled).unwrap_or(true),
            stalled_minutes: self
                .stalled_minutes
                .or(base.stalled_minutes)
                .unwrap_or(DEFAULT_STALLED_MINUTES),
            consecutive_enabled: self
                .consecutive_enabled
                .or(base.consecutive_enabled)
                .unwrap_or(true),
            consecutive_missed: self
                .consecutive_missed
                .or(base.consecutive_missed)
                .unwrap_or(DEFAULT_CONSECUTIVE_MISSED),
            consecutive_priority: self
                .consecutive_priority
                .or(base.consecutive_priority)
                .unwrap_or(Severity::Critical),
            percentage_enabled: self
                .percentage_enabled
                .or(base.percentage_enabled)
                .unwrap_or(false),
            window_pct: self
                .window_pct
                .or(base.window_pct)
                .unwrap_or(DEFAULT_WINDOW_PCT),
            percentage_priority: self
                .percentage_priority
                .or(base.percentage_priority)
                .unwrap_or(Severity::Warning),
            consecutive_empty_enabled: self
                .consecutive_empty_enabled
                .or(base.consecutive_empty_enabled)
                .unwrap_or(false),
            consecutive_empty: self
                .consecutive_empty
                .or(base.consecutive_empty)
                .unwrap_or(DEFAULT_CONSECUTIVE_EMPTY),
            consecutive_empty_priority: self
                .consecutive_empty_priority
                .or(base.consecutive_empty_priority)
                .unwrap_or(Severity::Warning),
            empty_percentage_enabled: self
                .empty_percentage_enabled
                .or(base.empty_percentage_enabled)
                .unwrap_or(false),
            empty_pct: self.empty_pct.or(base.empty_pct).unwrap_or(DEFAULT_EMPTY_PCT),
            empty_percentage_priority: self
                .empty_percentage_priority
                .or(base.empty_percentage_priority)
                .unwrap_or(Severity::Warning),
            alert_if_inactive: self
                .alert_if_inactive
                .or(base.alert_if_inactive)
                .unwrap_or(true),
            alert_if_no_servers: self
                .alert_if_no_servers
                .or(base.alert_if_no_servers)
                .unwrap_or(true),
            stake_change_enabled: self
                .stake_change_enabled
                .or(base.stake_change_enabled)
                .unwrap_or(false),
            stake_change_drop_pct: self
                .stake_change_drop_pct
                .or(base.stake_change_drop_pct)
                .unwrap_or(DEFAULT_STAKE_CHANGE_DROP_PCT),
            stake_change_increase_pct: self
                .stake_change_increase_pct
                .or(base.stake_change_increase_pct)
                .unwrap_or(DEFAULT_STAKE_CHANGE_INCREASE_PCT),
            unclaimed_rewards_enabled: self
                .unclaimed_rewards_enabled
                .or(base.unclaimed_rewards_enabled)
                .unwrap_or(false),
            unclaimed_rewards_threshold: self
                .unclaimed_rewards_threshold
                .or(base.unclaimed_rewards_threshold)
                .unwrap_or(DEFAULT_UNCLAIMED_REWARDS_THRESHOLD),
            governance_alerts: self
                .governance_alerts
                .or(base.governance_alerts)
                .unwrap_or(false),
            node_down_minutes: config
                .node_down_alert_minutes
                .unwrap_or(DEFAULT_NODE_DOWN_MINUTES),
            node_down_severity: config
                .node_down_alert_severity
                .unwrap_or(Severity::Warning),
            pagerduty: self
                .pagerduty
                .clone()
                .or_else(|| base.pagerduty.clone())
                .unwrap_or_default(),
            telegram: self
                .telegram
                .clone()
                .or_else(|| base.telegram.clone())
                .unwrap_or_default(),
            discord: self
                .discord
                .clone()
                .or_else(|| base.discord.clone())
                .unwrap_or_default(),
            slack: self
                .slack
                .clone()
                .or_else(|| base.slack.clone())
                .unwrap_or_default(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    // Merge per-chain YAML files from a directory. The filename stem
    // becomes the chain label, overriding any same-named entry.
    pub fn merge_chain_dir(&mut self, dir: &Path) -> Result<(), ConfigError> {
        let mut entries: BTreeMap<String, ChainConfig> = BTreeMap::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            let is_yaml = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| ext == "yml" || ext == "yaml")
                .unwrap_or(false);
            if !is_yaml {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            let content = fs::read_to_string(&path)?;
            let chain: ChainConfig = serde_yaml::from_str(&content)?;
            entries.insert(stem.to_string(), chain);
        }
        for (name, chain) in entries {
            info!("Adding chain '{}' from chain config directory", name);
            self.chains.insert(name, chain);
        }
        Ok(())
    }

    // Collect every problem instead of bailing on the first one so the
    // operator can fix the whole file in one pass
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();

        if self.chains.is_empty() {
            problems.push("no chains configured".to_string());
        }

        if self.enable_dashboard && self.listen_port == 0 {
            problems.push("enable_dashboard is set but listen_port is 0".to_string());
        }
        if self.prometheus_enabled && self.prometheus_listen_port == 0 {
            problems.push("prometheus_enabled is set but prometheus_listen_port is 0".to_string());
        }
        if self.healthcheck.enabled && self.healthcheck.ping_url.is_empty() {
            problems.push("healthcheck is enabled but ping_url is empty".to_string());
        }
        if self.convert_to_fiat.enabled {
            if self.coin_market_cap_api_token.is_none() {
                problems
                    .push("convert_to_fiat is enabled without coin_market_cap_api_token".to_string());
            }
            if humantime::parse_duration(&self.convert_to_fiat.cache_expiration).is_err() {
                problems.push(format!(
                    "convert_to_fiat.cache_expiration '{}' is not a valid duration",
                    self.convert_to_fiat.cache_expiration
                ));
            }
        }

        for (name, chain) in &self.chains {
            if chain.chain_id.is_empty() {
                problems.push(format!("chain '{}': chain_id is empty", name));
            }
            if chain.nodes.is_empty() && !chain.public_fallback {
                problems.push(format!(
                    "chain '{}': no nodes configured and public_fallback is off",
                    name
                ));
            }
            if let Err(e) = crypto::decode(&chain.valoper_address) {
                problems.push(format!(
                    "chain '{}': valoper_address '{}' is invalid: {}",
                    name, chain.valoper_address, e
                ));
            }
            if let Some(valcons) = &chain.valcons_override {
                if let Err(e) = crypto::decode(valcons) {
                    problems.push(format!(
                        "chain '{}': valcons_override '{}' is invalid: {}",
                        name, valcons, e
                    ));
                }
            }
            if let Some(provider) = &chain.provider {
                if provider.name != "default" && provider.name != "indexer" {
                    problems.push(format!(
                        "chain '{}': unknown provider '{}'",
                        name, provider.name
                    ));
                }
            }

            let resolved = chain.alerts.resolve(&self.default_alert_config, self);
            if resolved.pagerduty.enabled {
                let key = &resolved.pagerduty.api_key;
                // Events v2 routing keys are 32 alphanumerics; OAuth
                // tokens are longer and prefixed
                let looks_like_oauth = key.len() != 32
                    || !key.chars().all(|c| c.is_ascii_alphanumeric());
                if looks_like_oauth {
                    problems.push(format!(
                        "chain '{}': pagerduty api_key looks like an OAuth token, expected an Events v2 routing key",
                        name
                    ));
                }
            }
            if resolved.telegram.enabled
                && (resolved.telegram.api_key.is_empty() || resolved.telegram.channel.is_empty())
            {
                problems.push(format!(
                    "chain '{}': telegram alerts enabled without api_key/channel",
                    name
                ));
            }
            if resolved.discord.enabled && resolved.discord.webhook.is_empty() {
                problems.push(format!("chain '{}': discord alerts enabled without webhook", name));
            }
            if resolved.slack.enabled && resolved.slack.webhook.is_empty() {
                problems.push(format!("chain '{}': slack alerts enabled without webhook", name));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(problems))
        }
    }

    pub fn governance_reminder_hours(&self) -> u64 {
        self.governance_alerts_reminder_interval
            .unwrap_or(DEFAULT_GOV_REMINDER_HOURS)
    }
}

// Sample printed by `vigil --example-config`
pub const EXAMPLE_CONFIG: &str = r#"---
# Vigil example configuration

enable_dashboard: yes
listen_port: 8888
hide_logs: no

node_down_alert_minutes: 3
node_down_alert_severity: warning

prometheus_enabled: yes
prometheus_listen_port: 28686

tls_skip_verify: no

# coin_market_cap_api_token: ""
convert_to_fiat:
  enabled: no
  currency: USD
  cache_expiration: 1h

healthcheck:
  enabled: no
  ping_url: https://hc-ping.com/aaaaaaaa-bbbb-cccc-dddd-000000000000
  ping_rate: 60

governance_alerts_reminder_interval: 6

default_alert_config:
  stalled_enabled: yes
  stalled_minutes: 10
  consecutive_enabled: yes
  consecutive_missed: 5
  consecutive_priority: critical
  percentage_enabled: no
  window_pct: 10
  percentage_priority: warning
  consecutive_empty_enabled: no
  consecutive_empty: 5
  consecutive_empty_priority: warning
  empty_percentage_enabled: no
  empty_pct: 25
  empty_percentage_priority: warning
  alert_if_inactive: yes
  alert_if_no_servers: yes
  stake_change_enabled: no
  stake_change_drop_pct: 5
  stake_change_increase_pct: 10
  unclaimed_rewards_enabled: no
  unclaimed_rewards_threshold: 1000
  governance_alerts: yes
  pagerduty:
    enabled: no
    api_key: aaaaaaaaaaaabbbbbbbbbbbbcccccccc
    default_severity_threshold: critical
  telegram:
    enabled: no
    api_key: "5555555555:AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA"
    channel: "-1001234567890"
    severity_threshold: warning
  discord:
    enabled: no
    webhook: https://discord.com/api/webhooks/999999999999999999/aaaaaaaaaaaa
    severity_threshold: warning
  slack:
    enabled: no
    webhook: https://hooks.slack.com/services/T0000000000/B0000000000/cccccccccc
    severity_threshold: warning

chains:
  Osmosis:
    chain_id: osmosis-1
    valoper_address: osmovaloper1xxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxx
    public_fallback: no
    slug: osmosis
    nodes:
      - url: tcp://localhost:26657
        alert_if_down: yes
    alerts:
      consecutive_missed: 10
"#;

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_config(extra: &str) -> Config {
        let yaml = format!(
            r#"
chains:
  test:
    chain_id: test-1
    valoper_address: {}
    nodes:
      - url: tcp://localhost:26657
        alert_if_down: yes
{}"#,
            test_valoper(),
            extra
        );
        serde_yaml::from_str(&yaml).unwrap()
    }

    fn test_valoper() -> String {
        vigil_common::crypto::encode("cosmosvaloper", &[7u8; 20]).unwrap()
    }

    #[test]
    fn test_example_config_parses_and_validates() {
        let config: Config = serde_yaml::from_str(EXAMPLE_CONFIG).unwrap();
        // The sample valoper placeholder is not a real address, so only
        // structural parsing is checked here
        assert_eq!(config.chains.len(), 1);
        assert!(config.enable_dashboard);
        assert_eq!(config.listen_port, 8888);
        let chain = &config.chains["Osmosis"];
        assert_eq!(chain.chain_id, "osmosis-1");
        assert_eq!(chain.alerts.consecutive_missed, Some(10));
    }

    #[test]
    fn test_unset_inherits_default_and_set_overrides() {
        let mut config = minimal_config(
            r#"
default_alert_config:
  consecutive_missed: 7
  consecutive_priority: warning
"#,
        );
        config
            .chains
            .get_mut("test")
            .unwrap()
            .alerts
            .consecutive_priority = Some(Severity::Critical);

        let chain = &config.chains["test"];
        let resolved = chain.alerts.resolve(&config.default_alert_config, &config);
        // inherited from default_alert_config
        assert_eq!(resolved.consecutive_missed, 7);
        // explicitly set on the chain
        assert_eq!(resolved.consecutive_priority, Severity::Critical);
        // built-in default
        assert_eq!(resolved.stalled_minutes, DEFAULT_STALLED_MINUTES);
    }

    #[test]
    fn test_zero_value_override_is_kept() {
        let config = minimal_config(
            r#"
default_alert_config:
  stalled_minutes: 0
"#,
        );
        let resolved = config.chains["test"]
            .alerts
            .resolve(&config.default_alert_config, &config);
        assert_eq!(resolved.stalled_minutes, 0);
    }

    #[test]
    fn test_validate_rejects_empty_chains() {
        let config: Config = serde_yaml::from_str("chains: {}").unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("no chains"));
    }

    #[test]
    fn test_validate_rejects_bad_pagerduty_key() {
        let config = minimal_config(
            r#"
default_alert_config:
  pagerduty:
    enabled: yes
    api_key: u+looks-like-an-oauth-token-000000000000
"#,
        );
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("pagerduty"));
    }

    #[test]
    fn test_validate_accepts_minimal() {
        let config = minimal_config("");
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_bad_valoper() {
        let mut config = minimal_config("");
        config.chains.get_mut("test").unwrap().valoper_address = "nonsense".to_string();
        assert!(config.validate().is_err());
    }
}
