//! Environment configuration.
//!
//! Everything vigild needs comes from `VIGIL_*` environment variables.
//! Missing or invalid required values are fatal startup errors — the
//! process exits with code 1 before the monitor loop begins.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use vigil_detect::HypergraphConfig;
use vigil_restart::CommandTemplates;
use vigil_types::{Layer, Node, PortSet};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

/// Fully resolved daemon configuration.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Cluster membership in configured order; the first node is the
    /// genesis candidate during layer restarts.
    pub nodes: Vec<Node>,
    pub snapshot_stall: Duration,
    pub check_interval: Duration,
    pub restart_cooldown: Duration,
    pub max_restarts_per_hour: u32,
    pub ssh_user: String,
    pub ssh_key_path: PathBuf,
    pub ssh_connect_timeout: Duration,
    pub dry_run: bool,
    pub webhook_url: Option<String>,
    pub hypergraph: HypergraphConfig,
    pub templates: CommandTemplates,
}

impl MonitorConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(|key| std::env::var(key).ok())
    }

    /// Build a config from a variable lookup. Tests pass a map.
    pub fn load(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let raw_nodes = lookup("VIGIL_NODES").ok_or(ConfigError::Missing("VIGIL_NODES"))?;
        let members = parse_members(&raw_nodes)?;

        let gl0 = parse_ports(&lookup, "VIGIL_GL0_PORTS", (9000, 9001, 9002))?;
        let ml0 = parse_ports(&lookup, "VIGIL_ML0_PORTS", (9100, 9101, 9102))?;
        let cl1 = parse_ports(&lookup, "VIGIL_CL1_PORTS", (9200, 9201, 9202))?;
        let dl1 = parse_ports(&lookup, "VIGIL_DL1_PORTS", (9300, 9301, 9302))?;

        let nodes = members
            .into_iter()
            .map(|(id, host)| Node {
                id,
                host,
                layers: HashMap::from([
                    (Layer::GlobalL0, gl0),
                    (Layer::MetagraphL0, ml0),
                    (Layer::CurrencyL1, cl1),
                    (Layer::DataL1, dl1),
                ]),
            })
            .collect();

        let dry_run = parse_bool(&lookup, "VIGIL_DRY_RUN", false)?;

        // SSH credentials are only required when commands actually run.
        let ssh_user = match lookup("VIGIL_SSH_USER") {
            Some(user) => user,
            None if dry_run => "dry-run".to_string(),
            None => return Err(ConfigError::Missing("VIGIL_SSH_USER")),
        };
        let ssh_key_path = match lookup("VIGIL_SSH_KEY") {
            Some(path) => PathBuf::from(path),
            None if dry_run => PathBuf::from("/dev/null"),
            None => return Err(ConfigError::Missing("VIGIL_SSH_KEY")),
        };

        let hypergraph = HypergraphConfig {
            enabled: parse_bool(&lookup, "VIGIL_HYPERGRAPH_ENABLED", false)?,
            l0_urls: lookup("VIGIL_HYPERGRAPH_L0_URLS")
                .map(|raw| {
                    raw.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            check_interval_multiplier: parse_u64(&lookup, "VIGIL_HYPERGRAPH_CHECK_MULTIPLIER", 5)?
                as u32,
        };

        let mut templates = CommandTemplates::default();
        if let Some(stop) = lookup("VIGIL_STOP_CMD") {
            templates.stop = stop;
        }
        if let Some(genesis) = lookup("VIGIL_START_GENESIS_CMD") {
            templates.start_genesis = genesis;
        }
        if let Some(join) = lookup("VIGIL_START_JOIN_CMD") {
            templates.start_and_join = join;
        }

        Ok(Self {
            nodes,
            snapshot_stall: Duration::from_secs(
                parse_u64(&lookup, "VIGIL_SNAPSHOT_STALL_MINUTES", 4)? * 60,
            ),
            check_interval: Duration::from_secs(parse_u64(
                &lookup,
                "VIGIL_CHECK_INTERVAL_SECONDS",
                60,
            )?),
            restart_cooldown: Duration::from_secs(
                parse_u64(&lookup, "VIGIL_RESTART_COOLDOWN_MINUTES", 10)? * 60,
            ),
            max_restarts_per_hour: parse_u64(&lookup, "VIGIL_MAX_RESTARTS_PER_HOUR", 6)? as u32,
            ssh_user,
            ssh_key_path,
            ssh_connect_timeout: Duration::from_secs(parse_u64(
                &lookup,
                "VIGIL_SSH_CONNECT_TIMEOUT_SECONDS",
                10,
            )?),
            dry_run,
            webhook_url: lookup("VIGIL_WEBHOOK_URL").filter(|url| !url.trim().is_empty()),
            hypergraph,
            templates,
        })
    }
}

/// Parse `id=host,id=host` preserving order.
fn parse_members(raw: &str) -> Result<Vec<(String, String)>, ConfigError> {
    let mut members = Vec::new();
    let mut seen = HashSet::new();
    for entry in raw.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let (id, host) = entry.split_once('=').ok_or_else(|| ConfigError::Invalid {
            var: "VIGIL_NODES",
            reason: format!("expected id=host, got {entry:?}"),
        })?;
        let (id, host) = (id.trim(), host.trim());
        if id.is_empty() || host.is_empty() {
            return Err(ConfigError::Invalid {
                var: "VIGIL_NODES",
                reason: format!("empty id or host in {entry:?}"),
            });
        }
        if !seen.insert(id.to_string()) {
            return Err(ConfigError::Invalid {
                var: "VIGIL_NODES",
                reason: format!("duplicate node id {id:?}"),
            });
        }
        members.push((id.to_string(), host.to_string()));
    }
    if members.is_empty() {
        return Err(ConfigError::Invalid {
            var: "VIGIL_NODES",
            reason: "node list is empty".to_string(),
        });
    }
    Ok(members)
}

fn parse_u64(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: u64,
) -> Result<u64, ConfigError> {
    match lookup(var) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
            var,
            reason: format!("expected an integer, got {raw:?}"),
        }),
    }
}

fn parse_bool(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: bool,
) -> Result<bool, ConfigError> {
    match lookup(var) {
        None => Ok(default),
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => Ok(true),
            "0" | "false" | "no" => Ok(false),
            _ => Err(ConfigError::Invalid {
                var,
                reason: format!("expected a boolean, got {raw:?}"),
            }),
        },
    }
}

fn parse_ports(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: (u16, u16, u16),
) -> Result<PortSet, ConfigError> {
    let (public, p2p, cli) = match lookup(var) {
        None => default,
        Some(raw) => {
            let parts: Vec<&str> = raw.split(',').map(str::trim).collect();
            if parts.len() != 3 {
                return Err(ConfigError::Invalid {
                    var,
                    reason: format!("expected public,p2p,cli, got {raw:?}"),
                });
            }
            let parse = |s: &str| {
                s.parse::<u16>().map_err(|_| ConfigError::Invalid {
                    var,
                    reason: format!("invalid port {s:?}"),
                })
            };
            (parse(parts[0])?, parse(parts[1])?, parse(parts[2])?)
        }
    };
    Ok(PortSet { public, p2p, cli })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn minimal_dry_run_config_applies_defaults() {
        let config = MonitorConfig::load(lookup_from(&[
            ("VIGIL_NODES", "n1=10.0.0.1,n2=10.0.0.2,n3=10.0.0.3"),
            ("VIGIL_DRY_RUN", "true"),
        ]))
        .unwrap();

        assert_eq!(config.nodes.len(), 3);
        assert_eq!(config.nodes[0].id, "n1");
        assert_eq!(
            config.nodes[0].public_port(Layer::MetagraphL0),
            Some(9100)
        );
        assert_eq!(config.snapshot_stall, Duration::from_secs(240));
        assert_eq!(config.check_interval, Duration::from_secs(60));
        assert_eq!(config.restart_cooldown, Duration::from_secs(600));
        assert_eq!(config.max_restarts_per_hour, 6);
        assert!(config.dry_run);
        assert!(!config.hypergraph.enabled);
        assert!(config.webhook_url.is_none());
    }

    #[test]
    fn missing_node_list_is_fatal() {
        let err = MonitorConfig::load(lookup_from(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("VIGIL_NODES")));
    }

    #[test]
    fn malformed_node_list_is_fatal() {
        let err =
            MonitorConfig::load(lookup_from(&[("VIGIL_NODES", "n1:10.0.0.1")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "VIGIL_NODES", .. }));
    }

    #[test]
    fn duplicate_node_ids_are_fatal() {
        let err = MonitorConfig::load(lookup_from(&[(
            "VIGIL_NODES",
            "n1=10.0.0.1,n1=10.0.0.2",
        )]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "VIGIL_NODES", .. }));
    }

    #[test]
    fn ssh_credentials_required_outside_dry_run() {
        let err = MonitorConfig::load(lookup_from(&[("VIGIL_NODES", "n1=10.0.0.1")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Missing("VIGIL_SSH_USER")));

        let config = MonitorConfig::load(lookup_from(&[
            ("VIGIL_NODES", "n1=10.0.0.1"),
            ("VIGIL_SSH_USER", "ops"),
            ("VIGIL_SSH_KEY", "/home/ops/.ssh/id_ed25519"),
        ]))
        .unwrap();
        assert_eq!(config.ssh_user, "ops");
    }

    #[test]
    fn node_order_is_preserved() {
        let config = MonitorConfig::load(lookup_from(&[
            ("VIGIL_NODES", "gamma=10.0.0.3,alpha=10.0.0.1,beta=10.0.0.2"),
            ("VIGIL_DRY_RUN", "1"),
        ]))
        .unwrap();
        let ids: Vec<&str> = config.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, ["gamma", "alpha", "beta"]);
    }

    #[test]
    fn port_triples_and_thresholds_can_be_overridden() {
        let config = MonitorConfig::load(lookup_from(&[
            ("VIGIL_NODES", "n1=10.0.0.1"),
            ("VIGIL_DRY_RUN", "yes"),
            ("VIGIL_ML0_PORTS", "7000,7001,7002"),
            ("VIGIL_SNAPSHOT_STALL_MINUTES", "2"),
            ("VIGIL_MAX_RESTARTS_PER_HOUR", "3"),
        ]))
        .unwrap();
        assert_eq!(config.nodes[0].public_port(Layer::MetagraphL0), Some(7000));
        assert_eq!(config.snapshot_stall, Duration::from_secs(120));
        assert_eq!(config.max_restarts_per_hour, 3);
    }

    #[test]
    fn invalid_port_triple_is_fatal() {
        let err = MonitorConfig::load(lookup_from(&[
            ("VIGIL_NODES", "n1=10.0.0.1"),
            ("VIGIL_DRY_RUN", "1"),
            ("VIGIL_CL1_PORTS", "9200,9201"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "VIGIL_CL1_PORTS", .. }));
    }

    #[test]
    fn hypergraph_block_parses_urls() {
        let config = MonitorConfig::load(lookup_from(&[
            ("VIGIL_NODES", "n1=10.0.0.1"),
            ("VIGIL_DRY_RUN", "1"),
            ("VIGIL_HYPERGRAPH_ENABLED", "true"),
            (
                "VIGIL_HYPERGRAPH_L0_URLS",
                "http://l0-lb1.constellation.io:9000, http://l0-lb2.constellation.io:9000",
            ),
        ]))
        .unwrap();
        assert!(config.hypergraph.enabled);
        assert_eq!(config.hypergraph.l0_urls.len(), 2);
        assert_eq!(config.hypergraph.check_interval_multiplier, 5);
    }

    #[test]
    fn command_templates_can_be_overridden() {
        let config = MonitorConfig::load(lookup_from(&[
            ("VIGIL_NODES", "n1=10.0.0.1"),
            ("VIGIL_DRY_RUN", "1"),
            ("VIGIL_STOP_CMD", "docker compose stop {layer}"),
        ]))
        .unwrap();
        assert_eq!(config.templates.stop, "docker compose stop {layer}");
    }
}
