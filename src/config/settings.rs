use std::collections::BTreeSet;

use serde::Deserialize;

/// Top-level configuration for `relaysub`.
///
/// Read once at startup; components copy what they need at construction and
/// never look at it again.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Settings {
    pub server: ServerSettings,
    pub relay: RelaySettings,
    pub sender: SenderSettings,
    pub bridge: BridgeSettings,
    pub scheduler: SchedulerSettings,
    pub logging: LoggingSettings,
}

/// Listener of the embedded broker.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

/// Forwarder relay: ingress filter, egress groups and queue bound.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct RelaySettings {
    pub input_groups: Option<BTreeSet<String>>,
    pub output_groups: Option<BTreeSet<String>>,
    pub queue_size: usize,
}

/// Periodic sender.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct SenderSettings {
    pub enabled: bool,
    pub interval_ms: u64,
    pub initial_delay_ms: u64,
    pub groups: BTreeSet<String>,
    pub callsigns: Vec<String>,
    pub uids: Vec<String>,
    pub feed_id: Option<String>,
    pub self_stop_secs: Option<u64>,
}

/// External broker bridge. `url` and both topics are required once a bridge
/// is built; the rest have defaults.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct BridgeSettings {
    pub url: Option<String>,
    pub consumer_topic: Option<String>,
    pub producer_topic: Option<String>,
    pub group_id: String,
    pub poll_timeout_ms: u64,
    pub max_batch: usize,
    pub groups: BTreeSet<String>,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct SchedulerSettings {
    pub pool_size: usize,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LoggingSettings {
    pub level: String,
}

/// Settings as found in files and environment; anything may be missing.
#[derive(Debug, Deserialize, Default)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub relay: Option<PartialRelaySettings>,
    pub sender: Option<PartialSenderSettings>,
    pub bridge: Option<PartialBridgeSettings>,
    pub scheduler: Option<PartialSchedulerSettings>,
    pub logging: Option<PartialLoggingSettings>,
}

#[derive(Debug, Deserialize)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Deserialize)]
pub struct PartialRelaySettings {
    pub input_groups: Option<BTreeSet<String>>,
    pub output_groups: Option<BTreeSet<String>>,
    pub queue_size: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct PartialSenderSettings {
    pub enabled: Option<bool>,
    pub interval_ms: Option<u64>,
    pub initial_delay_ms: Option<u64>,
    pub groups: Option<BTreeSet<String>>,
    pub callsigns: Option<Vec<String>>,
    pub uids: Option<Vec<String>>,
    pub feed_id: Option<String>,
    pub self_stop_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct PartialBridgeSettings {
    pub url: Option<String>,
    pub consumer_topic: Option<String>,
    pub producer_topic: Option<String>,
    pub group_id: Option<String>,
    pub poll_timeout_ms: Option<u64>,
    pub max_batch: Option<usize>,
    pub groups: Option<BTreeSet<String>>,
}

#[derive(Debug, Deserialize)]
pub struct PartialSchedulerSettings {
    pub pool_size: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct PartialLoggingSettings {
    pub level: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            relay: RelaySettings {
                input_groups: None,
                output_groups: None,
                queue_size: 1000,
            },
            sender: SenderSettings {
                enabled: false,
                interval_ms: 2000,
                initial_delay_ms: 0,
                groups: BTreeSet::new(),
                callsigns: Vec::new(),
                uids: Vec::new(),
                feed_id: None,
                self_stop_secs: None,
            },
            bridge: BridgeSettings {
                url: None,
                consumer_topic: None,
                producer_topic: None,
                group_id: "relaysub-bridge".to_string(),
                poll_timeout_ms: 5000,
                max_batch: 500,
                groups: BTreeSet::new(),
            },
            scheduler: SchedulerSettings { pool_size: 1 },
            logging: LoggingSettings {
                level: "info".to_string(),
            },
        }
    }
}
