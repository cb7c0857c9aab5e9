//! Configuration loading.
//!
//! Sources, later ones winning: `config/default.{toml,yaml,json}` if present,
//! then `RELAYSUB_`-prefixed environment variables using `__` between
//! nesting levels (`RELAYSUB_RELAY__QUEUE_SIZE=50`). List options take
//! comma-separated values. Whatever is missing falls back to
//! [`Settings::default`].

mod settings;

use config::{Config, Environment, File};

pub use settings::{
    BridgeSettings, LoggingSettings, PartialSettings, RelaySettings, SchedulerSettings,
    SenderSettings, ServerSettings, Settings,
};

use crate::utils::Result;

const DEFAULT_CONFIG_FILE: &str = "config/default";
const ENV_PREFIX: &str = "RELAYSUB";
const LIST_KEYS: [&str; 6] = [
    "relay.input_groups",
    "relay.output_groups",
    "sender.groups",
    "sender.callsigns",
    "sender.uids",
    "bridge.groups",
];

/// Load from the default config file and the environment.
pub fn load_config() -> Result<Settings> {
    load_config_from(DEFAULT_CONFIG_FILE)
}

/// Load from `path` (extension optional, file may be absent) and the environment.
pub fn load_config_from(path: &str) -> Result<Settings> {
    let mut env = Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
        .list_separator(",");
    for key in LIST_KEYS {
        env = env.with_list_parse_key(key);
    }

    let config = Config::builder()
        .add_source(File::with_name(path).required(false))
        .add_source(env)
        .build()?;

    let partial: PartialSettings = config.try_deserialize()?;
    Ok(merge(partial, Settings::default()))
}

fn merge(partial: PartialSettings, default: Settings) -> Settings {
    let server = partial.server.as_ref();
    let relay = partial.relay.as_ref();
    let sender = partial.sender.as_ref();
    let bridge = partial.bridge.as_ref();

    Settings {
        server: ServerSettings {
            host: server
                .and_then(|s| s.host.clone())
                .unwrap_or(default.server.host),
            port: server.and_then(|s| s.port).unwrap_or(default.server.port),
        },
        relay: RelaySettings {
            input_groups: relay
                .and_then(|r| r.input_groups.clone())
                .or(default.relay.input_groups),
            output_groups: relay
                .and_then(|r| r.output_groups.clone())
                .or(default.relay.output_groups),
            queue_size: relay
                .and_then(|r| r.queue_size)
                .unwrap_or(default.relay.queue_size),
        },
        sender: SenderSettings {
            enabled: sender
                .and_then(|s| s.enabled)
                .unwrap_or(default.sender.enabled),
            interval_ms: sender
                .and_then(|s| s.interval_ms)
                .unwrap_or(default.sender.interval_ms),
            initial_delay_ms: sender
                .and_then(|s| s.initial_delay_ms)
                .unwrap_or(default.sender.initial_delay_ms),
            groups: sender
                .and_then(|s| s.groups.clone())
                .unwrap_or(default.sender.groups),
            callsigns: sender
                .and_then(|s| s.callsigns.clone())
                .unwrap_or(default.sender.callsigns),
            uids: sender
                .and_then(|s| s.uids.clone())
                .unwrap_or(default.sender.uids),
            feed_id: sender
                .and_then(|s| s.feed_id.clone())
                .or(default.sender.feed_id),
            self_stop_secs: sender
                .and_then(|s| s.self_stop_secs)
                .or(default.sender.self_stop_secs),
        },
        bridge: BridgeSettings {
            url: bridge.and_then(|b| b.url.clone()).or(default.bridge.url),
            consumer_topic: bridge
                .and_then(|b| b.consumer_topic.clone())
                .or(default.bridge.consumer_topic),
            producer_topic: bridge
                .and_then(|b| b.producer_topic.clone())
                .or(default.bridge.producer_topic),
            group_id: bridge
                .and_then(|b| b.group_id.clone())
                .unwrap_or(default.bridge.group_id),
            poll_timeout_ms: bridge
                .and_then(|b| b.poll_timeout_ms)
                .unwrap_or(default.bridge.poll_timeout_ms),
            max_batch: bridge
                .and_then(|b| b.max_batch)
                .unwrap_or(default.bridge.max_batch),
            groups: bridge
                .and_then(|b| b.groups.clone())
                .unwrap_or(default.bridge.groups),
        },
        scheduler: SchedulerSettings {
            pool_size: partial
                .scheduler
                .as_ref()
                .and_then(|s| s.pool_size)
                .unwrap_or(default.scheduler.pool_size),
        },
        logging: LoggingSettings {
            level: partial
                .logging
                .as_ref()
                .and_then(|l| l.level.clone())
                .unwrap_or(default.logging.level),
        },
    }
}

#[cfg(test)]
mod tests;
