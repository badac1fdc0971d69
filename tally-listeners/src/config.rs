use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tally_metrics::Listener;

use crate::console::ConsoleSink;
use crate::graphite::GraphiteSink;
use crate::kairos::KairosSink;
use crate::sink::SinkError;
use crate::threaded::{QueueConfig, ThreadedListener};

/// Settings of a listener printing events to standard output.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    /// Queue and worker settings.
    #[serde(flatten)]
    pub queue: QueueConfig,
}

/// Settings of a listener posting events to KairosDB.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KairosConfig {
    /// Base URL of the KairosDB server, for example `http://localhost:8080`.
    pub url: String,
    /// Tag events sharing a metric and millisecond with an `index` tag.
    ///
    /// KairosDB keeps a single datapoint per series and millisecond. Defaults to `false`.
    #[serde(default)]
    pub indexed: bool,
    /// Request timeout in seconds.
    ///
    /// Defaults to `5`.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Queue and worker settings.
    #[serde(flatten)]
    pub queue: QueueConfig,
}

/// Settings of a listener writing events to Graphite.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphiteConfig {
    /// Address of the Graphite plaintext receiver, for example `localhost:2003`.
    pub address: String,
    /// Graphite path templates by metric name.
    ///
    /// Segments of the form `{tag}` are replaced by the event's tag value. When empty, all events
    /// are forwarded under their own names. Otherwise, only mapped metrics are forwarded.
    #[serde(default)]
    pub mappings: BTreeMap<String, String>,
    /// Connect and write timeout in seconds.
    ///
    /// Defaults to `5`.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Queue and worker settings.
    #[serde(flatten)]
    pub queue: QueueConfig,
}

fn default_timeout_secs() -> u64 {
    5
}

/// A configured listener.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ListenerConfig {
    /// Prints events to standard output.
    Console(ConsoleConfig),
    /// Posts events to KairosDB.
    Kairos(KairosConfig),
    /// Writes events to Graphite.
    Graphite(GraphiteConfig),
}

impl ListenerConfig {
    /// Starts the listener described by this configuration.
    pub fn build(&self) -> Result<Arc<dyn Listener>, SinkError> {
        let listener = match self {
            Self::Console(config) => ThreadedListener::spawn(ConsoleSink::stdout(), &config.queue)?,
            Self::Kairos(config) => {
                let sink = KairosSink::new(&config.url, Duration::from_secs(config.timeout_secs))?;
                ThreadedListener::spawn(sink, &config.queue)?.with_indexing(config.indexed)
            }
            Self::Graphite(config) => {
                let timeout = Duration::from_secs(config.timeout_secs);
                let sink = GraphiteSink::new(&config.address, timeout)
                    .with_mappings(config.mappings.clone());
                ThreadedListener::spawn(sink, &config.queue)?
            }
        };

        Ok(Arc::new(listener))
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn test_parse_listeners() {
        let yaml = r#"
- type: console
  batch_size: 10
- type: kairos
  url: http://localhost:8080
  indexed: true
  offer_timeout_ms: 5
"#;

        let configs: Vec<ListenerConfig> = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            configs,
            vec![
                ListenerConfig::Console(ConsoleConfig {
                    queue: QueueConfig {
                        batch_size: 10,
                        ..Default::default()
                    },
                }),
                ListenerConfig::Kairos(KairosConfig {
                    url: "http://localhost:8080".to_owned(),
                    indexed: true,
                    timeout_secs: 5,
                    queue: QueueConfig {
                        offer_timeout_ms: Some(5),
                        ..Default::default()
                    },
                }),
            ]
        );
    }

    #[test]
    fn test_parse_graphite() {
        let yaml = r#"
type: graphite
address: localhost:2003
mappings:
  shop.checkout.prod.latency: "servers.{host}.latency"
stats_prefix: tally.listener
"#;

        let config: ListenerConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            config,
            ListenerConfig::Graphite(GraphiteConfig {
                address: "localhost:2003".to_owned(),
                mappings: BTreeMap::from([(
                    "shop.checkout.prod.latency".to_owned(),
                    "servers.{host}.latency".to_owned(),
                )]),
                timeout_secs: 5,
                queue: QueueConfig {
                    stats_prefix: Some("tally.listener".to_owned()),
                    ..Default::default()
                },
            })
        );
    }

    #[test]
    fn test_build_graphite() {
        tally_test::setup();

        let config: ListenerConfig =
            serde_yaml::from_str("type: graphite\naddress: 127.0.0.1:9").unwrap();
        let listener = config.build().unwrap();
        assert!(!listener.requires_indexing());
        listener.stop();
    }

    #[test]
    fn test_unknown_type() {
        let result = serde_yaml::from_str::<ListenerConfig>("type: carbon");
        assert!(result.is_err());
    }

    #[test]
    fn test_kairos_requires_url() {
        let result = serde_yaml::from_str::<ListenerConfig>("type: kairos\nindexed: true");
        assert!(result.is_err());
    }

    #[test]
    fn test_build_kairos_indexing() {
        tally_test::setup();

        let config = ListenerConfig::Kairos(KairosConfig {
            url: "http://127.0.0.1:9".to_owned(),
            indexed: true,
            timeout_secs: 1,
            queue: QueueConfig::default(),
        });

        let listener = config.build().unwrap();
        assert!(listener.requires_indexing());
        assert_eq!(listener.events_buffered(), 0);
        listener.stop();
    }
}
