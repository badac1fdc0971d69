use std::error::Error;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tally_listeners::ListenerConfig;
use tally_log::LogConfig;
use tally_metrics::{
    Registries, Registry, RegistryBuilder, ReservoirConfig, Tags, TimerMode,
};

/// Defines the source of a config error.
#[derive(Debug, Default)]
enum ConfigErrorSource {
    /// An error occurring independently.
    #[default]
    None,
    /// An error originating from a configuration file.
    File(PathBuf),
    /// An error originating from a configuration section.
    Field(&'static str),
}

/// Indicates config related errors.
#[derive(Debug)]
pub struct ConfigError {
    source: ConfigErrorSource,
    kind: ConfigErrorKind,
    inner: Option<Box<dyn Error + Send + Sync + 'static>>,
}

impl ConfigError {
    fn wrap<E>(inner: E, kind: ConfigErrorKind) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self {
            source: ConfigErrorSource::None,
            kind,
            inner: Some(Box::new(inner)),
        }
    }

    fn for_field<E>(inner: E, field: &'static str) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self::wrap(inner, ConfigErrorKind::InvalidValue).field(field)
    }

    fn file(mut self, p: impl AsRef<Path>) -> Self {
        self.source = ConfigErrorSource::File(p.as_ref().to_path_buf());
        self
    }

    fn field(mut self, name: &'static str) -> Self {
        self.source = ConfigErrorSource::Field(name);
        self
    }

    /// Returns the error kind of the error.
    pub fn kind(&self) -> ConfigErrorKind {
        self.kind
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            ConfigErrorSource::None => self.kind.fmt(f),
            ConfigErrorSource::File(file_name) => {
                write!(f, "{} (file {})", self.kind, file_name.display())
            }
            ConfigErrorSource::Field(name) => write!(f, "{} (field {name})", self.kind),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.inner.as_ref().map(|e| e.as_ref() as _)
    }
}

/// Indicates config related errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, thiserror::Error)]
pub enum ConfigErrorKind {
    /// Failed to open the file.
    #[error("could not open config file")]
    CouldNotOpenFile,
    /// Parsing YAML failed.
    #[error("could not parse yaml config file")]
    BadYaml,
    /// Parsing JSON failed.
    #[error("could not parse json config file")]
    BadJson,
    /// Invalid config value.
    #[error("invalid config value")]
    InvalidValue,
}

/// Identity and behavior of the configured registry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// First component of the metric prefix.
    pub namespace: String,
    /// Second component of the metric prefix.
    pub application: String,
    /// Third component of the metric prefix.
    pub app_type: String,
    /// Value of the `host` default tag.
    pub host: Option<String>,
    /// Value of the `datacenter` default tag.
    pub datacenter: Option<String>,
    /// Additional default tags.
    pub tags: Tags,
    /// Timestamp timer events with their start time instead of their stop time.
    ///
    /// Defaults to `false`.
    pub use_start_time: bool,
    /// How timers report their durations.
    ///
    /// Defaults to [`TimerMode::Raw`].
    pub timer_mode: TimerMode,
    /// Window of the bucket aggregator in seconds.
    ///
    /// Timers, events and alerts are aggregated per window when set. Defaults to no aggregation.
    pub bucket_window_secs: Option<u64>,
    /// Share the registry through [`Registries::global`].
    ///
    /// Defaults to `true`.
    pub cache: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            namespace: String::new(),
            application: String::new(),
            app_type: String::new(),
            host: None,
            datacenter: None,
            tags: Tags::new(),
            use_start_time: false,
            timer_mode: TimerMode::default(),
            bucket_window_secs: None,
            cache: true,
        }
    }
}

/// The full configuration of a metrics setup.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Identity and behavior of the registry.
    pub registry: RegistryConfig,
    /// Settings of percentile reservoirs.
    pub reservoir: ReservoirConfig,
    /// Listeners attached to the registry.
    pub listeners: Vec<ListenerConfig>,
    /// Logging setup.
    pub logging: LogConfig,
}

impl Config {
    /// Loads a configuration file.
    ///
    /// Files with a `.json` extension are parsed as JSON, everything else as YAML.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let file = fs::File::open(path)
            .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::CouldNotOpenFile).file(path))?;
        let reader = io::BufReader::new(file);

        let is_json = path.extension().is_some_and(|ext| ext == "json");
        if is_json {
            serde_json::from_reader(reader)
                .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::BadJson).file(path))
        } else {
            serde_yaml::from_reader(reader)
                .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::BadYaml).file(path))
        }
    }

    /// Parses a configuration from a YAML string.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(yaml).map_err(|e| ConfigError::wrap(e, ConfigErrorKind::BadYaml))
    }

    /// Converts a JSON value into a configuration.
    pub fn from_json_value(value: serde_json::Value) -> Result<Self, ConfigError> {
        serde_json::from_value(value).map_err(|e| ConfigError::wrap(e, ConfigErrorKind::BadJson))
    }

    /// Returns a registry builder for the `registry` and `reservoir` sections.
    pub fn registry_builder(&self) -> Result<RegistryBuilder, ConfigError> {
        let section = &self.registry;
        let mut builder = RegistryBuilder::new(
            &section.namespace,
            &section.application,
            &section.app_type,
        )
        .tags(section.tags.clone())
        .use_start_time(section.use_start_time)
        .timer_mode(section.timer_mode)
        .reservoir(self.reservoir.clone());

        if let Some(host) = &section.host {
            builder = builder.host(host);
        }
        if let Some(datacenter) = &section.datacenter {
            builder = builder.datacenter(datacenter);
        }
        if let Some(secs) = section.bucket_window_secs {
            builder = builder.bucket_window(Duration::from_secs(secs));
        }

        builder
            .prefix()
            .map_err(|e| ConfigError::for_field(e, "registry"))?;
        self.reservoir
            .validate()
            .map_err(|e| ConfigError::for_field(e, "reservoir"))?;

        Ok(builder)
    }

    /// Builds the registry and attaches all configured listeners.
    ///
    /// With `cache` enabled, an existing registry of the same identity is reused and the
    /// listeners are added to it.
    pub fn build_registry(&self) -> Result<Registry, ConfigError> {
        let builder = self.registry_builder()?;
        let registry = if self.registry.cache {
            Registries::global().get_or_build(builder)
        } else {
            builder.build()
        }
        .map_err(|e| ConfigError::for_field(e, "registry"))?;

        let mut listeners = Vec::with_capacity(self.listeners.len());
        for config in &self.listeners {
            match config.build() {
                Ok(listener) => listeners.push(listener),
                Err(error) => {
                    for listener in listeners {
                        listener.stop();
                    }
                    return Err(ConfigError::for_field(error, "listeners"));
                }
            }
        }

        for listener in listeners {
            registry.add_listener(listener);
        }

        tally_log::info!(
            prefix = registry.prefix(),
            listeners = self.listeners.len(),
            "metric registry configured"
        );
        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use similar_asserts::assert_eq;
    use tally_listeners::{ConsoleConfig, QueueConfig};
    use tally_metrics::{Statistic, tags};

    use super::*;

    const YAML: &str = r#"
registry:
  namespace: dshops
  application: Metrics
  app_type: test
  host: MyHost
  tags:
    team: core
  timer_mode: percentile
  bucket_window_secs: 5
  cache: false
reservoir:
  capacity: 200
  percentiles: [50, 99]
  stats: [min, ave]
listeners:
  - type: console
    batch_size: 10
logging:
  level: debug
"#;

    #[test]
    fn test_parse_yaml() {
        let config = Config::from_yaml_str(YAML).unwrap();

        assert_eq!(
            config.registry,
            RegistryConfig {
                namespace: "dshops".to_owned(),
                application: "Metrics".to_owned(),
                app_type: "test".to_owned(),
                host: Some("MyHost".to_owned()),
                datacenter: None,
                tags: tags!("team" => "core"),
                use_start_time: false,
                timer_mode: TimerMode::Percentile,
                bucket_window_secs: Some(5),
                cache: false,
            }
        );
        assert_eq!(
            config.reservoir,
            ReservoirConfig {
                capacity: 200,
                percentiles: vec![50, 99],
                stats: vec![Statistic::Min, Statistic::Ave],
            }
        );
        assert_eq!(
            config.listeners,
            vec![ListenerConfig::Console(ConsoleConfig {
                queue: QueueConfig {
                    batch_size: 10,
                    ..Default::default()
                },
            })]
        );
        assert_eq!(config.logging.level, tally_log::Level::Debug);
    }

    #[test]
    fn test_default_config() {
        insta::assert_json_snapshot!(Config::default(), @r###"
        {
          "registry": {
            "namespace": "",
            "application": "",
            "app_type": "",
            "host": null,
            "datacenter": null,
            "tags": {},
            "use_start_time": false,
            "timer_mode": "raw",
            "bucket_window_secs": null,
            "cache": true
          },
          "reservoir": {
            "capacity": 100,
            "percentiles": [
              90,
              99
            ],
            "stats": []
          },
          "listeners": [],
          "logging": {
            "level": "info",
            "format": "auto"
          }
        }
        "###);
    }

    #[test]
    fn test_from_json_value() {
        let value = serde_json::json!({
            "registry": {"namespace": "a", "application": "b", "app_type": "c"},
            "listeners": [{"type": "kairos", "url": "http://localhost:8080", "indexed": true}],
        });

        let config = Config::from_json_value(value).unwrap();
        assert_eq!(config.registry.namespace, "a");
        assert!(matches!(
            &config.listeners[0],
            ListenerConfig::Kairos(kairos) if kairos.indexed
        ));
    }

    #[test]
    fn test_from_path_json() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{"registry": {{"namespace": "a", "application": "b", "app_type": "c"}}}}"#
        )
        .unwrap();

        let config = Config::from_path(file.path()).unwrap();
        assert_eq!(config.registry.app_type, "c");
        assert!(config.listeners.is_empty());
    }

    #[test]
    fn test_from_path_yaml() {
        let mut file = tempfile::Builder::new().suffix(".yml").tempfile().unwrap();
        file.write_all(YAML.as_bytes()).unwrap();

        let config = Config::from_path(file.path()).unwrap();
        assert_eq!(config.reservoir.capacity, 200);
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.yml");

        let error = Config::from_path(&path).unwrap_err();
        assert_eq!(error.kind(), ConfigErrorKind::CouldNotOpenFile);
        assert!(error.to_string().contains("metrics.yml"));
        assert!(error.source().is_some());
    }

    #[test]
    fn test_bad_yaml() {
        let error = Config::from_yaml_str("registry: [").unwrap_err();
        assert_eq!(error.kind(), ConfigErrorKind::BadYaml);

        let error = Config::from_yaml_str("listeners:\n  - type: carbon").unwrap_err();
        assert_eq!(error.kind(), ConfigErrorKind::BadYaml);
    }

    #[test]
    fn test_invalid_identity() {
        let config = Config::from_yaml_str("registry:\n  namespace: a.b\n").unwrap();

        let error = config.registry_builder().unwrap_err();
        assert_eq!(error.kind(), ConfigErrorKind::InvalidValue);
        assert_eq!(error.to_string(), "invalid config value (field registry)");
    }

    #[test]
    fn test_invalid_reservoir() {
        let yaml = "registry: {namespace: a, application: b, app_type: c}\n\
                    reservoir: {capacity: 0}";
        let config = Config::from_yaml_str(yaml).unwrap();

        let error = config.registry_builder().unwrap_err();
        assert_eq!(error.kind(), ConfigErrorKind::InvalidValue);
        assert_eq!(error.to_string(), "invalid config value (field reservoir)");
    }

    #[test]
    fn test_registry_builder() {
        let config = Config::from_yaml_str(YAML).unwrap();
        let builder = config.registry_builder().unwrap();

        assert_eq!(builder.prefix().unwrap(), "dshops.metrics.test.");
        let identity = builder.identity().unwrap();
        assert_eq!(
            identity.tags(),
            &tags!("host" => "myhost", "team" => "core")
        );
    }

    #[test]
    fn test_build_registry() {
        tally_test::setup();

        let config = Config::from_yaml_str(YAML).unwrap();
        let registry = config.build_registry().unwrap();

        assert_eq!(registry.prefix(), "dshops.metrics.test.");
        assert_eq!(registry.listeners().len(), 1);
        registry.remove_all_listeners();
        assert!(registry.listeners().is_empty());
    }

    #[test]
    fn test_build_cached_registry() {
        tally_test::setup();

        let yaml = "registry: {namespace: cfg, application: cached, app_type: test}";
        let config = Config::from_yaml_str(yaml).unwrap();

        let first = config.build_registry().unwrap();
        let second = config.build_registry().unwrap();
        assert!(first.ptr_eq(&second));
    }
}
