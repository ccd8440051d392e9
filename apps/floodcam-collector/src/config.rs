use config::{Config, ConfigError, Environment, File};
use floodcam_codec::DecoderConfig;
use floodcam_node::ReassemblyConfig;
use serde::de::{self, Deserializer, Visitor};
use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Where finalized images go.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// One row per image in a SQLite database.
    Sqlite,
    /// One `.jpg` file per image in a directory.
    Directory,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CollectorConfig {
    pub chunk_topic_prefix: String,
    #[serde(deserialize_with = "deserialize_list")]
    pub envelope_topics: Vec<String>,
    #[serde(with = "humantime_serde")]
    pub staleness: Duration,
    #[serde(with = "humantime_serde")]
    pub eviction_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub tombstone_ttl: Duration,
    pub tombstone_capacity: usize,
    pub max_open_assemblies: usize,
    pub max_object_size: u32,
    pub ingest_queue_capacity: usize,
    pub completed_queue_capacity: usize,
    pub persistence_retries: u32,
    pub pair_capacity: usize,
    pub store: StoreKind,
    pub database_path: PathBuf,
    pub image_dir: PathBuf,
}

fn deserialize_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    struct ListVisitor;

    impl<'de> Visitor<'de> for ListVisitor {
        type Value = Vec<String>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a string or a sequence of strings")
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(split_list(value))
        }

        fn visit_seq<S>(self, mut seq: S) -> Result<Self::Value, S::Error>
        where
            S: de::SeqAccess<'de>,
        {
            let mut vec = Vec::new();
            while let Some(element) = seq.next_element()? {
                vec.push(element);
            }
            Ok(vec)
        }
    }

    deserializer.deserialize_any(ListVisitor)
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(|c| c == ',' || c == ';')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

impl CollectorConfig {
    pub fn new(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let defaults = ReassemblyConfig::default();
        let mut builder = Config::builder()
            .set_default("chunk_topic_prefix", defaults.decoder.chunk_topic_prefix)?
            .set_default("envelope_topics", defaults.decoder.envelope_topics)?
            .set_default("staleness", "30s")?
            .set_default("eviction_interval", "5s")?
            .set_default("tombstone_ttl", "10m")?
            .set_default("tombstone_capacity", defaults.tombstone_capacity as u64)?
            .set_default("max_open_assemblies", defaults.max_open_assemblies as u64)?
            .set_default("max_object_size", u64::from(defaults.max_object_size))?
            .set_default("ingest_queue_capacity", defaults.ingest_queue_capacity as u64)?
            .set_default(
                "completed_queue_capacity",
                defaults.completed_queue_capacity as u64,
            )?
            .set_default("persistence_retries", u64::from(defaults.persistence_retries))?
            .set_default("pair_capacity", defaults.pair_capacity as u64)?
            .set_default("store", "sqlite")?
            .set_default("database_path", "data/floodcam.db")?
            .set_default("image_dir", "data/images")?;

        if let Some(path) = config_path {
            if path.extension().and_then(|ext| ext.to_str()) == Some("env") {
                // Loaded into the process environment so the FLOODCAM_ source sees it.
                match dotenvy::from_path(&path) {
                    Ok(_) => tracing::info!("loaded environment from {}", path.display()),
                    Err(err) => {
                        tracing::warn!("failed to load .env from {}: {}", path.display(), err)
                    }
                }
            } else {
                builder = builder.add_source(File::from(path));
            }
        }

        builder = builder.add_source(Environment::with_prefix("FLOODCAM").try_parsing(true));

        builder.build()?.try_deserialize()
    }

    /// Runtime settings for the collector service.
    pub fn reassembly(&self) -> ReassemblyConfig {
        ReassemblyConfig {
            decoder: DecoderConfig {
                chunk_topic_prefix: self.chunk_topic_prefix.trim_end_matches('/').to_string(),
                envelope_topics: self.envelope_topics.clone(),
            },
            staleness: self.staleness,
            eviction_interval: self.eviction_interval,
            tombstone_ttl: self.tombstone_ttl,
            tombstone_capacity: self.tombstone_capacity,
            max_open_assemblies: self.max_open_assemblies,
            max_object_size: self.max_object_size,
            ingest_queue_capacity: self.ingest_queue_capacity,
            completed_queue_capacity: self.completed_queue_capacity,
            persistence_retries: self.persistence_retries,
            pair_capacity: self.pair_capacity,
        }
    }
}
