use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

pub const CONFIG_FILE_NAME: &str = "vigrow.json";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub data_dir: Option<String>,
    #[serde(default)]
    pub files: FileNames,
    #[serde(default)]
    pub http: HttpSection,
    #[serde(default)]
    pub interactions: InteractionSection,
    #[serde(default)]
    pub occurrences: OccurrenceSection,
    #[serde(default)]
    pub enrichment: EnrichmentSection,
}

/// File names inside the data directory.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct FileNames {
    pub scientific_names: String,
    pub raw_interactions: String,
    pub canonical_interactions: String,
    pub checklist: String,
    pub enrichment: String,
    pub relationships: String,
    pub species: String,
    pub occurrences: String,
    pub occurrences_cleaned: String,
    pub companions: String,
    pub companion_relations: String,
}

impl Default for FileNames {
    fn default() -> Self {
        Self {
            scientific_names: "scientific_names.csv".to_string(),
            raw_interactions: "plant_animal_interactions.csv".to_string(),
            canonical_interactions: "plant_animal_interactions_canonical.csv".to_string(),
            checklist: "checklist.csv".to_string(),
            enrichment: "ala_animal_images.csv".to_string(),
            relationships: "relationship_dataset.csv".to_string(),
            species: "species_information_dataset.csv".to_string(),
            occurrences: "species_occurrences.csv".to_string(),
            occurrences_cleaned: "species_occurrences_cleaned.csv".to_string(),
            companions: "companion_planting.csv".to_string(),
            companion_relations: "companion_relations.csv".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpSection {
    pub timeout_secs: u64,
    pub user_agent: Option<String>,
}

impl Default for HttpSection {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            user_agent: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct InteractionSection {
    pub base_url: String,
    pub page_limit: usize,
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
    pub page_delay_ms: u64,
    pub organism_delay_ms: u64,
}

impl Default for InteractionSection {
    fn default() -> Self {
        Self {
            base_url: "https://api.globalbioticinteractions.org".to_string(),
            page_limit: 1024,
            retry_attempts: 3,
            retry_delay_ms: 200,
            page_delay_ms: 150,
            organism_delay_ms: 250,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OccurrenceSection {
    pub base_url: String,
    pub page_size: usize,
    pub max_per_species: Option<usize>,
    pub retry_attempts: u32,
    pub backoff_ms: u64,
    pub rate_limit_ms: u64,
}

impl Default for OccurrenceSection {
    fn default() -> Self {
        Self {
            base_url: "https://biocache-ws.ala.org.au/ws".to_string(),
            page_size: 500,
            max_per_species: Some(10_000),
            retry_attempts: 3,
            backoff_ms: 700,
            rate_limit_ms: 250,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EnrichmentSection {
    pub biocache_url: String,
    pub species_url: String,
    pub wikipedia_url: String,
    pub retry_attempts: u32,
    pub backoff_ms: u64,
    pub rate_limit_ms: u64,
    pub summary_max_chars: usize,
}

impl Default for EnrichmentSection {
    fn default() -> Self {
        Self {
            biocache_url: "https://biocache-ws.ala.org.au/ws".to_string(),
            species_url: "https://api.ala.org.au".to_string(),
            wikipedia_url: "https://en.wikipedia.org/api/rest_v1/page/summary".to_string(),
            retry_attempts: 3,
            backoff_ms: 800,
            rate_limit_ms: 600,
            summary_max_chars: 400,
        }
    }
}

/// Bounded retry with a linearly increasing delay (`base * attempt`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, base_delay_ms: u64) -> Self {
        Self {
            attempts: attempts.max(1),
            base_delay: Duration::from_millis(base_delay_ms),
        }
    }

    pub fn immediate(attempts: u32) -> Self {
        Self::new(attempts, 0)
    }

    /// Delay after the given failed attempt (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }
}

#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub timeout: Duration,
    pub user_agent: String,
}

#[derive(Debug, Clone)]
pub struct InteractionSettings {
    pub base_url: String,
    pub page_limit: usize,
    pub retry: RetryPolicy,
    pub page_delay: Duration,
    pub organism_delay: Duration,
}

#[derive(Debug, Clone)]
pub struct OccurrenceSettings {
    pub base_url: String,
    pub page_size: usize,
    pub max_per_species: Option<usize>,
    pub retry: RetryPolicy,
    pub rate_limit: Duration,
}

#[derive(Debug, Clone)]
pub struct EnrichmentSettings {
    pub biocache_url: String,
    pub species_url: String,
    pub wikipedia_url: String,
    pub retry: RetryPolicy,
    pub rate_limit: Duration,
    pub summary_max_chars: usize,
}

/// Configuration built once at start-up and passed by reference to every stage.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub data_dir: Utf8PathBuf,
    pub files: FileNames,
    pub http: HttpSettings,
    pub interactions: InteractionSettings,
    pub occurrences: OccurrenceSettings,
    pub enrichment: EnrichmentSettings,
}

impl ResolvedConfig {
    pub fn with_data_dir(mut self, data_dir: Utf8PathBuf) -> Self {
        self.data_dir = data_dir;
        self
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// An explicit path must exist. Without one, `./vigrow.json` and then the
    /// user config directory are tried before falling back to defaults.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, PipelineError> {
        let config_path = match path {
            Some(path) => Some(PathBuf::from(path)),
            None => default_config_paths().into_iter().find(|path| path.exists()),
        };

        let Some(config_path) = config_path else {
            return Self::resolve_config(Config::default());
        };

        let content = fs::read_to_string(&config_path)
            .map_err(|_| PipelineError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| PipelineError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, PipelineError> {
        let schema_version = config.schema_version.unwrap_or(1);
        if schema_version != 1 {
            return Err(PipelineError::InvalidConfig(format!(
                "unsupported schema_version {schema_version}"
            )));
        }
        if config.interactions.page_limit == 0 {
            return Err(PipelineError::InvalidConfig(
                "interactions.page_limit must be greater than zero".to_string(),
            ));
        }
        if config.occurrences.page_size == 0 {
            return Err(PipelineError::InvalidConfig(
                "occurrences.page_size must be greater than zero".to_string(),
            ));
        }
        if config.occurrences.max_per_species == Some(0) {
            return Err(PipelineError::InvalidConfig(
                "occurrences.max_per_species must be greater than zero when set".to_string(),
            ));
        }

        let data_dir = Utf8PathBuf::from(config.data_dir.unwrap_or_else(|| ".".to_string()));
        let user_agent = config
            .http
            .user_agent
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(default_user_agent);

        let interactions = config.interactions;
        let occurrences = config.occurrences;
        let enrichment = config.enrichment;

        Ok(ResolvedConfig {
            schema_version,
            data_dir,
            files: config.files,
            http: HttpSettings {
                timeout: Duration::from_secs(config.http.timeout_secs.max(1)),
                user_agent,
            },
            interactions: InteractionSettings {
                base_url: trim_base_url(&interactions.base_url),
                page_limit: interactions.page_limit,
                retry: RetryPolicy::new(interactions.retry_attempts, interactions.retry_delay_ms),
                page_delay: Duration::from_millis(interactions.page_delay_ms),
                organism_delay: Duration::from_millis(interactions.organism_delay_ms),
            },
            occurrences: OccurrenceSettings {
                base_url: trim_base_url(&occurrences.base_url),
                page_size: occurrences.page_size,
                max_per_species: occurrences.max_per_species,
                retry: RetryPolicy::new(occurrences.retry_attempts, occurrences.backoff_ms),
                rate_limit: Duration::from_millis(occurrences.rate_limit_ms),
            },
            enrichment: EnrichmentSettings {
                biocache_url: trim_base_url(&enrichment.biocache_url),
                species_url: trim_base_url(&enrichment.species_url),
                wikipedia_url: trim_base_url(&enrichment.wikipedia_url),
                retry: RetryPolicy::new(enrichment.retry_attempts, enrichment.backoff_ms),
                rate_limit: Duration::from_millis(enrichment.rate_limit_ms),
                summary_max_chars: enrichment.summary_max_chars.max(1),
            },
        })
    }
}

pub fn default_user_agent() -> String {
    format!("vigrow/{} (academic use)", env!("CARGO_PKG_VERSION"))
}

fn default_config_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from(CONFIG_FILE_NAME)];
    if let Some(dirs) = BaseDirs::new() {
        paths.push(dirs.config_dir().join("vigrow").join(CONFIG_FILE_NAME));
    }
    paths
}

fn trim_base_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_resolve() {
        let resolved = ConfigLoader::resolve_config(Config::default()).unwrap();
        assert_eq!(resolved.schema_version, 1);
        assert_eq!(resolved.interactions.page_limit, 1024);
        assert_eq!(resolved.occurrences.page_size, 500);
        assert_eq!(resolved.occurrences.max_per_species, Some(10_000));
        assert_eq!(resolved.data_dir, Utf8PathBuf::from("."));
    }

    #[test]
    fn retry_delay_is_linear() {
        let policy = RetryPolicy::new(3, 200);
        assert_eq!(policy.delay_after(1), Duration::from_millis(200));
        assert_eq!(policy.delay_after(3), Duration::from_millis(600));
        assert_eq!(RetryPolicy::new(0, 10).attempts, 1);
    }
}
