use reqwest::Url;
use reqwest::blocking::Client;
use serde_json::Value;

use crate::config::{EnrichmentSettings, HttpSettings, OccurrenceSettings, RetryPolicy};
use crate::error::PipelineError;
use crate::http::{self, Service};

const OCCURRENCE_FIELDS: &str = "decimalLatitude,decimalLongitude,eventDate,occurrenceID,\
recordedBy,locality,stateProvince,country,dataResourceName,basisOfRecord";

const VICTORIA_FILTERS: [&str; 3] = [
    "decimalLatitude:[* TO *]",
    "decimalLongitude:[* TO *]",
    "(stateProvince:\"Victoria\" OR stateProvince:\"VIC\")",
];

/// Species detail fields checked for a description, in priority order.
const SUMMARY_FIELDS: [&str; 7] = [
    "generalDescription",
    "briefDescription",
    "abstract",
    "summary",
    "shortDescription",
    "speciesProfile",
    "notes",
];

/// One occurrence hit from the biocache search. Coordinates are `None` when
/// absent or unparseable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OccurrenceHit {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub event_date: String,
    pub occurrence_id: String,
    pub recorded_by: String,
    pub locality: String,
    pub state_province: String,
    pub country: String,
    pub data_resource_name: String,
    pub basis_of_record: String,
}

#[derive(Debug, Clone, Default)]
pub struct OccurrencePage {
    pub hits: Vec<OccurrenceHit>,
    pub total_records: Option<u64>,
}

pub trait OccurrenceClient: Send + Sync {
    /// One page of Victorian occurrences with coordinates for a species.
    fn search_occurrences(
        &self,
        species: &str,
        start: usize,
        page_size: usize,
    ) -> Result<OccurrencePage, PipelineError>;
}

pub trait EnrichmentClient: Send + Sync {
    /// First image URL for a raw biocache query expression.
    fn image_url(&self, query: &str) -> Result<Option<String>, PipelineError>;
    fn species_guid(&self, name: &str) -> Result<Option<String>, PipelineError>;
    /// Untrimmed description text from the species detail record.
    fn species_description(&self, guid: &str) -> Result<Option<String>, PipelineError>;
    fn wikipedia_extract(&self, name: &str) -> Result<Option<String>, PipelineError>;
}

#[derive(Clone)]
pub struct AlaHttpClient {
    client: Client,
    wikipedia: Client,
    occurrences_url: String,
    occurrence_retry: RetryPolicy,
    biocache_url: String,
    species_url: String,
    wikipedia_url: String,
    enrichment_retry: RetryPolicy,
}

impl AlaHttpClient {
    pub fn new(
        http: &HttpSettings,
        occurrences: &OccurrenceSettings,
        enrichment: &EnrichmentSettings,
    ) -> Result<Self, PipelineError> {
        Ok(Self {
            client: http::build_client(http, Service::Ala)?,
            wikipedia: http::build_client(http, Service::Wikipedia)?,
            occurrences_url: occurrences.base_url.clone(),
            occurrence_retry: occurrences.retry,
            biocache_url: enrichment.biocache_url.clone(),
            species_url: enrichment.species_url.clone(),
            wikipedia_url: enrichment.wikipedia_url.clone(),
            enrichment_retry: enrichment.retry,
        })
    }

    fn get_json(
        &self,
        service: Service,
        policy: RetryPolicy,
        url: Url,
        query: &[(&str, String)],
    ) -> Result<Value, PipelineError> {
        let client = match service {
            Service::Wikipedia => &self.wikipedia,
            _ => &self.client,
        };
        let response =
            http::send_with_retries(service, policy, || client.get(url.clone()).query(query))?;
        let response = http::handle_status(service, response)?;
        response
            .json::<Value>()
            .map_err(|err| PipelineError::MalformedResponse(err.to_string()))
    }
}

impl OccurrenceClient for AlaHttpClient {
    fn search_occurrences(
        &self,
        species: &str,
        start: usize,
        page_size: usize,
    ) -> Result<OccurrencePage, PipelineError> {
        let url = endpoint(&self.occurrences_url, &["occurrences", "search"])?;
        let mut query = vec![("q", format!("taxon_name:\"{}\"", quote_term(species)))];
        query.extend(VICTORIA_FILTERS.iter().map(|filter| ("fq", filter.to_string())));
        query.push(("pageSize", page_size.to_string()));
        query.push(("start", start.to_string()));
        query.push(("disableAllQualityFilters", "true".to_string()));
        query.push(("fields", OCCURRENCE_FIELDS.to_string()));

        let value = self.get_json(Service::Ala, self.occurrence_retry, url, &query)?;
        Ok(parse_occurrence_page(&value))
    }
}

impl EnrichmentClient for AlaHttpClient {
    fn image_url(&self, query: &str) -> Result<Option<String>, PipelineError> {
        let url = endpoint(&self.biocache_url, &["occurrences", "search"])?;
        let params = [
            ("q", query.to_string()),
            ("fq", "multimedia:Image".to_string()),
            ("pageSize", "1".to_string()),
            ("fields", "imageUrl,smallImageUrl".to_string()),
        ];
        let value = self.get_json(Service::Ala, self.enrichment_retry, url, &params)?;
        Ok(first_image_url(&value))
    }

    fn species_guid(&self, name: &str) -> Result<Option<String>, PipelineError> {
        let url = endpoint(&self.species_url, &["species", "guid", name])?;
        let value = self.get_json(Service::Ala, self.enrichment_retry, url, &[])?;
        Ok(guid_from_response(&value))
    }

    fn species_description(&self, guid: &str) -> Result<Option<String>, PipelineError> {
        let url = endpoint(&self.species_url, &["species", guid])?;
        let value = self.get_json(Service::Ala, self.enrichment_retry, url, &[])?;
        Ok(description_from_details(&value))
    }

    fn wikipedia_extract(&self, name: &str) -> Result<Option<String>, PipelineError> {
        let title = name.trim().replace(' ', "_");
        let url = endpoint(&self.wikipedia_url, &[title.as_str()])?;
        let value = self.get_json(Service::Wikipedia, self.enrichment_retry, url, &[])?;
        Ok(["extract", "description"]
            .iter()
            .filter_map(|key| value.get(*key).and_then(Value::as_str))
            .find(|text| !text.trim().is_empty())
            .map(str::to_string))
    }
}

/// Appends percent-encoded path segments to a configured base URL.
fn endpoint(base: &str, segments: &[&str]) -> Result<Url, PipelineError> {
    let mut url =
        Url::parse(base).map_err(|err| PipelineError::InvalidConfig(format!("{base}: {err}")))?;
    url.path_segments_mut()
        .map_err(|_| PipelineError::InvalidConfig(format!("{base} cannot be a base URL")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

pub fn quote_term(name: &str) -> String {
    name.trim().replace('"', "\\\"")
}

/// Records of a biocache search, which appear under `occurrences`, `results`
/// or `content` depending on the endpoint version, or as a bare array.
pub fn response_records(value: &Value) -> &[Value] {
    if let Value::Array(items) = value {
        return items;
    }
    ["occurrences", "results", "content"]
        .iter()
        .filter_map(|key| value.get(*key).and_then(Value::as_array))
        .find(|items| !items.is_empty())
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

pub fn parse_occurrence_page(value: &Value) -> OccurrencePage {
    let hits = response_records(value)
        .iter()
        .map(|record| OccurrenceHit {
            latitude: number_field(record, "decimalLatitude"),
            longitude: number_field(record, "decimalLongitude"),
            event_date: text_field(record, "eventDate"),
            occurrence_id: text_field(record, "occurrenceID"),
            recorded_by: text_field(record, "recordedBy"),
            locality: text_field(record, "locality"),
            state_province: text_field(record, "stateProvince"),
            country: text_field(record, "country"),
            data_resource_name: text_field(record, "dataResourceName"),
            basis_of_record: text_field(record, "basisOfRecord"),
        })
        .collect();
    OccurrencePage {
        hits,
        total_records: value.get("totalRecords").and_then(Value::as_u64),
    }
}

pub fn first_image_url(value: &Value) -> Option<String> {
    let record = response_records(value).first()?;
    ["imageUrl", "smallImageUrl"]
        .iter()
        .filter_map(|key| record.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .find(|url| !url.is_empty())
        .map(str::to_string)
}

pub fn guid_from_response(value: &Value) -> Option<String> {
    let guid = match value {
        Value::String(guid) => Some(guid.as_str()),
        Value::Array(items) => return items.first().and_then(guid_from_response),
        Value::Object(_) => ["guid", "taxonConceptID", "id"]
            .iter()
            .find_map(|key| value.get(*key).and_then(Value::as_str)),
        _ => None,
    };
    guid.map(str::trim)
        .filter(|guid| !guid.is_empty())
        .map(str::to_string)
}

/// First non-blank description among the known detail fields. List-valued
/// fields contribute the `text` (or `value`) of their first entry.
pub fn description_from_details(value: &Value) -> Option<String> {
    if !value.is_object() {
        return None;
    }
    SUMMARY_FIELDS.iter().find_map(|key| {
        let text = match value.get(*key)? {
            Value::String(text) => text.as_str(),
            Value::Array(items) => {
                let first = items.first()?;
                first
                    .get("text")
                    .and_then(Value::as_str)
                    .filter(|text| !text.is_empty())
                    .or_else(|| first.get("value").and_then(Value::as_str))?
            }
            _ => return None,
        };
        (!text.trim().is_empty()).then(|| text.to_string())
    })
}

fn number_field(record: &Value, key: &str) -> Option<f64> {
    let value = match record.get(key)? {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    };
    value.filter(|value| value.is_finite())
}

fn text_field(record: &Value, key: &str) -> String {
    match record.get(key) {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Number(number)) => number.to_string(),
        Some(Value::Bool(flag)) => flag.to_string(),
        _ => String::new(),
    }
}
