use csv::ReaderBuilder;
use reqwest::blocking::Client;
use serde_json::Value;

use crate::config::{HttpSettings, InteractionSettings};
use crate::domain::InteractionType;
use crate::error::PipelineError;
use crate::http::{self, Service};
use crate::table::{ColumnMap, ColumnSpec};

const CSV_FIELDS: &str = "source_taxon_name,target_taxon_name,interaction_type";

const INTERACTION_COLUMNS: &[ColumnSpec] = &[
    ColumnSpec::required("source", &["source_taxon_name"]),
    ColumnSpec::required("target", &["target_taxon_name"]),
    ColumnSpec::optional("type", &["interaction_type"]),
];

/// One interaction as returned by the service, before the counterpart of the
/// queried organism is picked out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InteractionRow {
    pub source_taxon_name: String,
    pub target_taxon_name: String,
    pub interaction_type: String,
}

/// Request formats tried in order for every page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageStrategy {
    CsvWithFields,
    Csv,
    JsonV2,
}

impl PageStrategy {
    pub const ORDER: [PageStrategy; 3] = [
        PageStrategy::CsvWithFields,
        PageStrategy::Csv,
        PageStrategy::JsonV2,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            PageStrategy::CsvWithFields => "A1",
            PageStrategy::Csv => "A2",
            PageStrategy::JsonV2 => "A3",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PageRequest<'a> {
    pub organism: &'a str,
    pub interaction: InteractionType,
    pub offset: usize,
    pub limit: usize,
}

pub trait InteractionClient: Send + Sync {
    /// Preferred name for a free-text organism name, if the service knows it.
    fn resolve_name(&self, name: &str) -> Result<Option<String>, PipelineError>;
    fn fetch_page(
        &self,
        request: &PageRequest<'_>,
        strategy: PageStrategy,
    ) -> Result<Vec<InteractionRow>, PipelineError>;
    /// Unpaginated list of counterpart names for one organism and type.
    fn fetch_distinct(
        &self,
        organism: &str,
        interaction: InteractionType,
    ) -> Result<Vec<String>, PipelineError>;
}

#[derive(Clone)]
pub struct GlobiHttpClient {
    client: Client,
    base_url: String,
}

impl GlobiHttpClient {
    pub fn new(http: &HttpSettings, settings: &InteractionSettings) -> Result<Self, PipelineError> {
        Ok(Self {
            client: http::build_client(http, Service::Globi)?,
            base_url: settings.base_url.clone(),
        })
    }

    fn get_text(&self, url: &str, query: &[(&str, String)]) -> Result<String, PipelineError> {
        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .map_err(|err| PipelineError::GlobiHttp(err.to_string()))?;
        let response = http::handle_status(Service::Globi, response)?;
        response
            .text()
            .map_err(|err| PipelineError::GlobiHttp(err.to_string()))
    }
}

impl InteractionClient for GlobiHttpClient {
    fn resolve_name(&self, name: &str) -> Result<Option<String>, PipelineError> {
        let url = format!("{}/find", self.base_url);
        let body = self.get_text(&url, &[("name", name.to_string())])?;
        let value: Value = serde_json::from_str(&body)
            .map_err(|err| PipelineError::MalformedResponse(err.to_string()))?;
        Ok(preferred_name(&value))
    }

    fn fetch_page(
        &self,
        request: &PageRequest<'_>,
        strategy: PageStrategy,
    ) -> Result<Vec<InteractionRow>, PipelineError> {
        let url = format!("{}/interaction", self.base_url);
        let mut query = vec![
            ("interactionType", request.interaction.as_str().to_string()),
            (
                request.interaction.role().query_param(),
                request.organism.to_string(),
            ),
            ("limit", request.limit.to_string()),
            ("offset", request.offset.to_string()),
        ];
        match strategy {
            PageStrategy::CsvWithFields => {
                query.push(("type", "csv".to_string()));
                query.push(("fields", CSV_FIELDS.to_string()));
                parse_interaction_csv(&self.get_text(&url, &query)?)
            }
            PageStrategy::Csv => {
                query.push(("type", "csv".to_string()));
                parse_interaction_csv(&self.get_text(&url, &query)?)
            }
            PageStrategy::JsonV2 => {
                query.push(("type", "json.v2".to_string()));
                let body = self.get_text(&url, &query)?;
                let value: Value = serde_json::from_str(&body)
                    .map_err(|err| PipelineError::MalformedResponse(err.to_string()))?;
                Ok(parse_interaction_json(&value))
            }
        }
    }

    fn fetch_distinct(
        &self,
        organism: &str,
        interaction: InteractionType,
    ) -> Result<Vec<String>, PipelineError> {
        let mut url = reqwest::Url::parse(&self.base_url)
            .map_err(|err| PipelineError::InvalidConfig(format!("interactions.base_url: {err}")))?;
        url.path_segments_mut()
            .map_err(|_| PipelineError::InvalidConfig("interactions.base_url cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(["taxon", organism, interaction.as_str()]);
        let body = self.get_text(url.as_str(), &[("type", "csv".to_string())])?;
        parse_distinct_csv(&body)
    }
}

/// `preferredName` (else `name`) of the first match in a `/find` response.
pub fn preferred_name(value: &Value) -> Option<String> {
    let item = match value {
        Value::Array(items) => items.first()?,
        Value::Object(_) => value,
        _ => return None,
    };
    ["preferredName", "name"]
        .iter()
        .filter_map(|key| item.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .find(|name| !name.is_empty())
        .map(str::to_string)
}

pub fn parse_interaction_csv(body: &str) -> Result<Vec<InteractionRow>, PipelineError> {
    if body.trim().is_empty() {
        return Ok(Vec::new());
    }
    let mut reader = ReaderBuilder::new()
        .flexible(true)
        .from_reader(body.as_bytes());
    let headers = reader
        .headers()
        .map_err(|err| PipelineError::MalformedResponse(err.to_string()))?
        .clone();
    let columns = ColumnMap::resolve("interaction response", &headers, INTERACTION_COLUMNS)
        .map_err(|err| PipelineError::MalformedResponse(err.to_string()))?;
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|err| PipelineError::MalformedResponse(err.to_string()))?;
        rows.push(InteractionRow {
            source_taxon_name: columns.get(&record, "source").to_string(),
            target_taxon_name: columns.get(&record, "target").to_string(),
            interaction_type: columns.get(&record, "type").to_string(),
        });
    }
    Ok(rows)
}

pub fn parse_interaction_json(value: &Value) -> Vec<InteractionRow> {
    let records = value
        .get("data")
        .or_else(|| value.get("records"))
        .and_then(Value::as_array);
    let Some(records) = records else {
        return Vec::new();
    };

    let name_of = |item: &Value, side: &str| {
        item.get(side)
            .and_then(|side| side.get("name"))
            .and_then(Value::as_str)
            .map(|name| name.trim().to_string())
            .unwrap_or_default()
    };

    records
        .iter()
        .filter_map(|item| {
            let source = name_of(item, "source");
            let target = name_of(item, "target");
            if source.is_empty() && target.is_empty() {
                return None;
            }
            let interaction_type = item
                .get("interactionType")
                .or_else(|| item.get("interaction_type"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .trim()
                .to_string();
            Some(InteractionRow {
                source_taxon_name: source,
                target_taxon_name: target,
                interaction_type,
            })
        })
        .collect()
}

/// Names from every column whose header mentions a name or taxon, falling
/// back to the first column.
pub fn parse_distinct_csv(body: &str) -> Result<Vec<String>, PipelineError> {
    if body.trim().is_empty() {
        return Ok(Vec::new());
    }
    let mut reader = ReaderBuilder::new()
        .flexible(true)
        .from_reader(body.as_bytes());
    let headers = reader
        .headers()
        .map_err(|err| PipelineError::MalformedResponse(err.to_string()))?
        .clone();
    let mut columns = headers
        .iter()
        .enumerate()
        .filter(|(_, header)| {
            let header = header.to_lowercase();
            header.contains("name") || header.contains("taxon")
        })
        .map(|(index, _)| index)
        .collect::<Vec<_>>();
    if columns.is_empty() && !headers.is_empty() {
        columns.push(0);
    }

    let records = reader
        .records()
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| PipelineError::MalformedResponse(err.to_string()))?;
    let mut names = Vec::new();
    for column in columns {
        for record in &records {
            if let Some(value) = record.get(column).map(str::trim).filter(|v| !v.is_empty()) {
                names.push(value.to_string());
            }
        }
    }
    Ok(names)
}
