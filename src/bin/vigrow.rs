use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use vigrow_pipeline::ala::{
    AlaHttpClient, EnrichmentClient, OccurrenceClient, OccurrencePage,
};
use vigrow_pipeline::app::{App, ProgressSink, ProgressSinkKind, StageReport};
use vigrow_pipeline::config::{ConfigLoader, ResolvedConfig};
use vigrow_pipeline::domain::InteractionType;
use vigrow_pipeline::error::PipelineError;
use vigrow_pipeline::globi::{
    GlobiHttpClient, InteractionClient, InteractionRow, PageRequest, PageStrategy,
};
use vigrow_pipeline::output::{JsonOutput, OutputMode};
use vigrow_pipeline::tui::Tui;

#[derive(Parser)]
#[command(name = "vigrow")]
#[command(about = "Builds the plant, animal and occurrence tables behind the gardening app")]
#[command(version, author)]
struct Cli {
    /// Print one JSON report instead of the progress dashboard.
    #[arg(long, global = true)]
    non_interactive: bool,

    /// Path to vigrow.json.
    #[arg(long, global = true)]
    config: Option<String>,

    /// Directory holding the input and output tables.
    #[arg(long, global = true)]
    data_dir: Option<Utf8PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Clone, Copy)]
enum Command {
    #[command(about = "Fetch plant-animal interactions from GloBI (resumable)")]
    FetchInteractions,
    #[command(about = "Map raw interaction labels onto the canonical vocabulary")]
    Canonicalize,
    #[command(about = "Join interactions with the checklist and enrichment into species tables")]
    Resolve,
    #[command(about = "Fetch an image and a summary per documented animal (resumable)")]
    FetchEnrichment,
    #[command(about = "Fetch Victorian occurrence records per species (resumable)")]
    FetchOccurrences,
    #[command(about = "Reduce occurrences to species, coordinates and date")]
    CleanOccurrences,
    #[command(about = "Drop species failing retention rules and cascade to dependent tables")]
    Sync,
    #[command(about = "Validate and normalise the companion planting table")]
    Companions,
    #[command(about = "Run canonicalize, resolve and sync in order")]
    Run,
}

impl Command {
    fn kind(self) -> ProgressSinkKind {
        match self {
            Command::FetchInteractions => ProgressSinkKind::Interactions,
            Command::Canonicalize => ProgressSinkKind::Canonicalize,
            Command::Resolve => ProgressSinkKind::Resolve,
            Command::FetchEnrichment => ProgressSinkKind::Enrichment,
            Command::FetchOccurrences => ProgressSinkKind::Occurrences,
            Command::CleanOccurrences => ProgressSinkKind::CleanOccurrences,
            Command::Sync => ProgressSinkKind::Sync,
            Command::Companions => ProgressSinkKind::Companions,
            Command::Run => ProgressSinkKind::Run,
        }
    }

    fn uses_network(self) -> bool {
        matches!(
            self,
            Command::FetchInteractions | Command::FetchEnrichment | Command::FetchOccurrences
        )
    }
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<PipelineError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &PipelineError) -> u8 {
    match error {
        PipelineError::ConfigRead(_)
        | PipelineError::ConfigParse(_)
        | PipelineError::InvalidConfig(_)
        | PipelineError::MissingInput(_)
        | PipelineError::MissingColumn { .. }
        | PipelineError::Csv { .. }
        | PipelineError::InvalidRelation(_)
        | PipelineError::InvalidCompanionRow { .. } => 2,
        err if err.is_remote() => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };

    let mut config = ConfigLoader::resolve(cli.config.as_deref())?;
    if let Some(data_dir) = cli.data_dir {
        config = config.with_data_dir(data_dir);
    }

    if cli.command.uses_network() {
        let globi = GlobiHttpClient::new(&config.http, &config.interactions)?;
        let ala = AlaHttpClient::new(&config.http, &config.occurrences, &config.enrichment)?;
        execute(App::new(&config, globi, ala), &config, cli.command, output_mode)
    } else {
        execute(App::new(&config, Offline, Offline), &config, cli.command, output_mode)
    }
}

fn execute<G, A>(
    app: App<G, A>,
    config: &ResolvedConfig,
    command: Command,
    output_mode: OutputMode,
) -> miette::Result<()>
where
    G: InteractionClient + 'static,
    A: OccurrenceClient + EnrichmentClient + 'static,
{
    match output_mode {
        OutputMode::NonInteractive => {
            let report = dispatch(&app, command, &JsonOutput)?;
            JsonOutput::print_report(&report).into_diagnostic()?;
        }
        OutputMode::Interactive => {
            let mut tui = Tui::new(command.kind(), &config.data_dir);
            let report = tui.run(move |sink| dispatch(&app, command, sink))?;
            print_summary(&report);
        }
    }
    Ok(())
}

fn dispatch<G, A>(
    app: &App<G, A>,
    command: Command,
    sink: &dyn ProgressSink,
) -> Result<StageReport, PipelineError>
where
    G: InteractionClient,
    A: OccurrenceClient + EnrichmentClient,
{
    Ok(match command {
        Command::FetchInteractions => StageReport::FetchInteractions(app.fetch_interactions(sink)?),
        Command::Canonicalize => StageReport::Canonicalize(app.canonicalize(sink)?),
        Command::Resolve => StageReport::Resolve(app.resolve(sink)?),
        Command::FetchEnrichment => StageReport::FetchEnrichment(app.fetch_enrichment(sink)?),
        Command::FetchOccurrences => StageReport::FetchOccurrences(app.fetch_occurrences(sink)?),
        Command::CleanOccurrences => StageReport::CleanOccurrences(app.clean_occurrences(sink)?),
        Command::Sync => StageReport::Sync(app.sync(sink)?),
        Command::Companions => StageReport::Companions(app.companions(sink)?),
        Command::Run => StageReport::Run(app.run(sink)?),
    })
}

fn print_summary(report: &StageReport) {
    let green = "\x1b[32m";
    let yellow = "\x1b[33m";
    let cyan = "\x1b[36m";
    let reset = "\x1b[0m";

    let lines: Vec<(bool, String)> = match report {
        StageReport::FetchInteractions(result) => vec![
            (true, format!("organisms fetched: {}", result.completed)),
            (true, format!("already done: {}", result.skipped)),
            (true, format!("rows written: {}", result.rows_written)),
            (
                result.distinct_lookups == 0,
                format!("distinct-list fallbacks: {}", result.distinct_lookups),
            ),
        ],
        StageReport::Canonicalize(stats) => vec![
            (true, format!("rows in: {}", stats.input_rows)),
            (true, format!("rows out: {}", stats.output_rows)),
            (true, format!("duplicates removed: {}", stats.duplicate_triples)),
            (
                stats.unmapped_labels.is_empty(),
                format!("unmapped labels: {}", stats.unmapped_labels.len()),
            ),
        ],
        StageReport::Resolve(result) => vec![
            (true, format!("species written: {}", result.species_written)),
            (true, format!("relationships written: {}", result.relationships_written)),
            (
                result.unmatched_animals == 0,
                format!("animals not in checklist: {}", result.unmatched_animals),
            ),
            (
                result.missing_enrichment == 0,
                format!("animals without enrichment: {}", result.missing_enrichment),
            ),
        ],
        StageReport::FetchEnrichment(result) => vec![
            (true, format!("animals enriched: {}", result.completed)),
            (true, format!("already done: {}", result.skipped)),
            (true, format!("images found: {}", result.images_found)),
            (true, format!("summaries found: {}", result.summaries_found)),
        ],
        StageReport::FetchOccurrences(result) => vec![
            (true, format!("species completed: {}", result.completed)),
            (true, format!("already done: {}", result.skipped)),
            (true, format!("rows written: {}", result.rows_written)),
            (result.failed == 0, format!("species failed: {}", result.failed)),
        ],
        StageReport::CleanOccurrences(result) => vec![
            (true, format!("rows out: {}", result.output_rows)),
            (true, format!("duplicates removed: {}", result.duplicates)),
            (
                result.invalid_coordinates == 0,
                format!("invalid coordinates: {}", result.invalid_coordinates),
            ),
        ],
        StageReport::Sync(result) => sync_lines(result),
        StageReport::Companions(result) => vec![
            (true, format!("relations written: {}", result.rows_written)),
            (true, format!("plants: {}", result.plants)),
            (result.duplicates == 0, format!("duplicates skipped: {}", result.duplicates)),
        ],
        StageReport::Run(result) => {
            let mut lines = vec![
                (true, format!("canonical rows: {}", result.canonicalize.output_rows)),
                (true, format!("species written: {}", result.resolve.species_written)),
            ];
            lines.extend(sync_lines(&result.sync));
            lines
        }
    };

    println!("{cyan}vigrow summary{reset}");
    for (ok, line) in lines {
        let color = if ok { green } else { yellow };
        println!("{color}  {line}{reset}");
    }
}

fn sync_lines(result: &vigrow_pipeline::sync::SyncResult) -> Vec<(bool, String)> {
    let mut lines = vec![
        (true, format!("species kept: {}", result.species_kept)),
        (
            result.species_removed == 0,
            format!("species removed: {}", result.species_removed),
        ),
        (true, format!("relationships kept: {}", result.relationships_kept)),
    ];
    if let Some(kept) = result.occurrences_kept {
        lines.push((true, format!("occurrences kept: {kept}")));
    }
    lines
}

/// Client for the commands that never touch the network.
struct Offline;

fn offline() -> PipelineError {
    PipelineError::InvalidConfig("this command does not use remote services".to_string())
}

impl InteractionClient for Offline {
    fn resolve_name(&self, _name: &str) -> Result<Option<String>, PipelineError> {
        Err(offline())
    }

    fn fetch_page(
        &self,
        _request: &PageRequest<'_>,
        _strategy: PageStrategy,
    ) -> Result<Vec<InteractionRow>, PipelineError> {
        Err(offline())
    }

    fn fetch_distinct(
        &self,
        _organism: &str,
        _interaction: InteractionType,
    ) -> Result<Vec<String>, PipelineError> {
        Err(offline())
    }
}

impl OccurrenceClient for Offline {
    fn search_occurrences(
        &self,
        _species: &str,
        _start: usize,
        _page_size: usize,
    ) -> Result<OccurrencePage, PipelineError> {
        Err(offline())
    }
}

impl EnrichmentClient for Offline {
    fn image_url(&self, _query: &str) -> Result<Option<String>, PipelineError> {
        Err(offline())
    }

    fn species_guid(&self, _name: &str) -> Result<Option<String>, PipelineError> {
        Err(offline())
    }

    fn species_description(&self, _guid: &str) -> Result<Option<String>, PipelineError> {
        Err(offline())
    }

    fn wikipedia_extract(&self, _name: &str) -> Result<Option<String>, PipelineError> {
        Err(offline())
    }
}
