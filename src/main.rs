use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use csvgeocode::{
    geocode_file, init_tracing, GeocodeConfig, GeocodeOptions, OutputTarget, RowEvent,
};

/// Geocode the rows of a CSV file through a templated geocoding API.
#[derive(Debug, Parser)]
#[command(name = "csvgeocode", version, about)]
struct Cli {
    /// CSV file with one address per row
    input: PathBuf,
    /// Where to write the geocoded CSV; stdout when omitted
    output: Option<PathBuf>,
    /// Request URL template, e.g. "https://maps.googleapis.com/maps/api/geocode/json?address={{address}}&key=KEY"
    #[arg(long)]
    url: Option<String>,
    /// Built-in response handler (google, mapbox, nominatim)
    #[arg(long)]
    handler: Option<String>,
    /// Latitude column; discovered from the header when omitted
    #[arg(long)]
    lat: Option<String>,
    /// Longitude column; discovered from the header when omitted
    #[arg(long)]
    lng: Option<String>,
    /// Column that receives structured address metadata as JSON
    #[arg(long)]
    location: Option<String>,
    /// Milliseconds to wait after each response
    #[arg(long)]
    delay: Option<u64>,
    /// Rows geocoded at the same time
    #[arg(long)]
    concurrency: Option<usize>,
    /// Geocode rows even when they already have coordinates
    #[arg(long)]
    force: bool,
    /// Geocode without writing any output
    #[arg(long)]
    test: bool,
    /// Log every row
    #[arg(long)]
    verbose: bool,
}

impl Cli {
    fn options(&self) -> GeocodeOptions {
        let mut options = GeocodeOptions {
            url: self.url.clone(),
            lat: self.lat.clone(),
            lng: self.lng.clone(),
            force: self.force,
            test: self.test,
            location: self.location.clone(),
            concurrency: self.concurrency,
            delay: self.delay.map(Duration::from_millis),
            ..GeocodeOptions::default()
        };
        if let Some(name) = &self.handler {
            options = options.handler_name(name.as_str());
        }
        options
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(if cli.verbose {
        "info,csvgeocode=debug"
    } else {
        "info"
    });

    let config = GeocodeConfig::from_env();
    let output = match &cli.output {
        Some(path) => OutputTarget::Path(path.clone()),
        None => OutputTarget::Stdout,
    };

    let (tx, mut rx) = mpsc::unbounded_channel::<RowEvent>();
    let verbose = cli.verbose;
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match &event.error {
                Some(err) => warn!(row = event.index + 1, "{err}"),
                None if verbose => debug!(row = event.index + 1, source = ?event.source, "geocoded"),
                None => {}
            }
        }
    });

    let report = geocode_file(&cli.input, output, cli.options(), &config, Some(tx))
        .await
        .with_context(|| format!("failed to geocode {}", cli.input.display()))?;
    printer.await.context("row event printer panicked")?;

    if report.summary.failures > 0 {
        info!(
            failures = report.summary.failures,
            "some rows were not geocoded; rerun to retry them"
        );
    }
    Ok(())
}
