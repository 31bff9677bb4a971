use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{self, StreamExt};
use serde::{Serialize, Serializer};
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, trace, warn};

use crate::cache::{CacheLookup, GeocodeCache};
use crate::config::{GeocodeConfig, GeocodeOptions, ResolvedOptions};
use crate::errors::{AppResult, RowError};
use crate::export::{deliver, OutputTarget};
use crate::handlers::HandlerRegistry;
use crate::ingestion::{read_rows, CoordinateColumns, Row};
use crate::normalize::{normalize, GeocodeResult};
use crate::transport::{HttpTransport, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionSource {
    /// The row already carried numeric coordinates.
    Provided,
    Cache,
    Api,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowOutcome {
    pub index: usize,
    pub source: ResolutionSource,
    pub error: Option<RowError>,
}

/// Sent once per row as soon as the row has its final field values.
#[derive(Debug, Clone, PartialEq)]
pub struct RowEvent {
    pub index: usize,
    pub source: ResolutionSource,
    pub error: Option<RowError>,
    pub row: Row,
}

pub type RowEvents = UnboundedSender<RowEvent>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub successes: usize,
    pub failures: usize,
    pub skipped: usize,
    pub cache_hits: usize,
    pub requests: usize,
    #[serde(rename = "time", serialize_with = "serialize_millis")]
    pub elapsed: Duration,
}

impl RunSummary {
    fn tally(
        rows: &[Row],
        outcomes: &[RowOutcome],
        columns: &CoordinateColumns,
        elapsed: Duration,
    ) -> Self {
        let successes = rows.iter().filter(|row| row.has_coordinates(columns)).count();
        let count = |source: ResolutionSource| {
            outcomes
                .iter()
                .filter(|outcome| outcome.source == source)
                .count()
        };
        Self {
            successes,
            failures: rows.len() - successes,
            skipped: count(ResolutionSource::Provided),
            cache_hits: count(ResolutionSource::Cache),
            requests: count(ResolutionSource::Api),
            elapsed,
        }
    }

    pub fn time_ms(&self) -> u64 {
        u64::try_from(self.elapsed.as_millis()).unwrap_or(u64::MAX)
    }
}

fn serialize_millis<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
}

/// Rows in input order with their outcomes and the run summary.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub rows: Vec<Row>,
    pub outcomes: Vec<RowOutcome>,
    pub summary: RunSummary,
}

struct RunContext<'a> {
    columns: &'a CoordinateColumns,
    cache: &'a GeocodeCache,
    events: Option<&'a RowEvents>,
}

pub struct Geocoder {
    options: ResolvedOptions,
    transport: Arc<dyn Transport>,
}

impl Geocoder {
    pub fn new(options: ResolvedOptions, transport: Arc<dyn Transport>) -> Self {
        Self { options, transport }
    }

    pub fn with_http(options: ResolvedOptions, config: &GeocodeConfig) -> AppResult<Self> {
        let transport = HttpTransport::new(config)?;
        Ok(Self::new(options, Arc::new(transport)))
    }

    /// Geocodes every row and returns them in input order. Per-row failures
    /// are recorded on the outcomes; the run itself cannot fail.
    pub async fn run(&self, rows: Vec<Row>, events: Option<RowEvents>) -> RunReport {
        let started = Instant::now();
        let total = rows.len();
        let columns = CoordinateColumns::resolve(
            self.options.lat.as_deref(),
            self.options.lng.as_deref(),
            rows.first(),
        );
        let cache = GeocodeCache::new();
        let ctx = RunContext {
            columns: &columns,
            cache: &cache,
            events: events.as_ref(),
        };
        info!(
            total,
            concurrency = self.options.concurrency,
            handler = self.options.handler.name(),
            "geocoding rows"
        );

        let settled: Vec<(Row, RowOutcome)> = stream::iter(rows.into_iter().enumerate())
            .map(|(index, row)| self.code_row(&ctx, index, row))
            .buffered(self.options.concurrency)
            .collect()
            .await;
        let (rows, outcomes): (Vec<Row>, Vec<RowOutcome>) = settled.into_iter().unzip();

        let summary = RunSummary::tally(&rows, &outcomes, &columns, started.elapsed());
        info!(
            successes = summary.successes,
            failures = summary.failures,
            skipped = summary.skipped,
            cache_hits = summary.cache_hits,
            requests = summary.requests,
            time_ms = summary.time_ms(),
            "geocoding finished"
        );
        RunReport {
            rows,
            outcomes,
            summary,
        }
    }

    /// Runs the rows, then writes them to `output` unless the options are in test mode.
    pub async fn run_to(
        &self,
        rows: Vec<Row>,
        output: OutputTarget,
        events: Option<RowEvents>,
    ) -> AppResult<RunReport> {
        output.validate()?;
        let report = self.run(rows, events).await;
        if self.options.test {
            debug!("test mode; output not written");
        } else {
            deliver(output, &report.rows)?;
        }
        Ok(report)
    }

    async fn code_row(&self, ctx: &RunContext<'_>, index: usize, mut row: Row) -> (Row, RowOutcome) {
        let columns = ctx.columns;
        if !self.options.force && row.has_coordinates(columns) {
            trace!(index, "row already has coordinates");
            return self.settle(ctx, index, row, ResolutionSource::Provided, None);
        }

        let url = self.options.template.render(&row);
        let url_ref = url.as_str();
        let lookup = ctx
            .cache
            .get_or_fetch(url_ref, move || self.request(url_ref))
            .await;

        let (source, error) = match lookup {
            CacheLookup::Hit(result) => {
                trace!(index, url = %url, "served from cache");
                self.apply_result(columns, &mut row, &result);
                (ResolutionSource::Cache, None)
            }
            CacheLookup::Fetched(result) => {
                self.apply_result(columns, &mut row, &result);
                (ResolutionSource::Api, None)
            }
            CacheLookup::Failed(err) => {
                self.reject(columns, &mut row, &err);
                warn!(index, url = %url, error = %err, "row not geocoded");
                (ResolutionSource::Api, Some(err))
            }
            CacheLookup::Joined(err) => {
                self.reject(columns, &mut row, &err);
                warn!(index, url = %url, error = %err, "row not geocoded; shared an in-flight failure");
                (ResolutionSource::Cache, Some(err))
            }
        };

        let responded = source == ResolutionSource::Api
            && error.as_ref().map_or(true, RowError::after_response);
        let settled = self.settle(ctx, index, row, source, error);
        if responded && !self.options.delay.is_zero() {
            sleep(self.options.delay).await;
        }
        settled
    }

    async fn request(&self, url: &str) -> Result<GeocodeResult, RowError> {
        debug!(url, "requesting geocode");
        let response = self
            .transport
            .get(url)
            .await
            .map_err(|err| RowError::Transport(err.to_string()))?;
        if response.status != 200 {
            return Err(RowError::HttpStatus(response.status));
        }
        normalize(&self.options.handler, &response.body)
    }

    fn apply_result(&self, columns: &CoordinateColumns, row: &mut Row, result: &GeocodeResult) {
        row.set(&columns.lat, result.lat);
        row.set(&columns.lng, result.lng);
        if let Some(column) = &self.options.location {
            row.set(column, result.location.to_value());
        }
    }

    fn reject(&self, columns: &CoordinateColumns, row: &mut Row, err: &RowError) {
        if matches!(err, RowError::Provider(_)) {
            row.set(&columns.lat, "");
            row.set(&columns.lng, "");
        }
    }

    fn settle(
        &self,
        ctx: &RunContext<'_>,
        index: usize,
        row: Row,
        source: ResolutionSource,
        error: Option<RowError>,
    ) -> (Row, RowOutcome) {
        if let Some(events) = ctx.events {
            let _ = events.send(RowEvent {
                index,
                source,
                error: error.clone(),
                row: row.clone(),
            });
        }
        (
            row,
            RowOutcome {
                index,
                source,
                error,
            },
        )
    }
}

/// Reads `input`, geocodes it over HTTP and writes the result to `output`.
///
/// Options, output and handler are all validated before the input is read.
pub async fn geocode_file(
    input: impl AsRef<Path>,
    output: OutputTarget,
    options: GeocodeOptions,
    config: &GeocodeConfig,
    events: Option<RowEvents>,
) -> AppResult<RunReport> {
    let resolved = options.resolve(config, &HandlerRegistry::builtin())?;
    output.validate()?;
    let geocoder = Geocoder::with_http(resolved, config)?;
    let rows = read_rows(input)?;
    geocoder.run_to(rows, output, events).await
}
