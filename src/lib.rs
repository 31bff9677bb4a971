mod cache;
mod config;
mod errors;
mod export;
mod geocoder;
mod handlers;
mod ingestion;
mod normalize;
mod render;
mod transport;

use once_cell::sync::OnceCell;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use cache::{CacheLookup, GeocodeCache};
pub use config::{GeocodeConfig, GeocodeOptions, HandlerChoice, ResolvedOptions};
pub use errors::{AppError, AppResult, HandlerError, RowError, TransportError};
pub use export::{deliver, stringify, write_rows, OutputTarget};
pub use geocoder::{
    geocode_file, Geocoder, ResolutionSource, RowEvent, RowEvents, RowOutcome, RunReport,
    RunSummary,
};
pub use handlers::{Handler, HandlerOutcome, HandlerRegistry};
pub use ingestion::{cell_text, is_numeric, parse_rows, read_rows, CoordinateColumns, Row};
pub use normalize::{extract_location, normalize, GeocodeResult, LocationMetadata};
pub use render::{escape_value, UrlTemplate};
pub use transport::{HttpResponse, HttpTransport, Transport};

/// Installs the stderr log subscriber once; `RUST_LOG` overrides `default_filter`.
pub fn init_tracing(default_filter: &str) {
    static INIT: OnceCell<()> = OnceCell::new();
    let _ = INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_filter));
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    });
}
