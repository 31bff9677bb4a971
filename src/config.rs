use std::str::FromStr;
use std::time::Duration;
use std::{env, io};

use tracing::debug;

use crate::errors::{AppError, AppResult};
use crate::handlers::{Handler, HandlerRegistry};
use crate::render::UrlTemplate;

const DEFAULT_HANDLER: &str = "google";
const DEFAULT_DELAY_MS: u64 = 250;
const DEFAULT_CONCURRENCY: usize = 1;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
const DEFAULT_USER_AGENT: &str = concat!("csvgeocode/", env!("CARGO_PKG_VERSION"));

/// Defaults that user options are merged over.
#[derive(Clone, Debug)]
pub struct GeocodeConfig {
    pub url: Option<String>,
    pub handler: String,
    pub delay_ms: u64,
    pub concurrency: usize,
    pub request_timeout_secs: u64,
    pub user_agent: String,
}

impl Default for GeocodeConfig {
    fn default() -> Self {
        Self {
            url: None,
            handler: DEFAULT_HANDLER.to_string(),
            delay_ms: DEFAULT_DELAY_MS,
            concurrency: DEFAULT_CONCURRENCY,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl GeocodeConfig {
    pub fn from_env() -> Self {
        load_dotenv();
        Self {
            url: env::var("GEOCODE_URL")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            handler: env::var("GEOCODE_HANDLER")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_HANDLER.to_string()),
            delay_ms: env_or("GEOCODE_DELAY_MS", DEFAULT_DELAY_MS),
            concurrency: env_or("GEOCODE_CONCURRENCY", DEFAULT_CONCURRENCY).max(1),
            request_timeout_secs: env_or(
                "GEOCODE_REQUEST_TIMEOUT_SECS",
                DEFAULT_REQUEST_TIMEOUT_SECS,
            ),
            user_agent: env::var("GEOCODE_USER_AGENT")
                .unwrap_or_else(|_| DEFAULT_USER_AGENT.to_string()),
        }
    }
}

/// A handler given by registry name or supplied directly.
#[derive(Clone, Debug)]
pub enum HandlerChoice {
    Named(String),
    Custom(Handler),
}

/// Per-run options as the caller supplies them; unset fields fall back to [`GeocodeConfig`].
#[derive(Clone, Debug, Default)]
pub struct GeocodeOptions {
    pub url: Option<String>,
    pub handler: Option<HandlerChoice>,
    pub lat: Option<String>,
    pub lng: Option<String>,
    pub force: bool,
    pub delay: Option<Duration>,
    pub test: bool,
    pub location: Option<String>,
    pub concurrency: Option<usize>,
}

impl GeocodeOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }

    pub fn handler_name(mut self, name: impl Into<String>) -> Self {
        self.handler = Some(HandlerChoice::Named(name.into()));
        self
    }

    pub fn handler(mut self, handler: Handler) -> Self {
        self.handler = Some(HandlerChoice::Custom(handler));
        self
    }

    pub fn columns(mut self, lat: impl Into<String>, lng: impl Into<String>) -> Self {
        self.lat = Some(lat.into());
        self.lng = Some(lng.into());
        self
    }

    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn test(mut self, test: bool) -> Self {
        self.test = test;
        self
    }

    pub fn location(mut self, column: impl Into<String>) -> Self {
        self.location = Some(column.into());
        self
    }

    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = Some(concurrency);
        self
    }

    /// Merges over `config` and validates. Fails before any row is touched.
    pub fn resolve(
        self,
        config: &GeocodeConfig,
        registry: &HandlerRegistry,
    ) -> AppResult<ResolvedOptions> {
        let url = self
            .url
            .or_else(|| config.url.clone())
            .ok_or_else(|| AppError::Config("'url' parameter is required.".into()))?;
        let template = UrlTemplate::parse(&url)?;

        let handler = match self.handler {
            Some(HandlerChoice::Custom(handler)) => handler,
            Some(HandlerChoice::Named(name)) => registry.resolve(&name)?,
            None => registry.resolve(&config.handler)?,
        };

        let concurrency = self.concurrency.unwrap_or(config.concurrency);
        if concurrency == 0 {
            return Err(AppError::Config(
                "'concurrency' must be at least 1.".into(),
            ));
        }

        let resolved = ResolvedOptions {
            template,
            handler,
            lat: self.lat.filter(|name| !name.is_empty()),
            lng: self.lng.filter(|name| !name.is_empty()),
            force: self.force,
            delay: self
                .delay
                .unwrap_or_else(|| Duration::from_millis(config.delay_ms)),
            test: self.test,
            location: self.location.filter(|name| !name.is_empty()),
            concurrency,
        };
        debug!(
            url = resolved.template.as_str(),
            handler = resolved.handler.name(),
            delay_ms = u64::try_from(resolved.delay.as_millis()).unwrap_or(u64::MAX),
            concurrency,
            "resolved geocoding options"
        );
        Ok(resolved)
    }
}

/// Validated, immutable options for one run.
#[derive(Clone, Debug)]
pub struct ResolvedOptions {
    pub template: UrlTemplate,
    pub handler: Handler,
    pub lat: Option<String>,
    pub lng: Option<String>,
    pub force: bool,
    pub delay: Duration,
    pub test: bool,
    pub location: Option<String>,
    pub concurrency: usize,
}

/// Reads `.env` from the working directory unless `GEOCODE_NO_DOTENV` is set.
fn load_dotenv() {
    if env_flag("GEOCODE_NO_DOTENV") {
        debug!("GEOCODE_NO_DOTENV set; not reading .env");
        return;
    }
    match dotenvy::dotenv() {
        Ok(path) => debug!(path = %path.display(), "loaded geocoding defaults from .env"),
        Err(dotenvy::Error::Io(err)) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => debug!(?err, "ignoring unreadable .env"),
    }
}

fn env_flag(key: &str) -> bool {
    env::var(key)
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

/// Parses `key`, falling back to `default` when unset or malformed.
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            debug!(key, value = %raw, "ignoring malformed setting");
            default
        }),
        Err(_) => default,
    }
}
