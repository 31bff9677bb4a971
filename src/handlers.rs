use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::errors::{AppError, AppResult, HandlerError};

/// What a handler made of a provider response body.
#[derive(Debug, Clone, PartialEq)]
pub enum HandlerOutcome {
    Success { lat: f64, lng: f64 },
    Failure { reason: String },
}

impl HandlerOutcome {
    pub fn failure(reason: impl Into<String>) -> Self {
        HandlerOutcome::Failure {
            reason: reason.into(),
        }
    }
}

pub type HandlerFn = dyn Fn(&str) -> Result<HandlerOutcome, HandlerError> + Send + Sync;

/// A named response-normalizing function.
#[derive(Clone)]
pub struct Handler {
    name: String,
    inner: Arc<HandlerFn>,
}

impl Handler {
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&str) -> Result<HandlerOutcome, HandlerError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            inner: Arc::new(func),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call(&self, body: &str) -> Result<HandlerOutcome, HandlerError> {
        (self.inner)(body)
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler").field("name", &self.name).finish()
    }
}

/// Handlers addressable by lowercase provider name.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: BTreeMap<String, Handler>,
}

impl HandlerRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register("google", google);
        registry.register("mapbox", mapbox);
        registry.register("nominatim", nominatim);
        registry
    }

    pub fn register<F>(&mut self, name: &str, func: F)
    where
        F: Fn(&str) -> Result<HandlerOutcome, HandlerError> + Send + Sync + 'static,
    {
        let key = name.trim().to_lowercase();
        self.handlers.insert(key.clone(), Handler::new(key, func));
    }

    pub fn resolve(&self, name: &str) -> AppResult<Handler> {
        self.handlers
            .get(&name.trim().to_lowercase())
            .cloned()
            .ok_or_else(|| {
                AppError::Config(format!(
                    "Invalid value for 'handler' option: {name}. Must be the name of a built-in handler ({}) or a custom handler.",
                    self.names().collect::<Vec<_>>().join(", ")
                ))
            })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }
}

/// Google Geocoding API: `status` must be `OK`, coordinates from the first result.
pub fn google(body: &str) -> Result<HandlerOutcome, HandlerError> {
    let response: Value = serde_json::from_str(body)?;
    let status = response
        .get("status")
        .and_then(Value::as_str)
        .unwrap_or("UNKNOWN_ERROR");
    if status != "OK" {
        return Ok(HandlerOutcome::failure(status));
    }

    let location = response
        .pointer("/results/0/geometry/location")
        .ok_or_else(|| HandlerError::Malformed("response has no result location".into()))?;
    Ok(HandlerOutcome::Success {
        lat: number_field(location, "lat")?,
        lng: number_field(location, "lng")?,
    })
}

/// Mapbox geocoding v5: `center` of the first feature is `[lng, lat]`.
pub fn mapbox(body: &str) -> Result<HandlerOutcome, HandlerError> {
    let response: Value = serde_json::from_str(body)?;
    let Some(features) = response.get("features").and_then(Value::as_array) else {
        let message = response
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("UNKNOWN_ERROR");
        return Ok(HandlerOutcome::failure(message));
    };
    let Some(feature) = features.first() else {
        return Ok(HandlerOutcome::failure("NO RESULTS"));
    };

    let center = feature
        .get("center")
        .and_then(Value::as_array)
        .filter(|center| center.len() >= 2)
        .ok_or_else(|| HandlerError::Malformed("feature has no center".into()))?;
    Ok(HandlerOutcome::Success {
        lat: as_coordinate(&center[1])?,
        lng: as_coordinate(&center[0])?,
    })
}

/// OpenStreetMap Nominatim JSON search results; coordinates arrive as strings.
pub fn nominatim(body: &str) -> Result<HandlerOutcome, HandlerError> {
    let response: Value = serde_json::from_str(body)?;
    if let Some(error) = response.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .or_else(|| error.as_str())
            .unwrap_or("UNKNOWN_ERROR");
        return Ok(HandlerOutcome::failure(message));
    }

    let Some(place) = response.as_array().and_then(|places| places.first()) else {
        return Ok(HandlerOutcome::failure("NO RESULTS"));
    };
    Ok(HandlerOutcome::Success {
        lat: number_field(place, "lat")?,
        lng: number_field(place, "lon")?,
    })
}

fn number_field(value: &Value, key: &str) -> Result<f64, HandlerError> {
    value
        .get(key)
        .ok_or_else(|| HandlerError::Malformed(format!("missing '{key}' field")))
        .and_then(as_coordinate)
}

fn as_coordinate(value: &Value) -> Result<f64, HandlerError> {
    let parsed = match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| HandlerError::Malformed(format!("not a coordinate: {value}")))
}
