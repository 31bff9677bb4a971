use serde::Serialize;
use serde_json::Value;
use tracing::trace;

use crate::errors::RowError;
use crate::handlers::{Handler, HandlerOutcome};

/// A successful geocode, as stored in the cache.
#[derive(Debug, Clone, PartialEq)]
pub struct GeocodeResult {
    pub lat: f64,
    pub lng: f64,
    pub location: LocationMetadata,
}

/// Structured address details written to the `location` column.
///
/// Only the Google Geocoding response layout (`results[0].address_components`)
/// is understood; bodies from other providers yield just the coordinates.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationMetadata {
    /// `[lng, lat]`, GeoJSON order.
    pub coordinates: [f64; 2],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub formatted_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub postal_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locality: Option<String>,
}

impl LocationMetadata {
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Turns a 200 response body into a result, or the reason the row failed.
pub fn normalize(handler: &Handler, body: &str) -> Result<GeocodeResult, RowError> {
    let outcome = handler
        .call(body)
        .map_err(|err| RowError::Parse(err.to_string()))?;
    let document: Value =
        serde_json::from_str(body).map_err(|err| RowError::Parse(err.to_string()))?;

    match outcome {
        HandlerOutcome::Failure { reason } => Err(RowError::Provider(reason)),
        HandlerOutcome::Success { lat, lng } if lat.is_finite() && lng.is_finite() => {
            trace!(handler = handler.name(), lat, lng, "handler returned coordinates");
            Ok(GeocodeResult {
                lat,
                lng,
                location: extract_location(&document, lat, lng),
            })
        }
        HandlerOutcome::Success { .. } => Err(RowError::InvalidHandlerReturn {
            body: body.to_string(),
        }),
    }
}

pub fn extract_location(document: &Value, lat: f64, lng: f64) -> LocationMetadata {
    let mut location = LocationMetadata {
        coordinates: [lng, lat],
        ..LocationMetadata::default()
    };
    let Some(result) = document.pointer("/results/0") else {
        return location;
    };

    location.formatted_address = result
        .get("formatted_address")
        .and_then(Value::as_str)
        .map(str::to_string);

    let components = result
        .get("address_components")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    for component in components {
        let Some(kind) = component.pointer("/types/0").and_then(Value::as_str) else {
            continue;
        };
        let slot = match kind {
            "postal_code" => &mut location.postal_code,
            "country" => &mut location.country,
            "administrative_area_level_1" => &mut location.region,
            "administrative_area_level_2" => &mut location.locality,
            _ => continue,
        };
        *slot = Some(
            component
                .get("long_name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        );
    }
    location
}
