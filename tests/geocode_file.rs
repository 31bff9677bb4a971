use std::time::Duration;

use httptest::matchers::{all_of, contains, request, url_decoded};
use httptest::responders::{json_encoded, status_code};
use httptest::{Expectation, Server};
use serde_json::json;
use tempfile::tempdir;
use tokio::sync::mpsc;

use csvgeocode::{
    geocode_file, read_rows, AppError, GeocodeConfig, GeocodeOptions, OutputTarget, RowError,
};

const SAMPLE_CSV: &str = "\
name,address,lat,lng
Known,Anywhere,40.7128,-74.0060
Main,1 Main St,,
Main again,1 Main St,,
Broken,Nowhere,,
";

fn google_response() -> serde_json::Value {
    json!({
        "status": "OK",
        "results": [{
            "formatted_address": "1 Main St, Springfield, IL 62701, USA",
            "geometry": { "location": { "lat": 39.8, "lng": -89.6 } },
            "address_components": [
                { "long_name": "62701", "types": ["postal_code"] },
                { "long_name": "Illinois", "types": ["administrative_area_level_1", "political"] },
                { "long_name": "United States", "types": ["country", "political"] }
            ]
        }]
    })
}

#[tokio::test]
async fn geocodes_csv_file_over_http() {
    let server = Server::run();
    server.expect(
        Expectation::matching(all_of![
            request::method_path("GET", "/geocode/json"),
            request::query(url_decoded(contains(("address", "1 Main St")))),
        ])
        .times(1)
        .respond_with(json_encoded(google_response())),
    );
    server.expect(
        Expectation::matching(all_of![
            request::method_path("GET", "/geocode/json"),
            request::query(url_decoded(contains(("address", "Nowhere")))),
        ])
        .times(1)
        .respond_with(status_code(500)),
    );

    let dir = tempdir().unwrap();
    let input = dir.path().join("input.csv");
    let output = dir.path().join("output.csv");
    std::fs::write(&input, SAMPLE_CSV).unwrap();

    let url = format!("{}?address={{{{address}}}}", server.url("/geocode/json"));
    let options = GeocodeOptions::new(url)
        .handler_name("Google")
        .location("location")
        .delay(Duration::from_millis(5));
    let (tx, mut rx) = mpsc::unbounded_channel();

    let report = geocode_file(
        &input,
        OutputTarget::Path(output.clone()),
        options,
        &GeocodeConfig::default(),
        Some(tx),
    )
    .await
    .expect("geocode run");

    assert_eq!(report.summary.successes, 3);
    assert_eq!(report.summary.failures, 1);
    assert_eq!(report.summary.requests, 2);
    assert_eq!(report.summary.cache_hits, 1);

    let mut errors = Vec::new();
    while let Some(event) = rx.recv().await {
        if let Some(err) = event.error {
            errors.push((event.index, err));
        }
    }
    assert_eq!(errors, vec![(3, RowError::HttpStatus(500))]);

    let rows = read_rows(&output).expect("output csv");
    let names: Vec<String> = rows.iter().map(|row| row.text("name")).collect();
    assert_eq!(names, vec!["Known", "Main", "Main again", "Broken"]);
    assert_eq!(rows[0].text("lat"), "40.7128");
    assert_eq!(rows[1].text("lat"), "39.8");
    assert_eq!(rows[2].text("lng"), "-89.6");
    assert_eq!(rows[3].text("lat"), "");

    let location: serde_json::Value = serde_json::from_str(&rows[1].text("location")).unwrap();
    assert_eq!(location["postalCode"], json!("62701"));
    assert_eq!(location["region"], json!("Illinois"));
    assert_eq!(location["coordinates"], json!([-89.6, 39.8]));
}

#[tokio::test]
async fn configuration_errors_stop_before_any_request() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("does-not-exist.csv");

    let err = geocode_file(
        &input,
        OutputTarget::Stdout,
        GeocodeOptions::new("http://127.0.0.1:9/?q={{address}}").handler_name("bogus"),
        &GeocodeConfig::default(),
        None,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::Config(_)));

    let err = geocode_file(
        &input,
        OutputTarget::Path(Default::default()),
        GeocodeOptions::new("http://127.0.0.1:9/?q={{address}}"),
        &GeocodeConfig::default(),
        None,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::Config(_)));
}

#[tokio::test]
async fn test_mode_reports_without_writing() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::method_path("GET", "/search"))
            .times(1)
            .respond_with(json_encoded(json!([{ "lat": "48.8566", "lon": "2.3522" }]))),
    );

    let dir = tempdir().unwrap();
    let input = dir.path().join("input.csv");
    let output = dir.path().join("output.csv");
    std::fs::write(&input, "city,Latitude,Longitude\nParis,,\n").unwrap();

    let url = format!("{}?format=json&q={{{{city}}}}", server.url("/search"));
    let report = geocode_file(
        &input,
        OutputTarget::Path(output.clone()),
        GeocodeOptions::new(url)
            .handler_name("nominatim")
            .delay(Duration::ZERO)
            .test(true),
        &GeocodeConfig::default(),
        None,
    )
    .await
    .expect("geocode run");

    assert_eq!(report.summary.successes, 1);
    assert_eq!(report.rows[0].text("Latitude"), "48.8566");
    assert_eq!(report.rows[0].text("Longitude"), "2.3522");
    assert!(!output.exists());
}
