use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

use crate::errors::{AppError, AppResult};
use crate::ingestion::Row;

/// Everything except the characters `encodeURIComponent` leaves alone.
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Field(String),
}

/// A request URL with `{{field}}` placeholders filled from each row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl UrlTemplate {
    pub fn parse(template: &str) -> AppResult<Self> {
        if template.trim().is_empty() {
            return Err(AppError::Config("'url' parameter is required.".into()));
        }

        let mut segments = Vec::new();
        let mut rest = template;
        while let Some(start) = rest.find("{{") {
            if start > 0 {
                segments.push(Segment::Literal(rest[..start].to_string()));
            }
            let after_open = &rest[start + 2..];
            let end = after_open.find("}}").ok_or_else(|| {
                AppError::Config(format!("unterminated placeholder in url template: {template}"))
            })?;
            let mut close = end + 2;
            // triple-brace placeholders close with an extra brace
            if after_open.starts_with('{') && after_open[close..].starts_with('}') {
                close += 1;
            }

            let name = after_open[..end]
                .trim_start_matches(['{', '&'])
                .trim();
            if name.is_empty() {
                return Err(AppError::Config(format!(
                    "empty placeholder in url template: {template}"
                )));
            }
            segments.push(Segment::Field(name.to_string()));
            rest = &after_open[close..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }

        Ok(Self {
            source: template.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Renders the request URL for `row`. Unknown fields render empty.
    pub fn render(&self, row: &Row) -> String {
        let mut url = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => url.push_str(text),
                Segment::Field(name) => url.push_str(&escape_value(&row.text(name))),
            }
        }
        url
    }
}

pub fn escape_value(value: &str) -> String {
    utf8_percent_encode(value, URI_COMPONENT)
        .to_string()
        .replace("%20", "+")
        .replace(' ', "+")
        .replace('&', "%26")
}
