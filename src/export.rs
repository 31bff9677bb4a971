use std::fmt;
use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;

use indexmap::IndexSet;
use tracing::debug;

use crate::errors::{AppError, AppResult};
use crate::ingestion::Row;

/// Where the geocoded table is written once a run settles.
pub enum OutputTarget {
    Path(PathBuf),
    Stdout,
    Writer(Box<dyn Write + Send>),
}

impl fmt::Debug for OutputTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputTarget::Path(path) => f.debug_tuple("Path").field(path).finish(),
            OutputTarget::Stdout => f.write_str("Stdout"),
            OutputTarget::Writer(_) => f.write_str("Writer(..)"),
        }
    }
}

impl OutputTarget {
    pub fn validate(&self) -> AppResult<()> {
        match self {
            OutputTarget::Path(path) if path.as_os_str().is_empty() => Err(AppError::Config(
                "Invalid value for output. Needs to be a filename or a writable stream.".into(),
            )),
            _ => Ok(()),
        }
    }
}

/// Writes the rows, mapping any failure to [`AppError::OutputWrite`].
pub fn deliver(target: OutputTarget, rows: &[Row]) -> AppResult<()> {
    let result = match target {
        OutputTarget::Path(path) => {
            debug!(path = %path.display(), rows = rows.len(), "writing output file");
            File::create(&path)
                .map_err(AppError::from)
                .and_then(|file| write_rows(file, rows))
        }
        OutputTarget::Stdout => write_rows(io::stdout().lock(), rows),
        OutputTarget::Writer(writer) => write_rows(writer, rows),
    };
    result.map_err(|err| match err {
        AppError::OutputWrite(_) => err,
        other => AppError::OutputWrite(other.to_string()),
    })
}

pub fn write_rows<W: Write>(writer: W, rows: &[Row]) -> AppResult<()> {
    let headers = collect_headers(rows);
    let mut writer = csv::Writer::from_writer(writer);
    if headers.is_empty() {
        writer.flush()?;
        return Ok(());
    }

    writer.write_record(&headers)?;
    for row in rows {
        writer.write_record(headers.iter().map(|header| row.text(header)))?;
    }
    writer.flush()?;
    Ok(())
}

pub fn stringify(rows: &[Row]) -> AppResult<String> {
    let mut buffer = Vec::new();
    write_rows(&mut buffer, rows)?;
    String::from_utf8(buffer).map_err(|err| AppError::OutputWrite(err.to_string()))
}

fn collect_headers(rows: &[Row]) -> Vec<String> {
    let mut headers = IndexSet::new();
    for row in rows {
        for key in row.keys() {
            if !headers.contains(key) {
                headers.insert(key.to_string());
            }
        }
    }
    headers.into_iter().collect()
}
