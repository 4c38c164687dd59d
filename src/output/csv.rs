//! CSV spreadsheet writer.
//!
//! Epistemic foundation:
//! - K_i: New files get a fixed column order; Location holds the full street address
//! - B_i: An existing file's header holds our columns (any order) → HeaderMismatch otherwise
//! - B_i: Destination is writable (might be open in a spreadsheet app → retry)
//! - K_i: Rows are appended with one write, so a failed attempt adds nothing

use crate::models::{ExportError, Lead, LeadIdentity};
use crate::pipeline::Exporter;
use async_trait::async_trait;
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::time::Duration;
use tracing::warn;

/// Header row, in output order.
pub const COLUMNS: [&str; 9] = [
    "Name",
    "Category",
    "Location",
    "City",
    "State",
    "Phone No.",
    "Website",
    "Email",
    "Business Info",
];

const NAME_COLUMN: &str = "Name";
const LOCATION_COLUMN: &str = "Location";

/// Appends leads to a CSV file, retrying while the file is locked.
#[derive(Debug, Clone)]
pub struct CsvExporter {
    max_attempts: u32,
    backoff: Duration,
}

impl Default for CsvExporter {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(3))
    }
}

impl CsvExporter {
    /// `backoff` is multiplied by the attempt number between retries.
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }
}

/// Value of `column` for `lead`; columns this writer does not know stay empty.
fn cell<'a>(lead: &'a Lead, column: &str) -> &'a str {
    match column {
        "Name" => lead.name.as_str(),
        "Category" => lead.category.as_str(),
        "Location" => lead.address.as_str(),
        "City" => lead.city.as_str(),
        "State" => lead.state.as_str(),
        "Phone No." => lead.phone.as_str(),
        "Website" => lead.website.as_deref().unwrap_or_default(),
        "Email" => lead.email.as_deref().unwrap_or_default(),
        "Business Info" => lead.business_info.as_deref().unwrap_or_default(),
        _ => "",
    }
}

fn header_name(raw: &str) -> &str {
    raw.trim_start_matches('\u{feff}').trim()
}

/// Reject destinations that are not `.csv` files.
pub fn check_format(path: &Path) -> Result<(), ExportError> {
    let is_csv = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
    if is_csv {
        Ok(())
    } else {
        Err(ExportError::UnsupportedFormat {
            path: path.to_owned(),
        })
    }
}

/// Read the identities of every row already in `path`.
pub fn read_identities(path: &Path) -> Result<HashSet<LeadIdentity>, ExportError> {
    check_format(path)?;
    let csv_err = |source: csv::Error| ExportError::Csv {
        path: path.to_owned(),
        source,
    };

    match std::fs::metadata(path) {
        Ok(meta) if meta.len() == 0 => return Ok(HashSet::new()),
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashSet::new()),
        Err(e) => return Err(ExportError::io(format!("reading {}", path.display()), e)),
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .map_err(csv_err)?;

    let headers = reader.headers().map_err(csv_err)?.clone();
    let position = |column: &'static str| {
        headers
            .iter()
            .position(|h| header_name(h) == column)
            .ok_or_else(|| ExportError::MissingColumn {
                path: path.to_owned(),
                column,
            })
    };
    let name_idx = position(NAME_COLUMN)?;
    let location_idx = position(LOCATION_COLUMN)?;

    let mut identities = HashSet::new();
    for record in reader.records() {
        let record = record.map_err(csv_err)?;
        let name = record.get(name_idx).unwrap_or_default();
        let location = record.get(location_idx).unwrap_or_default();
        identities.insert(LeadIdentity::new(name, location));
    }

    Ok(identities)
}

/// Column order of an existing destination, checked to hold every column we write.
fn existing_header(path: &Path) -> Result<Vec<String>, ExportError> {
    let csv_err = |source: csv::Error| ExportError::Csv {
        path: path.to_owned(),
        source,
    };
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .map_err(csv_err)?;
    let found: Vec<String> = reader
        .headers()
        .map_err(csv_err)?
        .iter()
        .map(|h| header_name(h).to_string())
        .collect();

    let missing = COLUMNS
        .into_iter()
        .find(|column| !found.iter().any(|f| f.as_str() == *column));
    if let Some(column) = missing {
        return Err(ExportError::HeaderMismatch {
            path: path.to_owned(),
            column,
            found,
        });
    }
    Ok(found)
}

fn ends_with_newline(path: &Path) -> std::io::Result<bool> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

/// Serialize rows in memory, then append them with one write + fsync.
///
/// A new or empty file gets the [`COLUMNS`] header. An existing file keeps its
/// own column order, and its cells for unknown columns are left empty.
pub fn append_rows(leads: &[Lead], path: &Path) -> Result<usize, ExportError> {
    check_format(path)?;
    let csv_err = |source: csv::Error| ExportError::Csv {
        path: path.to_owned(),
        source,
    };

    let is_new = std::fs::metadata(path).map(|m| m.len() == 0).unwrap_or(true);
    let (columns, needs_newline) = if is_new {
        (COLUMNS.map(str::to_string).to_vec(), false)
    } else {
        let columns = existing_header(path)?;
        let needs_newline = !ends_with_newline(path)
            .map_err(|e| ExportError::io(format!("reading {}", path.display()), e))?;
        (columns, needs_newline)
    };

    let mut buffer = Vec::new();
    if needs_newline {
        buffer.push(b'\n');
    }
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(buffer);
    if is_new {
        writer.write_record(&columns).map_err(csv_err)?;
    }
    for lead in leads {
        writer
            .write_record(columns.iter().map(|column| cell(lead, column)))
            .map_err(csv_err)?;
    }
    let buffer = writer
        .into_inner()
        .map_err(|e| ExportError::io("serializing rows", e.into_error()))?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| ExportError::io(format!("creating {}", parent.display()), e))?;
    }

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| ExportError::io(format!("opening {}", path.display()), e))?;
    file.write_all(&buffer)
        .map_err(|e| ExportError::io(format!("writing {}", path.display()), e))?;
    file.sync_all()
        .map_err(|e| ExportError::io(format!("syncing {}", path.display()), e))?;

    Ok(leads.len())
}

/// Run `op`, retrying lock failures up to `max_attempts` times with linear backoff.
pub async fn with_lock_retry<T, F>(
    path: &Path,
    max_attempts: u32,
    backoff: Duration,
    mut op: F,
) -> Result<T, ExportError>
where
    F: FnMut() -> Result<T, ExportError>,
{
    let max_attempts = max_attempts.max(1);
    for attempt in 1..=max_attempts {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if e.is_lock() => {
                if attempt < max_attempts {
                    let wait = backoff * attempt;
                    warn!(
                        path = %path.display(),
                        attempt,
                        max_attempts,
                        wait_secs = wait.as_secs_f64(),
                        error = %e,
                        "Output file is locked (close it in your spreadsheet app), retrying"
                    );
                    tokio::time::sleep(wait).await;
                }
            }
            Err(e) => return Err(e),
        }
    }

    Err(ExportError::Locked {
        path: path.to_owned(),
        attempts: max_attempts,
    })
}

#[async_trait]
impl Exporter for CsvExporter {
    async fn existing_identities(&self, path: &Path) -> Result<HashSet<LeadIdentity>, ExportError> {
        with_lock_retry(path, self.max_attempts, self.backoff, || read_identities(path)).await
    }

    async fn export(&self, leads: &[Lead], path: &Path) -> Result<usize, ExportError> {
        with_lock_retry(path, self.max_attempts, self.backoff, || append_rows(leads, path)).await
    }

    fn check_destination(&self, path: &Path) -> Result<(), ExportError> {
        check_format(path)
    }
}
