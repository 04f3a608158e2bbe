//! In-memory table built from a worksheet range, and its CSV form.

use std::io::{self, Write};

use calamine::{Data, ExcelDateTime, Range};
use chrono::NaiveTime;

/// Header row plus data rows, every row as wide as the header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    /// The first row of the used range becomes the header.
    pub fn from_range(range: &Range<Data>) -> Self {
        let mut rows = range
            .rows()
            .map(|row| row.iter().map(render_cell).collect::<Vec<_>>());

        let headers = rows.next().unwrap_or_default();
        Self {
            headers,
            rows: rows.collect(),
        }
    }

    pub fn column_count(&self) -> usize {
        self.headers.len()
    }

    /// Number of data rows (header excluded)
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty() && self.rows.is_empty()
    }

    /// Comma-delimited, `\n`-terminated, RFC 4180 quoting. An empty table
    /// writes nothing.
    pub fn write_csv<W: Write>(&self, writer: W) -> io::Result<()> {
        let mut csv_writer = csv::WriterBuilder::new()
            .terminator(csv::Terminator::Any(b'\n'))
            .from_writer(writer);

        if !self.is_empty() {
            csv_writer.write_record(&self.headers).map_err(to_io)?;
            for row in &self.rows {
                csv_writer.write_record(row).map_err(to_io)?;
            }
        }

        csv_writer.flush()
    }

    pub fn to_csv_string(&self) -> io::Result<String> {
        let mut buffer = Vec::new();
        self.write_csv(&mut buffer)?;
        String::from_utf8(buffer).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

fn to_io(err: csv::Error) -> io::Error {
    io::Error::new(io::ErrorKind::Other, err)
}

/// Text of one cell as it appears in the exported table.
pub fn render_cell(cell: &Data) -> String {
    match cell {
        Data::Empty | Data::Error(_) => String::new(),
        Data::String(s) => s.clone(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) => f.to_string(),
        Data::Bool(b) => (if *b { "TRUE" } else { "FALSE" }).to_string(),
        Data::DateTime(dt) => render_datetime(dt),
        Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
    }
}

/// Largest serial Excel will display as a date (9999-12-31), with room for
/// the 1904 offset.
const MAX_DATE_SERIAL: f64 = 2_958_466.0 + 1_462.0;

/// Dates as ISO 8601, durations as `[h]:mm:ss`. Serials outside Excel's
/// calendar are written as the raw number.
fn render_datetime(dt: &ExcelDateTime) -> String {
    let value = dt.as_f64();
    if !value.is_finite() || value.abs() > MAX_DATE_SERIAL {
        return value.to_string();
    }

    if dt.is_duration() {
        return dt
            .as_duration()
            .map(format_duration)
            .unwrap_or_else(|| value.to_string());
    }

    match dt.as_datetime() {
        Some(datetime) if datetime.time() == NaiveTime::MIN => {
            datetime.format("%Y-%m-%d").to_string()
        }
        Some(datetime) => datetime.format("%Y-%m-%dT%H:%M:%S").to_string(),
        None => value.to_string(),
    }
}

fn format_duration(duration: chrono::Duration) -> String {
    let total = duration.num_seconds();
    let sign = if total < 0 { "-" } else { "" };
    let total = total.unsigned_abs();
    format!(
        "{}{}:{:02}:{:02}",
        sign,
        total / 3600,
        (total % 3600) / 60,
        total % 60
    )
}
