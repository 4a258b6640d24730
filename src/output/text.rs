//! Human-readable listing output.
//!
//! ```text
//! af1349b9f5f9a1a6  10 B       2024-01-01 12:00  Music/a.txt
//!
//! 1 files, 10 B total (1 directories, 0 unreadable)
//! ```

use std::io::Write;

use bytesize::ByteSize;
use chrono::{DateTime, Local};

use super::ListingSummary;
use crate::listing::ListingRecord;
use crate::scanner::hash_to_hex;

/// Number of hex digits of the hash shown per line.
const HASH_PREFIX: usize = 16;

/// Plain text formatter.
pub struct TextOutput<'a> {
    records: &'a [ListingRecord],
    summary: &'a ListingSummary,
}

impl<'a> TextOutput<'a> {
    /// Create a text formatter over `records`.
    #[must_use]
    pub fn new(records: &'a [ListingRecord], summary: &'a ListingSummary) -> Self {
        Self { records, summary }
    }

    /// Write the listing sorted by path, then the summary line.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        let mut records: Vec<&ListingRecord> = self.records.iter().collect();
        records.sort_by(|a, b| a.path.cmp(&b.path));

        for record in &records {
            let hex = hash_to_hex(&record.hash);
            let modified: DateTime<Local> = record.modified.into();
            writeln!(
                writer,
                "{}  {:<10} {}  {}",
                &hex[..HASH_PREFIX],
                ByteSize::b(record.size).to_string(),
                modified.format("%Y-%m-%d %H:%M"),
                record.path
            )?;
        }
        if !records.is_empty() {
            writeln!(writer)?;
        }
        writeln!(writer, "{}", self.summary_line())
    }

    fn summary_line(&self) -> String {
        let s = self.summary;
        let mut line = format!(
            "{} files, {} total ({} directories, {} unreadable",
            s.files,
            ByteSize::b(s.total_size),
            s.directories,
            s.unreadable
        );
        if s.malformed > 0 {
            line.push_str(&format!(", {} malformed", s.malformed));
        }
        if s.removed > 0 {
            line.push_str(&format!(", {} removed", s.removed));
        }
        line.push(')');
        if s.interrupted {
            line.push_str(" [interrupted]");
        }
        line
    }
}
