//! Batch match output.
//!
//! ```text
//! _id  <target fields>  ===  <universe fields>  @@@  MATCH_RATE
//! ```
//!
//! Columns are tab separated. Workers write result lines without a header to
//! private spool files; the coordinator merges them, keeping the first line
//! for each query id.

use ahash::AHashSet;
use fuzzrec_core::{Record, Result, ID_KEY, MATCH_RATE};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

pub const MATCH_SEPARATOR: &str = "===";
pub const SCORE_SEPARATOR: &str = "@@@";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputHeader {
    pub target: Vec<String>,
    pub universe: Vec<String>,
}

impl OutputHeader {
    pub fn line(&self) -> String {
        let mut cols: Vec<&str> = vec![ID_KEY];
        cols.extend(self.target.iter().map(String::as_str));
        cols.push(MATCH_SEPARATOR);
        cols.extend(self.universe.iter().map(String::as_str));
        cols.push(SCORE_SEPARATOR);
        cols.push(MATCH_RATE);
        cols.join("\t")
    }
}

/// One result line: query id and values, matched values, score.
pub fn result_line(query: &Record, matched: &Record, score: f64) -> String {
    let mut cols: Vec<&str> = vec![query.id.as_str()];
    cols.extend(query.values());
    cols.push(MATCH_SEPARATOR);
    cols.extend(matched.values());
    cols.push(SCORE_SEPARATOR);
    let mut line = cols.join("\t");
    line.push('\t');
    line.push_str(&score.to_string());
    line
}

/// Write `header` then every spooled line whose first column was not seen yet.
/// Returns the number of result lines written.
pub fn merge_outputs<P: AsRef<Path>>(header: &OutputHeader, spools: &[P], out: &Path) -> Result<usize> {
    let mut writer = BufWriter::new(File::create(out)?);
    writeln!(writer, "{}", header.line())?;

    let mut seen = AHashSet::new();
    let mut written = 0;
    for spool in spools {
        let reader = match File::open(spool.as_ref()) {
            Ok(file) => BufReader::new(file),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        };
        for line in reader.lines() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            let id = line.split('\t').next().unwrap_or_default().to_string();
            if seen.insert(id) {
                writeln!(writer, "{}", line)?;
                written += 1;
            }
        }
    }
    writer.flush()?;
    Ok(written)
}
