//! Delimited-text export of normalized results

use thiserror::Error;

use crate::data::NormalizedResult;

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("CSV delimiter must be a single ASCII character, got {0:?}")]
    Delimiter(char),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

/// Render `result` as CSV: a header row, then one CRLF-terminated line per record.
///
/// Fields containing the delimiter, a quote or a line break are quoted with
/// embedded quotes doubled. Nulls are empty fields and timestamps are ISO-8601.
pub fn to_csv(result: &NormalizedResult, delimiter: char) -> Result<String, ExportError> {
    if !delimiter.is_ascii() {
        return Err(ExportError::Delimiter(delimiter));
    }
    let delimiter = delimiter as u8;
    let header: Vec<String> = if result.columns.is_empty() {
        result
            .records
            .first()
            .map(|r| r.iter().map(|(name, _)| name.to_string()).collect())
            .unwrap_or_default()
    } else {
        result.columns.iter().map(|c| c.name.clone()).collect()
    };
    if header.is_empty() {
        return Ok(String::new());
    }

    let mut wtr = csv::WriterBuilder::new()
        .delimiter(delimiter)
        .terminator(csv::Terminator::CRLF)
        .from_writer(Vec::new());
    wtr.write_record(&header)?;
    for record in &result.records {
        wtr.write_record(
            header
                .iter()
                .map(|name| record.get(name).map(|v| v.to_plain_string()).unwrap_or_default()),
        )?;
    }

    let data = wtr.into_inner().map_err(|e| csv::Error::from(e.into_error()))?;
    Ok(String::from_utf8_lossy(&data).into_owned())
}
