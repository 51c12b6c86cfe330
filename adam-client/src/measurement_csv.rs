//! Parser for the frequency response exports produced by the measurement application.
//!
//! An export starts with free-form header lines (titles, channel names, axis
//! labels). The first line mentioning both `Hz` and `dB` holds the units; every
//! non-empty line after it is data, one `frequency,level` column pair per channel.

use std::path::Path;
use indexmap::IndexMap;
use thiserror::Error;
use shared::types::ChannelData;

const DEFAULT_UNIT: &str = "dB";

#[derive(Debug, Error)]
pub enum CsvError {
    #[error("no units header (Hz, dB...) found")]
    NoUnitsHeader,

    #[error("no data rows found")]
    NoDataRows,

    #[error("expected an even column count (frequency and level per channel), found {0}")]
    OddColumns(usize),

    #[error("malformed CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedMeasurement {
    /// `Ch1`, `Ch2`, ... in column order
    pub channels: IndexMap<String, ChannelData>,
    /// Rows that survived validation
    pub data_points: usize,
}

/// Read and parse an export. Invalid UTF-8 is replaced, not rejected.
pub fn parse_file(path: &Path) -> Result<ParsedMeasurement, CsvError> {
    let bytes = std::fs::read(path).map_err(|source| CsvError::Read {
        path: path.display().to_string(),
        source,
    })?;
    parse(&String::from_utf8_lossy(&bytes))
}

pub fn parse(contents: &str) -> Result<ParsedMeasurement, CsvError> {
    let lines: Vec<&str> = contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();

    let units_idx = lines
        .iter()
        .position(|line| line.contains("Hz") && line.contains("dB"))
        .ok_or(CsvError::NoUnitsHeader)?;
    let units: Vec<&str> = lines[units_idx].split(',').filter(|t| !t.is_empty()).collect();

    let data = lines[units_idx + 1..].join("\n");
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(data.as_bytes());

    let mut rows: Vec<Vec<String>> = Vec::new();
    for record in reader.records() {
        let row: Vec<String> = record?
            .iter()
            .filter(|cell| !cell.is_empty())
            .map(str::to_string)
            .collect();
        if !row.is_empty() {
            rows.push(row);
        }
    }

    let col_count = rows.first().map(Vec::len).ok_or(CsvError::NoDataRows)?;
    if col_count % 2 != 0 {
        return Err(CsvError::OddColumns(col_count));
    }

    // Ragged rows are dropped, as are rows with any non-numeric or NaN cell
    let table: Vec<Vec<f64>> = rows
        .iter()
        .filter(|row| row.len() == col_count)
        .map(|row| row.iter().map(|cell| cell.parse::<f64>().unwrap_or(f64::NAN)).collect::<Vec<_>>())
        .filter(|row| !row.iter().any(|v| v.is_nan()))
        .collect();

    let mut channels = IndexMap::new();
    for ch in 0..col_count / 2 {
        let frequencies: Vec<f64> = table.iter().map(|row| row[2 * ch]).collect();
        let levels: Vec<f64> = table.iter().map(|row| row[2 * ch + 1]).collect();
        let unit = units.get(2 * ch + 1).copied().unwrap_or(DEFAULT_UNIT);

        channels.insert(
            format!("Ch{}", ch + 1),
            ChannelData {
                data_points: Some(frequencies.len()),
                frequencies: Some(frequencies),
                levels: Some(levels),
                unit: Some(unit.to_string()),
                ..Default::default()
            },
        );
    }

    Ok(ParsedMeasurement {
        channels,
        data_points: table.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXPORT: &str = "\
Frequency Response
Ch1,,Ch2,
X,Y,X,Y
Hz,dBSPL,Hz,dBSPL
20,80.1,20,79.9
100,85.0,100,84.8

1000,90.5,1000,90.2
";

    fn channel<'a>(parsed: &'a ParsedMeasurement, name: &str) -> &'a ChannelData {
        parsed.channels.get(name).unwrap()
    }

    #[test]
    fn test_two_channel_export() {
        let parsed = parse(EXPORT).unwrap();

        assert_eq!(parsed.data_points, 3);
        assert_eq!(parsed.channels.keys().collect::<Vec<_>>(), ["Ch1", "Ch2"]);

        let ch2 = channel(&parsed, "Ch2");
        assert_eq!(ch2.frequencies.as_deref(), Some(&[20.0, 100.0, 1000.0][..]));
        assert_eq!(ch2.levels.as_deref(), Some(&[79.9, 84.8, 90.2][..]));
        assert_eq!(ch2.unit.as_deref(), Some("dBSPL"));
        assert_eq!(ch2.data_points, Some(3));
    }

    #[test]
    fn test_bad_rows_are_dropped() {
        let parsed = parse(
            "Hz,dBV\n\
             20 , 1.0 ,\n\
             50,2.0,7\n\
             100,n/a\n\
             200,NaN\n\
             400,4.0\n",
        )
        .unwrap();

        let ch1 = channel(&parsed, "Ch1");
        assert_eq!(ch1.frequencies.as_deref(), Some(&[20.0, 400.0][..]));
        assert_eq!(ch1.unit.as_deref(), Some("dBV"));
        assert_eq!(parsed.data_points, 2);
    }

    #[test]
    fn test_missing_units_default_to_db() {
        let parsed = parse("Hz,dB\n20,1,20,2\n").unwrap();
        assert_eq!(channel(&parsed, "Ch1").unit.as_deref(), Some("dB"));
        assert_eq!(channel(&parsed, "Ch2").unit.as_deref(), Some("dB"));
    }

    #[test]
    fn test_errors() {
        assert!(matches!(parse("a,b\n1,2\n"), Err(CsvError::NoUnitsHeader)));
        assert!(matches!(parse("Hz,dB\n\n"), Err(CsvError::NoDataRows)));
        assert!(matches!(parse("Hz,dB,Hz\n1,2,3\n"), Err(CsvError::OddColumns(3))));
    }

    #[test]
    fn test_parse_file_tolerates_invalid_utf8() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.csv");
        let mut bytes = b"Messung \xff\n".to_vec();
        bytes.extend_from_slice(EXPORT.as_bytes());
        std::fs::write(&path, bytes).unwrap();

        assert_eq!(parse_file(&path).unwrap().data_points, 3);
    }
}
