use crate::error::ConfigurationError;

use itertools::{Itertools, process_results};
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, Read};

/// Column indices of `id, ra, dec, a, b, pa, n, mag` in the whitespace-separated catalog
const CATALOG_COLUMNS: [usize; 8] = [0, 1, 2, 5, 6, 7, 8, 9];

/// Single catalog entry
///
/// `a` and `b` are the ellipse semi-axes (`a >= b > 0`), `pa` is measured in degrees East of
/// North and `mag` is the catalog magnitude.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CatalogRow {
    pub id: f64,
    pub ra: f64,
    pub dec: f64,
    pub a: f64,
    pub b: f64,
    pub pa: f64,
    pub n: f64,
    pub mag: f64,
}

impl CatalogRow {
    fn from_record(line: usize, record: &csv::StringRecord) -> Result<Self, ConfigurationError> {
        let value = |column: usize| -> Result<f64, ConfigurationError> {
            let field = record
                .get(column)
                .ok_or_else(|| ConfigurationError::CatalogRow {
                    line,
                    message: format!("missing column {column}"),
                })?;
            field
                .parse::<f64>()
                .map_err(|err| ConfigurationError::CatalogRow {
                    line,
                    message: format!("column {column} ({field:?}): {err}"),
                })
        };
        let [id, ra, dec, a, b, pa, n, mag] = CATALOG_COLUMNS;
        Ok(Self {
            id: value(id)?,
            ra: value(ra)?,
            dec: value(dec)?,
            a: value(a)?,
            b: value(b)?,
            pa: value(pa)?,
            n: value(n)?,
            mag: value(mag)?,
        })
    }
}

/// Read a whitespace-separated text catalog
///
/// Lines starting with `#` and blank lines are skipped. Columns `0, 1, 2, 5, 6, 7, 8, 9` are
/// read as `id, ra, dec, a, b, pa, n, mag`, other columns are ignored.
pub fn read_catalog<R: Read>(reader: R) -> Result<Vec<CatalogRow>, ConfigurationError> {
    // csv splits on a single byte, so runs of blanks are collapsed first
    let lines = BufReader::new(reader)
        .lines()
        .enumerate()
        .map(|(i, line)| {
            line.map(|line| (i + 1, line))
                .map_err(|err| ConfigurationError::CatalogRead(err.to_string()))
        });
    let normalized: Vec<(usize, String)> = process_results(lines, |lines| {
        lines
            .filter(|(_, line)| {
                let trimmed = line.trim_start();
                !trimmed.is_empty() && !trimmed.starts_with('#')
            })
            .map(|(i, line)| (i, line.split_whitespace().join(" ")))
            .collect()
    })?;

    normalized
        .iter()
        .map(|(line, text)| {
            let mut csv_reader = csv::ReaderBuilder::new()
                .delimiter(b' ')
                .has_headers(false)
                .from_reader(text.as_bytes());
            let record = csv_reader
                .records()
                .next()
                .ok_or_else(|| ConfigurationError::CatalogRow {
                    line: *line,
                    message: "empty row".into(),
                })?
                .map_err(|err| ConfigurationError::CatalogRow {
                    line: *line,
                    message: err.to_string(),
                })?;
            CatalogRow::from_record(*line, &record)
        })
        .collect()
}

/// Mean `(ra, dec)` of the rows, `None` for an empty slice
pub fn scene_center(rows: &[CatalogRow]) -> Option<(f64, f64)> {
    if rows.is_empty() {
        return None;
    }
    let n = rows.len() as f64;
    let (ra, dec) = rows
        .iter()
        .fold((0.0, 0.0), |(ra, dec), row| (ra + row.ra, dec + row.dec));
    Some((ra / n, dec / n))
}

/// Rows within `ra_tol` and `dec_tol` of the given anchor row, the anchor included
pub fn select_scene(
    rows: &[CatalogRow],
    anchor: &CatalogRow,
    ra_tol: f64,
    dec_tol: f64,
) -> Vec<CatalogRow> {
    rows.iter()
        .filter(|row| (row.ra - anchor.ra).abs() < ra_tol && (row.dec - anchor.dec).abs() < dec_tol)
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    use approx::assert_abs_diff_eq;

    const CATALOG: &str = "\
# id ra dec x y a b pa n mag
1  53.1000  -27.8000  10.0 11.0  0.10 0.05  30.0  2.0  25.0
2  53.10005 -27.80010 12.0 13.0  0.08 0.08 -10.0  1.5  26.0

3  53.2000  -27.9000  14.0 15.0  0.12 0.03  80.0  4.0  24.5
";

    #[test]
    fn reads_selected_columns() {
        let rows = read_catalog(CATALOG.as_bytes()).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(
            rows[0],
            CatalogRow {
                id: 1.0,
                ra: 53.1,
                dec: -27.8,
                a: 0.10,
                b: 0.05,
                pa: 30.0,
                n: 2.0,
                mag: 25.0,
            }
        );
        assert_abs_diff_eq!(rows[2].mag, 24.5);
    }

    #[test]
    fn malformed_row_reports_line() {
        let text = "1 2 3 4 5 6 7 8 9 10\n1 2 3 4 5 six 7 8 9 10\n";
        let err = read_catalog(text.as_bytes()).unwrap_err();
        match err {
            ConfigurationError::CatalogRow { line, .. } => assert_eq!(line, 2),
            _ => panic!("unexpected error {err:?}"),
        }
    }

    #[test]
    fn short_row_is_rejected() {
        let text = "1 2 3 4 5 6 7\n";
        assert!(matches!(
            read_catalog(text.as_bytes()),
            Err(ConfigurationError::CatalogRow { line: 1, .. })
        ));
    }

    #[test]
    fn selects_neighbours() {
        let rows = read_catalog(CATALOG.as_bytes()).unwrap();
        let scene = select_scene(&rows, &rows[0], 1e-4, 2e-4);
        assert_eq!(scene.len(), 2);
        let (ra, dec) = scene_center(&scene).unwrap();
        assert_abs_diff_eq!(ra, 53.100025, epsilon = 1e-9);
        assert_abs_diff_eq!(dec, -27.80005, epsilon = 1e-9);
        assert!(scene_center(&[]).is_none());
    }
}
