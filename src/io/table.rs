//! # Table and Report I/O
//!
//! Tab-separated inputs and the JSON report.
//!
//! ## Data table
//! ```text
//! taxon   s1    s2    s3
//! otu_a   12    0     4
//! otu_b   3     7     1
//! ```
//!
//! ## Covariate table
//! ```text
//! sample  value
//! s1      0.5
//! s2      1.5
//! ```
//! Rows are matched to data columns by sample name. Values become a
//! continuous covariate if every one parses as a number, categorical otherwise.
//!
//! Blank lines and lines starting with `#` are skipped in both tables.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use serde::Serialize;

use crate::data::{CompositionMatrix, IndependentVariable};
use crate::error::{PhyloFactorError, Result};
use crate::tree::PhyloTree;

/// Non-comment lines with their 1-based line numbers.
fn content_lines<R: BufRead>(reader: R) -> impl Iterator<Item = Result<(usize, String)>> {
    reader
        .lines()
        .enumerate()
        .filter_map(|(idx, line)| match line {
            Ok(line) => {
                let trimmed = line.trim_end_matches(['\r', '\n']);
                if trimmed.trim().is_empty() || trimmed.starts_with('#') {
                    None
                } else {
                    Some(Ok((idx + 1, trimmed.to_string())))
                }
            }
            Err(e) => Some(Err(e.into())),
        })
}

pub fn read_data_table<P: AsRef<Path>>(path: P) -> Result<CompositionMatrix> {
    let file = File::open(path.as_ref())?;
    parse_data_table(BufReader::new(file))
}

pub fn parse_data_table<R: BufRead>(reader: R) -> Result<CompositionMatrix> {
    let mut lines = content_lines(reader);
    let (_, header) = lines
        .next()
        .ok_or_else(|| PhyloFactorError::parse(1, "data table is empty"))??;
    let samples: Vec<String> = header.split('\t').skip(1).map(|s| s.trim().to_string()).collect();
    if samples.is_empty() {
        return Err(PhyloFactorError::parse(1, "data header has no sample columns"));
    }

    let mut taxa = Vec::new();
    let mut rows = Vec::new();
    for line in lines {
        let (line_no, line) = line?;
        let mut fields = line.split('\t');
        let taxon = fields.next().unwrap_or_default().trim().to_string();
        let row = fields
            .map(|f| {
                f.trim().parse::<f64>().map_err(|_| {
                    PhyloFactorError::parse(line_no, format!("'{}' is not a number", f.trim()))
                })
            })
            .collect::<Result<Vec<f64>>>()?;
        if row.len() != samples.len() {
            return Err(PhyloFactorError::parse(
                line_no,
                format!("expected {} values, found {}", samples.len(), row.len()),
            ));
        }
        taxa.push(taxon);
        rows.push(row);
    }

    CompositionMatrix::from_rows(taxa, samples, &rows)
}

/// Read the covariate and order it like `samples`.
pub fn read_covariate_table<P: AsRef<Path>>(path: P, samples: &[String]) -> Result<IndependentVariable> {
    let file = File::open(path.as_ref())?;
    parse_covariate_table(BufReader::new(file), samples)
}

pub fn parse_covariate_table<R: BufRead>(reader: R, samples: &[String]) -> Result<IndependentVariable> {
    let mut by_sample: HashMap<String, String> = HashMap::new();
    for (i, line) in content_lines(reader).enumerate() {
        let (line_no, line) = line?;
        if i == 0 {
            continue;
        }
        let mut fields = line.split('\t');
        let (Some(sample), Some(value), None) = (fields.next(), fields.next(), fields.next()) else {
            return Err(PhyloFactorError::parse(line_no, "expected two tab-separated columns"));
        };
        if by_sample
            .insert(sample.trim().to_string(), value.trim().to_string())
            .is_some()
        {
            return Err(PhyloFactorError::parse(
                line_no,
                format!("duplicate sample '{}'", sample.trim()),
            ));
        }
    }

    let values = samples
        .iter()
        .map(|s| {
            by_sample.get(s).map(String::as_str).ok_or_else(|| {
                PhyloFactorError::validation(format!("sample '{}' has no covariate value", s))
            })
        })
        .collect::<Result<Vec<&str>>>()?;
    if by_sample.len() != samples.len() {
        return Err(PhyloFactorError::validation(format!(
            "{} samples in data, {} in covariate",
            samples.len(),
            by_sample.len()
        )));
    }
    Ok(IndependentVariable::parse(&values))
}

pub fn read_tree<P: AsRef<Path>>(path: P) -> Result<PhyloTree> {
    let text = std::fs::read_to_string(path.as_ref())?;
    PhyloTree::from_newick(&text)
}

/// Pretty-printed JSON of any serializable report.
pub fn write_report<P: AsRef<Path>, T: Serialize>(path: P, report: &T) -> Result<()> {
    let file = File::create(path.as_ref())?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, report)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_parse_data_table() {
        let text = "taxon\ts1\ts2\n# comment\na\t1\t2\n\nb\t3\t0\n";
        let data = parse_data_table(Cursor::new(text)).unwrap();
        assert_eq!(data.taxa(), &["a".to_string(), "b".to_string()]);
        assert_eq!(data.samples(), &["s1".to_string(), "s2".to_string()]);
        assert_eq!(data.values()[(1, 0)], 3.0);
    }

    #[test]
    fn test_data_table_errors_carry_line() {
        let err = parse_data_table(Cursor::new("taxon\ts1\ts2\na\t1\n")).unwrap_err();
        assert!(matches!(err, PhyloFactorError::Parse { line: 2, .. }));

        let err = parse_data_table(Cursor::new("taxon\ts1\na\tx\n")).unwrap_err();
        assert!(matches!(err, PhyloFactorError::Parse { line: 2, .. }));

        assert!(parse_data_table(Cursor::new("")).is_err());
    }

    #[test]
    fn test_covariate_matched_by_name() {
        let samples = vec!["s1".to_string(), "s2".to_string(), "s3".to_string()];
        let text = "sample\tvalue\ns3\t3.0\ns1\t1.0\ns2\t2.0\n";
        let x = parse_covariate_table(Cursor::new(text), &samples).unwrap();
        assert_eq!(x, IndependentVariable::Continuous(vec![1.0, 2.0, 3.0]));
    }

    #[test]
    fn test_covariate_categorical_and_missing() {
        let samples = vec!["s1".to_string(), "s2".to_string()];
        let x = parse_covariate_table(Cursor::new("sample\tgroup\ns1\tgut\ns2\tsoil\n"), &samples).unwrap();
        assert!(x.is_categorical());

        let err = parse_covariate_table(Cursor::new("sample\tgroup\ns1\tgut\n"), &samples).unwrap_err();
        assert!(matches!(err, PhyloFactorError::Validation { .. }));
    }
}
