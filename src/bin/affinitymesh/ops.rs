use std::collections::HashMap;
use std::fmt::{Debug, Display};
use std::fs::File;
use std::io::{stdout, BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;
use std::str::FromStr;

use ndarray::{Array2, Axis};
use num_traits::Float;

#[derive(Debug)]
pub(crate) struct FileParseError {
    pub message: String,
}

/// Reads in a file formatted as (tab separated):
///     id1 val1 val2 val3
///     id2 val1 val2 val3
///
/// Provide as many ids and values as desired
/// All rows should be same length
/// Values should be floating-point decimal values
///
/// With `is_precalculated`, the file holds the similarity matrix itself
/// (square, no id column) and labels are generated as row indices.
pub(crate) fn from_file<F>(
    p: PathBuf,
    d: &str,
    is_precalculated: bool,
) -> Result<(Array2<F>, Vec<String>), FileParseError>
where
    F: Float + Default + FromStr,
    <F as FromStr>::Err: Debug,
{
    let file = File::open(p).map_err(|e| FileParseError {
        message: format!("Unable to open input file: {}", e),
    })?;
    let reader = BufReader::new(file);
    let mut labels = Vec::new();
    let mut data = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| FileParseError {
            message: format!("Error reading line {}: {}", idx + 1, e),
        })?;
        if !line.contains(d) {
            return Err(FileParseError {
                message: "Input file does not use the expected delimiter".to_string(),
            });
        }
        let mut line = line.split(d);
        // ID as first col if not precalculated
        if !is_precalculated {
            match line.next() {
                Some(l) => labels.push(l.to_string()),
                None => {
                    return Err(FileParseError {
                        message: "Error loading line label".to_string(),
                    })
                }
            };
        } else {
            labels.push(idx.to_string());
        }
        let mut entry: Vec<F> = vec![];
        for s in line {
            match s.parse::<F>() {
                Ok(v) => entry.push(v),
                Err(_) => {
                    return Err(FileParseError {
                        message: format!("Error parsing file at line {}", idx + 1),
                    })
                }
            };
        }
        data.push(entry);
    }
    if data.len() <= 1 {
        return Err(FileParseError {
            message: "Data file is empty or only contains a single entry".to_string(),
        });
    }
    let (length, message) = if is_precalculated {
        (data.len(), "Precalculated input data must be square!")
    } else {
        (data[0].len(), "Input data rows must all be same length!")
    };
    for v in data.iter() {
        if v.len() != length {
            return Err(FileParseError {
                message: message.to_string(),
            });
        }
    }
    let mut out = Array2::<F>::default((data.len(), data[0].len()));
    out.axis_iter_mut(Axis(0))
        .enumerate()
        .for_each(|(idx1, mut row)| {
            row.iter_mut().enumerate().for_each(|(idx2, col)| {
                *col = data[idx1][idx2];
            });
        });
    Ok((out, labels))
}

/// Reads a sparse similarity graph formatted as one whitespace-separated
/// `i j s` edge per line with 0-based indices. Absent pairs are pruned
/// (negative infinity); the diagonal is left for the preference to fill.
pub(crate) fn from_sparse_file<F>(p: PathBuf) -> Result<(Array2<F>, Vec<String>), FileParseError>
where
    F: Float + FromStr,
    <F as FromStr>::Err: Debug,
{
    let file = File::open(p).map_err(|e| FileParseError {
        message: format!("Unable to open input file: {}", e),
    })?;
    let reader = BufReader::new(file);
    let mut edges: Vec<(usize, usize, F)> = Vec::new();
    let mut size = 0usize;
    for (idx, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| FileParseError {
            message: format!("Error reading line {}: {}", idx + 1, e),
        })?;
        if line.trim().is_empty() {
            continue;
        }
        let mut fields = line.split_whitespace();
        let parse_index = |field: Option<&str>| -> Result<usize, FileParseError> {
            field
                .and_then(|f| f.parse::<usize>().ok())
                .ok_or_else(|| FileParseError {
                    message: format!("Error parsing edge at line {}", idx + 1),
                })
        };
        let i = parse_index(fields.next())?;
        let j = parse_index(fields.next())?;
        let s = fields
            .next()
            .and_then(|f| f.parse::<F>().ok())
            .ok_or_else(|| FileParseError {
                message: format!("Error parsing edge at line {}", idx + 1),
            })?;
        size = size.max(i + 1).max(j + 1);
        edges.push((i, j, s));
    }
    if size == 0 {
        return Err(FileParseError {
            message: "Sparse input contains no edges".to_string(),
        });
    }
    let mut out = Array2::<F>::from_elem((size, size), F::neg_infinity());
    for (i, j, s) in edges {
        out[[i, j]] = s;
    }
    let labels = (0..size).map(|i| i.to_string()).collect();
    Ok((out, labels))
}

#[cfg(not(tarpaulin_include))]
pub(crate) fn display_results<L>(converged: bool, results: &HashMap<usize, Vec<usize>>, labels: &[L])
where
    L: Display + AsRef<[u8]>,
{
    let mut writer = BufWriter::new(stdout());
    writer
        .write_all(
            format!(
                "Converged={} nClusters={} nSamples={}\n",
                converged,
                results.len(),
                results.values().map(|v| v.len()).sum::<usize>()
            )
            .as_ref(),
        )
        .unwrap();
    results.iter().enumerate().for_each(|(idx, (key, value))| {
        writer
            .write_all(
                format!(
                    ">Cluster={} size={} exemplar={}\n",
                    idx + 1,
                    value.len(),
                    labels[*key]
                )
                .as_ref(),
            )
            .unwrap();
        let mut members = value.iter();
        if let Some(first) = members.next() {
            writer.write_all(labels[*first].as_ref()).unwrap();
        }
        members.for_each(|v| {
            writer.write_all(b",").unwrap();
            writer.write_all(labels[*v].as_ref()).unwrap();
        });
        writer.write_all(b"\n").unwrap();
    });
    writer.flush().unwrap();
}
