use std::collections::HashMap;

use anyhow::bail;

use crate::aggregate::{AggregateTable, Dimension};

#[derive(Debug, Clone, PartialEq)]
pub struct SegmentRow {
    pub key: Vec<String>,
    pub values: Vec<Option<f64>>,
}

/// Segments present in both aggregate tables, with each side's metrics
/// prefixed by its label.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SegmentTable {
    pub dimensions: Vec<Dimension>,
    pub columns: Vec<String>,
    pub rows: Vec<SegmentRow>,
}

impl SegmentTable {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn column(&self, name: &str) -> Vec<Option<f64>> {
        match self.columns.iter().position(|column| column == name) {
            Some(index) => self.rows.iter().map(|row| row.values[index]).collect(),
            None => vec![None; self.rows.len()],
        }
    }
}

/// Inner-joins two aggregate tables on their shared grouping key.
///
/// Both tables must be grouped by the same dimensions, in the same order.
/// Output follows the order of `left`.
pub fn correlate(
    left: &AggregateTable,
    left_label: &str,
    right: &AggregateTable,
    right_label: &str,
) -> anyhow::Result<SegmentTable> {
    if left.dimensions != right.dimensions {
        bail!(
            "cannot correlate tables grouped by {:?} and {:?}",
            left.dimensions,
            right.dimensions
        );
    }
    if left_label == right_label {
        bail!("correlated sides need distinct labels, both are {left_label:?}");
    }

    let columns: Vec<String> = left
        .metrics
        .iter()
        .map(|metric| format!("{left_label}.{metric}"))
        .chain(right.metrics.iter().map(|metric| format!("{right_label}.{metric}")))
        .collect();

    if left.is_empty() || right.is_empty() {
        tracing::debug!(
            left = left.len(),
            right = right.len(),
            "one side has no segments"
        );
        return Ok(SegmentTable {
            dimensions: left.dimensions.clone(),
            columns,
            rows: Vec::new(),
        });
    }

    let by_key: HashMap<&[String], &[Option<f64>]> = right
        .rows
        .iter()
        .map(|row| (row.key.as_slice(), row.values.as_slice()))
        .collect();

    let rows: Vec<SegmentRow> = left
        .rows
        .iter()
        .filter_map(|row| {
            let other = by_key.get(row.key.as_slice())?;
            let mut values = row.values.clone();
            values.extend_from_slice(other);
            Some(SegmentRow {
                key: row.key.clone(),
                values,
            })
        })
        .collect();

    tracing::debug!(
        left = left.len(),
        right = right.len(),
        joined = rows.len(),
        "correlated segments"
    );

    Ok(SegmentTable {
        dimensions: left.dimensions.clone(),
        columns,
        rows,
    })
}

/// Pearson correlation between two columns over rows where both are defined.
pub fn pearson(table: &SegmentTable, x: &str, y: &str) -> Option<f64> {
    let pairs: Vec<(f64, f64)> = table
        .column(x)
        .into_iter()
        .zip(table.column(y))
        .filter_map(|(x, y)| Some((x?, y?)))
        .collect();

    if pairs.len() < 2 {
        return None;
    }

    let n = pairs.len() as f64;
    let mean_x = pairs.iter().map(|(x, _)| x).sum::<f64>() / n;
    let mean_y = pairs.iter().map(|(_, y)| y).sum::<f64>() / n;

    let (mut covariance, mut var_x, mut var_y) = (0.0, 0.0, 0.0);
    for (x, y) in &pairs {
        let dx = x - mean_x;
        let dy = y - mean_y;
        covariance += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }

    if var_x == 0.0 || var_y == 0.0 {
        return None;
    }

    Some(covariance / (var_x.sqrt() * var_y.sqrt()))
}
