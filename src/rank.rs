use std::cmp::Ordering;

use clap::ValueEnum;

use crate::aggregate::{AggregateRow, AggregateTable};

/// Ranking order. Groups with an undefined metric come last either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Direction {
    /// Highest value first
    #[default]
    Descending,
    /// Lowest value first
    Ascending,
}

/// Returns the top `n` groups by `metric`, leaving `table` untouched.
///
/// The sort is stable, so ties keep their input order. Groups with an
/// undefined value sort after every defined one.
pub fn top_n(table: &AggregateTable, metric: &str, direction: Direction, n: usize) -> AggregateTable {
    let Some(index) = table.metric_index(metric) else {
        tracing::debug!(metric, "ranking by unknown metric keeps input order");
        return AggregateTable {
            rows: table.rows.iter().take(n).cloned().collect(),
            ..table.clone()
        };
    };

    let mut ranked: Vec<&AggregateRow> = table.rows.iter().collect();
    ranked.sort_by(|a, b| compare(a.values[index], b.values[index], direction));

    AggregateTable {
        dimensions: table.dimensions.clone(),
        metrics: table.metrics.clone(),
        rows: ranked.into_iter().take(n).cloned().collect(),
    }
}

/// Sorts every group by `metric`; `top_n` without the cut.
pub fn sorted(table: &AggregateTable, metric: &str, direction: Direction) -> AggregateTable {
    top_n(table, metric, direction, table.rows.len())
}

fn compare(a: Option<f64>, b: Option<f64>, direction: Direction) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => {
            let ordering = a.partial_cmp(&b).unwrap_or(Ordering::Equal);
            match direction {
                Direction::Descending => ordering.reverse(),
                Direction::Ascending => ordering,
            }
        }
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
