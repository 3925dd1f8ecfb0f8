use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::detection::DetectionResult;

pub const CHART_TITLE: &str = "Vehicle Types";
pub const DATASET_LABEL: &str = "Vehicle Count";

/// Bar-chart series for the per-class vehicle counts.
///
/// Categories are sorted by label; `values[i]` is the count for
/// `categories[i]`. Zero counts are kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartSeries {
    pub title: String,
    pub dataset_label: String,
    pub categories: Vec<String>,
    pub values: Vec<u64>,
}

impl ChartSeries {
    pub fn from_counts(counts: &BTreeMap<String, u64>) -> Self {
        let (categories, values) = counts
            .iter()
            .map(|(label, count)| (label.clone(), *count))
            .unzip();

        Self {
            title: CHART_TITLE.to_string(),
            dataset_label: DATASET_LABEL.to_string(),
            categories,
            values,
        }
    }

    pub fn from_result(result: &DetectionResult) -> Self {
        Self::from_counts(&result.vehicle_counts)
    }

    pub fn len(&self) -> usize {
        self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    /// `(label, count)` pairs in chart order
    pub fn pairs(&self) -> impl Iterator<Item = (&str, u64)> {
        self.categories
            .iter()
            .map(String::as_str)
            .zip(self.values.iter().copied())
    }

    pub fn max_value(&self) -> u64 {
        self.values.iter().copied().max().unwrap_or(0)
    }

    /// Horizontal bar chart for a terminal, bars scaled to `bar_width` columns
    pub fn render_text(&self, bar_width: usize) -> String {
        let mut out = format!("{}\n", self.title);
        if self.is_empty() {
            out.push_str("  (no vehicles)\n");
            return out;
        }

        let label_width = self.categories.iter().map(|c| c.len()).max().unwrap_or(0);
        let max = self.max_value();

        for (label, count) in self.pairs() {
            let filled = if max == 0 {
                0
            } else {
                ((count as f64 / max as f64) * bar_width as f64).round() as usize
            };
            out.push_str(&format!(
                "  {:<width$} | {} {}\n",
                label,
                "█".repeat(filled),
                count,
                width = label_width
            ));
        }
        out
    }
}
