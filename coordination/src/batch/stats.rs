//! Distribution statistics over a finished batch. Observability only.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::plan::AGE_BRACKETS;
use super::record::SummaryRecord;

/// Counts of successful dialogues per persona dimension.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionStats {
    pub total: usize,
    pub by_age_bracket: BTreeMap<String, usize>,
    pub by_awareness: BTreeMap<String, usize>,
    pub by_category: BTreeMap<String, usize>,
    pub by_terminator: BTreeMap<String, usize>,
    pub by_occupation: BTreeMap<String, usize>,
}

impl DistributionStats {
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a SummaryRecord>) -> Self {
        let mut stats = Self::default();
        for record in records {
            stats.record(record);
        }
        stats
    }

    pub fn record(&mut self, record: &SummaryRecord) {
        self.total += 1;
        let bracket = AGE_BRACKETS
            .iter()
            .find(|b| b.contains(record.user_age))
            .map(|b| b.to_string())
            .unwrap_or_else(|| "other".to_string());
        let terminator = match record.terminator.as_str() {
            "" => "max_turns",
            t => t,
        };

        bump(&mut self.by_age_bracket, bracket);
        bump(&mut self.by_awareness, record.user_awareness.to_string());
        bump(&mut self.by_category, record.category.clone());
        bump(&mut self.by_terminator, terminator.to_string());
        bump(&mut self.by_occupation, record.occupation.clone());
    }

    /// Multi-line human-readable report.
    pub fn render(&self) -> String {
        let mut out = format!("Total dialogues: {}\n", self.total);
        for (title, table) in [
            ("Age bracket", &self.by_age_bracket),
            ("Awareness", &self.by_awareness),
            ("Scenario", &self.by_category),
            ("Terminator", &self.by_terminator),
            ("Occupation", &self.by_occupation),
        ] {
            out.push_str(&format!("{title}:\n"));
            for (key, count) in table {
                out.push_str(&format!("  {key}: {count}\n"));
            }
        }
        out
    }
}

fn bump(table: &mut BTreeMap<String, usize>, key: String) {
    *table.entry(key).or_insert(0) += 1;
}
