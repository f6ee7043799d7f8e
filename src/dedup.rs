use std::collections::{HashMap, HashSet};

use tracing::info;

use crate::error::Result;
use crate::table::Table;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DedupStats {
    pub before: usize,
    pub exact_duplicates: usize,
    pub collapsed: usize,
    pub after: usize,
}

impl DedupStats {
    pub fn removed(&self) -> usize {
        self.before - self.after
    }
}

/// Blank and placeholder values (`0`, `nan`, `n/a`) count as missing.
pub fn is_present(value: &str) -> bool {
    let value = value.trim();
    !value.is_empty()
        && value != "0"
        && !value.eq_ignore_ascii_case("nan")
        && !value.eq_ignore_ascii_case("n/a")
}

/// Location weighs 3, experience 2, fee 1.
pub fn completeness_score(location: &str, experience: &str, fee: &str) -> u8 {
    let mut score = 0;
    if is_present(location) {
        score += 3;
    }
    if is_present(experience) {
        score += 2;
    }
    if is_present(fee) {
        score += 1;
    }
    score
}

/// Drops exact duplicate rows, then keeps the most complete row per
/// `(name, specialty)`. Equal scores keep the earlier row; survivors stay in
/// input order.
pub fn dedupe_table(table: &mut Table) -> Result<DedupStats> {
    let name_col = table.require("name")?;
    let specialty_col = table.column("specialty");
    let location_col = table.column("location");
    let experience_col = table.column("years_of_experience");
    let fee_col = table.column("consultation_fee");

    let before = table.len();

    let mut seen_rows = HashSet::new();
    table.retain_rows(|row| seen_rows.insert(row.to_vec()));
    let exact_duplicates = before - table.len();

    // (name, specialty) -> (best score, row index)
    let mut best: HashMap<(String, String), (u8, usize)> = HashMap::new();
    for row in 0..table.len() {
        let key = (
            table.get(row, name_col).to_owned(),
            table.get_or_empty(row, specialty_col).to_owned(),
        );
        let score = completeness_score(
            table.get_or_empty(row, location_col),
            table.get_or_empty(row, experience_col),
            table.get_or_empty(row, fee_col),
        );
        best.entry(key)
            .and_modify(|entry| {
                if score > entry.0 {
                    *entry = (score, row);
                }
            })
            .or_insert((score, row));
    }

    let keep: HashSet<usize> = best.values().map(|&(_, row)| row).collect();
    let mut index = 0;
    table.retain_rows(|_| {
        let kept = keep.contains(&index);
        index += 1;
        kept
    });

    let stats = DedupStats {
        before,
        exact_duplicates,
        collapsed: before - exact_duplicates - table.len(),
        after: table.len(),
    };
    info!(
        before = stats.before,
        exact = stats.exact_duplicates,
        collapsed = stats.collapsed,
        after = stats.after,
        "removed {} duplicate records",
        stats.removed()
    );
    Ok(stats)
}
