//! Whole-dataset tidy-up run on a scraped CSV after the fact.

use std::collections::{BTreeMap, HashMap};

use tracing::info;

use crate::config::Config;
use crate::dedup::{dedupe_table, is_present, DedupStats};
use crate::error::Result;
use crate::extract::MapLinkKind;
use crate::location::percent;
use crate::record::experience_in_text;
use crate::table::Table;

/// Locality substrings and the name they are standardised to. Order matters.
const LOCALITIES: &[(&str, &str)] = &[
    ("jp nagar", "JP Nagar"),
    ("btm", "BTM Layout"),
    ("hsr", "HSR Layout"),
    ("electronic city", "Electronic City"),
    ("whitefield", "Whitefield"),
    ("koramangala", "Koramangala"),
    ("indiranagar", "Indiranagar"),
    ("jayanagar", "Jayanagar"),
    ("rajajinagar", "Rajajinagar"),
    ("malleshwaram", "Malleshwaram"),
    ("basavanagudi", "Basavanagudi"),
    ("marathahalli", "Marathahalli"),
    ("hebbal", "Hebbal"),
    ("bannerghatta", "Bannerghatta Road"),
    ("mg road", "MG Road"),
    ("brigade road", "Brigade Road"),
    ("commercial street", "Commercial Street"),
    ("vijayanagar", "Vijayanagar"),
    ("rt nagar", "RT Nagar"),
    ("sarjapur", "Sarjapur Road"),
    ("bellandur", "Bellandur"),
    ("domlur", "Domlur"),
    ("frazer town", "Frazer Town"),
    ("banaswadi", "Banaswadi"),
];

fn is_missing(value: &str) -> bool {
    let value = value.trim();
    value.is_empty() || value.eq_ignore_ascii_case("nan")
}

fn parse_number(value: &str) -> Option<f64> {
    value.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Fills empty experience cells from phrases like "12 years" in the degree.
pub fn experience_from_degree(table: &mut Table) -> Result<usize> {
    let Some(degree_col) = table.column("degree") else {
        return Ok(0);
    };
    let experience_col = table.ensure_column("years_of_experience");

    let mut filled = 0;
    for row in 0..table.len() {
        if !is_missing(table.get(row, experience_col)) {
            continue;
        }
        if let Some(years) = experience_in_text(&table.get(row, degree_col).to_lowercase()) {
            table.set(row, experience_col, format!("{} years", years));
            filled += 1;
        }
    }
    info!("extracted experience for {} records", filled);
    Ok(filled)
}

/// Canonical locality names; empty locations are guessed from the profile URL slug.
pub fn standardize_locations(table: &mut Table) -> Result<usize> {
    let location_col = table.require("location")?;
    let url_col = table.column("profile_url");

    let mut changed = 0;
    for row in 0..table.len() {
        let location = table.get(row, location_col).trim().to_lowercase();
        let replacement = if is_missing(&location) {
            let url = table.get_or_empty(row, url_col).to_lowercase();
            LOCALITIES
                .iter()
                .find(|(key, _)| url.contains(&key.replace(' ', "-")))
        } else {
            LOCALITIES.iter().find(|(key, _)| location.contains(key))
        };
        if let Some((_, name)) = replacement {
            if table.get(row, location_col) != *name {
                table.set(row, location_col, *name);
                changed += 1;
            }
        }
    }
    info!("standardised location for {} records", changed);
    Ok(changed)
}

/// Search links for rows that have a location but no map link.
pub fn add_search_map_links(table: &mut Table, home_city: &str, state: &str) -> Result<usize> {
    let location_col = table.require("location")?;
    let city_col = table.column("city");
    let map_col = table.ensure_column("map_link");

    let mut added = 0;
    for row in 0..table.len() {
        if !table.get(row, map_col).trim().is_empty() {
            continue;
        }
        let location = table.get(row, location_col).trim();
        if is_missing(location) {
            continue;
        }
        let city = match table.get_or_empty(row, city_col).trim() {
            "" => home_city,
            city => city,
        };
        let query = if city.eq_ignore_ascii_case(home_city) {
            format!("{}, {}, {}, India", location, city, state)
        } else {
            format!("{}, {}, India", location, city)
        };
        let link = format!("https://www.google.com/maps/search/{}", query.replace(' ', "+"));
        table.set(row, map_col, link);
        added += 1;
    }
    info!("added map links for {} records", added);
    Ok(added)
}

fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    Some(if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    })
}

/// Fills empty fees with the median valid fee of the same specialty.
pub fn fill_missing_fees(table: &mut Table) -> Result<usize> {
    let fee_col = table.require("consultation_fee")?;
    let specialty_col = table.column("specialty");

    let mut fees: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for row in 0..table.len() {
        if let Some(fee) = parse_number(table.get(row, fee_col)) {
            fees.entry(table.get_or_empty(row, specialty_col).to_owned())
                .or_default()
                .push(fee);
        }
    }
    let medians: BTreeMap<String, u32> = fees
        .into_iter()
        .filter_map(|(specialty, mut values)| {
            median(&mut values).map(|m| (specialty, m.max(0.0) as u32))
        })
        .collect();

    let mut filled = 0;
    for row in 0..table.len() {
        if !is_missing(table.get(row, fee_col)) {
            continue;
        }
        if let Some(fee) = medians.get(table.get_or_empty(row, specialty_col)) {
            table.set(row, fee_col, fee.to_string());
            filled += 1;
        }
    }

    info!("filled consultation fees for {} records", filled);
    for (specialty, fee) in &medians {
        info!("  median fee for {}: ₹{}", specialty, fee);
    }
    Ok(filled)
}

/// Integer fee and vote columns, numeric-or-blank rating, trimmed text.
pub fn normalize_columns(table: &mut Table) {
    let as_int = |value: &str| {
        parse_number(value)
            .map(|v| v.max(0.0) as u64)
            .unwrap_or(0)
            .to_string()
    };

    for name in ["consultation_fee", "vote_count"] {
        if let Some(col) = table.column(name) {
            for row in 0..table.len() {
                let value = as_int(table.get(row, col));
                table.set(row, col, value);
            }
        }
    }
    if let Some(col) = table.column("rating") {
        for row in 0..table.len() {
            let value = parse_number(table.get(row, col))
                .map(|v| v.to_string())
                .unwrap_or_default();
            table.set(row, col, value);
        }
    }
    for name in ["name", "degree", "location"] {
        if let Some(col) = table.column(name) {
            for row in 0..table.len() {
                let value = table.get(row, col).trim().to_owned();
                table.set(row, col, value);
            }
        }
    }
    table.ensure_column("map_link");
}

/// Keeps rows of one city, returns how many were dropped.
pub fn filter_city(table: &mut Table, city: &str) -> Result<usize> {
    let city_col = table.require("city")?;
    let before = table.len();
    table.retain_rows(|row| {
        row.get(city_col)
            .is_some_and(|value| value.trim().eq_ignore_ascii_case(city.trim()))
    });
    let removed = before - table.len();
    info!("kept {} records in {}, dropped {}", table.len(), city, removed);
    Ok(removed)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QualityReport {
    pub total: usize,
    /// Present (non-blank, non-placeholder) values per column, in header order.
    pub filled: Vec<(String, usize)>,
    pub specialties: Vec<(String, usize)>,
    pub locations: Vec<(String, usize)>,
    pub map_links: Vec<(MapLinkKind, usize)>,
}

impl QualityReport {
    pub fn log(&self) {
        info!("data quality report");
        info!("  total records: {}", self.total);
        for (column, count) in &self.filled {
            info!(
                "  {}: {}/{} filled ({:.1}%)",
                column,
                count,
                self.total,
                percent(*count, self.total)
            );
        }
        if !self.specialties.is_empty() {
            info!("  specialty distribution:");
            for (specialty, count) in &self.specialties {
                info!("    {}: {}", specialty, count);
            }
        }
        if !self.locations.is_empty() {
            info!("  top locations:");
            for (location, count) in &self.locations {
                info!("    {}: {}", location, count);
            }
        }
        for (kind, count) in &self.map_links {
            info!("  {} map links: {}", kind.as_str(), count);
        }
    }
}

fn top_values(table: &Table, column: Option<usize>, limit: usize) -> Vec<(String, usize)> {
    let Some(column) = column else {
        return Vec::new();
    };
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for row in 0..table.len() {
        let value = table.get(row, column).trim();
        if !value.is_empty() {
            *counts.entry(value).or_default() += 1;
        }
    }
    let mut top: Vec<(String, usize)> = counts
        .into_iter()
        .map(|(value, count)| (value.to_owned(), count))
        .collect();
    top.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    top.truncate(limit);
    top
}

pub fn quality_report(table: &Table) -> QualityReport {
    let filled = table
        .headers
        .iter()
        .enumerate()
        .map(|(col, header)| {
            let count = (0..table.len())
                .filter(|&row| is_present(table.get(row, col)))
                .count();
            (header.clone(), count)
        })
        .collect();

    let mut kinds: HashMap<MapLinkKind, usize> = HashMap::new();
    if let Some(col) = table.column("map_link") {
        for row in 0..table.len() {
            let link = table.get(row, col).trim();
            if !link.is_empty() {
                *kinds.entry(MapLinkKind::classify(link)).or_default() += 1;
            }
        }
    }
    let mut map_links: Vec<(MapLinkKind, usize)> = kinds.into_iter().collect();
    map_links.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.as_str().cmp(b.0.as_str())));

    QualityReport {
        total: table.len(),
        filled,
        specialties: top_values(table, table.column("specialty"), 10),
        locations: top_values(table, table.column("location"), 10),
        map_links,
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TidySummary {
    pub dedup: DedupStats,
    pub experience_filled: usize,
    pub locations_standardized: usize,
    pub map_links_added: usize,
    pub fees_filled: usize,
    pub filtered_out: usize,
    pub report: QualityReport,
}

/// The full tidy-up: dedupe, fill, standardise, normalise, filter, report.
#[derive(Debug, Clone)]
pub struct Tidy {
    home_city: String,
    state: String,
    city_filter: Option<String>,
}

impl Tidy {
    pub fn new(config: &Config) -> Self {
        Self {
            home_city: config.geo.city.clone(),
            state: config.geo.state.clone(),
            city_filter: None,
        }
    }

    pub fn with_city_filter(mut self, city: Option<String>) -> Self {
        self.city_filter = city;
        self
    }

    pub fn run(&self, table: &mut Table) -> Result<TidySummary> {
        info!(records = table.len(), "tidying dataset");
        quality_report(table).log();

        let mut summary = TidySummary {
            dedup: dedupe_table(table)?,
            ..TidySummary::default()
        };
        summary.experience_filled = experience_from_degree(table)?;
        summary.locations_standardized = standardize_locations(table)?;
        summary.map_links_added = add_search_map_links(table, &self.home_city, &self.state)?;
        summary.fees_filled = fill_missing_fees(table)?;
        normalize_columns(table);
        if let Some(city) = &self.city_filter {
            summary.filtered_out = filter_city(table, city)?;
        }

        summary.report = quality_report(table);
        summary.report.log();
        Ok(summary)
    }
}
