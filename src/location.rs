//! Garbage-location detection and the location recovery cascade.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use rayon::prelude::*;
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::GeoConfig;
use crate::error::Result;
use crate::geo::{extract_coordinates_from_map_link, GeoPoint, RegionTable};
use crate::table::Table;

pub const UNKNOWN_LOCATION: &str = "Location Unknown";

/// Marker left in search links when a tag-name listing leaked into the query.
const TAG_SOUP_MARKER: &str = "+a,abbr,";

static TAG_SOUP: Lazy<Regex> = Lazy::new(|| Regex::new(r"[a-z]+,[a-z]+,[a-z]+").unwrap());

const HTML_TAGS: &[&str] = &[
    "a", "abbr", "acronym", "address", "applet", "area", "article", "aside", "audio", "b",
    "base", "bdi", "bdo", "big", "blockquote", "body", "br", "button", "canvas", "caption",
    "center", "cite", "code", "col", "colgroup", "data", "datalist", "dd", "del", "details",
    "dfn", "dialog", "dir", "div", "dl", "dt", "em", "embed", "fieldset", "figcaption",
    "figure", "font", "footer", "form", "frame", "frameset", "h1", "h2", "h3", "h4", "h5",
    "h6", "head", "header", "hr", "html", "i", "iframe", "img", "input", "ins", "kbd",
    "label", "legend", "li", "link", "main", "map", "mark", "meta", "meter", "nav",
    "noscript", "object", "ol", "optgroup", "option", "output", "p", "param", "picture",
    "pre", "progress", "q", "rp", "rt", "ruby", "s", "samp", "script", "section", "select",
    "small", "source", "span", "strike", "strong", "style", "sub", "summary", "sup", "svg",
    "table", "tbody", "td", "template", "textarea", "tfoot", "th", "thead", "time", "title",
    "tr", "track", "tt", "u", "ul", "var", "video", "wbr",
];

/// Heuristics that tell a real address apart from scraping debris.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GarbageRules {
    pub max_len: usize,
    pub max_commas: usize,
}

impl Default for GarbageRules {
    fn default() -> Self {
        Self {
            max_len: 200,
            max_commas: 5,
        }
    }
}

impl GarbageRules {
    /// The stricter length bound used when blanking values in place.
    pub fn simple() -> Self {
        Self {
            max_len: 100,
            ..Self::default()
        }
    }

    pub fn is_garbage(&self, location: &str) -> bool {
        let location = location.trim();
        if location.is_empty() {
            return true;
        }
        if TAG_SOUP.is_match(location) {
            return true;
        }
        if HTML_TAGS.iter().any(|tag| tag.eq_ignore_ascii_case(location)) {
            return true;
        }
        if location.chars().count() > self.max_len {
            return true;
        }
        if location.matches(',').count() > self.max_commas {
            return true;
        }
        !location.chars().all(|c| {
            c.is_ascii_alphanumeric()
                || c.is_whitespace()
                || matches!(c, ',' | '.' | '-' | '(' | ')')
        })
    }

    /// Trimmed value, or empty when it is garbage.
    pub fn clean(&self, location: &str) -> String {
        let location = location.trim();
        if location.is_empty() || self.is_garbage(location) {
            return String::new();
        }
        location.to_owned()
    }
}

pub fn is_garbage_location(location: &str) -> bool {
    GarbageRules::default().is_garbage(location)
}

pub fn clean_location_value(location: &str) -> String {
    GarbageRules::default().clean(location)
}

/// Recovers a label from a `maps/search/` link.
///
/// Prefers the trailing `+`-separated token (usually the city), then the text
/// before a leaked tag listing as `Near <prefix>`, then the whole query.
pub fn clean_search_url(map_link: &str) -> Option<String> {
    let rules = GarbageRules::default();
    let (_, encoded) = map_link.split_once("maps/search/")?;
    let query = match urlencoding::decode(encoded) {
        Ok(query) => query.into_owned(),
        Err(err) => {
            debug!(link = map_link, error = %err, "undecodable search link");
            return None;
        }
    };

    let parts: Vec<&str> = query.split('+').collect();
    if parts.len() > 1 {
        if let Some(last) = parts.last() {
            if last.chars().count() > 3 && !rules.is_garbage(last) {
                return Some((*last).to_owned());
            }
        }
    }

    if let Some((prefix, _)) = query.split_once(TAG_SOUP_MARKER) {
        let prefix = prefix.strip_prefix("Dr.+").unwrap_or(prefix).replace('+', " ");
        if prefix.chars().count() > 3 {
            return Some(format!("Near {}", prefix));
        }
    }

    let whole = query.replace('+', " ");
    if !rules.is_garbage(&whole) && whole.chars().count() < 100 {
        return Some(whole);
    }
    None
}

/// Turns coordinates into a human-readable area name.
#[async_trait]
pub trait AreaResolver: Send + Sync {
    async fn area_for(&self, point: GeoPoint) -> Option<String>;
}

/// Region-table lookup; no network.
pub struct OfflineResolver {
    table: RegionTable,
}

impl OfflineResolver {
    pub fn new(table: RegionTable) -> Self {
        Self { table }
    }
}

#[async_trait]
impl AreaResolver for OfflineResolver {
    async fn area_for(&self, point: GeoPoint) -> Option<String> {
        self.table.area_for(point)
    }
}

#[derive(Debug, Deserialize)]
struct ReverseResponse {
    #[serde(default)]
    address: HashMap<String, String>,
    display_name: Option<String>,
}

impl ReverseResponse {
    fn label(&self) -> Option<String> {
        let addr = &self.address;
        let mut parts = Vec::new();

        match (addr.get("house_number"), addr.get("road")) {
            (Some(number), Some(road)) => parts.push(format!("{} {}", number, road)),
            (None, Some(road)) => parts.push(road.clone()),
            _ => {}
        }
        if let Some(area) = addr.get("neighbourhood").or_else(|| addr.get("suburb")) {
            parts.push(area.clone());
        }
        if let Some(city) = addr.get("city").or_else(|| addr.get("town")) {
            parts.push(city.clone());
        }
        if !parts.is_empty() {
            return Some(parts.join(", "));
        }

        let display = self.display_name.as_deref()?;
        let pieces: Vec<&str> = display.split(", ").collect();
        if pieces.len() > 3 {
            Some(pieces[..3].join(", "))
        } else {
            Some(display.to_owned())
        }
    }
}

/// Reverse geocoding against a Nominatim endpoint.
pub struct NominatimResolver {
    client: Client,
    url: String,
    delay: Duration,
}

impl NominatimResolver {
    pub fn new(config: &GeoConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.geocoder_user_agent)
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            url: config.geocoder_url.clone(),
            delay: Duration::from_millis(config.geocode_delay_ms),
        })
    }

    async fn reverse(&self, point: GeoPoint) -> Result<Option<String>> {
        let response = self
            .client
            .get(&self.url)
            .query(&[
                ("lat", point.lat.to_string()),
                ("lon", point.lng.to_string()),
                ("format", "json".to_owned()),
                ("addressdetails", "1".to_owned()),
                ("zoom", "16".to_owned()),
            ])
            .send()
            .await?
            .error_for_status()?;
        let body: ReverseResponse = response.json().await?;
        Ok(body.label())
    }
}

#[async_trait]
impl AreaResolver for NominatimResolver {
    async fn area_for(&self, point: GeoPoint) -> Option<String> {
        let label = match self.reverse(point).await {
            Ok(label) => label,
            Err(err) => {
                warn!(%point, error = %err, "reverse geocoding failed");
                None
            }
        };
        tokio::time::sleep(self.delay).await;
        label
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LocationSource {
    Original,
    Coordinates,
    SearchUrl,
    City,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub label: String,
    pub source: LocationSource,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleaningSummary {
    pub total: usize,
    pub garbage_before: usize,
    pub coordinates_found: usize,
    pub from_coordinates: usize,
    pub from_search_url: usize,
    pub from_city: usize,
    pub unknown: usize,
    pub garbage_after: usize,
}

impl CleaningSummary {
    pub fn fixed(&self) -> usize {
        self.garbage_before.saturating_sub(self.garbage_after)
    }

    pub fn log(&self) {
        let pct = |n: usize| percent(n, self.total);
        info!("location cleaning summary");
        info!("  records processed:          {}", self.total);
        info!(
            "  garbage locations (before): {} ({:.1}%)",
            self.garbage_before,
            pct(self.garbage_before)
        );
        info!("  coordinates extracted:      {}", self.coordinates_found);
        info!("  resolved from coordinates:  {}", self.from_coordinates);
        info!("  recovered from search link: {}", self.from_search_url);
        info!("  fell back to city:          {}", self.from_city);
        info!("  still unknown:              {}", self.unknown);
        info!(
            "  garbage locations (after):  {} ({:.1}%)",
            self.garbage_after,
            pct(self.garbage_after)
        );
        info!("  improvement: {} records fixed", self.fixed());
    }
}

pub struct LocationCleaner<R> {
    resolver: R,
    rules: GarbageRules,
}

impl<R: AreaResolver> LocationCleaner<R> {
    pub fn new(resolver: R) -> Self {
        Self {
            resolver,
            rules: GarbageRules::default(),
        }
    }

    /// Best available label for one record; never fails.
    pub async fn resolve(&self, location: &str, map_link: &str, city: &str) -> Resolution {
        let location = location.trim();
        if !self.rules.is_garbage(location) {
            return Resolution {
                label: location.to_owned(),
                source: LocationSource::Original,
            };
        }

        if let Some(point) = extract_coordinates_from_map_link(map_link) {
            if let Some(label) = self.resolver.area_for(point).await {
                return Resolution {
                    label,
                    source: LocationSource::Coordinates,
                };
            }
        }

        if let Some(label) = clean_search_url(map_link) {
            return Resolution {
                label,
                source: LocationSource::SearchUrl,
            };
        }

        let city = city.trim();
        if city.is_empty() {
            Resolution {
                label: UNKNOWN_LOCATION.to_owned(),
                source: LocationSource::Unknown,
            }
        } else {
            Resolution {
                label: city.to_owned(),
                source: LocationSource::City,
            }
        }
    }

    /// Rewrites the `location` column in place.
    pub async fn clean_table(&self, table: &mut Table) -> Result<CleaningSummary> {
        let location_col = table.require("location")?;
        let map_col = table.column("map_link");
        let city_col = table.column("city");

        let mut summary = CleaningSummary {
            total: table.len(),
            ..CleaningSummary::default()
        };

        for row in 0..table.len() {
            let location = table.get(row, location_col).to_owned();
            let map_link = table.get_or_empty(row, map_col).to_owned();
            let city = table.get_or_empty(row, city_col).to_owned();

            if self.rules.is_garbage(&location) {
                summary.garbage_before += 1;
            }
            if extract_coordinates_from_map_link(&map_link).is_some() {
                summary.coordinates_found += 1;
            }

            let resolution = self.resolve(&location, &map_link, &city).await;
            match resolution.source {
                LocationSource::Original => {}
                LocationSource::Coordinates => summary.from_coordinates += 1,
                LocationSource::SearchUrl => summary.from_search_url += 1,
                LocationSource::City => summary.from_city += 1,
                LocationSource::Unknown => summary.unknown += 1,
            }
            if self.rules.is_garbage(&resolution.label) {
                summary.garbage_after += 1;
            }
            table.set(row, location_col, resolution.label);

            if (row + 1) % 100 == 0 {
                debug!("cleaned {}/{} locations", row + 1, summary.total);
            }
        }

        Ok(summary)
    }
}

/// Blanks garbage locations in place and returns how many cells changed.
pub fn blank_garbage_locations(table: &mut Table, rules: GarbageRules) -> Result<usize> {
    let location_col = table.require("location")?;
    let mut changed = 0;
    for row in 0..table.len() {
        let original = table.get(row, location_col).to_owned();
        let cleaned = rules.clean(&original);
        if cleaned != original {
            changed += 1;
            if changed <= 5 {
                let preview: String = original.chars().take(50).collect();
                info!("cleaned: '{}...' -> '{}'", preview, cleaned);
            }
            table.set(row, location_col, cleaned);
        }
    }
    Ok(changed)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocationStats {
    pub total: usize,
    pub empty: usize,
    pub garbage: usize,
    pub valid: usize,
    pub with_coordinates: usize,
    /// Most common valid locations, highest count first.
    pub top: Vec<(String, usize)>,
}

impl LocationStats {
    pub fn log(&self) {
        let pct = |n: usize| percent(n, self.total);
        info!("location data analysis");
        info!("  total records:     {}", self.total);
        info!("  empty locations:   {} ({:.1}%)", self.empty, pct(self.empty));
        info!("  garbage locations: {} ({:.1}%)", self.garbage, pct(self.garbage));
        info!("  valid locations:   {} ({:.1}%)", self.valid, pct(self.valid));
        info!("  map links with coordinates: {}", self.with_coordinates);
        if !self.top.is_empty() {
            info!("  most common valid locations:");
            for (location, count) in &self.top {
                info!("    {}: {}", location, count);
            }
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum LocationClass {
    Empty,
    Garbage,
    Valid,
}

pub fn analyze_locations(table: &Table, rules: GarbageRules) -> Result<LocationStats> {
    let location_col = table.require("location")?;
    let map_col = table.column("map_link");

    let classified: Vec<(LocationClass, bool)> = table
        .rows
        .par_iter()
        .map(|row| {
            let location = row.get(location_col).map(|s| s.trim()).unwrap_or("");
            let class = if location.is_empty() {
                LocationClass::Empty
            } else if rules.is_garbage(location) {
                LocationClass::Garbage
            } else {
                LocationClass::Valid
            };
            let has_coords = map_col
                .and_then(|c| row.get(c))
                .and_then(|link| extract_coordinates_from_map_link(link))
                .is_some();
            (class, has_coords)
        })
        .collect();

    let mut stats = LocationStats {
        total: table.len(),
        ..LocationStats::default()
    };
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for (row, (class, has_coords)) in table.rows.iter().zip(&classified) {
        match class {
            LocationClass::Empty => stats.empty += 1,
            LocationClass::Garbage => stats.garbage += 1,
            LocationClass::Valid => {
                stats.valid += 1;
                *counts.entry(row[location_col].trim()).or_default() += 1;
            }
        }
        if *has_coords {
            stats.with_coordinates += 1;
        }
    }

    let mut top: Vec<(String, usize)> = counts
        .into_iter()
        .map(|(location, count)| (location.to_owned(), count))
        .collect();
    top.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    top.truncate(10);
    stats.top = top;

    Ok(stats)
}

pub(crate) fn percent(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}
