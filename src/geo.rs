use std::fmt;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::GeoConfig;
use crate::error::{Error, Result};

const BUILTIN_REGIONS: &str = include_str!("../assets/bangalore_regions.csv");

static COORDINATE_PATTERNS: Lazy<[Regex; 3]> = Lazy::new(|| {
    [
        Regex::new(r"maps/place/(-?\d+\.?\d*),(-?\d+\.?\d*)").unwrap(),
        Regex::new(r"[?&]q=(-?\d+\.?\d*),(-?\d+\.?\d*)").unwrap(),
        Regex::new(r"@(-?\d+\.?\d*),(-?\d+\.?\d*)").unwrap(),
    ]
});

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

impl fmt::Display for GeoPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.lat, self.lng)
    }
}

/// Inclusive lat/lng rectangle in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl BoundingBox {
    pub fn contains(&self, point: GeoPoint) -> bool {
        (self.min_lat..=self.max_lat).contains(&point.lat)
            && (self.min_lng..=self.max_lng).contains(&point.lng)
    }
}

/// Pulls a coordinate pair out of a maps URL.
///
/// Recognised shapes, tried in order: `maps/place/<lat>,<lng>`,
/// `?q=<lat>,<lng>` (or `&q=`) and `@<lat>,<lng>`.
pub fn extract_coordinates_from_map_link(map_link: &str) -> Option<GeoPoint> {
    if map_link.trim().is_empty() {
        return None;
    }
    COORDINATE_PATTERNS.iter().find_map(|pattern| {
        let caps = pattern.captures(map_link)?;
        let lat = caps[1].parse::<f64>().ok()?;
        let lng = caps[2].parse::<f64>().ok()?;
        Some(GeoPoint::new(lat, lng))
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    pub name: String,
    pub bounds: BoundingBox,
}

#[derive(Deserialize)]
struct RegionRow {
    name: String,
    min_lat: f64,
    max_lat: f64,
    min_lng: f64,
    max_lng: f64,
}

impl From<RegionRow> for Region {
    fn from(row: RegionRow) -> Self {
        Self {
            name: row.name,
            bounds: BoundingBox {
                min_lat: row.min_lat,
                max_lat: row.max_lat,
                min_lng: row.min_lng,
                max_lng: row.max_lng,
            },
        }
    }
}

/// A city's outer bounds and the point quadrant labels are measured from.
#[derive(Debug, Clone, PartialEq)]
pub struct CityArea {
    pub name: String,
    pub bounds: BoundingBox,
    pub center: GeoPoint,
}

impl From<&GeoConfig> for CityArea {
    fn from(config: &GeoConfig) -> Self {
        Self {
            name: config.city.clone(),
            bounds: config.bounds,
            center: config.center,
        }
    }
}

impl CityArea {
    pub fn quadrant_label(&self, point: GeoPoint) -> String {
        let north_south = if point.lat - self.center.lat > 0.0 { "North" } else { "South" };
        let east_west = if point.lng - self.center.lng > 0.0 { "East" } else { "West" };
        format!("{} {} {}", north_south, east_west, self.name)
    }
}

/// Named localities for one city. Boxes may overlap; the first listed wins.
#[derive(Debug, Clone)]
pub struct RegionTable {
    city: CityArea,
    regions: Vec<Region>,
}

impl RegionTable {
    pub fn new(city: CityArea, regions: Vec<Region>) -> Self {
        Self { city, regions }
    }

    pub fn from_csv(city: CityArea, data: &str) -> Result<Self> {
        let mut reader = csv::Reader::from_reader(data.as_bytes());
        let mut regions = Vec::new();
        for row in reader.deserialize::<RegionRow>() {
            let region = Region::from(row?);
            let b = region.bounds;
            if b.min_lat > b.max_lat || b.min_lng > b.max_lng {
                return Err(Error::InvalidRegion(format!(
                    "inverted bounds for `{}`",
                    region.name
                )));
            }
            regions.push(region);
        }
        Ok(Self::new(city, regions))
    }

    pub fn from_path(city: CityArea, path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Self::from_csv(city, &data)
    }

    pub fn bangalore(city: CityArea) -> Result<Self> {
        Self::from_csv(city, BUILTIN_REGIONS)
    }

    /// Region file from config when set, built-in table otherwise.
    pub fn from_config(config: &GeoConfig) -> Result<Self> {
        let city = CityArea::from(config);
        match &config.region_file {
            Some(path) => Self::from_path(city, path),
            None => Self::bangalore(city),
        }
    }

    pub fn city(&self) -> &CityArea {
        &self.city
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// `None` outside the city; a locality name or a quadrant label inside it.
    pub fn area_for(&self, point: GeoPoint) -> Option<String> {
        if !self.city.bounds.contains(point) {
            return None;
        }
        let label = self
            .regions
            .iter()
            .find(|region| region.bounds.contains(point))
            .map(|region| region.name.clone())
            .unwrap_or_else(|| self.city.quadrant_label(point));
        Some(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> RegionTable {
        RegionTable::bangalore(CityArea::from(&GeoConfig::default())).unwrap()
    }

    #[test]
    fn coordinates_from_place_link() {
        let point =
            extract_coordinates_from_map_link("https://www.google.com/maps/place/12.9716,77.5946");
        assert_eq!(point, Some(GeoPoint::new(12.9716, 77.5946)));
    }

    #[test]
    fn coordinates_from_query_and_at_links() {
        assert_eq!(
            extract_coordinates_from_map_link("https://www.google.com/maps?q=12.93,77.62"),
            Some(GeoPoint::new(12.93, 77.62))
        );
        assert_eq!(
            extract_coordinates_from_map_link("https://www.google.com/maps/@13.01,-77.5,15z"),
            Some(GeoPoint::new(13.01, -77.5))
        );
    }

    #[test]
    fn unparsable_links_have_no_coordinates() {
        assert_eq!(extract_coordinates_from_map_link(""), None);
        let search = "https://www.google.com/maps/search/Dr+Rao+Bangalore";
        assert_eq!(extract_coordinates_from_map_link(search), None);
        assert_eq!(extract_coordinates_from_map_link("not a link at all"), None);
    }

    #[test]
    fn builtin_table_loads() {
        let table = table();
        assert_eq!(table.len(), 25);
        assert_eq!(table.city().name, "Bangalore");
    }

    #[test]
    fn builtin_region_names_are_clean_locations() {
        for region in &table().regions {
            assert!(
                !crate::location::is_garbage_location(&region.name),
                "{}",
                region.name
            );
        }
    }

    #[test]
    fn first_listed_region_wins_on_overlap() {
        // Inside both "MG Road - Brigade Road" and "Cubbon Park - Vidhana Soudha".
        let area = table().area_for(GeoPoint::new(12.975, 77.59));
        assert_eq!(area.as_deref(), Some("MG Road - Brigade Road"));
    }

    #[test]
    fn unmapped_point_inside_city_gets_quadrant() {
        let table = table();
        assert_eq!(
            table.area_for(GeoPoint::new(13.15, 77.75)).as_deref(),
            Some("North East Bangalore")
        );
        assert_eq!(
            table.area_for(GeoPoint::new(12.82, 77.42)).as_deref(),
            Some("South West Bangalore")
        );
    }

    #[test]
    fn point_outside_city_is_unmapped() {
        assert_eq!(table().area_for(GeoPoint::new(28.61, 77.20)), None);
    }

    #[test]
    fn inverted_region_is_rejected() {
        let data = "name,min_lat,max_lat,min_lng,max_lng\nBroken,13.0,12.0,77.0,78.0\n";
        let err = RegionTable::from_csv(CityArea::from(&GeoConfig::default()), data);
        assert!(matches!(err, Err(Error::InvalidRegion(_))));
    }
}
