use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::geo::{BoundingBox, GeoPoint};

pub const DEFAULT_CONFIG_FILE: &str = "docscrape.toml";
pub const ENV_PREFIX: &str = "DOCSCRAPE_";

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

const SPECIALTIES: &[&str] = &[
    "Cardiologist",
    "Chiropractor",
    "Dentist",
    "Dermatologist",
    "Dietitian/Nutritionist",
    "Gastroenterologist",
    "bariatric surgeon",
    "Gynecologist",
    "Infertility Specialist",
    "Neurologist",
    "Neurosurgeon",
    "Ophthalmologist",
    "Orthopedist",
    "Pediatrician",
    "Physiotherapist",
    "Psychiatrist",
    "Pulmonologist",
    "Rheumatologist",
    "Urologist",
];

const LOCALITIES: &[&str] = &[
    "koramangala",
    "indiranagar",
    "whitefield",
    "electronic city",
    "jp nagar",
    "btm layout",
    "jayanagar",
    "rajajinagar",
    "malleshwaram",
    "basavanagudi",
    "marathahalli",
    "hebbal",
    "bannerghatta",
    "ulsoor",
    "richmond town",
    "mg road",
    "brigade road",
    "cunningham road",
    "commercial street",
    "vijayanagar",
    "yeshwanthpur",
    "peenya",
    "rt nagar",
    "hsr layout",
    "sarjapur",
    "bellandur",
    "domlur",
    "frazer town",
    "banaswadi",
];

/// Settings shared by the scraper, the extractor and the offline cleaners.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub cities: Vec<String>,
    pub specialties: Vec<String>,
    pub base_url: String,
    pub search_path: String,
    pub user_agent: String,
    pub request_delay_ms: u64,
    pub timeout_secs: u64,
    pub max_pages: u32,
    pub max_doctors_per_specialty: Option<usize>,
    pub output_dir: PathBuf,
    pub csv_filename: String,
    pub database: Option<PathBuf>,
    pub synthesize_map_links: bool,
    pub locality_keywords: Vec<String>,
    pub geo: GeoConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoConfig {
    pub city: String,
    /// Appended to synthesized map searches for rows in `city`.
    pub state: String,
    pub bounds: BoundingBox,
    pub center: GeoPoint,
    /// CSV of named regions; the built-in Bangalore table is used when unset.
    pub region_file: Option<PathBuf>,
    pub geocoder_url: String,
    pub geocoder_user_agent: String,
    pub geocode_delay_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cities: vec!["Bangalore".to_owned()],
            specialties: SPECIALTIES.iter().map(|s| s.to_string()).collect(),
            base_url: "https://www.practo.com".to_owned(),
            search_path: "/search/doctors".to_owned(),
            user_agent: USER_AGENT.to_owned(),
            request_delay_ms: 2000,
            timeout_secs: 30,
            max_pages: 5,
            max_doctors_per_specialty: Some(50),
            output_dir: PathBuf::from("data"),
            csv_filename: "doctors_data.csv".to_owned(),
            database: Some(PathBuf::from("data/doctors_database.db")),
            synthesize_map_links: true,
            locality_keywords: LOCALITIES.iter().map(|s| s.to_string()).collect(),
            geo: GeoConfig::default(),
        }
    }
}

impl Default for GeoConfig {
    fn default() -> Self {
        Self {
            city: "Bangalore".to_owned(),
            state: "Karnataka".to_owned(),
            bounds: BoundingBox {
                min_lat: 12.8,
                max_lat: 13.2,
                min_lng: 77.4,
                max_lng: 77.8,
            },
            center: GeoPoint::new(12.9716, 77.5946),
            region_file: None,
            geocoder_url: "https://nominatim.openstreetmap.org/reverse".to_owned(),
            geocoder_user_agent: "doctor-directory-scraper/0.1 (location cleaning)".to_owned(),
            geocode_delay_ms: 1000,
        }
    }
}

impl Config {
    /// Defaults, then the TOML file (if it exists), then `DOCSCRAPE_*` variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
        let config = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        Ok(config)
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn csv_path(&self) -> PathBuf {
        self.output_dir.join(&self.csv_filename)
    }
}
