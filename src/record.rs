use std::collections::HashSet;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// CSV column order for scraped records.
pub const COLUMNS: &[&str] = &[
    "name",
    "specialty",
    "degree",
    "years_of_experience",
    "location",
    "city",
    "rating",
    "vote_count",
    "consultation_fee",
    "profile_url",
    "map_link",
    "scraped_at",
];

static EXPERIENCE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)(\d+)\s*years?\s*of\s*experience",
        r"(?i)(\d+)\s*years?\s*experience",
        r"(?i)(\d+)\s*yrs?\s*experience",
        r"(?i)experience:?\s*(\d+)\s*years?",
        r"(?i)(\d+)\+?\s*(?:years?|yrs?)",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static FIRST_INT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)").unwrap());
static GROUPED_INT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d{1,3}(?:,\d{3})+|\d+)").unwrap());
static FIRST_DECIMAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+(?:\.\d+)?)").unwrap());
static DEGREE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(MBBS|MDS|MD|MS|BDS|BAMS|BHMS|BUMS|DNB|DM|MCh|PhD|DSc)\b").unwrap()
});
static DEGREE_LONG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(Bachelor|Master|Doctor)\s+of\s+\w+").unwrap());
static NOT_NAME_CHAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w\s.-]").unwrap());

/// Strings exactly as the extractor found them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawProfile {
    pub name: String,
    pub degree: String,
    pub experience: String,
    pub location: String,
    pub rating: String,
    pub votes: String,
    pub fee: String,
    pub map_link: String,
}

/// Search context a profile was reached from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchContext {
    pub city: String,
    pub specialty: String,
}

impl SearchContext {
    pub fn new(city: impl Into<String>, specialty: impl Into<String>) -> Self {
        Self {
            city: city.into(),
            specialty: specialty.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoctorRecord {
    pub name: String,
    pub specialty: String,
    pub degree: String,
    pub years_of_experience: Option<u32>,
    pub location: String,
    pub city: String,
    pub rating: Option<f64>,
    pub vote_count: u32,
    pub consultation_fee: u32,
    pub profile_url: String,
    pub map_link: String,
    pub scraped_at: DateTime<Utc>,
}

impl DoctorRecord {
    /// Coerces extracted strings into typed fields.
    pub fn normalize(
        raw: &RawProfile,
        context: &SearchContext,
        profile_url: &str,
        scraped_at: DateTime<Utc>,
    ) -> Self {
        Self {
            name: clean_name(&raw.name),
            specialty: collapse_ws(&context.specialty),
            degree: main_degree(&raw.degree),
            years_of_experience: parse_experience(&raw.experience),
            location: collapse_ws(&raw.location),
            city: collapse_ws(&context.city),
            rating: parse_rating(&raw.rating),
            vote_count: parse_votes(&raw.votes),
            consultation_fee: parse_fee(&raw.fee),
            profile_url: profile_url.trim().to_owned(),
            map_link: raw.map_link.trim().to_owned(),
            scraped_at,
        }
    }

    /// A record needs a name and at least one of fee or location to be kept.
    pub fn is_persistable(&self) -> bool {
        !self.name.is_empty() && (self.consultation_fee > 0 || !self.location.is_empty())
    }

    pub fn dedup_key(&self) -> String {
        dedup_key(&self.name, &self.city, &self.specialty)
    }
}

pub fn dedup_key(name: &str, city: &str, specialty: &str) -> String {
    let source = format!(
        "{}-{}-{}",
        name.trim().to_lowercase(),
        city.to_lowercase(),
        specialty.to_lowercase()
    );
    hex::encode(Sha256::digest(source.as_bytes()))
}

/// Keys seen during one scraping session; the first record for a key wins.
#[derive(Debug, Default)]
pub struct SeenSet {
    keys: HashSet<String>,
}

impl SeenSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` when the record's key was not seen before.
    pub fn insert(&mut self, record: &DoctorRecord) -> bool {
        self.keys.insert(record.dedup_key())
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

pub fn collapse_ws(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn clean_name(text: &str) -> String {
    collapse_ws(&NOT_NAME_CHAR.replace_all(text, ""))
}

/// Main degree abbreviation when one is present, the cleaned text otherwise.
pub fn main_degree(text: &str) -> String {
    let text = collapse_ws(text);
    if text.is_empty() {
        return text;
    }
    if let Some(m) = DEGREE.find(&text).or_else(|| DEGREE_LONG.find(&text)) {
        return m.as_str().to_owned();
    }
    let cleaned = clean_name(&text);
    cleaned.chars().take(50).collect::<String>().trim().to_owned()
}

/// Years of experience from text that mentions years; a bare number is not enough.
pub fn experience_in_text(text: &str) -> Option<u32> {
    EXPERIENCE_PATTERNS
        .iter()
        .find_map(|pattern| pattern.captures(text)?.get(1)?.as_str().parse().ok())
}

pub fn parse_experience(text: &str) -> Option<u32> {
    if text.trim().is_empty() {
        return None;
    }
    experience_in_text(text).or_else(|| FIRST_INT.captures(text)?.get(1)?.as_str().parse().ok())
}

pub fn parse_rating(text: &str) -> Option<f64> {
    FIRST_DECIMAL.captures(text)?.get(1)?.as_str().parse().ok()
}

/// First count in the text; thousands separators are allowed.
pub fn parse_votes(text: &str) -> u32 {
    GROUPED_INT
        .captures(text)
        .and_then(|caps| caps.get(1)?.as_str().replace(',', "").parse().ok())
        .unwrap_or(0)
}

pub fn parse_fee(text: &str) -> u32 {
    let cleaned: String = text
        .chars()
        .filter(|c| !matches!(c, '₹' | '$' | ',') && !c.is_whitespace())
        .collect();
    FIRST_INT
        .captures(&cleaned)
        .and_then(|caps| caps.get(1)?.as_str().parse().ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, fee: u32, location: &str) -> DoctorRecord {
        DoctorRecord {
            name: name.to_owned(),
            specialty: "Dentist".to_owned(),
            degree: String::new(),
            years_of_experience: None,
            location: location.to_owned(),
            city: "Bangalore".to_owned(),
            rating: None,
            vote_count: 0,
            consultation_fee: fee,
            profile_url: "https://www.practo.com/bangalore/doctor/x".to_owned(),
            map_link: String::new(),
            scraped_at: Utc::now(),
        }
    }

    #[test]
    fn experience_patterns() {
        assert_eq!(parse_experience("12 Years Experience Overall"), Some(12));
        assert_eq!(parse_experience("Experience: 7 years"), Some(7));
        assert_eq!(parse_experience("15+ yrs"), Some(15));
        assert_eq!(parse_experience("over 20"), Some(20));
        assert_eq!(parse_experience("no number"), None);
        assert_eq!(parse_experience(""), None);
    }

    #[test]
    fn numeric_fields() {
        assert_eq!(parse_rating("96%"), Some(96.0));
        assert_eq!(parse_rating("4.5 stars"), Some(4.5));
        assert_eq!(parse_rating(""), None);
        assert_eq!(parse_votes("(1,234 votes)"), 1234);
        assert_eq!(parse_votes("(12,345,678 votes)"), 12_345_678);
        assert_eq!(parse_votes("4, 5 stars"), 4);
        assert_eq!(parse_votes("320 Patient Stories"), 320);
        assert_eq!(parse_votes(""), 0);
        assert_eq!(parse_fee("₹1,000 Consultation fee at clinic"), 1000);
        assert_eq!(parse_fee("$ 500"), 500);
        assert_eq!(parse_fee("Free"), 0);
    }

    #[test]
    fn degree_and_name_cleaning() {
        assert_eq!(main_degree("BDS, MDS - Orthodontics"), "BDS");
        assert_eq!(main_degree("Bachelor of Physiotherapy"), "Bachelor of Physiotherapy");
        assert_eq!(main_degree(""), "");
        assert_eq!(clean_name("  Dr.  Asha\n Rao!* "), "Dr. Asha Rao");
    }

    #[test]
    fn normalize_builds_typed_record() {
        let raw = RawProfile {
            name: " Dr. Asha Rao ".into(),
            degree: "MBBS, MD - General Medicine".into(),
            experience: "18 Years Experience Overall".into(),
            location: " Jayanagar\n 4th Block ".into(),
            rating: "97%".into(),
            votes: "(412 votes)".into(),
            fee: "₹600".into(),
            map_link: "".into(),
        };
        let context = SearchContext::new("Bangalore", "Cardiologist");
        let record = DoctorRecord::normalize(&raw, &context, "https://x/doctor/asha", Utc::now());
        assert_eq!(record.name, "Dr. Asha Rao");
        assert_eq!(record.degree, "MBBS");
        assert_eq!(record.years_of_experience, Some(18));
        assert_eq!(record.location, "Jayanagar 4th Block");
        assert_eq!(record.rating, Some(97.0));
        assert_eq!(record.vote_count, 412);
        assert_eq!(record.consultation_fee, 600);
        assert_eq!(record.specialty, "Cardiologist");
    }

    #[test]
    fn persistable_requires_name_and_fee_or_location() {
        assert!(record("Dr. A", 500, "").is_persistable());
        assert!(record("Dr. A", 0, "Jayanagar").is_persistable());
        assert!(!record("Dr. A", 0, "").is_persistable());
        assert!(!record("", 500, "Jayanagar").is_persistable());
    }

    #[test]
    fn dedup_key_ignores_case_and_padding() {
        assert_eq!(
            dedup_key(" Dr. A ", "Bangalore", "Dentist"),
            dedup_key("dr. a", "BANGALORE", "dentist")
        );
        assert_ne!(
            dedup_key("Dr. A", "Bangalore", "Dentist"),
            dedup_key("Dr. A", "Delhi", "Dentist")
        );
        assert_eq!(dedup_key("a", "b", "c").len(), 64);
    }

    #[test]
    fn seen_set_first_wins() {
        let mut seen = SeenSet::new();
        assert!(seen.insert(&record("Dr. A", 500, "")));
        assert!(!seen.insert(&record("DR. A", 900, "Jayanagar")));
        assert_eq!(seen.len(), 1);
    }
}
