//! Best-effort field extraction from profile and listing pages.
//!
//! Every field is an ordered list of [`Strategy`] values tried left to right;
//! the first element whose text passes its [`Accept`] test wins. When none
//! does, an optional [`TextScan`] walks the document's text nodes. Nothing in
//! here fails: a missing field is an empty string.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;
use url::Url;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::record::RawProfile;

const MAPS_DOMAINS: &[&str] = &["google.com/maps", "maps.google"];

const PROFILE_LINK_SELECTORS: &[&str] = &[
    r#"a[href*="/doctor/"]"#,
    r#"a[data-qa-id="doctor_name"]"#,
    ".listing-item a",
    ".doctor-card a",
    ".info-section a",
];

// Constant selectors, known to parse.
static IFRAME: Lazy<Selector> = Lazy::new(|| Selector::parse("iframe").unwrap());
static ANCHOR: Lazy<Selector> = Lazy::new(|| Selector::parse("a").unwrap());
static DATA_LAT: Lazy<Selector> = Lazy::new(|| Selector::parse("[data-lat]").unwrap());
static DATA_LNG: Lazy<Selector> = Lazy::new(|| Selector::parse("[data-lng]").unwrap());

/// Parses a CSS selector, keeping the parser's complaint in the error.
pub fn parse_selector(source: &str) -> Result<Selector> {
    Selector::parse(source).map_err(|err| Error::InvalidSelector {
        selector: source.to_owned(),
        reason: err.to_string(),
    })
}

fn element_text(element: ElementRef) -> String {
    element.text().collect::<String>().trim().to_owned()
}

/// Test applied to an element's trimmed text.
#[derive(Debug, Clone, PartialEq)]
pub enum Accept {
    NonEmpty,
    HasDigit,
    /// Character count strictly between `min` and `max`.
    Length { min: usize, max: usize },
    /// Contains any of the keywords, ignoring case.
    Keywords(Vec<String>),
    All(Vec<Accept>),
}

impl Accept {
    pub fn keywords(words: &[&str]) -> Self {
        Accept::Keywords(words.iter().map(|w| w.to_lowercase()).collect())
    }

    pub fn check(&self, text: &str) -> bool {
        if text.is_empty() {
            return false;
        }
        match self {
            Accept::NonEmpty => true,
            Accept::HasDigit => text.chars().any(|c| c.is_ascii_digit()),
            Accept::Length { min, max } => {
                let len = text.chars().count();
                len > *min && len < *max
            }
            Accept::Keywords(words) => {
                let lower = text.to_lowercase();
                words.iter().any(|w| lower.contains(w.as_str()))
            }
            Accept::All(tests) => tests.iter().all(|t| t.check(text)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Strategy {
    source: String,
    selector: Option<Selector>,
    accept: Accept,
}

impl Strategy {
    /// A selector that does not parse is kept but never matches.
    pub fn new(selector: &str, accept: Accept) -> Self {
        let parsed = match parse_selector(selector) {
            Ok(parsed) => Some(parsed),
            Err(err) => {
                debug!(error = %err, "selector will be skipped");
                None
            }
        };
        Self {
            source: selector.to_owned(),
            selector: parsed,
            accept,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn is_usable(&self) -> bool {
        self.selector.is_some()
    }

    fn apply(&self, document: &Html) -> Option<String> {
        let selector = self.selector.as_ref()?;
        document
            .select(selector)
            .map(element_text)
            .find(|text| self.accept.check(text))
    }
}

/// Last-resort scan over every text node outside `<script>` and `<style>`.
#[derive(Debug, Clone, PartialEq)]
pub struct TextScan {
    pub keywords: Vec<String>,
    pub require_digit: bool,
    pub max_len: usize,
}

impl TextScan {
    pub fn new(keywords: &[&str], require_digit: bool, max_len: usize) -> Self {
        Self {
            keywords: keywords.iter().map(|k| k.to_lowercase()).collect(),
            require_digit,
            max_len,
        }
    }

    fn apply(&self, document: &Html) -> Option<String> {
        document
            .root_element()
            .descendants()
            .filter(|node| {
                let tag = node.parent().and_then(|p| p.value().as_element().map(|el| el.name()));
                !is_code_tag(tag)
            })
            .filter_map(|node| node.value().as_text().map(|text| text.trim()))
            .find(|text| self.accepts(text))
            .map(str::to_owned)
    }

    fn accepts(&self, text: &str) -> bool {
        if text.is_empty() || text.chars().count() >= self.max_len {
            return false;
        }
        if self.require_digit && !text.chars().any(|c| c.is_ascii_digit()) {
            return false;
        }
        let lower = text.to_lowercase();
        self.keywords.iter().any(|k| lower.contains(k.as_str()))
    }
}

fn is_code_tag(tag: Option<&str>) -> bool {
    tag.is_some_and(|name| {
        name.eq_ignore_ascii_case("script") || name.eq_ignore_ascii_case("style")
    })
}

#[derive(Debug, Clone)]
pub struct FieldRule {
    pub field: &'static str,
    pub strategies: Vec<Strategy>,
    pub scan: Option<TextScan>,
}

impl FieldRule {
    pub fn new(field: &'static str, selectors: &[&str], accept: Accept) -> Self {
        Self {
            field,
            strategies: selectors
                .iter()
                .map(|s| Strategy::new(s, accept.clone()))
                .collect(),
            scan: None,
        }
    }

    pub fn with_scan(mut self, scan: TextScan) -> Self {
        self.scan = Some(scan);
        self
    }

    pub fn extract(&self, document: &Html) -> String {
        for strategy in &self.strategies {
            if let Some(text) = strategy.apply(document) {
                debug!(field = self.field, selector = strategy.source(), "matched");
                return text;
            }
        }
        if let Some(text) = self.scan.as_ref().and_then(|scan| scan.apply(document)) {
            debug!(field = self.field, "matched by text scan");
            return text;
        }
        String::new()
    }
}

/// Field rules for a doctor profile page.
#[derive(Debug, Clone)]
pub struct ProfileExtractor {
    name: FieldRule,
    degree: FieldRule,
    experience: FieldRule,
    location: FieldRule,
    rating: FieldRule,
    votes: FieldRule,
    fee: FieldRule,
    synthesize_map_links: bool,
}

impl ProfileExtractor {
    pub fn new(config: &Config) -> Self {
        let mut place_words: Vec<String> = config
            .locality_keywords
            .iter()
            .map(|k| k.to_lowercase())
            .collect();
        place_words.extend(config.cities.iter().map(|c| c.to_lowercase()));
        let place_words: Vec<&str> = place_words.iter().map(String::as_str).collect();

        Self {
            name: FieldRule::new(
                "name",
                &[
                    "h1.c-profile__title",
                    r#"h1[data-qa-id="doctor_name"]"#,
                    ".doctor-name h1",
                    ".profile-title h1",
                    "h1",
                    ".doctor-name",
                    ".profile-name",
                ],
                Accept::NonEmpty,
            ),
            degree: FieldRule::new(
                "degree",
                &[
                    "p.c-profile__details",
                    ".c-profile__details p",
                    ".degree",
                    ".qualification",
                    r#"[data-qa-id="doctor_degree"]"#,
                    ".doctor-qualifications",
                ],
                Accept::keywords(&["MBBS", "BDS", "MD", "MS", "BHMS", "BAMS"]),
            ),
            experience: FieldRule::new(
                "experience",
                &[
                    "div.c-profile__details h2",
                    r#"[data-qa-id="doctor_experience"]"#,
                    ".experience",
                    ".years-experience",
                    ".doctor-experience",
                ],
                Accept::All(vec![
                    Accept::HasDigit,
                    Accept::keywords(&["years", "experience", "yrs"]),
                ]),
            )
            .with_scan(TextScan::new(&["years", "experience"], true, 50)),
            location: FieldRule::new(
                "location",
                &[
                    "h4.c-profile--clinic__location",
                    ".c-profile--clinic__location",
                    r#"[data-qa-id="doctor_location"]"#,
                    ".clinic-location",
                    ".location",
                    ".address",
                    ".clinic-address",
                ],
                Accept::Length { min: 5, max: 200 },
            )
            .with_scan(TextScan::new(&place_words, false, 100)),
            rating: FieldRule::new(
                "rating",
                &[
                    "span.u-green-text.u-bold.u-large-font",
                    ".u-green-text.u-bold",
                    r#"[data-qa-id="doctor_score"]"#,
                    ".rating",
                    ".score",
                    ".doctor-rating",
                ],
                Accept::HasDigit,
            ),
            votes: FieldRule::new(
                "votes",
                &[
                    "span.u-smallest-font.u-grey_3-text",
                    r#"[data-qa-id="doctor_votes"]"#,
                    ".votes",
                    ".reviews-count",
                    ".patient-count",
                ],
                Accept::HasDigit,
            )
            .with_scan(TextScan::new(
                &["votes", "reviews", "patients", "feedback"],
                true,
                100,
            )),
            fee: FieldRule::new(
                "fee",
                &[
                    "span.u-strike",
                    "div.u-f-right.u-large-font.u-bold.u-valign--middle.u-lheight-normal",
                    r#"[data-qa-id="consultation_fee"]"#,
                    ".fee",
                    ".consultation-fee",
                    ".price",
                ],
                Accept::HasDigit,
            )
            .with_scan(TextScan::new(&["₹", "fee", "consultation"], true, 100)),
            synthesize_map_links: config.synthesize_map_links,
        }
    }

    pub fn extract(&self, document: &Html, city: &str) -> RawProfile {
        let mut raw = RawProfile {
            name: self.name.extract(document),
            degree: self.degree.extract(document),
            experience: self.experience.extract(document),
            location: self.location.extract(document),
            rating: self.rating.extract(document),
            votes: self.votes.extract(document),
            fee: self.fee.extract(document),
            map_link: String::new(),
        };
        raw.map_link = match extract_map_link(document) {
            Some(link) => link,
            None if self.synthesize_map_links && !raw.name.trim().is_empty() => {
                search_map_link(raw.name.trim(), raw.location.trim(), city)
            }
            None => String::new(),
        };
        raw
    }

    pub fn extract_html(&self, html: &str, city: &str) -> RawProfile {
        self.extract(&Html::parse_document(html), city)
    }
}

fn is_maps_url(value: &str) -> bool {
    MAPS_DOMAINS.iter().any(|domain| value.contains(domain))
}

fn maps_attr(element: ElementRef, attrs: &[&str]) -> Option<String> {
    attrs
        .iter()
        .filter_map(|attr| element.value().attr(attr))
        .find(|value| is_maps_url(value))
        .map(str::to_owned)
}

fn first_attr<'a>(document: &'a Html, selector: &Selector, attr: &str) -> Option<&'a str> {
    document
        .select(selector)
        .filter_map(|element| element.value().attr(attr))
        .map(str::trim)
        .find(|value| !value.is_empty())
}

/// Map link from an embedded map, a maps anchor, or `data-lat`/`data-lng` attributes.
pub fn extract_map_link(document: &Html) -> Option<String> {
    if let Some(link) = document
        .select(&IFRAME)
        .find_map(|element| maps_attr(element, &["src", "data-src"]))
    {
        return Some(link);
    }
    if let Some(link) = document
        .select(&ANCHOR)
        .find_map(|element| maps_attr(element, &["href", "data-href"]))
    {
        return Some(link);
    }

    let lat = first_attr(document, &DATA_LAT, "data-lat")?;
    let lng = first_attr(document, &DATA_LNG, "data-lng")?;
    Some(format!("https://www.google.com/maps?q={},{}", lat, lng))
}

/// Search-style link built from what is known about the doctor.
pub fn search_map_link(name: &str, location: &str, city: &str) -> String {
    let query = format!("{} doctor {} {}", name, location, city);
    format!(
        "https://www.google.com/maps/search/{}",
        urlencoding::encode(&query).replace("%20", "+")
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MapLinkKind {
    Search,
    CoordinateQuery,
    Place,
    Embed,
    Other,
}

impl MapLinkKind {
    pub fn classify(url: &str) -> Self {
        if url.contains("maps/search/") {
            MapLinkKind::Search
        } else if url.contains("maps/place/") {
            MapLinkKind::Place
        } else if url.contains("maps/embed") || url.contains("output=embed") {
            MapLinkKind::Embed
        } else if url.contains("?q=") || url.contains("&q=") {
            MapLinkKind::CoordinateQuery
        } else {
            MapLinkKind::Other
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MapLinkKind::Search => "search",
            MapLinkKind::CoordinateQuery => "coordinate query",
            MapLinkKind::Place => "place",
            MapLinkKind::Embed => "embed",
            MapLinkKind::Other => "other",
        }
    }
}

/// Absolute profile URLs on a listing page, first-seen order.
pub fn extract_profile_links(document: &Html, base: &Url) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut links = Vec::new();
    for source in PROFILE_LINK_SELECTORS {
        let Ok(selector) = Selector::parse(source) else {
            debug!(selector = *source, "skipping link selector");
            continue;
        };
        for element in document.select(&selector) {
            let Some(href) = element.value().attr("href") else {
                continue;
            };
            if !href.contains("/doctor/") {
                continue;
            }
            match base.join(href) {
                Ok(mut url) => {
                    url.set_fragment(None);
                    let url = url.to_string();
                    if seen.insert(url.clone()) {
                        links.push(url);
                    }
                }
                Err(err) => debug!(href, error = %err, "unjoinable profile link"),
            }
        }
    }
    links
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROFILE: &str = r#"
        <html><head>
          <script>var years = "99 years experience";</script>
        </head><body>
          <h1 class="c-profile__title">Dr. Asha Rao</h1>
          <div class="c-profile__details">
            <p class="c-profile__details">MBBS, MD - General Medicine</p>
            <h2>Overview</h2>
            <h2>18 Years Experience Overall</h2>
          </div>
          <h4 class="c-profile--clinic__location">Jayanagar 4th Block</h4>
          <span class="u-green-text u-bold u-large-font">97%</span>
          <span class="u-smallest-font u-grey_3-text">(412 votes)</span>
          <span class="u-strike">₹600</span>
          <iframe src="https://www.google.com/maps/embed/v1/place?q=12.93,77.58"></iframe>
        </body></html>
    "#;

    fn extractor() -> ProfileExtractor {
        ProfileExtractor::new(&Config::default())
    }

    #[test]
    fn full_profile() {
        let raw = extractor().extract_html(PROFILE, "Bangalore");
        assert_eq!(raw.name, "Dr. Asha Rao");
        assert_eq!(raw.degree, "MBBS, MD - General Medicine");
        assert_eq!(raw.experience, "18 Years Experience Overall");
        assert_eq!(raw.location, "Jayanagar 4th Block");
        assert_eq!(raw.rating, "97%");
        assert_eq!(raw.votes, "(412 votes)");
        assert_eq!(raw.fee, "₹600");
        assert!(raw.map_link.starts_with("https://www.google.com/maps/embed"));
    }

    #[test]
    fn empty_document_yields_empty_fields() {
        let mut config = Config::default();
        config.synthesize_map_links = false;
        let raw = ProfileExtractor::new(&config).extract_html("<html></html>", "Bangalore");
        assert_eq!(raw, RawProfile::default());
    }

    #[test]
    fn malformed_selector_is_skipped() {
        let rule = FieldRule {
            field: "experience",
            strategies: vec![
                Strategy::new(r#"span:contains("Years")"#, Accept::NonEmpty),
                Strategy::new("span.exp", Accept::HasDigit),
            ],
            scan: None,
        };
        assert!(!rule.strategies[0].is_usable());
        let doc = Html::parse_document(r#"<span class="exp">9 years</span>"#);
        assert_eq!(rule.extract(&doc), "9 years");
    }

    #[test]
    fn accept_rejects_then_next_strategy_wins() {
        let rule = FieldRule::new("fee", &["span.a", "span.b"], Accept::HasDigit);
        let doc =
            Html::parse_document(r#"<span class="a">Free</span><span class="b">₹ 300</span>"#);
        assert_eq!(rule.extract(&doc), "₹ 300");
    }

    #[test]
    fn full_css_selectors_are_usable() {
        let doc = Html::parse_document(
            r#"<div class="card">
                 <h2>About</h2>
                 <h2>11 years experience</h2>
                 <a class="x">skip</a><a class="y">Dr. Iyer</a>
               </div>
               <p class="doctor-name">Dr. Menon</p>"#,
        );
        let cases = [
            ("h1, .doctor-name", "Dr. Menon"),
            ("div > h2", "About"),
            ("h2:nth-of-type(2)", "11 years experience"),
            ("a:not(.x)", "Dr. Iyer"),
        ];
        for (selector, expected) in cases {
            let strategy = Strategy::new(selector, Accept::NonEmpty);
            assert!(strategy.is_usable(), "{selector}");
            assert_eq!(strategy.apply(&doc).as_deref(), Some(expected), "{selector}");
        }
    }

    #[test]
    fn parse_selector_reports_the_source() {
        match parse_selector("h1[") {
            Err(Error::InvalidSelector { selector, .. }) => assert_eq!(selector, "h1["),
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn text_scan_skips_scripts_and_requires_digit() {
        let html = r#"
            <script>var x = "10 years experience";</script>
            <div><span>Years of service</span><b>Over 12 years of experience</b></div>
        "#;
        let rule = FieldRule::new("experience", &[], Accept::NonEmpty)
            .with_scan(TextScan::new(&["years", "experience"], true, 50));
        let doc = Html::parse_document(html);
        assert_eq!(rule.extract(&doc), "Over 12 years of experience");
    }

    #[test]
    fn location_scan_uses_localities() {
        let html = "<div><p>Clinic timings 10-6</p><p>Near Koramangala</p></div>";
        let raw = extractor().extract_html(html, "Bangalore");
        assert_eq!(raw.location, "Near Koramangala");
    }

    #[test]
    fn map_link_from_anchor() {
        let doc = Html::parse_document(
            r#"<a href="/other">x</a><a data-href="https://maps.google.com/?q=1,2">map</a>"#,
        );
        assert_eq!(
            extract_map_link(&doc).as_deref(),
            Some("https://maps.google.com/?q=1,2")
        );
    }

    #[test]
    fn map_link_from_lat_lng_attributes() {
        let doc = Html::parse_document(r#"<div data-lat="12.9716" data-lng="77.5946"></div>"#);
        assert_eq!(
            extract_map_link(&doc).as_deref(),
            Some("https://www.google.com/maps?q=12.9716,77.5946")
        );
        assert_eq!(extract_map_link(&Html::parse_document("<div data-lat=\"1\"></div>")), None);
    }

    #[test]
    fn search_link_is_synthesized_last() {
        let html = r#"<h1>Dr. Rao</h1><h4 class="c-profile--clinic__location">HSR Layout</h4>"#;
        let raw = extractor().extract_html(html, "Bangalore");
        assert_eq!(
            raw.map_link,
            "https://www.google.com/maps/search/Dr.+Rao+doctor+HSR+Layout+Bangalore"
        );
        assert_eq!(MapLinkKind::classify(&raw.map_link), MapLinkKind::Search);
    }

    #[test]
    fn classify_link_shapes() {
        assert_eq!(
            MapLinkKind::classify("https://www.google.com/maps/place/12.9,77.6"),
            MapLinkKind::Place
        );
        assert_eq!(
            MapLinkKind::classify("https://www.google.com/maps?q=12.9,77.6"),
            MapLinkKind::CoordinateQuery
        );
        assert_eq!(
            MapLinkKind::classify("https://www.google.com/maps/embed?pb=1"),
            MapLinkKind::Embed
        );
        assert_eq!(MapLinkKind::classify(""), MapLinkKind::Other);
    }

    #[test]
    fn profile_links_are_absolute_and_unique() {
        let html = r#"
            <div class="listing-item">
              <a data-qa-id="doctor_name" href="/bangalore/doctor/dr-a-dentist">Dr. A</a>
              <a href="/bangalore/doctor/dr-a-dentist">Book</a>
            </div>
            <div class="doctor-card">
              <a href="https://www.practo.com/bangalore/doctor/dr-b">Dr. B</a>
            </div>
            <a href="/bangalore/clinic/x">Clinic</a>
        "#;
        let base = Url::parse("https://www.practo.com").unwrap();
        let links = extract_profile_links(&Html::parse_document(html), &base);
        assert_eq!(
            links,
            vec![
                "https://www.practo.com/bangalore/doctor/dr-a-dentist",
                "https://www.practo.com/bangalore/doctor/dr-b",
            ]
        );
    }
}
