use async_trait::async_trait;
use chrono::Utc;
use futures::{pin_mut, stream, StreamExt};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE};
use reqwest::Client;
use scraper::Html;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::extract::{extract_profile_links, ProfileExtractor};
use crate::record::{DoctorRecord, SearchContext, SeenSet};

/// Where listing and profile HTML comes from.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String>;
}

pub struct HttpSource {
    client: Client,
}

impl HttpSource {
    pub fn new(config: &Config) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            ),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));

        let client = Client::builder()
            .user_agent(&config.user_agent)
            .default_headers(headers)
            .timeout(config.timeout())
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageSource for HttpSource {
    async fn fetch(&self, url: &str) -> Result<String> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Status {
                url: url.to_owned(),
                status,
            });
        }
        Ok(response.text().await?)
    }
}

pub struct Scraper<S = HttpSource> {
    source: S,
    config: Config,
    base: Url,
    extractor: ProfileExtractor,
}

impl Scraper<HttpSource> {
    pub fn new(config: Config) -> Result<Self> {
        let source = HttpSource::new(&config)?;
        Self::with_source(config, source)
    }
}

impl<S: PageSource> Scraper<S> {
    pub fn with_source(config: Config, source: S) -> Result<Self> {
        let base = Url::parse(&config.base_url)?;
        let extractor = ProfileExtractor::new(&config);
        Ok(Self {
            source,
            config,
            base,
            extractor,
        })
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn search_url(&self, city: &str, specialty: &str, page: u32) -> Result<String> {
        let query = format!(
            r#"[{{"word":"{}","autocompleted":true,"category":"subspeciality"}}]"#,
            specialty
        );
        let mut url = self.base.join(&self.config.search_path)?;
        url.query_pairs_mut()
            .append_pair("results_type", "doctor")
            .append_pair("q", &query)
            .append_pair("city", city)
            .append_pair("page", &page.to_string());
        Ok(url.to_string())
    }

    /// Profile links for one search, following pages until one adds nothing new.
    /// A page that fails to load is skipped.
    pub async fn scrape_listing(&self, city: &str, specialty: &str) -> Vec<String> {
        let mut links: Vec<String> = Vec::new();

        for page in 1..=self.config.max_pages {
            if page > 1 {
                tokio::time::sleep(self.config.request_delay()).await;
            }
            let url = match self.search_url(city, specialty, page) {
                Ok(url) => url,
                Err(err) => {
                    warn!(city, specialty, error = %err, "cannot build search url");
                    break;
                }
            };
            info!("Scraping {} in {}: page {}", specialty, city, page);

            let body = match self.source.fetch(&url).await {
                Ok(body) => body,
                Err(err) => {
                    warn!(url = %url, error = %err, "failed to fetch listing page");
                    continue;
                }
            };

            let found = extract_profile_links(&Html::parse_document(&body), &self.base);
            let before = links.len();
            for link in found {
                if !links.contains(&link) {
                    links.push(link);
                }
            }
            if links.len() == before {
                debug!(page, "no new profile links");
                break;
            }
        }

        info!("Found {} doctor profile links", links.len());
        links
    }

    pub async fn scrape_profile(&self, url: &str, context: &SearchContext) -> Result<DoctorRecord> {
        let body = self.source.fetch(url).await?;
        let document = Html::parse_document(&body);
        let raw = self.extractor.extract(&document, &context.city);
        Ok(DoctorRecord::normalize(&raw, context, url, Utc::now()))
    }

    /// Profiles for one (city, specialty) pair, fetched one at a time.
    pub async fn scrape_specialty(
        &self,
        city: &str,
        specialty: &str,
        seen: &mut SeenSet,
    ) -> Vec<DoctorRecord> {
        let context = SearchContext::new(city, specialty);
        let links = self.scrape_listing(city, specialty).await;
        let cap = self.config.max_doctors_per_specialty.unwrap_or(usize::MAX);
        let delay = self.config.request_delay();

        let profiles = stream::iter(links).then(|url| {
            let context = &context;
            async move {
                let result = self.scrape_profile(&url, context).await;
                tokio::time::sleep(delay).await;
                (url, result)
            }
        });
        pin_mut!(profiles);

        let mut records = Vec::new();
        while records.len() < cap {
            let Some((url, result)) = profiles.next().await else {
                break;
            };
            let record = match result {
                Ok(record) => record,
                Err(err) => {
                    warn!(url = %url, error = %err, "failed to scrape profile");
                    continue;
                }
            };
            if !record.is_persistable() {
                warn!(url = %url, "incomplete data for profile");
                continue;
            }
            if !seen.insert(&record) {
                info!("Skipping duplicate doctor: {}", record.name);
                continue;
            }
            info!("Successfully scraped: {} - {}", record.name, record.location);
            records.push(record);
        }

        info!(
            "Scraped {} doctors for {} in {}",
            records.len(),
            specialty,
            city
        );
        records
    }

    /// Every configured city and specialty, in order.
    pub async fn scrape_all(&self) -> Vec<DoctorRecord> {
        info!("starting doctor data scraping");
        let mut seen = SeenSet::new();
        let mut records = Vec::new();

        for city in &self.config.cities {
            for specialty in &self.config.specialties {
                let batch = self.scrape_specialty(city, specialty, &mut seen).await;
                records.extend(batch);
            }
        }

        info!("Scraping completed. Total doctors scraped: {}", records.len());
        records
    }
}
