pub mod cleaning;
pub mod config;
pub mod dedup;
pub mod error;
pub mod extract;
pub mod geo;
pub mod location;
pub mod record;
pub mod scraper;
pub mod sink;
pub mod table;

pub use config::Config;
pub use error::{Error, Result};
pub use record::{DoctorRecord, RawProfile};
pub use scraper::{HttpSource, PageSource, Scraper};
pub use sink::{write_to_csv, DoctorStore};
pub use table::Table;
