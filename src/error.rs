use reqwest::StatusCode;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {status} for {url}")]
    Status { url: String, status: StatusCode },
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("config error: {0}")]
    Config(#[from] Box<figment::Error>),
    #[error("missing column `{0}`")]
    MissingColumn(String),
    #[error("invalid selector `{selector}`: {reason}")]
    InvalidSelector { selector: String, reason: String },
    #[error("invalid region data: {0}")]
    InvalidRegion(String),
}

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Error::Config(Box::new(err))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
