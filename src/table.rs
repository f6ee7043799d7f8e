use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;

use crate::error::{Error, Result};

/// Column names written by older scraper runs, keyed by the current name.
const ALIASES: &[(&str, &[&str])] = &[
    ("specialty", &["speciality"]),
    ("years_of_experience", &["year_of_experience"]),
    ("rating", &["dp_score"]),
    ("vote_count", &["npv"]),
    ("consultation_fee", &["consultant_fee"]),
    ("map_link", &["google_map_link"]),
];

/// A whole CSV file held in memory. Unknown columns are carried through untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        let mut table = Self { headers, rows };
        table.pad_rows();
        table
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_reader(reader);
        let headers = reader.headers()?.iter().map(str::to_owned).collect();
        let mut rows = Vec::new();
        for record in reader.records() {
            rows.push(record?.iter().map(str::to_owned).collect());
        }
        Ok(Self::new(headers, rows))
    }

    pub fn read(path: &Path) -> Result<Self> {
        Self::from_reader(File::open(path)?)
    }

    pub fn to_writer<W: Write>(&self, writer: W) -> Result<()> {
        let mut writer = csv::Writer::from_writer(writer);
        writer.write_record(&self.headers)?;
        for row in &self.rows {
            writer.write_record(row)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        self.to_writer(File::create(path)?)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Index of `name`, falling back to its legacy aliases.
    pub fn column(&self, name: &str) -> Option<usize> {
        let position = |wanted: &str| self.headers.iter().position(|h| h.trim() == wanted);
        position(name).or_else(|| {
            ALIASES
                .iter()
                .find(|(current, _)| *current == name)
                .and_then(|(_, legacy)| legacy.iter().find_map(|alias| position(alias)))
        })
    }

    pub fn require(&self, name: &str) -> Result<usize> {
        self.column(name)
            .ok_or_else(|| Error::MissingColumn(name.to_owned()))
    }

    /// Appends an empty column when `name` (or an alias) is absent.
    pub fn ensure_column(&mut self, name: &str) -> usize {
        if let Some(index) = self.column(name) {
            return index;
        }
        self.headers.push(name.to_owned());
        for row in &mut self.rows {
            row.push(String::new());
        }
        self.headers.len() - 1
    }

    pub fn get(&self, row: usize, column: usize) -> &str {
        self.rows[row].get(column).map(String::as_str).unwrap_or("")
    }

    /// Cell value, or `""` when the column is missing.
    pub fn get_or_empty(&self, row: usize, column: Option<usize>) -> &str {
        column.map(|c| self.get(row, c)).unwrap_or("")
    }

    pub fn set(&mut self, row: usize, column: usize, value: impl Into<String>) {
        self.rows[row][column] = value.into();
    }

    pub fn retain_rows<F: FnMut(&[String]) -> bool>(&mut self, mut keep: F) {
        self.rows.retain(|row| keep(row));
    }

    fn pad_rows(&mut self) {
        let width = self.headers.len();
        for row in &mut self.rows {
            if row.len() < width {
                row.resize(width, String::new());
            }
        }
    }
}
