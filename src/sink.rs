use std::fs::{self, File};
use std::path::Path;

use csv::Writer;
use rusqlite::{params, Connection};
use tracing::{info, warn};

use crate::error::Result;
use crate::record::DoctorRecord;

fn create_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// Writes records with a header row, creating parent directories.
pub fn write_to_csv(records: &[DoctorRecord], path: &Path) -> Result<()> {
    create_parent(path)?;
    let file = File::create(path)?;
    let mut writer = Writer::from_writer(file);

    for record in records {
        writer.serialize(record)?;
    }
    if records.is_empty() {
        writer.write_record(crate::record::COLUMNS)?;
    }

    writer.flush()?;
    info!(path = %path.display(), records = records.len(), "wrote csv");
    Ok(())
}

/// SQLite table of doctors keyed by profile URL.
pub struct DoctorStore {
    conn: Connection,
}

impl DoctorStore {
    pub fn open(path: &Path) -> Result<Self> {
        create_parent(path)?;
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS doctors (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                specialty TEXT,
                degree TEXT,
                years_of_experience INTEGER,
                location TEXT,
                city TEXT,
                rating REAL,
                vote_count INTEGER,
                consultation_fee INTEGER,
                profile_url TEXT UNIQUE,
                map_link TEXT,
                scraped_at TEXT
            );
            ",
        )?;
        Ok(Self { conn })
    }

    /// Inserts the record, or refreshes the row with the same profile URL.
    pub fn upsert(&self, record: &DoctorRecord) -> Result<()> {
        self.conn.execute(
            "
            INSERT INTO doctors (
                name, specialty, degree, years_of_experience, location, city,
                rating, vote_count, consultation_fee, profile_url, map_link, scraped_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            ON CONFLICT(profile_url) DO UPDATE SET
                name = excluded.name,
                specialty = excluded.specialty,
                degree = excluded.degree,
                years_of_experience = excluded.years_of_experience,
                location = excluded.location,
                city = excluded.city,
                rating = excluded.rating,
                vote_count = excluded.vote_count,
                consultation_fee = excluded.consultation_fee,
                map_link = excluded.map_link,
                scraped_at = excluded.scraped_at
            ",
            params![
                record.name,
                record.specialty,
                record.degree,
                record.years_of_experience,
                record.location,
                record.city,
                record.rating,
                record.vote_count,
                record.consultation_fee,
                record.profile_url,
                record.map_link,
                record.scraped_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Upserts every record; failures are logged and skipped. Returns the number stored.
    pub fn upsert_all(&self, records: &[DoctorRecord]) -> usize {
        let mut stored = 0;
        for record in records {
            match self.upsert(record) {
                Ok(()) => stored += 1,
                Err(err) => warn!(
                    url = %record.profile_url,
                    error = %err,
                    "failed to store record"
                ),
            }
        }
        info!(stored, total = records.len(), "saved records to database");
        stored
    }

    pub fn count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM doctors", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn fee_for(&self, profile_url: &str) -> Result<Option<u32>> {
        let mut stmt = self
            .conn
            .prepare("SELECT consultation_fee FROM doctors WHERE profile_url = ?1")?;
        let mut rows = stmt.query(params![profile_url])?;
        match rows.next()? {
            Some(row) => Ok(row.get(0)?),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Table;
    use chrono::Utc;

    fn record(url: &str, fee: u32) -> DoctorRecord {
        DoctorRecord {
            name: "Dr. Asha Rao".to_owned(),
            specialty: "Dentist".to_owned(),
            degree: "BDS".to_owned(),
            years_of_experience: Some(12),
            location: "Jayanagar".to_owned(),
            city: "Bangalore".to_owned(),
            rating: Some(96.0),
            vote_count: 40,
            consultation_fee: fee,
            profile_url: url.to_owned(),
            map_link: String::new(),
            scraped_at: Utc::now(),
        }
    }

    #[test]
    fn csv_has_fixed_column_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("doctors.csv");
        write_to_csv(&[record("u1", 500), record("u2", 0)], &path).unwrap();

        let table = Table::read(&path).unwrap();
        assert_eq!(table.headers, crate::record::COLUMNS);
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(0, 3), "12");
        assert_eq!(table.get(1, 8), "0");
    }

    #[test]
    fn empty_csv_still_has_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.csv");
        write_to_csv(&[], &path).unwrap();
        let table = Table::read(&path).unwrap();
        assert_eq!(table.headers.len(), crate::record::COLUMNS.len());
        assert!(table.is_empty());
    }

    #[test]
    fn upsert_replaces_by_profile_url() {
        let store = DoctorStore::open_in_memory().unwrap();
        store.upsert(&record("u1", 500)).unwrap();
        store.upsert(&record("u2", 300)).unwrap();
        store.upsert(&record("u1", 800)).unwrap();
        assert_eq!(store.count().unwrap(), 2);
        assert_eq!(store.fee_for("u1").unwrap(), Some(800));
        assert_eq!(store.fee_for("missing").unwrap(), None);
    }

    #[test]
    fn store_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db").join("doctors.db");
        {
            let store = DoctorStore::open(&path).unwrap();
            assert_eq!(store.upsert_all(&[record("u1", 1), record("u2", 2)]), 2);
        }
        let store = DoctorStore::open(&path).unwrap();
        assert_eq!(store.count().unwrap(), 2);
    }
}
