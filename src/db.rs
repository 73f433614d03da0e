use anyhow::{Context, Result, anyhow};
use chrono::NaiveDate;
use rusqlite::{Connection, params};
use std::path::{Path, PathBuf};

use crate::models::Posting;

pub struct Database {
    conn: Connection,
    path: PathBuf,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    /// Opens a database that `replay` has already written, without creating one.
    pub fn open_existing(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(anyhow!(
                "No database at {}. Run 'jobtrail replay' first.",
                path.display()
            ));
        }
        let database = Self::open(path)?;
        database.ensure_initialized()?;
        Ok(database)
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    pub fn default_path() -> PathBuf {
        // Use XDG data directory or fallback
        if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "jobtrail") {
            proj_dirs.data_dir().join("jobs.sqlite")
        } else {
            PathBuf::from("jobs.sqlite")
        }
    }

    /// Replaces the `jobs` table with the given ledger.
    ///
    /// The whole write happens in one transaction, so a failure leaves the
    /// previous table in place.
    pub fn replace_jobs(&mut self, postings: &[Posting]) -> Result<()> {
        let tx = self.conn.transaction()?;

        tx.execute_batch(
            r#"
            DROP TABLE IF EXISTS jobs;

            CREATE TABLE jobs (
                title TEXT NOT NULL,
                link TEXT,
                indeed_id TEXT,
                remote BOOLEAN,
                company TEXT NOT NULL,
                date_posted DATE NOT NULL,
                date_removed DATE
            );
            "#,
        )?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO jobs (title, link, indeed_id, remote, company, date_posted, date_removed)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for posting in postings {
                stmt.execute(params![
                    posting.title(),
                    posting.link,
                    posting.indeed_id,
                    posting.remote(),
                    posting.company(),
                    posting.date_posted.to_string(),
                    posting.date_removed.map(|d| d.to_string()),
                ])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    pub fn ensure_initialized(&self) -> Result<()> {
        let tables: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='jobs'",
            [],
            |row| row.get(0),
        )?;
        if tables == 0 {
            return Err(anyhow!(
                "No jobs table in {}. Run 'jobtrail replay' first.",
                self.path.display()
            ));
        }
        Ok(())
    }

    /// Reads postings back in ledger order.
    pub fn list_jobs(&self, active_only: bool, company: Option<&str>) -> Result<Vec<Posting>> {
        let mut sql = String::from(
            "SELECT title, link, indeed_id, remote, company, date_posted, date_removed
             FROM jobs WHERE 1=1",
        );
        if active_only {
            sql.push_str(" AND date_removed IS NULL");
        }
        if company.is_some() {
            sql.push_str(" AND LOWER(company) = LOWER(?1)");
        }
        sql.push_str(" ORDER BY rowid");

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = if let Some(c) = company {
            stmt.query_map([c], Self::row_to_posting)?
        } else {
            stmt.query_map([], Self::row_to_posting)?
        };

        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to list jobs")
    }

    /// Per-company (total, active) counts, busiest companies first.
    pub fn company_stats(&self) -> Result<Vec<(String, i64, i64)>> {
        let mut stmt = self.conn.prepare(
            "SELECT company, COUNT(*), SUM(CASE WHEN date_removed IS NULL THEN 1 ELSE 0 END)
             FROM jobs
             GROUP BY company
             ORDER BY COUNT(*) DESC, company",
        )?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?;

        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to compute company stats")
    }

    fn row_to_posting(row: &rusqlite::Row) -> rusqlite::Result<Posting> {
        let title: String = row.get(0)?;
        let company: String = row.get(4)?;
        let date_posted = parse_date(5, row.get(5)?)?;
        let date_removed = match row.get::<_, Option<String>>(6)? {
            Some(s) => Some(parse_date(6, s)?),
            None => None,
        };

        let mut posting = Posting::new(&title, &company, row.get(3)?, date_posted)
            .with_link(row.get(1)?)
            .with_indeed_id(row.get(2)?);
        posting.date_removed = date_removed;
        Ok(posting)
    }
}

fn parse_date(idx: usize, value: String) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(&value, "%Y-%m-%d").map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}
