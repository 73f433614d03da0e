use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::de::{self, Deserializer};
use serde::Deserialize;
use serde_yaml::Value;
use std::collections::HashMap;

use crate::models::{Posting, PostingKey, normalize_company};

// --- Wire format of the tracked YAML file ---

#[derive(Debug, Deserialize)]
struct CompanyEntry {
    company: String,
    // Either a batch or a single job; told apart by `post_date`
    #[serde(default)]
    jobs: Vec<Value>,
}

/// Several jobs announced together under one date.
#[derive(Debug, Deserialize)]
struct BatchEntry {
    post_date: NaiveDate,
    jobs: Vec<JobRecord>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct JobRecord {
    #[serde(deserialize_with = "scalar_string")]
    title: String,
    #[serde(default, deserialize_with = "optional_scalar_string")]
    link: Option<String>,
    #[serde(default, deserialize_with = "optional_yaml_bool")]
    remote: Option<bool>,
    #[serde(default, deserialize_with = "optional_scalar_string")]
    indeed: Option<String>,
    // Misspelled key that shows up in older revisions of the file
    #[serde(default, deserialize_with = "optional_scalar_string")]
    indeeed: Option<String>,
}

fn scalar_to_string(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Accepts a string or number; ids and titles are sometimes bare numbers.
fn scalar_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let value = Value::deserialize(deserializer)?;
    scalar_to_string(value.clone())
        .ok_or_else(|| de::Error::custom(format!("expected a string or number, found {:?}", value)))
}

fn optional_scalar_string<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        value => scalar_to_string(value.clone()).map(Some).ok_or_else(|| {
            de::Error::custom(format!("expected a string or number, found {:?}", value))
        }),
    }
}

/// YAML 1.1 booleans, so `remote: yes` means what the file's authors meant.
fn optional_yaml_bool<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<bool>, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        Value::Bool(b) => Ok(Some(b)),
        Value::String(s) => match s.as_str() {
            "yes" | "Yes" | "YES" | "on" | "On" | "ON" | "true" | "True" | "TRUE" => Ok(Some(true)),
            "no" | "No" | "NO" | "off" | "Off" | "OFF" | "false" | "False" | "FALSE" => {
                Ok(Some(false))
            }
            _ => Err(de::Error::custom(format!("expected a boolean, found {:?}", s))),
        },
        other => Err(de::Error::custom(format!("expected a boolean, found {:?}", other))),
    }
}

impl JobRecord {
    /// Both spellings name the same listing id; the correct one wins.
    fn indeed_id(&self) -> Option<String> {
        self.indeed.clone().or_else(|| self.indeeed.clone())
    }

    fn into_posting(self, company: &str, date_posted: NaiveDate) -> Posting {
        let indeed_id = self.indeed_id();
        Posting::new(&self.title, company, self.remote, date_posted)
            .with_link(self.link)
            .with_indeed_id(indeed_id)
    }
}

/// Postings from one revision, at most one per identity, in document order.
#[derive(Debug, Default, Clone)]
pub struct Snapshot {
    postings: Vec<Posting>,
    index: HashMap<PostingKey, usize>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the posting unless an equivalent one is already present.
    /// Returns whether it was added.
    pub fn insert(&mut self, posting: Posting) -> bool {
        if self.index.contains_key(posting.key()) {
            return false;
        }
        self.index.insert(posting.key().clone(), self.postings.len());
        self.postings.push(posting);
        true
    }

    pub fn get(&self, key: &PostingKey) -> Option<&Posting> {
        self.index.get(key).map(|&i| &self.postings[i])
    }

    pub fn contains(&self, key: &PostingKey) -> bool {
        self.index.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Posting> {
        self.postings.iter()
    }

    pub fn len(&self) -> usize {
        self.postings.len()
    }
}

/// Decodes one revision of the jobs file.
///
/// Batch entries carry their own date. Undated entries keep the date of an
/// equivalent posting in `previous` when there is one, and otherwise get
/// `authored_on`, the best evidence we have for when they first went up.
pub fn parse(content: &[u8], authored_on: NaiveDate, previous: &Snapshot) -> Result<Snapshot> {
    // An emptied-out file means nothing is advertised
    if content.iter().all(u8::is_ascii_whitespace) {
        return Ok(Snapshot::new());
    }

    let companies: Option<Vec<CompanyEntry>> =
        serde_yaml::from_slice(content).context("Invalid jobs YAML")?;

    let mut snapshot = Snapshot::new();

    for entry in companies.unwrap_or_default() {
        let company = normalize_company(&entry.company);

        for posting in entry.jobs {
            if posting.get("post_date").is_some() {
                let batch: BatchEntry = serde_yaml::from_value(posting)
                    .with_context(|| format!("Invalid job batch for {}", company))?;
                for job in batch.jobs {
                    snapshot.insert(job.into_posting(&company, batch.post_date));
                }
                continue;
            }

            let job: JobRecord = serde_yaml::from_value(posting)
                .with_context(|| format!("Invalid job for {}", company))?;
            let mut posting = job.into_posting(&company, authored_on);
            if let Some(known) = previous.get(posting.key()) {
                tracing::debug!(
                    posting = %posting.key(),
                    date_posted = %known.date_posted,
                    "Reusing post date from previous revision"
                );
                posting.date_posted = known.date_posted;
            }
            snapshot.insert(posting);
        }
    }

    Ok(snapshot)
}
