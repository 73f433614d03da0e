use chrono::NaiveDate;
use serde::Serialize;
use std::fmt;

/// Company names that were renamed at some point in the history.
const COMPANY_ALIASES: &[(&str, &str)] = &[("whalecompany", "heyorca")];

pub fn normalize_company(name: &str) -> String {
    COMPANY_ALIASES
        .iter()
        .find(|(alias, _)| *alias == name)
        .map(|(_, canonical)| canonical.to_string())
        .unwrap_or_else(|| name.to_string())
}

/// The fields that decide whether two postings are the same job.
///
/// Links and listing ids churn between revisions while the job stays up and
/// are not part of the key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct PostingKey {
    pub title: String,
    pub remote: Option<bool>,
    pub company: String,
}

impl fmt::Display for PostingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let remote = match self.remote {
            Some(true) => "remote",
            Some(false) => "on-site",
            None => "unspecified",
        };
        write!(f, "{} @ {} ({})", self.title, self.company, remote)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Posting {
    #[serde(flatten)]
    key: PostingKey,
    pub link: Option<String>,
    pub indeed_id: Option<String>,
    pub date_posted: NaiveDate,
    pub date_removed: Option<NaiveDate>, // None while still advertised
}

impl Posting {
    pub fn new(
        title: &str,
        company: &str,
        remote: Option<bool>,
        date_posted: NaiveDate,
    ) -> Self {
        Self {
            key: PostingKey {
                title: title.to_string(),
                remote,
                company: normalize_company(company),
            },
            link: None,
            indeed_id: None,
            date_posted,
            date_removed: None,
        }
    }

    pub fn with_link(mut self, link: Option<String>) -> Self {
        self.link = link;
        self
    }

    pub fn with_indeed_id(mut self, indeed_id: Option<String>) -> Self {
        self.indeed_id = indeed_id;
        self
    }

    /// Identity is fixed at construction; there is no way to mutate it.
    pub fn key(&self) -> &PostingKey {
        &self.key
    }

    pub fn title(&self) -> &str {
        &self.key.title
    }

    pub fn company(&self) -> &str {
        &self.key.company
    }

    pub fn remote(&self) -> Option<bool> {
        self.key.remote
    }

    pub fn is_active(&self) -> bool {
        self.date_removed.is_none()
    }
}
