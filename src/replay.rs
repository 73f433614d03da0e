use anyhow::{Context, Result};
use chrono::NaiveDate;
use std::collections::HashMap;

use crate::history::{Revision, RevisionSource};
use crate::models::{Posting, PostingKey};
use crate::snapshot::{self, Snapshot};

/// Every posting ever observed, in the order it was first seen.
///
/// Entries are only ever appended. The only later change is stamping
/// `date_removed`, and that happens at most once per entry.
#[derive(Debug, Default)]
pub struct Ledger {
    entries: Vec<Posting>,
    // Most recently appended entry per identity
    latest: HashMap<PostingKey, usize>,
}

impl Ledger {
    fn append(&mut self, posting: Posting) {
        self.latest.insert(posting.key().clone(), self.entries.len());
        self.entries.push(posting);
    }

    /// Marks the newest entry for `key` as removed on `date`.
    /// Returns false if there is no such entry or it was already removed.
    fn mark_removed(&mut self, key: &PostingKey, date: NaiveDate) -> bool {
        let Some(&i) = self.latest.get(key) else {
            return false;
        };
        let entry = &mut self.entries[i];
        if entry.date_removed.is_some() {
            return false;
        }
        entry.date_removed = Some(date);
        true
    }

    pub fn entries(&self) -> &[Posting] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn active_count(&self) -> usize {
        self.entries.iter().filter(|p| p.is_active()).count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    Added { key: PostingKey, date_posted: NaiveDate },
    Removed { key: PostingKey, date_removed: NaiveDate },
}

/// Replays revisions of the jobs file oldest-first, tracking which postings
/// are live and recording when each one appeared and disappeared.
#[derive(Debug, Default)]
pub struct ReplayEngine {
    live: Snapshot,
    ledger: Ledger,
    revisions: usize,
}

impl ReplayEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one revision. Revisions must be fed in chronological order.
    pub fn process_revision(
        &mut self,
        revision: &Revision,
        content: &[u8],
    ) -> Result<Vec<LifecycleEvent>> {
        let current = snapshot::parse(content, revision.authored_on, &self.live)?;
        let mut events = Vec::new();

        for posting in self.live.iter() {
            if current.contains(posting.key()) {
                continue;
            }
            if !self.ledger.mark_removed(posting.key(), revision.authored_on) {
                tracing::warn!(
                    posting = %posting.key(),
                    revision = %revision.short_id(),
                    "Live posting has no open ledger entry"
                );
                continue;
            }
            events.push(LifecycleEvent::Removed {
                key: posting.key().clone(),
                date_removed: revision.authored_on,
            });
        }

        for posting in current.iter() {
            if self.live.contains(posting.key()) {
                continue;
            }
            events.push(LifecycleEvent::Added {
                key: posting.key().clone(),
                date_posted: posting.date_posted,
            });
            self.ledger.append(posting.clone());
        }

        self.live = current;
        self.revisions += 1;
        Ok(events)
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn live(&self) -> &Snapshot {
        &self.live
    }

    pub fn revisions_processed(&self) -> usize {
        self.revisions
    }

    pub fn finish(self) -> Ledger {
        self.ledger
    }
}

#[derive(Debug)]
pub struct ReplaySummary {
    pub revisions: usize,
    pub ledger: Ledger,
}

/// Runs the whole history through a fresh engine.
///
/// Any revision that fails to load or parse aborts the replay; there is no
/// partial result.
pub fn replay(source: &dyn RevisionSource) -> Result<ReplaySummary> {
    let revisions = source.revisions()?;
    let mut engine = ReplayEngine::new();

    for revision in &revisions {
        let content = source.read(revision)?;
        let events = engine
            .process_revision(revision, &content)
            .with_context(|| {
                format!(
                    "Failed to parse snapshot at revision {} ({})",
                    revision.id, revision.authored_on
                )
            })?;

        for event in &events {
            log_event(event, revision);
        }
        tracing::debug!(
            revision = %revision.short_id(),
            date = %revision.authored_on,
            live = engine.live().len(),
            ledger = engine.ledger().len(),
            "Processed revision"
        );
    }

    Ok(ReplaySummary {
        revisions: engine.revisions_processed(),
        ledger: engine.finish(),
    })
}

fn log_event(event: &LifecycleEvent, revision: &Revision) {
    match event {
        LifecycleEvent::Added { key, date_posted } => tracing::info!(
            title = %key.title,
            company = %key.company,
            remote = ?key.remote,
            date = %date_posted,
            revision = %revision.short_id(),
            "Posting added"
        ),
        LifecycleEvent::Removed { key, date_removed } => tracing::info!(
            title = %key.title,
            company = %key.company,
            remote = ?key.remote,
            date = %date_removed,
            revision = %revision.short_id(),
            "Posting removed"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::MemoryHistory;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn revision(id: &str, authored_on: &str) -> Revision {
        Revision {
            id: id.to_string(),
            authored_on: date(authored_on),
        }
    }

    fn key(title: &str, company: &str, remote: Option<bool>) -> PostingKey {
        PostingKey {
            title: title.to_string(),
            remote,
            company: company.to_string(),
        }
    }

    const ENGINEER: &str = r#"
- company: Acme
  jobs:
    - title: Engineer
      remote: false
"#;

    const ENGINEER_NEW_LINK: &str = r#"
- company: Acme
  jobs:
    - title: Engineer
      remote: false
      link: https://acme.example/careers/engineer
      indeeed: xyz
"#;

    const ENGINEER_AND_DESIGNER: &str = r#"
- company: Acme
  jobs:
    - title: Engineer
      remote: false
    - title: Designer
"#;

    const EMPTY: &str = "[]";

    #[test]
    fn test_end_to_end_removal_and_reappearance() {
        let mut engine = ReplayEngine::new();
        let engineer = key("Engineer", "Acme", Some(false));

        let events = engine
            .process_revision(&revision("r1", "2024-01-01"), ENGINEER.as_bytes())
            .unwrap();
        assert_eq!(
            events,
            vec![LifecycleEvent::Added { key: engineer.clone(), date_posted: date("2024-01-01") }]
        );
        assert_eq!(engine.ledger().len(), 1);
        assert_eq!(engine.ledger().entries()[0].date_posted, date("2024-01-01"));
        assert!(engine.ledger().entries()[0].date_removed.is_none());

        let events = engine
            .process_revision(&revision("r2", "2024-02-01"), EMPTY.as_bytes())
            .unwrap();
        assert_eq!(
            events,
            vec![LifecycleEvent::Removed { key: engineer.clone(), date_removed: date("2024-02-01") }]
        );
        assert_eq!(engine.ledger().len(), 1);
        assert_eq!(engine.ledger().entries()[0].date_posted, date("2024-01-01"));
        assert_eq!(engine.ledger().entries()[0].date_removed, Some(date("2024-02-01")));

        let events = engine
            .process_revision(&revision("r3", "2024-03-01"), ENGINEER.as_bytes())
            .unwrap();
        assert_eq!(
            events,
            vec![LifecycleEvent::Added { key: engineer.clone(), date_posted: date("2024-03-01") }]
        );

        let entries = engine.ledger().entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].date_removed, Some(date("2024-02-01")));
        assert_eq!(entries[1].key(), &engineer);
        assert_eq!(entries[1].date_posted, date("2024-03-01"));
        assert!(entries[1].date_removed.is_none());
    }

    #[test]
    fn test_date_carries_forward_across_revisions() {
        let mut engine = ReplayEngine::new();
        engine
            .process_revision(&revision("r1", "2024-01-01"), ENGINEER.as_bytes())
            .unwrap();
        let events = engine
            .process_revision(&revision("r2", "2024-02-01"), ENGINEER_NEW_LINK.as_bytes())
            .unwrap();
        assert!(events.is_empty());
        let events = engine
            .process_revision(&revision("r3", "2024-03-01"), ENGINEER_NEW_LINK.as_bytes())
            .unwrap();
        assert!(events.is_empty());

        let entries = engine.ledger().entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].date_posted, date("2024-01-01"));
        // Ledger keeps the first-seen instance
        assert!(entries[0].link.is_none());
        assert!(entries[0].indeed_id.is_none());

        let live = engine.live().get(&key("Engineer", "Acme", Some(false))).unwrap();
        assert_eq!(live.date_posted, date("2024-01-01"));
        assert_eq!(live.indeed_id.as_deref(), Some("xyz"));
    }

    #[test]
    fn test_removal_date_is_never_rewritten() {
        let mut engine = ReplayEngine::new();
        let history = [
            ("r1", "2024-01-01", ENGINEER),
            ("r2", "2024-02-01", EMPTY),
            ("r3", "2024-03-01", ENGINEER),
            ("r4", "2024-04-01", EMPTY),
            ("r5", "2024-05-01", EMPTY),
        ];
        for (id, authored_on, content) in history {
            engine
                .process_revision(&revision(id, authored_on), content.as_bytes())
                .unwrap();
        }

        let entries = engine.ledger().entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].date_posted, date("2024-01-01"));
        assert_eq!(entries[0].date_removed, Some(date("2024-02-01")));
        assert_eq!(entries[1].date_posted, date("2024-03-01"));
        assert_eq!(entries[1].date_removed, Some(date("2024-04-01")));
        // Active windows do not overlap
        assert!(entries[0].date_removed.unwrap() <= entries[1].date_posted);
    }

    #[test]
    fn test_ledger_grows_by_new_identities_only() {
        let mut engine = ReplayEngine::new();
        let history = [
            ("r1", "2024-01-01", ENGINEER, 1),
            ("r2", "2024-01-15", ENGINEER_NEW_LINK, 0),
            ("r3", "2024-02-01", ENGINEER_AND_DESIGNER, 1),
            ("r4", "2024-02-15", ENGINEER, 0),
            ("r5", "2024-03-01", ENGINEER_AND_DESIGNER, 1),
        ];

        let mut previous_len = 0;
        for (id, authored_on, content, new_identities) in history {
            let events = engine
                .process_revision(&revision(id, authored_on), content.as_bytes())
                .unwrap();
            let added = events
                .iter()
                .filter(|e| matches!(e, LifecycleEvent::Added { .. }))
                .count();
            assert_eq!(added, new_identities);
            assert_eq!(engine.ledger().len(), previous_len + new_identities);
            previous_len = engine.ledger().len();
        }

        let titles: Vec<&str> = engine.ledger().entries().iter().map(|p| p.title()).collect();
        assert_eq!(titles, vec!["Engineer", "Designer", "Designer"]);
        assert_eq!(engine.ledger().active_count(), 2);
    }

    #[test]
    fn test_explicit_dates_are_not_rewritten_by_later_revisions() {
        let first = r#"
- company: Acme
  jobs:
    - post_date: 2023-12-01
      jobs:
        - title: Engineer
"#;
        let restated = r#"
- company: Acme
  jobs:
    - post_date: 2023-12-20
      jobs:
        - title: Engineer
"#;
        let mut engine = ReplayEngine::new();
        engine
            .process_revision(&revision("r1", "2024-01-01"), first.as_bytes())
            .unwrap();
        engine
            .process_revision(&revision("r2", "2024-02-01"), restated.as_bytes())
            .unwrap();

        let entries = engine.ledger().entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].date_posted, date("2023-12-01"));
    }

    #[test]
    fn test_alias_rename_is_not_a_removal() {
        let before = "- company: whalecompany\n  jobs:\n    - title: Designer\n";
        let after = "- company: heyorca\n  jobs:\n    - title: Designer\n";

        let mut engine = ReplayEngine::new();
        engine
            .process_revision(&revision("r1", "2024-01-01"), before.as_bytes())
            .unwrap();
        let events = engine
            .process_revision(&revision("r2", "2024-02-01"), after.as_bytes())
            .unwrap();

        assert!(events.is_empty());
        assert_eq!(engine.ledger().len(), 1);
        assert_eq!(engine.ledger().entries()[0].company(), "heyorca");
    }

    #[test]
    fn test_replay_aborts_on_malformed_revision() {
        let history = MemoryHistory::new(vec![
            (revision("aaaa1111", "2024-01-01"), ENGINEER.to_string()),
            (revision("bbbb2222", "2024-02-01"), "- company: [broken".to_string()),
            (revision("cccc3333", "2024-03-01"), ENGINEER.to_string()),
        ]);

        let err = replay(&history).unwrap_err();
        let message = format!("{:#}", err);
        assert!(message.contains("bbbb2222"), "unexpected error: {}", message);
        assert!(message.contains("2024-02-01"), "unexpected error: {}", message);
    }

    #[test]
    fn test_replay_full_history() {
        let history = MemoryHistory::new(vec![
            (revision("r1", "2024-01-01"), ENGINEER.to_string()),
            (revision("r2", "2024-02-01"), ENGINEER_AND_DESIGNER.to_string()),
            (revision("r3", "2024-03-01"), ENGINEER_NEW_LINK.to_string()),
        ]);

        let summary = replay(&history).unwrap();
        assert_eq!(summary.revisions, 3);

        let entries = summary.ledger.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].title(), "Engineer");
        assert!(entries[0].is_active());
        assert_eq!(entries[1].title(), "Designer");
        assert_eq!(entries[1].date_posted, date("2024-02-01"));
        assert_eq!(entries[1].date_removed, Some(date("2024-03-01")));
    }

    #[test]
    fn test_replay_empty_history() {
        let summary = replay(&MemoryHistory::new(Vec::new())).unwrap();
        assert_eq!(summary.revisions, 0);
        assert!(summary.ledger.is_empty());
    }
}
