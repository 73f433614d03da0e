use anyhow::{Context, Result, anyhow, bail};
use chrono::{DateTime, NaiveDate};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

/// One commit that touched the tracked file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Revision {
    pub id: String,
    /// Calendar date of the author timestamp, in the author's own offset.
    pub authored_on: NaiveDate,
}

impl Revision {
    pub fn short_id(&self) -> &str {
        self.id.get(..10).unwrap_or(&self.id)
    }
}

/// Where revisions of the jobs file come from.
pub trait RevisionSource {
    /// All revisions touching the file, oldest first.
    fn revisions(&self) -> Result<Vec<Revision>>;

    /// The file's content as of `revision`.
    fn read(&self, revision: &Revision) -> Result<Vec<u8>>;
}

/// Reads history by shelling out to the `git` binary.
pub struct GitHistory {
    repo_path: PathBuf,
    file_path: String,
}

impl GitHistory {
    pub fn open(repo_path: &Path, file_path: &str) -> Result<Self> {
        if !repo_path.is_dir() {
            bail!("Repository not found: {}", repo_path.display());
        }

        let history = Self {
            repo_path: repo_path.to_path_buf(),
            file_path: file_path.to_string(),
        };

        let output = history.run_git(&["rev-parse", "--git-dir"])?;
        if !output.status.success() {
            bail!(
                "Not a git repository: {} ({})",
                repo_path.display(),
                format_git_error(&output)
            );
        }

        Ok(history)
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    pub fn file_path(&self) -> &str {
        &self.file_path
    }

    fn run_git(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .current_dir(&self.repo_path)
            .args(args)
            .output()
            .context("Failed to run git")
    }
}

impl RevisionSource for GitHistory {
    fn revisions(&self) -> Result<Vec<Revision>> {
        let output = self.run_git(&[
            "log",
            "--reverse",
            "--format=%H%x09%aI",
            "--",
            &self.file_path,
        ])?;
        if !output.status.success() {
            bail!(
                "Failed to list history of {}: {}",
                self.file_path,
                format_git_error(&output)
            );
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let revisions = stdout
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(parse_log_line)
            .collect::<Result<Vec<_>>>()?;

        if revisions.is_empty() {
            bail!(
                "No history found for '{}' in {}",
                self.file_path,
                self.repo_path.display()
            );
        }

        Ok(revisions)
    }

    fn read(&self, revision: &Revision) -> Result<Vec<u8>> {
        // `./` resolves the path from `repo_path`, as `git log` does
        let spec = format!("{}:./{}", revision.id, self.file_path);
        let output = self.run_git(&["show", &spec])?;
        if !output.status.success() {
            bail!(
                "Failed to read {} at revision {}: {}",
                self.file_path,
                revision.id,
                format_git_error(&output)
            );
        }
        Ok(output.stdout)
    }
}

/// Parses one `%H<TAB>%aI` line from `git log`.
fn parse_log_line(line: &str) -> Result<Revision> {
    let (id, timestamp) = line
        .split_once('\t')
        .ok_or_else(|| anyhow!("Unexpected git log line: {:?}", line))?;
    let authored = DateTime::parse_from_rfc3339(timestamp.trim())
        .with_context(|| format!("Invalid author date for {}: {}", id, timestamp))?;

    Ok(Revision {
        id: id.to_string(),
        authored_on: authored.date_naive(),
    })
}

fn format_git_error(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if stderr.is_empty() {
        format!("git exited with code {}", output.status.code().unwrap_or(-1))
    } else {
        stderr
    }
}

/// In-memory history for driving the replay engine without a repository.
#[cfg(test)]
pub struct MemoryHistory {
    revisions: Vec<(Revision, String)>,
}

#[cfg(test)]
impl MemoryHistory {
    pub fn new(revisions: Vec<(Revision, String)>) -> Self {
        Self { revisions }
    }
}

#[cfg(test)]
impl RevisionSource for MemoryHistory {
    fn revisions(&self) -> Result<Vec<Revision>> {
        Ok(self.revisions.iter().map(|(r, _)| r.clone()).collect())
    }

    fn read(&self, revision: &Revision) -> Result<Vec<u8>> {
        self.revisions
            .iter()
            .find(|(r, _)| r == revision)
            .map(|(_, content)| content.clone().into_bytes())
            .ok_or_else(|| anyhow!("Unknown revision {}", revision.id))
    }
}
