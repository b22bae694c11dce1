//! Daily report of updated resource records across published repositories.

use futures::StreamExt;

use crate::changes::ChangeSetResolver;
use crate::error::AppError;
use crate::models::{Record, Repository, Watermark};
use crate::traits::ArchivesSpace;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepositoryReport {
    pub name: String,
    pub published: Vec<String>,
    pub unpublished: Vec<String>,
}

impl RepositoryReport {
    pub fn total(&self) -> usize {
        self.published.len() + self.unpublished.len()
    }

    fn push(&mut self, record: &Record) {
        let line = format!(
            "{} ({})",
            record.title,
            record.id_0.as_deref().unwrap_or_default()
        );
        if record.publish {
            self.published.push(line);
        } else {
            self.unpublished.push(line);
        }
    }

    fn render(&self) -> String {
        if self.total() == 0 {
            return format!("0 resource records updated in {}\n\n", self.name);
        }
        let mut out = format!(
            "{} published resource records and {} unpublished resource records updated in {}\n",
            self.published.len(),
            self.unpublished.len(),
            self.name
        );
        for line in self.published.iter().chain(&self.unpublished) {
            out.push_str(line);
            out.push('\n');
        }
        out.push('\n');
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateReport {
    pub watermark: Watermark,
    pub repositories: Vec<RepositoryReport>,
}

impl UpdateReport {
    /// Collect non-suppressed records modified since `watermark` in every
    /// published repository. Records that cannot be fetched are logged and
    /// left out.
    pub async fn build<A: ArchivesSpace>(client: &A, watermark: Watermark) -> Result<Self, AppError> {
        let resolver = ChangeSetResolver::new(client.clone());
        let mut repositories = Vec::new();

        for repo in client.list_repositories().await?.into_iter().filter(|r| r.publish) {
            repositories.push(Self::repository(&resolver, &repo, watermark).await?);
        }
        Ok(Self {
            watermark,
            repositories,
        })
    }

    async fn repository<A: ArchivesSpace>(
        resolver: &ChangeSetResolver<A>,
        repo: &Repository,
        watermark: Watermark,
    ) -> Result<RepositoryReport, AppError> {
        let repo_id = repo
            .id()
            .ok_or_else(|| AppError::Generic(format!("Cannot parse repository id from {}", repo.uri)))?;
        let mut report = RepositoryReport {
            name: repo.name.clone(),
            ..Default::default()
        };

        let records = resolver.updated_records(repo_id, watermark).await?;
        tokio::pin!(records);
        while let Some(item) = records.next().await {
            match item {
                Ok(record) => report.push(&record),
                Err(failure) => {
                    tracing::warn!(resource = %failure.resource, error = %failure.error, "Skipping record in report");
                }
            }
        }
        Ok(report)
    }

    pub fn record_count(&self) -> usize {
        self.repositories.iter().map(RepositoryReport::total).sum()
    }

    pub fn subject(&self) -> String {
        format!("{} Resource Records Updated", self.record_count())
    }

    pub fn body(&self) -> String {
        let since = self
            .watermark
            .as_datetime()
            .map(|dt| dt.format("%Y-%m-%dT%H:%M:%S").to_string())
            .unwrap_or_else(|| self.watermark.to_string());
        let mut out = format!("The following records have been updated since {since}:\n\n");
        for repo in &self.repositories {
            out.push_str(&repo.render());
        }
        out
    }
}
