//! Mapping of scraped inputs into canonical catalog records.
//!
//! Every function here is pure: the same input and `synced_at` always give
//! the same record.

use crate::models::{
    ArticleStats, CanonicalArticle, CanonicalProject, ExtractedArticle, Platform,
    ProjectCategory, ProjectStats, ProjectStatus, RepositorySnapshot, Visibility,
};
use chrono::{DateTime, Utc};

/// Reading speed used for every platform.
pub const CHARS_PER_MINUTE: usize = 500;
pub const SUMMARY_CHARS: usize = 200;
/// Stored as the license of repositories without a detected SPDX id.
pub const NO_LICENSE: &str = "None";

const STUB_TITLE: &str = "新文章";
const STUB_SUMMARY: &str = "这是一篇来自未知平台的文章";
const STUB_AUTHOR: &str = "未知作者";
const STUB_TAG: &str = "未分类";
const STUB_READ_TIME_MINUTES: u32 = 5;

/// Minutes needed to read `text`, never less than one.
pub fn read_time_minutes(text: &str) -> u32 {
    let chars = text.chars().count();
    let minutes = chars.div_ceil(CHARS_PER_MINUTE).max(1);
    u32::try_from(minutes).unwrap_or(u32::MAX)
}

/// The first [`SUMMARY_CHARS`] characters, with `...` appended only when
/// something was cut.
pub fn summarize(text: &str) -> String {
    let mut chars = text.char_indices();
    match chars.nth(SUMMARY_CHARS) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

/// Guess a project category from topics, name and description.
///
/// Checked in order: web, mobile, desktop, library; the first hit wins.
pub fn determine_category(name: &str, topics: &[String], description: Option<&str>) -> ProjectCategory {
    let name = name.to_lowercase();
    let description = description.unwrap_or("").to_lowercase();
    let has_topic = |topic: &str| topics.iter().any(|t| t.eq_ignore_ascii_case(topic));

    if has_topic("web") || name.contains("web") || description.contains("website") {
        ProjectCategory::Web
    } else if has_topic("mobile") || name.contains("app") || description.contains("mobile") {
        ProjectCategory::Mobile
    } else if has_topic("desktop") || description.contains("desktop") {
        ProjectCategory::Desktop
    } else if has_topic("library") || name.contains("lib") || description.contains("library") {
        ProjectCategory::Library
    } else {
        ProjectCategory::Other
    }
}

pub fn canonicalize_article(
    natural_key: &str,
    article: &ExtractedArticle,
    synced_at: DateTime<Utc>,
) -> CanonicalArticle {
    CanonicalArticle {
        natural_key: natural_key.to_string(),
        title: article.title.clone(),
        author: article.author.clone(),
        published_at: article.published_at.unwrap_or(synced_at),
        summary: summarize(&article.body_text),
        body_text: article.body_text.clone(),
        content_html: article.content_html.clone(),
        tags: article.tags.clone(),
        read_time_minutes: read_time_minutes(&article.body_text),
        platform: Platform::Csdn,
        source_url: article.source_url.clone(),
        stats: ArticleStats {
            views: article.view_count,
            likes: article.like_count,
            collections: article.collection_count,
        },
        synced_at,
    }
}

/// Placeholder record for an article on a host nothing knows how to scrape.
pub fn other_stub(natural_key: &str, url: &str, synced_at: DateTime<Utc>) -> CanonicalArticle {
    CanonicalArticle {
        natural_key: natural_key.to_string(),
        title: STUB_TITLE.to_string(),
        author: STUB_AUTHOR.to_string(),
        published_at: synced_at,
        summary: STUB_SUMMARY.to_string(),
        body_text: String::new(),
        content_html: String::new(),
        tags: vec![STUB_TAG.to_string()],
        read_time_minutes: STUB_READ_TIME_MINUTES,
        platform: Platform::Other,
        source_url: url.to_string(),
        stats: ArticleStats::default(),
        synced_at,
    }
}

pub fn canonicalize_project(snapshot: &RepositorySnapshot, synced_at: DateTime<Utc>) -> CanonicalProject {
    let status = if snapshot.is_archived {
        ProjectStatus::Archived
    } else {
        ProjectStatus::Completed
    };

    CanonicalProject {
        natural_key: format!("{}/{}", snapshot.owner, snapshot.repo).to_lowercase(),
        owner: snapshot.owner.clone(),
        repo: snapshot.repo.clone(),
        title: snapshot.name.clone(),
        description: snapshot.description.clone().unwrap_or_default(),
        github_url: snapshot.html_url.clone(),
        demo_url: snapshot.homepage_url.clone().filter(|url| !url.trim().is_empty()),
        stats: ProjectStats {
            stars: snapshot.star_count,
            forks: snapshot.fork_count,
            watchers: snapshot.watcher_count,
            issues: snapshot.open_issue_count,
        },
        contributors: snapshot.contributors.clone(),
        // BTreeMap keys are already sorted and unique.
        technologies: snapshot.language_histogram.keys().cloned().collect(),
        license: snapshot
            .license_id
            .clone()
            .unwrap_or_else(|| NO_LICENSE.to_string()),
        visibility: if snapshot.is_private {
            Visibility::Private
        } else {
            Visibility::Public
        },
        category: determine_category(&snapshot.name, &snapshot.topics, snapshot.description.as_deref()),
        status,
        start_date: snapshot.created_at,
        end_date: if snapshot.is_archived { snapshot.updated_at } else { None },
        readme: snapshot.readme_text.clone(),
        recent_commits: snapshot.recent_commits.clone(),
        synced_at,
    }
}
