//! Storage categories and the bucket registry.
//!
//! Every object the store writes belongs to one of three categories. The
//! registry maps a category to the bucket configured for it. Lookup is a
//! linear scan in configuration order and the first entry for a category
//! wins; later entries for the same category are shadowed, not rejected.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Logical partition of stored data.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageCategory {
    Logs,
    Chunks,
    Results,
}

impl StorageCategory {
    pub const ALL: [StorageCategory; 3] = [Self::Logs, Self::Chunks, Self::Results];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Logs => "logs",
            Self::Chunks => "chunks",
            Self::Results => "results",
        }
    }
}

impl fmt::Display for StorageCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageCategory {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "logs" => Ok(Self::Logs),
            "chunks" => Ok(Self::Chunks),
            "results" => Ok(Self::Results),
            _ => Err(format!(
                "unknown category {s:?}, only logs, chunks and results are supported"
            )),
        }
    }
}

/// Kind of payload a bucket holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Text,
    Json,
}

impl ContentType {
    /// MIME type sent with every object written to the bucket.
    pub fn mime(self) -> &'static str {
        match self {
            Self::Text => "text/plain",
            Self::Json => "application/json",
        }
    }
}

impl FromStr for ContentType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "text/plain" => Ok(Self::Text),
            "json" | "application/json" => Ok(Self::Json),
            _ => Err(format!(
                "unknown content type {s:?}, only text and json are supported"
            )),
        }
    }
}

/// Bucket entry as it appears in configuration, before validation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub content_type: String,
    pub category: String,
}

impl BucketSpec {
    pub fn new(
        name: impl Into<String>,
        content_type: impl Into<String>,
        category: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            content_type: content_type.into(),
            category: category.into(),
        }
    }
}

/// A validated bucket entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BucketOptions {
    pub name: String,
    pub content_type: ContentType,
    pub category: StorageCategory,
}

/// Validated, ordered bucket configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BucketRegistry {
    buckets: Vec<BucketOptions>,
}

impl BucketRegistry {
    /// Validate every entry and build the registry.
    ///
    /// Fails on the first entry whose name is empty or whose type or category
    /// is outside the accepted set, naming the offending field.
    pub fn validate(specs: &[BucketSpec]) -> Result<Self> {
        let mut buckets = Vec::with_capacity(specs.len());

        for (index, spec) in specs.iter().enumerate() {
            if spec.name.trim().is_empty() {
                return Err(Error::invalid(
                    format!("buckets[{index}].name"),
                    "bucket name must not be empty",
                ));
            }
            let content_type = spec
                .content_type
                .parse::<ContentType>()
                .map_err(|reason| Error::invalid(format!("buckets[{index}].type"), reason))?;
            let category = spec
                .category
                .parse::<StorageCategory>()
                .map_err(|reason| Error::invalid(format!("buckets[{index}].category"), reason))?;

            if let Some(existing) = buckets
                .iter()
                .find(|b: &&BucketOptions| b.category == category)
            {
                tracing::warn!(
                    category = %category,
                    bucket = %spec.name,
                    active = %existing.name,
                    "duplicate bucket category, later entry is shadowed"
                );
            }

            buckets.push(BucketOptions {
                name: spec.name.clone(),
                content_type,
                category,
            });
        }

        Ok(Self { buckets })
    }

    /// First configured bucket for a category.
    pub fn resolve(&self, category: StorageCategory) -> Option<&BucketOptions> {
        self.buckets.iter().find(|b| b.category == category)
    }

    /// All entries in configuration order, including shadowed duplicates.
    pub fn buckets(&self) -> &[BucketOptions] {
        &self.buckets
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}
