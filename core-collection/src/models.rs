//! Core data types shared by the schema, scan and query layers.

use serde::{Deserialize, Serialize};

/// The normalized lookup dimensions referenced by track rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dimension {
    Artist,
    Album,
    Genre,
    Year,
}

impl Dimension {
    /// Table name of this dimension.
    pub fn table_name(&self) -> &'static str {
        match self {
            Dimension::Artist => "artist",
            Dimension::Album => "album",
            Dimension::Genre => "genre",
            Dimension::Year => "year",
        }
    }

    /// Foreign-key column of this dimension on the tags table.
    pub fn tags_column(&self) -> &'static str {
        self.table_name()
    }

    /// All dimensions, in tags-column order.
    pub fn all() -> [Dimension; 4] {
        [
            Dimension::Artist,
            Dimension::Album,
            Dimension::Genre,
            Dimension::Year,
        ]
    }
}

impl std::fmt::Display for Dimension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.table_name())
    }
}

/// Metadata for one track as read from its file tags.
///
/// Dimension fields carry display names; the schema layer resolves them to
/// ids on insert. Empty strings mean the tag was absent.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TrackBundle {
    /// Unique path/identifier of the file.
    pub url: String,
    /// Containing directory of the file.
    pub directory: String,
    pub title: String,
    pub artist: String,
    pub album: String,
    pub genre: String,
    /// Year as its display name, e.g. `"1969"`.
    pub year: String,
    pub comment: String,
    pub track_number: Option<u32>,
    pub bitrate: Option<u32>,
    pub length_secs: Option<u64>,
    pub sample_rate: Option<u32>,
}

impl TrackBundle {
    /// Create a bundle for `url`, deriving the containing directory.
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into();
        let directory = match url.rfind('/') {
            Some(0) => "/".to_string(),
            Some(idx) => url[..idx].to_string(),
            None => String::new(),
        };
        Self {
            url,
            directory,
            ..Self::default()
        }
    }
}

/// Compute the sortable form of a display name: a leading English article is
/// moved to the back, so "The Beatles" sorts as "Beatles, The" while the
/// display name stays untouched.
pub fn sortable_name(name: &str) -> String {
    for article in ["The ", "A ", "An "] {
        if let Some(rest) = name.strip_prefix(article) {
            if !rest.is_empty() {
                return format!("{}, {}", rest, article.trim_end());
            }
        }
    }
    name.to_string()
}
