use serde::{Deserialize, Serialize};

use crate::clipboard::ClipboardItemType;
use crate::dto::ClipboardItemDto;

/// Matching strategy requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Exact,
    Fuzzy,
    FuzzyPlus,
    Regex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortMode {
    Recent,
    Relevance,
}

/// A single, or a set, of type filters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeFilter {
    Single(ClipboardItemType),
    Set(Vec<ClipboardItemType>),
}

impl TypeFilter {
    pub fn matches(&self, item_type: ClipboardItemType) -> bool {
        match self {
            Self::Single(t) => *t == item_type,
            Self::Set(set) => set.contains(&item_type),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query: String,
    pub mode: SearchMode,
    pub sort: SortMode,
    pub app_filter: Option<String>,
    pub type_filter: Option<TypeFilter>,
    /// Requests the refined (full in-memory scan) result after an earlier
    /// call returned a prefilter page.
    pub force_full_fuzzy: bool,
    pub limit: usize,
    pub offset: usize,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>, mode: SearchMode) -> Self {
        Self {
            query: query.into(),
            mode,
            sort: SortMode::Recent,
            app_filter: None,
            type_filter: None,
            force_full_fuzzy: false,
            limit: 50,
            offset: 0,
        }
    }
}

/// `total == -1` means unknown; `has_more` is still meaningful in that case.
#[derive(Debug, Clone)]
pub struct SearchResultPage {
    pub items: Vec<ClipboardItemDto>,
    pub total: i64,
    pub has_more: bool,
    pub is_prefilter: bool,
}

impl SearchResultPage {
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            total: 0,
            has_more: false,
            is_prefilter: false,
        }
    }
}
