//! GraphQL search request and response shapes.
//!
//! The request body is what the search cache is keyed by, so it must
//! serialize identically for identical searches. Field order comes from the
//! struct definitions below.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::library::{Library, LibraryEntry};

const SEARCH_OPERATION: &str = "searchAnimations";

const SEARCH_DOCUMENT: &str = "query searchAnimations($query: String!, $first: Int, $after: String) { \
searchPublicAnimations(query: $query, first: $first, after: $after) { \
edges { cursor node { lottieUrl jsonUrl imageUrl createdBy { firstName } } } \
pageInfo { endCursor hasNextPage hasPreviousPage startCursor } } }";

/// Variables of one search
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub query: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GraphqlRequest<'a> {
    operation_name: &'a str,
    query: &'a str,
    variables: &'a SearchQuery,
}

impl SearchQuery {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            first: None,
            after: None,
        }
    }

    pub fn first(mut self, first: u32) -> Self {
        self.first = Some(first);
        self
    }

    pub fn after(mut self, cursor: impl Into<String>) -> Self {
        self.after = Some(cursor.into());
        self
    }

    /// The GraphQL POST body for this search
    pub fn to_body(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(&GraphqlRequest {
            operation_name: SEARCH_OPERATION,
            query: SEARCH_DOCUMENT,
            variables: self,
        })
    }
}

/// Queue payload for a deferred search body.
///
/// UTF-8 bodies are stored as a JSON string; anything else as
/// `{"base64": ...}`. Either way replay sends the original bytes, so the
/// replayed response is cached under the same hash.
pub fn queued_search_body(body: &[u8]) -> Value {
    match std::str::from_utf8(body) {
        Ok(text) => Value::String(text.to_string()),
        Err(_) => serde_json::json!({ "base64": BASE64.encode(body) }),
    }
}

/// Inverse of [`queued_search_body`]
pub fn replayed_search_body(item: &Value) -> Option<Vec<u8>> {
    match item {
        Value::String(text) => Some(text.as_bytes().to_vec()),
        Value::Object(fields) => BASE64.decode(fields.get("base64")?.as_str()?).ok(),
        _ => None,
    }
}

/// `data` member of a search response
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchData {
    pub search_public_animations: SearchResults,
}

impl SearchData {
    /// Results that can be saved, one per cursor
    pub fn library(&self) -> Library {
        let mut library = Library::new();
        for entry in self
            .search_public_animations
            .edges
            .iter()
            .filter_map(AnimationEdge::to_library_entry)
        {
            library.upsert(entry);
        }
        library
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResults {
    #[serde(default)]
    pub edges: Vec<AnimationEdge>,
    pub page_info: PageInfo,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnimationEdge {
    pub cursor: String,
    pub node: AnimationNode,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnimationNode {
    pub lottie_url: Option<String>,
    pub json_url: Option<String>,
    pub image_url: Option<String>,
    pub created_by: Option<Creator>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Creator {
    pub first_name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub end_cursor: Option<String>,
    #[serde(default)]
    pub has_next_page: bool,
    #[serde(default)]
    pub has_previous_page: bool,
    pub start_cursor: Option<String>,
}

impl AnimationEdge {
    /// Library entry for this result, if it carries both URLs
    pub fn to_library_entry(&self) -> Option<LibraryEntry> {
        Some(LibraryEntry {
            cursor: self.cursor.clone(),
            lottie_url: self.node.lottie_url.clone()?,
            json_url: self.node.json_url.clone()?,
            created_by_first_name: self
                .node
                .created_by
                .as_ref()
                .map(|creator| creator.first_name.clone())
                .unwrap_or_default(),
        })
    }
}
