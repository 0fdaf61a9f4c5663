//! Domain types for offsync.
//!
//! This module contains the data flowing through the offline layer:
//! - Http: Request/response snapshots
//! - Queue: Queue names and retry intents
//! - Library: Saved animations and the cursor-keyed mirror
//! - Message: Client broadcast messages
//! - Search: GraphQL search request and result shapes

pub mod http;
pub mod library;
pub mod message;
pub mod queue;
pub mod search;

// Re-export commonly used types
pub use http::{HttpRequest, HttpResponse, RequestMode, DEFERRED_RETRY_HEADER};
pub use library::{Library, LibraryEntry};
pub use message::ClientMessage;
pub use queue::{QueueName, RetryIntent, UnknownQueue};
pub use search::{AnimationEdge, SearchData, SearchQuery, SearchResults};
