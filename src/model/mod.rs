//! Domain model
//!
//! - `Feed`/`FeedStatus`: subscribed feeds and their fetch lifecycle
//! - `Article`: stored articles together with their recheck metadata
//! - `ArticleCheckCandidate`/`ArticleCheckCursor`: the scheduling projection and its paging key
//! - `ArticleCheckEvent`/`FeedRefreshEvent`: work items carried on the bus

mod article;
mod event;
mod feed;

pub use article::{Article, ArticleCheckCandidate, ArticleCheckCursor, CandidatePage, NewArticle};
pub use event::{ArticleCheckEvent, CheckReason, FeedRefreshEvent};
pub use feed::{Feed, FeedStatus};

/// Identifier of a stored feed
pub type FeedId = i64;

/// Identifier of a stored article
pub type ArticleId = i64;
