//! Selective wikilink rewriting for MediaWiki markup.
//!
//! The scanner finds `[[...]]` occurrences using a site's link-trail
//! grammar; the rewriter offers each one to a decision function and splices
//! the resulting replacements back into the page text. The archive module
//! ships the decision function this tool exists for: retargeting stale
//! anchored discussion links to their archive location.

pub mod archive;
pub mod config;
pub mod directory;
pub mod link;
pub mod remote;
pub mod rewrite;
pub mod scan;
pub mod site;

pub use link::{Link, TitleError};
pub use rewrite::{Replacement, RewriteError, Verdict, rewrite_links, rewrite_pair};
pub use scan::{LinkOccurrence, LinkScanner, ScanError};
pub use site::{ConfiguredSite, Namespace, SiteContext, SiteError};
