use std::collections::BTreeMap;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use scraper::{Html, Selector};
use url::Url;

use crate::archive::{ArchiveEntry, SectionIndex, neutralize, percent_decode};

/// Characters left unescaped when re-encoding an anchor, mirroring the
/// unreserved set plus the path separator.
const ANCHOR_KEEP: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'_')
    .remove(b'.')
    .remove(b'-')
    .remove(b'~')
    .remove(b'/');

/// A link harvested from a rendered archive-directory page: the target page
/// path (site-relative, still encoded) and the section anchor it points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnchorTarget {
    pub path: String,
    pub fragment: String,
}

/// Collect anchor targets from rendered directory HTML. Anchors without a
/// fragment or without a page path are ignored; the leading article-path
/// segments are dropped.
pub fn harvest_anchor_targets(html: &str) -> Vec<AnchorTarget> {
    let selector = match Selector::parse("a[href]") {
        Ok(selector) => selector,
        Err(_) => return Vec::new(),
    };
    let base = match Url::parse("https://wiki.invalid/") {
        Ok(base) => base,
        Err(_) => return Vec::new(),
    };

    let document = Html::parse_document(html);
    let mut out = Vec::new();
    for element in document.select(&selector) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        let Ok(resolved) = base.join(href) else {
            continue;
        };
        let fragment = match resolved.fragment() {
            Some(fragment) if !fragment.is_empty() => fragment.to_string(),
            _ => continue,
        };
        let segments: Vec<&str> = resolved.path().split('/').collect();
        if segments.len() <= 2 {
            continue;
        }
        let path = segments[2..].join("/");
        if path.is_empty() {
            continue;
        }
        out.push(AnchorTarget {
            path,
            fragment,
        });
    }
    out
}

/// Merge harvested anchors for `page_name` into the index. `resolve_date`
/// maps an archive page title to the timestamp of its last substantive
/// edit; it is called once per distinct path and unresolvable pages date to
/// zero. Each anchor is stored under the decoded section key and, when it
/// differs, under the dot-encoded variant MediaWiki uses in wikitext.
/// Returns the number of anchors merged.
pub fn merge_into_index<F>(
    index: &mut SectionIndex,
    page_name: &str,
    anchors: &[AnchorTarget],
    mut resolve_date: F,
) -> usize
where
    F: FnMut(&str) -> Option<i64>,
{
    let page_key = neutralize(page_name);
    let mut dates: BTreeMap<String, i64> = BTreeMap::new();
    let mut merged = 0usize;

    for anchor in anchors {
        let date = match dates.get(&anchor.path) {
            Some(date) => *date,
            None => {
                let title = percent_decode(&anchor.path).replace('_', " ");
                let date = resolve_date(&title).unwrap_or(0);
                dates.insert(anchor.path.clone(), date);
                date
            }
        };

        let target =
            percent_decode(&format!("{}#{}", anchor.path, anchor.fragment)).replace('_', " ");
        let entry = ArchiveEntry { target, date };

        let decoded = percent_decode(&anchor.fragment);
        let decoded_key = neutralize(&decoded);
        let encoded_key =
            neutralize(&utf8_percent_encode(&decoded, ANCHOR_KEEP).to_string().replace('%', "."));

        index.insert(&page_key, &decoded_key, entry.clone());
        if encoded_key != decoded_key {
            index.insert(&page_key, &encoded_key, entry);
        }
        merged += 1;
    }

    merged
}
