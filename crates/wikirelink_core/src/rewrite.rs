use regex::Regex;
use thiserror::Error;

use crate::link::{Link, TitleError};
use crate::scan::{LinkOccurrence, LinkScanner, ScanError};
use crate::site::SiteContext;

#[derive(Debug, Error)]
pub enum RewriteError {
    #[error(transparent)]
    Scan(#[from] ScanError),
    /// The decision function produced a replacement whose serialized target
    /// would corrupt the surrounding markup. This is a contract violation
    /// and aborts the whole pass; no partially rewritten text is returned.
    #[error("replacement for span {start}..{end} would corrupt the markup: {detail}")]
    InvalidReplacement {
        start: usize,
        end: usize,
        detail: String,
    },
}

/// Per-occurrence instruction from the decision function.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// Leave the link untouched.
    Skip,
    /// Drop the brackets and keep only the display text.
    Unlink,
    /// Replace the link with a new target.
    Retarget(Replacement),
}

/// How much of the new identity a retarget carries.
#[derive(Debug, Clone, PartialEq)]
pub enum Replacement {
    /// Adopt the new link's section and label. An explicit label forces the
    /// piped form unless it legally splits into title plus trail.
    Link(Link),
    /// Keep the original occurrence's section and display text; only the
    /// target title changes.
    Target(Link),
}

impl Verdict {
    /// Implicit retarget from a bare title string: the original section and
    /// label are preserved.
    pub fn retarget_title<S: SiteContext + ?Sized>(
        site: &S,
        title: &str,
    ) -> Result<Self, TitleError> {
        Ok(Self::Retarget(Replacement::Target(Link::parse(site, title)?)))
    }
}

/// Rewrite the wikilinks of `text` selectively.
///
/// Every usable occurrence is offered to `decide` as (identity, full text,
/// groups-and-span); the verdict is applied through the serialization rules
/// below. Same-page section links and occurrences whose target fails title
/// parsing are skipped without consulting `decide`; interwiki links never
/// leave the scanner.
///
/// The source buffer is never mutated: the result is assembled by copying
/// unchanged stretches and splicing replacements, so a replacement that
/// itself looks like a link is never rescanned.
pub fn rewrite_links<S, F>(text: &str, site: &S, mut decide: F) -> Result<String, RewriteError>
where
    S: SiteContext + ?Sized,
    F: FnMut(&Link, &str, &LinkOccurrence) -> Verdict,
{
    let scanner = LinkScanner::new(site)?;
    let trail = Regex::new(site.link_trail()).map_err(|source| ScanError::Trail {
        pattern: site.link_trail().to_string(),
        source,
    })?;

    let mut output = String::with_capacity(text.len());
    let mut copied = 0usize;
    let mut cursor = 0usize;

    while let Some(occurrence) = scanner.find_next_link(text, cursor) {
        cursor = occurrence.end;
        if occurrence.is_same_page_section() {
            continue;
        }
        let link = match Link::separated(
            site,
            &occurrence.title,
            occurrence.section.as_deref(),
            occurrence.label.as_deref(),
        ) {
            Ok(link) => link,
            // An unparseable target stays exactly as written.
            Err(_) => continue,
        };

        let replacement = match decide(&link, text, &occurrence) {
            Verdict::Skip => continue,
            Verdict::Unlink => synthesized_label(&occurrence),
            Verdict::Retarget(replacement) => {
                serialize_retarget(site, &occurrence, &replacement, &trail)?
            }
        };

        output.push_str(&text[copied..occurrence.start]);
        output.push_str(&replacement);
        copied = occurrence.end;
    }

    output.push_str(&text[copied..]);
    Ok(output)
}

/// Fixed old/new form: apply `verdict` to every occurrence equal to `old`
/// and skip the rest.
pub fn rewrite_pair<S: SiteContext + ?Sized>(
    text: &str,
    site: &S,
    old: &Link,
    verdict: &Verdict,
) -> Result<String, RewriteError> {
    rewrite_links(text, site, |link, _, _| {
        if link == old {
            verdict.clone()
        } else {
            Verdict::Skip
        }
    })
}

/// The text a link renders as: the explicit label when present, otherwise
/// the raw title plus section minus one leading colon. The captured trail
/// is appended in both cases.
fn synthesized_label(occurrence: &LinkOccurrence) -> String {
    let mut label = match occurrence.display_label() {
        Some(label) => label.to_string(),
        None => {
            let mut fallback = occurrence.title.clone();
            if let Some(section) = &occurrence.section {
                fallback.push('#');
                fallback.push_str(section);
            }
            match fallback.strip_prefix(':') {
                Some(stripped) => stripped.to_string(),
                None => fallback,
            }
        }
    };
    label.push_str(&occurrence.trail);
    label
}

fn serialize_retarget<S: SiteContext + ?Sized>(
    site: &S,
    occurrence: &LinkOccurrence,
    replacement: &Replacement,
    trail: &Regex,
) -> Result<String, RewriteError> {
    let (target, keeps_original) = match replacement {
        Replacement::Link(link) => (link, false),
        Replacement::Target(link) => (link, true),
    };
    ensure_serializable(target, occurrence)?;

    let mut new_title = target.canonical_title();
    if !target.is_local_to(site) {
        new_title = format!(":{}:{}", target.site(), new_title);
    }

    let (mut must_pipe, section, label) = if keeps_original {
        (true, occurrence.section.clone(), Some(synthesized_label(occurrence)))
    } else {
        (
            target.label().is_some(),
            target.section().map(str::to_string),
            target.label().map(str::to_string),
        )
    };

    if let Some(section) = &section
        && !section.is_empty()
    {
        new_title.push('#');
        new_title.push_str(section);
    }
    let label = label.unwrap_or_else(|| new_title.clone());

    // The pipe can be dropped when the label reads as the target itself
    // plus a trail run.
    if let Ok(parsed) = Link::parse(site, &label) {
        let parsed_title = parsed.title_with_section();
        // A target-only replacement carries no section of its own.
        let target_title = if keeps_original {
            target.title().to_string()
        } else {
            target.title_with_section()
        };
        let surplus = parsed_title.get(target_title.len()..).unwrap_or("");
        if trail.replace_all(surplus, "").is_empty() {
            must_pipe = !parsed_title.starts_with(&target_title)
                || parsed.namespace().id != target.namespace().id;
        }
    }

    if must_pipe {
        return Ok(format!("[[{new_title}|{label}]]"));
    }
    match label.get(..new_title.len()) {
        Some(head) => Ok(format!("[[{head}]]{}", &label[new_title.len()..])),
        // The label cannot be split at the title boundary; the piped form
        // is always lossless.
        None => Ok(format!("[[{new_title}|{label}]]")),
    }
}

fn ensure_serializable(target: &Link, occurrence: &LinkOccurrence) -> Result<(), RewriteError> {
    let title = target.canonical_title();
    if title.trim().is_empty() {
        return Err(RewriteError::InvalidReplacement {
            start: occurrence.start,
            end: occurrence.end,
            detail: "target title is empty".to_string(),
        });
    }
    let section = target.section().unwrap_or("");
    if contains_markup(&title) || contains_markup(section) {
        return Err(RewriteError::InvalidReplacement {
            start: occurrence.start,
            end: occurrence.end,
            detail: format!("target {:?} embeds link markup", target.title_with_section()),
        });
    }
    Ok(())
}

fn contains_markup(value: &str) -> bool {
    value.contains("[[") || value.contains("]]") || value.contains('|')
}
