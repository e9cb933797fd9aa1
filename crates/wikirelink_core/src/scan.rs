use std::ops::Range;

use regex::Regex;
use thiserror::Error;

use crate::site::SiteContext;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("invalid link-trail pattern {pattern:?}: {source}")]
    Trail {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// A located wikilink: the half-open byte span it occupies in the scanned
/// text and the raw capture groups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkOccurrence {
    pub start: usize,
    pub end: usize,
    /// Raw target text between `[[` and the first `#` or `|`.
    pub title: String,
    /// Anchor text after `#`, when present.
    pub section: Option<String>,
    /// Display text after the first `|`, when present. May contain a nested
    /// link when the match was extended.
    pub label: Option<String>,
    /// Characters following `]]` that the site's trail grammar attaches to
    /// the link.
    pub trail: String,
}

impl LinkOccurrence {
    pub fn span(&self) -> Range<usize> {
        self.start..self.end
    }

    pub fn trimmed_title(&self) -> &str {
        self.title.trim()
    }

    /// A title that trims to nothing points at a section of the page being
    /// scanned; such occurrences are reported but must be left alone.
    pub fn is_same_page_section(&self) -> bool {
        self.trimmed_title().is_empty()
    }

    /// The label, when present and non-empty.
    pub fn display_label(&self) -> Option<&str> {
        self.label.as_deref().filter(|label| !label.is_empty())
    }
}

/// Finds wikilink occurrences using a site's link-trail grammar.
///
/// Interwiki-prefixed titles without a forcing leading colon are discarded
/// during scanning, as are matches whose nested label never closes; the
/// cursor moves past both so scanning always makes progress.
#[derive(Debug)]
pub struct LinkScanner<'s, S: SiteContext + ?Sized> {
    site: &'s S,
    pattern: Regex,
    extension: Regex,
}

impl<'s, S: SiteContext + ?Sized> LinkScanner<'s, S> {
    pub fn new(site: &'s S) -> Result<Self, ScanError> {
        let trail = site.link_trail();
        let pattern = compile(
            &format!(
                r"\[\[(?P<title>.*?)(?:#(?P<section>.*?))?(?:\|(?P<label>.*?))?\]\](?P<trail>{trail})"
            ),
            trail,
        )?;
        let extension = compile(&format!(r"(?P<body>.*?\]\])(?P<trail>{trail})"), trail)?;
        Ok(Self {
            site,
            pattern,
            extension,
        })
    }

    /// The next usable occurrence at or after byte offset `from`, or None
    /// when the rest of the text holds no link.
    pub fn find_next_link(&self, text: &str, from: usize) -> Option<LinkOccurrence> {
        let mut pos = from;
        while pos <= text.len() {
            let captures = self.pattern.captures_at(text, pos)?;
            let whole = captures.get(0)?;
            let title = captures.name("title").map_or("", |m| m.as_str());
            let trimmed = title.trim();

            // Interwiki links belong to another wiki; a leading colon keeps
            // the title local. A failed lookup reads as "not interwiki is
            // unknowable", so the occurrence is skipped either way.
            if !trimmed.is_empty() && !trimmed.starts_with(':') {
                match self.site.is_interwiki(trimmed) {
                    Ok(false) => {}
                    Ok(true) | Err(_) => {
                        pos = whole.end();
                        continue;
                    }
                }
            }

            let section = captures.name("section").map(|m| m.as_str().to_string());
            let mut label = captures.name("label").map(|m| m.as_str().to_string());
            let mut trail = captures.name("trail").map_or(String::new(), |m| m.as_str().to_string());
            let mut end = whole.end();

            if let Some(label_match) = captures.name("label")
                && label_match.as_str().contains("[[")
            {
                // The first ]] closed the nested link, not this one: extend
                // to the next closing pair followed by a trail run.
                match self.extension.captures_at(text, end) {
                    Some(extended) => {
                        let body = extended.name("body")?;
                        let extended_trail = extended.name("trail")?;
                        label = Some(text[label_match.start()..body.end() - 2].to_string());
                        trail = extended_trail.as_str().to_string();
                        end = extended_trail.end();
                    }
                    None => {
                        // Unclosed nested label; nothing usable here.
                        pos = whole.end();
                        continue;
                    }
                }
            }

            return Some(LinkOccurrence {
                start: whole.start(),
                end,
                title: title.to_string(),
                section,
                label,
                trail,
            });
        }
        None
    }

    /// Lazy iteration over all usable occurrences from the start of `text`.
    pub fn occurrences<'t>(&self, text: &'t str) -> Occurrences<'_, 's, 't, S> {
        Occurrences {
            scanner: self,
            text,
            cursor: 0,
        }
    }
}

fn compile(pattern: &str, trail: &str) -> Result<Regex, ScanError> {
    Regex::new(pattern).map_err(|source| ScanError::Trail {
        pattern: trail.to_string(),
        source,
    })
}

pub struct Occurrences<'a, 's, 't, S: SiteContext + ?Sized> {
    scanner: &'a LinkScanner<'s, S>,
    text: &'t str,
    cursor: usize,
}

impl<'a, 's, 't, S: SiteContext + ?Sized> Iterator for Occurrences<'a, 's, 't, S> {
    type Item = LinkOccurrence;

    fn next(&mut self) -> Option<LinkOccurrence> {
        let occurrence = self.scanner.find_next_link(self.text, self.cursor)?;
        self.cursor = occurrence.end;
        Some(occurrence)
    }
}

#[cfg(test)]
mod tests {
    use super::{LinkScanner, ScanError};
    use crate::site::{ConfiguredSite, SiteContext, SiteError};

    fn site() -> ConfiguredSite {
        ConfiguredSite::new("fi", "[a-z]*").with_interwiki(["en"])
    }

    #[test]
    fn finds_plain_links_with_groups_and_span() {
        let site = site();
        let scanner = LinkScanner::new(&site).expect("scanner");
        let text = "Katso [[Kahvihuone#Vanha|keskustelu]]sta myös.";

        let occurrence = scanner.find_next_link(text, 0).expect("occurrence");
        assert_eq!(occurrence.title, "Kahvihuone");
        assert_eq!(occurrence.section.as_deref(), Some("Vanha"));
        assert_eq!(occurrence.label.as_deref(), Some("keskustelu"));
        assert_eq!(occurrence.trail, "sta");
        assert_eq!(&text[occurrence.span()], "[[Kahvihuone#Vanha|keskustelu]]sta");
    }

    #[test]
    fn trail_stops_at_characters_outside_the_grammar() {
        let site = site();
        let scanner = LinkScanner::new(&site).expect("scanner");
        let occurrence = scanner.find_next_link("[[Foo]]bar Baz", 0).expect("occurrence");
        assert_eq!(occurrence.trail, "bar");
        assert_eq!(occurrence.end, "[[Foo]]bar".len());
    }

    #[test]
    fn same_page_section_links_are_reported() {
        let site = site();
        let scanner = LinkScanner::new(&site).expect("scanner");
        let occurrence = scanner.find_next_link("[[#Otsikko]]", 0).expect("occurrence");
        assert!(occurrence.is_same_page_section());
        assert_eq!(occurrence.section.as_deref(), Some("Otsikko"));
    }

    #[test]
    fn interwiki_links_are_discarded_unless_colon_forced() {
        let site = site();
        let scanner = LinkScanner::new(&site).expect("scanner");
        let text = "[[en:Village pump]] ja [[Kahvihuone]]";

        let occurrence = scanner.find_next_link(text, 0).expect("occurrence");
        assert_eq!(occurrence.title, "Kahvihuone");

        let forced = scanner.find_next_link("[[:en:Village pump]]", 0).expect("occurrence");
        assert_eq!(forced.title, ":en:Village pump");
    }

    #[test]
    fn interwiki_lookup_failure_skips_the_occurrence() {
        struct FailingSite(ConfiguredSite);

        impl SiteContext for FailingSite {
            fn code(&self) -> &str {
                self.0.code()
            }
            fn link_trail(&self) -> &str {
                self.0.link_trail()
            }
            fn is_interwiki(&self, title: &str) -> Result<bool, SiteError> {
                Err(SiteError::InterwikiLookup {
                    prefix: title.to_string(),
                    reason: "offline".to_string(),
                })
            }
            fn resolve_namespace(&self, prefix: &str) -> Option<&crate::site::Namespace> {
                self.0.resolve_namespace(prefix)
            }
            fn main_namespace(&self) -> &crate::site::Namespace {
                self.0.main_namespace()
            }
        }

        let failing = FailingSite(site());
        let scanner = LinkScanner::new(&failing).expect("scanner");
        assert!(scanner.find_next_link("[[Foo]] [[Bar]]", 0).is_none());
    }

    #[test]
    fn nested_label_extends_to_the_closing_pair() {
        let site = site();
        let scanner = LinkScanner::new(&site).expect("scanner");
        let text = "[[A|see [[B]] also]] rest";

        let occurrence = scanner.find_next_link(text, 0).expect("occurrence");
        assert_eq!(occurrence.title, "A");
        assert_eq!(occurrence.label.as_deref(), Some("see [[B]] also"));
        assert_eq!(&text[occurrence.span()], "[[A|see [[B]] also]]");
    }

    #[test]
    fn nested_label_folds_the_intervening_trail() {
        let site = site();
        let scanner = LinkScanner::new(&site).expect("scanner");
        let text = "[[A|x [[B]]tail y]]z";

        let occurrence = scanner.find_next_link(text, 0).expect("occurrence");
        assert_eq!(occurrence.label.as_deref(), Some("x [[B]]tail y"));
        assert_eq!(occurrence.trail, "z");
        assert_eq!(occurrence.end, text.len());
    }

    #[test]
    fn unclosed_nested_label_is_discarded() {
        let site = site();
        let scanner = LinkScanner::new(&site).expect("scanner");
        // No closing pair follows the nested label, so nothing usable is
        // left in the text.
        let text = "[[A|broken [[B]] loppu";
        assert!(scanner.find_next_link(text, 0).is_none());
    }

    #[test]
    fn later_closing_pair_extends_instead_of_discarding() {
        let site = site();
        let scanner = LinkScanner::new(&site).expect("scanner");
        let text = "[[A|x [[B]] ja [[C]] y]] loppu";

        let occurrence = scanner.find_next_link(text, 0).expect("occurrence");
        assert_eq!(occurrence.title, "A");
        assert_eq!(occurrence.label.as_deref(), Some("x [[B]] ja [[C"));
    }

    #[test]
    fn occurrences_iterates_lazily_and_in_order() {
        let site = site();
        let scanner = LinkScanner::new(&site).expect("scanner");
        let text = "[[A]] ja [[B|b]] ja [[C]]x";

        let titles: Vec<String> = scanner
            .occurrences(text)
            .map(|occurrence| occurrence.title)
            .collect();
        assert_eq!(titles, vec!["A", "B", "C"]);
    }

    #[test]
    fn no_links_means_none() {
        let site = site();
        let scanner = LinkScanner::new(&site).expect("scanner");
        assert!(scanner.find_next_link("plain text [not a link]", 0).is_none());
        assert!(scanner.find_next_link("", 0).is_none());
    }

    #[test]
    fn invalid_trail_pattern_is_a_configuration_error() {
        let site = ConfiguredSite::new("fi", "[a-z");
        let error = LinkScanner::new(&site).expect_err("must fail");
        assert!(matches!(error, ScanError::Trail { .. }));
    }
}
