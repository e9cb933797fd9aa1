use thiserror::Error;

use crate::site::{Namespace, SiteContext, capitalize_first, normalize_spaces};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TitleError {
    #[error("link title is empty")]
    Empty,
    #[error("link title {title:?} contains {character:?}")]
    IllegalCharacter { title: String, character: char },
}

const ILLEGAL_TITLE_CHARS: [char; 8] = ['<', '>', '[', ']', '{', '}', '|', '#'];

/// A normalized link target: the site it lives on, a namespace, the bare
/// title, and optionally a section anchor and an explicit display label.
///
/// Equality compares site, namespace and title only; section and label are
/// presentation details.
#[derive(Debug, Clone)]
pub struct Link {
    site: String,
    namespace: Namespace,
    title: String,
    section: Option<String>,
    label: Option<String>,
}

impl PartialEq for Link {
    fn eq(&self, other: &Self) -> bool {
        self.site == other.site
            && self.namespace.id == other.namespace.id
            && self.title == other.title
    }
}

impl Eq for Link {}

impl Link {
    /// Parse a full link target, `#section` included.
    pub fn parse<S: SiteContext + ?Sized>(site: &S, raw: &str) -> Result<Self, TitleError> {
        let (target, section) = match raw.split_once('#') {
            Some((target, section)) => (target, Some(section)),
            None => (raw, None),
        };
        Self::separated(site, target, section, None)
    }

    /// Build a link from already-separated capture groups. The section is
    /// kept as free-form anchor text; the label is kept verbatim (empty
    /// labels count as absent).
    pub fn separated<S: SiteContext + ?Sized>(
        site: &S,
        title: &str,
        section: Option<&str>,
        label: Option<&str>,
    ) -> Result<Self, TitleError> {
        let mut text = normalize_spaces(&title.replace('_', " "));

        // A single leading colon forces local interpretation.
        if let Some(stripped) = text.strip_prefix(':') {
            text = stripped.trim_start().to_string();
        }

        let mut site_code = site.code().to_string();
        while let Some((prefix, rest)) = text.split_once(':') {
            if !site.is_interwiki(prefix).unwrap_or(false) {
                break;
            }
            site_code = prefix.trim().to_lowercase();
            text = rest.trim_start().to_string();
        }

        let mut namespace = site.main_namespace().clone();
        if let Some((prefix, rest)) = text.split_once(':')
            && let Some(resolved) = site.resolve_namespace(prefix)
        {
            namespace = resolved.clone();
            text = rest.trim_start().to_string();
        }

        if text.is_empty() {
            return Err(TitleError::Empty);
        }
        for character in text.chars() {
            if ILLEGAL_TITLE_CHARS.contains(&character) || character.is_control() {
                return Err(TitleError::IllegalCharacter {
                    title: text,
                    character,
                });
            }
        }

        Ok(Self {
            site: site_code,
            namespace,
            title: capitalize_first(&text),
            section: section
                .map(|value| value.replace('_', " ").trim().to_string())
                .filter(|value| !value.is_empty()),
            label: label
                .map(str::to_string)
                .filter(|value| !value.is_empty()),
        })
    }

    pub fn site(&self) -> &str {
        &self.site
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn section(&self) -> Option<&str> {
        self.section.as_deref()
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        let label = label.into();
        self.label = if label.is_empty() { None } else { Some(label) };
        self
    }

    pub fn with_section(mut self, section: impl Into<String>) -> Self {
        let section = section.into();
        self.section = if section.is_empty() { None } else { Some(section) };
        self
    }

    /// Namespace-qualified title, without the section.
    pub fn canonical_title(&self) -> String {
        if self.namespace.is_main() {
            self.title.clone()
        } else {
            format!("{}:{}", self.namespace.name, self.title)
        }
    }

    /// Bare title plus `#section` when one is present.
    pub fn title_with_section(&self) -> String {
        match &self.section {
            Some(section) => format!("{}#{}", self.title, section),
            None => self.title.clone(),
        }
    }

    pub fn is_local_to<S: SiteContext + ?Sized>(&self, site: &S) -> bool {
        self.site == site.code()
    }
}

#[cfg(test)]
mod tests {
    use super::{Link, TitleError};
    use crate::site::ConfiguredSite;

    fn site() -> ConfiguredSite {
        ConfiguredSite::new("fi", "[a-zäö]*").with_interwiki(["en", "sv"])
    }

    #[test]
    fn parse_splits_section_and_capitalizes() {
        let link = Link::parse(&site(), "kahvihuone#Vanha keskustelu").expect("parse");
        assert_eq!(link.title(), "Kahvihuone");
        assert_eq!(link.section(), Some("Vanha keskustelu"));
        assert_eq!(link.canonical_title(), "Kahvihuone");
        assert_eq!(link.title_with_section(), "Kahvihuone#Vanha keskustelu");
    }

    #[test]
    fn parse_resolves_namespace_prefix() {
        let link = Link::parse(&site(), "category:Arkistot").expect("parse");
        assert_eq!(link.namespace().id, 14);
        assert_eq!(link.title(), "Arkistot");
        assert_eq!(link.canonical_title(), "Category:Arkistot");
    }

    #[test]
    fn parse_resolves_interwiki_prefix_to_foreign_site() {
        let link = Link::parse(&site(), "en:Village pump").expect("parse");
        assert_eq!(link.site(), "en");
        assert_eq!(link.title(), "Village pump");
        assert!(!link.is_local_to(&site()));
    }

    #[test]
    fn leading_colon_is_stripped_before_prefix_handling() {
        let link = Link::parse(&site(), ":en:Village pump").expect("parse");
        assert_eq!(link.site(), "en");

        let local = Link::parse(&site(), ":Category:Arkistot").expect("parse");
        assert_eq!(local.namespace().id, 14);
    }

    #[test]
    fn underscores_and_whitespace_are_normalized() {
        let link = Link::parse(&site(), " Kahvihuone_( sekalaista ) ").expect("parse");
        assert_eq!(link.title(), "Kahvihuone ( sekalaista )");
    }

    #[test]
    fn empty_and_illegal_titles_are_rejected() {
        assert_eq!(Link::parse(&site(), "   "), Err(TitleError::Empty));
        assert_eq!(Link::parse(&site(), ":"), Err(TitleError::Empty));
        assert!(matches!(
            Link::parse(&site(), "A|B"),
            Err(TitleError::IllegalCharacter { character: '|', .. })
        ));
        assert!(matches!(
            Link::parse(&site(), "A[B]"),
            Err(TitleError::IllegalCharacter { .. })
        ));
    }

    #[test]
    fn equality_ignores_section_and_label() {
        let base = Link::parse(&site(), "Kahvihuone#A").expect("parse");
        let other = Link::parse(&site(), "kahvihuone#B")
            .expect("parse")
            .with_label("jotain");
        assert_eq!(base, other);

        let foreign = Link::parse(&site(), "en:Kahvihuone").expect("parse");
        assert_ne!(base, foreign);
    }

    #[test]
    fn separated_keeps_label_and_drops_empty_ones() {
        let with_label =
            Link::separated(&site(), "Kahvihuone", None, Some("keskustelu")).expect("parse");
        assert_eq!(with_label.label(), Some("keskustelu"));

        let empty = Link::separated(&site(), "Kahvihuone", Some(""), Some("")).expect("parse");
        assert_eq!(empty.label(), None);
        assert_eq!(empty.section(), None);
    }
}
