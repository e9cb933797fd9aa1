use std::collections::BTreeSet;

use thiserror::Error;

use crate::config::RelinkConfig;

/// Trail fragment used when a site does not configure one: plain lowercase
/// ASCII, the MediaWiki default.
pub const DEFAULT_LINK_TRAIL: &str = "[a-z]*";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SiteError {
    #[error("interwiki lookup failed for {prefix:?}: {reason}")]
    InterwikiLookup { prefix: String, reason: String },
}

/// A namespace known to a site. Prefix matching is case-insensitive with
/// underscores folded to spaces; equality between namespaces is by id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    pub id: i32,
    pub name: String,
    pub aliases: Vec<String>,
}

impl Namespace {
    pub fn new(id: i32, name: &str, aliases: &[&str]) -> Self {
        Self {
            id,
            name: name.to_string(),
            aliases: aliases.iter().map(|alias| (*alias).to_string()).collect(),
        }
    }

    pub fn is_main(&self) -> bool {
        self.id == 0
    }

    fn matches(&self, prefix: &str) -> bool {
        let folded = fold(prefix);
        fold(&self.name) == folded || self.aliases.iter().any(|alias| fold(alias) == folded)
    }
}

/// The capabilities the scanner and rewriter need from a wiki site: the
/// link-trail grammar, the interwiki prefix test, and namespace resolution.
///
/// `is_interwiki` is fallible so that implementations backed by a live
/// lookup can surface failures; callers treat an error as "unknowable" and
/// leave the occurrence alone.
pub trait SiteContext {
    /// Site code, e.g. `"fi"`.
    fn code(&self) -> &str;

    /// Regex fragment matching characters that render as part of a
    /// preceding link without being inside the brackets.
    fn link_trail(&self) -> &str;

    /// Whether `title` begins with a known interwiki prefix. Accepts a full
    /// title (`"en:Foo"`) or a bare prefix (`"en"`); a leading colon is
    /// ignored here, the caller decides what it forces.
    fn is_interwiki(&self, title: &str) -> Result<bool, SiteError>;

    /// Resolve a namespace prefix, if this site knows it.
    fn resolve_namespace(&self, prefix: &str) -> Option<&Namespace>;

    /// The article namespace.
    fn main_namespace(&self) -> &Namespace;
}

/// An offline site built from configuration. This is the implementation the
/// CLI injects; tests build one directly.
#[derive(Debug, Clone)]
pub struct ConfiguredSite {
    code: String,
    link_trail: String,
    interwiki: BTreeSet<String>,
    namespaces: Vec<Namespace>,
}

impl ConfiguredSite {
    pub fn new(code: &str, link_trail: &str) -> Self {
        Self {
            code: code.to_string(),
            link_trail: link_trail.to_string(),
            interwiki: BTreeSet::new(),
            namespaces: default_namespaces(),
        }
    }

    pub fn from_config(config: &RelinkConfig) -> Self {
        let mut site = Self::new(&config.site_code(), &config.link_trail());
        site = site.with_interwiki(config.site.interwiki.iter().map(String::as_str));
        for custom in &config.site.custom_namespaces {
            site.push_namespace(Namespace {
                id: custom.id,
                name: custom.name.clone(),
                aliases: custom.aliases.clone(),
            });
        }
        site
    }

    pub fn with_interwiki<'a>(mut self, prefixes: impl IntoIterator<Item = &'a str>) -> Self {
        for prefix in prefixes {
            self.interwiki.insert(fold(prefix));
        }
        self
    }

    /// Add a namespace, replacing any existing namespace with the same id.
    pub fn push_namespace(&mut self, namespace: Namespace) {
        match self.namespaces.iter_mut().find(|ns| ns.id == namespace.id) {
            Some(existing) => *existing = namespace,
            None => self.namespaces.push(namespace),
        }
    }
}

impl SiteContext for ConfiguredSite {
    fn code(&self) -> &str {
        &self.code
    }

    fn link_trail(&self) -> &str {
        &self.link_trail
    }

    fn is_interwiki(&self, title: &str) -> Result<bool, SiteError> {
        let trimmed = title.trim().trim_start_matches(':');
        let prefix = match trimmed.split_once(':') {
            Some((prefix, _)) => prefix,
            None => trimmed,
        };
        Ok(self.interwiki.contains(&fold(prefix)))
    }

    fn resolve_namespace(&self, prefix: &str) -> Option<&Namespace> {
        self.namespaces.iter().find(|ns| !ns.is_main() && ns.matches(prefix))
    }

    fn main_namespace(&self) -> &Namespace {
        self.namespaces
            .iter()
            .find(|ns| ns.is_main())
            .unwrap_or(&self.namespaces[0])
    }
}

fn default_namespaces() -> Vec<Namespace> {
    vec![
        Namespace::new(0, "", &[]),
        Namespace::new(1, "Talk", &[]),
        Namespace::new(2, "User", &[]),
        Namespace::new(3, "User talk", &[]),
        Namespace::new(4, "Project", &["Wikipedia"]),
        Namespace::new(5, "Project talk", &["Wikipedia talk"]),
        Namespace::new(6, "File", &["Image"]),
        Namespace::new(7, "File talk", &["Image talk"]),
        Namespace::new(8, "MediaWiki", &[]),
        Namespace::new(9, "MediaWiki talk", &[]),
        Namespace::new(10, "Template", &[]),
        Namespace::new(11, "Template talk", &[]),
        Namespace::new(12, "Help", &[]),
        Namespace::new(13, "Help talk", &[]),
        Namespace::new(14, "Category", &[]),
        Namespace::new(15, "Category talk", &[]),
    ]
}

fn fold(value: &str) -> String {
    value.trim().replace('_', " ").to_lowercase()
}

/// Collapse whitespace runs to single spaces and trim the ends.
pub(crate) fn normalize_spaces(value: &str) -> String {
    let mut output = String::with_capacity(value.len());
    let mut previous_was_space = false;

    for ch in value.chars() {
        if ch.is_whitespace() {
            if !previous_was_space {
                output.push(' ');
                previous_was_space = true;
            }
        } else {
            output.push(ch);
            previous_was_space = false;
        }
    }

    output.trim().to_string()
}

/// Uppercase the first character, the way MediaWiki canonicalizes titles.
pub(crate) fn capitalize_first(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}
