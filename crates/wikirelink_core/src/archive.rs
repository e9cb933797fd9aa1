use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};

use crate::link::Link;
use crate::rewrite::{Replacement, Verdict};
use crate::scan::LinkOccurrence;
use crate::site::SiteContext;

/// Fold a title or anchor the way index keys are folded: underscores for
/// spaces, lowercased.
pub fn neutralize(value: &str) -> String {
    value.replace(' ', "_").to_lowercase()
}

/// One archived location of a discussion section, with the timestamp of the
/// last substantive edit of the page holding it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub target: String,
    pub date: i64,
}

/// Where each discussion section of each watched page has been archived:
/// neutralized page key, then neutralized section key, then the dated
/// archive locations carrying that section title.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SectionIndex {
    #[serde(flatten)]
    pages: BTreeMap<String, BTreeMap<String, Vec<ArchiveEntry>>>,
}

impl SectionIndex {
    pub fn insert(&mut self, page_key: &str, section_key: &str, entry: ArchiveEntry) {
        self.pages
            .entry(page_key.to_string())
            .or_default()
            .entry(section_key.to_string())
            .or_default()
            .push(entry);
    }

    pub fn sections(&self, page_key: &str) -> Option<&BTreeMap<String, Vec<ArchiveEntry>>> {
        self.pages.get(page_key)
    }

    pub fn lookup(&self, page_key: &str, section_key: &str) -> Option<&[ArchiveEntry]> {
        self.pages
            .get(page_key)?
            .get(section_key)
            .map(Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn section_count(&self) -> usize {
        self.pages.values().map(BTreeMap::len).sum()
    }

    pub fn entry_count(&self) -> usize {
        self.pages
            .values()
            .flat_map(BTreeMap::values)
            .map(Vec::len)
            .sum()
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read section index {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("failed to parse section index {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let rendered =
            serde_json::to_string_pretty(self).context("failed to serialize section index")?;
        fs::write(path, rendered)
            .with_context(|| format!("failed to write section index {}", path.display()))
    }
}

/// The entry whose date lies closest to `reference`. Ties go to the first
/// entry in insertion order.
pub fn closest_target(entries: &[ArchiveEntry], reference: i64) -> Option<&str> {
    entries
        .iter()
        .min_by_key(|entry| (entry.date - reference).abs())
        .map(|entry| entry.target.as_str())
}

/// Decision function that retargets anchored links to their archive
/// location. Links without a section are left alone; so are links into
/// pages the index does not watch. A known page whose section is missing
/// from the index is recorded for reporting.
#[derive(Debug)]
pub struct ArchiveFixer<'a> {
    index: &'a SectionIndex,
    reference: i64,
    rewritten: usize,
    missing: Vec<String>,
}

impl<'a> ArchiveFixer<'a> {
    /// `reference` is the timestamp the closest archive entry is picked
    /// against, normally the treated page's last substantive edit.
    pub fn new(index: &'a SectionIndex, reference: i64) -> Self {
        Self {
            index,
            reference,
            rewritten: 0,
            missing: Vec::new(),
        }
    }

    pub fn rewritten(&self) -> usize {
        self.rewritten
    }

    pub fn missing(&self) -> &[String] {
        &self.missing
    }

    pub fn decide<S: SiteContext + ?Sized>(
        &mut self,
        site: &S,
        _link: &Link,
        occurrence: &LinkOccurrence,
    ) -> Verdict {
        // Only links into a specific discussion section can have moved.
        let Some(section) = occurrence.section.as_deref() else {
            return Verdict::Skip;
        };

        let page_key = neutralize(occurrence.trimmed_title());
        let section_key = neutralize(&percent_decode(section));
        let Some(sections) = self.index.sections(&page_key) else {
            return Verdict::Skip;
        };
        let Some(entries) = sections.get(&section_key) else {
            self.missing.push(format!("{page_key}#{section_key}"));
            return Verdict::Skip;
        };
        let Some(target) = closest_target(entries, self.reference) else {
            return Verdict::Skip;
        };
        let Ok(resolved) = Link::parse(site, target) else {
            return Verdict::Skip;
        };

        let label = match occurrence.display_label() {
            Some(label) => label.to_string(),
            None => format!("{}#{}", occurrence.title, section),
        };
        self.rewritten += 1;
        Verdict::Retarget(Replacement::Link(resolved.with_label(label)))
    }
}

pub(crate) fn percent_decode(value: &str) -> String {
    percent_decode_str(value).decode_utf8_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::{ArchiveEntry, ArchiveFixer, SectionIndex, closest_target, neutralize};
    use crate::rewrite::rewrite_links;
    use crate::site::{ConfiguredSite, Namespace};

    fn site() -> ConfiguredSite {
        let mut site = ConfiguredSite::new("fi", "[a-zäö]*");
        site.push_namespace(Namespace::new(4, "Wikipedia", &["Project", "WP"]));
        site
    }

    fn entry(target: &str, date: i64) -> ArchiveEntry {
        ArchiveEntry {
            target: target.to_string(),
            date,
        }
    }

    fn index() -> SectionIndex {
        let mut index = SectionIndex::default();
        index.insert(
            "wikipedia:kahvihuone",
            "vanha_otsikko",
            entry("Wikipedia:Kahvihuone/Arkisto 1#Vanha otsikko", 1_100),
        );
        index.insert(
            "wikipedia:kahvihuone",
            "vanha_otsikko",
            entry("Wikipedia:Kahvihuone/Arkisto 2#Vanha otsikko", 2_900),
        );
        index
    }

    #[test]
    fn neutralize_folds_spaces_and_case() {
        assert_eq!(neutralize("Vanha Otsikko"), "vanha_otsikko");
        assert_eq!(neutralize("jo_valmis"), "jo_valmis");
    }

    #[test]
    fn closest_target_prefers_smallest_distance_and_first_on_ties() {
        let entries = vec![entry("a", 100), entry("b", 300), entry("c", 500)];
        assert_eq!(closest_target(&entries, 290), Some("b"));
        assert_eq!(closest_target(&entries, 200), Some("a"));
        assert_eq!(closest_target(&[], 200), None);
    }

    #[test]
    fn index_round_trips_through_json() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("state").join("section_index.json");
        let index = index();

        index.save(&path).expect("save");
        let loaded = SectionIndex::load(&path).expect("load");
        assert_eq!(loaded, index);
        assert_eq!(loaded.page_count(), 1);
        assert_eq!(loaded.section_count(), 1);
        assert_eq!(loaded.entry_count(), 2);
    }

    #[test]
    fn load_fails_with_context_for_missing_file() {
        let temp = tempdir().expect("tempdir");
        let error = SectionIndex::load(&temp.path().join("none.json")).expect_err("must fail");
        assert!(error.to_string().contains("failed to read section index"));
    }

    #[test]
    fn fixer_retargets_to_the_closest_archive() {
        let site = site();
        let index = index();
        let mut fixer = ArchiveFixer::new(&index, 2_800);

        let text = "Katso [[Wikipedia:Kahvihuone#Vanha otsikko]] ja [[Muu sivu#Jotain]].";
        let result = rewrite_links(text, &site, |link, _, occurrence| {
            fixer.decide(&site, link, occurrence)
        })
        .expect("rewrite");

        assert_eq!(
            result,
            "Katso [[Wikipedia:Kahvihuone/Arkisto 2#Vanha otsikko|Wikipedia:Kahvihuone#Vanha otsikko]] ja [[Muu sivu#Jotain]]."
        );
        assert_eq!(fixer.rewritten(), 1);
        assert!(fixer.missing().is_empty());
    }

    #[test]
    fn fixer_keeps_an_explicit_label() {
        let site = site();
        let index = index();
        let mut fixer = ArchiveFixer::new(&index, 1_000);

        let text = "[[Wikipedia:Kahvihuone#Vanha otsikko|vanha keskustelu]]";
        let result = rewrite_links(text, &site, |link, _, occurrence| {
            fixer.decide(&site, link, occurrence)
        })
        .expect("rewrite");

        assert_eq!(
            result,
            "[[Wikipedia:Kahvihuone/Arkisto 1#Vanha otsikko|vanha keskustelu]]"
        );
    }

    #[test]
    fn fixer_skips_links_without_a_section() {
        let site = site();
        let index = index();
        let mut fixer = ArchiveFixer::new(&index, 1_000);

        let text = "[[Wikipedia:Kahvihuone]] pysyy.";
        let result = rewrite_links(text, &site, |link, _, occurrence| {
            fixer.decide(&site, link, occurrence)
        })
        .expect("rewrite");

        assert_eq!(result, text);
        assert_eq!(fixer.rewritten(), 0);
    }

    #[test]
    fn fixer_records_sections_missing_from_a_known_page() {
        let site = site();
        let index = index();
        let mut fixer = ArchiveFixer::new(&index, 1_000);

        let text = "[[Wikipedia:Kahvihuone#Kadonnut otsikko]]";
        let result = rewrite_links(text, &site, |link, _, occurrence| {
            fixer.decide(&site, link, occurrence)
        })
        .expect("rewrite");

        assert_eq!(result, text);
        assert_eq!(
            fixer.missing(),
            ["wikipedia:kahvihuone#kadonnut_otsikko".to_string()]
        );
    }

    #[test]
    fn fixer_decodes_percent_encoded_sections() {
        let site = site();
        let mut index = SectionIndex::default();
        index.insert(
            "wikipedia:kahvihuone",
            "otsikko_ä",
            entry("Wikipedia:Kahvihuone/Arkisto 1#Otsikko ä", 100),
        );
        let mut fixer = ArchiveFixer::new(&index, 100);

        let text = "[[Wikipedia:Kahvihuone#Otsikko_%C3%A4]]";
        let result = rewrite_links(text, &site, |link, _, occurrence| {
            fixer.decide(&site, link, occurrence)
        })
        .expect("rewrite");

        assert_eq!(fixer.rewritten(), 1);
        assert!(result.contains("Arkisto 1"));
    }
}
