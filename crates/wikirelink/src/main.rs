use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use similar::TextDiff;
use walkdir::WalkDir;
use wikirelink_core::archive::{ArchiveFixer, SectionIndex};
use wikirelink_core::config::{RelinkConfig, load_config};
use wikirelink_core::directory::{harvest_anchor_targets, merge_into_index};
use wikirelink_core::remote::{HttpWikiApi, WikiApi, WikiClientConfig, latest_stable_timestamp};
use wikirelink_core::rewrite::rewrite_links;
use wikirelink_core::scan::LinkScanner;
use wikirelink_core::site::ConfiguredSite;

#[derive(Debug, Parser)]
#[command(
    name = "wikirelink",
    version,
    about = "Rewrite stale anchored wikilinks against an archive section index"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH", default_value = "relink.toml")]
    config: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "List the wikilink occurrences of a page file")]
    Scan(ScanArgs),
    #[command(about = "Rewrite archived discussion links in page files")]
    Rewrite(RewriteArgs),
    #[command(about = "Section index maintenance")]
    Index(IndexArgs),
}

#[derive(Debug, Args)]
struct ScanArgs {
    path: PathBuf,
}

#[derive(Debug, Args)]
struct RewriteArgs {
    path: PathBuf,
    #[arg(long, value_name = "PATH", default_value = "section_index.json")]
    index: PathBuf,
    #[arg(
        long,
        value_name = "UNIX",
        help = "Reference time for picking the closest archive entry; defaults to each page's last substantive edit when an API is configured"
    )]
    timestamp: Option<i64>,
    #[arg(long, help = "Apply changes in place instead of printing a diff")]
    write: bool,
    #[arg(
        long,
        value_name = "EXT",
        default_value = "wiki",
        help = "File extension used when walking a directory"
    )]
    extension: String,
}

#[derive(Debug, Args)]
struct IndexArgs {
    #[command(subcommand)]
    command: IndexSubcommand,
}

#[derive(Debug, Subcommand)]
enum IndexSubcommand {
    #[command(about = "Harvest archive directory pages into a section index")]
    Build(IndexBuildArgs),
    #[command(about = "Print section index counts")]
    Stats(IndexStatsArgs),
}

#[derive(Debug, Args)]
struct IndexBuildArgs {
    #[arg(long = "page", value_name = "TITLE", required = true)]
    pages: Vec<String>,
    #[arg(
        long = "suffix",
        value_name = "SUBPAGE",
        required = true,
        help = "Directory subpage suffix appended to each page"
    )]
    suffixes: Vec<String>,
    #[arg(long, value_name = "PATH", default_value = "section_index.json")]
    out: PathBuf,
}

#[derive(Debug, Args)]
struct IndexStatsArgs {
    #[arg(long, value_name = "PATH", default_value = "section_index.json")]
    index: PathBuf,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Scan(args) => run_scan(&config, &args),
        Commands::Rewrite(args) => run_rewrite(&config, &args),
        Commands::Index(IndexArgs { command }) => match command {
            IndexSubcommand::Build(args) => run_index_build(&config, &args),
            IndexSubcommand::Stats(args) => run_index_stats(&args),
        },
    }
}

fn run_scan(config: &RelinkConfig, args: &ScanArgs) -> Result<()> {
    let site = ConfiguredSite::from_config(config);
    let scanner = LinkScanner::new(&site)?;
    let text = fs::read_to_string(&args.path)
        .with_context(|| format!("failed to read {}", args.path.display()))?;

    let mut count = 0usize;
    for occurrence in scanner.occurrences(&text) {
        count += 1;
        println!(
            "{}..{} title={:?} section={:?} label={:?} trail={:?}",
            occurrence.start,
            occurrence.end,
            occurrence.title,
            occurrence.section,
            occurrence.label,
            occurrence.trail,
        );
    }
    println!("links: {count}");
    Ok(())
}

fn run_rewrite(config: &RelinkConfig, args: &RewriteArgs) -> Result<()> {
    let site = ConfiguredSite::from_config(config);
    let index = SectionIndex::load(&args.index)?;
    let targets = collect_targets(&args.path, &args.extension)?;
    if targets.is_empty() {
        bail!(
            "no .{} files under {}",
            args.extension,
            args.path.display()
        );
    }

    let mut api = match (args.timestamp, config.api_url()) {
        (None, Some(_)) => Some(HttpWikiApi::new(WikiClientConfig::from_config(config))?),
        _ => None,
    };

    let mut pages_changed = 0usize;
    let mut links_rewritten = 0usize;
    let mut missing = Vec::new();

    for target in &targets {
        let text = fs::read_to_string(target)
            .with_context(|| format!("failed to read {}", target.display()))?;
        let reference = reference_timestamp(args, api.as_mut(), target)?;

        let mut fixer = ArchiveFixer::new(&index, reference);
        let rewritten = rewrite_links(&text, &site, |link, _, occurrence| {
            fixer.decide(&site, link, occurrence)
        })?;

        links_rewritten += fixer.rewritten();
        missing.extend(fixer.missing().iter().cloned());

        if rewritten == text {
            continue;
        }
        pages_changed += 1;

        if args.write {
            fs::write(target, &rewritten)
                .with_context(|| format!("failed to write {}", target.display()))?;
            println!("updated {} ({} links)", target.display(), fixer.rewritten());
        } else {
            let name = target.display().to_string();
            let diff = TextDiff::from_lines(text.as_str(), rewritten.as_str());
            print!("{}", diff.unified_diff().context_radius(2).header(&name, &name));
        }
    }

    println!("files: {}", targets.len());
    println!("pages_changed: {pages_changed}");
    println!("links_rewritten: {links_rewritten}");
    if !missing.is_empty() {
        missing.sort();
        missing.dedup();
        println!("sections_not_found: {}", missing.join(", "));
    }
    Ok(())
}

fn run_index_build(config: &RelinkConfig, args: &IndexBuildArgs) -> Result<()> {
    let mut api = HttpWikiApi::new(WikiClientConfig::from_config(config))?;
    let mut index = SectionIndex::default();

    for page in &args.pages {
        for suffix in &args.suffixes {
            let directory_title = format!("{page}{suffix}");
            let html = match api.rendered_html(&directory_title)? {
                Some(html) => html,
                None => {
                    println!("missing directory page: {directory_title}");
                    continue;
                }
            };
            let anchors = harvest_anchor_targets(&html);
            let merged = merge_into_index(&mut index, page, &anchors, |title| {
                api.revision_history(title, 50)
                    .ok()
                    .and_then(|revisions| latest_stable_timestamp(&revisions))
            });
            println!("harvested {merged} anchors from {directory_title}");
        }
    }

    index.save(&args.out)?;
    println!("index: {}", args.out.display());
    println!("pages: {}", index.page_count());
    println!("sections: {}", index.section_count());
    println!("entries: {}", index.entry_count());
    println!("requests: {}", api.request_count());
    Ok(())
}

fn run_index_stats(args: &IndexStatsArgs) -> Result<()> {
    let index = SectionIndex::load(&args.index)?;
    println!("pages: {}", index.page_count());
    println!("sections: {}", index.section_count());
    println!("entries: {}", index.entry_count());
    Ok(())
}

/// The timestamp archive entries are matched against for one page file:
/// the explicit flag when given, the page's last substantive edit when an
/// API is available, the current time otherwise.
fn reference_timestamp(
    args: &RewriteArgs,
    api: Option<&mut HttpWikiApi>,
    target: &Path,
) -> Result<i64> {
    if let Some(timestamp) = args.timestamp {
        return Ok(timestamp);
    }
    if let Some(api) = api
        && let Some(title) = page_title_for(target)
    {
        let revisions = api.revision_history(&title, 50)?;
        if let Some(timestamp) = latest_stable_timestamp(&revisions) {
            return Ok(timestamp);
        }
    }
    Ok(chrono::Utc::now().timestamp())
}

fn page_title_for(path: &Path) -> Option<String> {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .map(|stem| stem.replace('_', " "))
}

fn collect_targets(path: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    if !path.is_dir() {
        bail!("{} does not exist", path.display());
    }

    let mut out = Vec::new();
    for entry in WalkDir::new(path) {
        let entry = entry.with_context(|| format!("failed to walk {}", path.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let matches = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case(extension));
        if matches {
            out.push(entry.path().to_path_buf());
        }
    }
    out.sort();
    Ok(out)
}
