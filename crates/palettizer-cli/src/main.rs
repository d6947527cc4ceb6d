use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Instant, UNIX_EPOCH};

use anyhow::Context;
use clap::{ArgAction, Parser, Subcommand};
use globset::{Glob, GlobSet, GlobSetBuilder};
use palettizer_core::prelude::*;
use palettizer_core::store;
use serde::Deserialize;
use tracing::{info, warn};
use walkdir::WalkDir;

#[derive(Parser, Debug)]
#[command(
    name = "palettize",
    about = "Pack the textures used by asset files into shared palette images",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Show progress bars (disable with --no-progress or --quiet)
    #[arg(long, default_value_t = true, action=ArgAction::Set, global=true, help_heading = "Logging/UX")]
    progress: bool,
    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action=ArgAction::Count, global=true, help_heading = "Logging/UX")]
    verbose: u8,
    /// Quiet mode (overrides verbose)
    #[arg(
        short,
        long,
        default_value_t = false,
        global = true,
        help_heading = "Logging/UX"
    )]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Scan asset manifests, update the palettes and write remaps
    Pack(PackArgs),
    /// Print statistics and the placement listing of a stored session
    Report(ReportArgs),
}

#[derive(Parser, Debug, Clone)]
struct PackArgs {
    // Input/Output
    /// Directory holding asset manifests (.yaml/.yml/.json)
    #[arg(help_heading = "Input/Output")]
    assets_dir: PathBuf,
    /// Output directory for palette images and remap files
    #[arg(short, long, default_value = "palettes", help_heading = "Input/Output")]
    out_dir: PathBuf,
    /// YAML directive file (groups, texture and asset overrides)
    #[arg(long, help_heading = "Input/Output")]
    config: Option<PathBuf>,
    /// Session store; defaults to <out_dir>/palettizer.json
    #[arg(long, help_heading = "Input/Output")]
    state: Option<PathBuf>,
    /// Include patterns (glob). If set, only manifests matching any pattern are considered
    #[arg(long, help_heading = "Input/Output")]
    include: Vec<String>,
    /// Exclude patterns (glob). Manifests matching any pattern will be ignored
    #[arg(long, help_heading = "Input/Output")]
    exclude: Vec<String>,

    // Layout
    /// Palette image size as WxH (overrides the directive file)
    #[arg(long, value_parser = parse_size, help_heading = "Layout")]
    palette_size: Option<(u32, u32)>,
    /// Margin around each texture (overrides the directive file)
    #[arg(long, help_heading = "Layout")]
    margin: Option<u32>,
    /// Discard all existing layouts and repack from scratch
    #[arg(long, default_value_t = false, help_heading = "Layout")]
    redo_all: bool,
    /// Keep palette images at full size instead of shrinking them
    #[arg(long, default_value_t = false, help_heading = "Layout")]
    no_resize: bool,

    // Export
    /// Compute the layout only: no images, remaps or store are written
    #[arg(long, default_value_t = false, help_heading = "Export")]
    dry_run: bool,
    /// Also write the layout as JSON to this path
    #[arg(long, help_heading = "Export")]
    export: Option<PathBuf>,
    /// Print the merged configuration (json|yaml) and exit
    #[arg(long, value_parser = ["json", "yaml"], help_heading = "Export")]
    print_config: Option<String>,
}

#[derive(Parser, Debug, Clone)]
struct ReportArgs {
    /// Session store to read
    #[arg(default_value = "palettes/palettizer.json")]
    state: PathBuf,
    /// YAML directive file the session was packed with
    #[arg(long)]
    config: Option<PathBuf>,
    /// Print statistics as JSON instead of text
    #[arg(long, default_value_t = false)]
    json: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing_with_level(cli.quiet, cli.verbose);
    match &cli.command {
        Commands::Pack(args) => run_pack(args, cli.progress && !cli.quiet),
        Commands::Report(args) => run_report(args),
    }
}

fn run_pack(cli: &PackArgs, show_progress: bool) -> anyhow::Result<()> {
    let mut cfg = load_config(cli.config.as_deref())?;
    if let Some((w, h)) = cli.palette_size {
        cfg.palette_width = w;
        cfg.palette_height = h;
    }
    if let Some(m) = cli.margin {
        cfg.margin = m;
    }
    if let Some(fmt) = &cli.print_config {
        match fmt.as_str() {
            "yaml" => println!("{}", serde_yaml::to_string(&cfg)?),
            _ => println!("{}", serde_json::to_string_pretty(&cfg)?),
        }
        return Ok(());
    }
    cfg.validate().context("invalid configuration")?;

    let state_path = cli
        .state
        .clone()
        .unwrap_or_else(|| cli.out_dir.join("palettizer.json"));
    let (mut session, outcome) = store::load_or_new(&state_path, cfg)
        .with_context(|| format!("load session {}", state_path.display()))?;
    match &outcome {
        LoadOutcome::Loaded => info!(path = %state_path.display(), "resuming session"),
        LoadOutcome::Fresh => info!("starting a new session"),
        LoadOutcome::Discarded(reason) => warn!(%reason, "stored session discarded"),
    }

    let t0 = Instant::now();
    let manifests = gather_manifests(&cli.assets_dir, &cli.include, &cli.exclude, &cli.out_dir)?;
    let mut scanner = ManifestScanner {
        root: cli.assets_dir.clone(),
    };
    let (scanned, mut failed) = sync_assets(&mut session, &mut scanner, &manifests);
    info!(
        manifests = manifests.len(),
        rescanned = scanned,
        failed = failed.len(),
        "asset manifests synced"
    );

    let opts = ProcessOptions {
        optimal_resize: !cli.no_resize,
        redo_all: cli.redo_all,
    };
    let mut raster = FsRaster;
    let bar = if show_progress && !cli.dry_run {
        let b = indicatif::ProgressBar::new(session.images().count() as u64);
        if let Ok(style) = indicatif::ProgressStyle::with_template(
            "{spinner:.green} writing {pos}/{len} [{elapsed_precise}] {wide_msg}",
        ) {
            b.set_style(style);
        }
        Some(b)
    } else {
        None
    };
    let out_dir = (!cli.dry_run).then_some(cli.out_dir.as_path());
    if let Some(dir) = out_dir {
        fs::create_dir_all(dir).with_context(|| format!("create out_dir {}", dir.display()))?;
    }
    let report = session.run(&mut scanner, &mut raster, out_dir, opts, |name| {
        if let Some(b) = &bar {
            b.set_length(b.length().unwrap_or(0).max(b.position() + 1));
            b.set_message(name.to_string());
            b.inc(1);
        }
    })?;
    if let Some(b) = &bar {
        b.finish_and_clear();
    }
    failed.extend(report.failed_assets.iter().cloned());
    for (asset, reason) in &failed {
        warn!(%asset, %reason, "asset dropped");
    }

    if let Some(path) = &cli.export {
        let layout = to_json_layout(&session);
        fs::write(path, serde_json::to_string_pretty(&layout)?)
            .with_context(|| format!("write {}", path.display()))?;
    }

    if !cli.dry_run {
        write_remaps(&session, &cli.out_dir)?;
        session.clear_stale();
        store::save(&session, &state_path)
            .with_context(|| format!("write {}", state_path.display()))?;
    }

    let stats = session.stats();
    if let Some(g) = &report.generated {
        info!(
            written = g.written,
            up_to_date = g.up_to_date,
            removed = g.removed,
            "palette images"
        );
    }
    println!("{}", stats.summary());
    println!(
        "Remapped assets: {}, Dropped assets: {}, Time: {}",
        report.stale_assets.len(),
        failed.len(),
        fmt_dur(t0.elapsed())
    );
    Ok(())
}

fn run_report(args: &ReportArgs) -> anyhow::Result<()> {
    let cfg = load_config(args.config.as_deref())?;
    let session = store::load(&args.state, cfg)
        .with_context(|| format!("load session {}", args.state.display()))?;
    let stats = session.stats();
    if args.json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        println!("{}", stats.summary());
        print!("{}", session.placement_listing());
    }
    Ok(())
}

fn load_config(path: Option<&Path>) -> anyhow::Result<PaletteConfig> {
    match path {
        Some(p) => {
            let file = fs::read_to_string(p).with_context(|| format!("read {}", p.display()))?;
            let cfg: PaletteConfig =
                serde_yaml::from_str(&file).with_context(|| format!("parse {}", p.display()))?;
            Ok(cfg)
        }
        None => Ok(PaletteConfig::default()),
    }
}

fn parse_size(s: &str) -> Result<(u32, u32), String> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WxH, got '{s}'"))?;
    let w = w.trim().parse::<u32>().map_err(|e| e.to_string())?;
    let h = h.trim().parse::<u32>().map_err(|e| e.to_string())?;
    Ok((w, h))
}

fn fmt_dur(d: std::time::Duration) -> String {
    let ms = d.as_millis();
    if ms < 1000 {
        format!("{ms} ms")
    } else {
        format!("{:.2} s", d.as_secs_f64())
    }
}

/// Adds new manifests, rescans changed ones and drops those that vanished
/// or no longer parse. Returns how many manifests were (re)scanned and the
/// ones that failed, with the reason.
fn sync_assets(
    session: &mut Session,
    scanner: &mut ManifestScanner,
    manifests: &[PathBuf],
) -> (usize, Vec<(String, String)>) {
    let mut seen = BTreeSet::new();
    let mut scanned = 0;
    let mut failed = Vec::new();
    for path in manifests {
        let name = scanner.asset_name(path);
        seen.insert(name.clone());
        let current = modified_ms(path);
        let unchanged = session
            .asset_by_name(&name)
            .and_then(|id| session.asset(id))
            .is_some_and(|a| a.modified.is_some() && a.modified == current);
        if unchanged {
            continue;
        }
        match session.rescan_asset(scanner, &name, path) {
            Ok(_) => scanned += 1,
            Err(e) => failed.push((name, scan_failure_reason(e))),
        }
    }
    let gone: Vec<AssetId> = session
        .assets()
        .filter(|(_, a)| !seen.contains(&a.name))
        .map(|(id, _)| id)
        .collect();
    for id in gone {
        session.remove_asset(id);
    }
    (scanned, failed)
}

fn write_remaps(session: &Session, out_dir: &Path) -> anyhow::Result<()> {
    for remap in session.asset_remaps(true) {
        let path = out_dir
            .join("remap")
            .join(format!("{}.remap.json", remap.asset));
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(&remap)?;
        fs::write(&path, json).with_context(|| format!("write {}", path.display()))?;
    }
    Ok(())
}

/// On-disk shape of an asset manifest.
#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(default)]
    references: Vec<ManifestReference>,
}

#[derive(Debug, Deserialize)]
struct ManifestReference {
    /// Texture name; defaults to the source file stem.
    #[serde(default)]
    texture: Option<String>,
    /// Source image, relative to the manifest.
    source: PathBuf,
    #[serde(default)]
    alpha: Option<PathBuf>,
    #[serde(default)]
    uv: Option<UvBounds>,
    #[serde(default)]
    wrap_u: WrapMode,
    #[serde(default)]
    wrap_v: WrapMode,
}

/// Reads YAML or JSON asset manifests below `root`.
struct ManifestScanner {
    root: PathBuf,
}

impl ManifestScanner {
    /// Manifest path relative to the root with `/` separators; asset
    /// directives match against it.
    fn asset_name(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/")
    }
}

impl AssetScanner for ManifestScanner {
    fn scan(&mut self, name: &str, path: &Path) -> palettizer_core::Result<ScannedAsset> {
        let fail = |reason: String| PalettizerError::AssetScan {
            name: name.to_string(),
            reason,
        };
        let text = fs::read_to_string(path).map_err(|e| fail(e.to_string()))?;
        let manifest: Manifest = if is_json(path) {
            serde_json::from_str(&text).map_err(|e| fail(e.to_string()))?
        } else {
            serde_yaml::from_str(&text).map_err(|e| fail(e.to_string()))?
        };
        let base = path.parent().unwrap_or(Path::new(""));
        let references = manifest
            .references
            .into_iter()
            .map(|r| ScannedReference {
                texture_name: r.texture.unwrap_or_else(|| {
                    r.source
                        .file_stem()
                        .map(|s| s.to_string_lossy().into_owned())
                        .unwrap_or_default()
                }),
                source: base.join(&r.source),
                alpha_source: r.alpha.map(|a| base.join(a)),
                uv: r.uv,
                wrap_u: r.wrap_u,
                wrap_v: r.wrap_v,
            })
            .collect();
        Ok(ScannedAsset {
            name: name.to_string(),
            path: path.to_path_buf(),
            modified: modified_ms(path),
            references,
        })
    }
}

fn modified_ms(path: &Path) -> Option<u64> {
    let time = fs::metadata(path).ok()?.modified().ok()?;
    Some(time.duration_since(UNIX_EPOCH).ok()?.as_millis() as u64)
}

fn is_json(p: &Path) -> bool {
    p.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"))
}

/// Manifests under `path`, skipping anything inside `out_dir` (remap files
/// and the session store are JSON too).
fn gather_manifests(
    path: &Path,
    include: &[String],
    exclude: &[String],
    out_dir: &Path,
) -> anyhow::Result<Vec<PathBuf>> {
    let inc_set = build_globset(include)?;
    let exc_set = build_globset(exclude)?;
    let root = fs::canonicalize(path).ok();
    let out_dir = fs::canonicalize(out_dir).ok().filter(|out| Some(out) != root.as_ref());
    let mut list: Vec<PathBuf> = Vec::new();
    if path.is_file() {
        if !should_skip(path, inc_set.as_ref(), exc_set.as_ref()) && is_manifest(path) {
            list.push(path.to_path_buf());
        }
    } else {
        for entry in WalkDir::new(path)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| {
                out_dir.as_ref().is_none_or(|out| {
                    fs::canonicalize(e.path()).map_or(true, |p| !p.starts_with(out))
                })
            })
            .filter_map(|e| e.ok())
        {
            let p = entry.path();
            if p.is_file() && !should_skip(p, inc_set.as_ref(), exc_set.as_ref()) && is_manifest(p) {
                list.push(p.to_path_buf());
            }
        }
    }
    Ok(list)
}

fn build_globset(patterns: &[String]) -> anyhow::Result<Option<GlobSet>> {
    if patterns.is_empty() {
        return Ok(None);
    }
    let mut b = GlobSetBuilder::new();
    for pat in patterns {
        b.add(Glob::new(pat).with_context(|| format!("bad glob '{pat}'"))?);
    }
    Ok(Some(b.build()?))
}

fn should_skip(p: &Path, include: Option<&GlobSet>, exclude: Option<&GlobSet>) -> bool {
    let s = p.to_string_lossy().replace('\\', "/");
    if let Some(ex) = exclude {
        if ex.is_match(&s) {
            return true;
        }
    }
    if let Some(inc) = include {
        if !inc.is_match(&s) {
            return true;
        }
    }
    false
}

fn is_manifest(p: &Path) -> bool {
    matches!(
        p.extension()
            .and_then(|e| e.to_str())
            .map(|s| s.to_ascii_lowercase()),
        Some(ext) if matches!(ext.as_str(), "yaml" | "yml" | "json")
    )
}

fn init_tracing_with_level(quiet: bool, verbose: u8) {
    let level = if quiet {
        "error".to_string()
    } else {
        match verbose {
            0 => "info".into(),
            1 => "debug".into(),
            _ => "trace".into(),
        }
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(level)
        .with_target(false)
        .try_init();
}
