use binsniffer::{
    default_store_path, AnalysisOptions, AnalysisResult, Engine, SignatureStore,
};
use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "binsniffer")]
#[command(about = "Detect open-source components embedded in binaries, archives and mobile packages")]
#[command(version)]
struct Cli {
    /// Signature store path (defaults to the user data directory)
    #[arg(long, value_name = "FILE", global = true)]
    db: Option<PathBuf>,

    /// Suppress console output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Analyze a file or directory
    Analyze {
        /// File or directory to analyze
        path: PathBuf,

        /// Recurse into subdirectories
        #[arg(short, long)]
        recursive: bool,

        /// Minimum confidence for reported matches
        #[arg(short, long, default_value = "0.5")]
        threshold: f64,

        /// Disable the fuzzy (LSH) matching layer
        #[arg(long)]
        no_fuzzy: bool,

        /// LSH distance cutoff
        #[arg(long, default_value = "70")]
        fuzzy_threshold: u32,

        /// Minimum distinct pattern hits per component
        #[arg(long, default_value = "1")]
        min_matches: u32,

        /// Keep only the top N matches per file
        #[arg(long, value_name = "N")]
        top: Option<usize>,

        /// Attach MD5/SHA-1/SHA-256 (and LSH) hashes of each input
        #[arg(long)]
        hashes: bool,

        /// Skip files larger than this many bytes
        #[arg(long, value_name = "BYTES")]
        size_limit: Option<u64>,

        /// Per-file timeout in seconds
        #[arg(long, default_value = "60")]
        timeout: u64,

        /// Worker threads for directory analysis
        #[arg(short, long)]
        workers: Option<usize>,

        /// Only report components matching these globs
        #[arg(long = "component", value_name = "GLOB")]
        components: Vec<String>,

        /// Disable the native-vs-mobile context filter
        #[arg(long)]
        no_context_filter: bool,

        /// Emit JSON instead of the summary table
        #[arg(long)]
        json: bool,
    },
    /// Signature store administration
    Store {
        #[command(subcommand)]
        action: StoreAction,
    },
}

#[derive(Subcommand)]
enum StoreAction {
    /// Create an empty signature store
    Init,
    /// Import signature files
    Import {
        /// Signature JSON files
        files: Vec<PathBuf>,
    },
    /// Rebuild the n-gram pattern index
    Reindex,
    /// Print component/pattern counts and the last import time
    Status,
}

fn print_result(result: &AnalysisResult, quiet: bool) {
    if quiet {
        return;
    }
    println!("\n{}", "=".repeat(60));
    println!("{}  [{}]", result.path, result.file_type);
    println!("{}", "=".repeat(60));
    if let Some(error) = &result.error {
        println!("  ERROR {}: {}", error.kind, error.message);
        return;
    }
    println!(
        "  {} features extracted in {} ms{}",
        result.features_extracted,
        result.wall_time_ms,
        if result.truncated { " (truncated)" } else { "" }
    );
    if let Some(hashes) = &result.hashes {
        println!("  sha256 {}", hashes.sha256);
        if let Some(fuzzy) = &hashes.fuzzy {
            println!("  lsh    {}", fuzzy);
        }
    }
    if result.matches.is_empty() {
        println!("  No components detected.");
        return;
    }
    println!("\n  {:<34} {:>6}  {:<13} {:<10} LICENSE", "COMPONENT", "CONF", "METHOD", "ECOSYSTEM");
    println!("  {}", "-".repeat(78));
    for m in &result.matches {
        let method = match m.match_method {
            binsniffer::MatchMethod::Direct => "direct",
            binsniffer::MatchMethod::Fuzzy => "fuzzy",
            binsniffer::MatchMethod::DirectFuzzy => "direct+fuzzy",
        };
        println!(
            "  {:<34} {:>5.1}%  {:<13} {:<10} {}",
            m.display_name,
            m.confidence * 100.0,
            method,
            m.ecosystem,
            m.license.as_deref().unwrap_or("-"),
        );
        if !m.evidence.source_files.is_empty() {
            println!("      in: {}", m.evidence.source_files.join(", "));
        }
    }
}

fn run_analyze(engine: &Engine, path: &PathBuf, opts: &AnalysisOptions, json: bool, quiet: bool) -> i32 {
    if path.is_dir() {
        let results = engine.analyze_directory(path, opts);
        if json {
            let by_path: BTreeMap<String, &AnalysisResult> = results
                .iter()
                .map(|(p, r)| (p.display().to_string(), r))
                .collect();
            println!("{}", serde_json::to_string_pretty(&by_path).unwrap_or_default());
        } else {
            for result in results.values() {
                print_result(result, quiet);
            }
            if !quiet {
                let detected: usize = results.values().map(|r| r.matches.len()).sum();
                let failed = results.values().filter(|r| r.error.is_some()).count();
                println!(
                    "\n{} files analyzed, {} matches, {} errors",
                    results.len(),
                    detected,
                    failed
                );
            }
        }
        0
    } else {
        let result = engine.analyze(path, opts);
        if json {
            println!("{}", serde_json::to_string_pretty(&result).unwrap_or_default());
        } else {
            print_result(&result, quiet);
        }
        i32::from(result.error.is_some())
    }
}

fn main() {
    let cli = Cli::parse();
    let store_path = cli.db.clone().unwrap_or_else(default_store_path);

    let code = match cli.command {
        Command::Analyze {
            path,
            recursive,
            threshold,
            no_fuzzy,
            fuzzy_threshold,
            min_matches,
            top,
            hashes,
            size_limit,
            timeout,
            workers,
            components,
            no_context_filter,
            json,
        } => {
            let engine = match Engine::open(&store_path) {
                Ok(e) => e,
                Err(e) => {
                    eprintln!("Error: {}", e);
                    eprintln!("Run 'binsniffer store init' and import signatures first.");
                    std::process::exit(2);
                }
            };
            let opts = AnalysisOptions {
                threshold,
                fuzzy: !no_fuzzy,
                fuzzy_threshold,
                min_matches,
                size_ceiling: size_limit,
                timeout: Duration::from_secs(timeout),
                workers,
                top,
                include_hashes: hashes,
                include_fuzzy_hashes: hashes,
                component_globs: components,
                context_filter: !no_context_filter,
                recursive,
                ..Default::default()
            };
            run_analyze(&engine, &path, &opts, json, cli.quiet)
        }
        Command::Store { action } => match action {
            StoreAction::Init => match SignatureStore::create(&store_path) {
                Ok(store) => {
                    if !cli.quiet {
                        println!("Created signature store at {}", store.path().display());
                    }
                    0
                }
                Err(e) => {
                    eprintln!("Error: {}", e);
                    2
                }
            },
            StoreAction::Import { files } => {
                if files.is_empty() {
                    eprintln!("Error: no signature files given");
                    std::process::exit(2);
                }
                match SignatureStore::create(&store_path) {
                    Ok(mut store) => match store.import_files(&files) {
                        Ok(report) => {
                            if !cli.quiet {
                                for warning in &report.warnings {
                                    eprintln!("Warning: {}", warning);
                                }
                                println!(
                                    "Imported {} files ({} components, {} patterns), {} rejected",
                                    report.files_imported,
                                    report.components,
                                    report.patterns,
                                    report.files_rejected
                                );
                            }
                            i32::from(report.files_imported == 0)
                        }
                        Err(e) => {
                            eprintln!("Error: {}", e);
                            2
                        }
                    },
                    Err(e) => {
                        eprintln!("Error: {}", e);
                        2
                    }
                }
            }
            StoreAction::Reindex => match SignatureStore::open(&store_path) {
                Ok(mut store) => match store.rebuild_index() {
                    Ok(()) => {
                        if !cli.quiet {
                            println!("Rebuilt pattern index");
                        }
                        0
                    }
                    Err(e) => {
                        eprintln!("Error: {}", e);
                        2
                    }
                },
                Err(e) => {
                    eprintln!("Error: {}", e);
                    2
                }
            },
            StoreAction::Status => match SignatureStore::open(&store_path) {
                Ok(store) => match store.status() {
                    Ok(status) => {
                        println!("Signature store: {}", store.path().display());
                        println!("  Components: {}", status.components);
                        println!("  Patterns:   {}", status.patterns);
                        println!("  Digests:    {}", status.digests);
                        println!(
                            "  Last import: {}",
                            status.last_import.as_deref().unwrap_or("never")
                        );
                        0
                    }
                    Err(e) => {
                        eprintln!("Error: {}", e);
                        2
                    }
                },
                Err(e) => {
                    eprintln!("Error: {}", e);
                    2
                }
            },
        },
    };
    std::process::exit(code);
}
