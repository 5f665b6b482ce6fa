use fuzzherd_core::config::CampaignConfig;
use fuzzherd_core::corpus::{CorpusManager, MinimizationStrategy};
use fuzzherd_core::discovery::TargetDiscoverer;
use fuzzherd_core::engine::{FuzzEngine, RunResult, truncate};
use fuzzherd_core::harness::{GoTestHarness, Harness};
use fuzzherd_core::report::CampaignReport;
use fuzzherd_core::target::Target;

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Error text shown per failed target in the run summary.
const SUMMARY_ERROR_LEN: usize = 100;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Runs time-budgeted fuzzing campaigns across discovered fuzz targets", long_about = None)]
struct Cli {
    /// Campaign configuration file. Defaults to ./fuzzherd.toml when present.
    #[clap(long, global = true, value_parser)]
    config: Option<PathBuf>,
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List all fuzz targets in the selected packages
    List {
        /// Package patterns (default: from config, "./...")
        packages: Vec<String>,
        #[clap(short, long)]
        root_dir: Option<PathBuf>,
    },
    /// Run fuzz targets in the selected packages
    Run(RunArgs),
    /// Manage corpus files
    #[clap(subcommand)]
    Corpus(CorpusCommand),
}

#[derive(Args, Debug, Default)]
struct RunArgs {
    /// Package patterns (default: from config, "./...")
    packages: Vec<String>,
    #[clap(short, long)]
    root_dir: Option<PathBuf>,
    /// Global fuzzing time budget, e.g. 300, 45s, 5m, 1h30m
    #[clap(short, long, value_parser = parse_duration)]
    time: Option<Duration>,
    #[clap(short, long)]
    corpus: Option<PathBuf>,
    /// Worker count passed to the harness
    #[clap(short, long)]
    parallel: Option<usize>,
    /// Only fuzz targets whose declaring file changed since --git-ref
    #[clap(short = 'd', long)]
    changed_only: bool,
    #[clap(long)]
    git_ref: Option<String>,
    /// Corpus minimization after import: none or coverage
    #[clap(long)]
    minimization: Option<MinimizationStrategy>,
    /// Where crash inputs are preserved
    #[clap(long)]
    crash_dir: Option<PathBuf>,
    /// Write a JSON report into this directory
    #[clap(long)]
    report_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum CorpusCommand {
    /// List corpus statistics per target
    List {
        #[clap(short, long)]
        corpus: Option<PathBuf>,
    },
    /// Minimize corpus for targets, selected by package or package.Name
    Minimize {
        targets: Vec<String>,
        #[clap(short, long)]
        corpus: Option<PathBuf>,
    },
}

/// Parses `300`, `45s`, `5m`, `2h` and combinations like `1h30m` into whole seconds.
fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration".to_string());
    }
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    let mut total = 0u64;
    let mut digits = String::new();
    for c in s.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let unit = match c {
            'h' => 3600,
            'm' => 60,
            's' => 1,
            other => return Err(format!("unknown unit '{other}' in duration '{s}'")),
        };
        let value: u64 = digits
            .parse()
            .map_err(|_| format!("missing number before '{c}' in duration '{s}'"))?;
        total = total
            .checked_add(value.saturating_mul(unit))
            .ok_or_else(|| format!("duration '{s}' is too large"))?;
        digits.clear();
    }
    if !digits.is_empty() {
        return Err(format!("missing unit after '{digits}' in duration '{s}'"));
    }
    Ok(Duration::from_secs(total))
}

fn load_config(path: Option<&PathBuf>) -> Result<CampaignConfig, anyhow::Error> {
    match path {
        Some(config_path) => {
            info!("Loading configuration from {config_path:?}");
            CampaignConfig::load_from_file(config_path)
        }
        None => {
            let default_config_path = PathBuf::from("fuzzherd.toml");
            if default_config_path.exists() {
                info!("Loading default configuration {default_config_path:?}");
                CampaignConfig::load_from_file(&default_config_path)
            } else {
                Ok(CampaignConfig::default())
            }
        }
    }
}

impl RunArgs {
    fn apply(self, config: &mut CampaignConfig) {
        if !self.packages.is_empty() {
            config.packages = self.packages;
        }
        if let Some(root_dir) = self.root_dir {
            config.root_dir = root_dir;
        }
        if let Some(time) = self.time {
            config.fuzz_time_secs = time.as_secs();
        }
        if let Some(corpus) = self.corpus {
            config.corpus_dir = corpus;
        }
        if let Some(parallel) = self.parallel {
            config.parallelism = parallel;
        }
        if self.changed_only {
            config.changed_only = true;
        }
        if let Some(git_ref) = self.git_ref {
            config.git_ref = git_ref;
        }
        if let Some(minimization) = self.minimization {
            config.minimization = minimization;
        }
        if let Some(crash_dir) = self.crash_dir {
            config.crash_dir = crash_dir;
        }
        if let Some(report_dir) = self.report_dir {
            config.report_dir = Some(report_dir);
        }
    }
}

fn discover(config: &CampaignConfig) -> Result<Vec<Target>, anyhow::Error> {
    TargetDiscoverer::go(&config.harness.program)
        .discover(&config.discovery_options())
        .map_err(|e| anyhow::anyhow!("failed to discover targets: {e}"))
}

fn harness(config: &CampaignConfig) -> Rc<dyn Harness> {
    Rc::new(GoTestHarness::new(&config.harness.program))
}

fn status_string(success: bool) -> &'static str {
    if success { "PASS" } else { "FAIL" }
}

fn print_results(results: &[RunResult]) {
    println!("\nFuzzing Results:");
    println!("================");
    for result in results {
        println!(
            "{}: {} in {:.2?}",
            result.target,
            status_string(result.success),
            result.duration
        );
        if !result.success {
            println!(
                "  Error: {}",
                truncate(&result.error_message, SUMMARY_ERROR_LEN)
            );
            println!("  Crash inputs: {}", result.crash_inputs.len());
            for crash in &result.crash_inputs {
                println!("    {}", crash.display());
            }
        }
        println!("  New corpus items: {}", result.new_corpus_items);
        println!();
    }
    let failed = results.iter().filter(|r| !r.success).count();
    println!("{} targets run, {} failed", results.len(), failed);
}

fn cmd_list(mut config: CampaignConfig, packages: Vec<String>, root_dir: Option<PathBuf>) -> Result<(), anyhow::Error> {
    if !packages.is_empty() {
        config.packages = packages;
    }
    if let Some(root_dir) = root_dir {
        config.root_dir = root_dir;
    }
    config.changed_only = false;
    let targets = discover(&config)?;

    println!("{:<40}  {:<30}  FILE", "PACKAGE", "NAME");
    for t in &targets {
        println!("{:<40}  {:<30}  {}", t.package, t.name, t.file_path.display());
        if let Some(description) = &t.description {
            if let Some(first_line) = description.lines().next() {
                println!("{:<40}  {:<30}  # {}", "", "", first_line);
            }
        }
    }
    Ok(())
}

fn cmd_run(mut config: CampaignConfig, args: RunArgs) -> Result<(), anyhow::Error> {
    args.apply(&mut config);
    config.validate()?;

    let targets = discover(&config)?;
    println!("Discovered {} fuzz targets", targets.len());

    let report_dir = config.report_dir.clone();
    let harness = harness(&config);
    let mut engine = FuzzEngine::new(config, targets, harness)
        .map_err(|e| anyhow::anyhow!("failed to create fuzz engine: {e}"))?;

    let outcome = engine.run_all();
    print_results(engine.results());
    if let Some(dir) = report_dir {
        let path = CampaignReport::from_results(engine.results()).write_to_dir(&dir)?;
        println!("Report written to {}", path.display());
    }
    // A failing fuzz test is reported above but does not fail the command.
    outcome.map_err(|e| anyhow::anyhow!("fuzzing failed: {e}"))
}

fn corpus_manager(
    config: &CampaignConfig,
    corpus: Option<PathBuf>,
    strategy: MinimizationStrategy,
) -> Result<CorpusManager, anyhow::Error> {
    let dir = corpus.unwrap_or_else(|| config.corpus_dir.clone());
    CorpusManager::new(dir, strategy, harness(config))
        .map_err(|e| anyhow::anyhow!("failed to create corpus manager: {e}"))
}

fn cmd_corpus_list(mut config: CampaignConfig, corpus: Option<PathBuf>) -> Result<(), anyhow::Error> {
    let mut cm = corpus_manager(&config, corpus, MinimizationStrategy::None)?;
    config.changed_only = false;
    let targets = discover(&config)?;

    println!("{:<60}  {:>12}  DIRECTORY", "TARGET", "CORPUS ITEMS");
    for t in &targets {
        let dir = cm.resolve_directory(t)?;
        let count = cm.entry_count(t)?;
        println!("{:<60}  {:>12}  {}", t.to_string(), count, dir.display());
    }
    Ok(())
}

fn cmd_corpus_minimize(
    mut config: CampaignConfig,
    selectors: Vec<String>,
    corpus: Option<PathBuf>,
) -> Result<(), anyhow::Error> {
    let mut cm = corpus_manager(&config, corpus, MinimizationStrategy::Coverage)?;
    config.changed_only = false;
    let mut targets = discover(&config)?;
    if !selectors.is_empty() {
        targets.retain(|t| selectors.iter().any(|s| t.matches_selector(s)));
    }

    for t in &targets {
        let before = cm.entry_count(t)?;
        match cm.minimize(t) {
            Ok(()) => {
                let after = cm.entry_count(t)?;
                println!("Minimizing corpus for {t}... DONE ({before} -> {after} items)");
            }
            Err(e) => {
                println!("Minimizing corpus for {t}... FAILED");
                println!("  Error: {e}");
            }
        }
    }
    Ok(())
}

fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Command::List { packages, root_dir } => cmd_list(config, packages, root_dir),
        Command::Run(args) => cmd_run(config, args),
        Command::Corpus(CorpusCommand::List { corpus }) => cmd_corpus_list(config, corpus),
        Command::Corpus(CorpusCommand::Minimize { targets, corpus }) => {
            cmd_corpus_minimize(config, targets, corpus)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations() {
        assert_eq!(parse_duration("300").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("45s").unwrap(), Duration::from_secs(45));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
        assert!(parse_duration("").is_err());
        assert!(parse_duration("5x").is_err());
        assert!(parse_duration("1h30").is_err());
        assert!(parse_duration("m").is_err());
    }

    #[test]
    fn flags_override_config() {
        let mut config = CampaignConfig::default();
        let args = RunArgs {
            packages: vec!["./lnwire/...".into()],
            time: Some(Duration::from_secs(60)),
            parallel: Some(2),
            changed_only: true,
            minimization: Some(MinimizationStrategy::Coverage),
            ..Default::default()
        };
        args.apply(&mut config);
        assert_eq!(config.packages, vec!["./lnwire/..."]);
        assert_eq!(config.fuzz_time_secs, 60);
        assert_eq!(config.parallelism, 2);
        assert!(config.changed_only);
        assert_eq!(config.minimization, MinimizationStrategy::Coverage);
        assert_eq!(config.git_ref, "HEAD~1");
    }

    #[test]
    fn cli_parses_subcommands() {
        let cli = Cli::try_parse_from([
            "fuzzherd", "run", "./pkg/...", "-t", "5m", "--minimization", "coverage",
        ])
        .unwrap();
        match cli.command {
            Command::Run(args) => {
                assert_eq!(args.packages, vec!["./pkg/..."]);
                assert_eq!(args.time, Some(Duration::from_secs(300)));
                assert_eq!(args.minimization, Some(MinimizationStrategy::Coverage));
            }
            other => panic!("unexpected command {other:?}"),
        }
        let cli = Cli::try_parse_from(["fuzzherd", "corpus", "minimize", "pkg/codec"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Corpus(CorpusCommand::Minimize { ref targets, .. }) if targets.as_slice() == ["pkg/codec"]
        ));
    }
}
