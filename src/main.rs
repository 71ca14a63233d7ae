use std::process;

use clap::Parser;
use classpath_scan::discovery::{split_classpath_string, StaticClasspath};
use classpath_scan::scan::{run_scan, ScanSpec};

/// Scans a classpath and reports the ordered element list and, unless
/// `--ordering-only` is given, the linked type graph it contains.
#[derive(Parser, Debug)]
#[command(name = "classpath-scan", author, version, about)]
struct Cli {
    /// Classpath entries, separated the same way `java -cp` accepts them
    /// (`:` on Unix, `;` on Windows). Each entry follows the raw path
    /// grammar: `[scheme:]base(!inner)*`.
    #[arg(env = "CLASSPATH_SCAN_CLASSPATH")]
    classpath: String,

    /// Only match packages at or under this dotted prefix. May be given
    /// more than once; if empty, every package not excluded is scanned.
    #[arg(long = "include-package", env = "CLASSPATH_SCAN_INCLUDE_PACKAGE")]
    include_packages: Vec<String>,

    #[arg(long = "exclude-package", env = "CLASSPATH_SCAN_EXCLUDE_PACKAGE")]
    exclude_packages: Vec<String>,

    #[arg(long = "include-module", env = "CLASSPATH_SCAN_INCLUDE_MODULE")]
    include_modules: Vec<String>,

    #[arg(long = "exclude-module", env = "CLASSPATH_SCAN_EXCLUDE_MODULE")]
    exclude_modules: Vec<String>,

    /// Regex matched against a resource's logical path; only matching
    /// resources are scanned. May be given more than once.
    #[arg(long = "include-resource-path", env = "CLASSPATH_SCAN_INCLUDE_RESOURCE_PATH")]
    include_resource_path_patterns: Vec<String>,

    #[arg(long = "exclude-resource-path", env = "CLASSPATH_SCAN_EXCLUDE_RESOURCE_PATH")]
    exclude_resource_path_patterns: Vec<String>,

    /// Include JPMS modules reported by the host runtime's module finder
    /// as toplevel classpath elements.
    #[arg(long, env = "CLASSPATH_SCAN_SCAN_MODULES")]
    scan_modules: bool,

    #[arg(long, env = "CLASSPATH_SCAN_ENABLE_SYSTEM_JARS_AND_MODULES")]
    enable_system_jars_and_modules: bool,

    /// Follow superclass/interface/annotation references outside the
    /// include filter and schedule those types for scanning too.
    #[arg(long, env = "CLASSPATH_SCAN_EXTEND_SCANNING_UPWARDS")]
    extend_scanning_upwards_to_external_classes: bool,

    /// Resolve and order the classpath but skip the classfile-scan and
    /// linking phases.
    #[arg(long, env = "CLASSPATH_SCAN_ORDERING_ONLY")]
    ordering_only: bool,

    /// Keep temp files extracted from nested/remote archives around after
    /// the scan returns, for later resource re-reads.
    #[arg(long, env = "CLASSPATH_SCAN_KEEP_TEMP_FILES")]
    keep_temp_files: bool,

    /// Worker thread count for the work queue. 0 auto-selects
    /// `min(available_cpus, entries)`.
    #[arg(long, default_value_t = 0, env = "CLASSPATH_SCAN_PARALLELISM")]
    parallelism: usize,

    /// Increase log verbosity; repeatable (`-v`, `-vv`).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[arg(short, long)]
    quiet: bool,
}

fn main() {
    let cli = Cli::parse();
    init_logging(&cli);

    let spec = ScanSpec {
        include_packages: cli.include_packages,
        exclude_packages: cli.exclude_packages,
        include_modules: cli.include_modules,
        exclude_modules: cli.exclude_modules,
        include_resource_path_patterns: cli.include_resource_path_patterns,
        exclude_resource_path_patterns: cli.exclude_resource_path_patterns,
        scan_modules: cli.scan_modules,
        enable_system_jars_and_modules: cli.enable_system_jars_and_modules,
        enable_class_info: true,
        extend_scanning_upwards_to_external_classes: cli.extend_scanning_upwards_to_external_classes,
        perform_scan: !cli.ordering_only,
        remove_temporary_files_after_scan: !cli.keep_temp_files,
        parallelism: cli.parallelism,
        ..ScanSpec::default()
    };

    let discovery = StaticClasspath::new(split_classpath_string(&cli.classpath));
    let failure_hook = |err: &classpath_scan::errors::Error| -> classpath_scan::errors::Result<()> {
        log::error!("scan aborted: {err}");
        Ok(())
    };

    match run_scan(&discovery, spec, Some(&failure_hook)) {
        Ok(result) => report(&result),
        Err(err) => {
            eprintln!("classpath-scan: {err}");
            process::exit(1);
        }
    }
}

fn report(result: &classpath_scan::scan::ScanResult) {
    log::info!(
        "scanned {} classpath elements in {:?}",
        result.final_order.len(),
        result.elapsed
    );
    for element in &result.final_order {
        println!("{}", element.canonical_id);
    }

    let Some(graph) = &result.graph else {
        return;
    };
    println!(
        "{} classes, {} packages, {} modules",
        graph.classes().len(),
        graph.packages().len(),
        graph.modules().len()
    );
}

fn init_logging(cli: &Cli) {
    let level = if cli.quiet {
        log::LevelFilter::Warn
    } else {
        match cli.verbose {
            0 => log::LevelFilter::Info,
            1 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();
}
