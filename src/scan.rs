//! The scan specification (input) and scan result (output), plus the
//! top-level `run_scan` that wires every subsystem into the pipeline
//! described in §2: opener → ordering → nested-root detection → path scan
//! → masking → classfile scan → upward closure → linking.
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Instant, SystemTime};

use once_cell::sync::OnceCell;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::cancel::InterruptionMonitor;
use crate::classfile::{self, UnlinkedRecord};
use crate::discovery::{ClasspathDiscovery, DiscoveredClasspath};
use crate::element::{ClasspathElement, ElementArena, OpenContext, OpenerUnit};
use crate::errors::{ErrorKind, Result, ResultExt};
use crate::linker::{self, LinkedGraph};
use crate::mask::mask_classfiles;
use crate::nested_archive::NestedArchiveHandler;
use crate::nested_root::detect_nested_roots;
use crate::order::build_final_order;
use crate::path_resolver::RawPath;
use crate::upward_closure::UpwardClosureScheduler;
use crate::work_queue::run_work_queue;

/// Feature toggles and include/exclude filters, named after §6's input
/// contract. Cheap to clone (compiled patterns are cached behind
/// `OnceCell` and shared).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanSpec {
    pub include_packages: Vec<String>,
    pub exclude_packages: Vec<String>,
    pub include_modules: Vec<String>,
    pub exclude_modules: Vec<String>,
    pub include_resource_path_patterns: Vec<String>,
    pub exclude_resource_path_patterns: Vec<String>,

    pub scan_modules: bool,
    pub enable_system_jars_and_modules: bool,
    pub enable_class_info: bool,
    pub extend_scanning_upwards_to_external_classes: bool,
    pub perform_scan: bool,
    pub remove_temporary_files_after_scan: bool,

    /// 0 means "choose `min(available_cpus, entries)` automatically".
    pub parallelism: usize,

    #[serde(skip)]
    compiled_include_paths: OnceCell<Vec<Regex>>,
    #[serde(skip)]
    compiled_exclude_paths: OnceCell<Vec<Regex>>,
    /// `Add-Exports`/`Add-Opens` manifest tokens accumulated during the
    /// opener phase (§4.3 step 5), each already carrying the
    /// `=ALL-UNNAMED` sentinel.
    #[serde(skip)]
    module_path_directives: Arc<Mutex<Vec<String>>>,
}

impl Default for ScanSpec {
    fn default() -> Self {
        ScanSpec {
            include_packages: Vec::new(),
            exclude_packages: Vec::new(),
            include_modules: Vec::new(),
            exclude_modules: Vec::new(),
            include_resource_path_patterns: Vec::new(),
            exclude_resource_path_patterns: Vec::new(),
            scan_modules: false,
            enable_system_jars_and_modules: false,
            enable_class_info: true,
            extend_scanning_upwards_to_external_classes: false,
            perform_scan: true,
            remove_temporary_files_after_scan: true,
            parallelism: 0,
            compiled_include_paths: OnceCell::new(),
            compiled_exclude_paths: OnceCell::new(),
            module_path_directives: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

fn compile_patterns(patterns: &[String]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|pattern| match Regex::new(pattern) {
            Ok(re) => Some(re),
            Err(err) => {
                log::warn!("ignoring invalid resource path pattern '{pattern}': {err}");
                None
            }
        })
        .collect()
}

impl ScanSpec {
    pub fn resolved_parallelism(&self, entries: usize) -> usize {
        if self.parallelism > 0 {
            self.parallelism
        } else {
            num_cpus::get().min(entries.max(1))
        }
    }

    /// A dotted package matches if it is equal to, or a sub-package of, an
    /// entry in `include_packages` (when non-empty), and is not similarly
    /// covered by `exclude_packages`.
    pub fn package_is_scanned(&self, package: &str) -> bool {
        let included = self.include_packages.is_empty()
            || self
                .include_packages
                .iter()
                .any(|prefix| package_matches_prefix(package, prefix));
        let excluded = self
            .exclude_packages
            .iter()
            .any(|prefix| package_matches_prefix(package, prefix));
        included && !excluded
    }

    pub fn resource_path_is_scanned(&self, logical_path: &str) -> bool {
        let include = self
            .compiled_include_paths
            .get_or_init(|| compile_patterns(&self.include_resource_path_patterns));
        let exclude = self
            .compiled_exclude_paths
            .get_or_init(|| compile_patterns(&self.exclude_resource_path_patterns));

        let included = include.is_empty() || include.iter().any(|re| re.is_match(logical_path));
        let excluded = exclude.iter().any(|re| re.is_match(logical_path));
        included && !excluded
    }

    /// §4.4: system modules scan iff (enabled ∧ include list empty) ∨
    /// (specifically included ∧ not excluded); non-system modules scan iff
    /// (included ∧ not excluded).
    pub fn module_is_scanned(&self, name: &str, is_system: bool) -> bool {
        let excluded = self.exclude_modules.iter().any(|m| m == name);
        if excluded {
            return false;
        }
        let specifically_included = self.include_modules.iter().any(|m| m == name);
        if is_system {
            (self.enable_system_jars_and_modules && self.include_modules.is_empty())
                || specifically_included
        } else {
            specifically_included
        }
    }

    pub fn record_module_directive(&self, token: String) {
        self.module_path_directives
            .lock()
            .expect("module path directives mutex poisoned")
            .push(token);
    }

    pub fn module_path_directives(&self) -> Vec<String> {
        self.module_path_directives
            .lock()
            .expect("module path directives mutex poisoned")
            .clone()
    }

    /// Round-trips a scan spec through JSON, the format an embedding
    /// application is expected to store one in (§10.3 Configuration).
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|err| ErrorKind::WorkerPanic(err.to_string()).into())
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|err| ErrorKind::WorkerPanic(err.to_string()).into())
    }
}

fn package_matches_prefix(package: &str, prefix: &str) -> bool {
    package == prefix || package.starts_with(&format!("{prefix}."))
}

/// The immutable result of one scan, returned to the caller (§6 output
/// contract). If `perform_scan` was false, `graph` is `None` and only the
/// ordering is populated.
pub struct ScanResult {
    pub final_order: Vec<Arc<ClasspathElement>>,
    pub graph: Option<LinkedGraph>,
    pub file_last_modified: std::collections::HashMap<String, SystemTime>,
    pub nested_archives: Arc<NestedArchiveHandler>,
    pub module_path_directives: Vec<String>,
    pub elapsed: std::time::Duration,
}

impl ScanResult {
    /// Re-opens a resource by owning element + logical path after the
    /// scan has returned (§3 Ownership, §5 Resource lifetimes, §10.5).
    pub fn read_resource(&self, element: &ClasspathElement, logical_path: &str) -> Result<Vec<u8>> {
        element.get_resource(logical_path, &self.nested_archives)
    }

    /// Releases any temp files the scan's [`NestedArchiveHandler`] kept
    /// around for later resource access (§5 "Resource lifetimes": "they
    /// outlive the scan for later resource access via the returned result
    /// and are released when the result is closed"). A no-op if the scan
    /// ran with `remove_temporary_files_after_scan = true`, since those
    /// files are already gone.
    pub fn close(&self) {
        self.nested_archives.close();
    }
}

/// Runs the whole pipeline described in §2 against `discovery`'s raw paths
/// and modules, under `spec`. `failure_hook`, if given, is invoked with the
/// terminal error before it is returned (§4.11); if the hook itself fails,
/// its error becomes the new terminal error and the original scan failure
/// is logged and chained onto it rather than silently dropped (§7
/// "Failure-hook failure").
pub fn run_scan(
    discovery: &dyn ClasspathDiscovery,
    spec: ScanSpec,
    failure_hook: Option<&dyn Fn(&crate::errors::Error) -> Result<()>>,
) -> Result<ScanResult> {
    let started = Instant::now();
    let spec = Arc::new(spec);
    let monitor = Arc::new(InterruptionMonitor::new());

    match run_scan_inner(discovery, spec.clone(), &monitor, started) {
        Ok(result) => Ok(result),
        Err(err) => {
            if let Some(hook) = failure_hook {
                if let Err(hook_err) = hook(&err) {
                    log::error!("failure hook itself failed; original scan failure was: {err}");
                    return Err(hook_err).chain_err(|| ErrorKind::FailureHook);
                }
            }
            Err(err)
        }
    }
}

fn run_scan_inner(
    discovery: &dyn ClasspathDiscovery,
    spec: Arc<ScanSpec>,
    monitor: &Arc<InterruptionMonitor>,
    started: Instant,
) -> Result<ScanResult> {
    let DiscoveredClasspath {
        raw_paths,
        modules,
    } = discovery.discover()?;

    let cwd = Arc::new(std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
    let arena = Arc::new(ElementArena::new());
    let singleton = Arc::new(crate::singleton_map::SingletonMap::new());
    let nested_archives = Arc::new(NestedArchiveHandler::new(spec.remove_temporary_files_after_scan));

    let ctx = OpenContext {
        cwd,
        arena: arena.clone(),
        singleton,
        nested_archives: nested_archives.clone(),
        scan_spec: spec.clone(),
    };

    // --- Opener phase -----------------------------------------------
    let initial_units: Vec<OpenerUnit> = raw_paths
        .into_iter()
        .enumerate()
        .map(|(order, raw_path)| OpenerUnit {
            raw_path,
            parent: None,
            order,
        })
        .collect();
    let parallelism = spec.resolved_parallelism(initial_units.len());

    let opener_ctx = ctx.clone();
    let opener_result = run_work_queue(initial_units, parallelism, monitor.clone(), move |unit, handle| {
        crate::element::process_opener_unit(unit, opener_ctx.clone(), handle)
    });
    monitor.check()?;
    opener_result?;

    // --- Ordering -----------------------------------------------------
    let module_elements = if spec.scan_modules {
        crate::element::open_modules(&modules, &ctx)?
    } else {
        Vec::new()
    };
    let mut final_order = module_elements;
    final_order.extend(build_final_order(&arena));

    // --- Nested-root detection -----------------------------------------
    detect_nested_roots(&final_order);

    // --- Path scan phase -------------------------------------------------
    let scan_units: Vec<Arc<ClasspathElement>> = final_order.clone();
    let scan_spec_for_queue = spec.clone();
    run_work_queue(scan_units, parallelism, monitor.clone(), move |element, _handle| {
        element.scan_paths(&scan_spec_for_queue)
    })?;
    monitor.check()?;

    if !spec.perform_scan {
        return Ok(ScanResult {
            final_order,
            graph: None,
            file_last_modified: collect_file_last_modified(&final_order),
            nested_archives,
            module_path_directives: spec.module_path_directives(),
            elapsed: started.elapsed(),
        });
    }

    // --- Masking ----------------------------------------------------------
    mask_classfiles(&final_order);

    // --- Classfile scan phase + upward closure ----------------------------
    let records: Arc<Mutex<Vec<UnlinkedRecord>>> = Arc::new(Mutex::new(Vec::new()));
    let scanned_class_names: Arc<crate::upward_closure::ScannedNames> =
        Arc::new(crate::upward_closure::ScannedNames::new());
    for element in &final_order {
        for resource in element.whitelisted_classfiles() {
            scanned_class_names.mark_seen(classfile::type_name_for_resource(resource.logical_path.as_str()));
        }
    }

    let initial_classfile_units = crate::classfile::initial_classfile_units(&final_order);
    let scheduler = Arc::new(UpwardClosureScheduler::new(
        final_order.clone(),
        scanned_class_names.clone(),
        spec.extend_scanning_upwards_to_external_classes,
    ));
    let records_for_queue = records.clone();
    let nested_archives_for_classfiles = nested_archives.clone();
    let enable_class_info = spec.enable_class_info;
    run_work_queue(
        initial_classfile_units,
        parallelism,
        monitor.clone(),
        move |unit, handle| {
            classfile::process_classfile_unit(
                unit,
                &nested_archives_for_classfiles,
                &records_for_queue,
                &scheduler,
                enable_class_info,
                handle,
            )
        },
    )?;
    monitor.check()?;

    // --- Linking -----------------------------------------------------------
    let records = Arc::try_unwrap(records)
        .map(|mutex| mutex.into_inner().expect("records mutex poisoned"))
        .unwrap_or_else(|arc| arc.lock().expect("records mutex poisoned").clone());
    let graph = linker::link(records, &final_order);

    Ok(ScanResult {
        file_last_modified: collect_file_last_modified(&final_order),
        final_order,
        graph: Some(graph),
        nested_archives,
        module_path_directives: spec.module_path_directives(),
        elapsed: started.elapsed(),
    })
}

fn collect_file_last_modified(
    final_order: &[Arc<ClasspathElement>],
) -> std::collections::HashMap<String, SystemTime> {
    let mut out = std::collections::HashMap::new();
    for element in final_order {
        out.extend(element.file_last_modified());
    }
    out
}

/// Used only by tests and the CLI to pick a sensible working directory
/// root for relative raw paths.
pub fn resolve_cwd(path: Option<&Path>) -> PathBuf {
    path.map(Path::to_path_buf)
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn package_matching() {
        let mut spec = ScanSpec {
            include_packages: vec!["com.example".to_string()],
            ..ScanSpec::default()
        };
        spec.exclude_packages.push("com.example.internal".to_string());

        assert!(spec.package_is_scanned("com.example"));
        assert!(spec.package_is_scanned("com.example.api"));
        assert!(!spec.package_is_scanned("com.example.internal"));
        assert!(!spec.package_is_scanned("org.other"));
    }

    #[test]
    fn empty_include_list_scans_everything_not_excluded() {
        let spec = ScanSpec {
            exclude_packages: vec!["com.secret".to_string()],
            ..ScanSpec::default()
        };
        assert!(spec.package_is_scanned("com.anything"));
        assert!(!spec.package_is_scanned("com.secret"));
    }

    #[test]
    fn module_scanning_rules() {
        let spec = ScanSpec {
            enable_system_jars_and_modules: true,
            ..ScanSpec::default()
        };
        assert!(spec.module_is_scanned("java.base", true));
        assert!(!spec.module_is_scanned("com.example", false));

        let spec = ScanSpec {
            include_modules: vec!["com.example".to_string()],
            ..ScanSpec::default()
        };
        assert!(spec.module_is_scanned("com.example", false));
        assert!(!spec.module_is_scanned("java.base", true));
    }

    #[test]
    fn scan_spec_round_trips_through_json() {
        let spec = ScanSpec {
            include_packages: vec!["com.example".to_string()],
            extend_scanning_upwards_to_external_classes: true,
            ..ScanSpec::default()
        };
        let json = spec.to_json().unwrap();
        let restored = ScanSpec::from_json(&json).unwrap();
        assert_eq!(restored.include_packages, spec.include_packages);
        assert!(restored.extend_scanning_upwards_to_external_classes);
    }

    struct FailingDiscovery;
    impl ClasspathDiscovery for FailingDiscovery {
        fn discover(&self) -> Result<DiscoveredClasspath> {
            Err(ErrorKind::WorkerPanic("discovery exploded".to_string()).into())
        }
    }

    #[test]
    fn failure_hook_observes_the_scan_error_and_scan_still_fails() {
        let observed = Mutex::new(None);
        let hook = |err: &crate::errors::Error| -> Result<()> {
            *observed.lock().unwrap() = Some(err.to_string());
            Ok(())
        };
        let result = run_scan(&FailingDiscovery, ScanSpec::default(), Some(&hook));
        assert!(result.is_err());
        assert!(observed.lock().unwrap().is_some());
    }

    #[test]
    fn a_failing_failure_hook_becomes_the_terminal_error() {
        let hook = |_err: &crate::errors::Error| -> Result<()> {
            Err(ErrorKind::WorkerPanic("hook itself blew up".to_string()).into())
        };
        match run_scan(&FailingDiscovery, ScanSpec::default(), Some(&hook)) {
            Err(crate::errors::Error(ErrorKind::FailureHook, _)) => {}
            other => panic!("expected FailureHook, got {other:?}"),
        }
    }
}
