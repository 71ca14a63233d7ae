//! The Classpath Discovery front-end: turning a running JVM's (or a
//! build tool's) notion of "the classpath" into the ordered list of raw
//! path strings and module references this crate actually scans.
//!
//! How that list is produced — parsing `java.class.path`, walking a
//! build tool's dependency graph, reading `--module-path` — is explicitly
//! out of scope (§1 Non-goals): this module only defines the seam and a
//! couple of minimal implementations that don't require a JVM at all.
use crate::errors::Result;
use crate::path_resolver::RawPath;

/// One JPMS module made available to the scan, already resolved to the
/// flat list of resource paths it exports or opens. Real module
/// introspection (reading `module-info.class`, walking the boot module
/// layer) lives outside this crate; a discovery front-end that wants
/// `scan_modules` support is expected to supply this directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleReference {
    pub name: String,
    pub resource_paths: Vec<String>,
    pub is_system: bool,
}

/// What a scan needs in order to begin the opener phase.
#[derive(Debug, Clone, Default)]
pub struct DiscoveredClasspath {
    pub raw_paths: Vec<RawPath>,
    pub modules: Vec<ModuleReference>,
}

/// The external collaborator this crate depends on but does not
/// implement (§1). A caller running inside an actual JVM process is
/// expected to provide an implementation that reads `java.class.path`
/// and `java.vm.specification.version` or the equivalent build-tool
/// metadata.
pub trait ClasspathDiscovery: Send + Sync {
    fn discover(&self) -> Result<DiscoveredClasspath>;
}

/// A discovery front-end that scans exactly the raw paths and modules it
/// was given, in order. Useful for CLI invocations where the classpath
/// is supplied directly, and for tests.
pub struct StaticClasspath {
    raw_paths: Vec<RawPath>,
    modules: Vec<ModuleReference>,
}

impl StaticClasspath {
    pub fn new(raw_paths: Vec<RawPath>) -> Self {
        StaticClasspath {
            raw_paths,
            modules: Vec::new(),
        }
    }

    pub fn with_modules(mut self, modules: Vec<ModuleReference>) -> Self {
        self.modules = modules;
        self
    }
}

impl ClasspathDiscovery for StaticClasspath {
    fn discover(&self) -> Result<DiscoveredClasspath> {
        Ok(DiscoveredClasspath {
            raw_paths: self.raw_paths.clone(),
            modules: self.modules.clone(),
        })
    }
}

/// Splits the `CLASSPATH`-style separator (`:` on Unix, `;` on Windows)
/// convention used by `java.class.path`, the most common shape a real
/// discovery front-end hands us.
pub fn split_classpath_string(classpath: &str) -> Vec<RawPath> {
    let separator = if cfg!(windows) { ';' } else { ':' };
    classpath
        .split(separator)
        .filter(|entry| !entry.is_empty())
        .map(RawPath::new)
        .collect()
}
