//! The Classpath Element: a `{Directory, Archive, Module}` tagged variant
//! sharing one capability set (`open`, `scan_paths`, `get_resource`,
//! masked-classfile bookkeeping) rather than a trait-object hierarchy,
//! since the three kinds differ in storage, not in the shape of their
//! operations (§4.3).
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use walkdir::WalkDir;

use crate::classfile::type_name_for_resource;
use crate::discovery::ModuleReference;
use crate::errors::{ErrorKind, Result, ResultExt};
use crate::manifest::{self, Manifest};
use crate::nested_archive::NestedArchiveHandler;
use crate::path_resolver::{self, parse_raw_path, ParsedPath, RawPath};
use crate::resource::{package_name_of, LogicalPath, Resource};
use crate::scan::ScanSpec;
use crate::singleton_map::SingletonMap;
use crate::work_queue::WorkQueueHandle;

pub type ElementId = usize;

#[derive(Debug, Clone)]
pub enum ElementKind {
    Directory {
        path: PathBuf,
    },
    Archive {
        /// The archive file as it exists on local disk — already resolved
        /// through any remote fetch or nested-archive extraction.
        resolved_path: PathBuf,
        /// The raw path's filesystem base before any `!`-separated inner
        /// path was resolved, used by the Nested-Root Detector to match an
        /// outer archive against an element nested inside it (§4.5).
        outer_filesystem_path: PathBuf,
        /// Entry names consumed to get from `outer_filesystem_path` to
        /// `resolved_path`, one per nesting level. Empty for a plain
        /// top-level archive.
        nested_chain: Vec<String>,
    },
    Module {
        reference: ModuleReference,
    },
    /// An element whose raw path could not be opened (missing file,
    /// permission error, unreadable archive). Kept as an arena entry so it
    /// can still be referenced as a parent, but the Classpath Orderer skips
    /// emitting it (§4.3 step 7, §4.4).
    Invalid,
}

/// Per-thread-shared, interior-mutable element state. One instance per
/// canonical identity, enforced by routing every construction through the
/// [`SingletonMap`] in [`OpenContext`].
pub struct ClasspathElement {
    pub id: ElementId,
    pub canonical_id: String,
    pub kind: ElementKind,
    pub parent: Option<ElementId>,
    pub order_within_parent: usize,
    skip: AtomicBool,
    children: Mutex<Vec<ElementId>>,
    nested_root_prefixes: Mutex<Vec<String>>,
    resources: Mutex<Vec<Resource>>,
    whitelisted_classfiles: Mutex<Vec<Resource>>,
    file_last_modified: Mutex<HashMap<String, SystemTime>>,
}

impl ClasspathElement {
    pub(crate) fn new(
        id: ElementId,
        kind: ElementKind,
        canonical_id: String,
        parent: Option<ElementId>,
        order_within_parent: usize,
    ) -> Self {
        let skip = matches!(kind, ElementKind::Invalid);
        ClasspathElement {
            id,
            canonical_id,
            kind,
            parent,
            order_within_parent,
            skip: AtomicBool::new(skip),
            children: Mutex::new(Vec::new()),
            nested_root_prefixes: Mutex::new(Vec::new()),
            resources: Mutex::new(Vec::new()),
            whitelisted_classfiles: Mutex::new(Vec::new()),
            file_last_modified: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_skipped(&self) -> bool {
        self.skip.load(Ordering::SeqCst)
    }

    pub fn children(&self) -> Vec<ElementId> {
        self.children.lock().expect("element children mutex poisoned").clone()
    }

    pub(crate) fn add_child(&self, child: ElementId) {
        self.children
            .lock()
            .expect("element children mutex poisoned")
            .push(child);
    }

    pub fn set_nested_root_prefixes(&self, prefixes: Vec<String>) {
        *self
            .nested_root_prefixes
            .lock()
            .expect("nested root prefixes mutex poisoned") = prefixes;
    }

    /// The path used to compare this element against others for
    /// nested-root detection (§4.5): the directory path for a Directory,
    /// the outer on-disk archive path for an Archive (not its resolved
    /// path through any nested-archive chain — nesting is about sibling
    /// classpath entries, not about archives-within-archives already
    /// handled by the Nested Archive Handler). `None` for modules, which
    /// the detector skips entirely.
    pub fn nesting_path(&self) -> Option<String> {
        match &self.kind {
            ElementKind::Directory { path } => Some(path.to_string_lossy().into_owned()),
            ElementKind::Archive { outer_filesystem_path, .. } => {
                Some(outer_filesystem_path.to_string_lossy().into_owned())
            }
            ElementKind::Module { .. } | ElementKind::Invalid => None,
        }
    }

    /// Whether this element is a Directory (for the nested-root
    /// detector's "separate pass per kind" rule, §4.5).
    pub fn is_directory(&self) -> bool {
        matches!(self.kind, ElementKind::Directory { .. })
    }

    pub fn is_archive(&self) -> bool {
        matches!(self.kind, ElementKind::Archive { .. })
    }

    pub fn nested_root_prefixes(&self) -> Vec<String> {
        self.nested_root_prefixes
            .lock()
            .expect("nested root prefixes mutex poisoned")
            .clone()
    }

    pub fn resources(&self) -> Vec<Resource> {
        self.resources.lock().expect("resources mutex poisoned").clone()
    }

    pub fn whitelisted_classfiles(&self) -> Vec<Resource> {
        self.whitelisted_classfiles
            .lock()
            .expect("whitelisted classfiles mutex poisoned")
            .clone()
    }

    /// Replaces the whitelisted-classfile set, called by the Masker once
    /// with the first-wins subset (§4.7).
    pub fn set_whitelisted_classfiles(&self, resources: Vec<Resource>) {
        *self
            .whitelisted_classfiles
            .lock()
            .expect("whitelisted classfiles mutex poisoned") = resources;
    }

    pub fn file_last_modified(&self) -> HashMap<String, SystemTime> {
        self.file_last_modified
            .lock()
            .expect("file last modified mutex poisoned")
            .clone()
    }

    /// §4.6: lists every resource under an element's root, recording its
    /// logical path and modification time, skipping anything that falls
    /// under a detected nested root and anything the scan spec's
    /// include/exclude filters reject. Classfiles are additionally
    /// collected into `whitelisted_classfiles` ahead of masking.
    pub fn scan_paths(&self, spec: &ScanSpec) -> Result<()> {
        if self.is_skipped() {
            return Ok(());
        }
        let prefixes = self.nested_root_prefixes();
        let mut resources = Vec::new();
        let mut classfiles = Vec::new();
        let mut last_modified = HashMap::new();

        match &self.kind {
            ElementKind::Directory { path } => {
                for entry in WalkDir::new(path).into_iter().filter_map(|e| e.ok()) {
                    if !entry.file_type().is_file() {
                        continue;
                    }
                    let relative = entry
                        .path()
                        .strip_prefix(path)
                        .unwrap_or(entry.path())
                        .to_string_lossy()
                        .replace('\\', "/");
                    self.accept_resource(
                        spec,
                        &prefixes,
                        relative,
                        entry.metadata().ok().and_then(|m| m.modified().ok()),
                        &mut resources,
                        &mut classfiles,
                        &mut last_modified,
                    );
                }
            }
            ElementKind::Archive { resolved_path, .. } => {
                let file = std::fs::File::open(resolved_path)
                    .chain_err(|| ErrorKind::OpenElement(resolved_path.display().to_string()))?;
                let mut zip = zip::ZipArchive::new(file)
                    .chain_err(|| ErrorKind::OpenElement(resolved_path.display().to_string()))?;
                for i in 0..zip.len() {
                    let entry = zip
                        .by_index(i)
                        .chain_err(|| ErrorKind::ResourceIo(resolved_path.display().to_string()))?;
                    if entry.is_dir() {
                        continue;
                    }
                    let name = entry.name().to_string();
                    // Zip entry timestamps are DOS-epoch and only
                    // second-granularity; not worth converting when the
                    // archive's own mtime is available to the caller via
                    // the filesystem metadata of the jar itself.
                    self.accept_resource(
                        spec, &prefixes, name, None, &mut resources, &mut classfiles, &mut last_modified,
                    );
                }
            }
            ElementKind::Module { reference } => {
                for path in &reference.resource_paths {
                    self.accept_resource(
                        spec, &prefixes, path.clone(), None, &mut resources, &mut classfiles, &mut last_modified,
                    );
                }
            }
            ElementKind::Invalid => {}
        }

        *self.resources.lock().expect("resources mutex poisoned") = resources;
        *self
            .whitelisted_classfiles
            .lock()
            .expect("whitelisted classfiles mutex poisoned") = classfiles;
        *self
            .file_last_modified
            .lock()
            .expect("file last modified mutex poisoned") = last_modified;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn accept_resource(
        &self,
        spec: &ScanSpec,
        prefixes: &[String],
        relative_path: String,
        modified: Option<SystemTime>,
        resources: &mut Vec<Resource>,
        classfiles: &mut Vec<Resource>,
        last_modified: &mut HashMap<String, SystemTime>,
    ) {
        let logical = LogicalPath::new(relative_path);
        if logical.is_under_any_prefix(prefixes.iter().map(String::as_str)) {
            return;
        }
        if !spec.resource_path_is_scanned(logical.as_str()) {
            return;
        }
        if let Some(time) = modified {
            last_modified.insert(logical.as_str().to_string(), time);
        }
        let resource = Resource::new(logical, modified);
        // Package include/exclude (§6) governs only the *initial* whitelisted
        // classfile set, not the element's full resource inventory: a type in
        // an excluded package must still be findable by
        // `resources()` so the Upward-Closure Scheduler (§4.9) can locate and
        // schedule it on demand when something included references it.
        if resource.is_classfile() {
            let type_name = type_name_for_resource(resource.logical_path.as_str());
            let package = package_name_of(&type_name);
            if spec.package_is_scanned(&package) {
                classfiles.push(resource.clone());
            }
        }
        resources.push(resource);
    }

    /// Reads one resource's bytes by logical path, re-opening the backing
    /// archive/directory/module as needed (§3 Ownership, §10.5 — callers
    /// may do this after the scan has returned).
    pub fn get_resource(&self, logical_path: &str, nested_archives: &NestedArchiveHandler) -> Result<Vec<u8>> {
        match &self.kind {
            ElementKind::Directory { path } => {
                let full = path.join(logical_path);
                std::fs::read(&full).chain_err(|| ErrorKind::ResourceIo(logical_path.to_string()))
            }
            ElementKind::Archive { resolved_path, .. } => {
                let file = std::fs::File::open(resolved_path)
                    .chain_err(|| ErrorKind::OpenElement(resolved_path.display().to_string()))?;
                let mut zip = zip::ZipArchive::new(file)
                    .chain_err(|| ErrorKind::OpenElement(resolved_path.display().to_string()))?;
                let mut entry = zip
                    .by_name(logical_path)
                    .chain_err(|| ErrorKind::ResourceIo(logical_path.to_string()))?;
                let mut buf = Vec::new();
                std::io::Read::read_to_end(&mut entry, &mut buf)
                    .chain_err(|| ErrorKind::ResourceIo(logical_path.to_string()))?;
                let _ = nested_archives;
                Ok(buf)
            }
            ElementKind::Module { .. } => {
                Err(ErrorKind::ResourceIo(logical_path.to_string()).into())
            }
            ElementKind::Invalid => Err(ErrorKind::ResourceIo(logical_path.to_string()).into()),
        }
    }
}

/// Everything `open_element` needs, Arc-wrapped so a clone is cheap enough
/// to capture in the `'static` closure the work queue requires.
#[derive(Clone)]
pub struct OpenContext {
    pub cwd: Arc<PathBuf>,
    pub arena: Arc<ElementArena>,
    pub singleton: Arc<SingletonMap<String, ElementId>>,
    pub nested_archives: Arc<NestedArchiveHandler>,
    pub scan_spec: Arc<ScanSpec>,
}

/// Append-only storage for every element constructed during a scan,
/// indexed by [`ElementId`].
pub struct ElementArena {
    elements: Mutex<Vec<Arc<ClasspathElement>>>,
}

impl ElementArena {
    pub fn new() -> Self {
        ElementArena {
            elements: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn insert(&self, build: impl FnOnce(ElementId) -> ClasspathElement) -> Arc<ClasspathElement> {
        let mut elements = self.elements.lock().expect("element arena mutex poisoned");
        let id = elements.len();
        let element = Arc::new(build(id));
        elements.push(element.clone());
        element
    }

    pub fn get(&self, id: ElementId) -> Arc<ClasspathElement> {
        self.elements.lock().expect("element arena mutex poisoned")[id].clone()
    }

    pub fn all(&self) -> Vec<Arc<ClasspathElement>> {
        self.elements.lock().expect("element arena mutex poisoned").clone()
    }
}

impl Default for ElementArena {
    fn default() -> Self {
        Self::new()
    }
}

/// One unit of work for the opener phase's work queue: "open this raw
/// path, as child `order` of `parent` (or a toplevel entry if `None`)".
#[derive(Debug, Clone)]
pub struct OpenerUnit {
    pub raw_path: RawPath,
    pub parent: Option<ElementId>,
    pub order: usize,
}

/// The work queue processor for the opener phase (§4.3). Constructs (or
/// looks up) the element for `unit.raw_path` and, if it has a parent,
/// records the child link.
pub fn process_opener_unit(
    unit: OpenerUnit,
    ctx: OpenContext,
    handle: &WorkQueueHandle<OpenerUnit>,
) -> Result<()> {
    handle.monitor().check()?;
    let id = open_element(&unit.raw_path, unit.parent, unit.order, &ctx, handle)?;
    if let Some(parent_id) = unit.parent {
        ctx.arena.get(parent_id).add_child(id);
    }
    Ok(())
}

fn open_element(
    raw: &RawPath,
    parent: Option<ElementId>,
    order: usize,
    ctx: &OpenContext,
    handle: &WorkQueueHandle<OpenerUnit>,
) -> Result<ElementId> {
    let parsed = parse_raw_path(raw, &ctx.cwd);

    let base_canonical_id = if parsed.is_remote {
        parsed.filesystem_base.clone()
    } else {
        path_resolver::canonicalize(&parsed.filesystem_base).unwrap_or_else(|_| parsed.filesystem_base.clone())
    };
    // A nested-archive entry's identity must include its inner path, not
    // just the outer archive's: two different entries inside the same
    // outer jar (`a.jar!x.jar`, `a.jar!y.jar`) are distinct elements, even
    // though they share a filesystem base (§3 "exactly one Classpath
    // Element per canonical identity").
    let canonical_id = match &parsed.inner_path {
        Some(inner) => format!("{base_canonical_id}!{inner}"),
        None => base_canonical_id,
    };

    let singleton = ctx.singleton.clone();
    let ctx_for_build = ctx.clone();
    let raw_for_build = raw.clone();
    let parsed_for_build = parsed.clone();
    let canonical_for_build = canonical_id.clone();
    singleton.get(canonical_id, move || {
        build_element(raw_for_build, parsed_for_build, canonical_for_build, parent, order, &ctx_for_build, handle)
    })
}

fn build_element(
    raw: RawPath,
    parsed: ParsedPath,
    canonical_id: String,
    parent: Option<ElementId>,
    order: usize,
    ctx: &OpenContext,
    handle: &WorkQueueHandle<OpenerUnit>,
) -> Result<ElementId> {
    if parsed.is_remote {
        return match ctx.nested_archives.fetch_remote(&canonical_id) {
            Ok(local_path) => {
                let outer = PathBuf::from(&canonical_id);
                finish_archive_element(local_path, outer, Vec::new(), canonical_id, parent, order, ctx, handle)
            }
            Err(err) => {
                log::warn!("skipping remote classpath element '{raw}': {err}");
                Ok(insert_invalid(ctx, canonical_id, parent, order))
            }
        };
    }

    let fs_path = Path::new(&parsed.filesystem_base);
    let metadata = match std::fs::metadata(fs_path) {
        Ok(meta) => meta,
        Err(err) => {
            log::warn!("skipping classpath element '{raw}': {err}");
            return Ok(insert_invalid(ctx, canonical_id, parent, order));
        }
    };

    let looks_like_archive = parsed.inner_path.is_some() || has_archive_extension(fs_path);

    if metadata.is_dir() && parsed.inner_path.is_none() {
        let element = ctx.arena.insert(|id| {
            ClasspathElement::new(
                id,
                ElementKind::Directory { path: fs_path.to_path_buf() },
                canonical_id,
                parent,
                order,
            )
        });
        Ok(element.id)
    } else if metadata.is_file() || looks_like_archive {
        let nested_chain: Vec<String> = parsed.inner_path.into_iter().collect();
        let outer = fs_path.to_path_buf();
        match ctx.nested_archives.resolve(fs_path, &nested_chain) {
            Ok(resolved) => finish_archive_element(resolved, outer, nested_chain, canonical_id, parent, order, ctx, handle),
            Err(err) => {
                log::warn!("skipping archive classpath element '{raw}': {err}");
                Ok(insert_invalid(ctx, canonical_id, parent, order))
            }
        }
    } else {
        log::warn!("skipping classpath element '{raw}': neither a file nor a directory");
        Ok(insert_invalid(ctx, canonical_id, parent, order))
    }
}

fn finish_archive_element(
    resolved_path: PathBuf,
    outer_filesystem_path: PathBuf,
    nested_chain: Vec<String>,
    canonical_id: String,
    parent: Option<ElementId>,
    order: usize,
    ctx: &OpenContext,
    handle: &WorkQueueHandle<OpenerUnit>,
) -> Result<ElementId> {
    let element = ctx.arena.insert(|id| {
        ClasspathElement::new(
            id,
            ElementKind::Archive {
                resolved_path: resolved_path.clone(),
                outer_filesystem_path,
                nested_chain,
            },
            canonical_id.clone(),
            parent,
            order,
        )
    });

    match read_manifest(&resolved_path) {
        Ok(Some(manifest)) => schedule_manifest_cross_references(&manifest, &resolved_path, element.id, ctx, handle),
        Ok(None) => {}
        Err(err) => log::debug!("no usable manifest in '{}': {}", resolved_path.display(), err),
    }

    Ok(element.id)
}

fn schedule_manifest_cross_references(
    manifest: &Manifest,
    archive_path: &Path,
    element_id: ElementId,
    ctx: &OpenContext,
    handle: &WorkQueueHandle<OpenerUnit>,
) {
    for token in manifest.add_exports.iter().chain(manifest.add_opens.iter()) {
        ctx.scan_spec.record_module_directive(manifest::with_all_unnamed_sentinel(token));
    }

    if manifest.class_path.is_empty() {
        return;
    }
    let parent_dir = archive_path.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."));
    let child_units: Vec<OpenerUnit> = manifest
        .class_path
        .iter()
        .enumerate()
        .map(|(i, entry)| OpenerUnit {
            raw_path: RawPath::new(parent_dir.join(entry).to_string_lossy().into_owned()),
            parent: Some(element_id),
            order: i,
        })
        .collect();
    handle.add_work_units(child_units);
}

fn read_manifest(archive_path: &Path) -> Result<Option<Manifest>> {
    let file = std::fs::File::open(archive_path)
        .chain_err(|| ErrorKind::ManifestRead(archive_path.to_path_buf()))?;
    let mut zip = zip::ZipArchive::new(file).chain_err(|| ErrorKind::ManifestRead(archive_path.to_path_buf()))?;
    let mut entry = match zip.by_name("META-INF/MANIFEST.MF") {
        Ok(entry) => entry,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(err) => return Err(err).chain_err(|| ErrorKind::ManifestRead(archive_path.to_path_buf())),
    };
    let mut bytes = Vec::new();
    std::io::Read::read_to_end(&mut entry, &mut bytes)
        .chain_err(|| ErrorKind::ManifestRead(archive_path.to_path_buf()))?;
    Ok(Some(manifest::parse_manifest(&bytes)))
}

fn insert_invalid(ctx: &OpenContext, canonical_id: String, parent: Option<ElementId>, order: usize) -> ElementId {
    ctx.arena
        .insert(|id| ClasspathElement::new(id, ElementKind::Invalid, canonical_id, parent, order))
        .id
}

fn has_archive_extension(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("jar") | Some("zip") | Some("war") | Some("jmod")
    )
}

/// Opens each configured module as a toplevel element (§4.3's module
/// variant; modules have no parent and are ordered before the rest of the
/// classpath per §4.4).
pub fn open_modules(modules: &[ModuleReference], ctx: &OpenContext) -> Result<Vec<Arc<ClasspathElement>>> {
    modules
        .iter()
        .filter(|m| ctx.scan_spec.module_is_scanned(&m.name, m.is_system))
        .enumerate()
        .map(|(order, reference)| {
            let canonical_id = format!("module:{}", reference.name);
            let reference = reference.clone();
            ctx.singleton
                .get(canonical_id.clone(), || {
                    Ok(ctx
                        .arena
                        .insert(|id| ClasspathElement::new(id, ElementKind::Module { reference }, canonical_id.clone(), None, order))
                        .id)
                })
                .map(|id| ctx.arena.get(id))
        })
        .collect()
}
