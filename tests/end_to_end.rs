//! End-to-end scenarios exercising the whole pipeline (opener through
//! linking) against on-disk fixtures, one per scenario.

use std::io::Write;
use std::path::Path;

use classpath_scan::discovery::StaticClasspath;
use classpath_scan::path_resolver::RawPath;
use classpath_scan::resource::classfile_path_for_type_name;
use classpath_scan::scan::{run_scan, ScanSpec};

const CLASS_MAGIC: u32 = 0xCAFEBABE;

/// Hand-assembles minimal classfile bytes for `public class <this_name>
/// extends <super_name> {}`, with no fields, methods or annotations.
/// Mirrors the parser's own test fixture builder; duplicated here since
/// that one is private to its module.
fn minimal_classfile(this_name: &str, super_name: Option<&str>) -> Vec<u8> {
    let mut pool_entries: Vec<Vec<u8>> = Vec::new();
    let mut names: Vec<(String, u16)> = Vec::new();

    fn intern_utf8(name: &str, pool_entries: &mut Vec<Vec<u8>>, names: &mut Vec<(String, u16)>) -> u16 {
        if let Some((_, idx)) = names.iter().find(|(n, _)| n == name) {
            return *idx;
        }
        let mut entry = vec![1u8];
        entry.extend((name.len() as u16).to_be_bytes());
        entry.extend(name.as_bytes());
        pool_entries.push(entry);
        let idx = pool_entries.len() as u16;
        names.push((name.to_string(), idx));
        idx
    }

    fn intern_class(internal_name: &str, pool_entries: &mut Vec<Vec<u8>>, names: &mut Vec<(String, u16)>) -> u16 {
        let name_idx = intern_utf8(internal_name, pool_entries, names);
        let mut entry = vec![7u8];
        entry.extend(name_idx.to_be_bytes());
        pool_entries.push(entry);
        pool_entries.len() as u16
    }

    let this_internal = this_name.replace('.', "/");
    let this_idx = intern_class(&this_internal, &mut pool_entries, &mut names);
    let super_idx = super_name
        .map(|s| intern_class(&s.replace('.', "/"), &mut pool_entries, &mut names))
        .unwrap_or(0);

    let mut bytes = Vec::new();
    bytes.extend(CLASS_MAGIC.to_be_bytes());
    bytes.extend(0u16.to_be_bytes());
    bytes.extend(52u16.to_be_bytes());

    let constant_pool_count = (pool_entries.len() + 1) as u16;
    bytes.extend(constant_pool_count.to_be_bytes());
    for entry in &pool_entries {
        bytes.extend(entry);
    }

    bytes.extend(0x0021u16.to_be_bytes()); // access_flags: PUBLIC | SUPER
    bytes.extend(this_idx.to_be_bytes());
    bytes.extend(super_idx.to_be_bytes());
    bytes.extend(0u16.to_be_bytes()); // interfaces_count
    bytes.extend(0u16.to_be_bytes()); // fields_count
    bytes.extend(0u16.to_be_bytes()); // methods_count
    bytes.extend(0u16.to_be_bytes()); // attributes_count
    bytes
}

/// Writes a zip archive at `path` containing `entries` (logical path,
/// bytes) plus, if `manifest_class_path` is given, a
/// `META-INF/MANIFEST.MF` whose `Class-Path` attribute is that string.
fn write_jar(path: &Path, entries: &[(&str, Vec<u8>)], manifest_class_path: Option<&str>) {
    let file = std::fs::File::create(path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    let options = zip::write::FileOptions::default().compression_method(zip::CompressionMethod::Stored);

    if let Some(class_path) = manifest_class_path {
        zip.start_file("META-INF/MANIFEST.MF", options).unwrap();
        write!(zip, "Manifest-Version: 1.0\nClass-Path: {class_path}\n").unwrap();
    }
    for (name, bytes) in entries {
        zip.start_file(*name, options).unwrap();
        zip.write_all(bytes).unwrap();
    }
    zip.finish().unwrap();
}

fn raw(path: impl AsRef<Path>) -> RawPath {
    RawPath::new(path.as_ref().to_string_lossy().into_owned())
}

#[test]
fn duplicate_path_aliasing_collapses_to_one_element() {
    let dir = tempfile::tempdir().unwrap();
    let jar_path = dir.path().join("a.jar");
    write_jar(&jar_path, &[], None);

    let raw_paths = vec![
        raw(&jar_path),
        RawPath::new(format!("file:{}/./a.jar", dir.path().to_string_lossy())),
        RawPath::new(format!("jar:{}!/", jar_path.to_string_lossy())),
    ];
    let discovery = StaticClasspath::new(raw_paths);
    let spec = ScanSpec {
        perform_scan: false,
        ..ScanSpec::default()
    };

    let result = run_scan(&discovery, spec, None).unwrap();
    assert_eq!(result.final_order.len(), 1);
    let canonical = std::fs::canonicalize(&jar_path).unwrap().to_string_lossy().replace('\\', "/");
    assert_eq!(result.final_order[0].canonical_id, canonical);
}

#[test]
fn manifest_class_path_inserts_an_existing_entry_and_skips_a_missing_one() {
    let dir = tempfile::tempdir().unwrap();
    write_jar(&dir.path().join("a.jar"), &[], Some("b.jar c.jar"));
    write_jar(&dir.path().join("b.jar"), &[], None);
    // c.jar deliberately not created.

    let discovery = StaticClasspath::new(vec![raw(dir.path().join("a.jar"))]);
    let spec = ScanSpec {
        perform_scan: false,
        ..ScanSpec::default()
    };

    let result = run_scan(&discovery, spec, None).unwrap();
    assert_eq!(result.final_order.len(), 2);
    assert!(result.final_order[0].canonical_id.ends_with("a.jar"));
    assert!(result.final_order[1].canonical_id.ends_with("b.jar"));
}

#[test]
fn first_wins_masking_keeps_the_earlier_archives_record() {
    let dir = tempfile::tempdir().unwrap();
    let entry_path = classfile_path_for_type_name("com.x.T");

    write_jar(
        &dir.path().join("p.jar"),
        &[(entry_path.as_str(), minimal_classfile("com.x.T", Some("com.x.FromP")))],
        None,
    );
    write_jar(
        &dir.path().join("q.jar"),
        &[(entry_path.as_str(), minimal_classfile("com.x.T", Some("com.x.FromQ")))],
        None,
    );

    let discovery = StaticClasspath::new(vec![raw(dir.path().join("p.jar")), raw(dir.path().join("q.jar"))]);
    let result = run_scan(&discovery, ScanSpec::default(), None).unwrap();

    let graph = result.graph.unwrap();
    let t = graph.find_class("com.x.T").unwrap();
    let superclass = graph.class(t.superclass.unwrap());
    assert_eq!(superclass.name, "com.x.FromP");
}

#[test]
fn a_directory_does_not_descend_into_a_nested_archive_already_on_the_classpath() {
    let dir = tempfile::tempdir().unwrap();
    let lib = dir.path().join("lib");
    std::fs::create_dir_all(&lib).unwrap();
    std::fs::write(lib.join("other.txt"), b"x").unwrap();
    write_jar(
        &lib.join("sub.jar"),
        &[("com/y/U.class", minimal_classfile("com.y.U", None))],
        None,
    );

    let discovery = StaticClasspath::new(vec![raw(&lib), raw(lib.join("sub.jar"))]);
    let spec = ScanSpec {
        perform_scan: false,
        ..ScanSpec::default()
    };
    let result = run_scan(&discovery, spec, None).unwrap();

    assert_eq!(result.final_order.len(), 2);
    let lib_element = result.final_order.iter().find(|e| e.is_directory()).unwrap();
    assert_eq!(lib_element.nested_root_prefixes(), vec!["sub.jar/".to_string()]);

    let archive_element = result.final_order.iter().find(|e| e.is_archive()).unwrap();
    let archive_resources: Vec<String> = archive_element
        .resources()
        .iter()
        .map(|r| r.logical_path.as_str().to_string())
        .collect();
    assert!(archive_resources.contains(&"com/y/U.class".to_string()));
}

#[test]
fn upward_closure_pulls_in_an_externally_referenced_superclass_when_enabled() {
    let dir = tempfile::tempdir().unwrap();
    write_jar(
        &dir.path().join("inc.jar"),
        &[("a/A.class", minimal_classfile("a.A", Some("x.B")))],
        None,
    );
    let libs = dir.path().join("libs");
    std::fs::create_dir_all(&libs).unwrap();
    write_jar(&libs.join("x.jar"), &[("x/B.class", minimal_classfile("x.B", None))], None);

    let discovery = StaticClasspath::new(vec![raw(dir.path().join("inc.jar")), raw(libs.join("x.jar"))]);

    let enabled_spec = ScanSpec {
        include_packages: vec!["a".to_string()],
        extend_scanning_upwards_to_external_classes: true,
        ..ScanSpec::default()
    };
    let enabled = run_scan(&discovery, enabled_spec, None).unwrap();
    let enabled_graph = enabled.graph.unwrap();
    let b_enabled = enabled_graph.find_class("x.B").unwrap();
    assert!(!b_enabled.is_placeholder);
    assert!(b_enabled.is_external);

    let disabled_spec = ScanSpec {
        include_packages: vec!["a".to_string()],
        extend_scanning_upwards_to_external_classes: false,
        ..ScanSpec::default()
    };
    let disabled = run_scan(&discovery, disabled_spec, None).unwrap();
    let disabled_graph = disabled.graph.unwrap();
    let b_disabled = disabled_graph.find_class("x.B").unwrap();
    assert!(b_disabled.is_placeholder);
}

#[test]
fn a_manifest_class_path_cycle_terminates_and_visits_each_archive_once() {
    let dir = tempfile::tempdir().unwrap();
    write_jar(&dir.path().join("a.jar"), &[], Some("b.jar"));
    write_jar(&dir.path().join("b.jar"), &[], Some("a.jar"));

    let discovery = StaticClasspath::new(vec![raw(dir.path().join("a.jar"))]);
    let spec = ScanSpec {
        perform_scan: false,
        ..ScanSpec::default()
    };
    let result = run_scan(&discovery, spec, None).unwrap();

    assert_eq!(result.final_order.len(), 2);
    assert!(result.final_order[0].canonical_id.ends_with("a.jar"));
    assert!(result.final_order[1].canonical_id.ends_with("b.jar"));
}
