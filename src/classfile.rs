//! The Classfile Parser (§4.8). Named an "external black box" by §2's
//! component table — the scan engine's semantics don't depend on *how* a
//! classfile's bytes become an [`UnlinkedRecord`], only on the fact that
//! parsing is deterministic for a given byte sequence. This module supplies
//! the one real implementation: a reader for the binary format described in
//! the JVM class file specification, reading exactly as much of it as the
//! Unlinked Record (§3) needs — constant pool, `this`/`super`/interfaces,
//! fields and methods with their annotations — and nothing of the bytecode
//! itself (no `Code` attribute decoding; this crate never executes anything,
//! §1 Non-goals).
use std::io::Cursor;
use std::sync::{Arc, Mutex};

use byteorder::{BigEndian, ReadBytesExt};

use crate::element::{ClasspathElement, ElementId};
use crate::errors::{ErrorKind, Result, ResultExt};
use crate::nested_archive::NestedArchiveHandler;
use crate::resource::Resource;
use crate::upward_closure::UpwardClosureScheduler;
use crate::work_queue::WorkQueueHandle;

const CLASS_MAGIC: u32 = 0xCAFE_BABE;

/// One member's modifiers, name, descriptor, and the type names referenced
/// by its annotations (class-level for fields, class-level plus
/// per-parameter for methods).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRecord {
    pub name: String,
    pub descriptor: String,
    pub modifiers: u16,
    pub annotations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodRecord {
    pub name: String,
    pub descriptor: String,
    pub modifiers: u16,
    pub annotations: Vec<String>,
    pub parameter_annotations: Vec<Vec<String>>,
}

/// The output of parsing one classfile (§3): type name, modifiers,
/// superclass, interfaces, annotations, fields and methods, plus the
/// owning element and external-class flag the Upward-Closure Scheduler
/// needs. References to other types are by name only — nothing here
/// points at another record.
#[derive(Debug, Clone)]
pub struct UnlinkedRecord {
    pub type_name: String,
    pub modifiers: u16,
    pub superclass: Option<String>,
    pub interfaces: Vec<String>,
    pub annotations: Vec<String>,
    pub fields: Vec<FieldRecord>,
    pub methods: Vec<MethodRecord>,
    pub owning_element: ElementId,
    pub is_external: bool,
}

impl UnlinkedRecord {
    /// Every type name referenced by this record other than itself:
    /// superclass, implemented interfaces, and the type named by every
    /// class/field/method/parameter annotation (§4.9).
    pub fn referenced_type_names(&self) -> impl Iterator<Item = &str> {
        self.superclass
            .iter()
            .map(String::as_str)
            .chain(self.interfaces.iter().map(String::as_str))
            .chain(self.annotations.iter().map(String::as_str))
            .chain(self.fields.iter().flat_map(|f| f.annotations.iter().map(String::as_str)))
            .chain(self.methods.iter().flat_map(|m| {
                m.annotations
                    .iter()
                    .map(String::as_str)
                    .chain(m.parameter_annotations.iter().flatten().map(String::as_str))
            }))
    }
}

/// A Classfile Unit (§3 Work Unit): "parse this resource from this
/// element", carrying whether it was reached via the include filter
/// (`is_external = false`) or via upward closure (`is_external = true`).
#[derive(Debug, Clone)]
pub struct ClassfileUnit {
    pub element: ElementId,
    pub resource: Resource,
    pub is_external: bool,
}

/// Builds the classfile-scan phase's initial work units from every
/// element's post-masking whitelisted classfile set (§4.8).
pub fn initial_classfile_units(final_order: &[Arc<ClasspathElement>]) -> Vec<ClassfileUnit> {
    final_order
        .iter()
        .flat_map(|element| {
            element.whitelisted_classfiles().into_iter().map(|resource| ClassfileUnit {
                element: element.id,
                resource,
                is_external: false,
            })
        })
        .collect()
}

/// `java/lang/Object.class` (a logical path) back to `java.lang.Object` (a
/// dotted type name) — the inverse of
/// [`crate::resource::classfile_path_for_type_name`].
pub fn type_name_for_resource(logical_path: &str) -> String {
    logical_path.trim_end_matches(".class").replace('/', ".")
}

/// The work-queue processor for the classfile-scan phase (§4.8). Reads the
/// unit's resource, parses it, and — unless parsing or I/O failed, in
/// which case the unit is dropped and the failure logged (§4.11) — pushes
/// the record onto the shared output and, if upward closure is enabled,
/// lets the scheduler enqueue further units for types this record
/// references.
pub fn process_classfile_unit(
    unit: ClassfileUnit,
    nested_archives: &NestedArchiveHandler,
    records: &Mutex<Vec<UnlinkedRecord>>,
    scheduler: &UpwardClosureScheduler,
    enable_class_info: bool,
    handle: &WorkQueueHandle<ClassfileUnit>,
) -> Result<()> {
    handle.monitor().check()?;

    let element = scheduler.element(unit.element);
    let bytes = match element.get_resource(unit.resource.logical_path.as_str(), nested_archives) {
        Ok(bytes) => bytes,
        Err(err) => {
            log::warn!(
                "dropping resource '{}': {}",
                unit.resource.logical_path,
                err
            );
            return Ok(());
        }
    };

    let record = match parse_classfile(&bytes, unit.element, unit.is_external, enable_class_info) {
        Ok(record) => record,
        Err(err) => {
            log::warn!(
                "dropping classfile '{}': {}",
                unit.resource.logical_path,
                err
            );
            return Ok(());
        }
    };

    scheduler.schedule(&record, handle);
    records.lock().expect("unlinked records mutex poisoned").push(record);
    Ok(())
}

/// Parses one classfile's bytes into an [`UnlinkedRecord`]. Returns
/// `Err(ClassfileParse)` for anything short of a well-formed classfile —
/// the caller treats that identically to a resource I/O failure (§4.8,
/// §7): log and drop. `enable_class_info` gates only the level of detail
/// kept in the result: the type's identity, superclass and interfaces
/// (needed by linking and upward closure regardless) are always
/// populated, but when `false` the more expensive field/method/annotation
/// detail is discarded rather than returned, since the bytes still have
/// to be walked to find the end of the classfile either way.
pub fn parse_classfile(
    bytes: &[u8],
    owning_element: ElementId,
    is_external: bool,
    enable_class_info: bool,
) -> Result<UnlinkedRecord> {
    let mut cursor = Cursor::new(bytes);
    let mut record = parse(&mut cursor, owning_element, is_external)
        .chain_err(|| ErrorKind::ClassfileParse(format!("{} bytes", bytes.len())))?;
    if !enable_class_info {
        record.annotations.clear();
        record.fields.clear();
        record.methods.clear();
    }
    Ok(record)
}

#[derive(Debug, Clone)]
enum ConstantPoolEntry {
    Utf8(String),
    Class { name_index: u16 },
    /// Every other tag: not referenced by anything this parser extracts,
    /// but its slot must still exist so later indices resolve correctly.
    Other,
    /// The second slot of a `Long`/`Double`, which the JVM spec leaves
    /// unusable but present (constant pool indices "waste" one entry).
    Unusable,
}

struct ConstantPool(Vec<ConstantPoolEntry>);

impl ConstantPool {
    fn utf8(&self, index: u16) -> Result<&str> {
        match self.0.get(index as usize) {
            Some(ConstantPoolEntry::Utf8(s)) => Ok(s.as_str()),
            _ => Err(ErrorKind::ClassfileParse(format!("constant pool index {index} is not Utf8")).into()),
        }
    }

    fn class_name(&self, index: u16) -> Result<String> {
        match self.0.get(index as usize) {
            Some(ConstantPoolEntry::Class { name_index }) => {
                Ok(internal_name_to_dotted(self.utf8(*name_index)?))
            }
            other => Err(ErrorKind::ClassfileParse(format!(
                "constant pool index {index} is not a Class entry: {other:?}"
            ))
            .into()),
        }
    }
}

fn internal_name_to_dotted(internal: &str) -> String {
    internal.replace('/', ".")
}

fn parse(cursor: &mut Cursor<&[u8]>, owning_element: ElementId, is_external: bool) -> Result<UnlinkedRecord> {
    let magic = cursor.read_u32::<BigEndian>()?;
    if magic != CLASS_MAGIC {
        return Err(ErrorKind::ClassfileParse("bad magic number".to_string()).into());
    }
    let _minor_version = cursor.read_u16::<BigEndian>()?;
    let _major_version = cursor.read_u16::<BigEndian>()?;

    let pool = read_constant_pool(cursor)?;

    let modifiers = cursor.read_u16::<BigEndian>()?;
    let this_class_index = cursor.read_u16::<BigEndian>()?;
    let super_class_index = cursor.read_u16::<BigEndian>()?;
    let type_name = pool.class_name(this_class_index)?;
    let superclass = if super_class_index == 0 {
        None
    } else {
        Some(pool.class_name(super_class_index)?)
    };

    let interfaces_count = cursor.read_u16::<BigEndian>()?;
    let mut interfaces = Vec::with_capacity(interfaces_count as usize);
    for _ in 0..interfaces_count {
        let index = cursor.read_u16::<BigEndian>()?;
        interfaces.push(pool.class_name(index)?);
    }

    let fields_count = cursor.read_u16::<BigEndian>()?;
    let mut fields = Vec::with_capacity(fields_count as usize);
    for _ in 0..fields_count {
        fields.push(read_field(cursor, &pool)?);
    }

    let methods_count = cursor.read_u16::<BigEndian>()?;
    let mut methods = Vec::with_capacity(methods_count as usize);
    for _ in 0..methods_count {
        methods.push(read_method(cursor, &pool)?);
    }

    let mut annotations = Vec::new();
    let mut parameter_annotations_unused = Vec::new();
    read_attributes(cursor, &pool, &mut annotations, &mut parameter_annotations_unused)?;

    Ok(UnlinkedRecord {
        type_name,
        modifiers,
        superclass,
        interfaces,
        annotations,
        fields,
        methods,
        owning_element,
        is_external,
    })
}

fn read_constant_pool(cursor: &mut Cursor<&[u8]>) -> Result<ConstantPool> {
    let count = cursor.read_u16::<BigEndian>()?;
    // Index 0 is unused; entries run from 1..count (exclusive upper bound).
    let mut entries = Vec::with_capacity(count as usize);
    entries.push(ConstantPoolEntry::Other);

    let mut index = 1u16;
    while index < count {
        let tag = cursor.read_u8()?;
        let entry = match tag {
            1 => {
                let length = cursor.read_u16::<BigEndian>()?;
                let mut buf = vec![0u8; length as usize];
                std::io::Read::read_exact(cursor, &mut buf)?;
                ConstantPoolEntry::Utf8(decode_modified_utf8(&buf))
            }
            7 => {
                let name_index = cursor.read_u16::<BigEndian>()?;
                ConstantPoolEntry::Class { name_index }
            }
            3 | 4 => {
                cursor.read_u32::<BigEndian>()?;
                ConstantPoolEntry::Other
            }
            5 | 6 => {
                cursor.read_u64::<BigEndian>()?;
                entries.push(ConstantPoolEntry::Other);
                index += 1;
                // Longs/Doubles occupy two constant pool slots; the second
                // is unusable but still counted.
                ConstantPoolEntry::Unusable
            }
            8 | 16 | 19 | 20 => {
                cursor.read_u16::<BigEndian>()?;
                ConstantPoolEntry::Other
            }
            9 | 10 | 11 | 12 | 18 => {
                cursor.read_u16::<BigEndian>()?;
                cursor.read_u16::<BigEndian>()?;
                ConstantPoolEntry::Other
            }
            15 => {
                cursor.read_u8()?;
                cursor.read_u16::<BigEndian>()?;
                ConstantPoolEntry::Other
            }
            other => {
                return Err(ErrorKind::ClassfileParse(format!("unknown constant pool tag {other}")).into())
            }
        };
        entries.push(entry);
        index += 1;
    }

    Ok(ConstantPool(entries))
}

/// JVM `Utf8` constants use "modified UTF-8" (embedded nulls encoded as two
/// bytes, no 4-byte sequences). None of the names or descriptors this
/// parser extracts legitimately contain either wrinkle, so a lossy
/// standard UTF-8 decode is a faithful enough approximation here.
fn decode_modified_utf8(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

fn read_field(cursor: &mut Cursor<&[u8]>, pool: &ConstantPool) -> Result<FieldRecord> {
    let modifiers = cursor.read_u16::<BigEndian>()?;
    let name_index = cursor.read_u16::<BigEndian>()?;
    let descriptor_index = cursor.read_u16::<BigEndian>()?;
    let name = pool.utf8(name_index)?.to_string();
    let descriptor = pool.utf8(descriptor_index)?.to_string();

    let mut annotations = Vec::new();
    let mut parameter_annotations_unused = Vec::new();
    read_attributes(cursor, pool, &mut annotations, &mut parameter_annotations_unused)?;

    Ok(FieldRecord {
        name,
        descriptor,
        modifiers,
        annotations,
    })
}

fn read_method(cursor: &mut Cursor<&[u8]>, pool: &ConstantPool) -> Result<MethodRecord> {
    let modifiers = cursor.read_u16::<BigEndian>()?;
    let name_index = cursor.read_u16::<BigEndian>()?;
    let descriptor_index = cursor.read_u16::<BigEndian>()?;
    let name = pool.utf8(name_index)?.to_string();
    let descriptor = pool.utf8(descriptor_index)?.to_string();

    let mut annotations = Vec::new();
    let mut parameter_annotations = Vec::new();
    read_attributes(cursor, pool, &mut annotations, &mut parameter_annotations)?;

    Ok(MethodRecord {
        name,
        descriptor,
        modifiers,
        annotations,
        parameter_annotations,
    })
}

/// Reads an `attributes_count` + attribute-array pair — the shape shared
/// by the class, field, and method structures — pulling out annotation
/// type names from `RuntimeVisibleAnnotations`/`RuntimeInvisibleAnnotations`
/// into `annotations`, and from
/// `RuntimeVisibleParameterAnnotations`/`RuntimeInvisibleParameterAnnotations`
/// into `parameter_annotations` (one inner `Vec` per formal parameter).
/// Every other attribute (including `Code`, which this parser never
/// decodes — bytecode is out of scope, §1) is skipped by its declared
/// byte length without interpretation.
fn read_attributes(
    cursor: &mut Cursor<&[u8]>,
    pool: &ConstantPool,
    annotations: &mut Vec<String>,
    parameter_annotations: &mut Vec<Vec<String>>,
) -> Result<()> {
    let count = cursor.read_u16::<BigEndian>()?;
    for _ in 0..count {
        let name_index = cursor.read_u16::<BigEndian>()?;
        let length = cursor.read_u32::<BigEndian>()?;
        let name = pool.utf8(name_index)?;

        match name {
            "RuntimeVisibleAnnotations" | "RuntimeInvisibleAnnotations" => {
                annotations.extend(read_annotations(cursor, pool)?);
            }
            "RuntimeVisibleParameterAnnotations" | "RuntimeInvisibleParameterAnnotations" => {
                let by_parameter = read_parameter_annotations(cursor, pool)?;
                if parameter_annotations.is_empty() {
                    *parameter_annotations = by_parameter;
                } else {
                    for (slot, extra) in parameter_annotations.iter_mut().zip(by_parameter) {
                        slot.extend(extra);
                    }
                }
            }
            _ => {
                let mut buf = vec![0u8; length as usize];
                std::io::Read::read_exact(cursor, &mut buf)?;
            }
        }
    }
    Ok(())
}

fn read_annotations(cursor: &mut Cursor<&[u8]>, pool: &ConstantPool) -> Result<Vec<String>> {
    let count = cursor.read_u16::<BigEndian>()?;
    let mut names = Vec::with_capacity(count as usize);
    for _ in 0..count {
        names.push(read_annotation(cursor, pool)?);
    }
    Ok(names)
}

fn read_parameter_annotations(cursor: &mut Cursor<&[u8]>, pool: &ConstantPool) -> Result<Vec<Vec<String>>> {
    let num_parameters = cursor.read_u8()?;
    let mut by_parameter = Vec::with_capacity(num_parameters as usize);
    for _ in 0..num_parameters {
        by_parameter.push(read_annotations(cursor, pool)?);
    }
    Ok(by_parameter)
}

/// Reads one `annotation` structure, returning the dotted type name its
/// descriptor (`Lcom/x/Foo;`) names. Element-value pairs are walked (not
/// just skipped) because a nested or array-of-annotation element value
/// would otherwise desynchronize the cursor for everything that follows.
fn read_annotation(cursor: &mut Cursor<&[u8]>, pool: &ConstantPool) -> Result<String> {
    let type_index = cursor.read_u16::<BigEndian>()?;
    let descriptor = pool.utf8(type_index)?;
    let type_name = descriptor_to_dotted_type_name(descriptor);

    let num_pairs = cursor.read_u16::<BigEndian>()?;
    for _ in 0..num_pairs {
        let _element_name_index = cursor.read_u16::<BigEndian>()?;
        skip_element_value(cursor, pool)?;
    }
    Ok(type_name)
}

fn skip_element_value(cursor: &mut Cursor<&[u8]>, pool: &ConstantPool) -> Result<()> {
    let tag = cursor.read_u8()?;
    match tag {
        b'B' | b'C' | b'D' | b'F' | b'I' | b'J' | b'S' | b'Z' | b's' => {
            cursor.read_u16::<BigEndian>()?;
        }
        b'e' => {
            cursor.read_u16::<BigEndian>()?;
            cursor.read_u16::<BigEndian>()?;
        }
        b'c' => {
            cursor.read_u16::<BigEndian>()?;
        }
        b'@' => {
            read_annotation(cursor, pool)?;
        }
        b'[' => {
            let count = cursor.read_u16::<BigEndian>()?;
            for _ in 0..count {
                skip_element_value(cursor, pool)?;
            }
        }
        other => {
            return Err(ErrorKind::ClassfileParse(format!("unknown element-value tag '{other}'")).into())
        }
    }
    Ok(())
}

/// `Lcom/x/Foo;` -> `com.x.Foo`. Annotation descriptors are always object
/// types in the JVM spec (primitives and arrays cannot be annotation
/// types), so the leading `L` and trailing `;` are unconditionally
/// present.
fn descriptor_to_dotted_type_name(descriptor: &str) -> String {
    let trimmed = descriptor.strip_prefix('L').and_then(|s| s.strip_suffix(';')).unwrap_or(descriptor);
    internal_name_to_dotted(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Hand-assembles the minimal classfile bytes for:
    /// `public class com.x.A extends com.x.B implements com.x.I`, with no
    /// fields or methods and no class-level annotations. Good enough to
    /// exercise every structural read this parser does outside of
    /// annotations.
    fn minimal_classfile(this_name: &str, super_name: Option<&str>, interface_names: &[&str]) -> Vec<u8> {
        let mut pool_entries: Vec<Vec<u8>> = Vec::new();
        let mut utf8_index = HashMapLike::new();

        let mut intern_utf8 = |name: &str, pool_entries: &mut Vec<Vec<u8>>, utf8_index: &mut HashMapLike| -> u16 {
            if let Some(&idx) = utf8_index.get(name) {
                return idx;
            }
            let mut entry = vec![1u8];
            entry.extend((name.len() as u16).to_be_bytes());
            entry.extend(name.as_bytes());
            pool_entries.push(entry);
            let idx = pool_entries.len() as u16; // 1-based, entry 0 is reserved
            utf8_index.insert(name.to_string(), idx);
            idx
        };

        let mut intern_class = |internal_name: &str, pool_entries: &mut Vec<Vec<u8>>, utf8_index: &mut HashMapLike| -> u16 {
            let name_idx = intern_utf8(internal_name, pool_entries, utf8_index);
            let mut entry = vec![7u8];
            entry.extend(name_idx.to_be_bytes());
            pool_entries.push(entry);
            pool_entries.len() as u16
        };

        let this_internal = this_name.replace('.', "/");
        let this_idx = intern_class(&this_internal, &mut pool_entries, &mut utf8_index);
        let super_idx = super_name
            .map(|s| intern_class(&s.replace('.', "/"), &mut pool_entries, &mut utf8_index))
            .unwrap_or(0);
        let interface_indices: Vec<u16> = interface_names
            .iter()
            .map(|s| intern_class(&s.replace('.', "/"), &mut pool_entries, &mut utf8_index))
            .collect();

        let mut bytes = Vec::new();
        bytes.extend(CLASS_MAGIC.to_be_bytes());
        bytes.extend(0u16.to_be_bytes()); // minor
        bytes.extend(52u16.to_be_bytes()); // major (Java 8)

        let constant_pool_count = (pool_entries.len() + 1) as u16;
        bytes.extend(constant_pool_count.to_be_bytes());
        for entry in &pool_entries {
            bytes.extend(entry);
        }

        bytes.extend(0x0021u16.to_be_bytes()); // access_flags: PUBLIC | SUPER
        bytes.extend(this_idx.to_be_bytes());
        bytes.extend(super_idx.to_be_bytes());

        bytes.extend((interface_indices.len() as u16).to_be_bytes());
        for idx in &interface_indices {
            bytes.extend(idx.to_be_bytes());
        }

        bytes.extend(0u16.to_be_bytes()); // fields_count
        bytes.extend(0u16.to_be_bytes()); // methods_count
        bytes.extend(0u16.to_be_bytes()); // attributes_count
        bytes
    }

    /// A tiny linear-scan stand-in for a `HashMap<String, u16>` so the test
    /// helper above doesn't need another import just for interning.
    struct HashMapLike(Vec<(String, u16)>);
    impl HashMapLike {
        fn new() -> Self {
            HashMapLike(Vec::new())
        }
        fn get(&self, key: &str) -> Option<&u16> {
            self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
        }
        fn insert(&mut self, key: String, value: u16) {
            self.0.push((key, value));
        }
    }

    #[test]
    fn parses_type_name_superclass_and_interfaces() {
        let bytes = minimal_classfile("com.x.A", Some("com.x.B"), &["com.x.I"]);
        let record = parse_classfile(&bytes, 0, false, true).unwrap();
        assert_eq!(record.type_name, "com.x.A");
        assert_eq!(record.superclass.as_deref(), Some("com.x.B"));
        assert_eq!(record.interfaces, vec!["com.x.I".to_string()]);
        assert!(!record.is_external);
    }

    #[test]
    fn object_has_no_superclass() {
        let bytes = minimal_classfile("java.lang.Object", None, &[]);
        let record = parse_classfile(&bytes, 0, false, true).unwrap();
        assert_eq!(record.superclass, None);
    }

    #[test]
    fn bad_magic_is_a_parse_error() {
        let mut bytes = minimal_classfile("com.x.A", None, &[]);
        bytes[0] = 0;
        assert!(parse_classfile(&bytes, 0, false, true).is_err());
    }

    #[test]
    fn disabling_class_info_keeps_identity_but_drops_member_detail() {
        let bytes = minimal_classfile("com.x.A", Some("com.x.B"), &["com.x.I"]);
        let record = parse_classfile(&bytes, 0, false, false).unwrap();
        assert_eq!(record.type_name, "com.x.A");
        assert_eq!(record.superclass.as_deref(), Some("com.x.B"));
        assert_eq!(record.interfaces, vec!["com.x.I".to_string()]);
        assert!(record.fields.is_empty());
        assert!(record.methods.is_empty());
        assert!(record.annotations.is_empty());
    }

    #[test]
    fn descriptor_to_dotted_name() {
        assert_eq!(descriptor_to_dotted_type_name("Lcom/x/Foo;"), "com.x.Foo");
    }

    #[test]
    fn resource_path_to_type_name() {
        assert_eq!(type_name_for_resource("com/x/Foo.class"), "com.x.Foo");
    }
}
