//! A handle to one addressable artifact inside a classpath element.
use std::time::SystemTime;

/// A resource's path relative to its containing element's root, always
/// using forward slashes regardless of host path syntax.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LogicalPath(String);

impl LogicalPath {
    pub fn new(path: impl Into<String>) -> Self {
        LogicalPath(path.into().replace('\\', "/"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_classfile(&self) -> bool {
        self.0.ends_with(".class")
    }

    /// Whether this path lies under any of the given nested-root prefixes
    /// (§4.5): each prefix already carries its trailing separator.
    pub fn is_under_any_prefix<'a>(&self, prefixes: impl IntoIterator<Item = &'a str>) -> bool {
        prefixes.into_iter().any(|prefix| self.0.starts_with(prefix))
    }
}

impl std::fmt::Display for LogicalPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One artifact discovered during a path scan, before masking.
#[derive(Debug, Clone)]
pub struct Resource {
    pub logical_path: LogicalPath,
    pub last_modified: Option<SystemTime>,
}

impl Resource {
    pub fn new(logical_path: LogicalPath, last_modified: Option<SystemTime>) -> Self {
        Resource {
            logical_path,
            last_modified,
        }
    }

    pub fn is_classfile(&self) -> bool {
        self.logical_path.is_classfile()
    }
}

/// Converts a dotted binary type name (`java.lang.Object`) into the
/// classfile resource path that would hold it (`java/lang/Object.class`).
/// Used by the Upward-Closure Scheduler (§4.9) to probe elements for a
/// referenced type.
pub fn classfile_path_for_type_name(type_name: &str) -> LogicalPath {
    LogicalPath::new(format!("{}.class", type_name.replace('.', "/")))
}

/// The dotted package name of a dotted type name (`com.x.T` -> `com.x`;
/// `Toplevel` -> `""`). Shared by the package include/exclude check
/// (§4.6, §6) and the Linker's package materialization (§4.10) so both
/// agree on what "the package of a type" means.
pub fn package_name_of(type_name: &str) -> String {
    match type_name.rfind('.') {
        Some(idx) => type_name[..idx].to_string(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classfile_detection() {
        assert!(LogicalPath::new("com/x/T.class").is_classfile());
        assert!(!LogicalPath::new("META-INF/MANIFEST.MF").is_classfile());
    }

    #[test]
    fn type_name_mapping() {
        assert_eq!(
            classfile_path_for_type_name("java.lang.Object").as_str(),
            "java/lang/Object.class"
        );
    }

    #[test]
    fn nested_root_prefix_matching() {
        let path = LogicalPath::new("sub.jar/com/x/T.class");
        assert!(path.is_under_any_prefix(["sub.jar/"]));
        assert!(!path.is_under_any_prefix(["other.jar/"]));
    }
}
