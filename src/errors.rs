//! The error hierarchy shared by every phase of the scan engine.
//!
//! Per-artifact failures (a single element failing to open, a single
//! classfile failing to parse) are caught at their call site, logged, and
//! turned into a skip — they never reach this type. Only cancellation,
//! an unexpected worker failure, or a failure-hook error become a terminal
//! `Error` that aborts the scan.
use std::path::PathBuf;

error_chain::error_chain! {
    errors {
        OpenElement(path: String) {
            description("classpath element open error")
            display("failed to open classpath element '{}'", path)
        }
        ManifestRead(path: PathBuf) {
            description("manifest read error")
            display("failed to read the manifest of '{}'", path.display())
        }
        ClassfileParse(logical_path: String) {
            description("classfile parse error")
            display("failed to parse classfile '{}'", logical_path)
        }
        ResourceIo(logical_path: String) {
            description("resource i/o error")
            display("i/o error while reading resource '{}'", logical_path)
        }
        Cancelled {
            description("scan cancelled")
            display("scan was cancelled")
        }
        WorkerPanic(detail: String) {
            description("worker failure")
            display("a scan worker failed unexpectedly: {}", detail)
        }
        FailureHook {
            description("failure hook error")
            display("the caller-supplied failure hook itself failed")
        }
        RemoteFetch(url: String) {
            description("remote fetch error")
            display("failed to fetch remote archive '{}'", url)
        }
    }

    foreign_links {
        Io(std::io::Error);
        Zip(zip::result::ZipError);
    }
}
