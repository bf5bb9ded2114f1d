//! Locating the adb executable.

use std::path::{Path, PathBuf};

/// Resolve the adb executable.
///
/// The search order is:
/// 1. An explicit `PROBE_RELAY_ADB` override.
/// 2. The current PATH via `which`.
/// 3. `$ANDROID_SDK_ROOT`/`$ANDROID_HOME` platform-tools.
/// 4. A bare `adb`, deferring to PATH lookup at spawn time.
#[must_use]
pub fn resolve_adb() -> PathBuf {
    if let Ok(path) = std::env::var("PROBE_RELAY_ADB") {
        return PathBuf::from(path);
    }
    if let Ok(found) = which::which("adb") {
        return found;
    }
    if let Ok(sdk_root) =
        std::env::var("ANDROID_SDK_ROOT").or_else(|_| std::env::var("ANDROID_HOME"))
    {
        let candidate = Path::new(&sdk_root).join("platform-tools").join("adb");
        if candidate.is_file() {
            return candidate;
        }
    }
    PathBuf::from("adb")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_yields_some_path() {
        // Whatever the host environment looks like, resolution never
        // produces an empty path.
        let path = resolve_adb();
        assert!(!path.as_os_str().is_empty());
    }
}
