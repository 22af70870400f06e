//! Binary image classification
//!
//! Decides whether a loaded image is the application's own executable, a
//! framework shipped inside the application's bundle, or anything else.
//! Only the path strings are compared; nothing is read from disk.

use appinsights_core::domain::BinaryImageType;

const BUNDLE_EXTENSION: &str = ".app";
const SWIFT_RUNTIME_MARKER: &str = "frameworks/libswift";

/// Classifies the image at `image_path` relative to the running process.
///
/// Comparison is case-insensitive on lexically standardized paths.
pub fn image_type_for_image_path(image_path: &str, process_path: &str) -> BinaryImageType {
    let image = standardize_path(&image_path.to_lowercase());
    let process = standardize_path(&process_path.to_lowercase());

    if image.is_empty() || process.is_empty() {
        return BinaryImageType::Other;
    }
    if image == process {
        return BinaryImageType::AppBinary;
    }
    // The Swift runtime copied into the bundle is not app code.
    if image.contains(SWIFT_RUNTIME_MARKER) {
        return BinaryImageType::Other;
    }

    match bundle_directory(&process) {
        Some(bundle) if is_within(&image, bundle) => BinaryImageType::AppFramework,
        _ => BinaryImageType::Other,
    }
}

/// Resolves `.`, `..` and repeated separators without touching the
/// filesystem. A trailing separator is dropped.
pub fn standardize_path(path: &str) -> String {
    let absolute = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();

    for component in path.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                if parts.last().is_some_and(|last| *last != "..") {
                    parts.pop();
                } else if !absolute {
                    parts.push("..");
                }
            }
            other => parts.push(other),
        }
    }

    let joined = parts.join("/");
    if absolute {
        format!("/{joined}")
    } else {
        joined
    }
}

/// The directory that contains the application's bundled code: the
/// innermost `.app` ancestor of the executable, or else its parent directory.
fn bundle_directory(process_path: &str) -> Option<&str> {
    let mut end = process_path.len();
    while let Some(slash) = process_path[..end].rfind('/') {
        let ancestor = &process_path[..slash];
        if ancestor.ends_with(BUNDLE_EXTENSION) {
            return Some(ancestor);
        }
        end = slash;
    }

    let parent = &process_path[..process_path.rfind('/')?];
    if parent.is_empty() {
        // Executable directly under `/`; treating `/` as the bundle would
        // claim every image.
        None
    } else {
        Some(parent)
    }
}

/// Component-wise prefix check on standardized paths.
fn is_within(path: &str, dir: &str) -> bool {
    path.strip_prefix(dir)
        .is_some_and(|rest| rest.starts_with('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standardize_path() {
        assert_eq!(standardize_path("/a/./b//c/"), "/a/b/c");
        assert_eq!(standardize_path("/a/b/../c"), "/a/c");
        assert_eq!(standardize_path("/../a"), "/a");
        assert_eq!(standardize_path("a/../../b"), "../b");
        assert_eq!(standardize_path(""), "");
        assert_eq!(standardize_path("/"), "/");
    }

    #[test]
    fn test_app_binary() {
        assert_eq!(
            image_type_for_image_path("/var/app/MyApp", "/var/app/MyApp"),
            BinaryImageType::AppBinary
        );
    }

    #[test]
    fn test_app_binary_is_case_insensitive_and_standardized() {
        assert_eq!(
            image_type_for_image_path("/VAR/app/./Frameworks/../MyApp", "/var/APP/MyApp"),
            BinaryImageType::AppBinary
        );
    }

    #[test]
    fn test_app_framework() {
        assert_eq!(
            image_type_for_image_path(
                "/var/app/MyApp.app/Frameworks/Foo.framework/Foo",
                "/var/app/MyApp"
            ),
            BinaryImageType::AppFramework
        );
    }

    #[test]
    fn test_app_framework_inside_bundle() {
        let process = "/private/var/containers/Bundle/Application/ABC/MyApp.app/MyApp";
        assert_eq!(
            image_type_for_image_path(
                "/private/var/containers/Bundle/Application/ABC/MyApp.app/Frameworks/Kit.framework/Kit",
                process
            ),
            BinaryImageType::AppFramework
        );
        assert_eq!(
            image_type_for_image_path(
                "/private/var/containers/Bundle/Application/ABC/Other.txt",
                process
            ),
            BinaryImageType::Other
        );
    }

    #[test]
    fn test_system_library_is_other() {
        assert_eq!(
            image_type_for_image_path("/usr/lib/libSystem.dylib", "/var/app/MyApp"),
            BinaryImageType::Other
        );
    }

    #[test]
    fn test_swift_runtime_is_other() {
        assert_eq!(
            image_type_for_image_path(
                "/var/app/MyApp.app/Frameworks/libswiftCore.dylib",
                "/var/app/MyApp.app/MyApp"
            ),
            BinaryImageType::Other
        );
    }

    #[test]
    fn test_sibling_prefix_is_not_inside() {
        assert_eq!(
            image_type_for_image_path("/var/application/lib.so", "/var/app/MyApp"),
            BinaryImageType::Other
        );
    }

    #[test]
    fn test_empty_paths_are_other() {
        assert_eq!(image_type_for_image_path("", "/var/app/MyApp"), BinaryImageType::Other);
        assert_eq!(image_type_for_image_path("/var/app/MyApp", ""), BinaryImageType::Other);
    }

    #[test]
    fn test_root_executable_does_not_claim_everything() {
        assert_eq!(
            image_type_for_image_path("/usr/lib/libc.so.6", "/init"),
            BinaryImageType::Other
        );
    }
}
