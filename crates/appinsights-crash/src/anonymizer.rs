//! Path anonymization for crash reports
//!
//! Image and process paths often run through a user's home directory.
//! The user name component is replaced with a fixed placeholder before the
//! path leaves the device.

/// Placeholder substituted for the user name.
pub const USER_PLACEHOLDER: &str = "USER";

const HOME_ROOTS: [&str; 2] = ["/Users/", "/home/"];

/// Replaces the user name in `/Users/<name>/...` and `/home/<name>/...`
/// paths. Other paths are returned unchanged.
pub fn anonymize_path(path: &str) -> String {
    for root in HOME_ROOTS {
        let Some(start) = path.find(root) else {
            continue;
        };
        let name_start = start + root.len();
        let rest = &path[name_start..];
        let name_len = rest.find('/').unwrap_or(rest.len());
        if name_len == 0 {
            continue;
        }

        let mut result = String::with_capacity(path.len());
        result.push_str(&path[..name_start]);
        result.push_str(USER_PLACEHOLDER);
        result.push_str(&rest[name_len..]);
        return result;
    }
    path.to_string()
}

/// Applies [`anonymize_path`] only when anonymization is enabled.
#[derive(Debug, Clone, Copy)]
pub struct Anonymizer {
    enabled: bool,
}

impl Anonymizer {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn anonymize(&self, path: &str) -> String {
        if self.enabled {
            anonymize_path(path)
        } else {
            path.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_macos_home() {
        assert_eq!(
            anonymize_path("/Users/jane/Library/Developer/MyApp.app/MyApp"),
            "/Users/USER/Library/Developer/MyApp.app/MyApp"
        );
    }

    #[test]
    fn test_linux_home() {
        assert_eq!(
            anonymize_path("/home/jdoe/.cargo/bin/tool"),
            "/home/USER/.cargo/bin/tool"
        );
        assert_eq!(anonymize_path("/home/jdoe"), "/home/USER");
    }

    #[test]
    fn test_other_paths_unchanged() {
        assert_eq!(anonymize_path("/usr/lib/libc.so.6"), "/usr/lib/libc.so.6");
        assert_eq!(anonymize_path("/home/"), "/home/");
        assert_eq!(anonymize_path(""), "");
    }

    #[test]
    fn test_disabled_anonymizer_is_identity() {
        let path = "/home/jdoe/app";
        assert_eq!(Anonymizer::new(false).anonymize(path), path);
        assert_eq!(Anonymizer::new(true).anonymize(path), "/home/USER/app");
    }
}
