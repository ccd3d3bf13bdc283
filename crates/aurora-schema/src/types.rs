//! User-selectable installer settings.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which backend executes install sessions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum InstallMethod {
    /// OS package-installer sessions, confirmed through the status relay (default).
    #[default]
    Standard,
    /// `pm install-*` commands over a superuser shell.
    Root,
}

impl fmt::Display for InstallMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Standard => f.write_str("standard"),
            Self::Root => f.write_str("root"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct Wrapper {
        method: InstallMethod,
    }

    #[test]
    fn test_method_parses_lowercase() {
        let w: Wrapper = toml::from_str("method = \"root\"").unwrap();
        assert_eq!(w.method, InstallMethod::Root);
        assert_eq!(InstallMethod::default(), InstallMethod::Standard);
        assert_eq!(InstallMethod::Root.to_string(), "root");
    }
}
