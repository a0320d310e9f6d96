//! Detection of interactive shells installed on the host.
//!
//! The registry is computed once at startup and read-only afterwards. Each
//! known shell is looked up against a fixed list of plausible install
//! locations; shells that are not installed are simply omitted.

use std::path::Path;

use serde::Serialize;
use thiserror::Error;

/// Candidate shells and where they are usually installed.
const KNOWN_SHELLS: &[(&str, &str, &[&str])] = &[
    (
        "bash",
        "Bash",
        &[
            "/bin/bash",
            "/usr/bin/bash",
            "/usr/local/bin/bash",
            "/opt/homebrew/bin/bash",
        ],
    ),
    (
        "zsh",
        "Zsh",
        &[
            "/bin/zsh",
            "/usr/bin/zsh",
            "/usr/local/bin/zsh",
            "/opt/homebrew/bin/zsh",
        ],
    ),
    (
        "fish",
        "Fish",
        &["/usr/local/bin/fish", "/opt/homebrew/bin/fish", "/usr/bin/fish"],
    ),
    ("sh", "Sh", &["/bin/sh", "/usr/bin/sh"]),
];

/// An installed shell, addressable by its short id.
#[derive(Debug, Clone, Serialize)]
pub struct Shell {
    pub id: String,
    pub name: String,
    pub path: String,
}

/// The requested shell id is not installed on this host.
#[derive(Debug, Error)]
#[error("shell \"{0}\" is not available")]
pub struct ShellUnavailable(pub String);

/// Read-only registry of shells found on the host.
#[derive(Debug, Default)]
pub struct ShellRegistry {
    shells: Vec<Shell>,
}

impl ShellRegistry {
    /// Probe the known install paths and record the first hit per shell.
    pub fn detect() -> Self {
        let shells = KNOWN_SHELLS
            .iter()
            .filter_map(|(id, name, paths)| {
                paths.iter().find(|p| Path::new(p).exists()).map(|path| Shell {
                    id: (*id).to_string(),
                    name: (*name).to_string(),
                    path: (*path).to_string(),
                })
            })
            .collect();
        Self { shells }
    }

    pub fn list(&self) -> &[Shell] {
        &self.shells
    }

    /// Map a shell id to its executable path.
    ///
    /// `None` means "no explicit interpreter" and resolves to `Ok(None)`;
    /// tmux then picks its own default shell.
    pub fn resolve(&self, id: Option<&str>) -> Result<Option<String>, ShellUnavailable> {
        match id {
            None => Ok(None),
            Some(id) => self
                .shells
                .iter()
                .find(|s| s.id == id)
                .map(|s| Some(s.path.clone()))
                .ok_or_else(|| ShellUnavailable(id.to_string())),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_shells(shells: Vec<Shell>) -> Self {
        Self { shells }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_sh_on_unix() {
        let registry = ShellRegistry::detect();
        assert!(
            registry.list().iter().any(|s| s.id == "sh"),
            "expected /bin/sh to be present"
        );
    }

    #[test]
    fn resolve_none_means_default_shell() {
        let registry = ShellRegistry::detect();
        assert!(registry.resolve(None).unwrap().is_none());
    }

    #[test]
    fn resolve_unknown_shell_fails() {
        let registry = ShellRegistry::with_shells(vec![]);
        let err = registry.resolve(Some("zsh")).unwrap_err();
        assert_eq!(err.0, "zsh");
    }

    #[test]
    fn resolve_known_shell_returns_path() {
        let registry = ShellRegistry::with_shells(vec![Shell {
            id: "bash".to_string(),
            name: "Bash".to_string(),
            path: "/bin/bash".to_string(),
        }]);
        assert_eq!(
            registry.resolve(Some("bash")).unwrap().as_deref(),
            Some("/bin/bash")
        );
    }
}
