//! Keyring availability detection
//!
//! The OS keyring is unreliable in WSL, containers, CI runners and headless
//! Linux sessions: the secret service may be missing, locked, or silently
//! scoped to a session that disappears. Detection runs once when the store
//! is opened and only decides whether the keyring is worth trying.

use std::path::Path;

/// Source of environment facts, abstracted for tests.
pub trait Probe {
    fn var(&self, name: &str) -> Option<String>;
    fn read_file(&self, path: &Path) -> Option<String>;
    fn exists(&self, path: &Path) -> bool;
    fn is_linux(&self) -> bool;
}

/// Probe backed by the real process environment and filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProbe;

impl Probe for SystemProbe {
    fn var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok().filter(|v| !v.is_empty())
    }

    fn read_file(&self, path: &Path) -> Option<String> {
        std::fs::read_to_string(path).ok()
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn is_linux(&self) -> bool {
        cfg!(target_os = "linux")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyringSupport {
    Usable,
    Unusable(String),
}

impl KeyringSupport {
    pub fn is_usable(&self) -> bool {
        matches!(self, KeyringSupport::Usable)
    }
}

const CONTAINER_CGROUP_MARKERS: &[&str] = &["docker", "kubepods", "lxc", "containerd"];

/// Decide whether the OS keyring should be attempted in this environment.
pub fn detect_keyring_support(probe: &dyn Probe) -> KeyringSupport {
    if !probe.is_linux() {
        return KeyringSupport::Usable;
    }

    if probe.var("WSL_DISTRO_NAME").is_some()
        || probe
            .read_file(Path::new("/proc/version"))
            .is_some_and(|v| v.to_ascii_lowercase().contains("microsoft"))
    {
        return KeyringSupport::Unusable("running under WSL".into());
    }

    if probe.exists(Path::new("/.dockerenv"))
        || probe.exists(Path::new("/run/.containerenv"))
        || probe.var("container").is_some()
        || probe
            .read_file(Path::new("/proc/1/cgroup"))
            .is_some_and(|c| CONTAINER_CGROUP_MARKERS.iter().any(|m| c.contains(m)))
    {
        return KeyringSupport::Unusable("running inside a container".into());
    }

    if probe.var("CI").is_some() {
        return KeyringSupport::Unusable("running in CI".into());
    }

    let has_session = ["DISPLAY", "WAYLAND_DISPLAY", "DBUS_SESSION_BUS_ADDRESS"]
        .iter()
        .any(|name| probe.var(name).is_some());
    if !has_session {
        return KeyringSupport::Unusable("no display or D-Bus session (headless)".into());
    }

    KeyringSupport::Usable
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::path::PathBuf;

    #[derive(Default)]
    pub(crate) struct FakeProbe {
        pub linux: bool,
        pub vars: HashMap<String, String>,
        pub files: HashMap<PathBuf, String>,
        pub paths: HashSet<PathBuf>,
    }

    impl FakeProbe {
        pub(crate) fn linux_desktop() -> Self {
            let mut probe = FakeProbe {
                linux: true,
                ..Default::default()
            };
            probe.vars.insert("DISPLAY".into(), ":0".into());
            probe
        }

        pub(crate) fn linux_headless() -> Self {
            FakeProbe {
                linux: true,
                ..Default::default()
            }
        }
    }

    impl Probe for FakeProbe {
        fn var(&self, name: &str) -> Option<String> {
            self.vars.get(name).cloned()
        }

        fn read_file(&self, path: &Path) -> Option<String> {
            self.files.get(path).cloned()
        }

        fn exists(&self, path: &Path) -> bool {
            self.paths.contains(path) || self.files.contains_key(path)
        }

        fn is_linux(&self) -> bool {
            self.linux
        }
    }

    #[test]
    fn non_linux_is_usable() {
        let probe = FakeProbe::default();
        assert_eq!(detect_keyring_support(&probe), KeyringSupport::Usable);
    }

    #[test]
    fn linux_desktop_is_usable() {
        assert!(detect_keyring_support(&FakeProbe::linux_desktop()).is_usable());

        let mut wayland = FakeProbe::linux_headless();
        wayland.vars.insert("WAYLAND_DISPLAY".into(), "wayland-0".into());
        assert!(detect_keyring_support(&wayland).is_usable());
    }

    #[test]
    fn headless_linux_is_unusable() {
        let support = detect_keyring_support(&FakeProbe::linux_headless());
        assert!(matches!(support, KeyringSupport::Unusable(ref r) if r.contains("headless")));
    }

    #[test]
    fn wsl_is_unusable() {
        let mut probe = FakeProbe::linux_desktop();
        probe.files.insert(
            PathBuf::from("/proc/version"),
            "Linux version 5.15.90.1-microsoft-standard-WSL2".into(),
        );
        let support = detect_keyring_support(&probe);
        assert!(matches!(support, KeyringSupport::Unusable(ref r) if r.contains("WSL")));
    }

    #[test]
    fn containers_are_unusable() {
        let mut docker = FakeProbe::linux_desktop();
        docker.paths.insert(PathBuf::from("/.dockerenv"));
        assert!(!detect_keyring_support(&docker).is_usable());

        let mut k8s = FakeProbe::linux_desktop();
        k8s.files.insert(
            PathBuf::from("/proc/1/cgroup"),
            "0::/kubepods/besteffort/pod1234".into(),
        );
        assert!(!detect_keyring_support(&k8s).is_usable());

        let mut podman = FakeProbe::linux_desktop();
        podman.vars.insert("container".into(), "podman".into());
        assert!(!detect_keyring_support(&podman).is_usable());
    }

    #[test]
    fn ci_is_unusable() {
        let mut probe = FakeProbe::linux_desktop();
        probe.vars.insert("CI".into(), "true".into());
        assert!(!detect_keyring_support(&probe).is_usable());
    }
}
