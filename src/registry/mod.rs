//! The fixed set of probes a scan runs.
//!
//! Probe contract: a probe is a shell program run with the probe root as its
//! working directory. It prints one issue per line on stdout. Its exit code is
//! its own convention: a non-zero exit with output is still a successful run,
//! only a non-zero exit with no output counts as a failure.

use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::{DetectorInfo, DetectorStatus};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectorSpec {
    pub script: String,
    pub display_name: String,
    pub description: String,
}

impl DetectorSpec {
    pub fn new(
        script: impl Into<String>,
        display_name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            script: script.into(),
            display_name: display_name.into(),
            description: description.into(),
        }
    }

    pub fn path(&self, root: &Path) -> PathBuf {
        root.join(&self.script)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registry {
    specs: Vec<DetectorSpec>,
}

impl Registry {
    pub fn new(specs: Vec<DetectorSpec>) -> Result<Self> {
        if specs.is_empty() {
            return Err(anyhow!("検出スクリプトが1件も登録されていません"));
        }
        for spec in &specs {
            if spec.script.trim().is_empty() {
                return Err(anyhow!(
                    "検出スクリプトのパスが空です: {}",
                    spec.display_name
                ));
            }
            if Path::new(&spec.script).is_absolute() {
                return Err(anyhow!(
                    "検出スクリプトのパスはルートからの相対パスで指定してください: {}",
                    spec.script
                ));
            }
        }
        Ok(Self { specs })
    }

    pub fn builtin() -> Self {
        Self {
            specs: vec![
                DetectorSpec::new(
                    "scripts/007-diagnostics/detect_failed_services.sh",
                    "Failed Services",
                    "Identifies systemd services that failed to start",
                ),
                DetectorSpec::new(
                    "scripts/007-diagnostics/detect_orphaned_services.sh",
                    "Orphaned Services",
                    "Finds services referencing executables that no longer exist",
                ),
                DetectorSpec::new(
                    "scripts/007-diagnostics/detect_network_wait_issues.sh",
                    "Network Wait Issues",
                    "Detects NetworkManager-wait-online timeout problems",
                ),
                DetectorSpec::new(
                    "scripts/007-diagnostics/detect_unsupported_snaps.sh",
                    "Unsupported Snaps",
                    "Identifies snaps incompatible with your Ubuntu version",
                ),
                DetectorSpec::new(
                    "scripts/007-diagnostics/detect_cosmetic_warnings.sh",
                    "Cosmetic Warnings",
                    "Known harmless warnings (ALSA, GNOME keyring, etc.)",
                ),
            ],
        }
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn get(&self, id: usize) -> Option<&DetectorSpec> {
        self.specs.get(id)
    }

    pub fn specs(&self) -> &[DetectorSpec] {
        &self.specs
    }

    pub fn detector_infos(&self) -> Vec<DetectorInfo> {
        self.specs
            .iter()
            .enumerate()
            .map(|(id, spec)| DetectorInfo {
                id,
                script: spec.script.clone(),
                display_name: spec.display_name.clone(),
                description: spec.description.clone(),
                status: DetectorStatus::Pending,
                issue_count: 0,
                error: None,
                duration: None,
            })
            .collect()
    }

    pub fn missing(&self, root: &Path) -> Vec<&DetectorSpec> {
        self.specs
            .iter()
            .filter(|spec| !spec.path(root).is_file())
            .collect()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[test]
    fn builtin_registry_has_five_pending_detectors() {
        let registry = Registry::builtin();
        let infos = registry.detector_infos();
        assert_eq!(infos.len(), 5);
        assert!(infos.iter().all(|i| i.status == DetectorStatus::Pending));
        assert_eq!(infos[3].id, 3);
        assert_eq!(infos[0].display_name, "Failed Services");
    }

    #[test]
    fn rejects_empty_and_absolute_entries() {
        assert!(Registry::new(vec![]).is_err());
        assert!(Registry::new(vec![DetectorSpec::new("/bin/true", "x", "y")]).is_err());
        assert!(Registry::new(vec![DetectorSpec::new(" ", "x", "y")]).is_err());
        assert!(Registry::new(vec![DetectorSpec::new("probes/a.sh", "x", "y")]).is_ok());
    }

    #[test]
    fn missing_lists_scripts_absent_from_root() {
        static SEQ: AtomicU64 = AtomicU64::new(0);
        let seq = SEQ.fetch_add(1, Ordering::Relaxed);
        let root = std::env::temp_dir().join(format!(
            "bootdiag-registry-test-{}-{seq}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&root);
        std::fs::create_dir_all(root.join("probes")).expect("mkdirs");
        std::fs::write(root.join("probes/present.sh"), b"exit 0\n").expect("write");

        let registry = Registry::new(vec![
            DetectorSpec::new("probes/present.sh", "Present", ""),
            DetectorSpec::new("probes/absent.sh", "Absent", ""),
        ])
        .expect("registry");
        let missing = registry.missing(&root);
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].display_name, "Absent");

        let _ = std::fs::remove_dir_all(&root);
    }
}
