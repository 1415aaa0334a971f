//! Directory layout for clusters and shared engine binaries.

use std::path::{Path, PathBuf};

use crate::error::{ConfigError, KestrelError, Result};

/// Name of the home directory under the user's home.
const HOME_DIR: &str = ".kestrel";

/// Directory layout of a single cluster.
///
/// ```text
/// <home>/
///   share/<product>/<version>/   pinned engine binaries
///   clusters/<name>/             cluster working directory
///     state.json, state.lock
///     terraform/                 infrastructure project
///     config/                    configuration project
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterPaths {
    /// Kestrel home directory.
    pub home: PathBuf,
    /// Working directory of the cluster.
    pub cluster_dir: PathBuf,
}

impl ClusterPaths {
    /// Resolves the layout for a cluster.
    ///
    /// `home` defaults to `~/.kestrel`; `cluster_dir` defaults to
    /// `<home>/clusters/<name>`.
    ///
    /// # Errors
    ///
    /// Returns an error if no home directory is given and the user's home
    /// cannot be determined.
    pub fn resolve(home: Option<PathBuf>, cluster_dir: Option<PathBuf>, name: &str) -> Result<Self> {
        let home = match home {
            Some(home) => home,
            None => dirs::home_dir()
                .map(|h| h.join(HOME_DIR))
                .ok_or_else(|| {
                    KestrelError::Config(ConfigError::NoWorkingDirectory {
                        message: String::from("cannot determine the user's home directory"),
                    })
                })?,
        };
        let cluster_dir = cluster_dir.unwrap_or_else(|| home.join("clusters").join(name));

        Ok(Self { home, cluster_dir })
    }

    /// Directory holding pinned binaries of a product.
    #[must_use]
    pub fn share_dir(&self, product: &str, version: &str) -> PathBuf {
        self.home.join("share").join(product).join(version)
    }

    /// Project directory of the infrastructure provisioner.
    #[must_use]
    pub fn infrastructure_dir(&self) -> PathBuf {
        self.cluster_dir.join("terraform")
    }

    /// Project directory of the configuration provisioner.
    #[must_use]
    pub fn configuration_dir(&self) -> PathBuf {
        self.cluster_dir.join("config")
    }

    /// Working directory of the cluster.
    #[must_use]
    pub fn cluster_dir(&self) -> &Path {
        &self.cluster_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_under_explicit_home() {
        let paths = ClusterPaths::resolve(Some(PathBuf::from("/opt/kestrel")), None, "lab").expect("paths");

        assert_eq!(paths.cluster_dir(), Path::new("/opt/kestrel/clusters/lab"));
        assert_eq!(paths.infrastructure_dir(), PathBuf::from("/opt/kestrel/clusters/lab/terraform"));
        assert_eq!(
            paths.share_dir("terraform", "1.5.7"),
            PathBuf::from("/opt/kestrel/share/terraform/1.5.7")
        );
    }

    #[test]
    fn test_explicit_cluster_dir_wins() {
        let paths = ClusterPaths::resolve(
            Some(PathBuf::from("/opt/kestrel")),
            Some(PathBuf::from("/work/lab")),
            "lab",
        )
        .expect("paths");

        assert_eq!(paths.configuration_dir(), PathBuf::from("/work/lab/config"));
    }
}
