//! Service bundle materialization.
//!
//! A bundle is a directory holding a `service/` subdirectory with the
//! executable `start`, `stop`, `restart` and `run` scripts plus flag files,
//! the six relation subdirectories, and optionally a `supervise` symlink
//! into the early-supervise staging area.  Relation entries are symlinks to
//! other bundle directories; they may dangle, since the referenced bundle
//! can be written later or live in another bundle root.

use std::io::Write;
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt, PermissionsExt, symlink};
use std::path::{Path, PathBuf};

use log::warn;

use crate::config::EARLY_SUPERVISE_DIR;
use crate::error::Error;
use crate::unit_name::escape;

/// The relation subdirectories every bundle carries.
pub const RELATION_DIRS: &[&str] = &[
    "after",
    "before",
    "wants",
    "wanted-by",
    "conflicts",
    "stopped-by",
];

pub struct Bundle {
    path: PathBuf,
    name: String,
    etc_bundle: bool,
}

impl Bundle {
    /// Create (or reopen, when `overwrite`) the bundle directory itself.
    pub fn create(root: &Path, name: &str, overwrite: bool) -> Result<Bundle, Error> {
        Self::create_etc(root, name, overwrite, false)
    }

    pub fn create_etc(
        root: &Path,
        name: &str,
        overwrite: bool,
        etc_bundle: bool,
    ) -> Result<Bundle, Error> {
        let path = root.join(name);
        match mkdir_0755(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                if !overwrite {
                    return Err(Error::io(path.display().to_string(), e));
                }
            }
            Err(e) => return Err(Error::io(path.display().to_string(), e)),
        }
        Ok(Bundle {
            path,
            name: name.to_owned(),
            etc_bundle,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Create `service/` and the relation subdirectories.
    pub fn make_skeleton(&self) -> Result<(), Error> {
        let service = self.path.join("service");
        if let Err(e) = mkdir_0755(&service) {
            if e.kind() != std::io::ErrorKind::AlreadyExists {
                return Err(Error::io(service.display().to_string(), e));
            }
        }
        for dir in RELATION_DIRS {
            let d = self.path.join(dir);
            if let Err(e) = mkdir_0755(&d) {
                if e.kind() != std::io::ErrorKind::AlreadyExists {
                    return Err(Error::io(d.display().to_string(), e));
                }
            }
        }
        Ok(())
    }

    /// Write an executable script under `service/`.
    pub fn write_script(&self, name: &str, content: &str) -> Result<(), Error> {
        let path = self.path.join("service").join(name);
        let mut f = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o755)
            .open(&path)
            .map_err(|e| Error::io(path.display().to_string(), e))?;
        f.write_all(content.as_bytes())
            .map_err(|e| Error::io(path.display().to_string(), e))?;
        // The mode passed at open time only applies to newly created files.
        let _ = std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755));
        Ok(())
    }

    /// Create or remove a `service/` flag file so that its presence matches
    /// `present`.
    pub fn flag_file(&self, name: &str, present: bool) -> Result<(), Error> {
        let path = self.path.join("service").join(name);
        if present {
            std::fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(0o755)
                .open(&path)
                .map_err(|e| Error::io(path.display().to_string(), e))?;
        } else if let Err(e) = std::fs::remove_file(&path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                return Err(Error::io(path.display().to_string(), e));
            }
        }
        Ok(())
    }

    /// Create one relation symlink.  An existing link is replaced, which
    /// makes repeated conversion runs idempotent.  Failures are logged and
    /// swallowed; a dangling link is not an error.
    pub fn create_link(&self, target: &str, link: &str) {
        let path = self.path.join(link);
        match symlink(target, &path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let _ = std::fs::remove_file(&path);
                if let Err(e) = symlink(target, &path) {
                    warn!("{}: {}: {e}", self.name, path.display());
                }
            }
            Err(e) => warn!("{}: {}: {e}", self.name, path.display()),
        }
    }

    /// Split a whitespace-separated list of unit names and create one
    /// relation link per entry under `subdir` ("after/", "wants/", …).
    /// Each entry resolves to a sibling bundle; recognized unit suffixes
    /// are stripped first.  A bundle never links to itself.
    pub fn create_links(&self, names: &str, subdir: &str) {
        for name in names.split_whitespace() {
            let (base, names_a_target) = strip_unit_suffix(name);
            if base == self.name {
                continue;
            }
            let target = if self.etc_bundle {
                if names_a_target {
                    format!("/etc/service-bundles/targets/{base}")
                } else {
                    format!("/var/sv/{base}")
                }
            } else {
                format!("../../{base}")
            };
            self.create_link(&target, &format!("{subdir}{base}"));
        }
    }

    /// Walk the mount path upward and order this bundle after (and stop it
    /// with) every ancestor mount point's bundle.  The root mount point is
    /// skipped when `prevent_root_link`.
    pub fn make_mount_interdependencies(&self, prevent_root_link: bool, where_: &str) {
        let mut path = where_.to_owned();
        loop {
            let Some(slash) = path.rfind('/') else {
                break;
            };
            path.truncate(slash);
            if path.is_empty() {
                if prevent_root_link {
                    break;
                }
                path.push('/');
            }
            let mount = format!("mount@{}", escape(false, &path));
            if mount != self.name {
                self.create_link(&format!("../../{mount}"), &format!("after/{mount}"));
                self.create_link(&format!("../../{mount}"), &format!("stopped-by/{mount}"));
            }
            if path == "/" {
                break;
            }
        }
    }

    /// Point `supervise` at the early-supervise staging directory.
    pub fn early_supervise_link(&self) {
        self.create_link(
            &format!("{EARLY_SUPERVISE_DIR}{}", self.name),
            "supervise",
        );
    }
}

fn mkdir_0755(path: &Path) -> std::io::Result<()> {
    std::fs::DirBuilder::new().mode(0o755).create(path)
}

fn strip_unit_suffix(name: &str) -> (&str, bool) {
    if let Some(base) = name.strip_suffix(".target") {
        (base, true)
    } else if let Some(base) = name.strip_suffix(".service") {
        (base, false)
    } else if let Some(base) = name.strip_suffix(".socket") {
        (base, false)
    } else {
        (name, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn read_link(p: &Path) -> String {
        std::fs::read_link(p).unwrap().display().to_string()
    }

    #[test]
    fn test_create_refuses_existing_without_overwrite() {
        let root = tempfile::tempdir().unwrap();
        Bundle::create(root.path(), "b", false).unwrap();
        assert!(Bundle::create(root.path(), "b", false).is_err());
        assert!(Bundle::create(root.path(), "b", true).is_ok());
    }

    #[test]
    fn test_skeleton_layout() {
        let root = tempfile::tempdir().unwrap();
        let b = Bundle::create(root.path(), "b", false).unwrap();
        b.make_skeleton().unwrap();
        assert!(b.path().join("service").is_dir());
        for dir in RELATION_DIRS {
            assert!(b.path().join(dir).is_dir(), "missing {dir}");
        }
    }

    #[test]
    fn test_scripts_are_executable() {
        let root = tempfile::tempdir().unwrap();
        let b = Bundle::create(root.path(), "b", false).unwrap();
        b.make_skeleton().unwrap();
        b.write_script("run", "#!/bin/nosh\ntrue\n").unwrap();
        let mode = std::fs::metadata(b.path().join("service/run"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    #[test]
    fn test_flag_file_presence() {
        let root = tempfile::tempdir().unwrap();
        let b = Bundle::create(root.path(), "b", false).unwrap();
        b.make_skeleton().unwrap();
        b.flag_file("remain", true).unwrap();
        assert!(b.path().join("service/remain").exists());
        b.flag_file("remain", false).unwrap();
        assert!(!b.path().join("service/remain").exists());
        // Removing an absent flag is fine.
        b.flag_file("use_hangup", false).unwrap();
    }

    #[test]
    fn test_create_links_strips_suffixes_and_self() {
        let root = tempfile::tempdir().unwrap();
        let b = Bundle::create(root.path(), "sshd", false).unwrap();
        b.make_skeleton().unwrap();
        b.create_links("basic.target sshd.service other.socket", "after/");
        assert_eq!(read_link(&b.path().join("after/basic")), "../../basic");
        assert_eq!(read_link(&b.path().join("after/other")), "../../other");
        // Own name never appears in a relation dir.
        assert!(!b.path().join("after/sshd").exists());
    }

    #[test]
    fn test_create_link_is_idempotent() {
        let root = tempfile::tempdir().unwrap();
        let b = Bundle::create(root.path(), "b", true).unwrap();
        b.make_skeleton().unwrap();
        b.create_link("../../x", "after/x");
        b.create_link("../../x", "after/x");
        assert_eq!(read_link(&b.path().join("after/x")), "../../x");
    }

    #[test]
    fn test_mount_interdependencies_walk() {
        let root = tempfile::tempdir().unwrap();
        let b = Bundle::create(root.path(), "mount@-var-log", false).unwrap();
        b.make_skeleton().unwrap();
        b.make_mount_interdependencies(false, "/var/log");
        assert_eq!(
            read_link(&b.path().join("after/mount@-var")),
            "../../mount@-var"
        );
        assert!(b.path().join("stopped-by/mount@-var").symlink_metadata().is_ok());
        assert_eq!(read_link(&b.path().join("after/mount@-")), "../../mount@-");
    }

    #[test]
    fn test_mount_interdependencies_prevent_root() {
        let root = tempfile::tempdir().unwrap();
        let b = Bundle::create(root.path(), "mount@-", false).unwrap();
        b.make_skeleton().unwrap();
        b.make_mount_interdependencies(true, "/");
        // The root mount must not link to itself.
        assert!(std::fs::read_dir(b.path().join("after")).unwrap().next().is_none());
    }

    #[test]
    fn test_overwrite_is_byte_identical() {
        let root = tempfile::tempdir().unwrap();
        let write = || {
            let b = Bundle::create(root.path(), "b", true).unwrap();
            b.make_skeleton().unwrap();
            b.write_script("start", "#!/bin/nosh\ntrue\n").unwrap();
            b.create_link("../../dep", "after/dep");
            b.early_supervise_link();
        };
        write();
        let first = std::fs::read(root.path().join("b/service/start")).unwrap();
        write();
        let second = std::fs::read(root.path().join("b/service/start")).unwrap();
        assert_eq!(first, second);
        assert_eq!(
            read_link(&root.path().join("b/supervise")),
            format!("{EARLY_SUPERVISE_DIR}b")
        );
    }
}
