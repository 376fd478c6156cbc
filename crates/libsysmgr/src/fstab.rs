//! fstab row model.
//!
//! Rows are read in the classic getfsent(3) shape: spec, file, vfstype,
//! comma-separated options, dump frequency, fsck pass number.  The BSD
//! `fs_type` field (rw/rq/ro/sw/xx) is derived from the options list; rows
//! whose options carry none of those markers surface as `??`, which only a
//! Linux fstab treats as mountable.

use std::path::Path;

use crate::error::Error;

#[derive(Debug, Clone)]
pub struct FstabRecord {
    /// Block device or remote spec (fs_spec).
    pub spec: String,
    /// Mount point (fs_file).
    pub file: String,
    /// Filesystem type (fs_vfstype).
    pub vfstype: String,
    /// Parsed option list.
    pub options: Vec<String>,
    /// Derived rw/rq/ro/sw/xx marker, `??` when none is present.
    pub fs_type: String,
    pub freq: i32,
    pub passno: i32,
}

const TYPE_OPTIONS: &[&str] = &["rw", "rq", "ro", "sw", "xx"];

/// Split a comma-separated option string.
pub fn split_options(s: &str) -> Vec<String> {
    s.split(',')
        .filter(|o| !o.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Exact-name option probe.
pub fn has_option(options: &[String], name: &str) -> bool {
    options.iter().any(|o| key_of(o) == name)
}

/// Option probe that also yields the `k=v` value.
pub fn option_value<'a>(options: &'a [String], name: &str) -> Option<&'a str> {
    options.iter().find_map(|o| match o.split_once('=') {
        Some((k, v)) if k == name => Some(v),
        _ => None,
    })
}

fn key_of(option: &str) -> &str {
    match option.split_once('=') {
        Some((k, _)) => k,
        None => option,
    }
}

fn derive_fs_type(options: &[String]) -> String {
    for o in options {
        if TYPE_OPTIONS.contains(&o.as_str()) {
            return o.clone();
        }
    }
    // Linux fstabs usually omit the marker entirely; "swap" rows still get
    // their own bundle class.
    "??".to_owned()
}

/// Parse one fstab line.  Returns `None` for blank and comment lines.
pub fn parse_line(line: &str) -> Option<FstabRecord> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let mut fields = line.split_whitespace();
    let spec = fields.next()?.to_owned();
    let file = fields.next()?.to_owned();
    let vfstype = fields.next()?.to_owned();
    let options = split_options(fields.next().unwrap_or("defaults"));
    let freq = fields.next().and_then(|f| f.parse().ok()).unwrap_or(0);
    let passno = fields.next().and_then(|f| f.parse().ok()).unwrap_or(0);
    let mut fs_type = derive_fs_type(&options);
    if fs_type == "??" && vfstype == "swap" {
        fs_type = "sw".to_owned();
    }
    Some(FstabRecord {
        spec,
        file,
        vfstype,
        options,
        fs_type,
        freq,
        passno,
    })
}

/// Read the fstab database.
pub fn read_fstab(path: &Path) -> Result<Vec<FstabRecord>, Error> {
    let text = std::fs::read_to_string(path)
        .map_err(|_| Error::config(path.display().to_string(), "Unable to open fstab database."))?;
    Ok(text.lines().filter_map(parse_line).collect())
}

/* Derived row properties ***************************************************/

fn strip_fuse(fstype: &str) -> &str {
    fstype.strip_prefix("fuse.").unwrap_or(fstype)
}

/// Network filesystem types, which wait for remote-fs rather than local-fs.
pub fn is_local_type(fstype: &str) -> bool {
    const REMOTE: &[&str] = &[
        "nfs",
        "nfs4",
        "smbfs",
        "cifs",
        "ncp",
        "ncpfs",
        "coda",
        "ocfs2",
        "gfs",
        "gfs2",
        "ceph",
        "afs",
        "sshfs",
        "glusterfs",
    ];
    !REMOTE.contains(&strip_fuse(fstype))
}

/// Filesystems whose fsck understands preen mode.
pub fn is_preenable_type(fstype: &str) -> bool {
    matches!(strip_fuse(fstype), "ext2" | "ext3" | "ext4" | "ext")
}

pub fn is_root(p: &str) -> bool {
    p == "/"
}

impl FstabRecord {
    pub fn is_local(&self) -> bool {
        !has_option(&self.options, "_nodev") && is_local_type(&self.vfstype)
    }

    pub fn is_preenable(&self) -> bool {
        is_preenable_type(&self.vfstype)
    }

    /// Sources like `fuse0` request the fuse kernel module.
    pub fn is_fuse(&self) -> bool {
        let base = match self.spec.rsplit_once('/') {
            Some((_, b)) => b,
            None => &self.spec,
        };
        match base.strip_prefix("fuse") {
            Some(rest) => rest.chars().next().is_some_and(|c| c.is_ascii_digit()),
            None => false,
        }
    }

    /// A `.bde` suffix marks a gbde-encrypted volume; the stripped device
    /// path is returned.
    pub fn gbde_device(&self) -> Option<&str> {
        self.spec.strip_suffix(".bde")
    }

    /// A `.eli` suffix marks a geli-encrypted volume.
    pub fn geli_device(&self) -> Option<&str> {
        self.spec.strip_suffix(".eli")
    }

    pub fn is_root(&self) -> bool {
        is_root(&self.file)
    }

    pub fn options_string(&self) -> String {
        self.options.join(",")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bsd_root_row() {
        let r = parse_line("/dev/ada0p2 / ufs rw 1 1").unwrap();
        assert_eq!(r.spec, "/dev/ada0p2");
        assert_eq!(r.file, "/");
        assert_eq!(r.vfstype, "ufs");
        assert_eq!(r.fs_type, "rw");
        assert_eq!(r.freq, 1);
        assert_eq!(r.passno, 1);
        assert!(r.is_root());
        assert!(r.is_local());
    }

    #[test]
    fn test_parse_swap_row_with_options() {
        let r = parse_line("/dev/ada0p3 none swap sw,pri=5,discard 0 0").unwrap();
        assert_eq!(r.fs_type, "sw");
        assert!(has_option(&r.options, "discard"));
        assert_eq!(option_value(&r.options, "pri"), Some("5"));
        assert!(!has_option(&r.options, "late"));
    }

    #[test]
    fn test_linux_row_without_marker() {
        let r = parse_line("UUID=abc / ext4 defaults,noatime 0 1").unwrap();
        assert_eq!(r.fs_type, "??");
        assert!(r.is_preenable());
    }

    #[test]
    fn test_linux_swap_vfstype() {
        let r = parse_line("/dev/sda2 none swap defaults 0 0").unwrap();
        assert_eq!(r.fs_type, "sw");
    }

    #[test]
    fn test_comments_and_blank_lines() {
        assert!(parse_line("# /dev/sda1 / ext4 rw 0 0").is_none());
        assert!(parse_line("   ").is_none());
    }

    #[test]
    fn test_remote_types() {
        let r = parse_line("server:/export /mnt nfs rw 0 0").unwrap();
        assert!(!r.is_local());
        let r = parse_line("sshfs#u@h:/ /mnt fuse.sshfs rw,_nodev 0 0").unwrap();
        assert!(!r.is_local());
    }

    #[test]
    fn test_nodev_forces_remote_class() {
        let r = parse_line("/dev/x /mnt ext4 rw,_nodev 0 0").unwrap();
        assert!(!r.is_local());
    }

    #[test]
    fn test_geom_suffixes() {
        let r = parse_line("/dev/ada0p4.bde /crypt ufs rw 0 2").unwrap();
        assert_eq!(r.gbde_device(), Some("/dev/ada0p4"));
        assert_eq!(r.geli_device(), None);
        let r = parse_line("/dev/ada0p5.eli /crypt2 ufs rw 0 2").unwrap();
        assert_eq!(r.geli_device(), Some("/dev/ada0p5"));
    }

    #[test]
    fn test_fuse_detection() {
        let r = parse_line("/dev/fuse0 /mnt fusefs rw 0 0").unwrap();
        assert!(r.is_fuse());
        let r = parse_line("/dev/fusefoo /mnt fusefs rw 0 0").unwrap();
        assert!(!r.is_fuse());
    }
}
