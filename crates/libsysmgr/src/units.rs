//! Unit descriptor loading.
//!
//! The grammar is INI with appendable values: a line is left-trimmed, `#` or
//! `;` at the first column of the trimmed line starts a comment, `[name]`
//! opens a section, and `key=value` appends `value` to the ordered list held
//! at `(section, key)`.  Section and key names are case-folded.  There is no
//! line continuation.
//!
//! Every value tracks whether some consumer looked at it; settings that were
//! never used are reported once per descriptor so that typos in unit files
//! do not go unnoticed.

use std::cell::Cell;
use std::collections::BTreeMap;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};

use crate::config::SYSTEMD_PREFIXES;
use crate::error::Error;

/// The ordered settings of one `(section, key)` slot.
pub struct Value {
    settings: Vec<String>,
    used: Cell<bool>,
}

impl Value {
    fn new() -> Self {
        Value {
            settings: Vec::new(),
            used: Cell::new(false),
        }
    }

    pub fn last_setting(&self) -> &str {
        self.settings.last().map(String::as_str).unwrap_or("")
    }

    pub fn all_settings(&self) -> &[String] {
        &self.settings
    }

    /// Return the value to the unused pool, so that it is reported after
    /// all; used when a recognized key carries an unsupported setting.
    pub fn set_unused(&self) {
        self.used.set(false);
    }
}

/// One parsed unit descriptor: section → key → ordered values.
#[derive(Default)]
pub struct Profile {
    sections: BTreeMap<String, BTreeMap<String, Value>>,
    origin: String,
}

impl Profile {
    /// Look a setting up and mark it used.  Section and key must be given
    /// in lowercase.
    pub fn use_key(&self, section: &str, key: &str) -> Option<&Value> {
        let v = self.sections.get(section)?.get(key)?;
        v.used.set(true);
        Some(v)
    }

    fn append(&mut self, section: &str, key: &str, val: String) {
        self.sections
            .entry(section.to_owned())
            .or_default()
            .entry(key.to_owned())
            .or_insert_with(Value::new)
            .settings
            .push(val);
    }

    /// Path the descriptor was read from, for diagnostics.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Emit one warning per setting that no consumer asked for.
    pub fn report_unused(&self, prog: &str) {
        for (section, keys) in &self.sections {
            for (key, value) in keys {
                if !value.used.get() {
                    for setting in &value.settings {
                        eprintln!(
                            "{prog}: WARNING: {}: Unused setting: [{section}] {key} = {setting}",
                            self.origin
                        );
                    }
                }
            }
        }
    }
}

fn is_section_heading(line: &str) -> Option<String> {
    let line = line.trim_end();
    if line.len() > 1 && line.starts_with('[') && line.ends_with(']') {
        Some(line[1..line.len() - 1].to_lowercase())
    } else {
        None
    }
}

/// Parse descriptor text into a [`Profile`].
pub fn parse_profile(text: &str, origin: &str) -> Profile {
    let mut p = Profile {
        origin: origin.to_owned(),
        ..Profile::default()
    };
    let mut section = String::new();
    for raw in text.lines() {
        let line = raw.trim_start();
        if line.is_empty() {
            continue;
        }
        if line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(name) = is_section_heading(line) {
            section = name;
            continue;
        }
        let (var, val) = match line.split_once('=') {
            Some((var, val)) => (var, val),
            None => (line, ""),
        };
        p.append(&section, &var.to_lowercase(), val.to_owned());
    }
    p
}

/// Whether the per-user unit directories are searched instead of the
/// system-wide ones.
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum SearchScope {
    System,
    PerUser,
}

/// Locate a unit file.
///
/// A name containing a path separator is opened literally.  Otherwise the
/// well-known prefixes are probed in order; the first file that opens wins.
/// On total failure the *most interesting* error seen is returned: ENOENT
/// only when every probe ended in ENOENT.
pub fn find_unit_file(name: &str, scope: SearchScope) -> Result<(PathBuf, String), Error> {
    if name.contains('/') {
        let path = PathBuf::from(name);
        let text = read_regular(&path)?;
        return Ok((path, text));
    }
    let subdir = match scope {
        SearchScope::System => "system/",
        SearchScope::PerUser => "user/",
    };
    let mut interesting = std::io::Error::from(ErrorKind::NotFound);
    for prefix in SYSTEMD_PREFIXES {
        let path = PathBuf::from(format!("{prefix}systemd/{subdir}{name}"));
        match read_regular(&path) {
            Ok(text) => return Ok((path, text)),
            Err(Error::Io { source, .. }) => {
                if source.kind() != ErrorKind::NotFound {
                    interesting = source;
                }
            }
            Err(e) => return Err(e),
        }
    }
    Err(Error::io(name, interesting))
}

fn read_regular(path: &Path) -> Result<String, Error> {
    let mut f = std::fs::File::open(path)
        .map_err(|e| Error::io(path.display().to_string(), e))?;
    let meta = f
        .metadata()
        .map_err(|e| Error::io(path.display().to_string(), e))?;
    if !meta.is_file() {
        return Err(Error::config(
            path.display().to_string(),
            "Not a regular file.",
        ));
    }
    let mut text = String::new();
    f.read_to_string(&mut text)
        .map_err(|e| Error::io(path.display().to_string(), e))?;
    Ok(text)
}

/* Setting interpretation helpers *******************************************/

/// "yes", "on", "true" and "1" are true; everything else is false.
pub fn is_bool_true(v: Option<&Value>, def: bool) -> bool {
    match v {
        Some(v) => matches!(
            v.last_setting().to_lowercase().as_str(),
            "yes" | "on" | "true" | "1"
        ),
        None => def,
    }
}

/// Two-level default: the first present value decides.
pub fn is_bool_true2(v: Option<&Value>, w: Option<&Value>, def: bool) -> bool {
    match (v, w) {
        (Some(_), _) => is_bool_true(v, def),
        (None, Some(_)) => is_bool_true(w, def),
        (None, None) => def,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sections_and_append() {
        let text = "\
# comment
; also a comment
[Unit]
Description=First
Description=Second

[Service]
ExecStart=/bin/echo hi
EXECSTART=/bin/echo again
";
        let p = parse_profile(text, "test.service");
        let desc = p.use_key("unit", "description").unwrap();
        assert_eq!(
            desc.all_settings(),
            &["First".to_owned(), "Second".to_owned()]
        );
        assert_eq!(desc.last_setting(), "Second");
        // Keys are case-folded, so both spellings land in the same slot.
        let starts = p.use_key("service", "execstart").unwrap();
        assert_eq!(starts.all_settings().len(), 2);
    }

    #[test]
    fn test_parse_trims_left_only() {
        let text = "[Service]\n   ExecStart=/bin/true \n";
        let p = parse_profile(text, "t");
        // The value keeps its trailing whitespace; only the line start is
        // trimmed before the key is read.
        assert_eq!(
            p.use_key("service", "execstart").unwrap().last_setting(),
            "/bin/true "
        );
    }

    #[test]
    fn test_value_without_equals() {
        let p = parse_profile("[Service]\nRemainAfterExit\n", "t");
        assert_eq!(
            p.use_key("service", "remainafterexit").unwrap().last_setting(),
            ""
        );
    }

    #[test]
    fn test_unused_reporting_state() {
        let p = parse_profile("[Service]\nExecStart=/bin/true\nBogus=1\n", "t");
        let _ = p.use_key("service", "execstart");
        assert!(p.use_key("service", "missing").is_none());
        // report_unused only writes to stderr; here we just assert the used
        // flag wiring via a second lookup.
        let bogus = p.use_key("service", "bogus").unwrap();
        bogus.set_unused();
        assert_eq!(bogus.last_setting(), "1");
    }

    #[test]
    fn test_is_bool_true() {
        let p = parse_profile("[a]\nk=Yes\nj=off\n", "t");
        assert!(is_bool_true(p.use_key("a", "k"), false));
        assert!(!is_bool_true(p.use_key("a", "j"), true));
        assert!(is_bool_true(None, true));
        assert!(!is_bool_true(None, false));
    }

    #[test]
    fn test_find_unit_file_literal_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.service");
        std::fs::write(&path, "[Service]\nExecStart=/bin/true\n").unwrap();
        let (found, text) =
            find_unit_file(path.to_str().unwrap(), SearchScope::System).unwrap();
        assert_eq!(found, path);
        assert!(text.contains("ExecStart"));
    }

    #[test]
    fn test_find_unit_file_enoent() {
        let err = find_unit_file("/nonexistent/dir/x.service", SearchScope::System)
            .unwrap_err();
        match err {
            Error::Io { source, .. } => assert_eq!(source.kind(), ErrorKind::NotFound),
            other => panic!("unexpected error: {other}"),
        }
    }

}
