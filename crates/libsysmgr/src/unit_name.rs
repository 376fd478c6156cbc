//! Bundle name escaping, unescaping, and `%` specifier substitution.
//!
//! ## Escaping rules
//!
//! Two variants, selected by the `alt` flag:
//!
//! - normal: ASCII letters, digits, `_` and `.` pass through; `/` is
//!   replaced with `-`; every other byte (including `-` itself) becomes a
//!   C-style `\xHH` hex escape.
//! - alt: as above, except `-` and `/` also pass through unchanged.
//!
//! Both variants round-trip: `unescape(alt, escape(alt, s)) == s` for every
//! byte string `s`.  The alt variant exists for names that are themselves
//! filesystem paths and must keep their slashes.

use std::sync::OnceLock;

fn push_hex(r: &mut String, b: u8) {
    r.push_str(&format!("\\x{b:02x}"));
}

/// Escape a string for use as a bundle name component.
pub fn escape(alt: bool, s: &str) -> String {
    let mut r = String::with_capacity(s.len() * 2);
    for &b in s.as_bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'_' | b'.' => r.push(b as char),
            b'/' => r.push(if alt { '/' } else { '-' }),
            b'-' if alt => r.push('-'),
            _ => push_hex(&mut r, b),
        }
    }
    r
}

/// Reverse [`escape`].  Returns `None` on a malformed escape sequence or a
/// byte sequence that is not valid UTF-8 once unescaped.
pub fn unescape(alt: bool, s: &str) -> Option<String> {
    let bytes = s.as_bytes();
    let mut r = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'-' if !alt => {
                r.push(b'/');
                i += 1;
            }
            b'\\' => {
                if i + 3 >= bytes.len() || bytes[i + 1] != b'x' {
                    return None;
                }
                let hi = hex_digit(bytes[i + 2])?;
                let lo = hex_digit(bytes[i + 3])?;
                r.push(hi << 4 | lo);
                i += 4;
            }
            b => {
                r.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8(r).ok()
}

fn hex_digit(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Split `s` into directory part (with trailing separator) and basename.
pub fn split_name(s: &str) -> (String, String) {
    match s.rfind('/') {
        Some(slash) => (s[..=slash].to_owned(), s[slash + 1..].to_owned()),
        None => (String::new(), s.to_owned()),
    }
}

fn leading_slashify(s: &str) -> String {
    if s.starts_with('/') {
        s.to_owned()
    } else {
        format!("/{s}")
    }
}

/// All the name forms derived from one converter argument.
///
/// `escaped_*` fields are pure functions of their unescaped counterparts
/// under the selected escape variant; `substitute` is total over its input.
pub struct Names {
    arg_name: String,
    unit_dirname: String,
    unit_basename: String,
    escaped_unit_basename: String,
    prefix: String,
    escaped_prefix: String,
    instance: String,
    escaped_instance: String,
    bundle_basename: String,
    bundle_dirname: String,
    machine_id: String,
    user: String,
    runtime_dir: String,
}

impl Names {
    pub fn new(arg: &str) -> Self {
        let (unit_dirname, unit_basename) = split_name(arg);
        let escaped_unit_basename = escape(false, &unit_basename);
        Names {
            arg_name: arg.to_owned(),
            unit_dirname,
            unit_basename,
            escaped_unit_basename,
            prefix: String::new(),
            escaped_prefix: String::new(),
            instance: String::new(),
            escaped_instance: String::new(),
            bundle_basename: String::new(),
            bundle_dirname: String::new(),
            machine_id: String::new(),
            user: "root".to_owned(),
            runtime_dir: "/run/".to_owned(),
        }
    }

    /// Record the template prefix.  With `esc` the given value is the plain
    /// form and the escaped form is derived; without it the value is already
    /// escaped and the plain form is derived.
    pub fn set_prefix(&mut self, v: &str, esc: bool, alt: bool) {
        if esc {
            self.prefix = v.to_owned();
            self.escaped_prefix = escape(alt, v);
        } else {
            self.escaped_prefix = v.to_owned();
            self.prefix = unescape(alt, v).unwrap_or_else(|| v.to_owned());
        }
    }

    pub fn set_instance(&mut self, v: &str, esc: bool, alt: bool) {
        if esc {
            self.instance = v.to_owned();
            self.escaped_instance = escape(alt, v);
        } else {
            self.escaped_instance = v.to_owned();
            self.instance = unescape(alt, v).unwrap_or_else(|| v.to_owned());
        }
    }

    pub fn set_bundle(&mut self, root: &str, basename: &str) {
        self.bundle_basename = basename.to_owned();
        self.bundle_dirname = format!("{root}{basename}");
    }

    pub fn set_machine_id(&mut self, v: &str) {
        self.machine_id = v.to_owned();
    }

    pub fn set_user(&mut self, u: &str) {
        self.user = u.to_owned();
        self.runtime_dir = format!("/run/user/{u}/");
    }

    pub fn arg_name(&self) -> &str {
        &self.arg_name
    }
    pub fn unit_dirname(&self) -> &str {
        &self.unit_dirname
    }
    pub fn unit_basename(&self) -> &str {
        &self.unit_basename
    }
    pub fn escaped_unit_basename(&self) -> &str {
        &self.escaped_unit_basename
    }
    pub fn prefix(&self) -> &str {
        &self.prefix
    }
    pub fn escaped_prefix(&self) -> &str {
        &self.escaped_prefix
    }
    pub fn instance(&self) -> &str {
        &self.instance
    }
    pub fn escaped_instance(&self) -> &str {
        &self.escaped_instance
    }
    pub fn bundle_basename(&self) -> &str {
        &self.bundle_basename
    }
    pub fn bundle_dirname(&self) -> &str {
        &self.bundle_dirname
    }
    pub fn machine_id(&self) -> &str {
        &self.machine_id
    }
    pub fn user(&self) -> &str {
        &self.user
    }
    pub fn runtime_dir(&self) -> &str {
        &self.runtime_dir
    }

    /// Replace `%` specifiers.  `%%` yields a literal percent; an unknown
    /// `%x` is preserved verbatim, as is a trailing lone `%`.
    pub fn substitute(&self, s: &str) -> String {
        let mut r = String::with_capacity(s.len());
        let mut chars = s.chars();
        while let Some(c) = chars.next() {
            if c != '%' {
                r.push(c);
                continue;
            }
            match chars.next() {
                Some('p') => r.push_str(self.escaped_prefix()),
                Some('P') => r.push_str(self.prefix()),
                Some('i') => r.push_str(self.escaped_instance()),
                Some('I') => r.push_str(self.instance()),
                Some('f') => r.push_str(&leading_slashify(self.instance())),
                Some('n') => r.push_str(self.escaped_unit_basename()),
                Some('N') => r.push_str(self.unit_basename()),
                Some('m') => r.push_str(self.machine_id()),
                Some('t') => r.push_str(self.runtime_dir()),
                Some(other) => {
                    r.push('%');
                    r.push(other);
                }
                None => r.push('%'),
            }
        }
        r
    }

    pub fn substitute_all(&self, l: &[String]) -> Vec<String> {
        l.iter().map(|s| self.substitute(s)).collect()
    }
}

/* Machine id ***************************************************************/

const MACHINE_ID_SOURCES: &[&str] = &["/etc/machine-id", "/var/db/machine-id", "/run/machine-id"];

static MACHINE_ID: OnceLock<String> = OnceLock::new();

fn read_machine_id_files() -> Option<String> {
    for path in MACHINE_ID_SOURCES {
        if let Ok(raw) = std::fs::read_to_string(path) {
            let id: String = raw
                .trim()
                .chars()
                .filter(|c| c.is_ascii_hexdigit())
                .map(|c| c.to_ascii_lowercase())
                .collect();
            if id.len() == 32 {
                return Some(id);
            }
        }
    }
    None
}

fn create_machine_id() -> String {
    let mut buf = [0u8; 16];
    if let Ok(mut f) = std::fs::File::open("/dev/urandom") {
        use std::io::Read;
        let _ = f.read_exact(&mut buf);
    }
    buf.iter().map(|b| format!("{b:02x}")).collect()
}

/// The machine id in compact human-readable form: 32 lowercase hex digits.
/// Read from the non-volatile locations first, then the volatile fallbacks,
/// else freshly created in memory only; converters never write it back.
pub fn machine_id_compact() -> String {
    MACHINE_ID
        .get_or_init(|| read_machine_id_files().unwrap_or_else(create_machine_id))
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_basic() {
        assert_eq!(escape(false, "tty1"), "tty1");
        assert_eq!(escape(false, "/"), "-");
        assert_eq!(escape(false, "/dev/ada0p3"), "-dev-ada0p3");
        assert_eq!(escape(false, "a b"), r"a\x20b");
        assert_eq!(escape(false, "a-b"), r"a\x2db");
    }

    #[test]
    fn test_escape_alt_keeps_reserved() {
        assert_eq!(escape(true, "/dev/ada0p3"), "/dev/ada0p3");
        assert_eq!(escape(true, "a-b"), "a-b");
        assert_eq!(escape(true, "a b"), r"a\x20b");
    }

    #[test]
    fn test_unescape_basic() {
        assert_eq!(unescape(false, "-dev-ada0p3").as_deref(), Some("/dev/ada0p3"));
        assert_eq!(unescape(false, r"a\x2db").as_deref(), Some("a-b"));
        assert_eq!(unescape(true, "a-b").as_deref(), Some("a-b"));
        assert_eq!(unescape(false, r"\x2"), None);
        assert_eq!(unescape(false, r"\zz"), None);
    }

    #[test]
    fn test_roundtrip_both_variants() {
        let cases = [
            "",
            "/",
            "/dev/ada0p2",
            "ssh@tty1",
            "a b-c/d.e_f",
            "weird\\chars\"here",
            "-leading-dash",
        ];
        for alt in [false, true] {
            for case in cases {
                let escaped = escape(alt, case);
                assert_eq!(
                    unescape(alt, &escaped).as_deref(),
                    Some(case),
                    "round trip failed for {case:?} alt={alt}"
                );
            }
        }
    }

    #[test]
    fn test_split_name() {
        assert_eq!(
            split_name("/etc/systemd/system/foo.service"),
            ("/etc/systemd/system/".to_owned(), "foo.service".to_owned())
        );
        assert_eq!(split_name("foo.service"), (String::new(), "foo.service".to_owned()));
    }

    #[test]
    fn test_substitute_specifiers() {
        let mut names = Names::new("ssh@tty1.service");
        names.set_bundle("", "ssh@tty1");
        names.set_prefix("ssh", true, false);
        names.set_instance("tty1", true, false);
        names.set_machine_id("0123456789abcdef0123456789abcdef");
        assert_eq!(names.substitute("%p"), "ssh");
        assert_eq!(names.substitute("%i"), "tty1");
        assert_eq!(names.substitute("%f"), "/tty1");
        assert_eq!(names.substitute("getty %I done"), "getty tty1 done");
        assert_eq!(names.substitute("%n"), escape(false, "ssh@tty1.service"));
        assert_eq!(names.substitute("%m"), "0123456789abcdef0123456789abcdef");
        assert_eq!(names.substitute("%t"), "/run/");
        assert_eq!(names.substitute("100%%"), "100%");
        assert_eq!(names.substitute("%q unknown"), "%q unknown");
        assert_eq!(names.substitute("trailing %"), "trailing %");
    }

    #[test]
    fn test_substitute_user_runtime_dir() {
        let mut names = Names::new("thing.service");
        names.set_user("alice");
        assert_eq!(names.substitute("%t"), "/run/user/alice/");
        assert_eq!(names.user(), "alice");
    }

    #[test]
    fn test_instance_unescape_direction() {
        // When the instance arrives pre-escaped, the plain form is derived.
        let mut names = Names::new("mount@-dev-sda1.service");
        names.set_instance("-dev-sda1", false, false);
        assert_eq!(names.instance(), "/dev/sda1");
        assert_eq!(names.escaped_instance(), "-dev-sda1");
    }
}
