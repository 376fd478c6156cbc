//! Script text composition.
//!
//! Bundle scripts are interpreted by a non-shell script runner whose
//! language is a linear chain-loading pipeline: each line names a helper
//! program that adjusts process state and execs the rest.  The composer
//! therefore only ever appends lines; ordering between the slots is fixed
//! and owned by the converter.
//!
//! `restart` scripts are the exception: the supervisor passes them the exit
//! disposition as `"$1" "$2"`, and a chain loader cannot branch, so those
//! are plain `/bin/sh`.

/// Quote one word for a script line.  Alphanumerics and `/-_.` pass bare;
/// anything else (and the empty string) is wrapped in double quotes with
/// `"` and `\` backslash-escaped.
pub fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut need_quote = s.is_empty();
    for c in s.chars() {
        if !c.is_ascii_alphanumeric() && !matches!(c, '/' | '-' | '_' | '.') {
            need_quote = true;
            if c == '"' || c == '\\' {
                out.push('\\');
            }
        }
        out.push(c);
    }
    if need_quote {
        format!("\"{out}\"")
    } else {
        out
    }
}

/// Lines beginning `-` mean "ignore failure" in the source format.  The
/// chain runner's `foreground` already ignores exit status, so the marker
/// is stripped without a semantic replacement.
pub fn strip_leading_minus(s: &str) -> &str {
    s.strip_prefix('-').unwrap_or(s)
}

/// Wrap a command line in `sh -c 'exec …'` when it uses shell syntax that
/// the chain runner cannot express: an unquoted or double-quoted `$`.
pub fn shell_expand(s: &str) -> String {
    enum State {
        Normal,
        DQuot,
        SQuot,
    }
    let mut state = State::Normal;
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        match state {
            State::Normal => match c {
                '\\' => {
                    let _ = chars.next();
                }
                '\'' => state = State::SQuot,
                '"' => state = State::DQuot,
                '$' => return format!("sh -c {}", quote(&format!("exec {s}"))),
                _ => {}
            },
            State::DQuot => match c {
                '\\' => {
                    let _ = chars.next();
                }
                '"' => state = State::Normal,
                '$' => return format!("sh -c {}", quote(&format!("exec {s}"))),
                _ => {}
            },
            State::SQuot => match c {
                '\\' => {
                    let _ = chars.next();
                }
                '\'' => state = State::Normal,
                _ => {}
            },
        }
    }
    s.to_owned()
}

/// Continuation-escape embedded newlines for embedding a chain pipeline
/// into a `/bin/sh` script.
pub fn escape_newlines(s: &str) -> String {
    let mut r = String::with_capacity(s.len());
    for c in s.chars() {
        if c == '\n' {
            r.push_str(" \\");
        }
        r.push(c);
    }
    r
}

/// Render text as script comment lines, one `# ` prefix per line.
pub fn multi_line_comment(s: &str) -> String {
    let mut r = String::new();
    for line in s.lines() {
        r.push('#');
        if !line.is_empty() {
            r.push(' ');
            r.push_str(line);
        }
        r.push('\n');
    }
    r
}

/// Chain a list of command lines so that all but the last run under
/// `foreground … ;` and the last is exec'd by the pipeline tail.
pub fn chain_commands(cmds: &[String]) -> String {
    let mut out = String::new();
    for (i, cmd) in cmds.iter().enumerate() {
        if i > 0 {
            out.push_str(" ;\n");
        }
        if i + 1 < cmds.len() {
            out.push_str("foreground ");
        }
        out.push_str(cmd);
    }
    out
}

/// Append every command as a `foreground … ;` prologue line.
pub fn foreground_each(cmds: &[String]) -> String {
    let mut out = String::new();
    for cmd in cmds {
        out.push_str("foreground ");
        out.push_str(cmd);
        out.push_str(" ;\n");
    }
    out
}

/// Split a quoted, space-separated settings list the way a shell would.
/// Malformed quoting degenerates to whitespace splitting.
pub fn split_list(s: &str) -> Vec<String> {
    shlex::split(s).unwrap_or_else(|| s.split_whitespace().map(str::to_owned).collect())
}

/// Split `VAR=value` with an empty value when `=` is absent.
pub fn split_env_assignment(s: &str) -> (&str, &str) {
    match s.split_once('=') {
        Some((var, val)) => (var, val),
        None => (s, ""),
    }
}

/// The body of the `restart` script implementing the restart policy.
///
/// The supervisor invokes it as `restart $1 $2` where `$1` is the exit
/// disposition class (`exit`, `term`, `kill`, `abort`, `crash`) and `$2`
/// the exit code; exiting zero requests a restart.
pub fn restart_policy_script(restart: Option<&str>, systemd_quirks: bool) -> String {
    let setting = restart.map(str::to_lowercase);
    match setting.as_deref() {
        Some("always") => return "exec true\t# ignore script arguments\n".to_owned(),
        None if !systemd_quirks => return "exec true\t# ignore script arguments\n".to_owned(),
        None | Some("no") | Some("never") => {
            return "exec false\t# ignore script arguments\n".to_owned();
        }
        _ => {}
    }
    let setting = setting.unwrap_or_default();
    let on_true = setting == "on-success";
    let on_false = setting == "on-failure";
    let on_term = matches!(setting.as_str(), "on-failure" | "on-abort");
    let on_abnormal = matches!(setting.as_str(), "on-failure" | "on-abort" | "on-abnormal");
    let tf = |b: bool| if b { "true" } else { "false" };
    format!(
        "case \"$1\" in\n\
         \te*)\n\
         \t\tif [ \"$2\" -ne 0 ]\n\
         \t\tthen\n\
         \t\t\texec {on_nonzero}\n\
         \t\telse\n\
         \t\t\texec {on_zero}\n\
         \t\tfi\n\
         \t\t;;\n\
         \tt*)\n\
         \t\texec {on_term}\n\
         \t\t;;\n\
         \tk*)\n\
         \t\texec {on_kill}\n\
         \t\t;;\n\
         \ta*)\n\
         \t\texec {on_abort}\n\
         \t\t;;\n\
         \tc*|*)\n\
         \t\texec {on_crash}\n\
         \t\t;;\n\
         esac\n\
         exec false\n",
        on_nonzero = tf(on_false),
        on_zero = tf(on_true),
        on_term = tf(on_term),
        on_kill = tf(on_abnormal),
        on_abort = tf(on_abnormal),
        on_crash = tf(on_abnormal),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_plain_words_pass() {
        assert_eq!(quote("/bin/echo"), "/bin/echo");
        assert_eq!(quote("a-b_c.d"), "a-b_c.d");
    }

    #[test]
    fn test_quote_wraps_and_escapes() {
        assert_eq!(quote("hello world"), "\"hello world\"");
        assert_eq!(quote(""), "\"\"");
        assert_eq!(quote("a\"b"), "\"a\\\"b\"");
        assert_eq!(quote("a\\b"), "\"a\\\\b\"");
    }

    #[test]
    fn test_strip_leading_minus() {
        assert_eq!(strip_leading_minus("-/bin/true"), "/bin/true");
        assert_eq!(strip_leading_minus("/bin/true"), "/bin/true");
    }

    #[test]
    fn test_shell_expand_only_on_dollar() {
        assert_eq!(shell_expand("/bin/echo hi"), "/bin/echo hi");
        assert_eq!(
            shell_expand("/bin/echo $HOME"),
            "sh -c \"exec /bin/echo $HOME\""
        );
        // Single quotes protect the dollar.
        assert_eq!(shell_expand("/bin/echo '$HOME'"), "/bin/echo '$HOME'");
    }

    #[test]
    fn test_chain_commands() {
        let cmds = vec!["/bin/a".to_owned(), "/bin/b".to_owned(), "/bin/c".to_owned()];
        assert_eq!(
            chain_commands(&cmds),
            "foreground /bin/a ;\nforeground /bin/b ;\n/bin/c"
        );
        assert_eq!(chain_commands(&cmds[2..]), "/bin/c");
    }

    #[test]
    fn test_foreground_each() {
        let cmds = vec!["/bin/a".to_owned()];
        assert_eq!(foreground_each(&cmds), "foreground /bin/a ;\n");
    }

    #[test]
    fn test_multi_line_comment() {
        assert_eq!(
            multi_line_comment("Start mount.\nSecond line"),
            "# Start mount.\n# Second line\n"
        );
    }

    #[test]
    fn test_split_list_honors_quotes() {
        assert_eq!(
            split_list("A=1 \"B=two words\""),
            vec!["A=1".to_owned(), "B=two words".to_owned()]
        );
    }

    #[test]
    fn test_restart_policy_always_never() {
        assert!(restart_policy_script(Some("always"), true).starts_with("exec true"));
        assert!(restart_policy_script(Some("no"), true).starts_with("exec false"));
        assert!(restart_policy_script(Some("never"), true).starts_with("exec false"));
        // Without quirks an unset policy means restart.
        assert!(restart_policy_script(None, false).starts_with("exec true"));
        assert!(restart_policy_script(None, true).starts_with("exec false"));
    }

    #[test]
    fn test_restart_policy_on_failure_branches() {
        let s = restart_policy_script(Some("on-failure"), true);
        assert!(s.contains("case \"$1\" in"));
        // Non-zero exit restarts, zero does not.
        assert!(s.contains("\t\t\texec true\n\t\telse\n\t\t\texec false"));
        // Termination by signal restarts.
        assert!(s.contains("\tt*)\n\t\texec true"));
    }

    #[test]
    fn test_restart_policy_on_success_branches() {
        let s = restart_policy_script(Some("on-success"), true);
        assert!(s.contains("\t\t\texec false\n\t\telse\n\t\t\texec true"));
        assert!(s.contains("\tt*)\n\t\texec false"));
    }

    #[test]
    fn test_escape_newlines() {
        assert_eq!(escape_newlines("a\nb"), "a \\\nb");
    }
}
