//! convert-systemd-units: translate a unit description into a service
//! bundle.
//!
//! The input is one unit name (service, socket, or target, possibly a
//! template instance).  The output is a bundle directory whose scripts
//! chain-load the settings in a fixed slot order: container, control group,
//! priority, environment, session, limits, umask, namespace, chroot,
//! working directory, descriptor redirection, banners, privilege drop,
//! and finally the unit's own commands.

use std::path::Path;

use clap::Parser;

use crate::bundle::Bundle;
use crate::config::basename_of;
use crate::error::{EXIT_SUCCESS, EXIT_USAGE, Error, fatal};
use crate::scripts::{
    chain_commands, foreground_each, multi_line_comment, quote, escape_newlines,
    restart_policy_script, shell_expand, split_env_assignment, split_list, strip_leading_minus,
};
use crate::unit_name::{Names, machine_id_compact};
use crate::units::{Profile, SearchScope, Value, find_unit_file, is_bool_true, is_bool_true2,
    parse_profile};

#[derive(Parser, Debug)]
#[command(
    name = "convert-systemd-units",
    about = "Convert a systemd unit into a service bundle"
)]
struct Cli {
    /// Communicate with the per-user manager.
    #[arg(short = 'u', long)]
    user: bool,

    /// Root directory for bundles.
    #[arg(long, value_name = "directory")]
    bundle_root: Option<String>,

    /// Escape the instance part of a template instantiation.
    #[arg(long)]
    escape_instance: bool,

    /// Escape the prefix part of a template instantiation.
    #[arg(long)]
    escape_prefix: bool,

    /// Use an alternative escape algorithm.
    #[arg(long)]
    alt_escape: bool,

    /// Consider this service to live away from the normal service bundle
    /// group.
    #[arg(long)]
    etc_bundle: bool,

    /// Turn off systemd quirks.
    #[arg(long)]
    no_systemd_quirks: bool,

    /// The unit to convert.
    unit: String,
}

pub fn run_convert_systemd_units(args: &[String]) -> i32 {
    let prog = args.first().map(|a| basename_of(a)).unwrap_or("convert-systemd-units");
    let _ = crate::logging::setup_logging(log::LevelFilter::Warn);
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return EXIT_USAGE;
        }
    };
    match convert(prog, &cli) {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            fatal(prog, &e);
            e.exit_code()
        }
    }
}

fn ends_in<'a>(name: &'a str, suffix: &str) -> Option<&'a str> {
    name.strip_suffix(suffix)
}

fn is_local_socket_name(s: &str) -> bool {
    s.starts_with('/')
}

/// `host:port` with optional brackets around the host; a bare value is a
/// port on the wildcard address.
fn split_ip_socket_name(s: &str) -> (String, String) {
    match s.rfind(':') {
        None => ("::0".to_owned(), s.to_owned()),
        Some(colon) => {
            let mut address = &s[..colon];
            let port = &s[colon + 1..];
            if address.len() > 1 && address.starts_with('[') && address.ends_with(']') {
                address = &address[1..address.len() - 1];
            }
            (address.to_owned(), port.to_owned())
        }
    }
}

/// `protocol group`, defaulting to multicast group 1.
fn split_netlink_socket_name(s: &str) -> (String, String) {
    match s.rfind(' ') {
        None => (s.to_owned(), "1".to_owned()),
        Some(space) => (s[..space].to_owned(), s[space + 1..].to_owned()),
    }
}

struct LoadedProfile {
    profile: Profile,
    filename: String,
}

fn load_profile(name: &str, scope: SearchScope) -> Result<LoadedProfile, Error> {
    let (path, text) = find_unit_file(name, scope)?;
    let filename = path.display().to_string();
    Ok(LoadedProfile {
        profile: parse_profile(&text, &filename),
        filename,
    })
}

/// Load a unit, falling back to the `prefix@.kind` template file and
/// recording the prefix/instance split in `names` when taken.
fn load_with_template_fallback(
    names: &mut Names,
    kind: &str,
    scope: SearchScope,
    escape_prefix: bool,
    escape_instance: bool,
    alt_escape: bool,
    is_instance: &mut bool,
) -> Result<LoadedProfile, Error> {
    match load_profile(&names.arg_name().to_owned(), scope) {
        Ok(loaded) => Ok(loaded),
        Err(Error::Io { source, .. })
            if source.kind() == std::io::ErrorKind::NotFound =>
        {
            let basename = names.bundle_basename().to_owned();
            let at = basename.find('@').ok_or_else(|| {
                Error::io(
                    names.arg_name(),
                    std::io::Error::from(std::io::ErrorKind::NotFound),
                )
            })?;
            names.set_prefix(&basename[..at], escape_prefix, alt_escape);
            names.set_instance(&basename[at + 1..], escape_instance, alt_escape);
            *is_instance = true;
            let template = format!(
                "{}{}@.{kind}",
                names.unit_dirname(),
                names.escaped_prefix()
            );
            load_profile(&template, scope)
        }
        Err(e) => Err(e),
    }
}

fn convert(prog: &str, cli: &Cli) -> Result<(), Error> {
    let bundle_root = match &cli.bundle_root {
        Some(root) => format!("{root}/"),
        None => String::new(),
    };
    let systemd_quirks = !cli.no_systemd_quirks;
    let scope = if cli.user {
        SearchScope::PerUser
    } else {
        SearchScope::System
    };

    let mut names = Names::new(&cli.unit);

    let mut is_target = false;
    let mut is_socket_activated = false;
    let bundle_basename = if let Some(b) = ends_in(names.unit_basename(), ".target") {
        is_target = true;
        b.to_owned()
    } else if let Some(b) = ends_in(names.unit_basename(), ".socket") {
        is_socket_activated = true;
        b.to_owned()
    } else if let Some(b) = ends_in(names.unit_basename(), ".service") {
        b.to_owned()
    } else {
        names.unit_basename().to_owned()
    };
    names.set_bundle(&bundle_root, &bundle_basename);
    let prefix_seed = names.bundle_basename().to_owned();
    names.set_prefix(&prefix_seed, cli.escape_prefix, cli.alt_escape);
    names.set_machine_id(&machine_id_compact());

    let mut is_instance = false;
    let kind = if is_target { "target" } else { "service" };

    let socket_loaded;
    let service_loaded;
    if is_socket_activated {
        socket_loaded = Some(load_with_template_fallback(
            &mut names,
            "socket",
            scope,
            cli.escape_prefix,
            cli.escape_instance,
            cli.alt_escape,
            &mut is_instance,
        )?);
        let accept = socket_loaded
            .as_ref()
            .and_then(|l| l.profile.use_key("socket", "accept"));
        let is_socket_accept = is_bool_true(accept, false);
        let service_unit_name = format!(
            "{}{}{}.service",
            names.unit_dirname(),
            names.escaped_prefix(),
            if is_socket_accept { "@" } else { "" }
        );
        service_loaded = load_profile(&service_unit_name, scope)?;
    } else {
        socket_loaded = None;
        service_loaded = load_with_template_fallback(
            &mut names,
            kind,
            scope,
            cli.escape_prefix,
            cli.escape_instance,
            cli.alt_escape,
            &mut is_instance,
        )?;
    }

    let empty_profile = Profile::default();
    let socket_profile: &Profile = socket_loaded
        .as_ref()
        .map(|l| &l.profile)
        .unwrap_or(&empty_profile);
    let socket_filename = socket_loaded
        .as_ref()
        .map(|l| l.filename.clone())
        .unwrap_or_default();
    let service_profile = &service_loaded.profile;
    let service_filename = service_loaded.filename.clone();

    /* Settings ***********************************************************/

    let listenstream = socket_profile.use_key("socket", "listenstream");
    let listenfifo = socket_profile.use_key("socket", "listenfifo");
    let listennetlink = socket_profile.use_key("socket", "listennetlink");
    let listendatagram = socket_profile.use_key("socket", "listendatagram");
    let bindipv6only = socket_profile.use_key("socket", "bindipv6only");
    let reuseport = socket_profile.use_key("socket", "reuseport");
    let backlog = socket_profile.use_key("socket", "backlog");
    let maxconnections = socket_profile.use_key("socket", "maxconnections");
    let keepalive = socket_profile.use_key("socket", "keepalive");
    let socketmode = socket_profile.use_key("socket", "socketmode");
    let socketuser = socket_profile.use_key("socket", "socketuser");
    let socketgroup = socket_profile.use_key("socket", "socketgroup");
    let passcredentials = socket_profile.use_key("socket", "passcredentials");
    let passsecurity = socket_profile.use_key("socket", "passsecurity");
    let nodelay = socket_profile.use_key("socket", "nodelay");
    let freebind = socket_profile.use_key("socket", "freebind");
    let receivebuffer = socket_profile.use_key("socket", "receivebuffer");
    let netlinkraw = socket_profile.use_key("socket", "netlinkraw");
    let socket_accept = socket_profile.use_key("socket", "accept");
    let socket_before = socket_profile.use_key("unit", "before");
    let socket_after = socket_profile.use_key("unit", "after");
    let socket_conflicts = socket_profile.use_key("unit", "conflicts");
    let socket_wants = socket_profile.use_key("unit", "wants");
    let socket_requires = socket_profile.use_key("unit", "requires");
    let socket_requisite = socket_profile.use_key("unit", "requisite");
    let socket_description = socket_profile.use_key("unit", "description");
    let socket_defaultdependencies = socket_profile.use_key("unit", "defaultdependencies");
    let socket_earlysupervise = socket_profile.use_key("unit", "earlysupervise");
    let socket_wantedby = socket_profile.use_key("install", "wantedby");
    let socket_requiredby = socket_profile.use_key("install", "requiredby");
    let socket_stoppedby = socket_profile.use_key("install", "stoppedby");
    let socket_ucspirules = socket_profile.use_key("socket", "ucspirules");
    let socket_logucspirules = socket_profile.use_key("socket", "logucspirules");
    let is_socket_accept = is_bool_true(socket_accept, false);

    let type_ = service_profile.use_key("service", "type");
    let workingdirectory = service_profile.use_key("service", "workingdirectory");
    let rootdirectory = service_profile.use_key("service", "rootdirectory");
    #[cfg(target_os = "linux")]
    let slice = service_profile.use_key("service", "slice");
    #[cfg(target_os = "linux")]
    let delegate = service_profile.use_key("service", "delegate");
    #[cfg(not(target_os = "linux"))]
    let jailid = service_profile.use_key("service", "jailid");
    let runtimedirectory = service_profile.use_key("service", "runtimedirectory");
    let runtimedirectoryowner = service_profile.use_key("service", "runtimedirectoryowner");
    let runtimedirectorymode = service_profile.use_key("service", "runtimedirectorymode");
    let systemdworkingdirectory = service_profile.use_key("service", "systemdworkingdirectory");
    let systemduserenvironment = service_profile.use_key("service", "systemduserenvironment");
    let execstart = service_profile.use_key("service", "execstart");
    let execstartpre = service_profile.use_key("service", "execstartpre");
    let execrestartpre = service_profile.use_key("service", "execrestartpre");
    let execstoppost = service_profile.use_key("service", "execstoppost");
    let limitnofile = service_profile.use_key("service", "limitnofile");
    let limitcpu = service_profile.use_key("service", "limitcpu");
    let limitcore = service_profile.use_key("service", "limitcore");
    let limitnproc = service_profile.use_key("service", "limitnproc");
    let limitfsize = service_profile.use_key("service", "limitfsize");
    let limitas = service_profile.use_key("service", "limitas");
    let limitrss = service_profile.use_key("service", "limitrss");
    let limitdata = service_profile.use_key("service", "limitdata");
    let limitstack = service_profile.use_key("service", "limitstack");
    let limitmemory = service_profile.use_key("service", "limitmemory");
    let limitmemlock = service_profile.use_key("service", "limitmemlock");
    let limitnice = service_profile.use_key("service", "limitnice");
    let limitsigpending = service_profile.use_key("service", "limitsigpending");
    let limitpipe = service_profile.use_key("service", "limitpipe");
    let limitmsgqueue = service_profile.use_key("service", "limitmsgqueue");
    let limitlocks = service_profile.use_key("service", "limitlocks");
    let killmode = service_profile.use_key("service", "killmode");
    let killsignal = service_profile.use_key("service", "killsignal");
    let sendsigkill = service_profile.use_key("service", "sendsigkill");
    let sendsighup = service_profile.use_key("service", "sendsighup");
    let rootdirectorystartonly = service_profile.use_key("service", "rootdirectorystartonly");
    let permissionsstartonly = service_profile.use_key("service", "permissionsstartonly");
    let standardinput = service_profile.use_key("service", "standardinput");
    let standardoutput = service_profile.use_key("service", "standardoutput");
    let standarderror = service_profile.use_key("service", "standarderror");
    let user = service_profile.use_key("service", "user");
    let group = service_profile.use_key("service", "group");
    let umask = service_profile.use_key("service", "umask");
    let environment = service_profile.use_key("service", "environment");
    let environmentfile = service_profile.use_key("service", "environmentfile");
    let environmentdirectory = service_profile.use_key("service", "environmentdirectory");
    let environmentuser = service_profile.use_key("service", "environmentuser");
    let environmentappendpath = service_profile.use_key("service", "environmentappendpath");
    #[cfg(target_os = "linux")]
    let utmpidentifier = service_profile.use_key("service", "utmpidentifier");
    let ttypath = service_profile.use_key("service", "ttypath");
    let ttyfromenv = service_profile.use_key("service", "ttyfromenv");
    let ttyreset = service_profile.use_key("service", "ttyreset");
    let ttyprompt = service_profile.use_key("service", "ttyprompt");
    let bannerfile = service_profile.use_key("service", "bannerfile");
    let bannerline = service_profile.use_key("service", "bannerline");
    let ttyvhangup = service_profile.use_key("service", "ttyvhangup");
    let remainafterexit = service_profile.use_key("service", "remainafterexit");
    let processgroupleader = service_profile.use_key("service", "processgroupleader");
    let sessionleader = service_profile.use_key("service", "sessionleader");
    let restart = service_profile.use_key("service", "restart");
    let restartsec = service_profile.use_key("service", "restartsec");
    #[cfg(target_os = "linux")]
    let privatetmp = service_profile.use_key("service", "privatetmp");
    #[cfg(target_os = "linux")]
    let privatedevices = service_profile.use_key("service", "privatedevices");
    #[cfg(target_os = "linux")]
    let privatenetwork = service_profile.use_key("service", "privatenetwork");
    #[cfg(target_os = "linux")]
    let mountflags = service_profile.use_key("service", "mountflags");
    #[cfg(target_os = "linux")]
    let ioschedulingclass = service_profile.use_key("service", "ioschedulingclass");
    #[cfg(target_os = "linux")]
    let ioschedulingpriority = service_profile.use_key("service", "ioschedulingpriority");
    #[cfg(target_os = "linux")]
    let cpuschedulingresetonfork =
        service_profile.use_key("service", "cpuschedulingresetonfork");
    #[cfg(target_os = "linux")]
    let numainterleave = service_profile.use_key("service", "numainterleave");
    #[cfg(target_os = "linux")]
    let numamembind = service_profile.use_key("service", "numamembind");
    #[cfg(target_os = "linux")]
    let numacpunodebind = service_profile.use_key("service", "numacpunodebind");
    #[cfg(target_os = "linux")]
    let numaphyscpubind = service_profile.use_key("service", "numaphyscpubind");
    #[cfg(target_os = "linux")]
    let numalocalalloc = service_profile.use_key("service", "numalocalalloc");
    #[cfg(target_os = "linux")]
    let numapreferred = service_profile.use_key("service", "numapreferred");
    #[cfg(target_os = "linux")]
    let tasksmax = service_profile.use_key("service", "tasksmax");
    #[cfg(target_os = "linux")]
    let memorylimit = service_profile.use_key("service", "memorylimit");
    #[cfg(target_os = "linux")]
    let ioweight = service_profile.use_key("service", "ioweight");
    #[cfg(target_os = "linux")]
    let iodeviceweight = service_profile.use_key("service", "iodeviceweight");
    let oomscoreadjust = service_profile.use_key("service", "oomscoreadjust");
    let cpuschedulingpolicy = service_profile.use_key("service", "cpuschedulingpolicy");
    let cpuschedulingpriority = service_profile.use_key("service", "cpuschedulingpriority");
    let service_defaultdependencies = service_profile.use_key("unit", "defaultdependencies");
    let service_earlysupervise = service_profile.use_key("unit", "earlysupervise");
    let service_after = service_profile.use_key("unit", "after");
    let service_before = service_profile.use_key("unit", "before");
    let service_conflicts = service_profile.use_key("unit", "conflicts");
    let service_wants = service_profile.use_key("unit", "wants");
    let service_requires = service_profile.use_key("unit", "requires");
    let service_requisite = service_profile.use_key("unit", "requisite");
    let service_description = service_profile.use_key("unit", "description");
    let service_wantedby = service_profile.use_key("install", "wantedby");
    let service_requiredby = service_profile.use_key("install", "requiredby");
    let service_stoppedby = service_profile.use_key("install", "stoppedby");
    let service_ucspirules = service_profile.use_key("service", "ucspirules");
    let service_logucspirules = service_profile.use_key("service", "logucspirules");

    if let Some(user) = user {
        let u = names.substitute(user.last_setting());
        names.set_user(&u);
    }

    /* Refuse the unsupported combinations ********************************/

    if let Some(type_) = type_ {
        let t = type_.last_setting().to_lowercase();
        if !matches!(t.as_str(), "simple" | "forking" | "oneshot" | "dbus") {
            return Err(Error::config(
                &service_filename,
                format!("{t}: Not a supported service type."),
            ));
        }
    }
    let is_oneshot = type_.is_some_and(|t| t.last_setting().to_lowercase() == "oneshot");
    let is_dbus = type_.is_some_and(|t| t.last_setting().to_lowercase() == "dbus");
    if execstart.is_none() && !is_target && !is_oneshot {
        return Err(Error::config(
            &service_filename,
            "Missing mandatory ExecStart entry.",
        ));
    }
    if is_socket_activated {
        if listenstream.is_none()
            && listendatagram.is_none()
            && listenfifo.is_none()
            && listennetlink.is_none()
        {
            return Err(Error::config(
                &socket_filename,
                "Missing mandatory ListenStream/ListenDatagram/ListenFIFO entry.",
            ));
        }
        if is_socket_accept {
            if listendatagram.is_some() {
                return Err(Error::config(
                    &socket_filename,
                    "ListenDatagram sockets may not have Accept=yes.",
                ));
            }
            if listenfifo.is_some() {
                return Err(Error::config(
                    &socket_filename,
                    "ListenFIFO sockets may not have Accept=yes.",
                ));
            }
            if listennetlink.is_some() {
                return Err(Error::config(
                    &socket_filename,
                    "ListenNetlink sockets may not have Accept=yes.",
                ));
            }
        }
    }
    let is_ucspirules = is_bool_true2(socket_ucspirules, service_ucspirules, false);
    if is_ucspirules && (!is_socket_activated || !is_socket_accept) {
        return Err(Error::config(
            &socket_filename,
            "UCSPI rules only apply to accepting sockets.",
        ));
    }
    // "control-group" is the silent default stop mechanism; nothing else is
    // available.
    if let Some(killmode) = killmode {
        if killmode.last_setting().to_lowercase() != "control-group" {
            return Err(Error::config(
                &service_filename,
                format!(
                    "{}: Unsupported service stop mechanism.",
                    killmode.last_setting()
                ),
            ));
        }
    }
    let killsignal_is_term =
        killsignal.is_some_and(|k| k.last_setting().to_lowercase() == "sigterm");
    if let Some(killsignal) = killsignal {
        if !killsignal_is_term {
            killsignal.set_unused();
        }
    }
    if let Some(runtimedirectory) = runtimedirectory {
        for setting in runtimedirectory.all_settings() {
            let dir = names.substitute(setting);
            // More draconian than the source format requires; these names
            // are later handed to rm running as the superuser.
            if dir.is_empty() || dir.starts_with('.') {
                return Err(Error::config(
                    &service_filename,
                    format!("{dir}: Hidden runtime directories are not permitted."),
                ));
            }
            if dir.contains('/') {
                return Err(Error::config(
                    &service_filename,
                    format!("{dir}: Slash is not permitted in runtime directory names."),
                ));
            }
            if dir.contains(';') {
                return Err(Error::config(
                    &service_filename,
                    format!("{dir}: Semicolon is not permitted in runtime directory names."),
                ));
            }
        }
    }

    /* Common command strings *********************************************/

    #[cfg(target_os = "linux")]
    let jail = String::new();
    #[cfg(not(target_os = "linux"))]
    let jail = match jailid {
        Some(jailid) => format!(
            "jexec {}\n",
            quote(&names.substitute(jailid.last_setting()))
        ),
        None => String::new(),
    };
    #[cfg(target_os = "linux")]
    let (control_group, delegate_control_group) = {
        let mut control_group = String::from("move-to-control-group ");
        if let Some(slice) = slice {
            control_group
                .push_str(&format!("../{}/", quote(&names.substitute(slice.last_setting()))));
        }
        if is_instance {
            control_group.push_str(&format!(
                "{}.{kind}\n",
                quote(&format!("{}@", names.escaped_prefix()))
            ));
            control_group.push_str("move-to-control-group ");
        }
        control_group.push_str(&format!("{}.{kind}\n", quote(names.bundle_basename())));
        let delegate_control_group = if is_bool_true(delegate, false) {
            format!(
                "foreground delegate-control-group-to {} ;\n",
                quote(names.user())
            )
        } else {
            String::new()
        };
        (control_group, delegate_control_group)
    };
    #[cfg(not(target_os = "linux"))]
    let (control_group, delegate_control_group) = (String::new(), String::new());

    let mut priority = String::new();
    #[cfg(target_os = "linux")]
    {
        if ioschedulingclass.is_some() || ioschedulingpriority.is_some() {
            priority.push_str("ionice");
            if let Some(class) = ioschedulingclass {
                priority.push_str(&format!(
                    " --class {}",
                    quote(&names.substitute(class.last_setting()))
                ));
            }
            if let Some(prio) = ioschedulingpriority {
                priority.push_str(&format!(
                    " --classdata {}",
                    quote(&names.substitute(prio.last_setting()))
                ));
            }
            priority.push('\n');
        }
        if cpuschedulingpolicy.is_some()
            || cpuschedulingpriority.is_some()
            || cpuschedulingresetonfork.is_some()
        {
            priority.push_str("chrt");
            if is_bool_true(cpuschedulingresetonfork, false) {
                priority.push_str(" --reset-on-fork");
            }
            if let Some(policy) = cpuschedulingpolicy {
                priority.push_str(&format!(
                    " --{}",
                    quote(&names.substitute(policy.last_setting()))
                ));
            }
            match cpuschedulingpriority {
                Some(prio) => priority.push_str(&format!(
                    " {}",
                    quote(&names.substitute(prio.last_setting()))
                )),
                None => priority.push_str(" 0"),
            }
            priority.push('\n');
        }
        if numalocalalloc.is_some()
            || numainterleave.is_some()
            || numamembind.is_some()
            || numacpunodebind.is_some()
            || numaphyscpubind.is_some()
            || numapreferred.is_some()
        {
            priority.push_str("numactl");
            if is_bool_true(numalocalalloc, false) {
                priority.push_str(" --localalloc");
            }
            for (option, value) in [
                (" --interleave ", numainterleave),
                (" --membind ", numamembind),
                (" --cpunodebind ", numacpunodebind),
                (" --physcpubind ", numaphyscpubind),
                (" --preferred ", numapreferred),
            ] {
                if let Some(value) = value {
                    priority.push_str(option);
                    priority.push_str(&quote(&names.substitute(value.last_setting())));
                }
            }
            priority.push('\n');
        }
        for (option, value) in [
            ("pids.max", tasksmax),
            ("memory.max", memorylimit),
            ("io.weight", ioweight),
            ("io.weight", iodeviceweight),
        ] {
            if let Some(value) = value {
                priority.push_str(&format!(
                    "#set-control-group-option {option} {}\n",
                    quote(&names.substitute(value.last_setting()))
                ));
            }
        }
    }
    #[cfg(not(target_os = "linux"))]
    {
        if let Some(policy_value) = cpuschedulingpolicy {
            let policy = names.substitute(policy_value.last_setting()).to_lowercase();
            match policy.as_str() {
                "batch" | "other" => {
                    if let Some(prio) = cpuschedulingpriority {
                        prio.set_unused();
                    }
                }
                "fifo" | "rr" | "idle" => {
                    priority.push_str(if policy == "idle" { "idprio" } else { "rtprio" });
                    match cpuschedulingpriority {
                        Some(prio) => priority.push_str(&format!(
                            " {}",
                            quote(&names.substitute(prio.last_setting()))
                        )),
                        None => priority.push_str(" 0"),
                    }
                    priority.push('\n');
                }
                _ => {
                    if let Some(prio) = cpuschedulingpriority {
                        prio.set_unused();
                    }
                    policy_value.set_unused();
                }
            }
        }
    }
    if let Some(oom) = oomscoreadjust {
        // The -- is necessary because the adjustment may be a negative
        // number, starting with a dash.
        priority.push_str(&format!(
            "oom-kill-protect -- {}\n",
            quote(&names.substitute(oom.last_setting()))
        ));
    }

    let mut chroot = String::new();
    if let Some(rootdirectory) = rootdirectory {
        chroot.push_str(&format!(
            "chroot {}\n",
            quote(&names.substitute(rootdirectory.last_setting()))
        ));
    }
    #[cfg(target_os = "linux")]
    {
        let is_private_tmp = is_bool_true(privatetmp, false);
        let is_private_network = is_bool_true(privatenetwork, false);
        let is_private_devices = is_bool_true(privatedevices, false);
        if is_private_tmp || is_private_network || is_private_devices {
            chroot.push_str("unshare");
            if is_private_tmp || is_private_devices {
                chroot.push_str(" --mount");
            }
            if is_private_network {
                chroot.push_str(" --network");
            }
            chroot.push('\n');
            if is_private_tmp || is_private_devices {
                chroot.push_str("set-mount-object --recursive slave /\n");
                chroot.push_str("make-private-fs");
                if is_private_tmp {
                    chroot.push_str(" --temp");
                }
                if is_private_devices {
                    chroot.push_str(" --devices");
                }
                chroot.push('\n');
            }
        }
        if let Some(mountflags) = mountflags {
            chroot.push_str(&format!(
                "set-mount-object --recursive {} /\n",
                quote(mountflags.last_setting())
            ));
        } else if is_private_tmp || is_private_devices {
            chroot.push_str("set-mount-object --recursive shared /\n");
        }
    }
    let chrootall = !is_bool_true(rootdirectorystartonly, false);

    let mut setsid = String::new();
    if is_bool_true(sessionleader, false) {
        setsid.push_str("setsid\n");
    }
    if is_bool_true(processgroupleader, false) {
        setsid.push_str("setpgrp\n");
    }

    let mut envuidgid = String::new();
    let mut setuidgid = String::new();
    if user.is_some() {
        if rootdirectory.is_some() {
            envuidgid.push_str(&format!("envuidgid {}\n", quote(names.user())));
            setuidgid.push_str("setuidgid-fromenv\n");
        } else {
            setuidgid.push_str(&format!("setuidgid {}\n", quote(names.user())));
        }
        if is_bool_true(systemduserenvironment, systemd_quirks) {
            // Replicates the user-environment reset quirk.
            setuidgid.push_str("userenv\n");
        }
    } else if let Some(group) = group {
        setuidgid.push_str(&format!(
            "setgid {}\n",
            quote(&names.substitute(group.last_setting()))
        ));
    }
    let setuidgidall = !is_bool_true(permissionsstartonly, false);

    // Services run in / by default here; supervision suites traditionally
    // run them in the service directory instead.
    let mut chdir = String::new();
    if let Some(wd) = workingdirectory {
        chdir.push_str(&format!(
            "chdir {}\n",
            quote(&names.substitute(wd.last_setting()))
        ));
    } else if rootdirectory.is_some()
        || is_bool_true(
            systemdworkingdirectory,
            systemd_quirks && !is_socket_activated,
        )
    {
        chdir.push_str("chdir /\n");
    }

    let mut createrundir = String::new();
    let mut removerundir = String::new();
    if let Some(runtimedirectory) = runtimedirectory {
        let mut dirs = String::new();
        let mut dirs_slash = String::new();
        for setting in runtimedirectory.all_settings() {
            let dir = format!("/run/{}", names.substitute(setting));
            dirs.push_str(&quote(&dir));
            dirs_slash.push_str(&quote(&dir));
            dirs_slash.push('/');
        }
        createrundir.push_str("foreground mkdir");
        if let Some(mode) = runtimedirectorymode {
            createrundir.push_str(&format!(
                " -m {}",
                quote(&names.substitute(mode.last_setting()))
            ));
        }
        createrundir.push_str(&format!(" -- {dirs} ;\n"));
        if user.is_some() || runtimedirectoryowner.is_some() {
            createrundir.push_str("foreground chown ");
            match runtimedirectoryowner {
                Some(owner) => {
                    createrundir.push_str(&quote(&names.substitute(owner.last_setting())))
                }
                None => {
                    if let Some(user) = user {
                        createrundir.push_str(&quote(&names.substitute(user.last_setting())));
                    }
                }
            }
            if let Some(group) = group {
                createrundir.push_str(&format!(
                    ":{}",
                    quote(&names.substitute(group.last_setting()))
                ));
            }
            createrundir.push_str(&format!(" -- {dirs} ;\n"));
        }
        // The trailing slash helps ensure that what is removed, as the
        // superuser and unconditionally, is a directory.
        removerundir.push_str(&format!("foreground rm -r -f -- {dirs_slash} ;\n"));
    }

    let mut softlimit = String::new();
    {
        let caps = [
            (" -o ", limitnofile),
            (" -t ", limitcpu),
            (" -c ", limitcore),
            (" -p ", limitnproc),
            (" -f ", limitfsize),
            (" -a ", limitas),
            (" -r ", limitrss),
            (" -d ", limitdata),
            (" -s ", limitstack),
            (" -m ", limitmemory),
            (" -l ", limitmemlock),
        ];
        if caps.iter().any(|(_, v)| v.is_some()) {
            softlimit.push_str("softlimit");
            for (option, value) in caps {
                if let Some(value) = value {
                    softlimit.push_str(option);
                    softlimit.push_str(&quote(value.last_setting()));
                }
            }
            softlimit.push('\n');
        }
        let ulimits = [
            (" -e ", limitnice),
            (" -i ", limitsigpending),
            (" -p ", limitpipe),
            (" -q ", limitmsgqueue),
            (" -x ", limitlocks),
        ];
        if ulimits.iter().any(|(_, v)| v.is_some()) {
            softlimit.push_str("ulimit");
            for (option, value) in ulimits {
                if let Some(value) = value {
                    softlimit.push_str(option);
                    softlimit.push_str(&quote(value.last_setting()));
                }
            }
            softlimit.push('\n');
        }
    }

    let mut env = String::new();
    if let Some(environmentfile) = environmentfile {
        for setting in environmentfile.all_settings() {
            let stripped = strip_leading_minus(setting);
            let minus = stripped.len() != setting.len();
            env.push_str(&format!(
                "read-conf {}{}\n",
                if minus { "--oknofile " } else { "" },
                quote(&names.substitute(stripped))
            ));
        }
    }
    if let Some(environmentdirectory) = environmentdirectory {
        for setting in environmentdirectory.all_settings() {
            env.push_str(&format!("envdir {}\n", quote(&names.substitute(setting))));
        }
    }
    if let Some(environmentuser) = environmentuser {
        env.push_str(&format!(
            "envuidgid {}\n",
            quote(&names.substitute(environmentuser.last_setting()))
        ));
    }
    if let Some(environment) = environment {
        for datum in environment.all_settings() {
            for item in names.substitute_all(&split_list(datum)) {
                let (var, val) = split_env_assignment(&item);
                env.push_str(&format!("setenv {} {}\n", quote(var), quote(val)));
            }
        }
    }
    if let Some(environmentappendpath) = environmentappendpath {
        for datum in environmentappendpath.all_settings() {
            for item in names.substitute_all(&split_list(datum)) {
                let (var, val) = split_env_assignment(&item);
                env.push_str(&format!("appendpath {} {}\n", quote(var), quote(val)));
            }
        }
    }

    let mut um = String::new();
    if let Some(umask) = umask {
        um.push_str(&format!("umask {}\n", quote(umask.last_setting())));
    }

    let is_remain = is_bool_true(remainafterexit, false);
    let is_use_hangup = is_bool_true(sendsighup, false);
    let is_use_kill = is_bool_true(sendsigkill, true);

    /* Standard descriptor plumbing ***************************************/

    let mut redirect = String::new();
    let mut login_prompt = String::new();
    let mut greeting_message = String::new();
    let mut socket_redirect = String::new();

    let setting_is = |v: Option<&Value>, wanted: &[&str]| {
        v.is_some_and(|v| wanted.contains(&v.last_setting().to_lowercase().as_str()))
    };
    let stdin_socket = setting_is(standardinput, &["socket"]);
    let stdin_tty = setting_is(standardinput, &["tty", "tty-force"]);
    let stdout_socket = setting_is(standardoutput, &["socket"]);
    let stdout_tty = setting_is(standardoutput, &["tty", "tty-force"]);
    let stdout_inherit = setting_is(standardoutput, &["inherit"]);
    let stderr_socket = setting_is(standarderror, &["socket"]);
    let stderr_tty = setting_is(standarderror, &["tty", "tty-force"]);
    let stderr_inherit = setting_is(standarderror, &["inherit"]);
    let stderr_log = setting_is(standarderror, &["log"]);
    // Un-use anything that is not inherit/tty/socket/log so it is reported.
    if let Some(v) = standardinput {
        if !stdin_socket && !stdin_tty {
            v.set_unused();
        }
    }
    if let Some(v) = standardoutput {
        if !stdout_inherit && !stdout_socket && !stdout_tty {
            v.set_unused();
        }
    }
    if let Some(v) = standarderror {
        if !stderr_inherit && !stderr_socket && !stderr_tty && !stderr_log {
            v.set_unused();
        }
    }

    let forcing = |key: &str, value: &str| {
        eprintln!(
            "{prog}: WARNING: {service_filename}: Forcing setting: [Service] {key} = {value}"
        );
    };
    let superfluous = |key: &str| {
        eprintln!("{prog}: INFO: {service_filename}: Superfluous setting: [Service] {key}");
    };

    if is_socket_activated {
        if is_socket_accept {
            // Per-connection services have no non-socket mode: input and
            // output are the connection, error is the log.
            if (standardinput.is_some() || systemd_quirks) && !stdin_socket {
                forcing("StandardInput", "socket");
            }
            if (standardoutput.is_some() || systemd_quirks) && !stdout_inherit && !stdout_socket {
                forcing("StandardOutput", "socket");
            }
            if standarderror.is_some() && !stderr_log {
                forcing("StandardError", "log");
            }
            if !systemd_quirks {
                if stdin_socket {
                    superfluous("StandardInput");
                }
                if stdout_inherit || stdout_socket {
                    superfluous("StandardOutput");
                }
                if stderr_log {
                    superfluous("StandardError");
                }
            }
        } else {
            // Listening-socket services redirect after the listen, because
            // "inherit" may mean standard input already moved to the
            // socket.
            if stdin_socket {
                socket_redirect.push_str("fdmove -c 0 3\n");
            }
            if stdout_socket {
                socket_redirect.push_str("fdmove -c 1 3\n");
            }
            if stderr_socket {
                socket_redirect.push_str("fdmove -c 2 3\n");
            }
            if stdin_tty {
                if (standardoutput.is_some() || systemd_quirks) && !stdout_inherit && !stdout_tty
                {
                    forcing("StandardOutput", "tty");
                }
                if standarderror.is_some() && !stderr_inherit && !stderr_tty && !stderr_log {
                    forcing("StandardError", "tty");
                }
                if !systemd_quirks {
                    if stdout_inherit || stdout_tty {
                        superfluous("StandardOutput");
                    }
                    if stderr_inherit || stderr_tty {
                        superfluous("StandardError");
                    }
                }
            } else {
                if stdout_tty || stderr_tty {
                    eprintln!(
                        "{prog}: WARNING: {service_filename}: Redirection ignored for non-controlling-terminal service."
                    );
                }
                if stdout_inherit {
                    socket_redirect.push_str("fdmove -c 1 0\n");
                    if (standarderror.is_none() && systemd_quirks) || stderr_inherit {
                        socket_redirect.push_str("fdmove -c 2 1\n");
                    }
                }
                if !systemd_quirks && stderr_log {
                    superfluous("StandardError");
                }
            }
        }
    } else {
        if stdin_socket || stdout_socket || stderr_socket {
            eprintln!(
                "{prog}: WARNING: {service_filename}: Redirection ignored for non-socket service."
            );
        }
        if stdin_tty {
            if (standardoutput.is_some() || systemd_quirks) && !stdout_inherit && !stdout_tty {
                forcing("StandardOutput", "tty");
            }
            if standarderror.is_some() && !stderr_inherit && !stderr_tty && !stderr_log {
                forcing("StandardError", "tty");
            }
            if !systemd_quirks {
                if stdout_inherit || stdout_tty {
                    superfluous("StandardOutput");
                }
                if stderr_inherit || stderr_tty {
                    superfluous("StandardError");
                }
            }
        } else {
            if stdout_tty || stderr_tty {
                eprintln!(
                    "{prog}: WARNING: {service_filename}: Redirection ignored for non-controlling-terminal service."
                );
            }
            if stdout_inherit {
                redirect.push_str("fdmove -c 1 0\n");
                if (standarderror.is_none() && systemd_quirks) || stderr_inherit {
                    redirect.push_str("fdmove -c 2 1\n");
                }
            }
            if !systemd_quirks && stderr_log {
                superfluous("StandardError");
            }
        }
    }

    if (ttypath.is_some() || stdin_tty) && !is_bool_true(ttyfromenv, false) {
        let tty = match ttypath {
            Some(ttypath) => names.substitute(ttypath.last_setting()),
            None => "/dev/console".to_owned(),
        };
        redirect.push_str(&format!("vc-get-tty {}\n", quote(&tty)));
    }
    if stdin_tty {
        if stderr_log {
            redirect.push_str("fdmove -c 4 2\n");
        }
        redirect.push_str("open-controlling-tty");
        if is_bool_true(ttyvhangup, false) {
            #[cfg(target_os = "linux")]
            redirect.push_str(" --vhangup");
            #[cfg(not(target_os = "linux"))]
            redirect.push_str(" --revoke");
        }
        redirect.push('\n');
        if stderr_log {
            redirect.push_str("fdmove 2 4\n");
        }
        if is_bool_true(ttyreset, false) {
            login_prompt.push_str("vc-reset-tty\n");
        }
        if is_bool_true(ttyprompt, false) {
            login_prompt.push_str("login-prompt\n");
        }
        #[cfg(target_os = "linux")]
        if let Some(utmpidentifier) = utmpidentifier {
            login_prompt.push_str(&format!(
                "login-process --id {}\n",
                quote(&names.substitute(utmpidentifier.last_setting()))
            ));
        }
    } else {
        for v in [ttyvhangup, ttyreset, ttyprompt] {
            if let Some(v) = v {
                v.set_unused();
            }
        }
        #[cfg(target_os = "linux")]
        if let Some(utmpidentifier) = utmpidentifier {
            utmpidentifier.set_unused();
        }
    }
    if let Some(bannerfile) = bannerfile {
        greeting_message.push_str(&format!(
            "login-banner {}\n",
            quote(&names.substitute(bannerfile.last_setting()))
        ));
    }
    if let Some(bannerline) = bannerline {
        for setting in bannerline.all_settings() {
            greeting_message.push_str(&format!(
                "line-banner {}\n",
                quote(&names.substitute(setting))
            ));
        }
    }

    /* Compose the script bodies ******************************************/

    let mut perilogue_setup_environment = String::new();
    perilogue_setup_environment.push_str(&jail);
    perilogue_setup_environment.push_str(&control_group);
    perilogue_setup_environment.push_str(&priority);
    if setuidgidall {
        perilogue_setup_environment.push_str(&envuidgid);
    }
    perilogue_setup_environment.push_str(&env);
    perilogue_setup_environment.push_str(&softlimit);
    perilogue_setup_environment.push_str(&um);
    if chrootall {
        perilogue_setup_environment.push_str(&chroot);
    }
    perilogue_setup_environment.push_str(&chdir);
    perilogue_setup_environment.push_str(&redirect);

    let mut perilogue_drop_privileges = String::new();
    if setuidgidall {
        perilogue_drop_privileges.push_str(&setuidgid);
    }

    let mut setup_environment = String::new();
    setup_environment.push_str(&jail);
    setup_environment.push_str(&control_group);
    setup_environment.push_str(&priority);
    setup_environment.push_str(&envuidgid);
    setup_environment.push_str(&env);
    setup_environment.push_str(&setsid);
    setup_environment.push_str(&softlimit);
    setup_environment.push_str(&um);
    setup_environment.push_str(&chroot);
    setup_environment.push_str(&chdir);
    setup_environment.push_str(&redirect);
    if is_oneshot {
        setup_environment.push_str(&createrundir);
    }

    let drop_privileges = setuidgid.clone();

    let mut execute_command = String::new();
    execute_command.push_str(&login_prompt);
    execute_command.push_str(&greeting_message);
    if is_oneshot {
        if let Some(execstartpre) = execstartpre {
            let cmds: Vec<String> = execstartpre
                .all_settings()
                .iter()
                .map(|s| names.substitute(&shell_expand(strip_leading_minus(s))))
                .collect();
            execute_command.push_str(&foreground_each(&cmds));
        }
    }
    match execstart {
        Some(execstart) => {
            let cmds: Vec<String> = execstart
                .all_settings()
                .iter()
                .map(|s| names.substitute(&shell_expand(strip_leading_minus(s))))
                .collect();
            execute_command.push_str(&chain_commands(&cmds));
        }
        None => {
            execute_command.push_str(if is_remain { "true" } else { "pause" });
            execute_command.push('\n');
        }
    }

    /* Write the bundle ***************************************************/

    let root_path = if bundle_root.is_empty() {
        Path::new(".")
    } else {
        Path::new(bundle_root.as_str())
    };
    let bundle = Bundle::create_etc(root_path, names.bundle_basename(), true, cli.etc_bundle)?;
    bundle.make_skeleton()?;

    let mut start = String::new();
    let mut stop = String::new();
    let mut run = String::new();
    let mut restart_script = String::new();
    let mut service_script = String::new();

    let generated_from = if is_socket_activated {
        &socket_filename
    } else {
        &service_filename
    };
    start.push_str("#!/bin/nosh\n");
    start.push_str(&multi_line_comment(&format!(
        "Start file generated from {generated_from}"
    )));
    run.push_str("#!/bin/nosh\n");
    run.push_str(&multi_line_comment(&format!(
        "Run file generated from {generated_from}"
    )));

    {
        // Everything from the listener to the unit's command goes into the
        // run script, except for oneshot services, where it all goes into
        // start and the run script degenerates.
        let mut body = String::new();
        if is_socket_activated {
            if let Some(socket_description) = socket_description {
                for setting in socket_description.all_settings() {
                    body.push_str(&multi_line_comment(&names.substitute(setting)));
                }
            }
            if let Some(listenstream) = listenstream {
                if is_local_socket_name(listenstream.last_setting()) {
                    body.push_str("local-stream-socket-listen ");
                    if !is_socket_accept {
                        body.push_str("--systemd-compatibility ");
                    }
                    if let Some(backlog) = backlog {
                        body.push_str(&format!("--backlog {} ", quote(backlog.last_setting())));
                    }
                    for (option, value) in [
                        ("--mode ", socketmode),
                        ("--user ", socketuser),
                        ("--group ", socketgroup),
                    ] {
                        if let Some(value) = value {
                            body.push_str(option);
                            body.push_str(&quote(&names.substitute(value.last_setting())));
                            body.push(' ');
                        }
                    }
                    if passcredentials.is_some() {
                        body.push_str("--pass-credentials ");
                    }
                    if passsecurity.is_some() {
                        body.push_str("--pass-security ");
                    }
                    body.push_str(&quote(&names.substitute(listenstream.last_setting())));
                    body.push('\n');
                } else {
                    let (address, port) =
                        split_ip_socket_name(&names.substitute(listenstream.last_setting()));
                    body.push_str("tcp-socket-listen ");
                    if !is_socket_accept {
                        body.push_str("--systemd-compatibility ");
                    }
                    if let Some(backlog) = backlog {
                        body.push_str(&format!("--backlog {} ", quote(backlog.last_setting())));
                    }
                    if setting_is(bindipv6only, &["both"]) {
                        body.push_str("--combine4and6 ");
                    }
                    if is_bool_true(reuseport, false) {
                        body.push_str("--reuse-port ");
                    }
                    if is_bool_true(freebind, false) {
                        body.push_str("--bind-to-any ");
                    }
                    body.push_str(&format!("{} {}\n", quote(&address), quote(&port)));
                }
            }
            if let Some(listendatagram) = listendatagram {
                if is_local_socket_name(listendatagram.last_setting()) {
                    body.push_str("local-datagram-socket-listen --systemd-compatibility ");
                    if let Some(backlog) = backlog {
                        body.push_str(&format!("--backlog {} ", quote(backlog.last_setting())));
                    }
                    for (option, value) in [
                        ("--mode ", socketmode),
                        ("--user ", socketuser),
                        ("--group ", socketgroup),
                    ] {
                        if let Some(value) = value {
                            body.push_str(option);
                            body.push_str(&quote(&names.substitute(value.last_setting())));
                            body.push(' ');
                        }
                    }
                    if passcredentials.is_some() {
                        body.push_str("--pass-credentials ");
                    }
                    if passsecurity.is_some() {
                        body.push_str("--pass-security ");
                    }
                    body.push_str(&quote(&names.substitute(listendatagram.last_setting())));
                    body.push('\n');
                } else {
                    let (address, port) =
                        split_ip_socket_name(&names.substitute(listendatagram.last_setting()));
                    body.push_str("udp-socket-listen --systemd-compatibility ");
                    if setting_is(bindipv6only, &["both"]) {
                        body.push_str("--combine4and6 ");
                    }
                    if is_bool_true(reuseport, false) {
                        body.push_str("--reuse-port ");
                    }
                    body.push_str(&format!("{} {}\n", quote(&address), quote(&port)));
                }
            }
            if let Some(listenfifo) = listenfifo {
                body.push_str("fifo-listen --systemd-compatibility ");
                // Backlog and credential passing do not apply to FIFOs;
                // leave them to the unused-setting report.
                if let Some(backlog) = backlog {
                    backlog.set_unused();
                }
                for (option, value) in [
                    ("--mode ", socketmode),
                    ("--user ", socketuser),
                    ("--group ", socketgroup),
                ] {
                    if let Some(value) = value {
                        body.push_str(option);
                        body.push_str(&quote(&names.substitute(value.last_setting())));
                        body.push(' ');
                    }
                }
                if let Some(passcredentials) = passcredentials {
                    passcredentials.set_unused();
                }
                if let Some(passsecurity) = passsecurity {
                    passsecurity.set_unused();
                }
                body.push_str(&quote(&names.substitute(listenfifo.last_setting())));
                body.push('\n');
            }
            if let Some(listennetlink) = listennetlink {
                let (protocol, multicast_group) =
                    split_netlink_socket_name(&names.substitute(listennetlink.last_setting()));
                body.push_str("netlink-datagram-socket-listen --systemd-compatibility ");
                if is_bool_true(netlinkraw, false) {
                    body.push_str("--raw ");
                }
                if let Some(backlog) = backlog {
                    body.push_str(&format!("--backlog {} ", quote(backlog.last_setting())));
                }
                if let Some(receivebuffer) = receivebuffer {
                    body.push_str(&format!(
                        "--receive-buffer-size {} ",
                        quote(receivebuffer.last_setting())
                    ));
                }
                body.push_str(&format!(
                    "{} {}\n",
                    quote(&protocol),
                    quote(&multicast_group)
                ));
            }
            body.push_str(&setup_environment);
            body.push_str(&drop_privileges);
            if is_socket_accept {
                if let Some(listenstream) = listenstream {
                    if is_local_socket_name(listenstream.last_setting()) {
                        body.push_str("local-stream-socket-accept ");
                        if let Some(maxconnections) = maxconnections {
                            body.push_str(&format!(
                                "--connection-limit {} ",
                                quote(maxconnections.last_setting())
                            ));
                        }
                        body.push('\n');
                    } else {
                        body.push_str("tcp-socket-accept ");
                        if let Some(maxconnections) = maxconnections {
                            body.push_str(&format!(
                                "--connection-limit {} ",
                                quote(maxconnections.last_setting())
                            ));
                        }
                        if is_bool_true(keepalive, false) {
                            body.push_str("--keepalives ");
                        }
                        if is_bool_true(nodelay, false) {
                            body.push_str("--no-delay ");
                        }
                        body.push('\n');
                    }
                }
            }
            if is_ucspirules {
                body.push_str("ucspi-socket-rules-check");
                if is_bool_true2(socket_logucspirules, service_logucspirules, false) {
                    body.push_str(" --verbose");
                }
                body.push('\n');
            }
            body.push_str("./service\n");

            service_script.push_str("#!/bin/nosh\n");
            service_script.push_str(&multi_line_comment(&format!(
                "Service file generated from {service_filename}"
            )));
            if let Some(service_description) = service_description {
                for setting in service_description.all_settings() {
                    service_script.push_str(&multi_line_comment(&names.substitute(setting)));
                }
            }
            service_script.push_str(&socket_redirect);
            service_script.push_str(&execute_command);
        } else {
            if let Some(service_description) = service_description {
                for setting in service_description.all_settings() {
                    body.push_str(&multi_line_comment(&names.substitute(setting)));
                }
            }
            body.push_str(&setup_environment);
            body.push_str(&drop_privileges);
            body.push_str(&execute_command);
        }
        if is_oneshot {
            start.push_str(&body);
            run.push_str(if is_remain { "true" } else { "pause" });
            run.push('\n');
        } else {
            run.push_str(&body);
            if execstartpre.is_some() || runtimedirectory.is_some() {
                start.push_str(&perilogue_setup_environment);
                start.push_str(&delegate_control_group);
                start.push_str(&createrundir);
                start.push_str(&perilogue_drop_privileges);
                match execstartpre {
                    Some(execstartpre) => {
                        let cmds: Vec<String> = execstartpre
                            .all_settings()
                            .iter()
                            .map(|s| names.substitute(&shell_expand(strip_leading_minus(s))))
                            .collect();
                        start.push_str(&chain_commands(&cmds));
                        start.push('\n');
                    }
                    None => start.push_str("true\n"),
                }
            } else {
                start.push_str("true\n");
            }
        }
    }

    // The restart script is handed "$1 $2" and must branch; a chain
    // pipeline cannot, so it is plain sh.
    restart_script.push_str("#!/bin/sh\n");
    restart_script.push_str(&multi_line_comment(&format!(
        "Restart file generated from {service_filename}"
    )));
    if let Some(restartsec) = restartsec {
        let seconds = restartsec.last_setting();
        // Zero-length sleeps are optimized away.
        if seconds != "0" {
            restart_script.push_str(&format!("sleep {seconds}\n"));
        }
    }
    if let Some(execrestartpre) = execrestartpre {
        let mut s = String::new();
        s.push_str(&perilogue_setup_environment);
        s.push_str(&perilogue_drop_privileges);
        let cmds: Vec<String> = execrestartpre
            .all_settings()
            .iter()
            .map(|c| names.substitute(&shell_expand(strip_leading_minus(c))))
            .collect();
        let mut chained = String::new();
        for (i, cmd) in cmds.iter().enumerate() {
            if i > 0 {
                chained.push_str(" \\;\n");
            }
            if i + 1 < cmds.len() {
                chained.push_str("foreground ");
            }
            chained.push_str(cmd);
        }
        s.push_str(&chained);
        restart_script.push_str(&escape_newlines(&s));
        restart_script.push('\n');
    }
    restart_script.push_str(&restart_policy_script(
        restart.map(|r| r.last_setting()),
        systemd_quirks,
    ));

    stop.push_str("#!/bin/nosh\n");
    stop.push_str(&multi_line_comment(&format!(
        "Stop file generated from {service_filename}"
    )));
    if execstoppost.is_some() || runtimedirectory.is_some() {
        stop.push_str(&perilogue_setup_environment);
        stop.push_str(&removerundir);
        stop.push_str(&perilogue_drop_privileges);
        match execstoppost {
            Some(execstoppost) => {
                let cmds: Vec<String> = execstoppost
                    .all_settings()
                    .iter()
                    .map(|s| names.substitute(&shell_expand(strip_leading_minus(s))))
                    .collect();
                stop.push_str(&chain_commands(&cmds));
                stop.push('\n');
            }
            None => stop.push_str("true\n"),
        }
    } else {
        stop.push_str("true\n");
    }

    bundle.write_script("start", &start)?;
    bundle.write_script("stop", &stop)?;
    bundle.write_script("restart", &restart_script)?;
    bundle.write_script("run", &run)?;
    if is_socket_activated {
        bundle.write_script("service", &service_script)?;
    }

    /* Dependency and installation information ****************************/

    let link = |value: Option<&Value>, subdir: &str| {
        if let Some(value) = value {
            bundle.create_links(&names.substitute(value.last_setting()), subdir);
        }
    };
    link(socket_after, "after/");
    link(service_after, "after/");
    link(socket_before, "before/");
    link(service_before, "before/");
    link(socket_wants, "wants/");
    link(service_wants, "wants/");
    link(socket_requires, "wants/");
    link(service_requires, "wants/");
    link(socket_requisite, "wants/");
    link(service_requisite, "wants/");
    link(socket_conflicts, "conflicts/");
    link(service_conflicts, "conflicts/");
    link(socket_wantedby, "wanted-by/");
    link(service_wantedby, "wanted-by/");
    link(socket_requiredby, "wanted-by/");
    link(service_requiredby, "wanted-by/");
    link(socket_stoppedby, "stopped-by/");
    link(service_stoppedby, "stopped-by/");

    let defaultdependencies = if is_socket_activated {
        is_bool_true2(socket_defaultdependencies, service_defaultdependencies, true)
    } else {
        is_bool_true(service_defaultdependencies, true)
    };
    let earlysupervise = if is_socket_activated {
        is_bool_true2(socket_earlysupervise, service_earlysupervise, cli.etc_bundle)
    } else {
        is_bool_true(service_earlysupervise, cli.etc_bundle)
    };
    if defaultdependencies {
        if is_socket_activated {
            bundle.create_links("sockets.target", "wanted-by/");
        }
        if is_dbus {
            bundle.create_links("dbus.socket", "after/");
            // The D-Bus daemon may not be under this manager on Linux.
            #[cfg(not(target_os = "linux"))]
            bundle.create_links("dbus.socket", "wants/");
        }
        if !is_target {
            bundle.create_links("basic.target", "after/");
            bundle.create_links("basic.target", "wants/");
            bundle.create_links("shutdown.target", "before/");
            bundle.create_links("shutdown.target", "stopped-by/");
        }
    }
    if earlysupervise {
        bundle.early_supervise_link();
    }
    for listen in [listenstream, listendatagram] {
        if let Some(listen) = listen {
            if is_local_socket_name(listen.last_setting()) {
                bundle.make_mount_interdependencies(
                    true,
                    &names.substitute(listen.last_setting()),
                );
            }
        }
    }
    if let Some(listenfifo) = listenfifo {
        bundle
            .make_mount_interdependencies(true, &names.substitute(listenfifo.last_setting()));
    }
    bundle.flag_file("remain", is_remain)?;
    bundle.flag_file("use_hangup", is_use_hangup)?;
    bundle.flag_file("no_kill_signal", !is_use_kill)?;

    /* Final reports ******************************************************/

    socket_profile.report_unused(prog);
    service_profile.report_unused(prog);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EXIT_FAILURE;

    fn run(args: &[&str]) -> i32 {
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        run_convert_systemd_units(&args)
    }

    fn read(path: &std::path::Path) -> String {
        std::fs::read_to_string(path).unwrap()
    }

    #[test]
    fn test_plain_exec_start_service() {
        let dir = tempfile::tempdir().unwrap();
        let unit = dir.path().join("echoer.service");
        std::fs::write(&unit, "[Service]\nExecStart=/bin/echo hi\n").unwrap();
        let out = dir.path().join("bundles");
        std::fs::create_dir(&out).unwrap();
        let rc = run(&[
            "convert-systemd-units",
            "--bundle-root",
            out.to_str().unwrap(),
            unit.to_str().unwrap(),
        ]);
        assert_eq!(rc, 0);
        let bundle = out.join("echoer");
        let run_text = read(&bundle.join("service/run"));
        assert!(run_text.starts_with("#!/bin/nosh\n"), "{run_text}");
        assert!(run_text.ends_with("/bin/echo hi"), "{run_text}");
        // Quirks mode defaults the working directory to /.
        assert!(run_text.contains("chdir /\n"), "{run_text}");
        assert!(!bundle.join("service/remain").exists());
        let start_text = read(&bundle.join("service/start"));
        assert!(start_text.ends_with("true\n"), "{start_text}");
        let restart_text = read(&bundle.join("service/restart"));
        assert!(restart_text.starts_with("#!/bin/sh\n"));
        assert!(restart_text.contains("exec false"), "{restart_text}");
    }

    #[test]
    fn test_socket_accept_service_split() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("ssh.socket"),
            "[Socket]\nListenStream=22\nAccept=yes\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("ssh@.service"),
            "[Service]\nExecStart=/usr/sbin/sshd -i\n",
        )
        .unwrap();
        let out = dir.path().join("bundles");
        std::fs::create_dir(&out).unwrap();
        let arg = dir.path().join("ssh.socket");
        let rc = run(&[
            "convert-systemd-units",
            "--bundle-root",
            out.to_str().unwrap(),
            arg.to_str().unwrap(),
        ]);
        assert_eq!(rc, 0);
        let bundle = out.join("ssh");
        let run_text = read(&bundle.join("service/run"));
        // The listener comes first, the accept helper after the
        // environment slots, and ./service is the exec target.
        let mut lines = run_text.lines().filter(|l| !l.starts_with('#'));
        assert_eq!(lines.next(), Some("tcp-socket-listen \"::0\" 22"));
        let listen = run_text.find("tcp-socket-listen").unwrap();
        let accept = run_text.find("tcp-socket-accept").unwrap();
        let service = run_text.find("./service").unwrap();
        assert!(listen < accept && accept < service, "{run_text}");
        assert!(run_text.trim_end().ends_with("./service"), "{run_text}");
        let service_text = read(&bundle.join("service/service"));
        assert!(service_text.ends_with("/usr/sbin/sshd -i"), "{service_text}");
        // Socket units are wanted by the sockets target by default.
        assert!(bundle.join("wanted-by/sockets").symlink_metadata().is_ok());
    }

    #[test]
    fn test_template_instance_resolution() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("getty@.service"),
            "[Service]\nExecStart=/sbin/agetty %I\n",
        )
        .unwrap();
        let out = dir.path().join("bundles");
        std::fs::create_dir(&out).unwrap();
        let arg = dir.path().join("getty@tty1.service");
        let rc = run(&[
            "convert-systemd-units",
            "--bundle-root",
            out.to_str().unwrap(),
            arg.to_str().unwrap(),
        ]);
        assert_eq!(rc, 0);
        let run_text = read(&out.join("getty@tty1/service/run"));
        assert!(run_text.ends_with("/sbin/agetty tty1"), "{run_text}");
    }

    #[test]
    fn test_oneshot_remain_after_exit() {
        let dir = tempfile::tempdir().unwrap();
        let unit = dir.path().join("once.service");
        std::fs::write(
            &unit,
            "[Service]\nType=oneshot\nExecStart=/bin/true\nRemainAfterExit=yes\n",
        )
        .unwrap();
        let out = dir.path().join("bundles");
        std::fs::create_dir(&out).unwrap();
        let rc = run(&[
            "convert-systemd-units",
            "--bundle-root",
            out.to_str().unwrap(),
            unit.to_str().unwrap(),
        ]);
        assert_eq!(rc, 0);
        let bundle = out.join("once");
        assert!(bundle.join("service/remain").exists());
        // Oneshot: the command runs from start, run degenerates to true.
        let start_text = read(&bundle.join("service/start"));
        assert!(start_text.ends_with("/bin/true"), "{start_text}");
        let run_text = read(&bundle.join("service/run"));
        assert!(run_text.ends_with("true\n"), "{run_text}");
    }

    #[test]
    fn test_unsupported_type_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let unit = dir.path().join("bad.service");
        std::fs::write(&unit, "[Service]\nType=notify\nExecStart=/bin/x\n").unwrap();
        let out = dir.path().join("bundles");
        std::fs::create_dir(&out).unwrap();
        let rc = run(&[
            "convert-systemd-units",
            "--bundle-root",
            out.to_str().unwrap(),
            unit.to_str().unwrap(),
        ]);
        assert_eq!(rc, EXIT_FAILURE);
    }

    #[test]
    fn test_missing_exec_start_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let unit = dir.path().join("empty.service");
        std::fs::write(&unit, "[Service]\n").unwrap();
        let out = dir.path().join("bundles");
        std::fs::create_dir(&out).unwrap();
        let rc = run(&[
            "convert-systemd-units",
            "--bundle-root",
            out.to_str().unwrap(),
            unit.to_str().unwrap(),
        ]);
        assert_eq!(rc, EXIT_FAILURE);
    }

    #[test]
    fn test_default_dependencies_links() {
        let dir = tempfile::tempdir().unwrap();
        let unit = dir.path().join("svc.service");
        std::fs::write(&unit, "[Service]\nExecStart=/bin/svc\n").unwrap();
        let out = dir.path().join("bundles");
        std::fs::create_dir(&out).unwrap();
        run(&[
            "convert-systemd-units",
            "--bundle-root",
            out.to_str().unwrap(),
            unit.to_str().unwrap(),
        ]);
        let bundle = out.join("svc");
        for rel in ["after/basic", "wants/basic", "before/shutdown", "stopped-by/shutdown"] {
            assert!(
                bundle.join(rel).symlink_metadata().is_ok(),
                "missing {rel}"
            );
        }
    }

    #[test]
    fn test_restart_always_policy() {
        let dir = tempfile::tempdir().unwrap();
        let unit = dir.path().join("svc.service");
        std::fs::write(
            &unit,
            "[Service]\nExecStart=/bin/svc\nRestart=always\nRestartSec=2\n",
        )
        .unwrap();
        let out = dir.path().join("bundles");
        std::fs::create_dir(&out).unwrap();
        run(&[
            "convert-systemd-units",
            "--bundle-root",
            out.to_str().unwrap(),
            unit.to_str().unwrap(),
        ]);
        let restart_text = read(&out.join("svc/service/restart"));
        assert!(restart_text.contains("sleep 2\n"), "{restart_text}");
        assert!(restart_text.contains("exec true"), "{restart_text}");
    }

    #[test]
    fn test_install_section_links() {
        let dir = tempfile::tempdir().unwrap();
        let unit = dir.path().join("svc.service");
        std::fs::write(
            &unit,
            "[Unit]\nAfter=net.service other.target\n[Service]\nExecStart=/bin/svc\n[Install]\nWantedBy=multi-user.target\n",
        )
        .unwrap();
        let out = dir.path().join("bundles");
        std::fs::create_dir(&out).unwrap();
        run(&[
            "convert-systemd-units",
            "--bundle-root",
            out.to_str().unwrap(),
            unit.to_str().unwrap(),
        ]);
        let bundle = out.join("svc");
        assert!(bundle.join("after/net").symlink_metadata().is_ok());
        assert!(bundle.join("after/other").symlink_metadata().is_ok());
        assert!(bundle.join("wanted-by/multi-user").symlink_metadata().is_ok());
    }

    #[test]
    fn test_user_and_environment_pipeline_order() {
        let dir = tempfile::tempdir().unwrap();
        let unit = dir.path().join("svc.service");
        std::fs::write(
            &unit,
            "[Service]\nExecStart=/bin/svc\nUser=daemon\nEnvironment=A=1 B=2\nUMask=0077\nLimitNOFILE=1024\n",
        )
        .unwrap();
        let out = dir.path().join("bundles");
        std::fs::create_dir(&out).unwrap();
        run(&[
            "convert-systemd-units",
            "--bundle-root",
            out.to_str().unwrap(),
            unit.to_str().unwrap(),
        ]);
        let run_text = read(&out.join("svc/service/run"));
        let setenv_a = run_text.find("setenv A 1").unwrap();
        let setenv_b = run_text.find("setenv B 2").unwrap();
        let softlimit = run_text.find("softlimit -o 1024").unwrap();
        let umask = run_text.find("umask 0077").unwrap();
        let setuidgid = run_text.find("setuidgid daemon\nuserenv").unwrap();
        let exec = run_text.find("/bin/svc").unwrap();
        assert!(setenv_a < setenv_b);
        assert!(setenv_b < softlimit);
        assert!(softlimit < umask);
        assert!(umask < setuidgid);
        assert!(setuidgid < exec);
    }

    #[test]
    fn test_exec_start_pre_goes_to_start() {
        let dir = tempfile::tempdir().unwrap();
        let unit = dir.path().join("svc.service");
        std::fs::write(
            &unit,
            "[Service]\nExecStart=/bin/svc\nExecStartPre=-/bin/prep one\nExecStopPost=/bin/cleanup\n",
        )
        .unwrap();
        let out = dir.path().join("bundles");
        std::fs::create_dir(&out).unwrap();
        run(&[
            "convert-systemd-units",
            "--bundle-root",
            out.to_str().unwrap(),
            unit.to_str().unwrap(),
        ]);
        let start_text = read(&out.join("svc/service/start"));
        // The ignore-failure minus is stripped without replacement.
        assert!(start_text.ends_with("/bin/prep one\n"), "{start_text}");
        let stop_text = read(&out.join("svc/service/stop"));
        assert!(stop_text.ends_with("/bin/cleanup\n"), "{stop_text}");
    }
}
