//! convert-fstab-services: translate fstab rows into mount-class bundles.
//!
//! A mountable row yields up to four bundles: `gbde@`/`geli@` for
//! encrypted volumes, `fsck@` when the pass number asks for checking, and
//! `mount@` always.  Swap rows yield `swap@` plus `dump@`.  Orderings put
//! the geometry bundles before fsck and mount, fsck before mount, and every
//! mount-class bundle after its pre-target and into the local-fs or
//! remote-fs install set.

use std::path::Path;

use clap::Parser;

use crate::bundle::Bundle;
use crate::config::basename_of;
use crate::error::{EXIT_SUCCESS, EXIT_USAGE, Error, fatal};
use crate::fstab::{FstabRecord, has_option, option_value, read_fstab, split_options};
use crate::scripts::{multi_line_comment, quote};
use crate::unit_name::escape;

#[derive(Parser, Debug)]
#[command(
    name = "convert-fstab-services",
    about = "Convert fstab rows into service bundles"
)]
struct FstabCli {
    /// Update/overwrite an existing service bundle.
    #[arg(short = 'o', long)]
    overwrite: bool,

    /// Root directory for bundles.
    #[arg(long, value_name = "directory")]
    bundle_root: Option<String>,

    /// Consider this service to live away from the normal service bundle
    /// group.
    #[arg(long)]
    etc_bundle: bool,
}

#[derive(Parser, Debug)]
#[command(
    name = "write-volume-service-bundles",
    about = "Write the service bundles for one volume"
)]
struct VolumeCli {
    /// Update/overwrite an existing service bundle.
    #[arg(short = 'o', long)]
    overwrite: bool,

    /// Root directory for bundles.
    #[arg(long, value_name = "directory")]
    bundle_root: Option<String>,

    /// Mount options.
    #[arg(long, value_name = "list")]
    mount_options: Option<String>,

    /// Consider this service to live away from the normal service bundle
    /// group.
    #[arg(long)]
    etc_bundle: bool,

    /// Filesystem type.
    fstype: String,
    /// Device or remote source.
    source: String,
    /// Mount point directory.
    directory: String,
}

pub fn run_convert_fstab_services(args: &[String]) -> i32 {
    let prog = args
        .first()
        .map(|a| basename_of(a))
        .unwrap_or("convert-fstab-services");
    let _ = crate::logging::setup_logging(log::LevelFilter::Warn);
    let cli = match FstabCli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return EXIT_USAGE;
        }
    };
    match convert_fstab(prog, &cli, Path::new("/etc/fstab")) {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            fatal(prog, &e);
            e.exit_code()
        }
    }
}

pub fn run_write_volume_service_bundles(args: &[String]) -> i32 {
    let prog = args
        .first()
        .map(|a| basename_of(a))
        .unwrap_or("write-volume-service-bundles");
    let _ = crate::logging::setup_logging(log::LevelFilter::Warn);
    let cli = match VolumeCli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return EXIT_USAGE;
        }
    };
    let record = FstabRecord {
        spec: cli.source.clone(),
        file: cli.directory.clone(),
        vfstype: cli.fstype.clone(),
        options: split_options(cli.mount_options.as_deref().unwrap_or("")),
        fs_type: "rw".to_owned(),
        freq: 0,
        passno: 0,
    };
    let root = bundle_root_dir(prog, cli.bundle_root.as_deref());
    match write_volume_bundles(&root, &record, cli.overwrite, cli.etc_bundle) {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            fatal(prog, &e);
            e.exit_code()
        }
    }
}

fn bundle_root_dir(prog: &str, bundle_root: Option<&str>) -> std::path::PathBuf {
    match bundle_root {
        Some(root) => {
            if let Err(e) = std::fs::create_dir_all(root) {
                eprintln!("{prog}: ERROR: mkdir: {root}: {e}");
            }
            std::path::PathBuf::from(root)
        }
        None => std::path::PathBuf::from("."),
    }
}

fn convert_fstab(prog: &str, cli: &FstabCli, fstab: &Path) -> Result<(), Error> {
    let records = read_fstab(fstab)?;
    let root = bundle_root_dir(prog, cli.bundle_root.as_deref());
    for record in records {
        match record.fs_type.as_str() {
            "xx" => continue,
            "rw" | "rq" | "ro" => {
                write_volume_bundles(&root, &record, cli.overwrite, cli.etc_bundle)?;
            }
            #[cfg(target_os = "linux")]
            "??" => {
                write_volume_bundles(&root, &record, cli.overwrite, cli.etc_bundle)?;
            }
            "sw" => {
                create_swap_bundle(&root, &record, cli.overwrite, cli.etc_bundle)?;
                create_dump_bundle(&root, &record, cli.overwrite, cli.etc_bundle)?;
            }
            other => {
                eprintln!(
                    "{prog}: WARNING: {}: {other}: Unrecognized type.",
                    record.file
                );
            }
        }
    }
    Ok(())
}

/// The gbde/geli/fsck/mount bundle set for one mountable volume.
fn write_volume_bundles(
    root: &Path,
    record: &FstabRecord,
    overwrite: bool,
    etc_bundle: bool,
) -> Result<(), Error> {
    let gbde_name = format!("gbde@{}", escape(false, &record.spec));
    let geli_name = format!("geli@{}", escape(false, &record.spec));
    let fsck_name = format!("fsck@{}", escape(false, &record.file));
    let mount_name = format!("mount@{}", escape(false, &record.file));
    let local = record.is_local();

    let mut modules: Vec<String> = Vec::new();
    if record.is_fuse() {
        modules.push("fuse".to_owned());
    }
    if record.vfstype == "efivarfs" {
        modules.push(record.vfstype.clone());
    }

    if record.gbde_device().is_some() {
        create_gbde_bundle(
            root, record, local, overwrite, etc_bundle, &gbde_name, &fsck_name, &mount_name,
        )?;
    }
    if record.geli_device().is_some() {
        create_geli_bundle(
            root, record, local, overwrite, etc_bundle, &geli_name, &fsck_name, &mount_name,
        )?;
    }
    if record.passno > 0 {
        create_fsck_bundle(
            root, record, local, overwrite, etc_bundle, &fsck_name, &mount_name,
        )?;
    }
    create_mount_bundle(
        root, record, local, overwrite, etc_bundle, &modules, &mount_name,
    )?;
    Ok(())
}

/// before/shutdown for everything; stopped-by/unmount for everything that
/// is not the root volume.
fn make_default_dependencies(bundle: &Bundle, root_volume: bool) {
    bundle.create_links("shutdown.target", "before/");
    if !root_volume {
        bundle.create_links("unmount.target", "stopped-by/");
    }
}

/// Mount-class bundles have a trivial run file and a constant restart
/// condition; the mount itself persists once made.
fn make_run_and_restart(bundle: &Bundle, condition: &str) -> Result<(), Error> {
    let mut run = String::from("#!/bin/nosh\n");
    run.push_str(&multi_line_comment("Run file for a mount service."));
    run.push_str("true\n");
    bundle.write_script("run", &run)?;

    let mut restart = String::from("#!/bin/sh\n");
    restart.push_str(&multi_line_comment("Restart file for a mount service."));
    restart.push_str(&format!("exec {condition}\t#Ignore script arguments.\n"));
    bundle.write_script("restart", &restart)?;

    bundle.flag_file("remain", true)
}

fn pre_target(local: bool) -> &'static str {
    if local {
        "local-fs-pre.target"
    } else {
        "remote-fs-pre.target"
    }
}

fn create_geom_bundle(
    root: &Path,
    record: &FstabRecord,
    local: bool,
    overwrite: bool,
    etc_bundle: bool,
    name: &str,
    fsck_name: &str,
    mount_name: &str,
    start_body: &str,
    stop_body: &str,
    what_comment: &str,
) -> Result<(), Error> {
    let bundle = Bundle::create_etc(root, name, overwrite, etc_bundle)?;
    bundle.make_skeleton()?;
    make_default_dependencies(&bundle, false);
    make_run_and_restart(&bundle, "false")?;

    bundle.create_links(pre_target(local), "after/");
    bundle.create_link(&format!("../../{fsck_name}"), &format!("before/{fsck_name}"));
    bundle.create_link(&format!("../../{mount_name}"), &format!("before/{mount_name}"));
    bundle.create_link(
        &format!("../../{fsck_name}"),
        &format!("wanted-by/{fsck_name}"),
    );
    bundle.create_link(
        &format!("../../{mount_name}"),
        &format!("wanted-by/{mount_name}"),
    );
    bundle.early_supervise_link();

    let what = quote(&record.spec);
    let mut start = String::from("#!/bin/nosh\n");
    start.push_str(&multi_line_comment(&format!(
        "Start {what_comment} {what}.\nAuto-generated by convert-fstab-services."
    )));
    start.push_str(start_body);
    bundle.write_script("start", &start)?;

    let mut stop = String::from("#!/bin/nosh\n");
    stop.push_str(&multi_line_comment(&format!(
        "Stop {what_comment} {what}.\nAuto-generated by convert-fstab-services."
    )));
    stop.push_str(stop_body);
    bundle.write_script("stop", &stop)
}

fn create_gbde_bundle(
    root: &Path,
    record: &FstabRecord,
    local: bool,
    overwrite: bool,
    etc_bundle: bool,
    name: &str,
    fsck_name: &str,
    mount_name: &str,
) -> Result<(), Error> {
    let what = quote(&record.spec);
    let start_body = format!(
        "sh -c 'exec gbde attach ${{flags}} {what} ${{lock:+-l}} \"${{lock}}\"'\n"
    );
    let stop_body = format!("sh -c 'exec gbde detach {what}'\n");
    create_geom_bundle(
        root, record, local, overwrite, etc_bundle, name, fsck_name, mount_name, &start_body,
        &stop_body, "gbde",
    )
}

fn create_geli_bundle(
    root: &Path,
    record: &FstabRecord,
    local: bool,
    overwrite: bool,
    etc_bundle: bool,
    name: &str,
    fsck_name: &str,
    mount_name: &str,
) -> Result<(), Error> {
    let what = quote(&record.spec);
    let start_body = format!(
        "foreground sh -c 'exec geli attach ${{flags}} {what}' ;\n\
         sh -c 'test -n \"${{autodetach}}\" && exec geli detach -l {what}'\n"
    );
    let stop_body = format!("sh -c 'exec geli detach {what}'\n");
    create_geom_bundle(
        root, record, local, overwrite, etc_bundle, name, fsck_name, mount_name, &start_body,
        &stop_body, "geli",
    )
}

fn create_fsck_bundle(
    root: &Path,
    record: &FstabRecord,
    local: bool,
    overwrite: bool,
    etc_bundle: bool,
    fsck_name: &str,
    mount_name: &str,
) -> Result<(), Error> {
    let bundle = Bundle::create_etc(root, fsck_name, overwrite, etc_bundle)?;
    bundle.make_skeleton()?;
    make_default_dependencies(&bundle, false);
    make_run_and_restart(&bundle, "false")?;

    bundle.create_links(pre_target(local), "after/");
    bundle.create_link(&format!("../../{mount_name}"), &format!("before/{mount_name}"));
    bundle.create_link(
        &format!("../../{mount_name}"),
        &format!("wanted-by/{mount_name}"),
    );

    if record.is_fuse() {
        bundle.create_link("../../kmod@fuse", "after/kmod@fuse");
        bundle.create_link("../../kmod@fuse", "wants/kmod@fuse");
    }
    if let Some(gbde) = record.gbde_device() {
        let geom = format!("gbde@{}", escape(false, gbde));
        bundle.create_link(&format!("../../{geom}"), &format!("after/{geom}"));
        bundle.create_link(&format!("../../{geom}"), &format!("wants/{geom}"));
    }
    if let Some(geli) = record.geli_device() {
        let geom = format!("geli@{}", escape(false, geli));
        bundle.create_link(&format!("../../{geom}"), &format!("after/{geom}"));
        bundle.create_link(&format!("../../{geom}"), &format!("wants/{geom}"));
    }
    bundle.early_supervise_link();

    let what = quote(&record.spec);
    let mut start = String::from("#!/bin/nosh\n");
    start.push_str(&multi_line_comment(&format!(
        "Start fsck {what}.\nAuto-generated by convert-fstab-services."
    )));
    start.push_str("monitored-fsck\n");
    #[cfg(target_os = "linux")]
    start.push_str(if record.is_preenable() {
        "-p # preen mode\n"
    } else {
        "-a # unattended mode\n"
    });
    #[cfg(not(target_os = "linux"))]
    start.push_str("-C # Skip if clean.\n-p # preen mode\n");
    start.push_str(&format!("{what}\n"));
    bundle.write_script("start", &start)?;

    let mut stop = String::from("#!/bin/nosh\n");
    stop.push_str(&multi_line_comment(&format!(
        "Stop fsck {what}.\nAuto-generated by convert-fstab-services."
    )));
    stop.push_str("true\n");
    bundle.write_script("stop", &stop)
}

fn create_mount_bundle(
    root: &Path,
    record: &FstabRecord,
    local: bool,
    overwrite: bool,
    etc_bundle: bool,
    modules: &[String],
    mount_name: &str,
) -> Result<(), Error> {
    let root_volume = record.is_root();
    let api = crate::platform::is_api_mountpoint(&record.file);

    let bundle = Bundle::create_etc(root, mount_name, overwrite, etc_bundle)?;
    bundle.make_skeleton()?;
    make_default_dependencies(&bundle, root_volume);
    make_run_and_restart(&bundle, "true")?;

    let target = if local {
        "local-fs.target"
    } else {
        "remote-fs.target"
    };
    bundle.create_links(target, "wanted-by/");
    bundle.create_links(target, "before/");
    bundle.create_links(pre_target(local), "after/");

    for module in modules {
        let kmod = format!("kmod@{module}");
        bundle.create_link(&format!("../../{kmod}"), &format!("after/{kmod}"));
        bundle.create_link(&format!("../../{kmod}"), &format!("wants/{kmod}"));
    }
    if let Some(gbde) = record.gbde_device() {
        let geom = format!("gbde@{}", escape(false, gbde));
        bundle.create_link(&format!("../../{geom}"), &format!("after/{geom}"));
        bundle.create_link(&format!("../../{geom}"), &format!("wants/{geom}"));
    }
    if let Some(geli) = record.geli_device() {
        let geom = format!("geli@{}", escape(false, geli));
        bundle.create_link(&format!("../../{geom}"), &format!("after/{geom}"));
        bundle.create_link(&format!("../../{geom}"), &format!("wants/{geom}"));
    }

    bundle.make_mount_interdependencies(root_volume, &record.file);
    bundle.early_supervise_link();

    let what = quote(&record.spec);
    let where_ = quote(&record.file);
    let mut start = String::from("#!/bin/nosh\n");
    start.push_str(&multi_line_comment(&format!(
        "Start mount {what} {where_}.\nAuto-generated by convert-fstab-services."
    )));
    start.push_str("mount\n");
    if !record.vfstype.is_empty() {
        start.push_str(&format!("-t {}\n", quote(&record.vfstype)));
    }
    if !record.options.is_empty() {
        start.push_str(&format!("-o {}\n", quote(&record.options_string())));
    }
    // Pre-mounted filesystems are only ever remounted.
    #[cfg(target_os = "linux")]
    if api || root_volume {
        start.push_str("-o remount\n");
    }
    #[cfg(not(target_os = "linux"))]
    {
        if api || root_volume {
            start.push_str("-o update\n");
        }
        if root_volume {
            start.push_str("-o rw\n");
        }
    }
    start.push_str(&format!("{what}\n{where_}\n"));
    bundle.write_script("start", &start)?;

    let mut stop = String::from("#!/bin/nosh\n");
    stop.push_str(&multi_line_comment(&format!(
        "Stop mount {what} {where_}.\nAuto-generated by convert-fstab-services."
    )));
    if api || root_volume {
        stop.push_str("mount\n");
        #[cfg(target_os = "linux")]
        stop.push_str("-o remount\n");
        #[cfg(not(target_os = "linux"))]
        stop.push_str("-o update\n");
        if root_volume {
            stop.push_str("-o ro\n");
        }
    } else {
        stop.push_str("umount\n");
    }
    stop.push_str(&format!("{where_}\n"));
    bundle.write_script("stop", &stop)
}

fn create_swap_bundle(
    root: &Path,
    record: &FstabRecord,
    overwrite: bool,
    etc_bundle: bool,
) -> Result<(), Error> {
    let name = format!("swap@{}", escape(false, &record.spec));
    let bundle = Bundle::create_etc(root, &name, overwrite, etc_bundle)?;
    bundle.make_skeleton()?;
    make_default_dependencies(&bundle, false);
    make_run_and_restart(&bundle, "true")?;

    if has_option(&record.options, "late") {
        bundle.create_links("swaplate.target", "wanted-by/");
    } else {
        bundle.create_links("swapauto.target", "wanted-by/");
    }
    bundle.early_supervise_link();

    let what = quote(&record.spec);
    let mut start = String::from("#!/bin/nosh\n");
    start.push_str(&multi_line_comment(&format!(
        "Start swap {what}.\nAuto-generated by convert-fstab-services."
    )));
    start.push_str("swapon\n");
    if has_option(&record.options, "discard") {
        start.push_str("--discard\n");
    }
    if let Some(priority) = option_value(&record.options, "pri") {
        start.push_str(&format!("--priority {priority}\n"));
    }
    start.push_str(&format!("{what}\n"));
    bundle.write_script("start", &start)?;

    let mut stop = String::from("#!/bin/nosh\n");
    stop.push_str(&multi_line_comment(&format!(
        "Stop swap {what}.\nAuto-generated by convert-fstab-services."
    )));
    stop.push_str(&format!("swapoff\n{what}\n"));
    bundle.write_script("stop", &stop)
}

fn create_dump_bundle(
    root: &Path,
    record: &FstabRecord,
    overwrite: bool,
    etc_bundle: bool,
) -> Result<(), Error> {
    let name = format!("dump@{}", escape(false, &record.spec));
    let bundle = Bundle::create_etc(root, &name, overwrite, etc_bundle)?;
    bundle.make_skeleton()?;
    make_default_dependencies(&bundle, false);
    make_run_and_restart(&bundle, "true")?;

    bundle.create_links("dumpauto.target", "wanted-by/");
    bundle.early_supervise_link();

    let what = quote(&record.spec);
    let mut start = String::from("#!/bin/nosh\n");
    start.push_str(&multi_line_comment(&format!(
        "Start dump {what}.\nAuto-generated by convert-fstab-services."
    )));
    start.push_str(&format!("dumpon\n-v\n{what}\n"));
    bundle.write_script("start", &start)?;

    let mut stop = String::from("#!/bin/nosh\n");
    stop.push_str(&multi_line_comment(&format!(
        "Stop dump {what}.\nAuto-generated by convert-fstab-services."
    )));
    stop.push_str("dumpon\noff\n");
    bundle.write_script("stop", &stop)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fstab::parse_line;

    fn read(path: &std::path::Path) -> String {
        std::fs::read_to_string(path).unwrap()
    }

    fn is_link(path: &std::path::Path) -> bool {
        path.symlink_metadata().is_ok()
    }

    #[test]
    fn test_root_ufs_row() {
        let out = tempfile::tempdir().unwrap();
        let record = parse_line("/dev/ada0p2 / ufs rw 1 1").unwrap();
        write_volume_bundles(out.path(), &record, false, false).unwrap();

        let mount = out.path().join("mount@-");
        let fsck = out.path().join("fsck@-");
        assert!(mount.is_dir());
        assert!(fsck.is_dir());

        let start = read(&mount.join("service/start"));
        #[cfg(not(target_os = "linux"))]
        assert!(
            start.contains("mount\n-t ufs\n-o rw\n-o update\n-o rw\n/dev/ada0p2\n/\n"),
            "{start}"
        );
        #[cfg(target_os = "linux")]
        assert!(
            start.contains("mount\n-t ufs\n-o rw\n-o remount\n/dev/ada0p2\n/\n"),
            "{start}"
        );

        // fsck is ordered before the mount.
        assert!(is_link(&fsck.join("before/mount@-")));
        // The root mount never links to itself.
        assert!(!is_link(&mount.join("after/mount@-")));
        // Root stop remounts read-only rather than unmounting.
        let stop = read(&mount.join("service/stop"));
        assert!(stop.contains("-o ro\n"), "{stop}");
        assert!(!stop.contains("umount"), "{stop}");
        // Root is not stopped by the unmount target.
        assert!(!is_link(&mount.join("stopped-by/unmount")));
        assert!(is_link(&mount.join("before/shutdown")));
    }

    #[test]
    fn test_swap_row_with_priority_and_discard() {
        let out = tempfile::tempdir().unwrap();
        let record = parse_line("/dev/ada0p3 none swap sw,pri=5,discard 0 0").unwrap();
        create_swap_bundle(out.path(), &record, false, false).unwrap();
        create_dump_bundle(out.path(), &record, false, false).unwrap();

        let swap = out.path().join("swap@-dev-ada0p3");
        let start = read(&swap.join("service/start"));
        assert!(
            start.contains("swapon\n--discard\n--priority 5\n/dev/ada0p3\n"),
            "{start}"
        );
        assert!(is_link(&swap.join("wanted-by/swapauto")));
        assert!(!is_link(&swap.join("wanted-by/swaplate")));

        let dump = out.path().join("dump@-dev-ada0p3");
        let dstart = read(&dump.join("service/start"));
        assert!(dstart.contains("dumpon\n-v\n/dev/ada0p3\n"), "{dstart}");
        assert!(is_link(&dump.join("wanted-by/dumpauto")));
    }

    #[test]
    fn test_late_swap_goes_to_swaplate() {
        let out = tempfile::tempdir().unwrap();
        let record = parse_line("/dev/sdb2 none swap sw,late 0 0").unwrap();
        create_swap_bundle(out.path(), &record, false, false).unwrap();
        let swap = out.path().join("swap@-dev-sdb2");
        assert!(is_link(&swap.join("wanted-by/swaplate")));
        assert!(!is_link(&swap.join("wanted-by/swapauto")));
    }

    #[test]
    fn test_nested_mount_orders_after_ancestors() {
        let out = tempfile::tempdir().unwrap();
        let record = parse_line("/dev/sda3 /var/log ext4 rw 0 2").unwrap();
        write_volume_bundles(out.path(), &record, false, false).unwrap();
        let mount = out.path().join("mount@-var-log");
        assert!(is_link(&mount.join("after/mount@-var")));
        assert!(is_link(&mount.join("after/mount@-")));
        assert!(is_link(&mount.join("stopped-by/mount@-var")));
        // passno 2 creates the fsck bundle too.
        assert!(out.path().join("fsck@-var-log").is_dir());
    }

    #[test]
    fn test_remote_mount_targets() {
        let out = tempfile::tempdir().unwrap();
        let record = parse_line("server:/export /mnt nfs rw 0 0").unwrap();
        write_volume_bundles(out.path(), &record, false, false).unwrap();
        let mount = out.path().join(format!("mount@{}", escape(false, "/mnt")));
        assert!(is_link(&mount.join("wanted-by/remote-fs")));
        assert!(is_link(&mount.join("after/remote-fs-pre")));
        assert!(!is_link(&mount.join("wanted-by/local-fs")));
    }

    #[test]
    fn test_geli_volume_chain() {
        let out = tempfile::tempdir().unwrap();
        let record = parse_line("/dev/ada0p5.eli /crypt ufs rw 0 2").unwrap();
        write_volume_bundles(out.path(), &record, false, false).unwrap();

        let geli = out.path().join(format!("geli@{}", escape(false, "/dev/ada0p5.eli")));
        assert!(geli.is_dir());
        let start = read(&geli.join("service/start"));
        assert!(start.contains("geli attach"), "{start}");
        assert!(start.contains("geli detach -l"), "{start}");
        assert!(is_link(&geli.join("before/mount@-crypt")));
        assert!(is_link(&geli.join("before/fsck@-crypt")));

        // fsck and mount wait for the attached geometry.
        let geom = format!("geli@{}", escape(false, "/dev/ada0p5"));
        assert!(is_link(&out.path().join("fsck@-crypt").join(format!("after/{geom}"))));
        assert!(is_link(
            &out.path().join("mount@-crypt").join(format!("wants/{geom}"))
        ));
    }

    #[test]
    fn test_fuse_module_ordering() {
        let out = tempfile::tempdir().unwrap();
        let record = parse_line("/dev/fuse0 /mnt fusefs rw 0 0").unwrap();
        write_volume_bundles(out.path(), &record, false, false).unwrap();
        let mount = out.path().join("mount@-mnt");
        assert!(is_link(&mount.join("after/kmod@fuse")));
        assert!(is_link(&mount.join("wants/kmod@fuse")));
    }

    #[test]
    fn test_overwrite_required_for_second_run() {
        let out = tempfile::tempdir().unwrap();
        let record = parse_line("/dev/sda1 /boot vfat rw 0 0").unwrap();
        write_volume_bundles(out.path(), &record, false, false).unwrap();
        assert!(write_volume_bundles(out.path(), &record, false, false).is_err());
        // With overwrite the rewrite is byte-identical.
        let start_path = out.path().join("mount@-boot/service/start");
        let first = read(&start_path);
        write_volume_bundles(out.path(), &record, true, false).unwrap();
        assert_eq!(first, read(&start_path));
    }

    #[test]
    fn test_full_fstab_conversion() {
        let dir = tempfile::tempdir().unwrap();
        let fstab = dir.path().join("fstab");
        std::fs::write(
            &fstab,
            "# test fstab\n\
             /dev/ada0p2 / ufs rw 1 1\n\
             /dev/ada0p3 none swap sw 0 0\n\
             /dev/ada0p9 /mnt weird zz 0 0\n",
        )
        .unwrap();
        let out = dir.path().join("bundles");
        let cli = FstabCli {
            overwrite: false,
            bundle_root: Some(out.display().to_string()),
            etc_bundle: false,
        };
        convert_fstab("convert-fstab-services", &cli, &fstab).unwrap();
        assert!(out.join("mount@-").is_dir());
        assert!(out.join("fsck@-").is_dir());
        assert!(out.join("swap@-dev-ada0p3").is_dir());
        assert!(out.join("dump@-dev-ada0p3").is_dir());
        // A row with no rw/ro/rq/sw/xx marker surfaces as "??": a Linux
        // fstab treats it as mountable, the BSDs warn and skip it.
        #[cfg(target_os = "linux")]
        assert!(out.join("mount@-mnt").is_dir());
        #[cfg(not(target_os = "linux"))]
        assert!(!out.join("mount@-mnt").exists());
    }

    #[test]
    fn test_mount_service_has_remain_and_trivial_run() {
        let out = tempfile::tempdir().unwrap();
        let record = parse_line("/dev/sda1 /boot vfat rw 0 0").unwrap();
        write_volume_bundles(out.path(), &record, false, false).unwrap();
        let mount = out.path().join("mount@-boot");
        assert!(mount.join("service/remain").exists());
        let run = read(&mount.join("service/run"));
        assert!(run.ends_with("true\n"), "{run}");
        let restart = read(&mount.join("service/restart"));
        assert!(restart.contains("exec true\t#Ignore script arguments."), "{restart}");
    }
}
