//! CLI surface: argument parsing and command execution against a temp site.

use clap::Parser;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use zip::write::FileOptions;

use upkeep_common::updater::integrity::sha256_file;
use upkeep_common::{InterruptFlag, UpdateExecutor, UpkeepConfig};
use upkeepctl::cli::{Cli, Commands};
use upkeepctl::commands::execute;

fn parse(args: &[&str]) -> Cli {
    Cli::try_parse_from(std::iter::once("upkeepctl").chain(args.iter().copied())).unwrap()
}

fn site() -> (TempDir, UpdateExecutor) {
    let tmp = TempDir::new().unwrap();
    let live = tmp.path().join("live");
    fs::create_dir_all(&live).unwrap();
    fs::write(live.join("index.php"), "old").unwrap();

    let mut config = UpkeepConfig::default();
    config.paths.live_root = live;
    let executor = UpdateExecutor::new(config).with_interrupt(InterruptFlag::new());
    (tmp, executor)
}

fn run(executor: &UpdateExecutor, args: &[&str]) -> (i32, String) {
    let mut out = Vec::new();
    let code = execute(executor, parse(args).command, &mut out).unwrap();
    (code, String::from_utf8(out).unwrap())
}

fn write_package(dir: &Path) -> PathBuf {
    let path = dir.join("site-1.1.0.zip");
    let mut writer = zip::ZipWriter::new(fs::File::create(&path).unwrap());
    writer
        .start_file("site-1.1.0/app/index.php", FileOptions::default())
        .unwrap();
    writer.write_all(b"new").unwrap();
    writer.finish().unwrap();
    path
}

#[test]
fn parses_colon_commands_and_options() {
    assert_eq!(parse(&["maintenance:on"]).command, Commands::MaintenanceOn);
    assert_eq!(parse(&["maintenance:off"]).command, Commands::MaintenanceOff);

    let cli = parse(&["--verbose", "apply", "--file=/tmp/p.tgz", "--sha256=ABCDEF"]);
    assert!(cli.verbose);
    assert_eq!(
        cli.command,
        Commands::Apply {
            file: PathBuf::from("/tmp/p.tgz"),
            sha256: Some("ABCDEF".to_string()),
            version: None,
        }
    );

    let cli = parse(&["rollback", "--from", "20261019-101500", "--config", "/etc/x.toml"]);
    assert_eq!(cli.config, Some(PathBuf::from("/etc/x.toml")));
    assert_eq!(
        cli.command,
        Commands::Rollback {
            from: PathBuf::from("20261019-101500")
        }
    );
}

#[test]
fn rejects_unknown_or_incomplete_commands() {
    assert!(Cli::try_parse_from(["upkeepctl", "maintenance"]).is_err());
    assert!(Cli::try_parse_from(["upkeepctl", "rollback"]).is_err());
    assert!(Cli::try_parse_from(["upkeepctl", "apply"]).is_err());
    assert!(Cli::try_parse_from(["upkeepctl"]).is_err());
}

#[test]
fn lock_commands_print_lines_and_exit_zero() {
    let (_tmp, executor) = site();

    let (code, out) = run(&executor, &["lock"]);
    assert_eq!(code, 0);
    assert_eq!(out, "update lock set\n");

    let (_, out) = run(&executor, &["status"]);
    assert!(out.contains("lock: held by PID"));
    assert!(out.contains("installed: unknown"));
    assert!(out.contains("remote: not available"));

    let (code, _) = run(&executor, &["unlock"]);
    assert_eq!(code, 0);
    assert!(!executor.locks().is_locked());
}

#[test]
fn check_without_manifest_url_fails() {
    let (_tmp, executor) = site();
    let (code, out) = run(&executor, &["check"]);
    assert_eq!(code, 1);
    assert!(out.starts_with("check failed: NetworkError"));
}

#[test]
fn apply_then_rollback_round_trip() {
    let (tmp, executor) = site();
    let package = write_package(tmp.path());
    let digest = sha256_file(&package).unwrap().to_uppercase();
    let index = executor.layout().live_root.join("index.php");

    let file_arg = format!("--file={}", package.display());
    let sha_arg = format!("--sha256={}", digest);
    let (code, out) = run(&executor, &["apply", &file_arg, &sha_arg, "--version=1.1.0"]);
    assert_eq!(code, 0, "{}", out);
    assert!(out.starts_with("updated unknown -> 1.1.0"));
    assert_eq!(fs::read_to_string(&index).unwrap(), "new");

    let backup = executor.layout().list_backups()[0].clone();
    let from_arg = format!("--from={}", backup.display());
    let (code, out) = run(&executor, &["rollback", &from_arg]);
    assert_eq!(code, 0, "{}", out);
    assert_eq!(fs::read_to_string(&index).unwrap(), "old");
    // Nothing was recorded for the pre-apply tree, so the marker stays
    assert_eq!(executor.versions().current(), "1.1.0");
}

#[test]
fn apply_with_wrong_checksum_exits_one() {
    let (tmp, executor) = site();
    let package = write_package(tmp.path());
    let file_arg = format!("--file={}", package.display());
    let (code, out) = run(&executor, &["apply", &file_arg, "--sha256=deadbeef"]);
    assert_eq!(code, 1);
    assert!(out.contains("IntegrityError"));
    assert!(package.exists());
}
