//! `apploy build` end to end: script file in, manifest tree out

use std::fs;

use apploy_cli::commands::build::{run, BuildArgs};
use apploy_cli::{Cli, Commands, Error};
use apploy_compiler::Format;
use clap::Parser;

const SCRIPT: &str = "\
# billing service
app billing 2.1.0
args team:finance _
file secret db-credentials
args _ Opaque user:billing;password:hunter2
close

component worker cronjob
file cronjob worker
args _ */15|*|*|*|* Forbid false 3 1
file container runner
args ghcr.io/acme/billing:2.1.0 Always _ MODE:batch
close
file role worker
args _ secrets:get
close
file rolebinding worker
args _ Role worker worker:billing
close
close
close
";

fn write_script(dir: &std::path::Path) -> std::path::PathBuf {
    let path = dir.join("billing.apploy");
    fs::write(&path, SCRIPT).unwrap();
    path
}

#[test]
fn script_file_produces_manifest_tree() {
    let tmp = tempfile::tempdir().unwrap();
    let out = tmp.path().join("out");
    fs::create_dir(&out).unwrap();

    run(BuildArgs {
        script: Some(write_script(tmp.path())),
        out: out.clone(),
        format: Format::Json,
        namespace: None,
    })
    .unwrap();

    let root = out.join("billing");
    assert!(root.join("secret-billing-db-credentials.json").is_file());
    let worker = root.join("worker");
    assert!(worker.join("role-billing-worker.json").is_file());
    assert!(worker.join("rolebinding-billing-worker.json").is_file());

    let cronjob: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(worker.join("cronjob-billing-worker.json")).unwrap())
            .unwrap();
    assert_eq!(cronjob["kind"], "CronJob");
    assert_eq!(cronjob["metadata"]["namespace"], "billing");
    assert_eq!(cronjob["spec"]["schedule"], "*/15 * * * *");
    assert_eq!(cronjob["spec"]["concurrencyPolicy"], "Forbid");
}

#[test]
fn cli_parses_build_flags() {
    let cli = Cli::try_parse_from([
        "apploy",
        "build",
        "--script",
        "app.apploy",
        "--out",
        "manifests",
        "--format",
        "json",
        "--namespace",
        "prod",
        "--log-format",
        "json",
    ])
    .unwrap();

    let Commands::Build(args) = cli.command;
    assert_eq!(args.format, Format::Json);
    assert_eq!(args.namespace.as_deref(), Some("prod"));
    assert_eq!(args.out, std::path::PathBuf::from("manifests"));
}

#[test]
fn unknown_format_is_rejected() {
    let result = Cli::try_parse_from(["apploy", "build", "--out", "x", "--format", "toml"]);
    assert!(result.is_err());
}

#[test]
fn failing_script_reports_line() {
    let tmp = tempfile::tempdir().unwrap();
    let script = tmp.path().join("broken.apploy");
    fs::write(&script, "app billing 2.1.0\ncomponent worker cronjob\nfile deployment api\n").unwrap();

    let err = run(BuildArgs {
        script: Some(script),
        out: tmp.path().to_path_buf(),
        format: Format::Yaml,
        namespace: None,
    })
    .unwrap_err();
    assert!(matches!(err, Error::Script(_)));
    assert!(err.to_string().starts_with("line 3:"), "{}", err);
}
