//! Behavioural tests for `userdata-forge generate`.

#[path = "support/workspace.rs"]
mod support;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use rstest::{fixture, rstest};
use support::Workspace;

const INSTANCES: &str = r#"
[DEFAULT]
userdata = "templates/web.yaml.jinja"

[web1]

[web2]
userdata = "templates/broken.yaml.jinja"
"#;

#[fixture]
fn workspace() -> Workspace {
    let workspace = Workspace::new();
    workspace
        .write("create-instances.toml", INSTANCES)
        .write("templates/web.yaml.jinja", "hello {{ server_name }}")
        .write("templates/broken.yaml.jinja", "{{ nope }}");
    workspace
}

fn generate(workspace: &Workspace) -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("userdata-forge");
    cmd.current_dir(workspace.root())
        .env("RUST_LOG", "off")
        .env_remove("USERDATA_FORGE_INSTANCES_FILE")
        .env_remove("USERDATA_FORGE_TEMPLATE_ROOT")
        .env_remove("USERDATA_FORGE_CONFIG_PATH")
        .arg("generate");
    cmd
}

#[rstest]
fn prints_documents_and_text_summary(workspace: Workspace) {
    generate(&workspace)
        .assert()
        .success()
        .stdout("==> web1 <==\nhello web1\n")
        .stderr(predicate::str::contains("Userdata emitted for:\n  web1\n"))
        .stderr(predicate::str::contains(
            "web2: template `templates/broken.yaml.jinja` references undefined variable `nope`",
        ));
}

#[rstest]
fn json_summary_reports_each_section(workspace: Workspace) {
    let output = generate(&workspace)
        .args(["--summary", "json"])
        .output()
        .unwrap_or_else(|err| panic!("run: {err}"));
    assert!(output.status.success());

    let summary: serde_json::Value = serde_json::from_slice(&output.stderr)
        .unwrap_or_else(|err| panic!("summary json: {err}"));
    assert_eq!(
        summary.pointer("/sections/0/status"),
        Some(&serde_json::json!("emitted"))
    );
    assert_eq!(
        summary.pointer("/sections/1/reason"),
        Some(&serde_json::json!("undefined_variable"))
    );
}

#[rstest]
fn strict_mode_fails_when_sections_are_skipped(workspace: Workspace) {
    generate(&workspace).arg("--strict").assert().code(2);
}

#[rstest]
fn section_filter_limits_the_run(workspace: Workspace) {
    generate(&workspace)
        .args(["--section", "web1", "--strict"])
        .assert()
        .success()
        .stdout("==> web1 <==\nhello web1\n");
}

#[rstest]
fn unknown_section_is_fatal(workspace: Workspace) {
    generate(&workspace)
        .args(["--section", "db9"])
        .assert()
        .code(1)
        .stdout("")
        .stderr(predicate::str::contains("section [db9] is not declared"));
}

#[rstest]
fn missing_instances_file_is_fatal(workspace: Workspace) {
    generate(&workspace)
        .args(["--instances", "absent.toml"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("failed to read instances file absent.toml"));
}

#[rstest]
fn template_root_flag_relocates_lookups(workspace: Workspace) {
    workspace
        .write("deploy/servers.toml", "[db1]\n")
        .write("deploy/userdata-default.yaml.jinja", "db {{ server_name }}");

    generate(&workspace)
        .args([
            "--instances",
            "deploy/servers.toml",
            "--template-root",
            "deploy",
        ])
        .assert()
        .success()
        .stdout("==> db1 <==\ndb db1\n");
}
