//! Status command integration tests.

use predicates::prelude::*;

use super::common::{SOURCE, TestEnv};

#[test]
fn fresh_artifact_is_up_to_date() {
  let env = TestEnv::new();
  let source = env.write_file("fast.cpp", SOURCE);
  env.extbuild_cmd().arg("build").assert().success();

  env
    .extbuild_cmd()
    .arg("status")
    .arg(env.artifact("fast"))
    .assert()
    .success()
    .stdout(predicate::str::contains("is up to date"))
    .stdout(predicate::str::contains("Dependencies: 1"))
    .stdout(predicate::str::contains(
      std::fs::canonicalize(&source).unwrap().display().to_string(),
    ));
}

#[test]
fn edited_source_is_stale() {
  let env = TestEnv::new();
  env.write_file("fast.cpp", SOURCE);
  env.extbuild_cmd().arg("build").assert().success();
  env.write_file("fast.cpp", "// extbuild\nint fast() { return 2; }\n");

  env
    .extbuild_cmd()
    .arg("status")
    .arg(env.artifact("fast"))
    .assert()
    .success()
    .stderr(predicate::str::contains("is stale"))
    .stderr(predicate::str::contains("checksum mismatch"));
}

#[test]
fn json_output() {
  let env = TestEnv::new();
  env.write_file("fast.cpp", SOURCE);
  env.extbuild_cmd().arg("build").assert().success();

  let output = env
    .extbuild_cmd()
    .arg("status")
    .arg(env.artifact("fast"))
    .arg("--json")
    .output()
    .unwrap();
  assert!(output.status.success());

  let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(report["up_to_date"], true);
  assert!(report["reason"].is_null());
  assert_eq!(report["deps"].as_array().unwrap().len(), 1);
  assert_eq!(report["hash"].as_str().unwrap().len(), 64);
}

#[test]
fn artifact_without_trailer_fails() {
  let env = TestEnv::new();
  let bogus = env.write_file("bogus.so", "just some bytes that are long enough to look at");

  env
    .extbuild_cmd()
    .arg("status")
    .arg(&bogus)
    .assert()
    .failure()
    .stderr(predicate::str::contains("has no checksum trailer"));
}
