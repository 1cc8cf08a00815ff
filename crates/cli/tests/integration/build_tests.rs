//! Build command integration tests.

use std::fs;

use predicates::prelude::*;

use super::common::{SOURCE, TestEnv};

#[test]
fn build_compiles_opted_in_sources_only() {
  let env = TestEnv::new();
  env.write_file("fast.cpp", SOURCE);
  env.write_file("plain.cpp", "int plain() { return 0; }\n");

  env
    .extbuild_cmd()
    .arg("build")
    .assert()
    .success()
    .stdout(predicate::str::contains("1 module(s) up to date"));

  assert!(env.artifact("fast").exists());
  assert!(!env.artifact("plain").exists());
  assert_eq!(env.compile_count(), 1);
  assert!(!env.path().join(".rendered.fast.cpp").exists());
}

#[test]
fn build_walks_nested_directories() {
  let env = TestEnv::new();
  env.write_file("pkg/inner/fast.cpp", SOURCE);
  env.write_file("pkg/other.c", SOURCE);

  env.extbuild_cmd().arg("build").arg("pkg").assert().success();

  assert!(env.artifact("pkg/inner/fast").exists());
  assert!(env.artifact("pkg/other").exists());
  assert_eq!(env.compile_count(), 2);
}

#[test]
fn build_accepts_a_single_file() {
  let env = TestEnv::new();
  env.write_file("fast.cpp", SOURCE);

  env
    .extbuild_cmd()
    .arg("build")
    .arg("fast.cpp")
    .assert()
    .success()
    .stdout(predicate::str::contains("fast"));

  assert!(env.artifact("fast").exists());
}

#[test]
fn build_with_nothing_to_do() {
  let env = TestEnv::new();

  env
    .extbuild_cmd()
    .arg("build")
    .assert()
    .success()
    .stdout(predicate::str::contains("No opted-in sources found"));
  assert_eq!(env.compile_count(), 0);
}

#[test]
fn second_build_is_a_no_op() {
  let env = TestEnv::new();
  env.write_file("fast.cpp", SOURCE);

  env.extbuild_cmd().arg("build").assert().success();
  env.extbuild_cmd().arg("build").assert().success();

  assert_eq!(env.compile_count(), 1);
}

#[test]
fn editing_the_source_triggers_a_rebuild() {
  let env = TestEnv::new();
  env.write_file("fast.cpp", SOURCE);
  env.extbuild_cmd().arg("build").assert().success();

  env.write_file("fast.cpp", "// extbuild\nint fast() { return 2; }\n");
  env.extbuild_cmd().arg("build").assert().success();

  assert_eq!(env.compile_count(), 2);
}

#[test]
fn editing_a_declared_dependency_triggers_a_rebuild() {
  let env = TestEnv::new();
  env.write_file(
    "fast.cpp",
    "// extbuild\n<% cfg.dependencies = { 'fast.h' } %>\n#include \"fast.h\"\n",
  );
  env.write_file("fast.h", "#define ANSWER 1\n");
  env.extbuild_cmd().arg("build").assert().success();
  env.extbuild_cmd().arg("build").assert().success();
  assert_eq!(env.compile_count(), 1);

  env.write_file("fast.h", "#define ANSWER 2\n");
  env.extbuild_cmd().arg("build").assert().success();
  assert_eq!(env.compile_count(), 2);
}

#[test]
fn template_config_reaches_the_compiler() {
  let env = TestEnv::new();
  env.write_file(
    "fast.cpp",
    "// extbuild\n<%\ncfg.libraries = { 'm' }\ncfg.include_dirs = { 'include' }\n%>\nint fast();\n",
  );

  env.extbuild_cmd().arg("build").assert().success();

  let invocation = fs::read_to_string(&env.log).unwrap();
  assert!(invocation.contains("-lm"), "{}", invocation);
  assert!(
    invocation.contains(&format!("-I{}", env.path().join("include").display())),
    "{}",
    invocation
  );
}

#[test]
fn force_rebuilds_fresh_artifacts() {
  let env = TestEnv::new();
  env.write_file("fast.cpp", SOURCE);
  env.extbuild_cmd().arg("build").assert().success();

  env.extbuild_cmd().arg("build").arg("--force").assert().success();

  assert_eq!(env.compile_count(), 2);
}

#[test]
fn force_from_the_environment() {
  let env = TestEnv::new();
  env.write_file("fast.cpp", SOURCE);
  env.extbuild_cmd().arg("build").assert().success();

  env
    .extbuild_cmd()
    .arg("build")
    .env("EXTBUILD_FORCE_REBUILD", "1")
    .assert()
    .success();

  assert_eq!(env.compile_count(), 2);
}

#[test]
fn release_mode_never_compiles() {
  let env = TestEnv::new();
  env.write_file("fast.cpp", SOURCE);

  env
    .extbuild_cmd()
    .arg("build")
    .arg("--release")
    .assert()
    .failure()
    .stderr(predicate::str::contains("artifact not found"));
  assert_eq!(env.compile_count(), 0);
}

#[test]
fn release_mode_accepts_stale_artifacts() {
  let env = TestEnv::new();
  env.write_file("fast.cpp", SOURCE);
  env.extbuild_cmd().arg("build").assert().success();
  env.write_file("fast.cpp", "// extbuild\nint fast() { return 2; }\n");

  env.extbuild_cmd().arg("build").arg("--release").assert().success();

  assert_eq!(env.compile_count(), 1);
}

#[test]
fn compiler_failure_is_reported() {
  let env = TestEnv::with_failing_compiler("fast.cpp:2: error: expected ';'");
  env.write_file("fast.cpp", SOURCE);

  env
    .extbuild_cmd()
    .arg("build")
    .assert()
    .failure()
    .stderr(predicate::str::contains("expected ';'"));

  assert!(!env.artifact("fast").exists());
  assert!(!env.lock_file("fast").exists());
}

#[test]
fn template_error_points_at_the_source_line() {
  let env = TestEnv::new();
  env.write_file("fast.cpp", "// extbuild\n\n<% error('boom') %>\n");

  env
    .extbuild_cmd()
    .arg("build")
    .assert()
    .failure()
    .stderr(predicate::str::contains("boom"))
    .stderr(predicate::str::contains("fast.cpp:3"));

  assert_eq!(env.compile_count(), 0);
}

#[test]
fn missing_path_is_an_error() {
  let env = TestEnv::new();

  env
    .extbuild_cmd()
    .arg("build")
    .arg("does-not-exist")
    .assert()
    .failure()
    .stderr(predicate::str::contains("Cannot access"));
}
