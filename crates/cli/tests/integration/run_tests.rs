//! `extbuild run` against the system compiler.

use predicates::prelude::*;
use serial_test::serial;

use super::common::{RUNNABLE_SOURCE, SOURCE, TestEnv};

#[test]
#[serial]
fn run_exits_with_the_status_main_returns() {
  let Some(env) = TestEnv::with_system_compiler(0) else {
    return;
  };
  env.write_file("tool.c", RUNNABLE_SOURCE);

  env.extbuild_cmd().args(["run", "tool.c"]).assert().code(7);
  assert_eq!(env.compile_count(), 1);
  assert!(env.artifact("tool").exists());

  env.extbuild_cmd().args(["run", "tool.c"]).assert().code(7);
  assert_eq!(env.compile_count(), 1);
}

#[test]
#[serial]
fn run_with_global_symbols() {
  let Some(env) = TestEnv::with_system_compiler(0) else {
    return;
  };
  env.write_file("tool.c", RUNNABLE_SOURCE);

  env
    .extbuild_cmd()
    .args(["run", "--global-symbols", "tool.c"])
    .assert()
    .code(7);
}

#[test]
#[serial]
fn run_without_main_fails() {
  let Some(env) = TestEnv::with_system_compiler(0) else {
    return;
  };
  env.write_file("fast.c", SOURCE);

  env
    .extbuild_cmd()
    .args(["run", "fast.c"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("cannot be run"))
    .stderr(predicate::str::contains("'main'"));
}

#[test]
fn run_of_missing_file_fails() {
  let env = TestEnv::new();

  env
    .extbuild_cmd()
    .args(["run", "nowhere.c"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("Cannot access"));
  assert_eq!(env.compile_count(), 0);
}
