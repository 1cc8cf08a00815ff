//! Many independent processes racing to build the same module.

use std::process::Stdio;

use serial_test::serial;

use super::common::{RUNNABLE_SOURCE, SOURCE, TestEnv};

const PROCESSES: usize = 10;

#[test]
#[serial]
fn concurrent_processes_compile_once() {
  let env = TestEnv::with_compile_delay(1);
  env.write_file("fast.cpp", SOURCE);

  let children: Vec<_> = (0..PROCESSES)
    .map(|_| {
      env
        .extbuild_process()
        .args(["build", "--lock-timeout", "60s"])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap()
    })
    .collect();

  for child in children {
    let output = child.wait_with_output().unwrap();
    assert!(
      output.status.success(),
      "build failed: {}",
      String::from_utf8_lossy(&output.stderr)
    );
  }

  assert_eq!(env.compile_count(), 1);
  assert!(env.artifact("fast").exists());
  assert!(!env.lock_file("fast").exists());

  env
    .extbuild_cmd()
    .arg("status")
    .arg(env.artifact("fast"))
    .assert()
    .success();
}

#[test]
#[serial]
fn concurrent_processes_compile_once_and_all_run() {
  let Some(env) = TestEnv::with_system_compiler(1) else {
    return;
  };
  env.write_file("fast.c", RUNNABLE_SOURCE);

  let children: Vec<_> = (0..PROCESSES)
    .map(|_| {
      env
        .extbuild_process()
        .args(["run", "fast.c", "--lock-timeout", "60s"])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap()
    })
    .collect();

  for child in children {
    let output = child.wait_with_output().unwrap();
    assert_eq!(
      output.status.code(),
      Some(7),
      "run failed: {}",
      String::from_utf8_lossy(&output.stderr)
    );
  }

  assert_eq!(env.compile_count(), 1);
  assert!(!env.lock_file("fast").exists());
}

#[test]
#[serial]
fn waiter_gives_up_after_the_lock_timeout() {
  let env = TestEnv::with_compile_delay(5);
  env.write_file("fast.cpp", SOURCE);

  let holder = env
    .extbuild_process()
    .arg("build")
    .stdout(Stdio::null())
    .stderr(Stdio::null())
    .spawn()
    .unwrap();

  let lock = env.lock_file("fast");
  let started = std::time::Instant::now();
  while !lock.exists() && started.elapsed() < std::time::Duration::from_secs(10) {
    std::thread::sleep(std::time::Duration::from_millis(20));
  }
  assert!(lock.exists(), "holder never took the lock");

  let output = env
    .extbuild_process()
    .args(["build", "--lock-timeout", "1s"])
    .output()
    .unwrap();
  assert!(!output.status.success());
  let stderr = String::from_utf8_lossy(&output.stderr);
  assert!(stderr.contains("gave up building fast"), "{}", stderr);
  assert!(stderr.contains("remove the lock file"), "{}", stderr);

  let holder = holder.wait_with_output().unwrap();
  assert!(holder.status.success());
  assert_eq!(env.compile_count(), 1);
}
