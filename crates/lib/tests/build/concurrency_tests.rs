//! Many builders racing for the same module.

use std::sync::Barrier;
use std::thread;
use std::time::Duration;

use extbuild_lib::checksum;
use tempfile::TempDir;

use super::common::{BytesLoader, MAGIC, SOURCE, SlowCompiler, orchestrator, write_file};

const BUILDERS: usize = 10;

#[test]
fn ten_threads_compile_exactly_once() {
  let temp = TempDir::new().unwrap();
  write_file(&temp, "shared.cpp", SOURCE);

  let compiler = SlowCompiler {
    delay: Duration::from_millis(300),
    ..SlowCompiler::default()
  };
  let barrier = Barrier::new(BUILDERS);

  let loaded: Vec<Vec<u8>> = thread::scope(|scope| {
    let handles: Vec<_> = (0..BUILDERS)
      .map(|_| {
        // Independent instances, as if each were its own process.
        let orchestrator = orchestrator(temp.path(), compiler.clone(), BytesLoader);
        let barrier = &barrier;
        scope.spawn(move || {
          barrier.wait();
          orchestrator.imp("shared").unwrap()
        })
      })
      .collect();
    handles.into_iter().map(|h| h.join().unwrap()).collect()
  });

  assert_eq!(compiler.calls(), 1);
  assert!(loaded.iter().all(|bytes| bytes == &loaded[0]));
  assert!(loaded[0].starts_with(MAGIC));
  assert!(!temp.path().join("shared.so.lock").exists());
}

#[test]
fn shared_instance_serves_many_threads() {
  let temp = TempDir::new().unwrap();
  write_file(&temp, "shared.cpp", SOURCE);

  let compiler = SlowCompiler {
    delay: Duration::from_millis(200),
    ..SlowCompiler::default()
  };
  let orchestrator = orchestrator(temp.path(), compiler.clone(), BytesLoader);
  let barrier = Barrier::new(BUILDERS);

  thread::scope(|scope| {
    for _ in 0..BUILDERS {
      scope.spawn(|| {
        barrier.wait();
        orchestrator.build("shared").unwrap();
      });
    }
  });

  assert_eq!(compiler.calls(), 1);
  let module = orchestrator.prepare(&temp.path().join("shared.cpp"), "shared").unwrap();
  assert!(checksum::is_valid(&module));
}

#[test]
fn different_modules_build_independently() {
  let temp = TempDir::new().unwrap();
  for i in 0..4 {
    write_file(&temp, &format!("m{}.cpp", i), SOURCE);
  }

  let compiler = SlowCompiler {
    delay: Duration::from_millis(100),
    ..SlowCompiler::default()
  };
  let orchestrator = orchestrator(temp.path(), compiler.clone(), BytesLoader);

  thread::scope(|scope| {
    for i in 0..4 {
      let orchestrator = &orchestrator;
      scope.spawn(move || orchestrator.imp(&format!("m{}", i)).unwrap());
    }
  });

  assert_eq!(compiler.calls(), 4);
}
