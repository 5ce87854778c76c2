use modhost_core::{MemoryLookup, ModuleError, ResourceLookup, ScriptFailure};
use modhost_test_helpers::fixtures;
use modhost_test_helpers::host::{create_dialect_gateway, create_dialect_host, start};
use modhost_test_helpers::mocks::CountingLookup;
use std::sync::Arc;
use std::thread;

fn compiler_files() -> MemoryLookup {
    MemoryLookup::new().with_file("dialect.lua", fixtures::dialect_compiler())
}

fn counting_compiler() -> Arc<CountingLookup<MemoryLookup>> {
    Arc::new(CountingLookup::new(compiler_files()))
}

#[test]
fn test_dialect_module_is_transpiled() {
    let gateway = create_dialect_gateway(Arc::new(compiler_files()));
    let files = MemoryLookup::new()
        .with_file("main.lua", "answer = require('calc.dl').answer\n")
        .with_file("calc.dl", "let base = 40\nmodule.exports.answer = base + 2\n");
    let deployment = start(&create_dialect_host(files, gateway.clone()), "main");

    assert_eq!(deployment.global::<i64>("answer").unwrap(), 42);
    assert_eq!(deployment.cached_modules(), vec!["calc.dl"]);
    assert!(gateway.is_initialized());
}

#[test]
fn test_dialect_entry_and_load() {
    let gateway = create_dialect_gateway(Arc::new(compiler_files()));
    let files = MemoryLookup::new()
        .with_file("main.dl", "let step = 1\nvalue = 10\nload('more.dl')\n")
        .with_file("more.dl", "let extra = 5\nvalue = value + extra\n");
    let deployment = start(&create_dialect_host(files, gateway), "main.dl");

    assert_eq!(deployment.global::<i64>("value").unwrap(), 15);
}

#[test]
fn test_plain_modules_skip_compiler() {
    let compiler = counting_compiler();
    let gateway = create_dialect_gateway(compiler.clone());
    let files = MemoryLookup::new()
        .with_file("main.lua", "x = require('plain').x\n")
        .with_file("plain.lua", "module.exports.x = 1\n");
    start(&create_dialect_host(files, gateway.clone()), "main");

    assert!(!gateway.is_initialized());
    assert_eq!(compiler.total(), 0);
}

#[test]
fn test_bootstrap_runs_once() {
    let compiler = counting_compiler();
    let gateway = create_dialect_gateway(compiler.clone());
    for i in 0..5 {
        gateway.compile(&format!("m{}.dl", i), "let x = 1").unwrap();
    }
    assert_eq!(compiler.count("dialect.lua"), 1);
}

#[test]
fn test_compile_error_carries_diagnostic() {
    let gateway = create_dialect_gateway(Arc::new(compiler_files()));
    let files = MemoryLookup::new()
        .with_file("main.lua", "require('bad.dl')\n")
        .with_file("bad.dl", "let a = 1\nlet b = !!\n");
    let mut deployment = create_dialect_host(files, gateway).deploy("main");

    match deployment.start() {
        Err(ModuleError::Transpilation { name, diagnostic }) => {
            assert_eq!(name, "bad.dl");
            assert_eq!(diagnostic, "2:9: unexpected '!!'");
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn test_transpiled_runtime_error_names_dialect_module() {
    let gateway = create_dialect_gateway(Arc::new(compiler_files()));
    let files = MemoryLookup::new()
        .with_file("main.lua", "require('oops.dl')\n")
        .with_file("oops.dl", "let a = 1\n\nerror('in dialect')\n");
    let mut deployment = create_dialect_host(files, gateway).deploy("main");

    let failure: ScriptFailure = match deployment.start() {
        Err(ModuleError::ScriptExecution(failure)) => failure,
        other => panic!("unexpected result: {other:?}"),
    };
    assert_eq!(failure.script, "oops.dl");
    assert_eq!(failure.line, Some(3));
}

#[test]
fn test_missing_bootstrap_leaves_gateway_uninitialized() {
    let gateway = create_dialect_gateway(Arc::new(MemoryLookup::new()));
    match gateway.compile("a.dl", "let x = 1") {
        Err(ModuleError::ResourceNotFound { name }) => assert_eq!(name, "dialect.lua"),
        other => panic!("unexpected result: {other:?}"),
    }
    assert!(!gateway.is_initialized());
}

#[test]
fn test_retry_after_bootstrap_appears() {
    struct Appearing {
        files: MemoryLookup,
        misses: std::sync::Mutex<usize>,
    }

    impl ResourceLookup for Appearing {
        fn lookup(&self, name: &str) -> modhost_core::Result<Option<modhost_core::Resource>> {
            let mut misses = self.misses.lock().unwrap();
            if *misses > 0 {
                *misses -= 1;
                return Ok(None);
            }
            self.files.lookup(name)
        }
    }

    let lookup = Arc::new(Appearing {
        files: compiler_files(),
        misses: std::sync::Mutex::new(1),
    });
    let gateway = create_dialect_gateway(lookup);
    assert!(gateway.compile("a.dl", "let x = 1").is_err());
    assert_eq!(gateway.compile("a.dl", "let x = 1").unwrap(), "local x = 1");
    assert!(gateway.is_initialized());
}

#[test]
fn test_concurrent_first_use_bootstraps_once() {
    let compiler = counting_compiler();
    let gateway = create_dialect_gateway(compiler.clone());

    let workers: Vec<_> = (0..8)
        .map(|i| {
            let gateway = Arc::clone(&gateway);
            thread::spawn(move || gateway.compile(&format!("w{}.dl", i), "let v = 1"))
        })
        .collect();
    for worker in workers {
        assert_eq!(worker.join().unwrap().unwrap(), "local v = 1");
    }
    assert_eq!(compiler.count("dialect.lua"), 1);
}

#[test]
fn test_gateway_shared_between_hosts() {
    let compiler = counting_compiler();
    let gateway = create_dialect_gateway(compiler.clone());
    let files = MemoryLookup::new()
        .with_file("main.lua", "v = require('v.dl')\n")
        .with_file("v.dl", "let n = 7\nreturn n\n");

    let first = start(&create_dialect_host(files.clone(), gateway.clone()), "main");
    let second = start(&create_dialect_host(files, gateway), "main");

    assert_eq!(first.global::<i64>("v").unwrap(), 7);
    assert_eq!(second.global::<i64>("v").unwrap(), 7);
    assert_eq!(compiler.count("dialect.lua"), 1);
}
