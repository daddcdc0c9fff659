mod common;

use crate::common::{clr, Script, ScriptedTarget, ScriptedThread};
use clrstack::dump::{dump_threads, dump_threads_with, DumpOptions};
use clrstack::process::TargetProcess;
use clrstack::target::{CacheOptions, Error, Pid, SymbolPath, DEFAULT_SYMBOL_PATH};
use nix::errno::Errno;
use std::str::FromStr;

fn process() -> TargetProcess {
    TargetProcess::new(Pid::from_raw(4242), "app")
}

fn managed(threads: Vec<ScriptedThread>) -> Script {
    Script {
        versions: vec![clr(0x7f10_0000_0000)],
        threads,
        ..Script::default()
    }
}

#[test]
fn test_native_process() {
    let target = ScriptedTarget::new(Script::default());
    let report = dump_threads(&target, &TargetProcess::new(Pid::from_raw(1), "top")).unwrap();

    assert!(!report.succeeded);
    assert_eq!(
        report.text,
        "No CLR Versions found for top. Process is most likely native.\n"
    );
    // no symbol path and no runtime for native targets
    assert!(target.log.symbol_paths.borrow().is_empty());
    assert_eq!(target.log.runtimes.get(), 0);
    assert_eq!(target.log.detaches.get(), 1);
}

#[test]
fn test_attach_with_enabled_caches() {
    let target = ScriptedTarget::new(managed(vec![]));
    dump_threads(&target, &process()).unwrap();

    assert_eq!(target.log.attaches.get(), 1);
    assert_eq!(target.log.cache.get(), Some(CacheOptions::enabled()));
}

#[test]
fn test_single_runtime() {
    let target = ScriptedTarget::new(managed(vec![
        ScriptedThread::live(0x1a2b, 2),
        ScriptedThread::live(0x1a2c, 1),
    ]));
    let report = dump_threads(&target, &process()).unwrap();

    assert!(report.succeeded);
    let lines: Vec<&str> = report.text.lines().collect();
    assert_eq!(lines.len(), 5);
    assert_eq!(lines[0], "1A2B");
    assert_eq!(
        lines[1],
        "7ffd1a2b0000 7f0000000000 void [App] Worker::Step0()[Optimized] void [App] Worker::Step0()[Optimized]"
    );
    assert_eq!(
        lines[2],
        "7ffd1a2b0040 7f0000000100 ThreadNative::Sleep [Runtime: libcoreclr.so!ThreadNative::Sleep+0x2a]"
    );
    assert_eq!(lines[3], "1A2C");
    assert!(report.text.ends_with('\n'));

    assert_eq!(
        target.log.symbol_paths.borrow().as_slice(),
        &[SymbolPath::from_str(DEFAULT_SYMBOL_PATH).unwrap()]
    );
    assert_eq!(target.log.detaches.get(), 1);
}

#[test]
fn test_thread_order_is_kept() {
    let target = ScriptedTarget::new(managed(vec![
        ScriptedThread::live(30, 1),
        ScriptedThread::live(10, 1),
        ScriptedThread::live(20, 1),
    ]));
    let report = dump_threads(&target, &process()).unwrap();

    let headers: Vec<&str> = report
        .text
        .lines()
        .filter(|l| !l.contains(' '))
        .collect();
    assert_eq!(headers, vec!["1E", "A", "14"]);
}

#[test]
fn test_dead_threads_are_skipped() {
    let target = ScriptedTarget::new(managed(vec![
        ScriptedThread::dead(0x10, 3),
        ScriptedThread::live(0x11, 1),
    ]));
    let report = dump_threads(&target, &process()).unwrap();

    assert!(!report.text.lines().any(|l| l == "10"));
    assert!(report.text.starts_with("11\n"));
    // stack of a dead thread is never requested
    assert_eq!(target.log.walked.borrow().as_slice(), &[0x11]);
}

#[test]
fn test_empty_stack_has_no_header() {
    let target = ScriptedTarget::new(managed(vec![
        ScriptedThread::live(0x20, 0),
        ScriptedThread::live(0x21, 1),
    ]));
    let report = dump_threads(&target, &process()).unwrap();

    assert!(report.succeeded);
    assert_eq!(report.text.lines().next(), Some("21"));
    assert_eq!(report.text.lines().count(), 2);
}

#[test]
fn test_no_frames_is_still_success() {
    let target = ScriptedTarget::new(managed(vec![
        ScriptedThread::dead(0x30, 2),
        ScriptedThread::live(0x31, 0),
    ]));
    let report = dump_threads(&target, &process()).unwrap();

    assert!(report.succeeded);
    assert!(report.text.is_empty());
}

#[test]
fn test_side_by_side_runtimes() {
    let mut script = managed(vec![ScriptedThread::live(0x40, 3)]);
    script.versions.push(clr(0x7f20_0000_0000));
    let target = ScriptedTarget::new(script);
    let report = dump_threads(&target, &process()).unwrap();

    assert!(report.succeeded);
    assert!(report.text.is_empty());
    // symbol path is set once a runtime is detected, even if none is selected
    assert_eq!(target.log.symbol_paths.borrow().len(), 1);
    assert_eq!(target.log.runtimes.get(), 0);
    assert_eq!(target.log.detaches.get(), 1);
}

#[test]
fn test_frame_read_error_ends_thread() {
    let mut broken = ScriptedThread::live(0x50, 4);
    broken.fail_after = Some(2);
    let target = ScriptedTarget::new(managed(vec![broken, ScriptedThread::live(0x51, 1)]));
    let report = dump_threads(&target, &process()).unwrap();

    let lines: Vec<&str> = report.text.lines().collect();
    assert_eq!(lines.len(), 5);
    assert_eq!(lines[0], "50");
    assert_eq!(lines[3], "51");
}

#[test]
fn test_thread_start_error_skips_thread() {
    let mut broken = ScriptedThread::live(0x60, 2);
    broken.fail_start = true;
    let target = ScriptedTarget::new(managed(vec![broken, ScriptedThread::live(0x61, 1)]));
    let report = dump_threads(&target, &process()).unwrap();

    assert!(report.succeeded);
    assert!(report.text.starts_with("61\n"));
    assert_eq!(target.log.walked.borrow().as_slice(), &[0x60, 0x61]);
}

#[test]
fn test_thread_enumeration_error() {
    let mut script = managed(vec![ScriptedThread::live(0x70, 2)]);
    script.threads_error = Some(|| Error::Mappings(Pid::from_raw(4242), Errno::ESRCH.into()));
    let target = ScriptedTarget::new(script);
    let report = dump_threads(&target, &process()).unwrap();

    assert!(report.succeeded);
    assert!(report.text.is_empty());
    assert_eq!(target.log.detaches.get(), 1);
}

#[test]
fn test_attach_error_is_returned() {
    let target = ScriptedTarget::new(Script {
        attach_error: Some(|| Error::Attach(Errno::EPERM)),
        ..managed(vec![ScriptedThread::live(1, 1)])
    });
    let err = dump_threads(&target, &process()).unwrap_err();

    assert!(matches!(err, Error::Attach(Errno::EPERM)));
    assert_eq!(target.log.attaches.get(), 0);
    assert_eq!(target.log.detaches.get(), 0);
}

#[test]
fn test_symbol_path_error_is_not_fatal() {
    let mut script = managed(vec![ScriptedThread::live(0x80, 2)]);
    script.symbol_path_error = Some(|| Error::SymbolPathFormat("SRV*".to_string()));
    let target = ScriptedTarget::new(script);
    let report = dump_threads(&target, &process()).unwrap();

    assert!(report.succeeded);
    assert!(report.text.starts_with("80\n"));
}

#[test]
fn test_runtime_errors() {
    let mut script = managed(vec![ScriptedThread::live(0x90, 2)]);
    script.runtime_error = Some(|| Error::RuntimeNotLoaded("libcoreclr.so".into()));
    let target = ScriptedTarget::new(script);
    let report = dump_threads(&target, &process()).unwrap();
    assert!(report.succeeded);
    assert!(report.text.is_empty());
    assert_eq!(target.log.detaches.get(), 1);

    let mut script = managed(vec![ScriptedThread::live(0x90, 2)]);
    script.runtime_error = Some(|| Error::AttachedProcessNotFound(Pid::from_raw(4242)));
    let target = ScriptedTarget::new(script);
    let err = dump_threads(&target, &process()).unwrap_err();
    assert!(matches!(err, Error::AttachedProcessNotFound(_)));
    // session released on error too
    assert_eq!(target.log.detaches.get(), 1);
}

#[test]
fn test_managed_frames_only() {
    let target = ScriptedTarget::new(managed(vec![ScriptedThread::live(0xa0, 4)]));
    let options = DumpOptions {
        include_internal_frames: false,
        ..DumpOptions::default()
    };
    let report = dump_threads_with(&target, &process(), &options).unwrap();

    let lines: Vec<&str> = report.text.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[1..].iter().all(|l| l.contains("Worker::Step")));
}

#[test]
fn test_custom_symbol_path() {
    let target = ScriptedTarget::new(managed(vec![]));
    let options = DumpOptions {
        symbol_path: SymbolPath::from_str("/opt/syms").unwrap(),
        ..DumpOptions::default()
    };
    dump_threads_with(&target, &process(), &options).unwrap();

    assert_eq!(
        target.log.symbol_paths.borrow()[0].to_string(),
        "/opt/syms"
    );
}

#[test]
fn test_dump_is_repeatable() {
    let target = ScriptedTarget::new(managed(vec![ScriptedThread::live(0xb0, 3)]));
    let first = dump_threads(&target, &process()).unwrap();
    let second = dump_threads(&target, &process()).unwrap();

    assert_eq!(first.succeeded, second.succeeded);
    assert_eq!(first, second);
    assert_eq!(target.log.attaches.get(), 2);
    assert_eq!(target.log.detaches.get(), 2);
}
