// CLASSIFICATION: COMMUNITY
// Filename: failsafe_concurrency.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-15

use std::sync::{Arc, Barrier};
use std::thread;

use abox::failsafe::{Failsafe, FailsafeReport};
use abox::pm::RuntimePm;
use abox::qos::Qos;
use abox::sim::{RecordingEvents, RecordingQosSink, SimPlatform};
use abox::AboxConfig;

fn failsafe(cfg: AboxConfig) -> (Arc<Failsafe>, Arc<RecordingEvents>, Arc<RuntimePm>) {
    let _ = env_logger::builder().is_test(true).try_init();
    let pm = Arc::new(RuntimePm::new());
    let events = Arc::new(RecordingEvents::new());
    let qos = Arc::new(Qos::new(&cfg, Arc::new(RecordingQosSink::new()), pm.clone()).expect("qos"));
    let fs = Failsafe::new(&cfg, pm.clone(), Arc::new(SimPlatform::new()), qos, events.clone())
        .expect("failsafe");
    (Arc::new(fs), events, pm)
}

fn storm(fs: &Arc<Failsafe>, threads: usize) -> Vec<FailsafeReport> {
    let gate = Arc::new(Barrier::new(threads));
    let handles: Vec<_> = (0..threads)
        .map(|i| {
            let fs = fs.clone();
            let gate = gate.clone();
            thread::spawn(move || {
                gate.wait();
                fs.report(i % 2 == 0)
            })
        })
        .collect();
    handles
        .into_iter()
        .map(|h| h.join().expect("reporter"))
        .collect()
}

#[test]
fn one_primary_per_incident() {
    let (fs, events, _) = failsafe(AboxConfig::default());
    let outcomes = storm(&fs, 16);
    let primaries = outcomes
        .iter()
        .filter(|&&o| o == FailsafeReport::Primary)
        .count();
    assert_eq!(primaries, 1);
    assert_eq!(fs.reset_count(), 16);
    assert_eq!(fs.incidents(), 1);

    fs.flush();
    assert_eq!(events.events().len(), 1);
}

#[test]
fn recovery_opens_a_new_incident() {
    let (fs, events, _) = failsafe(AboxConfig::default());
    storm(&fs, 8);
    fs.flush();
    fs.report_reset();

    let outcomes = storm(&fs, 8);
    assert_eq!(
        outcomes
            .iter()
            .filter(|&&o| o == FailsafeReport::Primary)
            .count(),
        1
    );
    assert_eq!(fs.incidents(), 2);
    fs.flush();
    assert_eq!(events.events().len(), 2);
}

#[test]
fn service_mode_takes_one_reference() {
    let cfg = AboxConfig {
        failsafe_service: true,
        ..AboxConfig::default()
    };
    let (fs, _, pm) = failsafe(cfg);
    storm(&fs, 12);
    assert_eq!(pm.usage_count(), 1);
    assert!(fs.reset());
    assert_eq!(pm.usage_count(), 0);
    fs.report_reset();
    assert_eq!(pm.usage_count(), 0);
}
