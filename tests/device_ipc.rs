// CLASSIFICATION: COMMUNITY
// Filename: device_ipc.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-15

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use abox::ipc::{DeviceId, IpcHandler, IpcId, IpcMessage, IrqReturn, SystemMsg, SystemMsgType};
use abox::qos::QosClass;
use abox::sim::SimEnv;
use abox::{AboxConfig, AboxData, AboxError, CalliopeState};

fn probe(sim: &SimEnv) -> Arc<AboxData> {
    let cfg = AboxConfig {
        coarse_wait_ms: 100,
        ..AboxConfig::default()
    };
    AboxData::probe(cfg, sim.env()).expect("probe")
}

fn system(t: SystemMsgType, p1: i32, p2: i32, p3: i32) -> Vec<u8> {
    SystemMsg::new(t).params(p1, p2, p3).into_message().encode()
}

fn counter(hits: &Arc<AtomicUsize>) -> Arc<dyn IpcHandler> {
    let hits = hits.clone();
    Arc::new(move |_: IpcId, _: &IpcMessage| {
        hits.fetch_add(1, Ordering::SeqCst);
        IrqReturn::Handled
    })
}

fn boot(abox: &AboxData) {
    abox.runtime_resume().expect("enable");
    let raw = system(SystemMsgType::BootDone, 0, 0, 0x5343_3230);
    assert_eq!(abox.handle_ipc(&raw).expect("boot done"), IrqReturn::Handled);
    abox.calliope()
        .wait_ready(Duration::from_millis(10))
        .expect("ready");
}

#[test]
fn change_gear_votes_through_the_gear_table() {
    let sim = SimEnv::new();
    let abox = probe(&sim);
    let raw = system(SystemMsgType::ChangeGear, 1, 0x1234, 0);
    assert_eq!(abox.handle_ipc(&raw).unwrap(), IrqReturn::Handled);
    assert_eq!(abox.qos().get_value(QosClass::Aud, 0x1234), 1_180_000);

    let raw = system(SystemMsgType::ChangeGear, 12, 0x1234, 0);
    abox.handle_ipc(&raw).unwrap();
    assert!(abox.gear().is_idle(0x1234));
}

#[test]
fn sysclk_requests_pick_mif_or_int() {
    let sim = SimEnv::new();
    let abox = probe(&sim);
    abox.handle_ipc(&system(SystemMsgType::RequestSysclk, 400_000, 1, 7))
        .unwrap();
    abox.handle_ipc(&system(SystemMsgType::RequestSysclk, 1_539_000, 0, 8))
        .unwrap();
    abox.handle_ipc(&system(SystemMsgType::RequestSysclk, 845_000, 5, 9))
        .unwrap();

    assert_eq!(abox.qos().get_value(QosClass::Int, 7), 400_000);
    assert_eq!(abox.qos().get_value(QosClass::Mif, 8), 1_539_000);
    assert_eq!(abox.qos().get_value(QosClass::Mif, 9), 845_000);
    assert_eq!(abox.qos().get_target(QosClass::Mif), 1_539_000);
}

#[test]
fn fault_report_escalates() {
    let sim = SimEnv::new();
    let abox = probe(&sim);
    abox.handle_ipc(&system(SystemMsgType::ReportFault, 1, 0, 0))
        .unwrap();
    assert!(abox.failsafe().is_reported());
    assert!(abox.failsafe().has_error());
}

#[test]
fn boot_done_is_broadcast() {
    let sim = SimEnv::new();
    let abox = probe(&sim);
    let a = Arc::new(AtomicUsize::new(0));
    let b = Arc::new(AtomicUsize::new(0));
    abox.register_ipc_handler(IpcId::System, DeviceId(10), counter(&a));
    abox.register_ipc_handler(IpcId::System, DeviceId(11), counter(&b));

    boot(&abox);
    assert_eq!(abox.state(), CalliopeState::Enabled);
    assert_eq!(a.load(Ordering::SeqCst), 1);
    assert_eq!(b.load(Ordering::SeqCst), 1);
}

#[test]
fn channel_messages_reach_first_handler_only() {
    let sim = SimEnv::new();
    let abox = probe(&sim);
    let a = Arc::new(AtomicUsize::new(0));
    let b = Arc::new(AtomicUsize::new(0));
    abox.register_ipc_handler(IpcId::PcmPlayback, DeviceId(1), counter(&a));
    abox.register_ipc_handler(IpcId::PcmPlayback, DeviceId(2), counter(&b));

    let raw = IpcMessage::new(IpcId::PcmPlayback, &[0, 1]).encode();
    assert_eq!(abox.handle_ipc(&raw).unwrap(), IrqReturn::Handled);
    assert_eq!((a.load(Ordering::SeqCst), b.load(Ordering::SeqCst)), (1, 0));

    assert!(abox.unregister_ipc_handler(IpcId::PcmPlayback, DeviceId(1)));
    abox.handle_ipc(&raw).unwrap();
    assert_eq!(b.load(Ordering::SeqCst), 1);
}

#[test]
fn garbage_is_rejected() {
    let sim = SimEnv::new();
    let abox = probe(&sim);
    assert!(matches!(
        abox.handle_ipc(&99u32.to_le_bytes()),
        Err(AboxError::InvalidIpcId(99))
    ));
    assert!(matches!(
        abox.handle_ipc(&0u32.to_le_bytes()),
        Err(AboxError::Malformed(_))
    ));
}

#[test]
fn audio_clock_vote_blocks_runtime_suspend() {
    let sim = SimEnv::new();
    let abox = probe(&sim);
    boot(&abox);

    abox.qos().request_aud(0x55, 600_000, "playback").unwrap();
    assert!(matches!(
        abox.runtime_suspend(),
        Err(AboxError::Busy { usage: 1 })
    ));
    assert_eq!(abox.state(), CalliopeState::Enabled);

    abox.qos().request_aud(0x55, 0, "playback").unwrap();
    abox.runtime_suspend().expect("suspend");
    assert_eq!(abox.state(), CalliopeState::Disabled);
}

#[test]
fn gear_changes_are_announced_while_running() {
    let sim = SimEnv::new();
    let abox = probe(&sim);
    boot(&abox);
    abox.calliope().flush();
    abox.gear().barrier();
    abox.ipc().flush();
    sim.transport.clear();

    abox.gear().request(0x77, 2, "test").unwrap();
    abox.gear().barrier();
    abox.ipc().flush();
    let sent = sim.transport.sent();
    let changed: Vec<SystemMsg> = sent
        .iter()
        .filter_map(|m| m.system().ok())
        .filter(|s| s.msgtype == SystemMsgType::ChangedGear)
        .collect();
    assert_eq!(changed.len(), 1);
    assert_eq!(changed[0].param1, 800_000);
}

#[test]
fn queued_requests_flow_after_boot() {
    let sim = SimEnv::new();
    let abox = probe(&sim);
    let msg = IpcMessage::new(IpcId::Erap, &[1, 2, 3]);
    abox.request_ipc(DeviceId(4), &msg, false, false).unwrap();
    abox.ipc().flush();
    assert_eq!(abox.ipc().pending(), 1);

    boot(&abox);
    abox.ipc().flush();
    assert_eq!(abox.ipc().pending(), 0);
    assert!(sim.transport.sent().contains(&msg));
}

#[test]
fn system_suspend_notifies_running_firmware() {
    let sim = SimEnv::new();
    let abox = probe(&sim);
    abox.suspend_prepare().unwrap();
    assert!(sim.transport.sent().is_empty());

    boot(&abox);
    abox.calliope().flush();
    abox.suspend_prepare().unwrap();
    abox.resume_complete().unwrap();
    let types = sim.transport.system_types();
    assert!(types.ends_with(&[SystemMsgType::ApSuspend, SystemMsgType::ApResume]));
}
