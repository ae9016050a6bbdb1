use criterion::{black_box, criterion_group, criterion_main, Criterion};
use abox::ipc::{DeviceId, IpcId, IpcQueue, SystemMsg, SystemMsgType, IPC_QUEUE_SIZE};
use abox::qos::{Qos, QosClass};
use abox::pm::RuntimePm;
use abox::sim::RecordingQosSink;
use abox::AboxConfig;
use std::sync::Arc;

fn bench_ring(c: &mut Criterion) {
    let raw = SystemMsg::new(SystemMsgType::ChangedGear)
        .params(800_000, 1, 2)
        .into_message()
        .encode();
    let queue: IpcQueue<IPC_QUEUE_SIZE> = IpcQueue::new();
    c.bench_function("ipc_queue_fill_drain", |b| {
        b.iter(|| {
            for _ in 0..queue.capacity() {
                queue.put(DeviceId(1), IpcId::System, black_box(&raw)).ok();
            }
            while let Ok(slot) = queue.get() {
                black_box(slot.size());
            }
        });
    });
}

fn bench_qos(c: &mut Criterion) {
    let qos = Qos::new(
        &AboxConfig::default(),
        Arc::new(RecordingQosSink::new()),
        Arc::new(RuntimePm::new()),
    )
    .expect("qos");
    let mut value = 0u32;
    c.bench_function("qos_request_aggregate", |b| {
        b.iter(|| {
            value = value.wrapping_add(1) % 1_000_000;
            for id in 1..=16 {
                qos.request(QosClass::Mif, id, value + id, "bench").ok();
            }
            black_box(qos.get_target(QosClass::Mif));
        });
    });
}

criterion_group!(benches, bench_ring, bench_qos);
criterion_main!(benches);
