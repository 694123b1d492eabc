use cothread::Cothread;
use criterion::{criterion_group, criterion_main, Criterion};

fn switch_time(c: &mut Criterion) {
    let main = Cothread::current();

    let m = main.clone();
    let partner = Cothread::new(move || loop {
        unsafe { m.switch_to() };
    })
    .unwrap();
    partner.set_label("bench partner");

    // Each iteration is a full round trip: into the partner and back, so
    // one switch costs half the reported time.
    c.bench_function("switch_round_trip", |b| {
        b.iter(|| unsafe { partner.switch_to() })
    });
}

fn create_time(c: &mut Criterion) {
    // Construction without ever running: allocates the stack and writes
    // the initial frame.
    c.bench_function("create_destroy", |b| b.iter(|| Cothread::new(|| {}).unwrap()));
}

criterion_group!(benches, switch_time, create_time);
criterion_main!(benches);
