use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;

use luabridge_engine::{
    BridgeContext, BridgeOptions, ClassDescriptor, ClassRegistry, ContextRegistry, HostFunction, HostType, HostValue,
};

fn context() -> Arc<BridgeContext> {
    let mut classes = ClassRegistry::new();
    classes.register_class(
        ClassDescriptor::builder("Math")
            .static_method("pick", vec![HostType::Str], HostType::I32, |_, _| Ok(HostValue::I32(0)))
            .static_method("pick", vec![HostType::Any], HostType::I32, |_, _| Ok(HostValue::I32(1)))
            .static_method("pick", vec![HostType::I32], HostType::I32, |_, args| {
                Ok(HostValue::I32(args[0].as_i64().unwrap_or_default() as i32))
            })
            .build(),
    );
    let ctx = BridgeContext::create(&ContextRegistry::new(), Arc::new(classes), BridgeOptions::default()).unwrap();
    HostFunction::new("id", |_, args| Ok(args.to_vec())).register(&ctx).unwrap();
    ctx
}

fn bench_script_to_host(c: &mut Criterion) {
    let ctx = context();
    let mut group = c.benchmark_group("script_to_host");

    for (name, source) in [
        ("host_function", "local s = 0 for i = 1, 1000 do s = s + id(i) end return s"),
        ("overload_exact", "local M = luajava.bindClass('Math') local s = 0 for i = 1, 1000 do s = s + M:pick(i) end return s"),
        ("overload_any", "local M = luajava.bindClass('Math') local s = 0 for i = 1, 1000 do s = s + M:pick(true) end return s"),
    ] {
        let chunk = ctx.load_string(source).unwrap();
        group.bench_with_input(BenchmarkId::new("calls_x1000", name), &chunk, |b, chunk| {
            b.iter(|| ctx.pcall(black_box(chunk), &[]).unwrap());
        });
    }

    group.finish();
}

fn bench_host_to_script(c: &mut Criterion) {
    let ctx = context();
    ctx.exec("function add(a, b) return a + b end").unwrap();
    let add = ctx.global_handle("add").unwrap();

    c.bench_function("handle_call1", |b| {
        b.iter(|| add.call1(black_box(&[HostValue::I32(1), HostValue::I32(2)])).unwrap());
    });
}

criterion_group!(benches, bench_script_to_host, bench_host_to_script);
criterion_main!(benches);
