//! Call path benchmarks
//!
//! Measures the per-call overhead added on top of the native function:
//! - Planning arguments (classification, string copies, variadic flattening)
//! - A full invoke through the trampoline

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use dlbind_runtime::ffi::{bind, build_call_plan, Address, FunctionSignature, TypeDescriptor, Value};
use std::os::raw::c_int;

extern "C" fn add(a: c_int, b: c_int) -> c_int {
    a.wrapping_add(b)
}

fn bench_plan_ints(c: &mut Criterion) {
    let mut group = c.benchmark_group("plan_ints");
    for count in [0usize, 2, 8, 32] {
        let sig = FunctionSignature::new(vec![TypeDescriptor::c_long(); count])
            .returning(TypeDescriptor::c_long());
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.iter(|| {
                let mut args: Vec<Value> = (0..count as i64).map(Value::I64).collect();
                black_box(build_call_plan(&sig, &mut args).map(|plan| plan.len()))
            });
        });
    }
    group.finish();
}

fn bench_plan_variadic_strings(c: &mut Criterion) {
    let sig = FunctionSignature::new(vec![TypeDescriptor::CString])
        .variadic()
        .returning(TypeDescriptor::c_int());
    c.bench_function("plan_variadic_strings", |b| {
        b.iter(|| {
            let mut args = vec![
                Value::Str("%s %s %d %f".into()),
                Value::Sequence(vec![
                    Value::Str("alpha".into()),
                    Value::Str("beta".into()),
                    Value::I32(7),
                    Value::F64(0.25),
                ]),
            ];
            black_box(build_call_plan(&sig, &mut args).map(|plan| plan.len()))
        });
    });
}

fn bench_invoke_add(c: &mut Criterion) {
    let sig = FunctionSignature::new(vec![TypeDescriptor::c_int(); 2])
        .returning(TypeDescriptor::c_int());
    let add = unsafe { bind(sig, Address::from_usize(add as usize).unwrap()).unwrap() };
    c.bench_function("invoke_add", |b| {
        b.iter(|| unsafe { black_box(add.invoke(&mut [Value::I32(3), Value::I32(2)])) });
    });
}

criterion_group!(
    benches,
    bench_plan_ints,
    bench_plan_variadic_strings,
    bench_invoke_add
);
criterion_main!(benches);
