//! 리컴바인 처리 경로와 술어 컴파일 벤치마크

use std::sync::Arc;

use criterion::{Criterion, black_box, criterion_group, criterion_main};

use logpost_core::entry::Entry;
use logpost_core::field::Field;
use logpost_core::operator::BuildContext;
use logpost_pipeline::expr::{EnvPool, Program};
use logpost_pipeline::testutil::FakeOutput;
use logpost_pipeline::transformer::RecombineConfig;

fn bench_predicate(c: &mut Criterion) {
    c.bench_function("expr_compile", |b| {
        b.iter(|| {
            Program::compile(black_box(
                "$body matches '^\\\\d{4}-' and $attributes.unit == 'app.service'",
            ))
            .unwrap()
        });
    });

    let program = Program::compile("$body matches '^Exception'").unwrap();
    let pool = EnvPool::new();
    let entry = Entry::with_body("Exception in thread main");
    c.bench_function("expr_run", |b| {
        b.iter(|| {
            let env = pool.acquire(black_box(&entry));
            let result = program.run_bool(&env).unwrap();
            pool.release(env);
            result
        });
    });
}

fn bench_recombine_process(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap();

    let config = RecombineConfig {
        is_first_entry: Some("$body matches '^A'".to_owned()),
        combine_field: Some(Field::body()),
        ..Default::default()
    };
    let ops = config.build(&BuildContext::default()).unwrap();
    let operator = ops.into_iter().next().unwrap();
    let fake = Arc::new(FakeOutput::new());
    operator.set_outputs(vec![fake.clone()]);

    c.bench_function("recombine_process_run_of_8", |b| {
        b.iter(|| {
            runtime.block_on(async {
                for _ in 0..7 {
                    let mut entry = Entry::with_body("continuation line");
                    entry.add_attribute("file.path", "/var/log/app.log");
                    operator.process(entry).await.unwrap();
                }
                let mut boundary = Entry::with_body("A new record");
                boundary.add_attribute("file.path", "/var/log/app.log");
                operator.process(boundary).await.unwrap();
            });
            fake.take_entries()
        });
    });
}

criterion_group!(benches, bench_predicate, bench_recombine_process);
criterion_main!(benches);
