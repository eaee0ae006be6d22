use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ravel_bytecode::SlotKind;
use ravel_runtime::{with_active_stack, Coroutine, Stack, Value, VmResult};

/// Save and restore a frame of `slots` values at nesting `depth`
fn save_restore(stack: &mut Stack, depth: usize, slots: u32) -> VmResult<()> {
    for _ in 0..depth {
        let entry = stack.next_entry_index();
        stack.reserve_frame(entry + 1, slots as usize)?;
        for slot in 0..slots {
            if slot % 2 == 0 {
                stack.save(SlotKind::Int, slot, Value::Int(slot as i32))?;
            } else {
                stack.save(SlotKind::Ref, slot, Value::Null)?;
            }
        }
    }
    stack.resume_stack();
    for _ in 0..depth {
        stack.next_entry_index();
        for slot in 0..slots {
            let kind = if slot % 2 == 0 { SlotKind::Int } else { SlotKind::Ref };
            black_box(stack.restore(kind, slot)?);
        }
    }
    for _ in 0..depth {
        stack.release_frame()?;
    }
    Ok(())
}

fn bench_frames(c: &mut Criterion) {
    let mut group = c.benchmark_group("frames");
    for depth in [1usize, 8, 64] {
        group.bench_with_input(BenchmarkId::new("depth", depth), &depth, |b, &depth| {
            let mut stack = Stack::default();
            b.iter(|| save_restore(&mut stack, depth, 4).unwrap());
        });
    }
    group.finish();
}

fn bench_suspend_resume(c: &mut Criterion) {
    c.bench_function("suspend_resume", |b| {
        b.iter(|| {
            let mut count = 0;
            let co = Coroutine::new(move || -> VmResult<()> {
                let entry = with_active_stack(|s| s.next_entry_index())?;
                if entry == 0 {
                    count += 1;
                    with_active_stack(|s| s.reserve_frame(1, 0))??;
                    return Err(ravel_runtime::suspend::suspend());
                }
                with_active_stack(|s| s.release_frame())??;
                Ok(())
            });
            co.run().unwrap();
            co.run().unwrap();
            black_box(co.state())
        });
    });
}

criterion_group!(benches, bench_frames, bench_suspend_resume);
criterion_main!(benches);
