use criterion::{black_box, criterion_group, criterion_main, Criterion};

use std::sync::Arc;

use animstream::animation::clip::ClipData;
use animstream::animation::ArtItemAnim;
use animstream::core::types::{AnimId, HierarchyId, SkeletonId};
use animstream::core::StreamingSettings;
use animstream::streaming::{AnimStreamDef, AnimStreamManager};

const SKEL: SkeletonId = SkeletonId(1);
const HIER: HierarchyId = HierarchyId(1);

fn test_def(num_anims: u32, num_blocks: u32) -> Arc<AnimStreamDef> {
    Arc::new(AnimStreamDef {
        stream_name: "bench".to_owned(),
        num_anims,
        frames_per_block: 30,
        max_block_size: 64 * 1024,
        num_blocks,
        skel_ids: vec![SKEL; num_anims as usize],
        anim_name_ids: (0..num_anims).map(|i| AnimId::of(&format!("bench-{i}"))).collect(),
        block_sizes: vec![16 * 1024; (num_blocks * num_anims) as usize],
    })
}

fn attached_manager() -> (AnimStreamManager, Arc<ArtItemAnim>) {
    animstream::core::logging::init_for_tests();
    let mut mgr = AnimStreamManager::new(StreamingSettings::default());
    mgr.register_stream_def(test_def(1, 30)).unwrap();

    let header = Arc::new(ArtItemAnim::new(
        "bench-0",
        SKEL,
        ClipData {
            hierarchy_id: HIER,
            total_frames: 900,
            frames_per_second: 30.0,
        },
    ));
    mgr.anim_table_mut().insert(Arc::clone(&header));
    mgr.anim_table_mut().insert(Arc::new(ArtItemAnim::new(
        "bench-0-chunk-0",
        SKEL,
        ClipData {
            hierarchy_id: HIER,
            total_frames: 30,
            frames_per_second: 30.0,
        },
    )));

    for _ in 0..10 {
        mgr.clock_mut().advance();
        mgr.clock_mut().render_caught_up();
    }
    let frame = mgr.clock().current_frame();
    mgr.notify_usage(&header, header.name_id, 0.0, frame);
    (mgr, header)
}

fn bench_anim_id_hash(c: &mut Criterion) {
    c.bench_function("anim_id_hash", |b| {
        b.iter(|| AnimId::of(black_box("cin-beach-hero-facial-layer")));
    });

    let base = AnimId::of("cin-beach-hero-facial-layer");
    c.bench_function("anim_id_concat", |b| {
        b.iter(|| black_box(base).concat(black_box("-chunk-0")));
    });
}

fn bench_block_math(c: &mut Criterion) {
    let def = test_def(4, 120);
    c.bench_function("interleaved_block_offset", |b| {
        b.iter(|| def.interleaved_block_offset(black_box(100)));
    });
}

fn bench_get_art_item(c: &mut Criterion) {
    let (mgr, header) = attached_manager();
    c.bench_function("get_art_item_first_chunk", |b| {
        b.iter(|| mgr.get_art_item(black_box(&header), header.name_id, black_box(0.01)));
    });
    c.bench_function("get_art_item_fallback", |b| {
        b.iter(|| mgr.get_art_item(black_box(&header), header.name_id, black_box(0.73)));
    });
}

fn bench_notify_usage(c: &mut Criterion) {
    let (mut mgr, header) = attached_manager();
    c.bench_function("notify_usage_dedup", |b| {
        b.iter(|| {
            let frame = mgr.clock().current_frame();
            mgr.notify_usage(black_box(&header), header.name_id, black_box(0.25), frame);
        });
    });
}

criterion_group!(
    benches,
    bench_anim_id_hash,
    bench_block_math,
    bench_get_art_item,
    bench_notify_usage
);
criterion_main!(benches);
