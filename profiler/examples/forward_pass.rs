//! Simulated model forward pass, profiled end to end.
//!
//! Runs host-side operators as spans, posts synthetic accelerator kernels the
//! way a device completion callback would, writes a Chrome trace into ./log,
//! and prints the aggregated operator table.
//!
//! Run with: cargo run --example forward_pass

use anyhow::Result;
use opscope_profiler::{
    aggregate, profile, render_table, ChromeTraceSink, Config, DeviceKind, GroupBy, Recorder,
    SortKey,
};
use std::thread;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const STEPS: usize = 3;
const LAYERS: usize = 4;
const BATCH: i64 = 32;
const HIDDEN: i64 = 512;

fn main() -> Result<()> {
    init_tracing();

    let config = Config::new()
        .shapes(true)
        .stack(true)
        .on_finalize(ChromeTraceSink::new("./log"));

    let (_, events) = profile(config, |rec| {
        for step in 0..STEPS {
            let span = rec.op(format!("step_{}", step), DeviceKind::Cpu);
            forward(rec);
            span.finish();
        }
    })?;

    let summary = aggregate(
        &events,
        GroupBy::default().with_input_shapes(),
        SortKey::TotalAccelTime,
    );
    println!("{}", render_table(&summary, Some(15)));
    Ok(())
}

/// One forward pass: embedding on the host, then attention and MLP blocks
/// whose matmuls run on the accelerator.
fn forward(rec: &Recorder) {
    let embed = rec.op_with_shapes("embed", DeviceKind::Cpu, &[&[BATCH, HIDDEN]]);
    thread::sleep(Duration::from_millis(2));
    embed.finish();

    for layer in 0..LAYERS {
        let block = rec.op(format!("layer_{}", layer), DeviceKind::Cpu);

        let attn = rec.op_with_shapes("attention", DeviceKind::Cpu, &[&[BATCH, HIDDEN]]);
        launch_kernel(rec, "sgemm_qkv", 3 * HIDDEN, 0);
        thread::sleep(Duration::from_millis(1));
        attn.finish();

        let mlp = rec.op_with_shapes("mlp", DeviceKind::Cpu, &[&[BATCH, HIDDEN]]);
        launch_kernel(rec, "sgemm_ffn", 4 * HIDDEN, 1);
        thread::sleep(Duration::from_millis(1));
        mlp.finish();

        block.finish();
    }
}

/// Pretend a kernel ran on `stream`; duration scales with the output width.
fn launch_kernel(rec: &Recorder, name: &str, width: i64, stream: u32) {
    let start = rec.now_ns();
    let duration_ns = width as u64 * 2_000;
    rec.record_complete(
        name,
        DeviceKind::Accelerator,
        start,
        start + duration_ns,
        Some(stream),
        &[&[BATCH, HIDDEN], &[HIDDEN, width]],
    );
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}
