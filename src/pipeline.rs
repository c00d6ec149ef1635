//! Worker pipeline: input, storage and output threads bridged by
//! bounded rings.
//!
//! The input worker pulls parsed packet blocks from the capture
//! collaborator and pushes them onto the input ring. The storage worker
//! owns exactly one flow cache and runs it packet by packet. The output
//! worker drains completed flows to the encoder collaborator and
//! returns the slots.
//!
//! Shutdown propagates downstream: the source ends the stream, the
//! input worker drops its sender, the storage worker drains, runs the
//! forced sweep, and drops the export ring, and the output worker
//! drains and exits. Capture order is preserved within the pipeline;
//! scaling is by running multiple shared-nothing pipelines.

use std::thread;

use tracing::debug;

use crate::cache::{export_ring, CacheStats, ExportSink, FlowCache};
use crate::config::PipelineConfig;
use crate::error::{Error, Result};
use crate::packet::{FlowConsumer, PacketSource};
use crate::process::PluginPipeline;

/// Per-worker results of one pipeline run.
#[derive(Debug)]
pub struct PipelineReport {
    pub input: Result<()>,
    pub storage: Result<()>,
    pub output: Result<()>,
    /// Cache counters at shutdown.
    pub stats: CacheStats,
}

impl PipelineReport {
    /// True when every worker finished cleanly.
    pub fn is_ok(&self) -> bool {
        self.input.is_ok() && self.storage.is_ok() && self.output.is_ok()
    }
}

/// Run one pipeline to completion.
///
/// Blocks until the source ends its stream (or a worker fails) and all
/// flows have been drained to the consumer.
pub fn run_pipeline<S, C>(
    cfg: &PipelineConfig,
    source: S,
    plugins: PluginPipeline,
    consumer: C,
) -> Result<PipelineReport>
where
    S: PacketSource + 'static,
    C: FlowConsumer + 'static,
{
    cfg.validate()?;

    let (block_tx, block_rx) = crossbeam_channel::bounded(cfg.input_ring);
    let (ring, sink) = export_ring(cfg.export_ring);
    // Built on the caller thread so configuration errors surface before
    // anything is spawned.
    let cache = FlowCache::new(&cfg.cache, plugins, ring)?;

    let input = thread::spawn(move || input_worker(source, block_tx));
    let storage = thread::spawn(move || storage_worker(cache, block_rx));
    let output = thread::spawn(move || output_worker(consumer, sink));

    let input = join(input);
    let (storage, stats) = join(storage);
    let output = join(output);

    Ok(PipelineReport {
        input,
        storage,
        output,
        stats,
    })
}

fn join<T>(handle: thread::JoinHandle<T>) -> T {
    match handle.join() {
        Ok(value) => value,
        Err(payload) => std::panic::resume_unwind(payload),
    }
}

fn input_worker<S: PacketSource>(
    mut source: S,
    block_tx: crossbeam_channel::Sender<crate::packet::PacketBlock>,
) -> Result<()> {
    loop {
        match source.next_block()? {
            Some(block) => {
                if block_tx.send(block).is_err() {
                    // Storage worker is gone; its own result carries the
                    // reason.
                    debug!("input ring closed early");
                    return Ok(());
                }
            }
            None => {
                debug!("packet source drained");
                return Ok(());
            }
        }
    }
}

fn storage_worker(
    mut cache: FlowCache,
    block_rx: crossbeam_channel::Receiver<crate::packet::PacketBlock>,
) -> (Result<()>, CacheStats) {
    for block in block_rx.iter() {
        for mut pkt in block.packets {
            if let Err(err) = cache.put_packet(&mut pkt) {
                return (Err(Error::Ring(err)), cache.stats());
            }
        }
    }

    // Input ring closed: export everything still resident.
    let result = cache.finish().map_err(Error::Ring);
    (result, cache.stats())
    // Dropping the cache drops the export ring producer, which lets the
    // output worker drain and exit.
}

fn output_worker<C: FlowConsumer>(mut consumer: C, sink: ExportSink) -> Result<()> {
    while let Some(rec) = sink.recv() {
        consumer.consume(&rec)?;
        sink.release(rec);
    }
    debug!("export ring drained");
    Ok(())
}
