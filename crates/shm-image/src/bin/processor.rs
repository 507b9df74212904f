//! img-processor: create the shared segment and answer every image with the
//! most frequent colour of each of its rows.
//!
//! With `--echo` every image is sent back unchanged instead.
//!
//! Serves a single session and exits once the requestor sends
//! `NO_MORE_INPUT`. The segment is unlinked on exit.

use std::time::Duration;

use clap::Parser;
use eyre::WrapErr;
use shm_image::{
    DEFAULT_SEGMENT_NAME, DEFAULT_SEGMENT_SIZE, Echo, ImageProcessor, Processor, ProcessorConfig,
    RowColours, Segment, SegmentLayout, WaitPolicy,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "img-processor")]
#[command(about = "Answer image requests arriving through shared memory")]
struct Args {
    /// Name of the shared memory segment to create
    #[arg(long, default_value = DEFAULT_SEGMENT_NAME)]
    segment: String,

    /// Segment size in bytes, header included
    #[arg(long, default_value_t = DEFAULT_SEGMENT_SIZE)]
    segment_size: usize,

    /// Sleep between header checks, in nanoseconds
    #[arg(long, default_value_t = 100)]
    poll_ns: u64,

    /// Busy spins before sleeping between header checks
    #[arg(long, default_value_t = 64)]
    spin: u32,

    /// Give up waiting for a request after this many milliseconds (0 = never)
    #[arg(long, default_value_t = 0)]
    timeout_ms: u64,

    /// Send every image back unchanged
    #[arg(long)]
    echo: bool,
}

impl Args {
    fn into_config(self) -> ProcessorConfig {
        ProcessorConfig {
            segment_name: self.segment,
            layout: SegmentLayout::new(self.segment_size),
            wait: WaitPolicy {
                spin: self.spin,
                poll_interval: Duration::from_nanos(self.poll_ns),
                timeout: (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms)),
            },
        }
    }
}

fn main() -> eyre::Result<()> {
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut handler: Box<dyn ImageProcessor> = if args.echo {
        Box::new(Echo)
    } else {
        Box::new(RowColours)
    };
    let config = args.into_config();

    let segment = Segment::create(&config.segment_name, config.layout)
        .wrap_err_with(|| format!("failed to create segment {}", config.segment_name))?;
    tracing::info!(
        segment = %segment.name(),
        size = segment.len(),
        shape = ?handler.output_shape(),
        "waiting for requests"
    );

    let mut processor = Processor::create(segment, config.layout, config.wait)
        .wrap_err("segment cannot hold the handshake")?;
    let served = processor
        .serve(handler.as_mut())
        .wrap_err("serving requests failed")?;

    tracing::info!(served, "requestor finished");
    Ok(())
}
