//! img-requestor: send `img{N}.ppm` files to a running image processor and
//! print what comes back.
//!
//! ```bash
//! img-processor &
//! RUST_LOG=debug img-requestor --images imgs --count 10
//! ```

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use eyre::WrapErr;
use shm_image::{
    DEFAULT_SEGMENT_NAME, DEFAULT_SEGMENT_SIZE, Exchange, OutputShape, PpmDirectory, Requestor,
    Segment, SegmentLayout, Session, SessionConfig, WaitPolicy,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "img-requestor")]
#[command(about = "Send images to the image processor through shared memory")]
struct Args {
    /// Name of the shared memory segment
    #[arg(long, default_value = DEFAULT_SEGMENT_NAME)]
    segment: String,

    /// Segment size in bytes, header included
    #[arg(long, default_value_t = DEFAULT_SEGMENT_SIZE)]
    segment_size: usize,

    /// Directory holding img0.ppm, img1.ppm, ...
    #[arg(long, default_value = "imgs")]
    images: PathBuf,

    /// Number of images to send
    #[arg(long, default_value_t = 10)]
    count: usize,

    /// Expect each image back unchanged (pair with `img-processor --echo`)
    #[arg(long)]
    echo: bool,

    /// Sleep between header checks, in nanoseconds
    #[arg(long, default_value_t = 100)]
    poll_ns: u64,

    /// Busy spins before sleeping between header checks
    #[arg(long, default_value_t = 64)]
    spin: u32,

    /// Give up on an unresponsive processor after this many milliseconds (0 = never)
    #[arg(long, default_value_t = 30_000)]
    timeout_ms: u64,
}

impl Args {
    fn into_config(self) -> SessionConfig {
        SessionConfig {
            segment_name: self.segment,
            layout: SegmentLayout::new(self.segment_size),
            image_dir: self.images,
            image_count: self.count,
            output_shape: if self.echo {
                OutputShape::SameAsInput
            } else {
                OutputShape::RowsByOne
            },
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

    let config = Args::parse().into_config();

    let segment = Segment::attach(&config.segment_name, config.layout).wrap_err_with(|| {
        format!(
            "failed to attach to {}; did you start the image processor first?",
            config.segment_name
        )
    })?;
    let requestor = Requestor::new(segment, config.layout, config.wait)
        .wrap_err("segment cannot hold the handshake")?;

    let source = PpmDirectory::new(&config.image_dir);
    let report = Session::new(requestor, source, config.image_count)
        .with_output_shape(config.output_shape)
        .run_with(print_exchange)
        .wrap_err("image session failed")?;

    for skipped in &report.skipped {
        tracing::warn!(index = skipped.index, reason = %skipped.reason, "image was skipped");
    }
    Ok(())
}

fn print_exchange(exchange: &Exchange) {
    let output = &exchange.output;
    println!(
        "image {}: {}x{} -> {}x{}",
        exchange.index,
        exchange.input.rows(),
        exchange.input.columns(),
        output.rows(),
        output.columns()
    );
    for row in output.row_slices() {
        let line: Vec<String> = row.iter().map(ToString::to_string).collect();
        println!("  {}", line.join(" "));
    }
}
