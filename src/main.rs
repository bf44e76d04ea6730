use clap::{Parser, Subcommand};
use improc::config::{self, ImprocConfig};
use improc::imaging::{self, Converter, RustHandle};
use improc::pool::HandlePool;
use improc::request::SpecRequest;
use improc::spec::Compression;
use improc::{batch, output};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

fn version_string() -> &'static str {
    let on_tag = env!("IMPROC_ON_RELEASE_TAG");
    if on_tag == "true" {
        env!("CARGO_PKG_VERSION")
    } else {
        let hash = env!("IMPROC_GIT_HASH");
        if hash.is_empty() {
            "dev@unknown"
        } else {
            // Leaked once at startup
            Box::leak(format!("dev@{hash}").into_boxed_str())
        }
    }
}

/// Output spec flags shared by every command that converts or plans.
#[derive(clap::Args, Clone, Debug)]
struct SpecArgs {
    /// Output template: <W>x<H>[@<ax>,<ay>], e.g. 200x100@-1,1
    #[arg(long, allow_hyphen_values = true)]
    spec: Option<String>,

    /// Output width (used when --spec is absent)
    #[arg(long)]
    width: Option<String>,

    /// Output height (used when --spec is absent)
    #[arg(long)]
    height: Option<String>,

    /// Horizontal anchor: negative = left, 0 = center, positive = right
    #[arg(long, allow_hyphen_values = true, requires = "anchor_y")]
    anchor_x: Option<String>,

    /// Vertical anchor: negative = top, 0 = center, positive = bottom
    #[arg(long, allow_hyphen_values = true, requires = "anchor_x")]
    anchor_y: Option<String>,

    /// Fill the box and crop the overflow instead of padding
    #[arg(long)]
    crop: bool,

    /// Lossy quality 1-100 (out-of-range values use the configured default)
    #[arg(long)]
    quality: Option<String>,

    /// Output format: jpg, png or webp (default: keep the source format)
    #[arg(long)]
    out: Option<String>,

    /// Background color as RRGGBB
    #[arg(long)]
    background: Option<String>,

    /// Text to stamp onto the image (needs --font and --font-size)
    #[arg(long)]
    text: Option<String>,

    /// Path to a TrueType/OpenType font file
    #[arg(long)]
    font: Option<PathBuf>,

    /// Font size in pixels
    #[arg(long)]
    font_size: Option<f32>,

    /// Text color as RRGGBB (default 000000)
    #[arg(long)]
    text_color: Option<String>,

    /// Text background as RRGGBB (default transparent)
    #[arg(long)]
    text_background: Option<String>,

    /// Text anchor as <x>,<y>
    #[arg(long, allow_hyphen_values = true)]
    text_anchor: Option<String>,

    /// Image composited over the result (repeatable, applied in order)
    #[arg(long = "overlay")]
    overlays: Vec<PathBuf>,
}

impl SpecArgs {
    /// Read overlay files and hand everything to the request resolver.
    fn into_request(self) -> std::io::Result<SpecRequest> {
        let overlays = self
            .overlays
            .iter()
            .map(std::fs::read)
            .collect::<std::io::Result<Vec<_>>>()?;
        Ok(SpecRequest {
            template: self.spec,
            width: self.width,
            height: self.height,
            anchor_x: self.anchor_x,
            anchor_y: self.anchor_y,
            crop: self.crop,
            quality: self.quality,
            out: self.out,
            background: self.background,
            text: self.text,
            font: self.font.map(|p| p.to_string_lossy().into_owned()),
            font_size: self.font_size,
            text_color: self.text_color,
            text_background: self.text_background,
            text_anchor: self.text_anchor,
            overlays,
        })
    }
}

#[derive(Parser)]
#[command(name = "improc")]
#[command(about = "Resize, crop and pad images from compact output specs")]
#[command(long_about = "\
Resize, crop and pad images from compact output specs

An output spec names the box to fit and where to anchor the image in it:

  200x100          fit inside 200x100, pad the short side
  200x100 --crop   fill 200x100, crop the long side
  200x             200 wide, height follows the aspect ratio
  200x100@-1,1     anchor left horizontally, bottom vertically

Anchor values only matter by sign: negative pulls toward the top/left,
positive pushes toward the bottom/right, zero centers.

Run 'improc gen-config' to generate a documented improc.toml.")]
#[command(version = version_string())]
struct Cli {
    /// Config file (default: ./improc.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log every pipeline stage (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Convert one image
    Convert {
        input: PathBuf,
        output: PathBuf,
        #[command(flatten)]
        spec: SpecArgs,
    },
    /// Show the resize/crop/extent plan for one image without converting it
    Plan {
        input: PathBuf,
        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
        #[command(flatten)]
        spec: SpecArgs,
    },
    /// Convert every image in a directory tree
    Batch {
        input_dir: PathBuf,
        output_dir: PathBuf,
        #[command(flatten)]
        spec: SpecArgs,
    },
    /// Print a stock improc.toml with all options documented
    GenConfig,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Command::Convert {
            input,
            output: dest,
            spec,
        } => {
            let config = setup(cli.config.as_deref(), cli.verbose)?;
            let mut request = spec.into_request()?;
            let blob = std::fs::read(&input)?;
            if request.out.is_none() {
                request.out = extension_of(&dest);
                if let Some(ext) = request.out.as_deref()
                    && matches!(Compression::from_token(ext), Compression::Transient)
                    && !imaging::rust_backend::source_matches_extension(&blob, ext)
                {
                    return Err(format!(
                        "cannot write a .{ext} file from this source; \
                         use a jpg, png or webp destination or pass --out"
                    )
                    .into());
                }
            }
            let spec = request.into_output_spec(config.output.quality())?;

            let dims = imaging::identify(&blob)?;
            let converter = build_converter(&config)?;
            let bytes = converter.apply(&blob, &spec);
            converter.close();
            let bytes = bytes?;

            if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&dest, &bytes)?;
            output::print_convert(&input, dims, &dest, bytes.len());
        }
        Command::Plan { input, json, spec } => {
            let config = setup(cli.config.as_deref(), cli.verbose)?;
            let spec = spec
                .into_request()?
                .into_output_spec(config.output.quality())?;
            let blob = std::fs::read(&input)?;
            let dims = imaging::identify(&blob)?;
            let plan = imaging::plan_format(dims, &spec, config.output.filter)?;

            if json {
                let value = serde_json::json!({ "input": dims, "plan": plan });
                println!("{}", serde_json::to_string_pretty(&value)?);
            } else {
                output::print_plan(&input, dims, &spec, &plan);
            }
        }
        Command::Batch {
            input_dir,
            output_dir,
            spec,
        } => {
            let config = setup(cli.config.as_deref(), cli.verbose)?;
            let spec = spec
                .into_request()?
                .into_output_spec(config.output.quality())?;
            init_thread_pool(&config.processing);
            let converter = build_converter(&config)?;

            let (tx, rx) = std::sync::mpsc::channel();
            let printer = std::thread::spawn(move || {
                for (i, event) in rx.into_iter().enumerate() {
                    println!("{}", output::format_batch_event(i + 1, &event));
                }
            });
            let summary = batch::convert_dir(&converter, &input_dir, &output_dir, &spec, Some(tx));
            printer.join().map_err(|_| "output thread panicked")?;
            converter.close();

            let summary = summary?;
            output::print_batch_summary(&summary);
            if summary.failed > 0 {
                let total = summary.converted + summary.failed;
                return Err(format!("{} of {} images failed", summary.failed, total).into());
            }
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}

/// Load configuration and start logging with its level.
fn setup(path: Option<&Path>, verbose: bool) -> Result<ImprocConfig, config::ConfigError> {
    let config = config::load_config(path)?;
    init_logging(verbose, &config.logging.level);
    Ok(config)
}

/// Install the stderr log subscriber.
///
/// `RUST_LOG` wins; otherwise `--verbose` means `debug` and the configured
/// level applies.
fn init_logging(verbose: bool, configured: &str) {
    let fallback = if verbose { "debug" } else { configured };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Initialize the rayon thread pool based on processing config.
///
/// Caps at the number of available CPU cores.
fn init_thread_pool(processing: &config::ProcessingConfig) {
    let threads = config::effective_workers(processing);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .ok();
}

fn build_converter(config: &ImprocConfig) -> Result<Converter<RustHandle>, improc::pool::PoolError> {
    let capacity = config::effective_capacity(&config.pool);
    let pool = HandlePool::new(capacity, || Ok(RustHandle::new()))?;
    Ok(Converter::new(pool, config.convert_options()))
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(str::to_string)
}
