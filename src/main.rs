use anyhow::Result;
use blueme_convert::{ConvertOptions, ProgressLogger, convert_folder};
use clap::Parser;
use log::{error, info};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// input directory, or XSPF playlist with --xspf
    source: PathBuf,

    /// existing output directory
    target: PathBuf,

    /// treat the source as an XSPF playlist
    #[arg(short = 'x', long)]
    xspf: bool,

    /// transcode MP3 sources too instead of copying them
    #[arg(short, long)]
    force: bool,

    /// bitrate of transcoded files in kbit/s
    #[arg(long, default_value_t = 320)]
    bitrate: u32,

    /// seconds after which a single ffmpeg or mp3gain run is killed
    #[arg(long, default_value_t = 600)]
    timeout: u64,

    /// ffmpeg executable
    #[arg(long, env = "BLUEME_FFMPEG", default_value = "ffmpeg")]
    ffmpeg: PathBuf,

    /// mp3gain executable
    #[arg(long, env = "BLUEME_MP3GAIN", default_value = "mp3gain")]
    mp3gain: PathBuf,

    /// skip loudness normalization
    #[arg(long)]
    no_normalize: bool,

    /// print the output names without writing anything
    #[arg(long)]
    dry_run: bool,
}

fn main() -> Result<()> {
    let logger = pretty_env_logger::formatted_builder()
        .filter_level(log::LevelFilter::Info)
        .format_timestamp_secs()
        .parse_filters("lofty=warn")
        .parse_default_env()
        .build();
    let max_level = logger.filter();
    if log::set_logger(Box::leak(Box::new(ProgressLogger(logger)))).is_ok() {
        log::set_max_level(max_level);
    }

    let cli = Cli::parse();

    let options = ConvertOptions {
        source: cli.source,
        target: cli.target,
        playlist: cli.xspf,
        force: cli.force,
        normalize: !cli.no_normalize,
        dry_run: cli.dry_run,
        bitrate_kbps: cli.bitrate,
        timeout: Duration::from_secs(cli.timeout),
        ffmpeg: cli.ffmpeg,
        mp3gain: cli.mp3gain,
        ..Default::default()
    };

    info!("Starting conversion with options:");
    if options.playlist {
        info!("  Playlist: {:?}", options.source);
    } else {
        info!("  Input Directory: {:?}", options.source);
    }
    info!("  Output Directory: {:?}", options.target);
    info!("  Bitrate: {} kbit/s", options.bitrate_kbps);
    info!(
        "  Normalize: {}",
        if options.normalize { "yes" } else { "no" }
    );
    if options.force {
        info!("  Transcoding MP3 sources too");
    }
    if options.dry_run {
        info!("  Dry run, nothing will be written");
    }
    info!("---");

    match convert_folder(&options) {
        Ok(summary) if summary.failed == 0 => {
            info!("Conversion finished successfully!");
            Ok(())
        }
        Ok(summary) => {
            error!("{} of {} tracks had errors.", summary.failed, summary.total);
            Ok(())
        }
        Err(e) => {
            error!("Conversion failed: {}", e);
            Err(e)?
        }
    }
}
