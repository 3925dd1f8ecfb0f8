use anyhow::{anyhow, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use cctv_review::{
    Config, FileCandidate, HttpAnalysisService, ImageCanvas, RenderOutcome, ReviewSession,
    SubmitOutcome,
};

fn frame_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("output-dir")
                .short('o')
                .long("output-dir")
                .value_name("DIR")
                .help("Directory for rendered frames and chart data"),
        )
        .arg(
            Arg::new("frame")
                .short('f')
                .long("frame")
                .value_name("N")
                .help("Frame to render (1-based)")
                .value_parser(value_parser!(u64).range(1..))
                .conflicts_with("all-frames"),
        )
        .arg(
            Arg::new("all-frames")
                .long("all-frames")
                .help("Render every frame")
                .action(ArgAction::SetTrue),
        )
}

fn cli() -> Command {
    Command::new("CCTV Review")
        .version("0.1.0")
        .author("TigreRoll")
        .about("Upload CCTV footage for vehicle analysis and review the detections")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file")
                .global(true),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable verbose logging")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .subcommand(frame_args(
            Command::new("analyze")
                .about("Upload a video to the analysis service and render the result")
                .arg(
                    Arg::new("video")
                        .value_name("VIDEO")
                        .help("MP4, MOV or AVI file")
                        .required(true),
                )
                .arg(
                    Arg::new("endpoint")
                        .short('e')
                        .long("endpoint")
                        .value_name("URL")
                        .help("Analysis service endpoint"),
                )
                .arg(
                    Arg::new("media-type")
                        .long("media-type")
                        .value_name("TYPE")
                        .help("Declared media type, overriding the extension"),
                )
                .arg(
                    Arg::new("save-response")
                        .long("save-response")
                        .help("Keep the analysis response as response.json")
                        .action(ArgAction::SetTrue),
                ),
        ))
        .subcommand(frame_args(
            Command::new("render")
                .about("Render frames from a saved analysis response")
                .arg(
                    Arg::new("response")
                        .value_name("RESPONSE_JSON")
                        .required(true),
                ),
        ))
        .subcommand(
            Command::new("review")
                .about("Step through a saved analysis response interactively")
                .arg(
                    Arg::new("response")
                        .value_name("RESPONSE_JSON")
                        .required(true),
                )
                .arg(
                    Arg::new("output-dir")
                        .short('o')
                        .long("output-dir")
                        .value_name("DIR")
                        .help("Directory receiving current_frame.png"),
                ),
        )
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();

    let config = match matches.get_one::<String>("config") {
        Some(path) => Config::from_file(Path::new(path))?,
        None => Config::load()?,
    };

    // Initialize logging
    let level = if matches.get_flag("verbose") {
        "debug"
    } else {
        config.output.log_level.as_str()
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("cctv_review={},warn", level))),
        )
        .init();

    config.validate()?;
    tracing::debug!("{}", config.summary());

    match matches.subcommand() {
        Some(("analyze", args)) => analyze(config, args).await,
        Some(("render", args)) => render(config, args).await,
        Some(("review", args)) => review(config, args).await,
        _ => Err(anyhow!("Unknown command")),
    }
}

fn output_dir(config: &Config, args: &ArgMatches) -> PathBuf {
    args.get_one::<String>("output-dir")
        .map(PathBuf::from)
        .unwrap_or_else(|| config.output.base_dir.clone())
}

fn required_path(args: &ArgMatches, name: &str) -> Result<PathBuf> {
    args.get_one::<String>(name)
        .map(PathBuf::from)
        .ok_or_else(|| anyhow!("Missing argument: {}", name))
}

fn new_review(config: &Config) -> Result<ReviewSession> {
    let service = HttpAnalysisService::new(&config.service, config.upload.chunk_size)?;
    Ok(ReviewSession::new(config, Box::new(service)))
}

async fn analyze(mut config: Config, args: &ArgMatches) -> Result<()> {
    if let Some(endpoint) = args.get_one::<String>("endpoint") {
        config.service.endpoint = endpoint.clone();
        config.validate()?;
    }

    let video = required_path(args, "video")?;
    let output_dir = output_dir(&config, args);
    let mut review = new_review(&config)?;

    let mut candidate = FileCandidate::from_path(&video).await?;
    if let Some(media_type) = args.get_one::<String>("media-type") {
        candidate = candidate.with_media_type(media_type.clone());
    }
    if let Err(e) = review.select_file(candidate) {
        return Err(anyhow!("{}", e));
    }

    let cancel = review.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling upload");
            cancel.cancel();
        }
    });

    info!("🚀 Submitting {} to {}", video.display(), config.service.endpoint);
    let start_time = std::time::Instant::now();

    match review.submit().await {
        SubmitOutcome::Ready {
            frames,
            total_vehicles,
        } => {
            info!(
                "🎉 Analysis completed in {:.1}s: {} frames, {} vehicles",
                start_time.elapsed().as_secs_f64(),
                frames,
                total_vehicles
            );
        }
        SubmitOutcome::Failed(e) => {
            error!("Analysis failed: {}", e);
            let banner = review.error_banner().unwrap_or_else(|| e.user_message().to_string());
            return Err(anyhow!(banner));
        }
        SubmitOutcome::NoSelection | SubmitOutcome::Busy(_) => {
            return Err(anyhow!("Nothing was submitted"));
        }
    }

    tokio::fs::create_dir_all(&output_dir).await?;
    if args.get_flag("save-response") {
        if let Some(result) = review.result() {
            let path = output_dir.join("response.json");
            tokio::fs::write(&path, serde_json::to_vec_pretty(result)?).await?;
            info!("💾 Saved analysis response to {}", path.display());
        }
    }

    write_review_output(&mut review, &config, args, &output_dir).await
}

async fn render(config: Config, args: &ArgMatches) -> Result<()> {
    let response = required_path(args, "response")?;
    let output_dir = output_dir(&config, args);

    let mut review = new_review(&config)?;
    review.load_response(&tokio::fs::read(&response).await?)?;

    write_review_output(&mut review, &config, args, &output_dir).await
}

async fn write_review_output(
    review: &mut ReviewSession,
    config: &Config,
    args: &ArgMatches,
    output_dir: &Path,
) -> Result<()> {
    tokio::fs::create_dir_all(output_dir).await?;

    if let Some(message) = review.result().and_then(|r| r.message.clone()) {
        info!("ℹ️  {}", message);
    }

    let frames: Vec<usize> = if args.get_flag("all-frames") {
        (0..review.navigator().frame_count()).collect()
    } else {
        let requested = args.get_one::<u64>("frame").copied().unwrap_or(1);
        vec![usize::try_from(requested - 1)?]
    };

    let mut canvas = ImageCanvas::from_config(&config.render);
    for index in frames {
        let Some(index) = review.go_to_frame(index) else {
            info!("No frames to render");
            break;
        };

        let path = output_dir.join(format!("frame_{:04}.png", index + 1));
        match review.render_current(&mut canvas).await {
            Some(RenderOutcome::Drawn { boxes, .. }) => {
                canvas.save_png(&path)?;
                info!("🖼️  Rendered frame {} with {} boxes to {}", index + 1, boxes, path.display());
            }
            Some(RenderOutcome::Unavailable { reason, .. }) => {
                canvas.save_png(&path)?;
                warn!("Frame {} unavailable: {}", index + 1, reason);
            }
            Some(RenderOutcome::Stale { .. }) | None => {}
        }
    }

    if let Some(chart) = review.chart() {
        let chart_path = output_dir.join("chart.json");
        tokio::fs::write(&chart_path, serde_json::to_vec_pretty(chart)?).await?;
        println!("{}", review.total_vehicles_text().unwrap_or_default());
        println!("{}", chart.render_text(40));
    }

    Ok(())
}

/// Zero-based index of a 1-based frame number typed by the user
fn frame_index(number: &str) -> Option<usize> {
    number.parse::<usize>().ok()?.checked_sub(1)
}

async fn redraw(review: &ReviewSession, canvas: &mut ImageCanvas, path: &Path) -> Result<()> {
    match review.render_current(canvas).await {
        Some(RenderOutcome::Drawn { .. }) | Some(RenderOutcome::Unavailable { .. }) => {
            canvas.save_png(path)?;
            if let Some(caption) = review.frame_caption() {
                println!("{} -> {}", caption, path.display());
            }
        }
        Some(RenderOutcome::Stale { .. }) => {}
        None => println!("No frames to show"),
    }
    Ok(())
}

async fn review(config: Config, args: &ArgMatches) -> Result<()> {
    let response = required_path(args, "response")?;
    let output_dir = output_dir(&config, args);
    tokio::fs::create_dir_all(&output_dir).await?;

    let mut review = new_review(&config)?;
    review.load_response(&tokio::fs::read(&response).await?)?;

    let path = output_dir.join("current_frame.png");
    let mut canvas = ImageCanvas::from_config(&config.render);
    redraw(&review, &mut canvas, &path).await?;
    println!("Commands: next, prev, goto <n>, chart, quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let mut words = line.split_whitespace();
        let moved = match words.next() {
            Some("n") | Some("next") => review.next_frame(),
            Some("p") | Some("prev") | Some("previous") => review.previous_frame(),
            Some("g") | Some("goto") => match words.next().and_then(frame_index) {
                Some(index) => review.go_to_frame(index).is_some(),
                None => {
                    println!("Usage: goto <frame number>");
                    false
                }
            },
            Some("c") | Some("chart") => {
                if let Some(chart) = review.chart() {
                    println!("{}", review.total_vehicles_text().unwrap_or_default());
                    println!("{}", chart.render_text(40));
                }
                false
            }
            Some("q") | Some("quit") | Some("exit") => break,
            Some(other) => {
                println!("Unknown command: {}", other);
                false
            }
            None => false,
        };

        if moved {
            redraw(&review, &mut canvas, &path).await?;
        }
    }

    Ok(())
}
