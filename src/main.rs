use anyhow::Result;
use clap::{Arg, ArgAction, Command};
use tracing::{info, warn};

mod catalog;
mod check;
mod config;
mod encoder;
mod filename;
mod grouping;
mod instagram;
mod pipeline;
mod pull;
mod remote;
mod report;
mod stats;
mod transfer;

use crate::config::Config;
use crate::report::Reporter;

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("recpipe")
        .version("0.1.0")
        .author("TigreRoll")
        .about("Personal media pipeline: pull, transcode, merge, catalog")
        .arg_required_else_help(true)
        .arg(
            Arg::new("pull")
                .short('p')
                .long("pull")
                .help("Pull files from the recording NAS")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("process")
                .long("process")
                .help("Transcode and merge staged videos, then catalog them")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("stats")
                .short('s')
                .long("stats")
                .help("Generate stats")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("full-stats")
                .long("full-stats")
                .help("Generate stats for every performer")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("check")
                .short('c')
                .long("check")
                .help("Check for files to pull without touching anything")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("instagram")
                .short('i')
                .long("instagram")
                .help("Link export posts to catalog entries")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("full")
                .short('f')
                .long("full")
                .help("Pull, process, and generate stats")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("page")
                .long("page")
                .value_name("NAME")
                .help("Page name used for urls and output folder names"),
        )
        .arg(
            Arg::new("count")
                .long("count")
                .value_name("NUM")
                .help("Limit how many export posts are linked"),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("DIR")
                .help("Output folder root"),
        )
        .arg(
            Arg::new("debug")
                .short('d')
                .long("debug")
                .help("Enable debug logging")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    let debug = matches.get_flag("debug");
    tracing_subscriber::fmt()
        .with_env_filter(if debug {
            "recpipe=debug,warn"
        } else {
            "recpipe=info,warn"
        })
        .init();

    let full = matches.get_flag("full");
    let do_pull = matches.get_flag("pull") || full;
    let do_process = matches.get_flag("process") || full;
    let full_stats = matches.get_flag("full-stats");
    let do_stats = matches.get_flag("stats") || full_stats || full;
    let do_check = matches.get_flag("check") || full;
    let do_instagram = matches.get_flag("instagram");

    let page = matches.get_one::<String>("page").cloned();
    let count: Option<usize> = matches
        .get_one::<String>("count")
        .and_then(|c| c.parse().ok());

    if !(do_pull || do_process || do_stats || do_check || do_instagram) {
        // clap prints help on --help; no selected mode is an error.
        anyhow::bail!("no mode selected, see --help");
    }

    let mut config = Config::load().unwrap_or_else(|e| {
        warn!("failed to load config, using defaults: {}", e);
        Config::default()
    });
    if let Some(output) = matches.get_one::<String>("output") {
        config.library.output_root = output.into();
    }
    config.validate()?;

    info!("{}", config.summary());

    let mut reporter = Reporter::new();

    if do_check && !do_pull {
        check::run_check(&config).await?;
    }

    if do_pull {
        pull::run_pull(&config, &mut reporter).await?;
    }

    if do_process {
        let page = page
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("page name is required for processing videos"))?;
        pipeline::run_process(&config, page, &mut reporter).await?;
    }

    if do_instagram {
        let page = page
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("page name is required for linking export posts"))?;
        instagram::run_link(&config, page, count, &mut reporter).await?;
    }

    if do_stats {
        stats::run_stats(&config, full_stats).await?;
    }

    Ok(())
}
