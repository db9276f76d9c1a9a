use anyhow::{Context, Result};
use console::style;

use crate::config::Config;
use crate::remote::{RemoteLister, SftpStore};
use crate::report::human_bytes;

/// Check mode: report what a pull would do, with no side effects at all.
pub async fn run_check(config: &Config) -> Result<()> {
    println!("{}", style(format!("connecting to {}...", config.remote.host)).blue());

    let store = SftpStore::connect(&config.remote)
        .await
        .with_context(|| format!("cannot connect to {}", config.remote.host))?;

    let lister = RemoteLister::new(
        &store,
        &config.remote.root_path,
        &config.library.staging_dir,
        config.remote.staleness(),
    );

    let surveys = lister.survey().await.context("remote listing failed")?;

    let mut ready_total = 0usize;
    for survey in &surveys {
        for file in &survey.ready {
            println!(
                "{} {}",
                style(format!(
                    "{} ({})",
                    file.file_name(),
                    human_bytes(file.size)
                ))
                .yellow(),
                style("ready to be pulled").blue()
            );
            ready_total += 1;
        }

        if survey.recording_in_progress {
            println!(
                "{}",
                style(format!(
                    "there are still files in {} being recorded",
                    survey.folder
                ))
                .blue()
            );
        }
    }

    println!(
        "{}",
        style(format!("finished checking: {ready_total} files ready")).green()
    );

    store.disconnect().await.ok();

    Ok(())
}
