use crate::utils;
use colored::Colorize;
use lambdaflow_config::Project;
use std::fs;
use std::path::Path;

pub async fn handle(project: &Project, out: &Path, with_layer: bool) -> anyhow::Result<()> {
    println!(
        "{}",
        format!("Packaging {}...", project.manifest.project).blue().bold()
    );

    let artifacts = utils::build_artifacts(project, with_layer).await?;
    if artifacts.function.is_none() && artifacts.layer.is_none() {
        println!("{}", "Nothing to package: no function or layer declared".yellow());
        return Ok(());
    }

    fs::create_dir_all(out)?;
    println!();
    for artifact in [&artifacts.function, &artifacts.layer].into_iter().flatten() {
        let path = out.join(&artifact.name);
        fs::write(&path, &artifact.bytes)?;
        tracing::info!(path = %path.display(), bytes = artifact.len(), "Archive written");
        println!("  ✓ {}", path.display().to_string().cyan());
    }

    Ok(())
}
