use crate::Target;
use crate::utils;
use colored::Colorize;
use lambdaflow_cloud::{LAYER_ARN_KEY, Provisioner, ProvisionerOptions};
use lambdaflow_config::Project;

pub async fn handle(project: &mut Project, target: &Target) -> anyhow::Result<()> {
    let layer = project.manifest.resources.layer().ok_or_else(|| {
        anyhow::anyhow!("No layer is declared in {}", project.manifest.path.display())
    })?;
    println!("{}", format!("Publishing layer {}...", layer.name).blue().bold());

    let artifact = utils::build_layer(project)
        .await?
        .ok_or_else(|| anyhow::anyhow!("Layer {} has no dependency package", layer.name))?;

    let plane = utils::connect(target).await?;
    let mut provisioner = Provisioner::with_options(&plane, ProvisionerOptions::default());
    let arn = provisioner.publish_layer(layer, artifact).await?;
    let layer_name = layer.name.clone();

    if let Some(previous) = project.environment.get(LAYER_ARN_KEY) {
        println!("  Previous: {}", previous.dimmed());
    }
    project.environment.set(LAYER_ARN_KEY, arn.as_str());
    project.environment.persist()?;

    println!();
    println!("{}", format!("✓ Published {}", layer_name).green().bold());
    println!("  {}", arn.cyan());
    println!("Run {} to attach it to the function", "lflow deploy".cyan());

    Ok(())
}
