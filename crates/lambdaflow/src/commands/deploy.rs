use crate::Target;
use crate::utils;
use colored::Colorize;
use lambdaflow_cloud::{DeployOptions, LAYER_ARN_KEY, ProvisionerOptions, Workflow};
use lambdaflow_config::Project;

pub async fn handle(
    project: &mut Project,
    target: &Target,
    publish_layer: bool,
    allow_schema_drift: bool,
) -> anyhow::Result<()> {
    println!(
        "{}",
        format!("Deploying {}...", project.manifest.project)
            .blue()
            .bold()
    );
    utils::print_loaded_files(project);

    let options = DeployOptions {
        publish_layer,
        known_layer_arn: project
            .environment
            .get(LAYER_ARN_KEY)
            .filter(|arn| !arn.is_empty())
            .map(str::to_string),
        provisioner: ProvisionerOptions {
            allow_schema_drift,
            ..Default::default()
        },
    };

    let plane = utils::client(target).await?;
    let workflow = Workflow::new(&plane, &project.manifest.resources, options)?;
    println!();
    println!("{} {}", "Steps:".bold(), workflow.graph());

    // Packaging errors stop the run before the first remote call
    println!();
    println!("{}", "【Step 1/3】Packaging...".yellow());
    let artifacts = utils::build_artifacts(project, workflow.publishes_layer()).await?;

    println!();
    println!("{}", "【Step 2/3】Converging resources...".yellow());
    utils::authenticate(&plane).await?;
    let outcome = workflow.deploy(artifacts).await?;
    utils::print_actions(&outcome.result.actions);
    println!("  {}", outcome.result.summary().to_string().dimmed());

    println!();
    println!("{}", "【Step 3/3】Updating environment file...".yellow());
    let changed = project.environment.apply(outcome.environment_updates());
    let env_path = project.environment.path().display().to_string();
    if project.environment.persist()? {
        println!("  ✓ {} ({} keys updated)", env_path.cyan(), changed);
    } else {
        println!("  - {} (unchanged)", env_path);
    }

    println!();
    println!("{}", "✓ Deployment complete!".green().bold());
    if let Some(arn) = &outcome.function_arn {
        println!("  Function: {}", arn.cyan());
    }
    if let Some(arn) = &outcome.layer_arn {
        println!("  Layer:    {}", arn.cyan());
    }
    if let Some(url) = &outcome.function_url {
        println!("  URL:      {}", url.cyan().bold());
    }

    Ok(())
}
