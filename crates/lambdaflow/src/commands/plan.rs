use crate::Target;
use crate::utils;
use colored::Colorize;
use lambdaflow_cloud::{DeployOptions, LAYER_ARN_KEY, ProvisionerOptions, Workflow};
use lambdaflow_config::Project;

pub async fn handle(project: &Project, target: &Target, allow_schema_drift: bool) -> anyhow::Result<()> {
    println!(
        "{}",
        format!("Planning {}...", project.manifest.project).blue().bold()
    );
    utils::print_loaded_files(project);

    let plane = utils::connect(target).await?;
    let options = DeployOptions {
        publish_layer: false,
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
    let workflow = Workflow::new(&plane, &project.manifest.resources, options)?;
    let plan = workflow.plan().await?;

    println!();
    println!("{}", "Planned actions:".bold());
    utils::print_actions(&plan.actions);
    println!();
    if plan.has_changes {
        println!("{}", plan.summary().to_string().yellow());
        println!("Run {} to apply", "lflow deploy".cyan());
    } else {
        println!("{}", "✓ Everything is up to date".green());
    }

    Ok(())
}
