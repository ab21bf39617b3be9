use crate::Target;
use crate::utils;
use colored::Colorize;
use lambdaflow_cloud::{Provisioner, ProvisionerOptions};
use lambdaflow_config::Project;

pub async fn handle(project: &Project, target: &Target, yes: bool) -> anyhow::Result<()> {
    let table = project.manifest.resources.table().ok_or_else(|| {
        anyhow::anyhow!("No table is declared in {}", project.manifest.path.display())
    })?;

    println!(
        "{}",
        format!("Wiping table {}...", table.name).blue().bold()
    );

    if !yes {
        println!();
        println!(
            "{}",
            format!(
                "Warning: every item in {} will be deleted. Sessions cannot be recovered.",
                table.name
            )
            .yellow()
        );
        println!("Pass --yes to confirm");
        return Err(anyhow::anyhow!("Refusing to wipe {} without --yes", table.name));
    }

    let plane = utils::connect(target).await?;
    let mut provisioner = Provisioner::with_options(&plane, ProvisionerOptions::default());
    let deleted = provisioner.wipe_table(table).await?;

    println!();
    println!(
        "{}",
        format!("✓ Deleted {} items from {}", deleted, table.name)
            .green()
            .bold()
    );

    Ok(())
}
