use colored::Colorize;
use lambdaflow_cloud::{LAYER_ARN_KEY, LAMBDA_URL_KEY, ResourceSpec, StepGraph};
use lambdaflow_config::Project;

pub fn handle(project: &Project) -> anyhow::Result<()> {
    println!("{}", "Validating manifest...".blue());
    println!(
        "Manifest: {}",
        project.manifest.path.display().to_string().cyan()
    );

    let manifest = &project.manifest;
    manifest.resources.validate()?;
    let graph = StepGraph::for_resources(&manifest.resources)?;

    println!("{}", "✓ Manifest is valid!".green().bold());
    println!();
    println!("Summary:");
    println!("  Project: {}", manifest.project.cyan());
    println!(
        "  Region:  {}",
        project
            .region(None)
            .unwrap_or("(from the AWS configuration)")
    );
    println!("  Resources: {}", manifest.resources.len());
    for resource in manifest.resources.iter() {
        println!("    - {} {}", resource.kind(), describe(resource).cyan());
    }

    if let Some(package) = &manifest.function_package {
        println!("  Sources: {}", package.sources.join(", "));
        if let Some(launcher) = &package.launcher {
            println!(
                "  Launcher: {} on port {} ({} workers)",
                launcher.app, launcher.port, launcher.workers
            );
        }
    }
    if let Some(package) = &manifest.layer_package {
        println!("  Requirements: {}", package.requirements.display());
    }

    println!();
    println!("{} {}", "Steps:".bold(), graph);

    println!();
    println!(
        "Environment: {}",
        project.environment.path().display().to_string().cyan()
    );
    for key in [LAYER_ARN_KEY, LAMBDA_URL_KEY] {
        let value = project
            .environment
            .get(key)
            .filter(|v| !v.is_empty())
            .unwrap_or("(not deployed yet)");
        println!("  {}: {}", key, value);
    }

    Ok(())
}

fn describe(resource: &ResourceSpec) -> String {
    match resource {
        ResourceSpec::Role(role) => role.name.clone(),
        ResourceSpec::Table(table) => format!("{} ({})", table.name, table.key_schema),
        ResourceSpec::Layer(layer) => format!(
            "{} ({})",
            layer.name,
            layer.compatible_runtimes.join(", ")
        ),
        ResourceSpec::Function(function) => format!(
            "{} ({}, {}s, {} MB)",
            function.name, function.runtime, function.timeout_secs, function.memory_mb
        ),
        ResourceSpec::UrlConfig { function, spec } => {
            format!("{} ({})", function, spec.invoke_mode.as_str())
        }
    }
}
