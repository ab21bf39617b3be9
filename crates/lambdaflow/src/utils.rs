use crate::Target;
use colored::Colorize;
use lambdaflow_build::{BuildError, BuildProgress, Packager};
use lambdaflow_cloud::{Action, ActionType, Artifacts, CloudError, ControlPlane, PackageArtifact};
use lambdaflow_cloud_aws::AwsControlPlane;
use lambdaflow_config::Project;

/// Message printed after `Error:`. Packaging errors carry a fix hint.
pub fn describe_error(error: &anyhow::Error) -> String {
    match error.downcast_ref::<BuildError>() {
        Some(build_error) => build_error.user_message(),
        None => format!("{:#}", error),
    }
}

/// Print the manifest and environment file in use
pub fn print_loaded_files(project: &Project) {
    println!("📄 Loaded files:");
    println!(
        "  • {}",
        project.manifest.path.display().to_string().cyan()
    );
    let env_path = project.environment.path();
    if env_path.exists() {
        println!("  • {} (environment)", env_path.display().to_string().cyan());
    } else {
        println!(
            "  • {} (environment, created on first deploy)",
            env_path.display().to_string().dimmed()
        );
    }
}

/// AWS client for the resolved region and profile. No request is sent yet.
pub async fn client(target: &Target) -> anyhow::Result<AwsControlPlane> {
    let plane =
        AwsControlPlane::connect(target.region.as_deref(), target.profile.as_deref()).await?;
    Ok(plane)
}

/// Make sure the credentials work before changing anything
pub async fn authenticate(plane: &AwsControlPlane) -> anyhow::Result<()> {
    println!("{}", "Connecting to AWS...".blue());
    let auth = plane.check_auth().await?;
    if !auth.authenticated {
        let reason = auth.error.unwrap_or_else(|| "unknown error".to_string());
        return Err(anyhow::Error::new(CloudError::AuthenticationFailed(reason)).context(
            "AWS credentials are not usable (configure them with aws configure, AWS_PROFILE or --profile)",
        ));
    }
    println!(
        "  ✓ {}",
        auth.account_info
            .unwrap_or_else(|| plane.region().to_string())
            .green()
    );
    Ok(())
}

/// Connect and authenticate
pub async fn connect(target: &Target) -> anyhow::Result<AwsControlPlane> {
    let plane = client(target).await?;
    authenticate(&plane).await?;
    Ok(plane)
}

/// Build the archives a run uploads. The function archive is built whenever
/// a function is declared; the layer archive only when `with_layer` is set.
pub async fn build_artifacts(project: &Project, with_layer: bool) -> anyhow::Result<Artifacts> {
    let function = build_function(project)?;
    let layer = if with_layer {
        build_layer(project).await?
    } else {
        None
    };
    Ok(Artifacts { function, layer })
}

pub fn build_function(project: &Project) -> anyhow::Result<Option<PackageArtifact>> {
    let Some(package) = &project.manifest.function_package else {
        return Ok(None);
    };

    let packager = Packager::new(&project.manifest.root);
    let progress = BuildProgress::new("Packaging function sources...");
    match packager.function(package) {
        Ok(artifact) => {
            progress.finish_success(&describe_artifact(&artifact));
            Ok(Some(artifact))
        }
        Err(e) => {
            progress.finish_error(&e.to_string());
            Err(e.into())
        }
    }
}

pub async fn build_layer(project: &Project) -> anyhow::Result<Option<PackageArtifact>> {
    let Some(package) = &project.manifest.layer_package else {
        return Ok(None);
    };

    let packager = Packager::new(&project.manifest.root);
    let progress = BuildProgress::new(&format!(
        "Installing dependencies from {}...",
        package.requirements.display()
    ));
    match packager.layer(package).await {
        Ok(artifact) => {
            progress.finish_success(&describe_artifact(&artifact));
            Ok(Some(artifact))
        }
        Err(e) => {
            progress.finish_error(&e.to_string());
            Err(e.into())
        }
    }
}

/// One line per action
pub fn print_actions(actions: &[Action]) {
    for action in actions {
        let marker = match action.action_type {
            ActionType::Create => "+".green(),
            ActionType::Update => "~".yellow(),
            ActionType::NoOp => "=".dimmed(),
        };
        println!(
            "  {} {} {}: {}",
            marker,
            action.resource_kind,
            action.resource_id.cyan(),
            action.description
        );
    }
}

pub fn describe_artifact(artifact: &PackageArtifact) -> String {
    format!(
        "{} ({} files, {})",
        artifact.name,
        artifact.entries.len(),
        human_size(artifact.len())
    )
}

fn human_size(bytes: usize) -> String {
    const KB: f64 = 1024.0;
    let bytes = bytes as f64;
    if bytes >= KB * KB {
        format!("{:.1} MB", bytes / (KB * KB))
    } else if bytes >= KB {
        format!("{:.1} KB", bytes / KB)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_human_size() {
        assert_eq!(human_size(512), "512 B");
        assert_eq!(human_size(2048), "2.0 KB");
        assert_eq!(human_size(3 * 1024 * 1024 + 512 * 1024), "3.5 MB");
    }

    #[test]
    fn test_build_error_gets_hint() {
        let error = anyhow::Error::new(BuildError::NoMatch("app/*.py".to_string()));
        let message = describe_error(&error);
        assert!(message.contains("app/*.py"));
        assert!(message.contains("Fix:"));
    }
}
