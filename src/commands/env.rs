use crate::EnvAction;
use anyhow::Result;
use socketpm::environment::EnvironmentService;
use socketpm::models::EnvironmentStatus;
use std::path::Path;

pub fn run(tenant: &str, action: EnvAction) -> Result<()> {
    let environments = EnvironmentService::new(super::backend()?);

    match action {
        EnvAction::Add {
            name,
            archive,
            description,
            checksum,
        } => {
            let added = environments.add(tenant, &name, &description, Path::new(&archive), checksum.as_deref())?;
            println!("  Checksum: {}", added.checksum.unwrap_or_default());

            let processed = environments.process(tenant, &name)?;
            match processed.status {
                EnvironmentStatus::Ok => println!("✓ Environment {} is ready", name),
                _ => {
                    let reason = processed.status_info.map(|i| i.error).unwrap_or_default();
                    anyhow::bail!("Environment {} failed: {}", name, reason);
                }
            }
        }
        EnvAction::List => {
            let all = environments.list(tenant)?;
            if all.is_empty() {
                println!("No environments.");
            }
            for environment in all {
                println!("  {} [{:?}]", environment.name, environment.status);
            }
        }
        EnvAction::Delete { name } => {
            environments.delete(tenant, &name)?;
            println!("✓ Deleted environment {}", name);
        }
    }
    Ok(())
}
