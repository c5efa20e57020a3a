use super::print_status;
use anyhow::Result;
use socketpm::importer::format_size;
use socketpm::service::SocketService;

pub fn run(tenant: &str, name: String) -> Result<()> {
    let backend = super::backend()?;
    let manifest_name = backend.config.limits.manifest_name.clone();
    let socket = SocketService::new(backend, None).get(tenant, &name)?;

    print_status(&socket);
    println!();
    println!("  Version: {}", socket.version);
    if !socket.description.is_empty() {
        println!("  Description: {}", socket.description);
    }
    if let Some(url) = &socket.install_url {
        println!("  URL: {}", url);
    }
    if let Some(environment) = &socket.environment {
        println!("  Environment: {}", environment);
    }
    println!("  Size: {}", format_size(socket.size));
    if let Some(checksum) = &socket.checksum {
        println!("  Checksum: {}", checksum);
    }

    let files = socket.files(&manifest_name);
    if !files.is_empty() {
        println!();
        println!("Files:");
        for (location, path) in &files {
            println!("  {} -> {}", path, location);
        }
    }

    if !socket.config.is_empty() {
        println!();
        println!("Config:");
        println!("{}", serde_json::to_string_pretty(&socket.config)?);
    }

    if !socket.installed.is_empty() {
        println!();
        println!("Installed:");
        println!("{}", serde_json::to_string_pretty(&socket.installed)?);
    }

    Ok(())
}
