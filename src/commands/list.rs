use anyhow::Result;
use socketpm::service::SocketService;

pub fn run(tenant: &str) -> Result<()> {
    let service = SocketService::new(super::backend()?, None);
    let sockets = service.list(tenant)?;

    if sockets.is_empty() {
        println!("No sockets installed.");
        println!();
        println!("Install one with: socketpm install <name> --bundle <file.zip>");
        return Ok(());
    }

    println!("Sockets:");
    for socket in &sockets {
        println!("  {} @ {} [{}]", socket.name, socket.version, socket.status);
    }
    println!();
    println!(
        "Total: {} socket{}",
        sockets.len(),
        if sockets.len() == 1 { "" } else { "s" }
    );

    Ok(())
}
