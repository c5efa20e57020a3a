use anyhow::Result;
use socketpm::service::SocketService;

pub fn run(tenant: &str, name: String) -> Result<()> {
    let service = SocketService::new(super::backend()?, None);
    service.delete(tenant, &name)?;
    println!("✓ Deleted socket {}", name);
    Ok(())
}
