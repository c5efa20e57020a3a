use super::{finish, parse_config, submit};
use anyhow::Result;

pub fn run(tenant: &str, name: String, values: Vec<String>, defer: bool) -> Result<()> {
    let config = parse_config(&values)?;
    println!("Setting {} config variable(s) on {}...", config.len(), name);

    let socket = submit(tenant, defer, |service| service.set_config(tenant, &name, config))?;
    if defer {
        return Ok(());
    }
    finish(&socket)
}
