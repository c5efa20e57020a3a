use super::{finish, parse_config, read_source, submit};
use crate::{InstallArgs, SourceArgs};
use anyhow::Result;
use socketpm::models::InstallConfig;
use socketpm::service::InstallRequest;

pub fn run(tenant: &str, name: String, source: SourceArgs, options: InstallArgs) -> Result<()> {
    let source = read_source(source.bundle.as_deref(), source.url.as_deref())?
        .ok_or_else(|| anyhow::anyhow!("Either --bundle or --url is required"))?;

    println!("Installing socket {} into tenant {}...", name, tenant);

    let mut request = InstallRequest::new(name, source);
    request.config = parse_config(&options.config)?;
    if !options.file_list.is_empty() {
        request.zip_file_list = Some(options.file_list);
    }
    request.install_config = InstallConfig {
        class_nodelete: options.class_nodelete,
    };
    request.environment = options.environment;

    let socket = submit(tenant, options.defer, |service| service.install(tenant, request))?;
    if options.defer {
        return Ok(());
    }
    finish(&socket)
}
