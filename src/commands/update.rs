use super::{finish, parse_config, read_source, submit};
use crate::{InstallArgs, SourceArgs};
use anyhow::Result;
use socketpm::models::InstallConfig;
use socketpm::service::UpdateRequest;

pub fn run(tenant: &str, name: String, source: SourceArgs, options: InstallArgs) -> Result<()> {
    let source = read_source(source.bundle.as_deref(), source.url.as_deref())?;
    match &source {
        Some(_) => println!("Updating socket {}...", name),
        None => println!("Re-fetching socket {} from its URL...", name),
    }

    let request = UpdateRequest {
        source,
        config: if options.config.is_empty() {
            None
        } else {
            Some(parse_config(&options.config)?)
        },
        zip_file_list: if options.file_list.is_empty() {
            None
        } else {
            Some(options.file_list)
        },
        install_config: Some(InstallConfig {
            class_nodelete: options.class_nodelete,
        }),
        environment: options.environment,
    };

    let socket = submit(tenant, options.defer, |service| service.update(tenant, &name, request))?;
    if options.defer {
        return Ok(());
    }
    finish(&socket)
}
