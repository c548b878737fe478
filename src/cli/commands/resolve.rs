use anyhow::{bail, Result};

use super::open_store;
use crate::cli::ResolveArgs;
use crate::proxy::ProxyError;
use crate::registry::DEFAULT_ENTRYPOINT;
use crate::resolver::{BindingResolver, Resolution};

pub async fn execute_resolve(registry: Option<&std::path::Path>, args: ResolveArgs) -> Result<()> {
    let resolver = BindingResolver::new(open_store(registry)?);

    match resolver
        .resolve(&args.worker, args.entrypoint.as_deref())
        .await?
    {
        Resolution::Found(target) => {
            println!("{}", target.base_url());
            Ok(())
        }
        Resolution::NotFound => bail!(
            "{}",
            ProxyError::ServiceNotFound {
                service: args.worker,
                entrypoint: args
                    .entrypoint
                    .unwrap_or_else(|| DEFAULT_ENTRYPOINT.to_string()),
            }
        ),
    }
}
