mod fetch;
mod list;
mod resolve;
mod serve;
mod tail;

pub use fetch::execute_fetch;
pub use list::execute_list;
pub use resolve::execute_resolve;
pub use serve::execute_serve;
pub use tail::execute_tail;

use std::path::Path;

use anyhow::Result;

use crate::proxy::ProxyClient;
use crate::registry::RegistryStore;
use crate::resolver::BindingResolver;

/// Registry at `dir`, or the default location.
pub(crate) fn open_store(dir: Option<&Path>) -> Result<RegistryStore> {
    match dir {
        Some(dir) => Ok(RegistryStore::new(dir)),
        None => Ok(RegistryStore::from_env()?),
    }
}

pub(crate) fn proxy_stack(store: RegistryStore) -> Result<(BindingResolver, ProxyClient)> {
    let client = ProxyClient::new()?;
    Ok((BindingResolver::new(store), client))
}
