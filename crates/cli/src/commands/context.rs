//! `cmp context show`: Resolve a Context and print it.

use cmp_context::ContextResolver;
use std::path::Path;

pub async fn show(root: &Path, tenant: &str, name: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config(root)?;
    let resolver = ContextResolver::new(config.project_root);
    let ctx = resolver.resolve(tenant, name).await?;

    println!("# {} {} ({})", ctx.name, ctx.version, ctx.content_sha()?);
    println!("{}", serde_json::to_string_pretty(&*ctx)?);
    Ok(())
}
