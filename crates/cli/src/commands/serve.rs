//! `cmp serve`: Start the HTTP gateway.

use std::path::Path;

pub async fn run(root: &Path, port_override: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = super::load_config(root)?;
    if let Some(port) = port_override {
        config.server.port = port;
    }

    println!("CMP gateway");
    println!("   Root:      {}", config.project_root.display());
    println!("   Listening: {}:{}", config.server.host, config.server.port);
    println!("   PI enforcement:   {}", config.security.pi_enforcement);
    println!("   Require citation: {}", config.security.require_citation);

    cmp_gateway::start(config).await
}
