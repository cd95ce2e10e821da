use anyhow::Context;
use ocapn_types::config::default_config_path;
use ocapn_types::ClientConfig;
use std::path::Path;

pub fn cmd_config_show(config: &ClientConfig, path: Option<&Path>) -> anyhow::Result<()> {
    let path = path
        .map(Path::to_path_buf)
        .unwrap_or_else(default_config_path);
    let rendered = toml::to_string_pretty(config).context("Failed to render configuration")?;

    if path.exists() {
        println!("# {}\n", path.display());
    } else {
        println!("# {} (not found, defaults)\n", path.display());
    }
    println!("{rendered}");
    Ok(())
}
