use std::path::Path;

use anyhow::{Context, Result};
use tokio::fs;

/// Read a models file: one model per line, blank lines and `#` comments skipped
pub async fn read_models_file(path: &Path) -> Result<Vec<String>> {
    let text = fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read models file {}", path.display()))?;
    Ok(parse_models(&text))
}

pub fn parse_models(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Last path component of a model identifier, used to name its result file
pub fn model_base_name(model: &str) -> String {
    Path::new(model)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| model.to_string())
}
