use std::fs;
use std::path::PathBuf;

use serde::Serialize;
use tera::{Context, Tera};

use crate::errors::Error;

/// Get the path to the prompts directory
fn prompts_dir() -> PathBuf {
    let manifest_dir = env!("CARGO_MANIFEST_DIR");
    PathBuf::from(manifest_dir).join("src").join("prompts")
}

/// Render an inline template against serializable context data
pub fn render_prompt<T: Serialize>(template: &str, context_data: &T) -> Result<String, Error> {
    let mut tera = Tera::default();
    tera.add_raw_template("inline_template", template)
        .map_err(|e| Error::Template(e.to_string()))?;
    let context =
        Context::from_serialize(context_data).map_err(|e| Error::Template(e.to_string()))?;
    tera.render("inline_template", &context)
        .map_err(|e| Error::Template(e.to_string()))
}

/// Render a template file, resolving bare names against the prompts
/// directory
pub fn render_prompt_file<T: Serialize>(
    template_file: impl Into<PathBuf>,
    context_data: &T,
) -> Result<String, Error> {
    let template_path = template_file.into();
    let file_path = if template_path.exists() {
        template_path
    } else {
        prompts_dir().join(template_path)
    };

    let template_content = fs::read_to_string(&file_path).map_err(|e| {
        Error::Template(format!(
            "failed to read template {}: {}",
            file_path.display(),
            e
        ))
    })?;
    render_prompt(&template_content, context_data)
}
