//! Writes the OpenAPI document of the Tonality API.
//!
//! Usage: `openapi [OUTPUT]` (defaults to `openapi.json`).

use tonality_api::router::ApiDoc;
use utoipa::OpenApi;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "openapi.json".to_string());
    std::fs::write(&path, ApiDoc::openapi().to_pretty_json()?)?;
    println!("OpenAPI document written to {path}");
    Ok(())
}
