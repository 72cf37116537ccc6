// src/main.rs
use clap::Parser;
use domquery::document::{DocumentOps, HtmlDocument};
use domquery::plan::PlanSpec;
use domquery::storage::StorageManager;
use domquery::utils::{self, AppError};
use domquery::{ExecutionContext, Registries, Value};
use std::sync::Arc;

/// Command Line Interface for declarative document extraction
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Document to extract from: a local file path or an http(s) URL
    #[arg(short, long)]
    input: String,

    /// Path to the JSON extraction plan
    #[arg(short, long)]
    plan: String,

    /// Output directory for extracted records
    #[arg(short, long, default_value = "./output")]
    output_dir: String,

    /// Base name for the output files
    #[arg(short, long, default_value = "extraction")]
    name: String,

    /// Pretty-print the output JSON
    #[arg(long)]
    pretty: bool,
}

// The engine is strictly sequential, so a single-threaded runtime is all
// it needs.
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), AppError> {
    // 1. Setup Logging (reads RUST_LOG env var)
    utils::logging::setup_logging();

    // 2. Parse CLI Arguments
    let args = Args::parse();
    tracing::info!("Starting extraction for args: {:?}", args);

    // 3. Load and compile the extraction plan
    let plan_text = std::fs::read_to_string(&args.plan)?;
    let plan = PlanSpec::from_json(&plan_text)?;
    let registries = Registries::with_defaults();
    let compiled = plan.compile(&registries)?;

    // 4. Load and parse the document
    let body = domquery::source::load_document(&args.input).await?;
    tracing::info!("Loaded document ({} bytes)", body.len());
    let doc: Arc<dyn DocumentOps> = Arc::new(HtmlDocument::parse(&body));

    // 5. Initialize storage
    let storage = StorageManager::new(&args.output_dir)?;

    // 6. Run the plan
    let ctx = ExecutionContext::new(Arc::clone(&doc));
    let output = compiled.run(&ctx).await?;

    // 7. Render and save the results
    let mut rendered = serde_json::Map::new();
    let mut record_count = 0;

    if let Some(page) = &output.page {
        rendered.insert("page".to_string(), page.render(doc.as_ref()).await);
        record_count += 1;
    }
    if let Some(items) = &output.items {
        if let Value::List(rows) = items {
            record_count += rows.len();
            tracing::info!("Extracted {} record(s)", rows.len());
        }
        rendered.insert("items".to_string(), items.render(doc.as_ref()).await);
    }

    if record_count == 0 {
        tracing::warn!("Plan produced no records for {}", args.input);
    }

    let output_json = serde_json::Value::Object(rendered);
    match storage.save_output(&args.name, &output_json, args.pretty) {
        Ok(path) => tracing::info!("Saved records to: {}", path.display()),
        Err(e) => {
            tracing::error!("Failed to save records: {}", e);
            return Err(e.into());
        }
    }
    match storage.save_metadata(&args.name, &args.input, record_count) {
        Ok(path) => tracing::info!("Saved metadata to: {}", path.display()),
        Err(e) => tracing::error!("Failed to save metadata: {}", e),
    }

    tracing::info!("Extraction finished. Records: {}", record_count);
    Ok(())
}
