//! Converts barcoded single-cell ATAC alignments into a deduplicated fragment file.

use anyhow::Result;
use env_logger::Env;

mod app;
pub mod barcode;
mod header;
pub mod fragment;
pub mod io;
pub mod knee;
pub mod metrics;

use app::App;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let mut app = App::new();
    app.run().await?;

    Ok(())
}
