//! rarexsec-catalogue library interface
//!
//! Builds the per-sample catalogue from a recipe: merge, identifier extraction,
//! store reconciliation, prescale correction and period-level EXT scaling.

pub mod cli;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod workflow;

pub use crate::error::{CatalogueError, CatalogueResult};

use rarexsec_common::catalogue::Catalogue;
use rarexsec_common::config::Settings;
use rarexsec_common::recipe::Recipe;
use std::path::Path;

/// Load the recipe, run the pipeline and write the catalogue file
///
/// Returns the written catalogue. Recipe validation errors abort before any sample is
/// touched.
pub async fn build_catalogue(settings: &Settings, recipe_path: &Path, dry_run: bool) -> CatalogueResult<Catalogue> {
    let recipe = Recipe::load(recipe_path)?;
    tracing::info!(
        recipe = %recipe_path.display(),
        beamlines = recipe.beamlines.len(),
        "Loaded recipe"
    );

    std::fs::create_dir_all(&recipe.ntuple_base_directory)?;

    let pipeline = workflow::build_pipeline(settings, recipe.ntuple_base_directory.clone(), dry_run)?;
    let (catalogue, _summary) = pipeline.run(&recipe).await;

    let out_path = settings.catalogue_path();
    catalogue.write_to(&out_path)?;
    tracing::info!(path = %out_path.display(), "Wrote catalogue");

    Ok(catalogue)
}
