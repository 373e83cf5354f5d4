mod consolidate;
mod enricher;
mod format;

pub use consolidate::{Band, ConsolidatedRating, Consolidator};
pub use enricher::Enricher;
pub use format::{apply_to_title, format_score, render_template};
