use std::path::Path;

use anyhow::{Context, Result};
use sheetbatch_eval::{ComputeBackend, Engine, RunStats};
use tracing::info;

/// Load `src`, evaluate every formula and save the workbook with its
/// results to `dst`.
pub fn run_file<B: ComputeBackend>(
    engine: &mut Engine<B>,
    src: impl AsRef<Path>,
    dst: impl AsRef<Path>,
) -> Result<RunStats> {
    let (src, dst) = (src.as_ref(), dst.as_ref());
    let input = sheetbatch_workbook::load_workbook(src)
        .with_context(|| format!("loading {}", src.display()))?;
    let output = engine
        .run(&input)
        .with_context(|| format!("computing {}", src.display()))?;
    sheetbatch_workbook::save_workbook(dst, &input, &output)
        .with_context(|| format!("saving {}", dst.display()))?;

    let stats = output.stats;
    info!(
        src = %src.display(),
        dst = %dst.display(),
        formulas = stats.formulas,
        levels = stats.levels,
        groups = stats.groups,
        backend_calls = stats.backend_calls,
        elapsed_ms = stats.elapsed.as_millis() as u64,
        "file computed"
    );
    Ok(stats)
}
