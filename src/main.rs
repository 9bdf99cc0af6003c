//! # Phylofactor: Phylogenetic Factorization of Compositional Data
//!
//! ## Usage
//! ```bash
//! # Factor until candidate p-values look uniform
//! phylofactor --data otus.tsv --tree tree.nwk --covariate ph.tsv --out factors.json
//!
//! # Exactly five factors, F-statistic objective, with timing output
//! phylofactor --data otus.tsv --tree tree.nwk --covariate ph.tsv --out factors.json \
//!     --nfactors 5 --choice F --profile
//! ```

use std::time::Instant;

use anyhow::Context;

use phylofactor::config::Config;
use phylofactor::io;
use phylofactor::pipelines::{FactorizationInput, FactorizationLoop};
use phylofactor::utils::telemetry::{HeartbeatConfig, HeartbeatHandle, Stage, TelemetryBlackboard};
use phylofactor::utils::threading::WorkerPool;

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

/// Initialize tracing subscriber for hierarchical profiling output
fn init_profiling() {
    use tracing_subscriber::fmt::format::FmtSpan;
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_span_events(FmtSpan::CLOSE)
                .with_target(false)
                .with_timer(fmt::time::uptime()),
        )
        .init();
}

fn run() -> anyhow::Result<()> {
    let start = Instant::now();

    let config = Config::parse_and_validate()?;
    let params = config.params()?;

    if config.profile {
        init_profiling();
        eprintln!("=== Profiling enabled ===\n");
    }

    eprintln!("phylofactor v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("Threads: {}", config.nthreads());

    let telemetry = TelemetryBlackboard::new();
    let heartbeat = if config.progress {
        Some(HeartbeatHandle::spawn(telemetry.clone(), HeartbeatConfig::default())?)
    } else {
        None
    };

    telemetry.set_stage(Stage::LoadingData);
    let data = io::read_data_table(&config.data)
        .with_context(|| format!("reading data table {}", config.data.display()))?;
    let tree = io::read_tree(&config.tree)
        .with_context(|| format!("reading tree {}", config.tree.display()))?;
    let covariate = io::read_covariate_table(&config.covariate, data.samples())
        .with_context(|| format!("reading covariate {}", config.covariate.display()))?;
    eprintln!(
        "Loaded {} taxa x {} samples, tree with {} tips",
        data.n_parts(),
        data.n_samples(),
        tree.n_tips()
    );

    telemetry.set_stage(Stage::Preparing);
    let input = FactorizationInput {
        data,
        tree,
        covariate,
    };
    let factorization = FactorizationLoop::new(input, params)?.with_telemetry(telemetry.clone());

    let mut pool = config.pool_config().map(WorkerPool::new).transpose()?;
    let result = factorization.run(pool.as_mut())?;

    eprintln!(
        "Extracted {} factors ({:?})",
        result.n_factors(),
        result.status
    );
    for factor in &result.factors {
        eprintln!(
            "  {:>3}: edge {} | {} vs {} tips | p = {:.3e} | ExpVar = {:.4}",
            factor.iteration,
            factor.edge,
            factor.group_a.tips.len(),
            factor.group_b.tips.len(),
            factor.fit.p_value,
            factor.explained_variance
        );
    }
    for warning in &result.warnings {
        eprintln!("  Warning: {}", warning);
    }

    telemetry.set_stage(Stage::WritingOutput);
    eprintln!("Writing output to {:?}", config.out);
    io::write_report(&config.out, &result)
        .with_context(|| format!("writing report {}", config.out.display()))?;

    telemetry.set_stage(Stage::Complete);
    if let Some(heartbeat) = heartbeat {
        heartbeat.shutdown();
    }

    eprintln!("\nCompleted in {:.2}s", start.elapsed().as_secs_f64());
    Ok(())
}
