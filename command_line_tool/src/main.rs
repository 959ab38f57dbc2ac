mod problem;

use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use graphmap::{AlgorithmRegistry, MatchInfo, MatcherConfig, NodeId, Precision, Real, ScoredMatch};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use crate::problem::Problem;

/// Command line arguments structure.
#[derive(Parser, Debug)]
#[command(author, version, about = "CLI for matching the nodes of two spatial graphs.")]
struct Args {
    /// Problem file (JSON) holding the source and target graphs
    #[arg()]
    problem: Option<PathBuf>,

    /// Matcher configuration file (JSON). Missing keys take their defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// Name of the matching algorithm
    #[arg(long, default_value = "kron_walk")]
    algorithm: String,

    /// Radius connecting the points of graphs given without edges
    #[arg(long)]
    adj_radius: Option<f64>,

    /// Floating-point precision: float32 or float64
    #[arg(long, value_parser = parse_precision)]
    precision: Option<Precision>,

    /// Damping of the random walk, overrides the configuration
    #[arg(long)]
    alpha: Option<f64>,

    /// Iteration budget of the walk, overrides the configuration
    #[arg(long)]
    opt_max_iter: Option<usize>,

    /// Print the one-to-one assignment instead of the score matrix. With a
    /// value, only the N most certain source nodes are kept
    #[arg(long, num_args = 0..=1, default_missing_value = "0")]
    top_matches: Option<usize>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// List the available algorithms and exit
    #[arg(long)]
    list_algorithms: bool,
}

#[derive(Serialize)]
struct Output<T: Serialize> {
    algorithm: String,
    info: MatchInfo,
    #[serde(flatten)]
    result: MatchOutput<T>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum MatchOutput<T: Serialize> {
    Scores {
        source_ids: Vec<NodeId>,
        target_ids: Vec<NodeId>,
        scores: Vec<Vec<T>>,
    },
    Matches {
        matches: Vec<ScoredMatch<T>>,
    },
}

fn parse_precision(value: &str) -> std::result::Result<Precision, String> {
    match value.to_lowercase().as_str() {
        "float32" | "f32" => Ok(Precision::Float32),
        "float64" | "f64" => Ok(Precision::Float64),
        _ => Err(format!("unknown precision '{value}', use float32 or float64")),
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let filter = match args.verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    if args.list_algorithms {
        for name in AlgorithmRegistry::<f32>::with_builtin().names() {
            println!("{name}");
        }
        return Ok(());
    }

    let Some(problem_path) = &args.problem else {
        bail!("a problem file is required unless --list-algorithms is given");
    };

    let mut config = match &args.config {
        Some(path) => {
            let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_str::<MatcherConfig>(&text).with_context(|| format!("parsing {}", path.display()))?
        }
        None => MatcherConfig::default(),
    };
    if let Some(precision) = args.precision {
        config.precision = precision;
    }
    if let Some(alpha) = args.alpha {
        config.alpha = alpha;
    }
    if let Some(opt_max_iter) = args.opt_max_iter {
        config.opt_max_iter = opt_max_iter;
    }

    let text = fs::read_to_string(problem_path).with_context(|| format!("reading {}", problem_path.display()))?;
    let problem: Problem =
        serde_json::from_str(&text).with_context(|| format!("parsing {}", problem_path.display()))?;

    let output = match config.precision {
        Precision::Float32 => serde_json::to_string_pretty(&run::<f32>(&args, &problem, config)?)?,
        Precision::Float64 => serde_json::to_string_pretty(&run::<f64>(&args, &problem, config)?)?,
    };
    println!("{output}");
    Ok(())
}

fn run<T: Real + Serialize>(args: &Args, problem: &Problem, config: MatcherConfig) -> Result<Output<T>> {
    let source = problem.source.build::<T>(args.adj_radius).context("building the source graph")?;
    let target = problem.target.build::<T>(args.adj_radius).context("building the target graph")?;
    info!(
        "Loaded graphs with {} and {} nodes",
        source.num_nodes(),
        target.num_nodes()
    );

    let algorithm = AlgorithmRegistry::<T>::with_builtin().create(&args.algorithm, config)?;
    let (match_info, scores) = algorithm.match_graphs(&source, &target, None)?;

    let result = match args.top_matches {
        Some(k) => {
            let k_best = (k > 0).then_some(k);
            let matches = match k_best {
                Some(_) => {
                    // keep the most certain nodes, then resolve conflicts one-to-one
                    let certain: Vec<NodeId> = scores.max_margin_matches(k_best).iter().map(|m| m.source).collect();
                    scores
                        .assignment()?
                        .into_iter()
                        .filter(|m| certain.contains(&m.source))
                        .collect()
                }
                None => scores.assignment()?,
            };
            MatchOutput::Matches { matches }
        }
        None => MatchOutput::Scores {
            source_ids: scores.source_ids().to_vec(),
            target_ids: scores.target_ids().to_vec(),
            scores: scores
                .scores()
                .row_iter()
                .map(|row| row.iter().copied().collect())
                .collect(),
        },
    };

    Ok(Output {
        algorithm: algorithm.name().to_string(),
        info: match_info,
        result,
    })
}
