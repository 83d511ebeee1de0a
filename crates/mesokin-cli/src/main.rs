//! Command-line drivers.
//!
//! Every driver takes the positional arguments `t0 t_end steps model_file`
//! and writes whitespace-separated columns to standard output: time
//! first, one column per species in model order, then variance columns
//! where the method provides them. Any typed error prints a single-line
//! diagnostic on standard error and exits with code -1.

use clap::{Args, Parser, Subcommand, ValueEnum};
use mesokin_ast::Model;
use mesokin_core::packed_index;
use mesokin_eval::bci::Bci;
use mesokin_sbml::read_sbml_file;
use mesokin_solve::{integrate_time_course, SteadyStateAnalysis};
use mesokin_ssa::{DirectSsa, NextReactionSsa, OptimizedSsa, Simulator};
use mesokin_sse::{SseLevel, SseModel};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "mesokin", version, about = "Stochastic chemical kinetics analysis")]
struct Cli {
    /// Log filter, e.g. `info` or `mesokin_solve=debug`
    #[arg(long, default_value = "warn", global = true)]
    log: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Integrate the deterministic rate equations
    Re(TimeCourseArgs),
    /// Integrate the linear noise approximation with EMRE corrections
    Lna(TimeCourseArgs),
    /// Integrate the inverse-omega-squared system
    Ios(TimeCourseArgs),
    /// Run an ensemble stochastic simulation
    Ssa(SsaArgs),
    /// Solve for the steady state of the expansion hierarchy
    SteadyState(SteadyStateArgs),
}

#[derive(Args)]
struct TimeCourseArgs {
    t0: f64,
    t_end: f64,
    steps: usize,
    model_file: PathBuf,

    /// Bytecode optimization level (0 or 1)
    #[arg(long, default_value_t = 1)]
    opt_level: usize,
}

#[derive(Args)]
struct SsaArgs {
    t0: f64,
    t_end: f64,
    steps: usize,
    model_file: PathBuf,

    #[arg(long, value_enum, default_value_t = Method::Optimized)]
    method: Method,

    /// Number of realizations
    #[arg(long, default_value_t = 1000)]
    ensemble: usize,

    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Worker threads; 0 uses all cores
    #[arg(long, default_value_t = 0)]
    threads: usize,

    #[arg(long, default_value_t = 1)]
    opt_level: usize,
}

#[derive(Args)]
struct SteadyStateArgs {
    model_file: PathBuf,

    /// Expansion order of the analysis
    #[arg(long, value_enum, default_value_t = Level::Lna)]
    level: Level,

    #[arg(long, default_value_t = 100)]
    max_iterations: usize,

    #[arg(long, default_value_t = 1e-9)]
    epsilon: f64,
}

#[derive(Clone, Copy, ValueEnum)]
enum Method {
    Direct,
    Optimized,
    NextReaction,
}

#[derive(Clone, Copy, ValueEnum)]
enum Level {
    Re,
    Lna,
    Ios,
}

fn main() {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(cli.log.as_str())
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run(cli.command) {
        eprintln!("{}", err);
        std::process::exit(-1);
    }
}

fn run(command: Command) -> anyhow::Result<()> {
    match command {
        Command::Re(args) => time_course(args, SseLevel::Re),
        Command::Lna(args) => time_course(args, SseLevel::Lna),
        Command::Ios(args) => time_course(args, SseLevel::Ios),
        Command::Ssa(args) => ssa(args),
        Command::SteadyState(args) => steady_state(args),
    }
}

fn load(path: &PathBuf) -> anyhow::Result<Model> {
    Ok(read_sbml_file(path)?)
}

fn header(model: &Model, with_variance: bool) {
    print!("# t");
    for s in model.species() {
        print!(" {}", s.id);
    }
    if with_variance {
        for s in model.species() {
            print!(" var({})", s.id);
        }
    }
    println!();
}

fn time_course(args: TimeCourseArgs, level: SseLevel) -> anyhow::Result<()> {
    let input = load(&args.model_file)?;
    let model = match level {
        SseLevel::Re => SseModel::re(&input)?,
        SseLevel::Lna => SseModel::lna(&input)?,
        SseLevel::Ios => SseModel::ios(&input)?,
    };
    let with_variance = level != SseLevel::Re;
    header(model.system().model(), with_variance);

    let trajectory =
        integrate_time_course::<Bci>(&model, args.t0, args.t_end, args.steps, args.opt_level)?;
    for (t, full) in trajectory {
        print!("{}", t);
        for value in full.concentrations.iter() {
            print!(" {}", value);
        }
        if let Some(cov) = &full.covariance {
            for i in 0..cov.nrows() {
                print!(" {}", cov[[i, i]]);
            }
        }
        println!();
    }
    Ok(())
}

fn ssa(args: SsaArgs) -> anyhow::Result<()> {
    let input = load(&args.model_file)?;
    let threads = if args.threads == 0 {
        std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
    } else {
        args.threads
    };

    let mut simulator: Box<dyn Simulator> = match args.method {
        Method::Direct => Box::new(DirectSsa::<Bci>::new(
            &input,
            args.ensemble,
            args.seed,
            threads,
            args.opt_level,
        )?),
        Method::Optimized => Box::new(OptimizedSsa::<Bci>::new(
            &input,
            args.ensemble,
            args.seed,
            threads,
            args.opt_level,
        )?),
        Method::NextReaction => Box::new(NextReactionSsa::<Bci>::new(
            &input,
            args.ensemble,
            args.seed,
            threads,
            args.opt_level,
        )?),
    };

    header(simulator.base().model(), true);
    let n = simulator.base().num_species();

    if args.t0 > 0.0 {
        simulator.run(args.t0)?;
    }
    emit_ssa_row(args.t0, &*simulator, n);
    let dt = (args.t_end - args.t0) / args.steps.max(1) as f64;
    for step in 0..args.steps {
        simulator.run(dt)?;
        emit_ssa_row(args.t0 + dt * (step + 1) as f64, &*simulator, n);
    }
    Ok(())
}

fn emit_ssa_row(t: f64, simulator: &dyn Simulator, n: usize) {
    let (mean, cov, _) = simulator.base().stats();
    print!("{}", t);
    for j in 0..n {
        print!(" {}", mean[j]);
    }
    for j in 0..n {
        print!(" {}", cov[packed_index(j, j)]);
    }
    println!();
}

fn steady_state(args: SteadyStateArgs) -> anyhow::Result<()> {
    let input = load(&args.model_file)?;
    let model = match args.level {
        Level::Re => SseModel::re(&input)?,
        Level::Lna => SseModel::lna(&input)?,
        Level::Ios => SseModel::ios(&input)?,
    };
    let with_variance = !matches!(args.level, Level::Re);
    let mut analysis = SteadyStateAnalysis::<Bci>::new(model);
    analysis.max_iterations = args.max_iterations;
    analysis.epsilon = args.epsilon;

    let ss = analysis.solve()?;
    header(analysis.model().system().model(), with_variance);
    print!("inf");
    for value in ss.full.concentrations.iter() {
        print!(" {}", value);
    }
    if let Some(cov) = &ss.full.covariance {
        for i in 0..cov.nrows() {
            print!(" {}", cov[[i, i]]);
        }
    }
    println!();

    eprintln!(
        "# converged in {} iterations; leading eigenvalue {}",
        ss.iterations,
        ss.eigenvalues
            .iter()
            .map(|e| e.re)
            .fold(f64::NEG_INFINITY, f64::max)
    );
    Ok(())
}
