use clap::{Parser, Subcommand};
use grasp_miner::runner::{
    DisplayMode, JobStatus, MineArgs, MinerConfigBuilder, MiningSummary, REPLAY_DELAY,
    SeedErrorPolicy, SimulatorSettingsBuilder, replay_grasps, run_mining,
};
use std::path::PathBuf;

#[derive(Parser, Clone)]
#[command(version, about = "Mine stable grasps for object models in the GraspIt! simulator")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Subcommand)]
enum Command {
    Mine {
        /// Object models to mine
        #[arg(short, long, num_args = 0.., default_values_t = vec!["glass".to_string()])]
        models: Vec<String>,

        /// File listing one model per line (overrides --models)
        #[arg(short = 'l', long, alias = "models_file")]
        models_file: Option<PathBuf>,

        /// Number of simulator sessions to run in parallel
        #[arg(short = 'n', long, alias = "n_jobs", default_value = "1")]
        n_jobs: usize,

        /// Directory for the `<model>.json` result files
        #[arg(short = 'o', long, alias = "path_out")]
        path_out: Option<PathBuf>,

        /// Show simulator output and debug logs
        #[arg(short, long)]
        verbose: bool,

        /// Replay the mined grasps in a simulator window when done
        #[arg(short, long)]
        debug: bool,

        /// Start the simulator without a display
        #[arg(short = 'e', long)]
        headless: bool,

        /// Run the simulator inside an Xvfb virtual framebuffer
        #[arg(short = 'x', long)]
        xvfb: bool,

        /// Simulator install directory
        #[arg(long, alias = "graspit_dir", env = "GRASPIT")]
        graspit_dir: PathBuf,

        /// Simulator plugin directory
        #[arg(long, alias = "plugin_dir", env = "GRASPIT_PLUGIN_DIR")]
        plugin_dir: PathBuf,

        /// Predefined grasps used as search seeds
        #[arg(long, alias = "grasps_file")]
        grasps_file: Option<PathBuf>,

        /// Fail instead of continuing without seeds when the grasps file is malformed
        #[arg(long)]
        strict_grasps: bool,

        /// Max search steps per object (0: search until convergence)
        #[arg(short = 's', long, alias = "max_steps", default_value = "0")]
        max_steps: usize,

        /// Max best grasps kept per object (0: keep all)
        #[arg(short = 'g', long, alias = "max_grasps", default_value = "0")]
        max_grasps: usize,

        /// Randomly relax finger joints when refining grasps
        #[arg(long, alias = "relax_fingers")]
        relax_fingers: bool,

        /// Try several joint speed ratios for each pose
        #[arg(long, alias = "change_speed")]
        change_speed: bool,

        /// Hand model to load
        #[arg(long)]
        hand: Option<String>,

        /// Seed for the search's random proposals
        #[arg(long)]
        seed: Option<u64>,

        /// Quiet mode - minimal output, only show summary
        #[arg(short, long)]
        quiet: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    match args.command {
        Command::Mine {
            models,
            models_file,
            n_jobs,
            path_out,
            verbose,
            debug,
            headless,
            xvfb,
            graspit_dir,
            plugin_dir,
            grasps_file,
            strict_grasps,
            max_steps,
            max_grasps,
            relax_fingers,
            change_speed,
            hand,
            seed,
            quiet,
        } => {
            // Initialize tracing based on verbosity
            use tracing_subscriber::{EnvFilter, FmtSubscriber};
            let filter = if quiet {
                EnvFilter::new("grasp_miner=warn")
            } else if verbose {
                EnvFilter::new("grasp_miner=debug")
            } else {
                EnvFilter::new("grasp_miner=info")
            };
            let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
            let _ = tracing::subscriber::set_global_default(subscriber);

            let display_mode = DisplayMode::from_flags(headless, xvfb);

            if !quiet {
                println!("Grasp Miner");
                println!("===========");
                println!("Simulator: {}", graspit_dir.display());
                println!("Plugins: {}", plugin_dir.display());
                println!("Display: {:?}", display_mode);
                println!("Parallel jobs: {}", n_jobs);
                println!();
            }

            let simulator = SimulatorSettingsBuilder::default()
                .install_dir(graspit_dir)
                .plugin_dir(plugin_dir)
                .display_mode(display_mode)
                .verbose(verbose)
                .build()?;

            let mut miner = MinerConfigBuilder::default();
            miner
                .max_steps(max_steps)
                .max_grasps(max_grasps)
                .relax_fingers(relax_fingers)
                .change_speed(change_speed);
            if let Some(hand) = hand {
                miner.hand_id(hand);
            }
            if let Some(seed) = seed {
                miner.seed(seed);
            }
            let miner = miner.build()?;
            let hand_id = miner.hand_id.clone();

            let mine_args = MineArgs {
                simulator: simulator.clone(),
                models,
                models_file,
                grasps_file,
                seed_errors: if strict_grasps {
                    SeedErrorPolicy::Abort
                } else {
                    SeedErrorPolicy::Ignore
                },
                output_dir: path_out,
                miner,
                parallelism: n_jobs,
                quiet,
            };

            let summary = run_mining(mine_args).await?;
            print_summary(&summary);

            if debug {
                let models: Vec<String> = summary.models.iter().map(|m| m.model.clone()).collect();
                replay_grasps(
                    &simulator,
                    &models,
                    &summary.output_dir,
                    &hand_id,
                    REPLAY_DELAY,
                )
                .await?;
            }
        }
    }
    Ok(())
}

fn print_summary(summary: &MiningSummary) {
    println!();
    println!("Mining Summary");
    println!("==============");
    for model in &summary.models {
        let status = match &model.status {
            JobStatus::Completed => "ok".to_string(),
            JobStatus::Partial(reason) => format!("partial ({})", reason),
            JobStatus::Failed(reason) => format!("failed ({})", reason),
        };
        println!(
            "  {:<24} {:>5} grasps  {:>8} evaluations  {:>6} rejected  {:>8.2}s  {}",
            model.model,
            model.grasps.len(),
            model.evaluations,
            model.failures,
            model.duration.as_secs_f64(),
            status
        );
    }
    println!();
    println!("Models: {}", summary.models.len());
    println!("Seed grasps: {}", summary.seeds_loaded);
    println!("Grasps saved: {}", summary.total_grasps());
    println!("Failed jobs: {}", summary.failed_jobs());
    println!("Output: {}", summary.output_dir.display());
    println!("Duration: {:.2}s", summary.duration.as_secs_f64());
}
