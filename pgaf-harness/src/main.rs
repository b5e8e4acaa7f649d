#[tokio::main]
async fn main() -> eyre::Result<()> {
    use clap::Parser;
    use colored::Colorize;

    let cli = Cli::parse();

    // RUST_LOG wins over -v/-q, e.g. RUST_LOG="pgaf_test_utils=debug"
    let filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(cli.verbose.tracing_level_filter().into())
        .from_env_lossy();
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let (name, args) = match &cli.command {
        Command::Single(args) => ("single", args),
        Command::Failover(args) => ("failover", args),
    };

    let layout = args.layout()?;
    let config = args.harness_config(&layout.workdir)?;
    tracing::info!(scenario = name, workdir = ?layout.workdir, pg_autoctl = ?config.pg_autoctl, "Starting scenario.");

    let mut cluster = pgaf_test_utils::Cluster::new(config);
    let result = match cli.command {
        Command::Single(_) => pgaf_harness::single(&mut cluster, &layout).await,
        Command::Failover(_) => pgaf_harness::failover(&mut cluster, &layout).await,
    };

    if let Err(e) = cluster.destroy().await {
        tracing::warn!(error = %e, "Cluster teardown was incomplete.");
    }

    match result {
        Ok(true) => {
            println!("{}", format!("scenario {name} passed").green());
            Ok(())
        }
        Ok(false) => {
            eprintln!("{}", format!("scenario {name} did not converge").red());
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("{}", format!("scenario {name} failed").red());
            eprintln!("{e:?}");
            std::process::exit(1);
        }
    }
}

#[derive(clap::Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    verbose: clap_verbosity_flag::Verbosity<clap_verbosity_flag::InfoLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(clap::Subcommand, Debug)]
pub enum Command {
    #[clap(about = "One monitor and one data node, wait for the node to report single")]
    Single(ScenarioArgs),
    #[clap(about = "Primary and secondary, then a manual failover that has to swap them")]
    Failover(ScenarioArgs),
}

#[derive(clap::Args, Debug)]
pub struct ScenarioArgs {
    #[arg(
        long,
        help = "Directory for data directories, logs and pg_autoctl config/state. Created if missing."
    )]
    workdir: std::path::PathBuf,
    #[arg(
        long,
        env = "PGAF_PG_AUTOCTL",
        help = "The pg_autoctl binary. Searched in PATH when not given."
    )]
    pg_autoctl: Option<std::path::PathBuf>,
    #[arg(long, default_value = "5432", help = "Port of the monitor.")]
    monitor_port: u16,
    #[arg(
        long,
        default_value = "6001",
        help = "Port of the first data node, the next ones count up from it."
    )]
    first_port: u16,
    #[arg(
        long,
        default_value = "90",
        help = "Seconds to wait for each state change."
    )]
    timeout: u64,
}

impl ScenarioArgs {
    fn layout(&self) -> eyre::Result<pgaf_harness::Layout> {
        std::fs::create_dir_all(&self.workdir)?;

        Ok(pgaf_harness::Layout {
            workdir: std::path::absolute(&self.workdir)?,
            monitor_port: self.monitor_port,
            first_port: self.first_port,
        })
    }

    fn harness_config(&self, workdir: &std::path::Path) -> eyre::Result<pgaf_test_utils::HarnessConfig> {
        let config = match &self.pg_autoctl {
            Some(path) => pgaf_test_utils::HarnessConfig::with_pg_autoctl(path.clone())?,
            None => pgaf_test_utils::HarnessConfig::from_env()?,
        };

        Ok(pgaf_test_utils::HarnessConfig {
            state_change_timeout: std::time::Duration::from_secs(self.timeout),
            log_dir: Some(workdir.join("logs")),
            ..config.isolated_in(workdir)
        })
    }
}
