use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kapply::{commands, telemetry};
use tracing::Level;

#[cfg(all(
	target_os = "linux",
	feature = "mimalloc",
	not(feature = "system-alloc")
))]
#[global_allocator]
static GLOBAL: mimallocator::Mimalloc = mimallocator::Mimalloc;

#[derive(Parser)]
#[command(name = "kapply")]
#[command(about = "Apply a directory of Kubernetes manifests in dependency order", long_about = None)]
#[command(version)]
struct Cli {
	/// Log level (trace, debug, info, warn, error); defaults to RUST_LOG, then info
	#[arg(long, global = true)]
	log_level: Option<Level>,

	/// Log line format on stderr
	#[arg(long, global = true, value_enum, default_value_t)]
	log_format: telemetry::LogFormat,

	#[command(subcommand)]
	command: Commands,
}

#[derive(Subcommand)]
enum Commands {
	/// Create or patch every manifest in the directory
	Apply(commands::apply::ApplyArgs),

	/// Show the apply order without contacting a cluster
	Plan(commands::plan::PlanArgs),
}

fn main() -> Result<()> {
	let cli = Cli::parse();

	let runtime = tokio::runtime::Builder::new_current_thread()
		.enable_all()
		.build()
		.context("creating tokio runtime")?;
	let _enter = runtime.enter();
	let _telemetry = telemetry::init(cli.log_level, cli.log_format)?;

	let (stdout, stderr) = (std::io::stdout(), std::io::stderr());
	match cli.command {
		Commands::Apply(args) => commands::apply::run(&runtime, args, stdout, stderr),
		Commands::Plan(args) => commands::plan::run(args, stdout, stderr),
	}
}
