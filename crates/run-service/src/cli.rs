use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "deepmd-run-service",
    version,
    about = "Token-gated streaming runner for simulation jobs"
)]
pub(crate) struct Args {
    #[arg(long)]
    pub(crate) config: Option<PathBuf>,
    /// Overrides `server.listen_addr` from the config file.
    #[arg(long)]
    pub(crate) listen_addr: Option<String>,
    /// Overrides `logging.dir` from the config file.
    #[arg(long)]
    pub(crate) log_dir: Option<PathBuf>,
    #[arg(long, default_value_t = false)]
    pub(crate) log_to_stderr: bool,
}
