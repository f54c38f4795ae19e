use clap::Parser;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Name of the MapReduce application to run.
    #[arg(short, long, default_value = "wc")]
    pub workload: String,

    /// Seconds between heartbeat lines on stdout. 0 disables them.
    #[arg(long, default_value = "30")]
    pub heartbeat: u64,

    /// Auxiliary arguments to pass to the MapReduce application.
    #[clap(value_parser, last = true)]
    pub args: Vec<String>,
}
