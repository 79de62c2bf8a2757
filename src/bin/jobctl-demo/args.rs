use clap::Parser;

/// In-process demo harness for the job queueing engine. Not a protocol
/// server: it drives `jobqueue_engine::Engine` directly and prints the
/// resulting job views, standing in for the worker/client wire layer that
/// stays out of this crate's scope.
#[derive(Parser, Debug)]
#[command(about, long_about = None, version)]
pub struct Args {
    /// Name of the queue the demo scenario runs against.
    #[arg(short, long, default_value = "demo")]
    pub queue: String,
    /// Enables human-friendly logging.
    #[arg(short, long, default_value_t)]
    pub debug: bool,
}
