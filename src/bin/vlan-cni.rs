use tracing::{error, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use vlan_cni::commands::run_cni;
use vlan_cni::types::CniErrorReport;

fn main() {
    // Set up tracing; stdout is reserved for the protocol, so logs go to
    // stderr.
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .with_max_level(Level::INFO)
        .with_writer(std::io::stderr)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);

    // Run the CNI plugin
    if let Err(err) = run_cni() {
        error!("CNI plugin error: {}", err);

        // The runtime reads the error object from stdout.
        let report = CniErrorReport::from_error(&err);
        match serde_json::to_string(&report) {
            Ok(json) => println!("{json}"),
            Err(_) => eprintln!("{err}"),
        }
        std::process::exit(1);
    }
}
