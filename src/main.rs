/// Command line entry point for shellpilot
///
/// This is a thin wrapper that delegates to the library crate.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let code = shellpilot_lib::run().await?;
    std::process::exit(code);
}
