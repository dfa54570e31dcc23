//
// main.rs
// neuro-tools
//
// Binary entry point that hands off execution to the CLI layer.
//

use neuro_tools::cli;

fn main() -> anyhow::Result<()> {
    // Delegate all argument parsing and dispatching to the CLI module.
    cli::run()
}
