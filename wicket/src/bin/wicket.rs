use std::sync::Arc;

use arrrg::CommandLine;
use indicio::stdio::StdioEmitter;
use indicio::{clue, ALWAYS, INFO};

use wicket::{Error, Simulation, SimulationOptions, COLLECTOR};

fn main() {
    let (options, free) = SimulationOptions::from_command_line("USAGE: wicket [OPTIONS]");
    if !free.is_empty() {
        eprintln!("wicket takes no positional arguments");
        std::process::exit(129);
    }

    // indicio
    let emitter = Arc::new(StdioEmitter);
    COLLECTOR.register(Arc::clone(&emitter));
    COLLECTOR.set_verbosity(INFO);
    clue!(COLLECTOR, ALWAYS, {
        args: std::env::args().map(String::from).collect::<Vec<_>>(),
    });

    let simulation = Simulation::new(options);
    match simulation.run() {
        Ok(()) => {}
        Err(Error::UserMismatch { user }) => {
            eprintln!("wicket: user {:?} does not match the credential file", user);
            std::process::exit(1);
        }
        Err(err) => {
            eprintln!("wicket: {:?}", err);
            std::process::exit(1);
        }
    }
}
