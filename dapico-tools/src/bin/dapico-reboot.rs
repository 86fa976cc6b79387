use clap::Parser;
use dapico::reboot::{RebootOutcome, RebootTarget};
use dapico::Error;
use std::process::ExitCode;

/// Reboot an RP2040/RP2350 board over USB
#[derive(Parser)]
#[command(name = "dapico-reboot", version)]
struct Cli {
    /// Reboot into BOOTSEL mode (if reset interface is available)
    #[arg(short = 'u', long)]
    bootsel: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    dapico_tools::init_logging(cli.verbose);

    let target = match RebootTarget::find() {
        Ok(target) => target,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    match target.reboot(cli.bootsel) {
        Ok(RebootOutcome::Sent) => println!("Reboot request sent."),
        Ok(RebootOutcome::BootselRequested) => println!("Requested reboot into BOOTSEL mode."),
        Ok(RebootOutcome::AlreadyInBootsel) => println!("Device is already in BOOTSEL mode."),
        Err(e @ Error::NoInterface) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
        Err(e) => {
            eprintln!("Reboot request failed ({}).", e);
            return ExitCode::FAILURE;
        }
    }
    ExitCode::SUCCESS
}
