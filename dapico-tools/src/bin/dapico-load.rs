use camino::Utf8PathBuf;
use clap::Parser;
use dapico::{
    dryrun, elf::ElfFile, load, picoboot::PicobootConnection, plan::LoadPlan, MemoryLayout,
};
use std::io::Write;
use std::process::ExitCode;

/// Load an ELF image into an RP2040/RP2350 in BOOTSEL mode and run it
#[derive(Parser)]
#[command(name = "dapico-load", version)]
struct Cli {
    /// Allow writing flash segments instead of mirroring them into SRAM
    #[arg(long)]
    flash: bool,

    /// Skip executing the loaded image
    #[arg(long)]
    no_exec: bool,

    /// Print what would be written without touching any device
    #[arg(long)]
    dryrun: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    /// ELF file to load
    #[arg(value_name = "FILE")]
    target_file: Utf8PathBuf,
}

fn load_to_device(cli: &Cli, out: &mut impl Write) -> dapico::Result<()> {
    let mut conn = PicobootConnection::open()?;
    let layout = MemoryLayout::for_target(conn.get_device_type());
    log::info!("loading {} for {:?}", cli.target_file, conn.get_device_type());

    let elf = ElfFile::read(&cli.target_file)?;
    let plan = LoadPlan::build(&elf, &layout, cli.flash)?;
    load::run(&mut conn, &plan, &layout, cli.flash, !cli.no_exec, out)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    dapico_tools::init_logging(cli.verbose);

    let mut out = std::io::stdout().lock();
    let result = if cli.dryrun {
        dryrun::run(cli.target_file.as_std_path(), cli.flash, !cli.no_exec, &mut out)
    } else {
        load_to_device(&cli, &mut out)
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let _ = out.flush();
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}
