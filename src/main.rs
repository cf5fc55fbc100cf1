use std::io::{self, Write};
use std::process::ExitCode;

use anyhow::{Context, Result};
use env_logger::Env;
use log::debug;

use hubpower::HubSession;
use hubpower::cli::{Action, Cli};
use hubpower::device;
use hubpower::usbfs::UsbfsDevice;

fn run(cli: &Cli) -> Result<()> {
    let resolved = device::resolve(cli.device, UsbfsDevice::open)?;
    let mut session = HubSession::open(resolved, cli.device)?;
    debug!(
        "hub {} has {} ports, {:?} status layout",
        cli.device,
        session.num_ports(),
        session.layout()
    );

    let mut out = io::stdout().lock();
    let mut err = io::stderr().lock();
    match &cli.action {
        Action::Status => session.print_all(&mut out, &mut err)?,
        Action::Bind => {
            session.bind()?;
            writeln!(out, "Bind-driver request sent to the kernel")
                .context("Error writing output")?;
        }
        Action::Power { .. } => {
            session.power_batch(&cli.action.power_pairs(), &mut out, &mut err)?
        }
    }
    out.flush().context("Error writing output")?;
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(Env::default().default_filter_or("warn")).init();

    let cli = match Cli::try_parse_args(std::env::args_os()) {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return ExitCode::FAILURE;
        }
    };

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
