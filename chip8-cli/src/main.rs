//! Entrypoint for CLI
use std::{
    env,
    error::Error,
    fs,
    thread,
    time::{Duration, Instant},
};

use chip8::{prelude::*, Hz, IMPL_VERSION};
use log::{info, warn};

static USAGE: &str = r#"
usage: chip8 run FILE [HZ]

arguments:
    FILE    ROM file to run
    HZ      instruction rate, defaults to 700

examples:
    chip8 run breakout.rom
    chip8 run breakout.rom 1400
"#;

/// Clear the terminal and move the cursor home.
const ANSI_CLEAR: &str = "\x1b[2J\x1b[1;1H";

fn run_rom(filepath: &str, clock_hz: Option<u64>) -> Result<(), Box<dyn Error>> {
    let rom = fs::read(filepath)?;

    let mut vm = Chip8Vm::new(Chip8Conf {
        clock_frequency: clock_hz.map(Hz),
        ..Default::default()
    });
    vm.load_rom(&rom);
    vm.initialize()?;

    info!(
        "running {} at {:?} ({} bytes)",
        filepath,
        vm.clock_hz(),
        rom.len()
    );

    let period: Duration = vm.clock_hz().into();
    let mut deadline = Instant::now() + period;

    loop {
        match vm.step() {
            Ok(Flow::KeyWait) => {
                // Headless run: no input collaborator is attached, so a key
                // wait would spin forever.
                warn!(
                    "program waits for input at 0x{:04X}; stopping",
                    vm.program_counter()
                );
                break;
            }
            Ok(_) => {}
            Err(err) => {
                print!("{}{}", ANSI_CLEAR, vm.dump_display()?);
                return Err(err.into());
            }
        }

        if vm.should_redraw() {
            print!("{}{}", ANSI_CLEAR, vm.dump_display()?);
            vm.clear_redraw();
        }

        // Pace the loop at the configured instruction rate.
        let now = Instant::now();
        if now < deadline {
            thread::sleep(deadline - now);
        }
        deadline += period;
    }

    print!("{}{}", ANSI_CLEAR, vm.dump_display()?);

    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    simple_logger::SimpleLogger::new().env().init()?;

    match parse_args() {
        Some(Cmd::Run { filepath, clock_hz }) => run_rom(&filepath, clock_hz)?,
        None => {
            print_usage();
            // FreeBSD EX_USAGE (64)
            std::process::exit(64)
        }
    }

    Ok(())
}

fn parse_args() -> Option<Cmd> {
    let mut args = env::args().skip(1);
    match args.next().as_deref() {
        Some("run") => {
            let filepath = args.next()?;
            let clock_hz = match args.next() {
                Some(arg) => Some(arg.parse().ok()?),
                None => None,
            };
            Some(Cmd::Run { filepath, clock_hz })
        }
        _ => None,
    }
}

fn print_usage() {
    println!("Chip8 v{IMPL_VERSION}");
    println!("{USAGE}");
}

enum Cmd {
    /// Run file
    Run {
        filepath: String,
        clock_hz: Option<u64>,
    },
}
