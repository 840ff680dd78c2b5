use std::path::PathBuf;

use clap::Parser;
use erc32_sim::mec::uart::{NullPort, SerialPort, StreamPort, UartPair};
use erc32_sim::{SimConfig, Simulator, StopReason};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
struct Args {
    /// Big-endian SPARC ELF to load
    #[arg(long)]
    elf: PathBuf,

    /// Stop after N instructions (0 = run until the program stops)
    #[arg(long, default_value_t = 0)]
    max_insns: u64,

    /// Enable instruction trace (needs RUST_LOG=trace or --verbose)
    #[arg(long, default_value_t = false)]
    trace: bool,

    /// Simulate without a floating-point unit
    #[arg(long, default_value_t = false)]
    nfpu: bool,

    /// Processor clock in MHz, for the statistics
    #[arg(long, default_value_t = 14.0)]
    freq: f64,

    /// Device or file connected to UART A (default: stdin/stdout)
    #[arg(long)]
    uart_a: Option<PathBuf>,

    /// Device or file connected to UART B
    #[arg(long)]
    uart_b: Option<PathBuf>,

    /// Legacy timer interrupt behaviour
    #[arg(long, default_value_t = false)]
    rev0_timer: bool,

    /// Legacy PS handling on trap entry
    #[arg(long, default_value_t = false)]
    rev0_trap: bool,

    /// More log output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = SimConfig {
        freq_mhz: args.freq,
        fpu_present: !args.nfpu,
        uart_a: args.uart_a.clone(),
        uart_b: args.uart_b.clone(),
        rev0_timer_irq: args.rev0_timer,
        rev0_trap_ps: args.rev0_trap,
        ..SimConfig::default()
    };

    let uart_a: Box<dyn SerialPort> = match &config.uart_a {
        Some(path) => Box::new(StreamPort::open(path)?),
        None => Box::new(StreamPort::stdio()),
    };
    let uart_b: Box<dyn SerialPort> = match &config.uart_b {
        Some(path) => Box::new(StreamPort::open(path)?),
        None => Box::new(NullPort),
    };
    let mut sim = Simulator::with_uarts(config, UartPair::new(uart_a, uart_b));

    let entry = erc32_sim::elf::load_elf(&args.elf, &mut sim)?;
    println!("Loaded {} entry point at 0x{:08x}", args.elf.display(), entry);

    let budget = if args.max_insns == 0 { u64::MAX } else { args.max_insns };
    let reason = sim.step(budget, args.trace);
    match reason {
        StopReason::TimedOut => println!("Stopped after {} instructions", sim.stats().instructions),
        StopReason::BreakpointHit => println!("Breakpoint at 0x{:08x}", sim.cpu.pc),
        StopReason::Interrupted => println!("Interrupted at 0x{:08x}", sim.cpu.pc),
        StopReason::FatalError => {
            eprintln!("Processor in error mode at pc=0x{:08x} npc=0x{:08x}", sim.cpu.pc, sim.cpu.npc)
        }
    }

    let stats = sim.stats();
    println!("{stats}");
    let secs = stats.simulated_seconds(sim.config().freq_mhz);
    println!(" Simulated time : {:.6} s at {} MHz", secs, sim.config().freq_mhz);
    Ok(())
}
