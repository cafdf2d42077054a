// Continuous voltage streaming example
//
// Starts the background acquisition worker and prints voltage pairs as they
// arrive, together with the achieved sample rate.

use clap::Parser;
use dpscope_rs::{AcquisitionRate, Channel, DpScope, ACQUISITION_RATES, INPUT_RANGES};
use std::io::{self, Write};
use std::time::{Duration, Instant};

#[derive(Parser)]
#[command(name = "stream_voltages")]
#[command(version = "1.0")]
#[command(about = "Stream calibrated voltages from a DPScope")]
#[command(long_about = "Continuously read both DPScope channels at a fixed period and print the results. Useful for checking wiring and the achieved sample rate.")]
struct Args {
    /// Serial port; probes every USB serial port when omitted
    #[arg(short, long)]
    port: Option<String>,

    /// Acquisition rate preset
    #[arg(short, long, default_value = "100 ms/div", help = "One of: 100 ms/div, 200 ms/div, 500 ms/div, 1 s/div")]
    rate: String,

    /// Input range for both channels
    #[arg(short, long, default_value = "1 V/div", help = "V/div preset, e.g. \"1 V/div\" or \"50 mV/div\"")]
    input_range: String,

    /// How long to stream, in seconds
    #[arg(short, long, default_value_t = 10)]
    seconds: u64,

    /// Enable verbose logging
    #[arg(short, long, help = "Show debug information and detailed logs")]
    verbose: bool,

    /// Display only statistics (no voltage values)
    #[arg(long, help = "Show only the sample rate, not voltage readings")]
    stats_only: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    if args.verbose {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Debug)
            .init();
    } else {
        env_logger::init();
    }

    let Some(rate) = AcquisitionRate::by_label(&args.rate) else {
        let known: Vec<_> = ACQUISITION_RATES.iter().map(|r| r.label).collect();
        eprintln!("Invalid rate: {}. Use one of {:?}", args.rate, known);
        std::process::exit(1);
    };
    if !INPUT_RANGES.iter().any(|r| r.label == args.input_range) {
        let known: Vec<_> = INPUT_RANGES.iter().map(|r| r.label).collect();
        eprintln!("Invalid input range: {}. Use one of {:?}", args.input_range, known);
        std::process::exit(1);
    }

    println!("DPScope Voltage Streamer");
    println!("========================");
    println!("Rate: {} (period {:?})", rate.label, rate.period());
    println!("Input range: {}", args.input_range);
    println!("Duration: {}s\n", args.seconds);

    let mut scope = DpScope::connect(args.port.as_deref())?;
    println!("✓ Connected on {}", scope.port().unwrap_or("?"));

    for ch in Channel::ALL {
        scope.set_input_range_by_label(ch, &args.input_range)?;
    }
    scope.set_acquisition_rate(rate)?;
    println!("USB reference: {:.3} V\n", scope.usb_reference_voltage()?);

    let queue = scope.queue();
    let deadline = Instant::now() + Duration::from_secs(args.seconds);
    let mut received = 0u64;

    scope.start_streaming()?;
    while Instant::now() < deadline {
        let Ok(pair) = queue.recv_timeout(Duration::from_millis(500)) else {
            continue;
        };
        received += 1;
        if args.stats_only {
            print!("\r{} samples | {:.1} Hz", received, scope.achieved_rate());
        } else {
            print!(
                "\r{} samples | {:.1} Hz | ch1 {:>7.3} V | ch2 {:>7.3} V",
                received,
                scope.achieved_rate(),
                pair.ch1,
                pair.ch2
            );
        }
        io::stdout().flush()?;
    }

    if let Err(e) = scope.stop_streaming() {
        eprintln!("\nStreaming ended with error: {}", e);
    }
    println!("\nReceived {} samples", received);
    Ok(())
}
