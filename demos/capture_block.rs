// Block capture example
//
// Arms the DPScope capture buffer, waits for a block and prints it as a table,
// optionally writing it to a CSV file.

use clap::Parser;
use dpscope_rs::{CaptureMode, DpScope, Trigger, TriggerSource};
use std::fs::File;

#[derive(Parser)]
#[command(name = "capture_block")]
#[command(version = "1.0")]
#[command(about = "Capture one block from the DPScope buffer")]
struct Args {
    /// Serial port; probes every USB serial port when omitted
    #[arg(short, long)]
    port: Option<String>,

    /// Capture a spectrum instead of a time-domain trace
    #[arg(long)]
    fft: bool,

    /// Trigger source
    #[arg(short, long, default_value = "auto", value_parser = ["auto", "ch1", "ch2"])]
    trigger: String,

    /// Trigger on the falling edge
    #[arg(long)]
    falling: bool,

    /// Write the capture to this CSV file
    #[arg(short, long)]
    output: Option<String>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let source = match args.trigger.as_str() {
        "ch1" => TriggerSource::Ch1,
        "ch2" => TriggerSource::Ch2,
        _ => TriggerSource::Auto,
    };
    let builder = Trigger::start_capturing_when(source);
    let trigger = if args.falling {
        builder.falling_edge()
    } else {
        builder.rising_edge()
    };
    let mode = if args.fft {
        CaptureMode::FrequencyDomain
    } else {
        CaptureMode::TimeDomain
    };

    let mut scope = DpScope::connect(args.port.as_deref())?;
    scope.apply_trigger(trigger)?;

    println!("Waiting for a {} capture...", mode.as_str());
    let capture = scope.poll(mode)?;
    let df = capture.to_dataframe()?;
    println!("{}", df);

    if let Some(path) = args.output {
        capture.write_csv(File::create(&path)?)?;
        println!("Saved {} rows to {}", df.height(), path);
    }

    scope.close()?;
    Ok(())
}
