// USB reference calibration example
//
// Measures the USB supply voltage the DPScope uses as its ADC reference, and
// shows how the measured value changes readings across resolutions.

use dpscope_rs::{DpScope, Resolution};
use std::io::{self, Write};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    println!("DPScope Calibration Example");
    println!("===========================\n");

    let scope = DpScope::connect(None)?;
    println!("Connected to DPScope on {}\n", scope.port().unwrap_or("?"));

    println!("Measuring USB reference (DAC outputs are driven to 3000 mV)...");
    let reference = scope.usb_reference_voltage()?;
    println!("✓ USB reference: {:.4} V (nominal 5.0000 V)\n", reference);

    for resolution in [Resolution::Low, Resolution::High] {
        scope.set_resolution(resolution)?;
        let pair = scope.read_single()?;
        println!(
            "{:?} resolution: ch1 {:.3} V, ch2 {:.3} V",
            resolution, pair.ch1, pair.ch2
        );
    }
    scope.set_resolution(Resolution::Low)?;

    print!("\nRecalibrate now? (y/n): ");
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;

    if input.trim().to_lowercase().starts_with('y') {
        let reference = scope.recalibrate()?;
        println!("✓ New USB reference: {:.4} V", reference);
    } else {
        println!("Keeping the cached reference.");
    }

    scope.close()?;
    Ok(())
}
