// Basic device discovery and connection example
//
// This example shows how to discover DPScope devices and establish a basic connection.

use dpscope_rs::{Channel, DpScope, ScopeConnector};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging (optional)
    env_logger::init();

    println!("DPScope Device Discovery Example");
    println!("================================\n");

    // Step 1: List USB serial ports
    println!("1. Listing USB serial ports...");
    let devices = ScopeConnector::get_available_devices()?;

    if devices.is_empty() {
        println!("No USB serial ports found. Please connect a DPScope and try again.");
        return Ok(());
    }

    println!("Found {} port(s):", devices.len());
    for (i, device) in devices.iter().enumerate() {
        println!(
            "  {}. {} ({})",
            i + 1,
            device.port,
            device.product.as_deref().unwrap_or("unknown product")
        );
    }
    println!();

    // Step 2: Connect to the first port that answers the ping
    println!("2. Connecting to the first DPScope...");
    let scope = DpScope::connect(None)?;
    println!("Connected on {}", scope.port().unwrap_or("?"));

    // Step 3: Device information
    println!("\n3. Device information:");
    let (major, minor) = scope.revision()?;
    println!("   Firmware revision {}.{}", major, minor);
    println!("   USB reference {:.3} V", scope.usb_reference_voltage()?);

    // Step 4: One reading per channel
    println!("\n4. Single reading...");
    let pair = scope.read_single()?;
    for ch in Channel::ALL {
        println!("   {}: {:.3} V", ch, pair.get(ch));
    }

    scope.close()?;
    println!("\n5. Connection test completed successfully!");

    Ok(())
}
