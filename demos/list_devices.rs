//! Lists every device the host muxer currently has attached.

use std::time::Duration;

use muxtalk::config::Config;
use muxtalk::mux::MuxClient;

fn main() {
    pretty_env_logger::init();

    let config = Config::from_env();
    let mut client = MuxClient::connect_muxer(&config, None).expect("failed to connect to usbmuxd");

    let devices = client
        .list_devices(Duration::from_secs(5))
        .expect("ListDevices request failed");

    if devices.is_empty() {
        println!("No devices attached.");
        return;
    }
    for device in devices {
        println!(
            "device {} — serial {}, product 0x{:04x}, {} Mbps",
            device.device_id,
            device.properties.serial_number,
            device.properties.product_id,
            device.properties.connection_speed / 1_000_000,
        );
    }
}
