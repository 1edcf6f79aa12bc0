//! Opens a lockdown session against the first attached device, upgrades
//! to TLS when asked, and starts a service by name.

use std::time::Duration;

use muxtalk::config::{Config, LOCKDOWN_PORT};
use muxtalk::lockdown::LockdownClient;
use muxtalk::mux::MuxClient;

fn main() {
    pretty_env_logger::init();

    let config = Config::from_env();
    let timeout = config.default_timeout;

    let mut client = MuxClient::connect_muxer(&config, None).expect("failed to connect to usbmuxd");
    let buid = client.read_buid(timeout).expect("ReadBUID failed");
    let devices = client.list_devices(timeout).expect("ListDevices failed");
    let device = devices.first().expect("no devices attached");
    let udid = device.properties.serial_number.clone();
    println!("talking to device {} ({})", device.device_id, udid);

    let pair_record = client
        .read_pair_record(&udid, timeout)
        .expect("ReadPairRecord failed")
        .expect("device is not paired with this host");

    let device_id = device.device_id;
    let stream = client
        .connect(device_id, LOCKDOWN_PORT, timeout)
        .expect("failed to connect to the lockdown port");

    let mut lockdown = LockdownClient::new(stream, config.max_frame);
    let (session_id, enable_ssl) = lockdown
        .start_session(&pair_record.host_id, &buid, timeout)
        .expect("StartSession failed");
    println!("session {session_id} started, tls requested: {enable_ssl}");

    if enable_ssl {
        let pair_record_plist = muxtalk::bplist::PlistValue::dict([
            ("HostID".to_owned(), muxtalk::bplist::PlistValue::String(pair_record.host_id.clone())),
            ("SystemBUID".to_owned(), muxtalk::bplist::PlistValue::String(pair_record.system_buid.clone())),
            (
                "HostCertificate".to_owned(),
                muxtalk::bplist::PlistValue::Data(pair_record.host_certificate.clone()),
            ),
            (
                "HostPrivateKey".to_owned(),
                muxtalk::bplist::PlistValue::Data(pair_record.host_private_key.clone()),
            ),
        ]);
        lockdown
            .try_upgrade_tls(&pair_record_plist, None)
            .expect("TLS upgrade failed");
        println!("session is now TLS secured: {:?}", lockdown.state());
    }

    let (port, _) = lockdown
        .start_service("com.apple.mobile.diagnostics_relay", None, timeout)
        .expect("StartService failed");
    println!("diagnostics_relay started on port {port}");
}
