//
// cargo run --features cli -- GB02
// cargo run --features cli -- --scan
//
use std::time::Duration;

use kitty_print::{
    command, BleConnector, Config, Connector, Error, FrameWriter, Link, Notification, PrinterStatus,
};
use tokio::time;

const LISTEN_TIME: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> Result<(), Error> {
    dotenvy::dotenv().ok();
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();
    let connector = BleConnector::new();

    if args.get(1).map(String::as_str) == Some("--scan") {
        for name in connector.scan().await? {
            println!("{}", name);
        }
        return Ok(());
    }

    let device = match args.get(1) {
        Some(device) => device.clone(),
        None => match Config::from_env() {
            Ok(config) => config.device().to_string(),
            Err(_) => {
                println!("usage: kitty-probe <device-name> | --scan");
                println!("       (or set KITTY_DEVICE)");
                return Ok(());
            }
        },
    };

    let mut link = connector.connect(&device).await?;
    println!(
        "connected to {} ({} dots wide)",
        link.name(),
        link.printable_width()
    );

    let outcome = probe(link.as_mut()).await;

    if let Err(e) = link.unsubscribe().await {
        println!("unsubscribe failed: {}", e);
    }
    link.disconnect().await?;
    outcome
}

async fn probe(link: &mut dyn Link) -> Result<(), Error> {
    let writer = link.resolve_channels().await?;
    let mut notifications = link.subscribe().await?;

    writer.write(&command::get_device_state()).await?;
    writer.write(&command::get_device_info()).await?;

    let deadline = time::Instant::now() + LISTEN_TIME;
    loop {
        let frame = match time::timeout_at(deadline, notifications.recv()).await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                println!("notification stream closed");
                break;
            }
            Err(_) => break,
        };

        match Notification::parse(&frame) {
            Notification::DeviceState(flags) => {
                println!("state {:?}: {:?}", flags, PrinterStatus::from_flags(flags))
            }
            Notification::FlowControl { paused } => println!("flow control paused={}", paused),
            Notification::Unrecognized => println!("raw {:02X?}", frame),
        }
    }
    Ok(())
}
