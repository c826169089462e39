// Thin CLI over the appconduit library.

use std::collections::BTreeSet;
use std::process::ExitCode;

use clap::{Arg, ArgAction, Command};
use log::LevelFilter;

use appconduit::usbmuxd::{Device, UsbmuxdAddr};
use appconduit::{ops, ConduitError};

#[tokio::main]
async fn main() -> ExitCode {
    let matches = Command::new("appconduit")
        .about("Install, inspect and remove apps on an attached Apple device")
        .arg(
            Arg::new("device")
                .long("device")
                .value_name("UDID")
                .help("UDID of the device; defaults to the first USB device"),
        )
        .arg(
            Arg::new("debug")
                .long("debug")
                .help("Enable verbose output")
                .action(ArgAction::SetTrue),
        )
        .subcommand(
            Command::new("install")
                .about("Install an application from an IPA file")
                .arg(Arg::new("path").required(true).index(1)),
        )
        .subcommand(Command::new("list").about("List attached devices"))
        .subcommand(
            Command::new("lookup")
                .about("Look up application data by bundle ID")
                .arg(Arg::new("bundle_id").required(true).index(1)),
        )
        .subcommand(
            Command::new("uninstall")
                .about("Uninstall an application by bundle ID")
                .arg(Arg::new("bundle_id").required(true).index(1)),
        )
        .subcommand_required(true)
        .arg_required_else_help(true)
        .get_matches();

    let level = if matches.get_flag("debug") {
        LevelFilter::Debug
    } else {
        LevelFilter::Error
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();

    let addr = match UsbmuxdAddr::from_env_var() {
        Ok(addr) => addr,
        Err(e) => {
            eprintln!("invalid USBMUXD_SOCKET_ADDRESS: {e}");
            return ExitCode::FAILURE;
        }
    };
    let udid = matches.get_one::<String>("device");

    let result = match matches.subcommand() {
        Some(("install", sub)) => {
            let path = sub.get_one::<String>("path").expect("path is required");
            match select_device(&addr, udid).await {
                Ok(device) => ops::install(&addr, &device, path).await,
                Err(e) => Err(e),
            }
        }
        Some(("list", _)) => list_devices(&addr).await,
        Some(("lookup", sub)) => {
            let bundle_id = sub
                .get_one::<String>("bundle_id")
                .expect("bundle_id is required");
            match select_device(&addr, udid).await {
                Ok(device) => match ops::lookup(&addr, &device, bundle_id, &[]).await {
                    Ok(info) => {
                        for (key, value) in info {
                            println!("{key}: {value:?}");
                        }
                        Ok(())
                    }
                    Err(e) => Err(e),
                },
                Err(e) => Err(e),
            }
        }
        Some(("uninstall", sub)) => {
            let bundle_id = sub
                .get_one::<String>("bundle_id")
                .expect("bundle_id is required");
            match select_device(&addr, udid).await {
                Ok(device) => ops::uninstall(&addr, &device, bundle_id).await,
                Err(e) => Err(e),
            }
        }
        _ => unreachable!("subcommand is required"),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn list_devices(addr: &UsbmuxdAddr) -> Result<(), ConduitError> {
    let devices = addr.connect().await?.list_devices().await?;

    // the daemon reports one entry per transport; dedupe by serial
    let serials: BTreeSet<String> = devices.into_iter().map(|d| d.serial_number).collect();
    for serial in serials {
        println!("{serial}");
    }
    Ok(())
}

/// Picks the device with the given UDID, or the first USB device when no
/// UDID was requested. Network-attached devices are never selected.
async fn select_device(
    addr: &UsbmuxdAddr,
    udid: Option<&String>,
) -> Result<Device, ConduitError> {
    let devices = addr.connect().await?.list_devices().await?;
    devices
        .into_iter()
        .find(|d| d.is_usb() && udid.map_or(true, |u| &d.serial_number == u))
        .ok_or(ConduitError::DeviceNotFound)
}
