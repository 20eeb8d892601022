//! Driver binary: brings up a TAP device, listens on a port, and echoes
//! back whatever each client sends — enough to exercise the full stack
//! (handshake, data transfer, FIN exchange) end to end.

use std::io::{Read, Write};
use std::net::Ipv4Addr;
use std::thread;

use tundra_tcp::{Config, Interface, MacAddr};

fn main() {
    env_logger::init();

    let mac = MacAddr([0x02, 0x42, 0xac, 0x11, 0x00, 0x02]);
    let ip: Ipv4Addr = std::env::var("TUNDRA_IP")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(Ipv4Addr::new(192, 168, 0, 1));
    let port: u16 = std::env::var("TUNDRA_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(9000);

    let mut iface = Interface::new("tap0", mac, ip, Config::default()).expect("failed to bring up tap0");
    let mut listener = iface.bind(port).expect("failed to bind port");

    log::info!("listening on {}:{}", ip, port);

    loop {
        let mut stream = match listener.accept() {
            Ok(s) => s,
            Err(e) => {
                log::error!("accept failed: {}", e);
                break;
            }
        };

        thread::spawn(move || {
            let mut buf = [0u8; 4096];
            loop {
                let n = match stream.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(e) => {
                        log::warn!("read failed: {}", e);
                        break;
                    }
                };
                let mut sent = 0;
                while sent < n {
                    match stream.write(&buf[sent..n]) {
                        Ok(0) => thread::yield_now(),
                        Ok(written) => sent += written,
                        Err(e) => {
                            log::warn!("write failed: {}", e);
                            return;
                        }
                    }
                }
            }
            let _ = stream.shutdown(std::net::Shutdown::Write);
        });
    }
}
