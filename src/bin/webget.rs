//! `webget HOST PATH` — fetch `http://HOST/PATH` over our own TCP implementation
//! and print the response to stdout.

use std::io::{Read, Write};
use std::net::Ipv4Addr;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use minnow::socket::TcpStream;

#[derive(Parser)]
#[command(about = "Fetch HOST/PATH over a hand-rolled TCP/IP stack")]
struct Args {
    /// Hostname to connect to (must already resolve to an IPv4 address reachable
    /// through the TUN device's routing, e.g. via the lab's NAT setup).
    host: String,

    /// Path portion of the URL, e.g. /class/cs144
    path: String,

    /// Name of the TUN device to open.
    #[arg(long, default_value = "tun144")]
    interface: String,

    /// This host's address on the TUN device's point-to-point link.
    #[arg(long, default_value = "169.254.144.9")]
    local_ip: Ipv4Addr,
}

fn get_url(args: &Args) -> std::io::Result<()> {
    let peer_ip = resolve_host(&args.host)?;
    info!(host = %args.host, %peer_ip, "connecting");

    let mut stream = TcpStream::connect(&args.interface, args.local_ip, peer_ip, 80)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;

    write!(stream, "GET {} HTTP/1.1\r\n", args.path)?;
    write!(stream, "Host: {}\r\n", args.host)?;
    stream.write_all(b"Connection: close\r\n")?;
    stream.write_all(b"\r\n")?;
    stream.shutdown_write();

    let mut response = Vec::new();
    stream.read_to_end(&mut response)?;
    std::io::stdout().write_all(&response)?;
    Ok(())
}

fn resolve_host(host: &str) -> std::io::Result<Ipv4Addr> {
    use std::net::ToSocketAddrs;
    (host, 80)
        .to_socket_addrs()?
        .find_map(|addr| match addr.ip() {
            std::net::IpAddr::V4(v4) => Some(v4),
            std::net::IpAddr::V6(_) => None,
        })
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, format!("no IPv4 address for {host}")))
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    match get_url(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "webget failed");
            ExitCode::FAILURE
        }
    }
}
