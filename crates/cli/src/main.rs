use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;
use rtsp::media::h264::H264Packetizer;
use rtsp::{
    AuthScheme, AuthSettings, CredentialStore, PacketizationMode, PemSource, Server,
    ServerConfig, TlsSettings,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "rtsp-streamer",
    about = "Standalone RTSP server for H.264 Annex B files"
)]
struct Args {
    /// Bind address (host:port)
    #[arg(long, short, default_value = "0.0.0.0:8554")]
    bind: String,

    /// Mount path clients connect to
    #[arg(long, default_value = "/stream")]
    mount: String,

    /// H.264 Annex B file, streamed in a loop
    #[arg(long, short)]
    input: Option<PathBuf>,

    /// Frames per second of the input
    #[arg(long, default_value_t = 30.0)]
    fps: f64,

    /// Packetization mode: 0 = single NAL, 1 = STAP-A/FU-A
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u8).range(0..=1))]
    mode: u8,

    /// RTP MTU (defaults to 65507 for mode 0, 1500 for mode 1)
    #[arg(long)]
    mtu: Option<usize>,

    /// Host advertised in SDP instead of the one the client dialed
    #[arg(long)]
    public_host: Option<String>,

    /// First server RTP port tried for UDP clients
    #[arg(long, default_value_t = rtsp::transport::RTP_DEFAULT_PORT)]
    rtp_port: u16,

    /// PEM certificate chain; enables rtsps:// together with --tls-key
    #[arg(long, requires = "tls_key")]
    tls_cert: Option<PathBuf>,

    /// PEM private key
    #[arg(long, requires = "tls_cert")]
    tls_key: Option<PathBuf>,

    /// PEM CA certificates; clients presenting a certificate issued by one
    /// of them skip Basic/Digest authentication
    #[arg(long, requires = "tls_cert")]
    tls_client_ca: Option<PathBuf>,

    /// Require authentication: basic, digest or both
    #[arg(long)]
    auth: Option<AuthScheme>,

    /// Allowed user as user:password (repeatable)
    #[arg(long = "user", value_name = "USER:PASSWORD")]
    users: Vec<String>,

    /// Authentication realm
    #[arg(long, default_value = rtsp::auth::DEFAULT_REALM)]
    realm: String,

    /// Digest nonce lifetime in seconds
    #[arg(long)]
    nonce_lifetime: Option<u64>,
}

impl Args {
    fn server_config(&self) -> Result<ServerConfig, String> {
        let mut config = ServerConfig {
            public_host: self.public_host.clone(),
            rtp_base_port: self.rtp_port,
            ..ServerConfig::new(&self.bind)
        };

        if let (Some(cert), Some(key)) = (&self.tls_cert, &self.tls_key) {
            let mut tls = TlsSettings::pem(cert, key);
            if let Some(ca) = &self.tls_client_ca {
                tls = tls.with_client_ca(PemSource::File(ca.clone()));
            }
            config.tls = Some(tls);
        }

        if let Some(scheme) = self.auth {
            let store = Arc::new(CredentialStore::new(&self.realm));
            for user in &self.users {
                let (name, password) = user
                    .split_once(':')
                    .ok_or_else(|| format!("--user `{user}` is not USER:PASSWORD"))?;
                store.add_user(name, password);
            }
            let mut auth = AuthSettings::new(scheme, store).with_realm(&self.realm);
            if let Some(secs) = self.nonce_lifetime {
                auth = auth.with_nonce_lifetime(Duration::from_secs(secs));
            }
            config.auth = Some(auth);
        }

        Ok(config)
    }
}

/// Split an Annex B stream into access units: each ends at a VCL NAL
/// (types 1 to 5) and carries the parameter sets and SEI before it.
fn access_units(stream: &[u8]) -> Vec<Vec<u8>> {
    let mut units = Vec::new();
    let mut current = Vec::new();
    for nal in H264Packetizer::extract_nal_units(stream) {
        current.extend_from_slice(&[0, 0, 0, 1]);
        current.extend_from_slice(nal);
        if matches!(nal[0] & 0x1f, 1..=5) {
            units.push(std::mem::take(&mut current));
        }
    }
    units
}

/// Push the file's access units to the mount at `fps` until `running` clears.
fn feed(server: &Server, mount: &str, units: &[Vec<u8>], fps: f64, running: &AtomicBool) {
    let frame_hns = (10_000_000.0 / fps) as i64;
    let frame_interval = Duration::from_secs_f64(1.0 / fps);
    let start = Instant::now();
    let mut index: i64 = 0;

    'outer: while running.load(Ordering::SeqCst) {
        for unit in units {
            if !running.load(Ordering::SeqCst) {
                break 'outer;
            }
            if let Err(e) = server.push_frame(mount, unit, index * frame_hns) {
                tracing::warn!(error = %e, frame = index, "frame dropped");
            }
            index += 1;

            let due = frame_interval.mul_f64(index as f64);
            if let Some(wait) = due.checked_sub(start.elapsed()) {
                thread::sleep(wait);
            }
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    if args.fps.is_nan() || args.fps <= 0.0 {
        eprintln!("--fps must be positive");
        return ExitCode::FAILURE;
    }

    let config = match args.server_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let units = match &args.input {
        Some(path) => match std::fs::read(path) {
            Ok(data) => {
                let units = access_units(&data);
                if units.is_empty() {
                    eprintln!("{}: no H.264 access units found", path.display());
                    return ExitCode::FAILURE;
                }
                tracing::info!(path = %path.display(), frames = units.len(), "input loaded");
                units
            }
            Err(e) => {
                eprintln!("Failed to read {}: {e}", path.display());
                return ExitCode::FAILURE;
            }
        },
        None => Vec::new(),
    };

    let mode = PacketizationMode::from_sdp_value(args.mode).unwrap_or_default();
    let mut server = Server::new(config);
    let mounted = match args.mtu {
        Some(mtu) => server.add_mount_with_mtu(&args.mount, mode, mtu).map(|_| ()),
        None => {
            server.add_mount(&args.mount, mode);
            Ok(())
        }
    };
    if let Err(e) = mounted {
        eprintln!("Failed to add mount: {e}");
        return ExitCode::FAILURE;
    }

    if let Err(e) = server.start() {
        eprintln!("Failed to start server: {e}");
        return ExitCode::FAILURE;
    }

    let server = Arc::new(server);
    let running = Arc::new(AtomicBool::new(true));
    let feeder = (!units.is_empty()).then(|| {
        let server = server.clone();
        let running = running.clone();
        let mount = args.mount.clone();
        let fps = args.fps;
        thread::spawn(move || feed(&server, &mount, &units, fps, &running))
    });

    println!(
        "RTSP server on {} serving {} ({mode}), press Enter to stop",
        args.bind, args.mount
    );
    let mut input = String::new();
    if let Err(e) = io::stdin().read_line(&mut input) {
        tracing::warn!(error = %e, "stdin closed");
    }

    running.store(false, Ordering::SeqCst);
    if let Some(feeder) = feeder {
        let _ = feeder.join();
    }

    match Arc::try_unwrap(server) {
        Ok(mut server) => {
            if let Err(e) = server.stop() {
                tracing::warn!(error = %e, "stop failed");
            }
        }
        Err(_) => tracing::warn!("server still referenced at shutdown"),
    }
    ExitCode::SUCCESS
}
