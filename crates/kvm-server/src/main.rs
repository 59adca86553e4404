use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use kvm_server::codec::TightJpeg;
use kvm_server::config::{self, Config, InputDriverType, VideoDriverType};
use kvm_server::input::{InputSink, ShellBridge};
use kvm_server::server::{Server, ServerOptions, SharedSink, shared_sink};
use kvm_server::transport::Connection;
use kvm_server::video::{DummySource, ShellSource, VideoSource};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = load_config()?;

    let keyboard = build_input(config.keyboard.driver, &config.keyboard.src, "keyboard");
    let mouse = if config.mouse.driver == config.keyboard.driver
        && config.mouse.src == config.keyboard.src
    {
        // a combined keyboard/mouse bridge is driven through one handle
        keyboard.clone()
    } else {
        build_input(config.mouse.driver, &config.mouse.src, "mouse")
    };

    let video = build_video(&config);
    let codec = Box::new(TightJpeg::new(config.video.quality));

    let options = ServerOptions {
        password: config.vnc.password.clone(),
        slice_count: config.video.slice_count,
        cursor_x_scale: config.mouse.cursor_x_scale,
        cursor_y_scale: config.mouse.cursor_y_scale,
    };
    let server = Arc::new(Server::new(keyboard, video, mouse, codec, options));

    let listener = TcpListener::bind(&config.vnc.addr)
        .await
        .with_context(|| format!("bind {}", config.vnc.addr))?;
    info!("RFB listening on {}", config.vnc.addr);

    loop {
        let (socket, peer) = listener.accept().await?;
        socket.set_nodelay(true)?;
        let server = Arc::clone(&server);
        tokio::spawn(async move {
            info!("client connected: {peer}");
            if let Err(e) = server.handle_client(Connection::new(socket)).await {
                warn!("client session ended: {e}");
            }
            info!("client disconnected: {peer}");
        });
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .try_init();
}

/// Config comes from argv[1] when given; otherwise from `kvm.toml` next to
/// the process, falling back to built-in defaults when that is absent.
fn load_config() -> Result<Config> {
    match std::env::args().nth(1) {
        Some(path) => config::load(path),
        None => {
            if std::path::Path::new(config::DEFAULT_CONFIG_PATH).exists() {
                config::load(config::DEFAULT_CONFIG_PATH)
            } else {
                info!(
                    "no {} found, using built-in defaults",
                    config::DEFAULT_CONFIG_PATH
                );
                Ok(Config::default())
            }
        }
    }
}

fn build_video(config: &Config) -> Box<dyn VideoSource> {
    let video = &config.video;
    match video.driver {
        VideoDriverType::Dummy => {
            info!("video driver is dummy");
            Box::new(DummySource::new(video.width, video.height, video.frame_rate))
        }
        VideoDriverType::Shell => {
            info!("video driver is shell: {}", video.src);
            Box::new(ShellSource::new(
                &video.src,
                video.width,
                video.height,
                video.frame_rate,
            ))
        }
    }
}

fn build_input(driver: InputDriverType, src: &str, role: &str) -> Option<SharedSink> {
    match driver {
        InputDriverType::None => {
            info!("{role} driver is none, no {role} output");
            None
        }
        InputDriverType::Shell => {
            info!("{role} driver is shell: {src}");
            let mut sink: Box<dyn InputSink> = Box::new(ShellBridge::new(src));
            if let Err(e) = sink.open() {
                // the bridge retries on the next event write
                warn!("open {role} driver: {e}");
            }
            Some(shared_sink(sink))
        }
    }
}
