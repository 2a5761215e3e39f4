use std::env;

use futures::StreamExt;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, error, info, warn};
use ytdl::{
    DownloadEvent, YouTube,
    common::{errors::Error, logger},
    configs::Config,
};

const USAGE: &str = "usage: ytdl <id|url> [output]";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = env::args().skip(1);
    let Some(link) = args.next() else {
        eprintln!("{}", USAGE);
        std::process::exit(2);
    };
    let output = args.next();

    let config = match Config::load() {
        Ok(config) => config,
        Err(Error::Config(_)) => Config::default(),
        Err(e) => return Err(e.into()),
    };
    logger::init(&config);

    let youtube = YouTube::new(config.youtube)?;
    let download = youtube.download(&link, youtube.download_options());

    let events = download.events();
    let reporter = tokio::spawn(async move {
        let mut last_percent = 0;
        while let Ok(event) = events.recv_async().await {
            match event {
                DownloadEvent::Info { info, format } => info!(
                    "downloading {:?} ({}) itag {} {}",
                    info.details.title.as_deref().unwrap_or(&info.video_id),
                    info.video_id,
                    format.itag,
                    format.mime_type.as_deref().unwrap_or("unknown")
                ),
                DownloadEvent::Progress {
                    downloaded,
                    total: Some(total),
                    ..
                } if total > 0 => {
                    let percent = downloaded * 100 / total;
                    if percent >= last_percent + 10 {
                        last_percent = percent;
                        info!("{}% ({}/{} bytes)", percent, downloaded, total);
                    }
                }
                DownloadEvent::Retry { attempt, error } => warn!("retry {}: {}", attempt, error),
                DownloadEvent::Reconnect { attempt, error } => {
                    warn!("reconnect {}: {}", attempt, error)
                }
                DownloadEvent::Error(e) => error!("download failed: {}", e),
                DownloadEvent::End => info!("download finished"),
                other => debug!("{:?}", other),
            }
        }
    });

    let mut sink: Box<dyn AsyncWrite + Unpin + Send> = match output.as_deref() {
        Some("-") | None => Box::new(tokio::io::stdout()),
        Some(path) => Box::new(tokio::fs::File::create(path).await?),
    };

    let mut download = download;
    let mut result = Ok(());
    while let Some(chunk) = download.next().await {
        match chunk {
            Ok(bytes) => sink.write_all(&bytes).await?,
            Err(e) => {
                result = Err(e);
                break;
            }
        }
    }
    sink.flush().await?;
    drop(download);
    let _ = reporter.await;

    result.map_err(Into::into)
}
