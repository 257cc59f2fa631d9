use futures::StreamExt;
use http::StatusCode;
use micro_outgoing::connection::MessageWriter;
use micro_outgoing::outgoing::{OutgoingMessage, OutgoingOptions};
use micro_outgoing::protocol::{OutgoingEvent, ResponseHead, SendError};
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<(), SendError> {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::TRACE).with_writer(std::io::stderr).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let options = OutgoingOptions::new().keep_alive_timeout(Duration::from_secs(5)).high_water_mark(16);
    let mut response = OutgoingMessage::with_options(ResponseHead::new(StatusCode::OK), options);
    response.set_send_date(true);
    response.set_header("Content-Type", "text/plain; charset=utf-8")?;
    let mut events = response.events();

    let mut writer = MessageWriter::new(tokio::io::stdout());

    for line in ["streaming ", "a body ", "of unknown length\n"] {
        if !response.write(line)? {
            info!("backpressure, flushing");
        }
        writer.send(&mut response).await?;
    }

    response.cork();
    response.write("these three writes ")?;
    response.write("leave as ")?;
    response.write("one chunk\n")?;
    response.uncork();
    response.end()?;
    writer.send(&mut response).await?;

    while let Some(event) = events.next().await {
        match event {
            OutgoingEvent::HeadersSent(head) => info!(status = ?head.status_code(), headers = head.headers().len(), "headers sent"),
            OutgoingEvent::DataWritten { index, len } => info!(index, len, "data written"),
            OutgoingEvent::Finish => {
                info!(last = response.is_last(), "response finished");
                break;
            }
            other => info!(event = ?other, "event"),
        }
    }
    Ok(())
}
