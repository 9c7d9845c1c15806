use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use stompwire_client::Message;
use stompwire_frame::{Frame, Headers};

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct MessageOutput<'a> {
    destination: Option<&'a str>,
    subscription: &'a str,
    message_id: Option<&'a str>,
    headers: &'a Headers,
    body_size: usize,
    body: String,
    timestamp: String,
}

#[derive(Serialize)]
struct SendOutput<'a> {
    destination: &'a str,
    body_size: usize,
    receipt: Option<&'a str>,
    timestamp: String,
}

pub fn print_message(message: &Message, format: OutputFormat) {
    let frame = message.frame();
    match format {
        OutputFormat::Json => {
            let out = MessageOutput {
                destination: frame.header("destination"),
                subscription: message.subscription(),
                message_id: frame.header("message-id"),
                headers: &frame.headers,
                body_size: frame.binary_body().len(),
                body: body_preview(frame),
                timestamp: now_unix_seconds(),
            };
            print_json(&out);
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["DESTINATION", "SUBSCRIPTION", "SIZE", "BODY"])
                .add_row(vec![
                    frame.header("destination").unwrap_or("-").to_string(),
                    message.subscription().to_string(),
                    frame.binary_body().len().to_string(),
                    body_preview(frame),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "destination={} subscription={} message-id={} size={} body={}",
                frame.header("destination").unwrap_or("-"),
                message.subscription(),
                frame.header("message-id").unwrap_or("-"),
                frame.binary_body().len(),
                body_preview(frame)
            );
        }
        OutputFormat::Raw => print_raw(frame.binary_body()),
    }
}

pub fn print_sent(destination: &str, body_size: usize, receipt: Option<&str>, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&SendOutput {
            destination,
            body_size,
            receipt,
            timestamp: now_unix_seconds(),
        }),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["DESTINATION", "SIZE", "RECEIPT"])
                .add_row(vec![
                    destination.to_string(),
                    body_size.to_string(),
                    receipt.unwrap_or("-").to_string(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "sent destination={destination} size={body_size} receipt={}",
                receipt.unwrap_or("-")
            );
        }
        OutputFormat::Raw => {}
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

fn body_preview(frame: &Frame) -> String {
    let bytes = frame.binary_body();
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes>", bytes.len()),
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
