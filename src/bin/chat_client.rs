use anyhow::{bail, Result};
use clap::Parser;
use futures::StreamExt;
use reqwest::Client;
use std::io::Write;
use std::time::Duration;

use rag_chat_relay::web::models::{ChatRequest, ChatResponse, Message};

/// Sends a conversation to the chat relay and prints the answer as it streams.
#[derive(Parser, Debug)]
#[command(version)]
struct Args {
    /// Chat endpoint
    #[arg(long, env = "CHAT_API_URL", default_value = "http://localhost:8000/api/v1/chat")]
    url: String,

    /// Conversation turns, alternating user and assistant, ending with a user turn
    #[arg(required = true)]
    turns: Vec<String>,

    #[arg(long)]
    max_tokens: Option<u32>,

    #[arg(long)]
    temperature: Option<f32>,

    /// Seconds to wait for the whole response
    #[arg(long, default_value_t = 60)]
    timeout: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    let request = ChatRequest {
        messages: conversation(&args.turns),
        stream: true,
        max_tokens: args.max_tokens,
        temperature: args.temperature,
    };

    let client = Client::builder()
        .timeout(Duration::from_secs(args.timeout))
        .build()?;
    let response = client.post(&args.url).json(&request).send().await?;

    if !response.status().is_success() {
        let status = response.status();
        let detail = response.text().await.unwrap_or_default();
        bail!("HTTP {}: {}", status, detail);
    }

    let mut stream = response.bytes_stream();
    let mut buffer: Vec<u8> = Vec::new();
    let mut stdout = std::io::stdout();

    while let Some(item) = stream.next().await {
        buffer.extend_from_slice(&item?);

        // A network chunk may hold several lines or end mid-line.
        while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = buffer.drain(..=pos).collect();
            print_chunk(&line, &mut stdout)?;
        }
    }
    if !buffer.is_empty() {
        print_chunk(&buffer, &mut stdout)?;
    }

    println!("\n\n--- done ---");
    Ok(())
}

fn conversation(turns: &[String]) -> Vec<Message> {
    // Walk backwards so the final turn is always the user's.
    let mut messages: Vec<Message> = turns
        .iter()
        .rev()
        .enumerate()
        .map(|(i, text)| {
            if i % 2 == 0 {
                Message::user(text.clone())
            } else {
                Message::assistant(text.clone())
            }
        })
        .collect();
    messages.reverse();
    messages
}

fn print_chunk(line: &[u8], out: &mut impl Write) -> Result<()> {
    let line = String::from_utf8_lossy(line);
    let line = line.trim();
    if line.is_empty() {
        return Ok(());
    }

    let chunk: ChatResponse = match serde_json::from_str(line) {
        Ok(chunk) => chunk,
        Err(e) => {
            eprintln!("Failed to parse line ({}): {}", e, line);
            return Ok(());
        }
    };

    if let Some(sources) = chunk.sources.filter(|s| !s.is_empty()) {
        writeln!(out, "\n--- sources ---")?;
        for (i, source) in sources.iter().enumerate() {
            let preview: String = source.content.chars().take(100).collect();
            writeln!(out, "{}. {}", i + 1, source.title)?;
            writeln!(out, "   {}...", preview)?;
            if let Some(url) = &source.url {
                writeln!(out, "   URL: {}", url)?;
            }
        }
        writeln!(out, "---------------\n")?;
    }

    write!(out, "{}", chunk.message)?;
    out.flush()?;
    Ok(())
}
