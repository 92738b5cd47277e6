use anyhow::{Context, Result};
use clap::Parser;

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::PathBuf;
use std::time::Duration;

use prompter::logging;
use prompter::replay::{read_replay, replay};
use prompter::{AlignmentEngine, EngineEvent, Opts};

fn main() -> Result<()> {
    logging::init();
    let params = Params::parse();

    let opts = match &params.config_path {
        Some(path) => {
            let file = File::open(path)
                .with_context(|| format!("failed to open config {}", path.display()))?;
            Opts::from_reader(BufReader::new(file))
                .with_context(|| format!("invalid config {}", path.display()))?
        }
        None => Opts::default(),
    };

    let script = std::fs::read_to_string(&params.script_path)
        .with_context(|| format!("failed to read script {}", params.script_path.display()))?;

    let transcript = File::open(&params.transcript_path).with_context(|| {
        format!(
            "failed to open transcript {}",
            params.transcript_path.display()
        )
    })?;
    let entries = read_replay(BufReader::new(transcript))?;

    let mut engine = AlignmentEngine::new(opts, &script, Duration::ZERO)?;
    let events = replay(
        &mut engine,
        &entries,
        Duration::from_millis(params.drain_ms),
    );

    let stdout = io::stdout();
    let mut writer = BufWriter::new(stdout.lock());
    for event in &events {
        if params.scroll_only && matches!(event.event, EngineEvent::Confidence(_)) {
            continue;
        }
        serde_json::to_writer(&mut writer, event)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}

#[derive(Parser, Debug)]
#[command(name = "prompter-replay")]
#[command(about = "Replay a recorded recognizer session against a script")]
struct Params {
    /// Script text file; one source block per line.
    #[arg(short = 's', long = "script")]
    pub script_path: PathBuf,

    /// JSON-lines recognizer recording.
    #[arg(short = 't', long = "transcript")]
    pub transcript_path: PathBuf,

    /// JSON options file (camelCase keys, missing keys take defaults).
    #[arg(short = 'c', long = "config")]
    pub config_path: Option<PathBuf>,

    /// How long to keep the clock running after the last entry.
    #[arg(long = "drain-ms", default_value_t = 1000)]
    pub drain_ms: u64,

    /// Only print scroll and re-anchor events.
    #[arg(long = "scroll-only", default_value_t = false)]
    pub scroll_only: bool,
}
